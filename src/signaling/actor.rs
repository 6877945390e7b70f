use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::ServerMessage;
use super::registry::{Registration, RelayRegistry};
use super::types::{ClientId, ConnectionId, OutboundMessage, PeerInfo, SignalingError};

/// Commands sent to the hub actor
pub(crate) enum HubCommand {
    Register {
        info: PeerInfo,
        conn: ConnectionId,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    },
    Route {
        to: ClientId,
        msg: OutboundMessage,
    },
    Unregister {
        id: ClientId,
        conn: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<HubSnapshot>,
    },
}

/// Point-in-time view of the hub's membership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSnapshot {
    /// Registered endpoints, sorted by id
    pub peers: Vec<PeerInfo>,
    pub master: Option<ClientId>,
}

pub(crate) async fn hub_actor(mut rx: mpsc::Receiver<HubCommand>) {
    let mut registry = RelayRegistry::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Register {
                info,
                conn,
                peer_tx,
            } => register(&mut registry, info, conn, peer_tx),

            HubCommand::Route { to, msg } => route(&registry, &to, msg),

            HubCommand::Unregister { id, conn } => unregister(&mut registry, &id, conn),

            HubCommand::Snapshot { reply } => {
                let _ = reply.send(snapshot(&registry));
            }
        }
    }

    debug!("Hub actor stopped with {} registrations", registry.len());
}

fn encode(msg: &ServerMessage) -> OutboundMessage {
    let json = serde_json::to_string(msg).expect("ServerMessage serialization should never fail");
    OutboundMessage::from(json)
}

pub(crate) fn register(
    registry: &mut RelayRegistry,
    info: PeerInfo,
    conn: ConnectionId,
    peer_tx: mpsc::UnboundedSender<OutboundMessage>,
) {
    let id = info.id.clone();

    if let Some(old) = registry.insert(Registration {
        info: info.clone(),
        conn,
        tx: peer_tx.clone(),
    }) {
        if old.conn != conn {
            info!("Registration {} moved from {} to {}", id, old.conn, conn);
        }
    }

    info!("Client registered: {} ({}) on {}", id, info.role, conn);
    let _ = peer_tx.send(encode(&ServerMessage::Registered));

    let joined = encode(&ServerMessage::PeerJoined { peer: info });
    for other in registry.others(&id) {
        let _ = other.tx.send(joined.clone());
    }

    for other in registry.others(&id) {
        let existing = ServerMessage::PeerJoined {
            peer: other.info.clone(),
        };
        let _ = peer_tx.send(encode(&existing));
    }
}

pub(crate) fn route(registry: &RelayRegistry, to: &ClientId, msg: OutboundMessage) {
    match registry.get(to) {
        Some(target) => {
            let _ = target.tx.send(msg);
        }
        None => debug!("Dropping message for unknown peer {}", to),
    }
}

pub(crate) fn unregister(registry: &mut RelayRegistry, id: &ClientId, conn: ConnectionId) {
    let Some(removed) = registry.remove(id, conn) else {
        debug!("Ignoring close of {} for {}: registration was replaced", conn, id);
        return;
    };

    info!("Client disconnected: {} ({})", id, removed.info.role);

    let left = encode(&ServerMessage::PeerLeft { peer: removed.info });
    for other in registry.iter() {
        let _ = other.tx.send(left.clone());
    }
}

fn snapshot(registry: &RelayRegistry) -> HubSnapshot {
    let mut peers: Vec<PeerInfo> = registry.iter().map(|r| r.info.clone()).collect();
    peers.sort_by(|a, b| a.id.cmp(&b.id));
    HubSnapshot {
        peers,
        master: registry.master().cloned(),
    }
}

/// Handle to communicate with the hub actor
#[derive(Clone)]
pub struct HubHandle {
    pub(crate) tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Register (or re-register) an endpoint reachable through `peer_tx`
    pub async fn register(
        &self,
        info: PeerInfo,
        conn: ConnectionId,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<(), SignalingError> {
        self.send(HubCommand::Register {
            info,
            conn,
            peer_tx,
        })
        .await
    }

    /// Forward a raw message to `to`; silently dropped if `to` is absent
    pub async fn route(&self, to: ClientId, msg: OutboundMessage) -> Result<(), SignalingError> {
        self.send(HubCommand::Route { to, msg }).await
    }

    /// Remove `id` if `conn` still owns it and tell everyone it left
    pub async fn unregister(&self, id: ClientId, conn: ConnectionId) -> Result<(), SignalingError> {
        self.send(HubCommand::Unregister { id, conn }).await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, SignalingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { reply: reply_tx }).await?;
        reply_rx
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), SignalingError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SignalingError::Internal("actor channel closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::types::Role;

    struct Endpoint {
        info: PeerInfo,
        conn: ConnectionId,
        tx: mpsc::UnboundedSender<OutboundMessage>,
        rx: mpsc::UnboundedReceiver<OutboundMessage>,
    }

    impl Endpoint {
        fn new(id: &str, role: Role) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                info: PeerInfo {
                    id: ClientId::from(id),
                    role,
                },
                conn: ConnectionId::next(),
                tx,
                rx,
            }
        }

        fn register(&self, registry: &mut RelayRegistry) {
            register(registry, self.info.clone(), self.conn, self.tx.clone());
        }

        fn drain(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg.as_str().to_owned());
            }
            out
        }
    }

    fn peer_joined(id: &str, role: &str) -> String {
        format!(r#"{{"type":"peer-joined","peer":{{"id":"{}","role":"{}"}}}}"#, id, role)
    }

    fn peer_left(id: &str, role: &str) -> String {
        format!(r#"{{"type":"peer-left","peer":{{"id":"{}","role":"{}"}}}}"#, id, role)
    }

    const REGISTERED: &str = r#"{"type":"registered"}"#;

    #[test]
    fn register_acks_then_notifies() {
        let mut registry = RelayRegistry::new();
        let mut master = Endpoint::new("MASTER-123", Role::Master);
        let mut viewer = Endpoint::new("VIEWER-456", Role::Viewer);

        master.register(&mut registry);
        assert_eq!(master.drain(), vec![REGISTERED.to_string()]);

        viewer.register(&mut registry);
        assert_eq!(master.drain(), vec![peer_joined("VIEWER-456", "VIEWER")]);
        assert_eq!(
            viewer.drain(),
            vec![REGISTERED.to_string(), peer_joined("MASTER-123", "MASTER")]
        );
    }

    #[test]
    fn peer_joined_never_reaches_registrant() {
        let mut registry = RelayRegistry::new();
        let mut a = Endpoint::new("VIEWER-1", Role::Viewer);
        let mut b = Endpoint::new("VIEWER-2", Role::Viewer);
        let mut c = Endpoint::new("VIEWER-3", Role::Viewer);

        a.register(&mut registry);
        b.register(&mut registry);
        a.drain();
        b.drain();

        c.register(&mut registry);
        assert_eq!(a.drain(), vec![peer_joined("VIEWER-3", "VIEWER")]);
        assert_eq!(b.drain(), vec![peer_joined("VIEWER-3", "VIEWER")]);

        let mut snapshot = c.drain();
        assert_eq!(snapshot.remove(0), REGISTERED);
        snapshot.sort();
        assert_eq!(
            snapshot,
            vec![peer_joined("VIEWER-1", "VIEWER"), peer_joined("VIEWER-2", "VIEWER")]
        );
    }

    #[test]
    fn distinct_ids_route_independently() {
        let mut registry = RelayRegistry::new();
        let mut a = Endpoint::new("VIEWER-1", Role::Viewer);
        let mut b = Endpoint::new("VIEWER-2", Role::Viewer);
        a.register(&mut registry);
        b.register(&mut registry);
        a.drain();
        b.drain();

        route(&registry, &a.info.id, OutboundMessage::from("for-a".to_string()));
        route(&registry, &b.info.id, OutboundMessage::from("for-b".to_string()));

        assert_eq!(a.drain(), vec!["for-a"]);
        assert_eq!(b.drain(), vec!["for-b"]);
    }

    #[test]
    fn reregistration_routes_to_new_handle_only() {
        let mut registry = RelayRegistry::new();
        let mut old = Endpoint::new("VIEWER-456", Role::Viewer);
        let mut new = Endpoint::new("VIEWER-456", Role::Viewer);

        old.register(&mut registry);
        new.register(&mut registry);
        old.drain();
        new.drain();

        route(&registry, &new.info.id, OutboundMessage::from("offer".to_string()));
        assert!(old.drain().is_empty());
        assert_eq!(new.drain(), vec!["offer"]);
    }

    #[test]
    fn stale_close_keeps_replacement() {
        let mut registry = RelayRegistry::new();
        let mut master = Endpoint::new("MASTER-123", Role::Master);
        let old = Endpoint::new("VIEWER-456", Role::Viewer);
        let mut new = Endpoint::new("VIEWER-456", Role::Viewer);

        master.register(&mut registry);
        old.register(&mut registry);
        new.register(&mut registry);
        master.drain();
        new.drain();

        unregister(&mut registry, &old.info.id, old.conn);
        assert!(master.drain().is_empty());

        route(&registry, &new.info.id, OutboundMessage::from("still here".to_string()));
        assert_eq!(new.drain(), vec!["still here"]);
    }

    #[test]
    fn unregister_broadcasts_peer_left_and_drops_later_routes() {
        let mut registry = RelayRegistry::new();
        let mut master = Endpoint::new("MASTER-123", Role::Master);
        let mut viewer = Endpoint::new("VIEWER-456", Role::Viewer);
        master.register(&mut registry);
        viewer.register(&mut registry);
        master.drain();
        viewer.drain();

        unregister(&mut registry, &viewer.info.id, viewer.conn);
        assert_eq!(master.drain(), vec![peer_left("VIEWER-456", "VIEWER")]);

        route(&registry, &viewer.info.id, OutboundMessage::from("late".to_string()));
        assert!(viewer.drain().is_empty());
        assert!(master.drain().is_empty());
    }

    #[test]
    fn unregister_master_clears_reference() {
        let mut registry = RelayRegistry::new();
        let master = Endpoint::new("MASTER-123", Role::Master);
        master.register(&mut registry);
        assert_eq!(snapshot(&registry).master, Some(ClientId::from("MASTER-123")));

        unregister(&mut registry, &master.info.id, master.conn);
        assert_eq!(
            snapshot(&registry),
            HubSnapshot {
                peers: vec![],
                master: None
            }
        );
    }

    #[tokio::test]
    async fn handle_talks_to_actor() {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(hub_actor(rx));
        let handle = HubHandle { tx };

        let mut viewer = Endpoint::new("VIEWER-456", Role::Viewer);
        let mut master = Endpoint::new("MASTER-123", Role::Master);
        handle
            .register(viewer.info.clone(), viewer.conn, viewer.tx.clone())
            .await
            .unwrap();
        handle
            .register(master.info.clone(), master.conn, master.tx.clone())
            .await
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(
            snapshot.peers,
            vec![master.info.clone(), viewer.info.clone()]
        );
        assert_eq!(snapshot.master, Some(master.info.id.clone()));

        handle
            .route(ClientId::from("nobody"), OutboundMessage::from("lost".to_string()))
            .await
            .unwrap();
        handle.unregister(viewer.info.id.clone(), viewer.conn).await.unwrap();
        handle.snapshot().await.unwrap();

        assert_eq!(
            viewer.drain(),
            vec![REGISTERED.to_string(), peer_joined("MASTER-123", "MASTER")]
        );
        assert_eq!(
            master.drain(),
            vec![
                REGISTERED.to_string(),
                peer_joined("VIEWER-456", "VIEWER"),
                peer_left("VIEWER-456", "VIEWER"),
            ]
        );
    }
}
