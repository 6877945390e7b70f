use std::collections::HashMap;

use tokio::sync::mpsc;

use super::types::{ClientId, ConnectionId, OutboundMessage, PeerInfo, Role};

/// One registered endpoint
#[derive(Debug)]
pub struct Registration {
    pub info: PeerInfo,
    pub conn: ConnectionId,
    /// Channel for outbound messages to this endpoint.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// Who is present on the hub.
///
/// Also tracks the most recently registered MASTER. When the master
/// reference is set, it names a live entry whose role is MASTER.
#[derive(Debug, Default)]
pub struct RelayRegistry {
    entries: HashMap<ClientId, Registration>,
    master: Option<(ClientId, ConnectionId)>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `reg.info.id`, returning the
    /// registration it replaced.
    pub fn insert(&mut self, reg: Registration) -> Option<Registration> {
        let id = reg.info.id.clone();

        if reg.info.role == Role::Master {
            self.master = Some((id.clone(), reg.conn));
        } else if self.master.as_ref().is_some_and(|(m, _)| *m == id) {
            // the referenced entry is being replaced by a non-master
            self.master = None;
        }

        self.entries.insert(id, reg)
    }

    /// Remove `id` if it is still owned by `conn`.
    pub fn remove(&mut self, id: &ClientId, conn: ConnectionId) -> Option<Registration> {
        if self.entries.get(id)?.conn != conn {
            return None;
        }

        if self
            .master
            .as_ref()
            .is_some_and(|(m, c)| m == id && *c == conn)
        {
            self.master = None;
        }

        self.entries.remove(id)
    }

    pub fn get(&self, id: &ClientId) -> Option<&Registration> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.entries.contains_key(id)
    }

    /// Every registration except `id`
    pub fn others<'a>(&'a self, id: &'a ClientId) -> impl Iterator<Item = &'a Registration> + 'a {
        self.entries.values().filter(move |r| r.info.id != *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.values()
    }

    /// The currently referenced master, if any
    pub fn master(&self) -> Option<&ClientId> {
        self.master.as_ref().map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(id: &str, role: Role) -> (Registration, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reg = Registration {
            info: PeerInfo {
                id: ClientId::from(id),
                role,
            },
            conn: ConnectionId::next(),
            tx,
        };
        (reg, rx)
    }

    #[test]
    fn insert_distinct_ids() {
        let mut registry = RelayRegistry::new();
        let (a, _rx_a) = registration("MASTER-123", Role::Master);
        let (b, _rx_b) = registration("VIEWER-456", Role::Viewer);

        assert!(registry.insert(a).is_none());
        assert!(registry.insert(b).is_none());
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&ClientId::from("MASTER-123")));
        assert!(registry.contains(&ClientId::from("VIEWER-456")));
    }

    #[test]
    fn insert_existing_id_replaces_handle() {
        let mut registry = RelayRegistry::new();
        let (old, _rx_old) = registration("VIEWER-456", Role::Viewer);
        let (new, _rx_new) = registration("VIEWER-456", Role::Viewer);
        let old_conn = old.conn;
        let new_conn = new.conn;

        registry.insert(old);
        let replaced = registry.insert(new).expect("old registration returned");
        assert_eq!(replaced.conn, old_conn);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&ClientId::from("VIEWER-456")).unwrap().conn, new_conn);
    }

    #[test]
    fn remove_ignores_stale_connection() {
        let mut registry = RelayRegistry::new();
        let (old, _rx_old) = registration("VIEWER-456", Role::Viewer);
        let (new, _rx_new) = registration("VIEWER-456", Role::Viewer);
        let old_conn = old.conn;
        let new_conn = new.conn;
        let id = ClientId::from("VIEWER-456");

        registry.insert(old);
        registry.insert(new);

        assert!(registry.remove(&id, old_conn).is_none());
        assert!(registry.contains(&id));
        assert!(registry.remove(&id, new_conn).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn master_reference_follows_latest_master() {
        let mut registry = RelayRegistry::new();
        let (first, _rx1) = registration("MASTER-1", Role::Master);
        let (second, _rx2) = registration("MASTER-2", Role::Master);
        let first_conn = first.conn;
        let second_conn = second.conn;

        registry.insert(first);
        assert_eq!(registry.master().map(ClientId::as_str), Some("MASTER-1"));
        registry.insert(second);
        assert_eq!(registry.master().map(ClientId::as_str), Some("MASTER-2"));

        // removing a master that is not referenced keeps the reference
        registry.remove(&ClientId::from("MASTER-1"), first_conn);
        assert_eq!(registry.master().map(ClientId::as_str), Some("MASTER-2"));

        registry.remove(&ClientId::from("MASTER-2"), second_conn);
        assert_eq!(registry.master(), None);
    }

    #[test]
    fn referenced_master_removal_does_not_fall_back() {
        let mut registry = RelayRegistry::new();
        let (first, _rx1) = registration("MASTER-1", Role::Master);
        let (second, _rx2) = registration("MASTER-2", Role::Master);
        let second_conn = second.conn;

        registry.insert(first);
        registry.insert(second);
        registry.remove(&ClientId::from("MASTER-2"), second_conn);

        assert!(registry.contains(&ClientId::from("MASTER-1")));
        assert_eq!(registry.master(), None);
    }

    #[test]
    fn master_replaced_by_viewer_clears_reference() {
        let mut registry = RelayRegistry::new();
        let (master, _rx1) = registration("SHARED", Role::Master);
        let (viewer, _rx2) = registration("SHARED", Role::Viewer);

        registry.insert(master);
        registry.insert(viewer);
        assert_eq!(registry.master(), None);
    }

    #[test]
    fn others_excludes_self() {
        let mut registry = RelayRegistry::new();
        for (id, role) in [("MASTER-123", Role::Master), ("VIEWER-1", Role::Viewer), ("VIEWER-2", Role::Viewer)] {
            let (reg, _rx) = registration(id, role);
            registry.insert(reg);
        }

        let me = ClientId::from("VIEWER-1");
        let mut others: Vec<&str> = registry.others(&me).map(|r| r.info.id.as_str()).collect();
        others.sort();
        assert_eq!(others, vec!["MASTER-123", "VIEWER-2"]);
    }
}
