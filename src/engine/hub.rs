//! Presence and broadcast hub.
//!
//! A single actor task owns the connection and room tables. Everything else
//! talks to it through a [`HubHandle`]. Each connection hands the hub the
//! sending half of its outbound queue; dropping that sender is how the hub
//! closes a connection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use ts_rs::TS;

use super::protocol::ServerEvent;

pub type ConnId = u64;

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone)]
pub enum SystemCommand {
    /// Drop every connection and stop the actor.
    Shutdown,
    /// Log table sizes.
    DumpDiagnostics,
}

#[derive(Debug)]
pub enum ActorMessage<C> {
    System(SystemCommand),
    Domain(C),
}

#[derive(Debug)]
pub enum HubCommand {
    Register {
        conn_id: ConnId,
        principal_id: String,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    },
    Unregister {
        conn_id: ConnId,
    },
    /// Membership must already be checked by the caller.
    Join {
        conn_id: ConnId,
        team_id: String,
        reply: oneshot::Sender<bool>,
    },
    Leave {
        conn_id: ConnId,
        team_id: String,
    },
    Broadcast {
        team_id: String,
        event: ServerEvent,
        exclude: Option<ConnId>,
    },
    /// Pull every connection of `principal_id` out of the room.
    Evict {
        team_id: String,
        principal_id: String,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct HubStats {
    pub connections: usize,
    pub principals: usize,
    pub rooms: usize,
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::UnboundedSender<ActorMessage<HubCommand>>,
    next_conn: Arc<AtomicU64>,
}

impl HubHandle {
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let join_handle = tokio::spawn(Hub::default().run(cmd_rx));
        tracing::info!("Hub actor spawned");
        (
            Self {
                cmd_tx,
                next_conn: Arc::new(AtomicU64::new(1)),
            },
            join_handle,
        )
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, cmd: HubCommand) {
        if self.cmd_tx.send(ActorMessage::Domain(cmd)).is_err() {
            tracing::warn!("Hub actor is not running, command dropped");
        }
    }

    pub fn register(&self, conn_id: ConnId, principal_id: &str, outbox: mpsc::UnboundedSender<ServerEvent>) {
        self.send(HubCommand::Register {
            conn_id,
            principal_id: principal_id.to_string(),
            outbox,
        });
    }

    pub fn unregister(&self, conn_id: ConnId) {
        self.send(HubCommand::Unregister { conn_id });
    }

    /// Add the connection to the room. Returns `false` if the connection is
    /// unknown (already closed) or the hub is gone.
    pub async fn join(&self, conn_id: ConnId, team_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Join {
            conn_id,
            team_id: team_id.to_string(),
            reply,
        });
        rx.await.unwrap_or(false)
    }

    pub fn leave(&self, conn_id: ConnId, team_id: &str) {
        self.send(HubCommand::Leave {
            conn_id,
            team_id: team_id.to_string(),
        });
    }

    /// Deliver to every connection in the room. Best-effort, at most once.
    pub fn broadcast(&self, team_id: &str, event: ServerEvent) {
        self.send(HubCommand::Broadcast {
            team_id: team_id.to_string(),
            event,
            exclude: None,
        });
    }

    /// Deliver to everyone in the room but `exclude`. Dropped when `exclude`
    /// is not itself in the room.
    pub fn broadcast_except(&self, team_id: &str, event: ServerEvent, exclude: ConnId) {
        self.send(HubCommand::Broadcast {
            team_id: team_id.to_string(),
            event,
            exclude: Some(exclude),
        });
    }

    pub fn evict(&self, team_id: &str, principal_id: &str) {
        self.send(HubCommand::Evict {
            team_id: team_id.to_string(),
            principal_id: principal_id.to_string(),
        });
    }

    pub async fn stats(&self) -> HubStats {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply });
        rx.await.unwrap_or_default()
    }

    pub fn dump_diagnostics(&self) {
        let _ = self.cmd_tx.send(ActorMessage::System(SystemCommand::DumpDiagnostics));
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ActorMessage::System(SystemCommand::Shutdown));
    }
}

// ============================================================================
// Actor
// ============================================================================

struct Connection {
    principal_id: String,
    outbox: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Hub {
    conns: HashMap<ConnId, Connection>,
    rooms: HashMap<String, HashSet<ConnId>>,
}

impl Hub {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ActorMessage<HubCommand>>) {
        while let Some(msg) = cmd_rx.recv().await {
            match msg {
                ActorMessage::System(sys) => {
                    if self.handle_system_command(sys) {
                        break;
                    }
                }
                ActorMessage::Domain(cmd) => self.handle_command(cmd),
            }
        }
        self.conns.clear();
        self.rooms.clear();
        tracing::info!("Hub actor stopped");
    }

    fn handle_system_command(&self, cmd: SystemCommand) -> bool {
        match cmd {
            SystemCommand::Shutdown => {
                tracing::info!(connections = self.conns.len(), "Hub shutting down");
                true
            }
            SystemCommand::DumpDiagnostics => {
                let stats = self.stats();
                tracing::info!(
                    connections = stats.connections,
                    principals = stats.principals,
                    rooms = stats.rooms,
                    "Hub diagnostics",
                );
                false
            }
        }
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register {
                conn_id,
                principal_id,
                outbox,
            } => {
                tracing::debug!(conn_id, principal_id = %principal_id, "Connection registered");
                self.conns.insert(
                    conn_id,
                    Connection {
                        principal_id,
                        outbox,
                        rooms: HashSet::new(),
                    },
                );
            }
            HubCommand::Unregister { conn_id } => self.drop_connection(conn_id),
            HubCommand::Join {
                conn_id,
                team_id,
                reply,
            } => {
                let joined = match self.conns.get_mut(&conn_id) {
                    Some(conn) => {
                        conn.rooms.insert(team_id.clone());
                        self.rooms.entry(team_id.clone()).or_default().insert(conn_id);
                        let _ = conn.outbox.send(ServerEvent::Joined { team_id });
                        true
                    }
                    None => false,
                };
                let _ = reply.send(joined);
            }
            HubCommand::Leave { conn_id, team_id } => self.leave(conn_id, &team_id),
            HubCommand::Broadcast {
                team_id,
                event,
                exclude,
            } => self.broadcast(&team_id, event, exclude),
            HubCommand::Evict {
                team_id,
                principal_id,
            } => {
                let targets: Vec<ConnId> = self
                    .rooms
                    .get(&team_id)
                    .into_iter()
                    .flatten()
                    .filter(|id| {
                        self.conns
                            .get(*id)
                            .is_some_and(|c| c.principal_id == principal_id)
                    })
                    .copied()
                    .collect();
                for conn_id in targets {
                    self.leave(conn_id, &team_id);
                }
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn leave(&mut self, conn_id: ConnId, team_id: &str) {
        if let Some(conn) = self.conns.get_mut(&conn_id) {
            if conn.rooms.remove(team_id) {
                let _ = conn.outbox.send(ServerEvent::Left {
                    team_id: team_id.to_string(),
                });
            }
        }
        self.remove_from_room(team_id, conn_id);
    }

    fn broadcast(&mut self, team_id: &str, event: ServerEvent, exclude: Option<ConnId>) {
        let Some(members) = self.rooms.get(team_id) else {
            return;
        };
        if exclude.is_some_and(|sender| !members.contains(&sender)) {
            return;
        }
        let mut dead = Vec::new();
        let mut delivered = 0usize;
        for conn_id in members {
            if Some(*conn_id) == exclude {
                continue;
            }
            match self.conns.get(conn_id) {
                Some(conn) if conn.outbox.send(event.clone()).is_ok() => delivered += 1,
                _ => dead.push(*conn_id),
            }
        }
        tracing::trace!(team_id, event = event.name(), delivered, "Broadcast");
        for conn_id in dead {
            self.drop_connection(conn_id);
        }
    }

    fn drop_connection(&mut self, conn_id: ConnId) {
        if let Some(conn) = self.conns.remove(&conn_id) {
            for team_id in &conn.rooms {
                self.remove_from_room(team_id, conn_id);
            }
            tracing::debug!(conn_id, principal_id = %conn.principal_id, "Connection dropped");
        }
    }

    fn remove_from_room(&mut self, team_id: &str, conn_id: ConnId) {
        if let Some(members) = self.rooms.get_mut(team_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.rooms.remove(team_id);
            }
        }
    }

    fn stats(&self) -> HubStats {
        let principals: HashSet<&str> = self.conns.values().map(|c| c.principal_id.as_str()).collect();
        HubStats {
            connections: self.conns.len(),
            principals: principals.len(),
            rooms: self.rooms.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(hub: &HubHandle, principal: &str) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.next_conn_id();
        hub.register(id, principal, tx);
        (id, rx)
    }

    fn typing(team: &str, who: &str) -> ServerEvent {
        ServerEvent::TypingStart {
            team_id: team.into(),
            principal_id: who.into(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_room_only() {
        let (hub, _task) = HubHandle::spawn();
        let (a, mut rx_a) = connect(&hub, "alice");
        let (_b, mut rx_b) = connect(&hub, "bob");

        assert!(hub.join(a, "t1").await);
        assert_eq!(rx_a.recv().await, Some(ServerEvent::Joined { team_id: "t1".into() }));

        hub.broadcast("t1", typing("t1", "x"));
        assert_eq!(rx_a.recv().await, Some(typing("t1", "x")));

        // Flush the actor before checking bob saw nothing
        let stats = hub.stats().await;
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.rooms, 1);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_except_skips_sender() {
        let (hub, _task) = HubHandle::spawn();
        let (a, mut rx_a) = connect(&hub, "alice");
        let (b, mut rx_b) = connect(&hub, "bob");
        hub.join(a, "t1").await;
        hub.join(b, "t1").await;
        let _ = rx_a.recv().await;
        let _ = rx_b.recv().await;

        hub.broadcast_except("t1", typing("t1", "alice"), a);
        assert_eq!(rx_b.recv().await, Some(typing("t1", "alice")));
        hub.stats().await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outsider_cannot_relay() {
        let (hub, _task) = HubHandle::spawn();
        let (a, mut rx_a) = connect(&hub, "alice");
        let (b, _rx_b) = connect(&hub, "bob");
        hub.join(a, "t1").await;
        let _ = rx_a.recv().await;

        hub.broadcast_except("t1", typing("t1", "bob"), b);
        hub.stats().await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_same_principal_many_connections() {
        let (hub, _task) = HubHandle::spawn();
        let (a1, mut rx1) = connect(&hub, "alice");
        let (a2, mut rx2) = connect(&hub, "alice");
        hub.join(a1, "t1").await;
        hub.join(a2, "t1").await;
        let _ = rx1.recv().await;
        let _ = rx2.recv().await;

        hub.broadcast("t1", typing("t1", "bob"));
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());

        let stats = hub.stats().await;
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.principals, 1);
    }

    #[tokio::test]
    async fn test_unregister_leaves_all_rooms() {
        let (hub, _task) = HubHandle::spawn();
        let (a, mut rx_a) = connect(&hub, "alice");
        hub.join(a, "t1").await;
        hub.join(a, "t2").await;
        hub.unregister(a);

        let stats = hub.stats().await;
        assert_eq!(stats, HubStats::default());

        // Drain the two joined frames; the sender was dropped so the queue ends
        assert!(rx_a.recv().await.is_some());
        assert!(rx_a.recv().await.is_some());
        assert_eq!(rx_a.recv().await, None);
    }

    #[tokio::test]
    async fn test_join_unknown_connection() {
        let (hub, _task) = HubHandle::spawn();
        assert!(!hub.join(42, "t1").await);
    }

    #[tokio::test]
    async fn test_leave_emits_left() {
        let (hub, _task) = HubHandle::spawn();
        let (a, mut rx_a) = connect(&hub, "alice");
        hub.join(a, "t1").await;
        hub.leave(a, "t1");
        assert_eq!(rx_a.recv().await, Some(ServerEvent::Joined { team_id: "t1".into() }));
        assert_eq!(rx_a.recv().await, Some(ServerEvent::Left { team_id: "t1".into() }));
        assert_eq!(hub.stats().await.rooms, 0);
    }

    #[tokio::test]
    async fn test_evict_only_targets_principal() {
        let (hub, _task) = HubHandle::spawn();
        let (a, mut rx_a) = connect(&hub, "alice");
        let (b, mut rx_b) = connect(&hub, "bob");
        hub.join(a, "t1").await;
        hub.join(b, "t1").await;
        let _ = rx_a.recv().await;
        let _ = rx_b.recv().await;

        hub.evict("t1", "bob");
        assert_eq!(rx_b.recv().await, Some(ServerEvent::Left { team_id: "t1".into() }));

        hub.broadcast("t1", typing("t1", "alice"));
        assert_eq!(rx_a.recv().await, Some(typing("t1", "alice")));
        hub.stats().await;
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_connection_pruned_on_broadcast() {
        let (hub, _task) = HubHandle::spawn();
        let (a, rx_a) = connect(&hub, "alice");
        hub.join(a, "t1").await;
        drop(rx_a);
        hub.broadcast("t1", typing("t1", "bob"));
        assert_eq!(hub.stats().await.connections, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_outboxes() {
        let (hub, task) = HubHandle::spawn();
        let (_a, mut rx_a) = connect(&hub, "alice");
        hub.shutdown();
        task.await.unwrap();
        assert_eq!(rx_a.recv().await, None);
        assert!(!hub.join(1, "t1").await);
    }
}
