//! The hub: single owner of the live session set and broadcast fan-out.
//!
//! All mutations of the live set happen inside [`HubLoop::run`], which drains
//! register, unregister and broadcast events one at a time. Everyone else talks
//! to it through a cloneable [`Hub`] handle. Fan-out never waits on a session:
//! a session whose outbound queue is full is evicted and closed on the spot.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use bitgrid_core::error::{GridError, Result};
use bitgrid_core::moderation::ModerationList;
use bitgrid_core::protocol::Outbound;

use crate::session::Session;

/// A session in the live set together with the sending half of its queue.
/// Dropping the entry closes the queue.
struct LiveSession {
    session: Arc<Session>,
    outbound: mpsc::Sender<String>,
}

struct Registration {
    session: Arc<Session>,
    outbound: mpsc::Sender<String>,
    admitted: oneshot::Sender<Result<()>>,
}

type LiveSet = Arc<RwLock<HashMap<String, LiveSession>>>;

/// Operator view of one live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub ip: String,
    pub action_count: u64,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

/// Cloneable handle for talking to the hub loop.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<String>,
    broadcast_tx: mpsc::Sender<String>,
    sessions: LiveSet,
    moderation: Arc<ModerationList>,
}

/// The event loop half of the hub. Run it exactly once.
pub struct HubLoop {
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<String>,
    broadcast_rx: mpsc::Receiver<String>,
    sessions: LiveSet,
    moderation: Arc<ModerationList>,
    /// Notices produced while handling an event, fanned out before the next
    /// event is taken.
    scheduled: VecDeque<String>,
}

impl Hub {
    pub fn new(moderation: Arc<ModerationList>, event_capacity: usize) -> (Self, HubLoop) {
        let (register_tx, register_rx) = mpsc::channel(event_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(event_capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(event_capacity);
        let sessions: LiveSet = Arc::new(RwLock::new(HashMap::new()));

        let hub = Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            sessions: sessions.clone(),
            moderation: moderation.clone(),
        };
        let event_loop = HubLoop {
            register_rx,
            unregister_rx,
            broadcast_rx,
            sessions,
            moderation,
            scheduled: VecDeque::new(),
        };
        (hub, event_loop)
    }

    /// Hand a session and its outbound queue to the hub. Resolves once the hub
    /// has admitted it, or fails with [`GridError::Banned`] if its origin is
    /// banned.
    pub async fn register(
        &self,
        session: Arc<Session>,
        outbound: mpsc::Sender<String>,
    ) -> Result<()> {
        let (admitted, reply) = oneshot::channel();
        let registration = Registration {
            session,
            outbound,
            admitted,
        };
        if self.register_tx.send(registration).await.is_err() {
            warn!("Hub loop is not running; rejecting session");
            return Err(anyhow::anyhow!("hub loop is not running").into());
        }
        reply
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("hub dropped registration").into()))
    }

    /// Remove a session from the live set. Unknown ids are ignored.
    pub async fn unregister(&self, id: &str) {
        if self.unregister_tx.send(id.to_string()).await.is_err() {
            debug!(session_id = %id, "Hub loop gone during unregister");
        }
    }

    /// Queue a frame for every live session.
    pub async fn broadcast(&self, frame: &Outbound) {
        if self.broadcast_tx.send(frame.to_string()).await.is_err() {
            debug!("Hub loop gone during broadcast");
        }
    }

    /// Ban the origin of session `id` for `ban_seconds`, drop the session and
    /// close its connection. Returns false if no such session is live.
    pub async fn kick(&self, id: &str, ban_seconds: i64) -> bool {
        let target = {
            let sessions = self.sessions.read().await;
            sessions.get(id).map(|live| live.session.clone())
        };
        let Some(session) = target else {
            return false;
        };

        self.moderation.ban(session.origin_ip(), ban_seconds);
        self.unregister(id).await;
        session.close();
        info!(session_id = %id, origin = %session.origin_ip(), ban_seconds, "Session kicked");

        #[cfg(feature = "metrics")]
        crate::metrics::record_kick();

        true
    }

    /// Live sessions, most active first.
    pub async fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .map(|live| ClientInfo {
                    id: live.session.id().to_string(),
                    ip: live.session.origin_ip().to_string(),
                    action_count: live.session.action_count(),
                    connected_at: live.session.connected_at(),
                })
                .collect()
        };
        clients.sort_by(|a, b| b.action_count.cmp(&a.action_count));
        clients
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_live(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }
}

impl HubLoop {
    /// Process events until every [`Hub`] handle has been dropped.
    pub async fn run(mut self) {
        info!("Hub started");
        loop {
            tokio::select! {
                Some(registration) = self.register_rx.recv() => {
                    self.on_register(registration).await;
                }
                Some(id) = self.unregister_rx.recv() => {
                    self.on_unregister(&id).await;
                }
                Some(message) = self.broadcast_rx.recv() => {
                    self.fan_out(&message).await;
                }
                else => break,
            }

            while let Some(notice) = self.scheduled.pop_front() {
                self.fan_out(&notice).await;
            }
        }
        info!("Hub stopped");
    }

    async fn on_register(&mut self, registration: Registration) {
        let Registration {
            session,
            outbound,
            admitted,
        } = registration;
        let origin = session.origin_ip();

        if self.moderation.is_banned(origin) {
            info!(session_id = %session.id(), %origin, "Rejected banned origin");
            session.close();
            let _ = admitted.send(Err(GridError::Banned(origin.to_string())));
            #[cfg(feature = "metrics")]
            crate::metrics::record_rejected();
            return;
        }

        let id = session.id().to_string();
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id.clone(), LiveSession { session, outbound });
            #[cfg(feature = "metrics")]
            crate::metrics::set_live_sessions(sessions.len());
        }
        let _ = admitted.send(Ok(()));
        debug!(session_id = %id, %origin, "Session registered");
        self.scheduled.push_back(Outbound::Joined(id).to_string());
    }

    async fn on_unregister(&mut self, id: &str) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(id);
            #[cfg(feature = "metrics")]
            crate::metrics::set_live_sessions(sessions.len());
            removed
        };
        if removed.is_some() {
            debug!(session_id = %id, "Session unregistered");
            self.scheduled.push_back(Outbound::Left(id.to_string()).to_string());
        }
    }

    async fn fan_out(&mut self, message: &str) {
        let mut sessions = self.sessions.write().await;
        let mut evicted = Vec::new();
        for (id, live) in sessions.iter() {
            match live.outbound.try_send(message.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session_id = %id, "Outbound queue full, evicting slow session");
                    evicted.push(id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(session_id = %id, "Outbound queue closed, dropping session");
                    evicted.push(id.clone());
                }
            }
        }
        for id in evicted {
            if let Some(live) = sessions.remove(&id) {
                live.session.close();
            }
            #[cfg(feature = "metrics")]
            crate::metrics::record_eviction();
            self.scheduled.push_back(Outbound::Left(id).to_string());
        }
        #[cfg(feature = "metrics")]
        crate::metrics::set_live_sessions(sessions.len());
        debug!(sent = sessions.len(), "Broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    fn start_hub() -> (Hub, Arc<ModerationList>) {
        let moderation = Arc::new(ModerationList::new());
        let (hub, event_loop) = Hub::new(moderation.clone(), 64);
        tokio::spawn(event_loop.run());
        (hub, moderation)
    }

    fn session_from(last: u8) -> Arc<Session> {
        Arc::new(Session::new(SocketAddr::from((Ipv4Addr::new(10, 0, 0, last), 5000))))
    }

    async fn join(hub: &Hub, last: u8, capacity: usize) -> (Arc<Session>, mpsc::Receiver<String>) {
        let session = session_from(last);
        let (tx, rx) = mpsc::channel(capacity);
        hub.register(session.clone(), tx).await.unwrap();
        (session, rx)
    }

    async fn next(rx: &mut mpsc::Receiver<String>) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
    }

    #[tokio::test]
    async fn test_join_notices_reach_everyone() {
        let (hub, _) = start_hub();
        let (a, mut a_rx) = join(&hub, 1, 16).await;
        assert_eq!(next(&mut a_rx).await.unwrap(), format!("r:{}", a.id()));

        let (b, mut b_rx) = join(&hub, 2, 16).await;
        assert_eq!(next(&mut a_rx).await.unwrap(), format!("r:{}", b.id()));
        assert_eq!(next(&mut b_rx).await.unwrap(), format!("r:{}", b.id()));
        assert_eq!(hub.count().await, 2);
    }

    #[tokio::test]
    async fn test_leave_notice_names_the_leaver() {
        let (hub, _) = start_hub();
        let (a, mut a_rx) = join(&hub, 1, 16).await;
        let (b, mut b_rx) = join(&hub, 2, 16).await;
        next(&mut a_rx).await;
        next(&mut a_rx).await;
        next(&mut b_rx).await;

        hub.unregister(a.id()).await;
        assert_eq!(next(&mut b_rx).await.unwrap(), format!("d:{}", a.id()));
        // A's queue is closed once it is out of the live set
        assert_eq!(next(&mut a_rx).await, None);
        assert!(hub.is_live(b.id()).await);
    }

    #[tokio::test]
    async fn test_unregister_twice_is_noop() {
        let (hub, _) = start_hub();
        let (a, _a_rx) = join(&hub, 1, 16).await;
        let (_b, mut b_rx) = join(&hub, 2, 16).await;
        next(&mut b_rx).await;

        hub.unregister(a.id()).await;
        assert_eq!(next(&mut b_rx).await.unwrap(), format!("d:{}", a.id()));

        hub.unregister(a.id()).await;
        hub.unregister(a.id()).await;
        // Unregister and broadcast are separate inputs, so wait until the
        // repeats have been consumed before sending the marker frame.
        while hub.unregister_tx.capacity() < hub.unregister_tx.max_capacity() {
            tokio::task::yield_now().await;
        }
        hub.broadcast(&Outbound::Toggled { index: 1, bit: 1 }).await;
        assert_eq!(next(&mut b_rx).await.unwrap(), "s:1:1");
    }

    #[tokio::test]
    async fn test_slow_session_is_evicted() {
        let (hub, _) = start_hub();
        // Capacity 1 and never drained: the join notice fills it
        let (slow, mut slow_rx) = join(&hub, 1, 1).await;
        let (fast, mut fast_rx) = join(&hub, 2, 16).await;

        assert_eq!(next(&mut fast_rx).await.unwrap(), format!("r:{}", fast.id()));
        assert_eq!(next(&mut fast_rx).await.unwrap(), format!("d:{}", slow.id()));
        assert!(!hub.is_live(slow.id()).await);
        assert!(slow.is_closed(), "evicted session must be closed");
        assert!(!fast.is_closed());

        hub.broadcast(&Outbound::Toggled { index: 0, bit: 1 }).await;
        assert_eq!(next(&mut fast_rx).await.unwrap(), "s:0:1");

        // The slow session only ever got what fit before eviction
        assert_eq!(next(&mut slow_rx).await.unwrap(), format!("r:{}", slow.id()));
        assert_eq!(next(&mut slow_rx).await, None);
    }

    #[tokio::test]
    async fn test_banned_origin_is_rejected() {
        let (hub, moderation) = start_hub();
        moderation.ban(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 60);

        let session = session_from(9);
        let (tx, mut rx) = mpsc::channel(16);
        let err = hub.register(session.clone(), tx).await.unwrap_err();
        assert!(matches!(err, GridError::Banned(ref origin) if origin == "10.0.0.9"));
        assert!(session.is_closed());
        assert_eq!(hub.count().await, 0);
        assert_eq!(next(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_kick_unknown_changes_nothing() {
        let (hub, moderation) = start_hub();
        let (_a, _a_rx) = join(&hub, 1, 16).await;

        assert!(!hub.kick("no-such-session", 60).await);
        assert_eq!(hub.count().await, 1);
        assert!(moderation.is_empty());
    }

    #[tokio::test]
    async fn test_kick_bans_and_disconnects() {
        let (hub, moderation) = start_hub();
        let (a, _a_rx) = join(&hub, 1, 16).await;
        let (_b, mut b_rx) = join(&hub, 2, 16).await;
        next(&mut b_rx).await;

        assert!(hub.kick(a.id(), 30).await);
        assert!(a.is_closed());
        assert!(moderation.is_banned(a.origin_ip()));
        assert_eq!(next(&mut b_rx).await.unwrap(), format!("d:{}", a.id()));

        // Reconnecting from the same origin is refused
        let retry = session_from(1);
        let (tx, _rx) = mpsc::channel(16);
        assert!(matches!(
            hub.register(retry, tx).await,
            Err(GridError::Banned(_))
        ));
    }

    #[tokio::test]
    async fn test_clients_sorted_by_activity() {
        let (hub, _) = start_hub();
        let (quiet, _q) = join(&hub, 1, 16).await;
        let (busy, _b) = join(&hub, 2, 16).await;
        let (medium, _m) = join(&hub, 3, 16).await;

        for _ in 0..3 {
            busy.try_begin_action(Duration::ZERO);
        }
        medium.try_begin_action(Duration::ZERO);

        let clients = hub.clients().await;
        let ids: Vec<&str> = clients.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![busy.id(), medium.id(), quiet.id()]);
        assert_eq!(clients[0].action_count, 3);
        assert_eq!(clients[0].ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_client_info_json_shape() {
        let info = ClientInfo {
            id: "abc".into(),
            ip: "127.0.0.1".into(),
            action_count: 4,
            connected_at: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["ip"], "127.0.0.1");
        assert_eq!(json["actionCount"], 4);
        assert!(json["connectedAt"].is_string());
    }
}
