//! Per-connection session state.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// One live connection. The outbound queue is owned by the hub; this struct
/// carries identity, activity counters and the close signal.
#[derive(Debug)]
pub struct Session {
    id: String,
    origin: SocketAddr,
    connected_at: DateTime<Utc>,
    activity: Mutex<Activity>,
    closer: CancellationToken,
}

#[derive(Debug, Default)]
struct Activity {
    last_action_at: Option<Instant>,
    action_count: u64,
}

impl Session {
    pub fn new(origin: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            origin,
            connected_at: Utc::now(),
            activity: Mutex::new(Activity::default()),
            closer: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Origin address used for moderation. IPv4-mapped IPv6 addresses are
    /// folded to plain IPv4 so a ban covers both spellings.
    pub fn origin_ip(&self) -> IpAddr {
        self.origin.ip().to_canonical()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an action unless the previous one was less than `interval` ago.
    /// Returns false when the action must be dropped.
    pub fn try_begin_action(&self, interval: Duration) -> bool {
        let now = Instant::now();
        let mut activity = self.activity();
        if let Some(last) = activity.last_action_at {
            if now.duration_since(last) < interval {
                return false;
            }
        }
        activity.last_action_at = Some(now);
        activity.action_count += 1;
        true
    }

    pub fn action_count(&self) -> u64 {
        self.activity().action_count
    }

    /// Force the connection closed. Both the reader and writer stop.
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closer.cancelled()
    }
}
