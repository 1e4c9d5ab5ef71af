//! Time-expiring denylist of client origins.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

/// Origins banned until an expiry instant. Expired entries are dropped lazily
/// the next time they are looked up.
#[derive(Default)]
pub struct ModerationList {
    bans: Mutex<HashMap<IpAddr, Instant>>,
}

impl ModerationList {
    pub fn new() -> Self {
        Self::default()
    }

    fn bans(&self) -> MutexGuard<'_, HashMap<IpAddr, Instant>> {
        self.bans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ban `origin` for `seconds`. Zero or negative lifts any existing ban.
    pub fn ban(&self, origin: IpAddr, seconds: i64) {
        let mut bans = self.bans();
        if seconds <= 0 {
            if bans.remove(&origin).is_some() {
                info!(%origin, "Ban lifted");
            }
            return;
        }
        let now = Instant::now();
        let expiry = now
            .checked_add(Duration::from_secs(seconds.unsigned_abs()))
            .unwrap_or_else(|| now + Duration::from_secs(u32::MAX as u64));
        bans.insert(origin, expiry);
        info!(%origin, seconds, "Origin banned");
    }

    pub fn is_banned(&self, origin: IpAddr) -> bool {
        let mut bans = self.bans();
        let Some(expiry) = bans.get(&origin).copied() else {
            return false;
        };
        if expiry > Instant::now() {
            return true;
        }
        bans.remove(&origin);
        debug!(%origin, "Ban expired");
        false
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.bans().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_expires() {
        let list = ModerationList::new();
        list.ban(ip(1), 10);
        assert!(list.is_banned(ip(1)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(list.is_banned(ip(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!list.is_banned(ip(1)));
        assert!(list.is_empty(), "expired entry should be evicted on lookup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_strict() {
        let list = ModerationList::new();
        list.ban(ip(2), 5);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!list.is_banned(ip(2)));
    }

    #[tokio::test]
    async fn test_zero_duration_is_unban() {
        let list = ModerationList::new();
        list.ban(ip(3), 0);
        assert!(!list.is_banned(ip(3)));

        list.ban(ip(3), 60);
        assert!(list.is_banned(ip(3)));
        list.ban(ip(3), -5);
        assert!(!list.is_banned(ip(3)));
        assert!(list.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_overwrites_expiry() {
        let list = ModerationList::new();
        list.ban(ip(4), 100);
        list.ban(ip(4), 1);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!list.is_banned(ip(4)));
    }

    #[tokio::test]
    async fn test_other_origins_unaffected() {
        let list = ModerationList::new();
        list.ban(ip(5), 30);
        assert!(!list.is_banned(ip(6)));
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn test_huge_duration_does_not_overflow() {
        let list = ModerationList::new();
        list.ban(ip(7), i64::MAX);
        assert!(list.is_banned(ip(7)));
    }
}
