//! Time-limited peer blacklist: a peer that repeatedly fails the
//! metadata handshake or sends malformed pieces is kept out of the
//! worker pool's candidate list for a cooldown period, generalized from
//! the peer-blacklisting the original connector kept per-infohash.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct Entry {
    reason: String,
    banned_at: Instant,
    expires_at: Instant,
    strikes: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct BlacklistConfig {
    pub cooldown: Duration,
    pub strikes_before_ban: u32,
}

impl Default for BlacklistConfig {
    fn default() -> BlacklistConfig {
        BlacklistConfig {
            cooldown: Duration::from_secs(600),
            strikes_before_ban: 3,
        }
    }
}

pub struct Blacklist {
    cfg: BlacklistConfig,
    entries: Mutex<HashMap<SocketAddr, Entry>>,
}

impl Blacklist {
    pub fn new(cfg: BlacklistConfig) -> Blacklist {
        Blacklist {
            cfg,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers one strike against a peer; bans it once
    /// `strikes_before_ban` is reached within its current window.
    pub fn strike(&self, addr: SocketAddr, reason: &str, now: Instant) {
        let mut entries = self.entries.lock().expect("blacklist poisoned");
        let entry = entries.entry(addr).or_insert_with(|| Entry {
            reason: reason.to_string(),
            banned_at: now,
            expires_at: now,
            strikes: 0,
        });
        entry.strikes += 1;
        entry.reason = reason.to_string();
        if entry.strikes >= self.cfg.strikes_before_ban {
            entry.banned_at = now;
            entry.expires_at = now + self.cfg.cooldown;
        }
    }

    pub fn is_banned(&self, addr: &SocketAddr, now: Instant) -> bool {
        let entries = self.entries.lock().expect("blacklist poisoned");
        match entries.get(addr) {
            Some(entry) => entry.strikes >= self.cfg.strikes_before_ban && now < entry.expires_at,
            None => false,
        }
    }

    /// Clears a ban before its cooldown expires, e.g. a manual unban.
    pub fn forgive(&self, addr: &SocketAddr) {
        self.entries.lock().expect("blacklist poisoned").remove(addr);
    }

    /// Drops expired entries so the map doesn't grow without bound.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock().expect("blacklist poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.strikes < self.cfg.strikes_before_ban || now < e.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("blacklist poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reason(&self, addr: &SocketAddr) -> Option<String> {
        self.entries.lock().expect("blacklist poisoned").get(addr).map(|e| e.reason.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn peer_is_not_banned_before_strike_threshold() {
        let bl = Blacklist::new(BlacklistConfig::default());
        let now = Instant::now();
        bl.strike(addr(1), "timeout", now);
        bl.strike(addr(1), "timeout", now);
        assert!(!bl.is_banned(&addr(1), now));
    }

    #[test]
    fn peer_is_banned_at_strike_threshold_and_expires_after_cooldown() {
        let cfg = BlacklistConfig {
            cooldown: Duration::from_secs(60),
            strikes_before_ban: 3,
        };
        let bl = Blacklist::new(cfg);
        let now = Instant::now();
        for _ in 0..3 {
            bl.strike(addr(2), "hash_mismatch", now);
        }
        assert!(bl.is_banned(&addr(2), now));
        assert!(!bl.is_banned(&addr(2), now + Duration::from_secs(61)));
    }

    #[test]
    fn forgive_clears_ban_immediately() {
        let cfg = BlacklistConfig {
            cooldown: Duration::from_secs(600),
            strikes_before_ban: 1,
        };
        let bl = Blacklist::new(cfg);
        let now = Instant::now();
        bl.strike(addr(3), "protocol_error", now);
        assert!(bl.is_banned(&addr(3), now));
        bl.forgive(&addr(3));
        assert!(!bl.is_banned(&addr(3), now));
    }

    #[test]
    fn sweep_removes_expired_bans() {
        let cfg = BlacklistConfig {
            cooldown: Duration::from_secs(10),
            strikes_before_ban: 1,
        };
        let bl = Blacklist::new(cfg);
        let now = Instant::now();
        bl.strike(addr(4), "x", now);
        assert_eq!(bl.sweep(now + Duration::from_secs(11)), 1);
        assert!(bl.is_empty());
    }
}
