//! Every configurable key from spec.md section 6, grouped by the
//! component that owns it. `Default` reproduces the spec's defaults
//! exactly; an external CLI/config-file layer (out of this crate's
//! scope) is responsible for overriding fields before the crawler starts.
use std::time::Duration;

use crate::blacklist::BlacklistConfig;
use crate::ratelimit::RateLimitConfig;
use crate::routing::RoutingConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_port: u16,
    pub workers: usize,
    pub queue_capacity: usize,
    pub bep51_enabled: bool,
    pub max_concurrent_requests: usize,
    pub max_retry_attempts: u32,
    pub piece_timeout: Duration,
    pub session_timeout: Duration,
    pub connect_timeout: Duration,
    pub get_peers_wait: Duration,
    pub bootstrap_wait: Duration,
    pub bootstrap_nodes: Vec<&'static str>,
    pub maintenance_interval: Duration,
    pub stats_interval: Duration,
    pub routing: RoutingConfig,
    pub rate_limit: RateLimitConfig,
    pub blacklist: BlacklistConfig,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            listen_port: 6881,
            workers: 10,
            queue_capacity: 100_000,
            bep51_enabled: true,
            max_concurrent_requests: 3,
            max_retry_attempts: 3,
            piece_timeout: Duration::from_secs(30),
            session_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            get_peers_wait: Duration::from_secs(10),
            bootstrap_wait: Duration::from_secs(30),
            bootstrap_nodes: crate::dht::BOOTSTRAP_ROUTERS.to_vec(),
            maintenance_interval: Duration::from_secs(5),
            stats_interval: Duration::from_secs(60),
            routing: RoutingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            blacklist: BlacklistConfig::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.listen_port, 6881);
        assert_eq!(cfg.workers, 10);
        assert_eq!(cfg.session_timeout, Duration::from_secs(120));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(30));
        assert_eq!(cfg.routing.good_threshold, 0.8);
        assert_eq!(cfg.routing.bad_threshold, 0.3);
        assert_eq!(cfg.rate_limit.queries_per_sec, 10);
        assert_eq!(cfg.rate_limit.base_rate, 5);
        assert_eq!(cfg.rate_limit.max_rate, 20);
    }
}
