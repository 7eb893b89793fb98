use std::time::Duration;

use statprobe_proto::Thresholds;

pub const STATS_URL: &str = "http://srv.msk01.gigacorp.local/_stats";

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// statistics endpoint, `http` or `https`
    pub url: String,
    /// pause between two fetch cycles
    pub interval: Duration,
    /// upper bound for one fetch, from connect to the end of the body
    pub timeout: Duration,
    /// consecutive failed cycles before "Unable to fetch server statistic"
    pub max_consecutive_failures: u32,
    pub thresholds: Thresholds,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            url: STATS_URL.to_owned(),
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(5),
            max_consecutive_failures: 3,
            thresholds: Thresholds::default(),
        }
    }
}
