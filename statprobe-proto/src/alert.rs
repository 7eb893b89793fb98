use std::fmt;

use crate::MetricsSnapshot;

const BYTES_PER_MEGABYTE: f64 = (1024 * 1024) as f64;
const BYTES_PER_MEGABIT: f64 = 1_000_000.0;

/// A threshold crossed by a single snapshot.
///
/// The `Display` output is the exact line written for each alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Alert {
    /// Raw load average, printed rounded to an integer.
    LoadAverage(f64),
    /// Memory usage percentage, truncated.
    MemoryUsage(i64),
    /// Remaining disk space in megabytes, truncated.
    DiskSpace(i64),
    /// Remaining bandwidth in megabits per second, truncated.
    NetworkBandwidth(i64),
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::LoadAverage(load) => write!(f, "Load Average is too high: {load:.0}"),
            Alert::MemoryUsage(percent) => write!(f, "Memory usage too high: {percent}%"),
            Alert::DiskSpace(mb) => write!(f, "Free disk space is too low: {mb} Mb left"),
            Alert::NetworkBandwidth(mbit) => {
                write!(f, "Network bandwidth usage high: {mbit} Mbit/s available")
            }
        }
    }
}

/// Limits above which an alert is raised. All comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub load_average: f64,
    pub memory_ratio: f64,
    pub disk_ratio: f64,
    pub network_ratio: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            load_average: 30.0,
            memory_ratio: 0.80,
            disk_ratio: 0.90,
            network_ratio: 0.90,
        }
    }
}

/// `used / total`, or `None` when `total` is not positive.
fn usage_ratio(used: i64, total: i64) -> Option<f64> {
    (total > 0).then(|| used as f64 / total as f64)
}

impl Thresholds {
    /// Checks load, memory, disk and network in that order and returns every
    /// alert that fires.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<Alert> {
        let mut alerts = Vec::with_capacity(4);

        if snapshot.load_average > self.load_average {
            alerts.push(Alert::LoadAverage(snapshot.load_average));
        }

        if let Some(ratio) = usage_ratio(snapshot.used_memory, snapshot.total_memory) {
            if ratio > self.memory_ratio {
                alerts.push(Alert::MemoryUsage((ratio * 100.0) as i64));
            }
        }

        if let Some(ratio) = usage_ratio(snapshot.used_disk, snapshot.total_disk) {
            if ratio > self.disk_ratio {
                let free = (snapshot.total_disk - snapshot.used_disk) as f64;
                alerts.push(Alert::DiskSpace((free / BYTES_PER_MEGABYTE) as i64));
            }
        }

        if let Some(ratio) = usage_ratio(snapshot.current_network, snapshot.total_network) {
            if ratio > self.network_ratio {
                let available = (snapshot.total_network - snapshot.current_network) as f64;
                alerts.push(Alert::NetworkBandwidth((available / BYTES_PER_MEGABIT) as i64));
            }
        }

        alerts
    }
}

/// Evaluates `snapshot` against the default thresholds.
pub fn evaluate(snapshot: &MetricsSnapshot) -> Vec<Alert> {
    Thresholds::default().evaluate(snapshot)
}
