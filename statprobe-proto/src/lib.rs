use std::str::FromStr;

pub mod alert;

pub use alert::{Alert, Thresholds, evaluate};

/// Number of comma-separated values in a statistics payload.
pub const FIELD_COUNT: usize = 7;

/// One parsed set of server metrics from a single fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub load_average: f64,
    /// in bytes
    pub total_memory: i64,
    pub used_memory: i64,
    /// in bytes
    pub total_disk: i64,
    pub used_disk: i64,
    /// in bytes per second
    pub total_network: i64,
    pub current_network: i64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid data format: expected {expected} values, got {actual}")]
    FieldCountMismatch { expected: usize, actual: usize },
    #[error("invalid number at field {index}: {value:?}")]
    InvalidNumber { index: usize, value: String },
}

/// Parses a payload such as `14.4,8589934592,3221225472,239475200000,235245200000,1000000000,500000`.
///
/// Values are taken positionally: load average, total/used memory, total/used
/// disk, total/current network. No range checks are made.
pub fn parse(raw: &str) -> Result<MetricsSnapshot, ParseError> {
    let fields = raw.trim().split(',').collect::<Vec<_>>();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::FieldCountMismatch {
            expected: FIELD_COUNT,
            actual: fields.len(),
        });
    }

    fn field<T: FromStr>(fields: &[&str], index: usize) -> Result<T, ParseError> {
        fields[index]
            .parse::<T>()
            .map_err(|_| ParseError::InvalidNumber {
                index,
                value: fields[index].to_owned(),
            })
    }

    Ok(MetricsSnapshot {
        load_average: field(&fields, 0)?,
        total_memory: field(&fields, 1)?,
        used_memory: field(&fields, 2)?,
        total_disk: field(&fields, 3)?,
        used_disk: field(&fields, 4)?,
        total_network: field(&fields, 5)?,
        current_network: field(&fields, 6)?,
    })
}

impl FromStr for MetricsSnapshot {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}
