use std::time::Duration;

use bytes::Bytes;
use http::{StatusCode, Uri};
use statprobe_proto::{MetricsSnapshot, ParseError};

use crate::http_util;

/// Every way a cycle can fail to produce a snapshot. All of them count the
/// same towards the consecutive-failure threshold.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(anyhow::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected status code: {0}")]
    Status(StatusCode),
    #[error("read error: {0}")]
    Read(anyhow::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

pub trait StatsSource {
    async fn fetch(&mut self) -> Result<MetricsSnapshot, FetchError>;
}

/// Fetches the payload with a single HTTP GET per call.
#[derive(Debug)]
pub struct HttpStatsSource {
    uri: Uri,
    timeout: Duration,
}

impl HttpStatsSource {
    pub fn try_new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let uri = url.parse::<Uri>()?;
        // validate once up front, every cycle builds the same request
        http_util::get_request(&uri)?;
        Ok(Self { uri, timeout })
    }

    async fn fetch_body(&self) -> Result<Bytes, FetchError> {
        let req = http_util::get_request(&self.uri).map_err(FetchError::Transport)?;
        let mut stream = http_util::connect(&self.uri)
            .await
            .map_err(FetchError::Transport)?;
        http_util::write_request(&mut stream, &req)
            .await
            .map_err(FetchError::Transport)?;

        let raw = http_util::read_to_end(&mut stream)
            .await
            .map_err(|e| FetchError::Read(e.into()))?;
        let resp = http_util::parse_http_response(raw).map_err(FetchError::Read)?;

        if resp.status() != StatusCode::OK {
            return Err(FetchError::Status(resp.status()));
        }

        Ok(resp.into_body())
    }
}

impl StatsSource for HttpStatsSource {
    async fn fetch(&mut self) -> Result<MetricsSnapshot, FetchError> {
        let body = tokio::time::timeout(self.timeout, self.fetch_body())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;
        let text = std::str::from_utf8(&body).map_err(|e| FetchError::Read(e.into()))?;

        Ok(statprobe_proto::parse(text)?)
    }
}
