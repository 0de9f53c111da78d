//! Access audit trail.
//!
//! Every completed door cycle emits one record to an external collector.
//! Auditing is best-effort: a failed delivery is logged and dropped, it
//! never blocks or aborts actuation.

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// One granted access, recorded after the door cycle completes.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    pub identity: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Frame that produced the match, for correlation with the stream.
    pub frame_sequence: u64,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("delivery failed: {0}")]
    Delivery(#[from] reqwest::Error),
    #[error("collector rejected record: status {0}")]
    Rejected(reqwest::StatusCode),
}

pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, record: AccessRecord)
        -> impl Future<Output = Result<(), AuditError>> + Send;
}

/// Sink that POSTs records as JSON to a collector endpoint.
pub struct HttpAuditSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAuditSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AuditError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl AuditSink for HttpAuditSink {
    async fn record(&self, record: AccessRecord) -> Result<(), AuditError> {
        let response = self.client.post(&self.url).json(&record).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuditError::Rejected(status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_expected_fields() {
        let record = AccessRecord {
            identity: "alice".to_string(),
            timestamp: 1_700_000_000_000,
            frame_sequence: 42,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["identity"], "alice");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["frame_sequence"], 42);
    }
}
