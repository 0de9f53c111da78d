//! Door actuator client.
//!
//! The production actuator is a REST document store: the door position
//! is a single integer document, written with an HTTP PUT. Commands are
//! fire-and-forget from the gate's point of view; a failed write is
//! logged and the cycle timers keep running.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorCommand {
    Open,
    Close,
}

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("actuator rejected command: status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Seam between the gate driver and the physical door.
pub trait Actuator: Send + Sync + 'static {
    fn send(&self, command: DoorCommand)
        -> impl Future<Output = Result<(), ActuatorError>> + Send;
}

/// Actuator that writes the door position document over HTTP.
pub struct HttpActuator {
    client: reqwest::Client,
    endpoint: String,
    open_position: i64,
    close_position: i64,
}

impl HttpActuator {
    pub fn new(
        base_url: &str,
        document: &str,
        auth: Option<&str>,
        open_position: i64,
        close_position: i64,
        timeout: Duration,
    ) -> Result<Self, ActuatorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let mut endpoint = format!(
            "{}/{}.json",
            base_url.trim_end_matches('/'),
            document.trim_matches('/')
        );
        if let Some(key) = auth {
            endpoint = format!("{endpoint}?auth={key}");
        }

        Ok(Self {
            client,
            endpoint,
            open_position,
            close_position,
        })
    }

    fn position_for(&self, command: DoorCommand) -> i64 {
        match command {
            DoorCommand::Open => self.open_position,
            DoorCommand::Close => self.close_position,
        }
    }
}

impl Actuator for HttpActuator {
    async fn send(&self, command: DoorCommand) -> Result<(), ActuatorError> {
        let position = self.position_for(command);
        let response = self
            .client
            .put(&self.endpoint)
            .json(&position)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActuatorError::Rejected(status));
        }

        tracing::debug!(?command, position, "door position written");
        Ok(())
    }
}

/// Fallback when no actuator is configured: commands are logged only.
pub struct LogActuator;

impl Actuator for LogActuator {
    async fn send(&self, command: DoorCommand) -> Result<(), ActuatorError> {
        tracing::info!(?command, "no actuator configured; command logged");
        Ok(())
    }
}
