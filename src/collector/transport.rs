//! Delivery of event batches to the collector endpoint

use crate::error::DeliveryError;
use crate::types::Event;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace};

/// Sends batches to the collector
#[async_trait]
pub trait Transport: Send + Sync {
    /// Awaited delivery; Ok only for a 2xx answer
    async fn send(&self, batch: &[Event]) -> Result<(), DeliveryError>;

    /// Fire-and-forget delivery used at teardown; never reports failure
    fn beacon(&self, batch: Vec<Event>);
}

#[derive(Serialize)]
struct BatchBody<'a> {
    events: &'a [Event],
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Create new transport posting to `endpoint`
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn post(client: &reqwest::Client, endpoint: &str, batch: &[Event]) -> Result<(), DeliveryError> {
        let response = client
            .post(endpoint)
            .json(&BatchBody { events: batch })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout(0)
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &[Event]) -> Result<(), DeliveryError> {
        trace!("POST {} ({} events)", self.endpoint, batch.len());
        Self::post(&self.client, &self.endpoint, batch).await
    }

    fn beacon(&self, batch: Vec<Event>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime for beacon, dropping {} events", batch.len());
            return;
        };
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        handle.spawn(async move {
            if let Err(e) = Self::post(&client, &endpoint, &batch).await {
                debug!("Beacon delivery failed: {}", e);
            }
        });
    }
}
