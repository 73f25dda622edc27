//! HTTP trigger: issues one request per firing.
//!
//! Typical use is sending a prediction request to a deployed model so that a
//! downstream detector logs an event the observer waits for.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::Trigger;
use crate::errors::TriggerError;

/// Configuration for [`HttpTrigger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTriggerConfig {
    /// The endpoint to POST to.
    pub url: String,
    /// JSON body sent with every request.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout() -> f64 {
    30.0
}

impl HttpTriggerConfig {
    /// Creates a configuration for `url` with defaults.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: None,
            timeout_seconds: default_timeout(),
            headers: HashMap::new(),
        }
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Gets timeout as Duration.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }
}

/// A trigger that POSTs a JSON body; any non-2xx answer is a failure.
#[derive(Debug, Clone)]
pub struct HttpTrigger {
    client: reqwest::Client,
    config: HttpTriggerConfig,
}

impl HttpTrigger {
    /// Creates a trigger from its configuration.
    ///
    /// # Errors
    ///
    /// Returns `TriggerError` if the HTTP client cannot be built.
    pub fn new(config: HttpTriggerConfig) -> Result<Self, TriggerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TriggerError::Failed(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HttpTriggerConfig {
        &self.config
    }
}

#[async_trait]
impl Trigger for HttpTrigger {
    async fn fire(&self) -> Result<(), TriggerError> {
        let mut request = self.client.post(&self.config.url);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &self.config.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TriggerError::Failed(e.to_string()))?;

        let status = response.status();
        tracing::debug!(url = %self.config.url, status = status.as_u16(), "Trigger request sent");

        if status.is_success() {
            Ok(())
        } else {
            Err(TriggerError::Status {
                url: self.config.url.clone(),
                status: status.as_u16(),
            })
        }
    }
}
