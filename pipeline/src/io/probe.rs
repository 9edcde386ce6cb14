//! Target existence probe.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::redirect::Policy;
use tracing::{debug, instrument};

use crate::io::config::ProbeConfig;

/// Answers whether a target page exists. Network failures are a plain `false`.
pub trait TargetProbe: Send + Sync {
    fn exists(&self, target: &str) -> bool;
}

/// Probe that issues a HEAD request and falls back to GET when HEAD reports
/// an error status (some servers reject HEAD).
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self> {
        let client = Self::client_builder(config)
            .build()
            .context("build http client")?;
        Ok(Self::from_client(client))
    }

    /// Client settings used by [`HttpProbe::new`]: timeout, browser-like user
    /// agent, and redirect following.
    pub fn client_builder(config: &ProbeConfig) -> ClientBuilder {
        Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::limited(10))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl TargetProbe for HttpProbe {
    #[instrument(skip(self))]
    fn exists(&self, target: &str) -> bool {
        let head = match self.client.head(target).send() {
            Ok(response) => response.status(),
            Err(err) => {
                debug!(err = %err, "head request failed");
                return false;
            }
        };
        if !head.is_client_error() && !head.is_server_error() {
            debug!(status = head.as_u16(), "head succeeded");
            return head.is_success();
        }

        match self.client.get(target).send() {
            Ok(response) => {
                let status = response.status();
                debug!(head = head.as_u16(), get = status.as_u16(), "get fallback");
                status.is_success()
            }
            Err(err) => {
                debug!(err = %err, "get request failed");
                false
            }
        }
    }
}
