//! Startup connectivity diagnostic.
//!
//! Tells a network or cross-origin failure apart from an authentication
//! problem. The result is only logged; it never feeds into session state.

use std::fmt;

use reqwest::Client;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Health check endpoint, no credential required
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReport {
    Reachable,
    /// The server answered, but not with success
    Unhealthy(u16),
    /// No response at all: DNS, connection refused, timeout, blocked origin
    Unreachable(String),
}

impl ProbeReport {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeReport::Reachable)
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeReport::Reachable => write!(f, "API reachable"),
            ProbeReport::Unhealthy(status) => write!(f, "API answered with status {}", status),
            ProbeReport::Unreachable(reason) => write!(f, "API unreachable: {}", reason),
        }
    }
}

#[derive(Clone)]
pub struct ConnectivityProbe {
    client: Client,
    url: String,
}

impl ConnectivityProbe {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), HEALTH_PATH),
        }
    }

    pub async fn check(&self) -> ProbeReport {
        let report = match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => ProbeReport::Reachable,
            Ok(response) => ProbeReport::Unhealthy(response.status().as_u16()),
            Err(e) if e.is_timeout() => ProbeReport::Unreachable("request timed out".to_string()),
            Err(e) if e.is_connect() => ProbeReport::Unreachable(format!(
                "connection failed (network down or origin blocked): {}",
                e
            )),
            Err(e) => ProbeReport::Unreachable(e.to_string()),
        };

        match report {
            ProbeReport::Reachable => info!(url = %self.url, "Connectivity check passed"),
            ref other => warn!(url = %self.url, report = %other, "Connectivity check failed"),
        }
        report
    }

    /// Run the check in the background. The handle may be dropped.
    pub fn spawn(&self) -> JoinHandle<ProbeReport> {
        let probe = self.clone();
        tokio::spawn(async move { probe.check().await })
    }
}
