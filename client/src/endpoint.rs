//! Liveness checks for the endpoints a deployment is expected to expose.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    Health,
    Ui,
    Docs,
    ConvertSource,
    ConvertUpload,
}

impl Endpoint {
    pub const ALL: [Endpoint; 5] = [
        Endpoint::Health,
        Endpoint::Ui,
        Endpoint::Docs,
        Endpoint::ConvertSource,
        Endpoint::ConvertUpload,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Health => "/health",
            Endpoint::Ui => "/ui",
            Endpoint::Docs => "/docs",
            Endpoint::ConvertSource => "/v1/convert/source",
            Endpoint::ConvertUpload => "/v1/convert/upload",
        }
    }

    /// Whether `status` means the endpoint is up.
    ///
    /// `/health` must answer 2xx. The conversion routes only accept POST, so
    /// any answer other than 404 or a server error counts as present.
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            Endpoint::Health => (200..300).contains(&status),
            _ => status != 404 && status < 500,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub endpoint: Endpoint,
    pub status_code: Option<u16>,
    pub reachable: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl EndpointStatus {
    pub fn from_status(endpoint: Endpoint, status: u16, latency: Duration) -> Self {
        Self {
            endpoint,
            status_code: Some(status),
            reachable: endpoint.accepts(status),
            latency,
            error: None,
        }
    }

    pub fn unreachable(endpoint: Endpoint, error: impl Into<String>, latency: Duration) -> Self {
        Self {
            endpoint,
            status_code: None,
            reachable: false,
            latency,
            error: Some(error.into()),
        }
    }
}

/// Summary over a set of endpoint checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointReport {
    pub statuses: Vec<EndpointStatus>,
}

impl EndpointReport {
    pub fn healthy(&self) -> bool {
        self.statuses
            .iter()
            .any(|s| s.endpoint == Endpoint::Health && s.reachable)
    }

    pub fn failed(&self) -> impl Iterator<Item = &EndpointStatus> {
        self.statuses.iter().filter(|s| !s.reachable)
    }

    pub fn reachable_count(&self) -> usize {
        self.statuses.iter().filter(|s| s.reachable).count()
    }
}
