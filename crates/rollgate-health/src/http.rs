//! HTTP health checks.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use rollgate_core::Target;

use crate::prober::{CheckKind, ProbeError, Prober};

/// Perform one HTTP GET against `authority` (`host:port`) and `path`.
///
/// Returns `Ok` for a 2xx answer, [`ProbeError::Unhealthy`] for any other
/// status, [`ProbeError::Unreachable`] when the connection cannot be set up,
/// and [`ProbeError::Timeout`] when no answer arrives within `timeout`.
pub async fn http_probe(authority: &str, path: &str, timeout: Duration) -> Result<(), ProbeError> {
    let uri = format!("http://{authority}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(authority)
            .await
            .map_err(|e| {
                debug!(error = %e, %uri, "health probe connection failed");
                ProbeError::Unreachable(format!("{uri}: {e}"))
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| {
                debug!(error = %e, %uri, "health probe handshake failed");
                ProbeError::Unreachable(format!("{uri}: handshake failed: {e}"))
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", authority)
            .header("user-agent", "rollgate-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| ProbeError::Unhealthy(format!("{uri}: invalid request: {e}")))?;

        let resp = sender.send_request(req).await.map_err(|e| {
            debug!(error = %e, %uri, "health probe request failed");
            ProbeError::Unreachable(format!("{uri}: request failed: {e}"))
        })?;

        if resp.status().is_success() {
            Ok::<(), ProbeError>(())
        } else {
            debug!(status = %resp.status(), %uri, "health probe non-2xx");
            Err(ProbeError::Unhealthy(format!("{uri} returned {}", resp.status())))
        }
    })
    .await;

    match result {
        Ok(probe) => probe,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            Err(ProbeError::Timeout(timeout))
        }
    }
}

/// [`Prober`] over plain HTTP.
///
/// Liveness checks hit the target's health endpoint; route checks hit its
/// route endpoint, falling back to the health endpoint.
#[derive(Debug, Clone)]
pub struct HttpProber {
    timeout: Duration,
}

impl HttpProber {
    /// `timeout` caps a single request; the probe loop applies its own
    /// per-attempt timeout on top.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The path this prober would request for `kind`, if any.
    pub fn path_for<'a>(target: &'a Target, kind: CheckKind) -> Option<&'a str> {
        match kind {
            CheckKind::Liveness => target.health_endpoint.as_deref(),
            CheckKind::Route => target
                .route_endpoint
                .as_deref()
                .or(target.health_endpoint.as_deref()),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn check(&self, target: &Target, kind: CheckKind) -> Result<(), ProbeError> {
        let path = Self::path_for(target, kind)
            .ok_or_else(|| ProbeError::NotProbeable(target.name.clone()))?;
        http_probe(&target.authority(), path, self.timeout).await
    }
}
