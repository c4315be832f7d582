pub mod rate_limit;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

use surfacemap_core::config::ProberConfig;
use surfacemap_core::ConsolidationError;

pub use rate_limit::HostRateLimiter;

/// Probe outcome per endpoint id. A status of 0 means unreachable.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub statuses: BTreeMap<String, u16>,
    pub unreachable: usize,
}

/// One liveness request per endpoint: `HEAD`, falling back to `GET` when the
/// server rejects the method. Redirects are reported, never followed.
#[derive(Clone)]
pub struct StatusProber {
    client: reqwest::Client,
    limiter: Arc<HostRateLimiter>,
    workers: usize,
}

impl StatusProber {
    pub fn new(config: &ProberConfig) -> Result<Self, ConsolidationError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| ConsolidationError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            limiter: Arc::new(HostRateLimiter::new(config.requests_per_second)),
            workers: config.workers.max(1),
        })
    }

    pub async fn probe(&self, url: &str) -> u16 {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        match self.send(Method::HEAD, url, &host).await {
            Some(StatusCode::METHOD_NOT_ALLOWED) | Some(StatusCode::NOT_IMPLEMENTED) => {
                debug!(url, "HEAD rejected, retrying with GET");
                self.send(Method::GET, url, &host)
                    .await
                    .map(|s| s.as_u16())
                    .unwrap_or(0)
            }
            Some(status) => status.as_u16(),
            None => 0,
        }
    }

    /// Every request, fallback included, takes its own rate-limit slot.
    async fn send(&self, method: Method, url: &str, host: &str) -> Option<StatusCode> {
        self.limiter.acquire(host).await;
        match self.client.request(method.clone(), url).send().await {
            Ok(resp) => Some(resp.status()),
            Err(e) => {
                debug!(url, %method, error = %e, "probe failed");
                None
            }
        }
    }

    /// Probe `(endpoint id, url)` pairs on the worker pool.
    ///
    /// Returns `Cancelled` if the token fires before every probe finished;
    /// partial results are discarded in that case.
    pub async fn probe_all(
        &self,
        targets: Vec<(String, String)>,
        cancel: &CancellationToken,
    ) -> Result<ProbeReport, ConsolidationError> {
        let total = targets.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(total);

        for (id, url) in targets {
            let semaphore = semaphore.clone();
            let prober = self.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    status = prober.probe(&url) => Some((id, status)),
                }
            }));
        }

        let mut report = ProbeReport::default();
        for handle in handles {
            match handle.await {
                Ok(Some((id, status))) => {
                    if status == 0 {
                        report.unreachable += 1;
                    }
                    report.statuses.insert(id, status);
                }
                Ok(None) => {}
                Err(e) => error!("probe task failed: {}", e),
            }
        }

        if cancel.is_cancelled() {
            info!(probed = report.statuses.len(), total, "probing cancelled");
            return Err(ConsolidationError::Cancelled);
        }

        info!(
            probed = report.statuses.len(),
            unreachable = report.unreachable,
            "status probing finished"
        );
        Ok(report)
    }
}
