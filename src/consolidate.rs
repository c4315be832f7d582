use std::sync::Arc;

use dashmap::DashSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use surfacemap_catalog::{apply_probe_statuses, Consolidator};
use surfacemap_core::{
    AppConfig, ConsolidatedEndpoint, ConsolidationError, RawObservation, ScopeTarget, SourceScanner,
};
use surfacemap_prober::StatusProber;
use surfacemap_storage::{BruteforceSource, DiscoveredEndpointSource, ManualCaptureSource, Storage};

/// Scope targets with a consolidation in flight in this process.
#[derive(Clone, Default)]
pub struct ScopeRegistry {
    running: Arc<DashSet<String>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, scope_target_id: &str) -> Result<ScopeGuard, ConsolidationError> {
        if !self.running.insert(scope_target_id.to_string()) {
            return Err(ConsolidationError::AlreadyRunning(scope_target_id.to_string()));
        }
        Ok(ScopeGuard {
            running: self.running.clone(),
            scope_target_id: scope_target_id.to_string(),
        })
    }
}

/// Releases the scope target when the run ends, however it ends.
pub struct ScopeGuard {
    running: Arc<DashSet<String>>,
    scope_target_id: String,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.running.remove(&self.scope_target_id);
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub observations: usize,
    pub endpoints: usize,
    pub parameters: usize,
    pub probed: usize,
    pub unreachable: usize,
    pub skipped_sources: Vec<String>,
}

/// Run every scanner in order. A required scanner failing aborts the run;
/// optional ones are logged and skipped.
pub async fn collect_observations(
    target: &ScopeTarget,
    scanners: &[Box<dyn SourceScanner>],
    cancel: &CancellationToken,
) -> Result<(Vec<RawObservation>, Vec<String>), ConsolidationError> {
    let mut observations = Vec::new();
    let mut skipped = Vec::new();

    for scanner in scanners {
        let tag = scanner.tag();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(ConsolidationError::Cancelled),
            result = scanner.run(target) => result,
        };
        match result {
            Ok(batch) => {
                info!(source = %tag, count = batch.len(), "source collected");
                observations.extend(batch);
            }
            Err(e) if scanner.required() => {
                return Err(ConsolidationError::Scanner {
                    source_tag: tag.to_string(),
                    error: e,
                });
            }
            Err(e) => {
                warn!(source = %tag, error = %e, "optional source failed, skipping");
                skipped.push(tag.to_string());
            }
        }
    }
    Ok((observations, skipped))
}

/// Collect, merge and optionally probe. Nothing is persisted here.
pub async fn build_catalog(
    config: &AppConfig,
    target: &ScopeTarget,
    scanners: &[Box<dyn SourceScanner>],
    prober: Option<&StatusProber>,
    cancel: &CancellationToken,
) -> Result<(Vec<ConsolidatedEndpoint>, RunSummary), ConsolidationError> {
    let (observations, skipped_sources) = collect_observations(target, scanners, cancel).await?;
    let observation_count = observations.len();

    let mut endpoints = Consolidator::new(&config.consolidation).merge(target, observations);

    let mut summary = RunSummary {
        observations: observation_count,
        endpoints: endpoints.len(),
        parameters: endpoints.iter().map(|e| e.parameters.len()).sum(),
        skipped_sources,
        ..RunSummary::default()
    };

    if let Some(prober) = prober {
        let targets = endpoints
            .iter()
            .map(|e| (e.id.clone(), e.url.clone()))
            .collect();
        let report = prober.probe_all(targets, cancel).await?;
        apply_probe_statuses(&mut endpoints, &report.statuses);
        summary.probed = report.statuses.len();
        summary.unreachable = report.unreachable;
    }

    if cancel.is_cancelled() {
        return Err(ConsolidationError::Cancelled);
    }
    Ok((endpoints, summary))
}

/// Scanners backed by the datastore for one scope target: one per tool with
/// raw discovered endpoints, manual captures, then directory brute force.
pub async fn datastore_scanners(
    storage: &Storage,
    target: &ScopeTarget,
) -> Result<Vec<Box<dyn SourceScanner>>, ConsolidationError> {
    let tools = storage
        .list_discovered_tools(&target.id)
        .await
        .map_err(storage_error)?;

    let mut scanners: Vec<Box<dyn SourceScanner>> = tools
        .iter()
        .map(|tool| Box::new(DiscoveredEndpointSource::new(storage.clone(), tool)) as Box<dyn SourceScanner>)
        .collect();
    scanners.push(Box::new(ManualCaptureSource::new(storage.clone())));
    scanners.push(Box::new(BruteforceSource::new(storage.clone())));
    Ok(scanners)
}

/// One full consolidation of a stored scope target: collect, merge, probe,
/// then replace the persisted catalog in a single transaction.
pub async fn consolidate_scope(
    config: &AppConfig,
    storage: &Storage,
    registry: &ScopeRegistry,
    scope_target_id: &str,
    extra_scanners: Vec<Box<dyn SourceScanner>>,
    probe: bool,
    cancel: &CancellationToken,
) -> Result<RunSummary, ConsolidationError> {
    let _guard = registry.acquire(scope_target_id)?;

    let target = storage
        .load_scope_target(scope_target_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| ConsolidationError::Config(format!("unknown scope target {scope_target_id}")))?;
    info!(scope = %target.id, root_domain = %target.root_domain, "consolidation started");

    let mut scanners = datastore_scanners(storage, &target).await?;
    scanners.extend(extra_scanners);

    let prober = if probe {
        Some(StatusProber::new(&config.prober)?)
    } else {
        None
    };

    let (endpoints, summary) =
        build_catalog(config, &target, &scanners, prober.as_ref(), cancel).await?;

    if cancel.is_cancelled() {
        return Err(ConsolidationError::Cancelled);
    }
    storage
        .replace_catalog(&target.id, &endpoints)
        .await
        .map_err(storage_error)?;

    info!(
        scope = %target.id,
        observations = summary.observations,
        endpoints = summary.endpoints,
        parameters = summary.parameters,
        unreachable = summary.unreachable,
        "consolidation finished"
    );
    Ok(summary)
}

fn storage_error(e: anyhow::Error) -> ConsolidationError {
    ConsolidationError::Storage(format!("{e:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use surfacemap_core::{ScanError, SourceTag};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct StaticSource {
        tag: SourceTag,
        urls: Vec<String>,
        fail: bool,
        required: bool,
    }

    impl StaticSource {
        fn ok(tag: SourceTag, urls: Vec<&str>) -> Box<dyn SourceScanner> {
            let urls = urls.into_iter().map(str::to_string).collect();
            Box::new(Self { tag, urls, fail: false, required: true })
        }

        fn failing(tag: SourceTag, required: bool) -> Box<dyn SourceScanner> {
            Box::new(Self { tag, urls: Vec::new(), fail: true, required })
        }
    }

    #[async_trait]
    impl SourceScanner for StaticSource {
        fn tag(&self) -> SourceTag {
            self.tag.clone()
        }

        async fn run(&self, target: &ScopeTarget) -> Result<Vec<RawObservation>, ScanError> {
            if self.fail {
                return Err(ScanError::Query("connection reset".to_string()));
            }
            Ok(self
                .urls
                .iter()
                .map(|u| RawObservation::new(u, self.tag.clone()).direct(target.is_direct("example.com")))
                .collect())
        }

        fn required(&self) -> bool {
            self.required
        }
    }

    fn target() -> ScopeTarget {
        ScopeTarget::new("scope-1", "example.com")
    }

    #[test]
    fn test_registry_rejects_concurrent_run_and_releases() {
        let registry = ScopeRegistry::new();
        let guard = registry.acquire("scope-1").unwrap();
        assert!(matches!(
            registry.acquire("scope-1"),
            Err(ConsolidationError::AlreadyRunning(_))
        ));
        assert!(registry.acquire("scope-2").is_ok());

        drop(guard);
        assert!(registry.acquire("scope-1").is_ok());
    }

    #[tokio::test]
    async fn test_optional_source_failure_is_skipped() {
        let scanners = vec![
            StaticSource::ok(SourceTag::tool("katana"), vec!["https://example.com/a"]),
            StaticSource::failing(SourceTag::DirectoryBruteforce, false),
        ];
        let (endpoints, summary) = build_catalog(
            &AppConfig::default(),
            &target(),
            &scanners,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(summary.skipped_sources, vec!["ffuf".to_string()]);
    }

    #[tokio::test]
    async fn test_required_source_failure_aborts() {
        let scanners = vec![
            StaticSource::ok(SourceTag::tool("katana"), vec!["https://example.com/a"]),
            StaticSource::failing(SourceTag::ManualCapture, true),
        ];
        let result = build_catalog(
            &AppConfig::default(),
            &target(),
            &scanners,
            None,
            &CancellationToken::new(),
        )
        .await;
        match result {
            Err(ConsolidationError::Scanner { source_tag, .. }) => assert_eq!(source_tag, "manual_crawl"),
            other => panic!("expected scanner error, got {:?}", other.map(|(e, _)| e.len())),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_collecting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scanners = vec![StaticSource::ok(SourceTag::tool("gau"), vec!["https://example.com/a"])];
        let result = build_catalog(&AppConfig::default(), &target(), &scanners, None, &cancel).await;
        assert!(matches!(result, Err(ConsolidationError::Cancelled)));
    }

    async fn serve_ok() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_liveness_status_is_kept_apart_from_observed_codes() {
        let live = format!("http://{}/health", serve_ok().await);
        let mut config = AppConfig::default();
        config.prober.timeout_seconds = 2;
        let prober = StatusProber::new(&config.prober).unwrap();
        let scanners = vec![StaticSource::ok(
            SourceTag::tool("gau"),
            vec![live.as_str(), "http://127.0.0.1:1/gone"],
        )];

        let (endpoints, summary) = build_catalog(
            &config,
            &ScopeTarget::new("scope-1", "127.0.0.1"),
            &scanners,
            Some(&prober),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(summary.probed, 2);
        assert_eq!(summary.unreachable, 1);

        let gone = endpoints.iter().find(|e| e.path == "/gone").unwrap();
        assert_eq!(gone.probe_status, Some(0));
        assert!(gone.status_codes.is_empty());

        let health = endpoints.iter().find(|e| e.path == "/health").unwrap();
        assert_eq!(health.probe_status, Some(200));
        assert!(health.status_codes.is_empty());
    }
}
