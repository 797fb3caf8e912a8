//! One watch cycle: tail logs, resolve an endpoint, run the companion.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::WatchConfig;
use crate::error::{Error, Result};
use crate::kubernetes::{ClusterClient, PodLogTailer, ResourceSet};
use crate::project::ProjectMetadata;
use crate::resolver::{EndpointResolver, EndpointSource, ResolvedEndpoint};
use crate::supervisor::{OutputSink, ProcessSpec, ProcessSupervisor, SupervisionOutcome};

/// Summary of a completed watch cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOutcome {
    pub cycle: Uuid,
    pub url: String,
    pub source: EndpointSource,
    pub supervision: SupervisionOutcome,
}

/// Connects the remote dev tools client to a freshly deployed workload.
pub struct DevToolsWatcher<C, L> {
    resolver: EndpointResolver<C>,
    tailer: L,
    config: WatchConfig,
    project: ProjectMetadata,
    supervisor: ProcessSupervisor,
}

impl<C: ClusterClient, L: PodLogTailer> DevToolsWatcher<C, L> {
    pub fn new(
        client: Arc<C>,
        tailer: L,
        config: WatchConfig,
        project: ProjectMetadata,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            resolver: EndpointResolver::new(client),
            tailer,
            config,
            project,
            supervisor: ProcessSupervisor::new(sink),
        }
    }

    /// Whether the project carries the companion tooling.
    pub fn is_applicable(&self) -> bool {
        self.project.has_companion()
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn project(&self) -> &ProjectMetadata {
        &self.project
    }

    /// Resolves the endpoint without running the companion.
    pub async fn resolve(&self, resources: &ResourceSet) -> Result<ResolvedEndpoint> {
        self.resolver
            .resolve(resources, &self.config.resolution(), &self.project.properties)
            .await
    }

    /// Runs one watch cycle until the companion exits or `cancel` fires.
    ///
    /// Cancelling before the companion starts ends the cycle with
    /// [`Error::Cancelled`].
    ///
    /// Pod log tailing lasts as long as the cycle. A tunnel opened for the
    /// endpoint is closed once the companion is gone.
    pub async fn watch(
        &self,
        resources: &ResourceSet,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome> {
        let cycle = Uuid::new_v4();
        self.run_cycle(cycle, resources, cancel)
            .instrument(info_span!("watch", cycle = %cycle))
            .await
    }

    async fn run_cycle(
        &self,
        cycle: Uuid,
        resources: &ResourceSet,
        cancel: &CancellationToken,
    ) -> Result<WatchOutcome> {
        let tail_cancel = cancel.child_token();
        let _tail_guard = tail_cancel.clone().drop_guard();
        if let Err(e) = self.tailer.tail_app_pods(resources, tail_cancel).await {
            warn!(error = %e, "Failed to tail application pod logs");
        }

        let endpoint = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Watch cancelled while resolving the endpoint");
                return Err(Error::Cancelled);
            }
            endpoint = self.resolve(resources) => endpoint?,
        };
        info!(url = endpoint.url(), "Running remote dev tools against endpoint");

        let spec = ProcessSpec::build(&self.project, endpoint.url())?;
        let supervision = match self.supervisor.supervise(&spec, cancel).await {
            Ok(supervision) => supervision,
            Err(e) => {
                endpoint.close().await;
                return Err(e);
            }
        };

        let outcome = WatchOutcome {
            cycle,
            url: endpoint.url().to_string(),
            source: endpoint.source().clone(),
            supervision,
        };
        endpoint.close().await;
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::kubernetes::fake::FakeCluster;
    use crate::kubernetes::{KubectlError, ResourceDescriptor};
    use crate::project::{ApplicationProperties, CompanionLaunch, DEV_TOOLS_REMOTE_SECRET};
    use crate::supervisor::{CollectingSink, ProcessState};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingTailer {
        calls: AtomicU32,
        fail: bool,
    }

    impl PodLogTailer for CountingTailer {
        async fn tail_app_pods(
            &self,
            _resources: &ResourceSet,
            _cancel: CancellationToken,
        ) -> crate::kubernetes::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(KubectlError::KubectlNotFound);
            }
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("devtools.jar"), b"").unwrap();
            Self { dir }
        }

        /// Project whose launcher is a shell script standing in for `java`.
        /// The script sees `-cp <classpath> -D<secret> <main> <url>`.
        fn project(&self, script: &str, secret: Option<&str>) -> ProjectMetadata {
            use std::os::unix::fs::PermissionsExt;

            let launcher = self.dir.path().join("launcher.sh");
            std::fs::write(&launcher, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();

            let properties = match secret {
                Some(secret) => ApplicationProperties::from_pairs([(DEV_TOOLS_REMOTE_SECRET, secret)]),
                None => ApplicationProperties::default(),
            };
            ProjectMetadata {
                properties,
                companion: CompanionLaunch {
                    java: launcher,
                    companion_jar: Some(self.dir.path().join("devtools.jar")),
                    ..Default::default()
                },
            }
        }
    }

    fn exposed(url_fetch: u32) -> (Arc<FakeCluster>, ResourceSet) {
        let cluster = Arc::new(FakeCluster::new().with_annotation_on_fetch(
            "demo",
            "fabric8.io/exposeUrl",
            "http://demo.example.com",
            url_fetch,
        ));
        let resources = vec![ResourceDescriptor::new("Service", "demo").with_label("expose", "true")]
            .into_iter()
            .collect();
        (cluster, resources)
    }

    #[tokio::test]
    async fn test_is_applicable_requires_companion() {
        let fixture = Fixture::new();
        let (cluster, _) = exposed(1);
        let mut project = fixture.project("true", Some("s3cr3t"));

        let watcher = DevToolsWatcher::new(
            Arc::clone(&cluster),
            CountingTailer::default(),
            WatchConfig::default(),
            project.clone(),
            Arc::new(CollectingSink::new()),
        );
        assert!(watcher.is_applicable());

        project.companion.companion_jar = None;
        let watcher = DevToolsWatcher::new(
            cluster,
            CountingTailer::default(),
            WatchConfig::default(),
            project,
            Arc::new(CollectingSink::new()),
        );
        assert!(!watcher.is_applicable());
    }

    #[tokio::test]
    async fn test_watch_runs_companion_against_exposed_url() {
        let fixture = Fixture::new();
        let (cluster, resources) = exposed(1);
        let sink = CollectingSink::new();
        let watcher = DevToolsWatcher::new(
            cluster,
            CountingTailer::default(),
            WatchConfig::default(),
            fixture.project("echo \"connected $5 with $3\"", Some("s3cr3t")),
            Arc::new(sink.clone()),
        );

        let outcome = watcher
            .watch(&resources, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.url, "http://demo.example.com");
        assert_eq!(
            outcome.source,
            EndpointSource::ServiceExpose {
                service: "demo".to_string()
            }
        );
        assert_eq!(outcome.supervision.state, ProcessState::Exited);
        assert!(outcome.supervision.success());
        assert!(sink.contains(
            "connected http://demo.example.com with -Dspring.devtools.remote.secret=s3cr3t"
        ));
        assert_eq!(watcher.tailer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_secret_aborts_before_spawn() {
        let fixture = Fixture::new();
        let (cluster, resources) = exposed(1);
        let watcher = DevToolsWatcher::new(
            cluster,
            CountingTailer::default(),
            WatchConfig::default(),
            fixture.project("true", None),
            Arc::new(CollectingSink::new()),
        );

        let err = watcher
            .watch(&resources, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_tail_failure_is_not_fatal_but_missing_endpoint_is() {
        let fixture = Fixture::new();
        let cluster = Arc::new(FakeCluster::new());
        let resources: ResourceSet = vec![ResourceDescriptor::new("ConfigMap", "settings")]
            .into_iter()
            .collect();
        let watcher = DevToolsWatcher::new(
            cluster,
            CountingTailer {
                fail: true,
                ..Default::default()
            },
            WatchConfig::default(),
            fixture.project("true", Some("s3cr3t")),
            Arc::new(CollectingSink::new()),
        );

        let err = watcher
            .watch(&resources, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoEndpoint));
        assert_eq!(watcher.tailer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_spawns_nothing() {
        let fixture = Fixture::new();
        let marker = fixture.dir.path().join("spawned");
        let (cluster, resources) = exposed(1);
        let watcher = DevToolsWatcher::new(
            Arc::clone(&cluster),
            CountingTailer::default(),
            WatchConfig::default(),
            fixture.project(&format!("touch {}", marker.display()), Some("s3cr3t")),
            Arc::new(CollectingSink::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = watcher.watch(&resources, &cancel).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(cluster.fetches("demo"), 0);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!marker.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_service_polling() {
        let fixture = Fixture::new();
        let marker = fixture.dir.path().join("spawned");
        let (cluster, resources) = exposed(u32::MAX);
        let config = WatchConfig {
            service_url_wait_time_seconds: 30,
            ..Default::default()
        };
        let watcher = DevToolsWatcher::new(
            Arc::clone(&cluster),
            CountingTailer::default(),
            config,
            fixture.project(&format!("touch {}", marker.display()), Some("s3cr3t")),
            Arc::new(CollectingSink::new()),
        );

        let cancel = CancellationToken::new();
        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
                cancel.cancel();
            })
        };

        let start = tokio::time::Instant::now();
        let err = watcher.watch(&resources, &cancel).await.unwrap_err();
        trigger.await.unwrap();

        assert!(matches!(err, Error::Cancelled));
        assert!(start.elapsed() < std::time::Duration::from_secs(3));
        assert_eq!(cluster.fetches("demo"), 3);
        assert!(!marker.exists());
    }
}
