//! Subcommand implementations.

pub mod config;
pub mod resolve;
pub mod watch;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use devwatch_core::{
    CompanionLaunch, ConfigStore, Kubectl, ProjectMetadata, ResourceSet, WatchConfig,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What was deployed and how to reach it.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Deployed manifests as JSON (a List, an array or one object); `-` for stdin
    #[arg(long, short = 'r')]
    resources: PathBuf,

    /// Project directory containing src/main/resources/application.properties
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Classpath entry for the remote client (repeatable)
    #[arg(long = "classpath", value_name = "PATH")]
    classpath: Vec<PathBuf>,

    /// The spring-boot-devtools artifact
    #[arg(long, value_name = "JAR")]
    companion_jar: Option<PathBuf>,

    /// Remote secret when application.properties does not define one
    #[arg(long, env = "DEVWATCH_REMOTE_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Spring Boot version, selects version-specific property names
    #[arg(long)]
    spring_boot_version: Option<String>,

    /// Java launcher
    #[arg(long, default_value = "java")]
    java: PathBuf,

    /// Namespace to look the resources up in
    #[arg(long, short = 'n')]
    namespace: Option<String>,

    /// Seconds to wait for the first exposed service URL
    #[arg(long)]
    wait: Option<u32>,
}

impl TargetArgs {
    pub async fn load_resources(&self) -> Result<ResourceSet> {
        let json = if self.resources.as_os_str() == "-" {
            let mut buf = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut buf).await?;
            buf
        } else {
            tokio::fs::read_to_string(&self.resources)
                .await
                .with_context(|| format!("Failed to read {}", self.resources.display()))?
        };

        let resources = ResourceSet::from_json(&json).context("Invalid resources JSON")?;
        info!(count = resources.len(), "Loaded deployed resources");
        Ok(resources)
    }

    pub fn project(&self) -> Result<ProjectMetadata> {
        let companion = CompanionLaunch {
            java: self.java.clone(),
            classpath: self.classpath.clone(),
            companion_jar: self.companion_jar.clone(),
            fallback_secret: self.secret.clone(),
            ..Default::default()
        };
        Ok(ProjectMetadata::load(
            &self.project_dir,
            self.spring_boot_version.as_deref(),
            companion,
        )?)
    }

    /// Applies command-line overrides on top of the stored configuration.
    pub fn apply(&self, config: &mut WatchConfig) {
        if let Some(namespace) = &self.namespace {
            config.namespace = Some(namespace.clone());
        }
        if let Some(wait) = self.wait {
            config.service_url_wait_time_seconds = wait;
        }
    }
}

pub fn config_store(path: Option<PathBuf>) -> Result<ConfigStore> {
    Ok(match path {
        Some(path) => ConfigStore::with_path(path),
        None => ConfigStore::new()?,
    })
}

pub fn kubectl(config: &WatchConfig) -> Result<Kubectl> {
    let kubectl = match &config.kubectl_path {
        Some(path) => Kubectl::with_path(Some(path.clone()), config.namespace.clone()),
        None => Kubectl::new(config.namespace.clone()),
    };
    if !kubectl.is_kubectl_available() {
        bail!("kubectl not found. Install kubectl or set kubectlPath in the configuration.");
    }
    Ok(kubectl)
}

/// Token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            token.cancel();
        }
    });
    cancel
}
