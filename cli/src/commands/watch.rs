//! Watch command - resolve the endpoint and supervise the remote client.

use std::sync::Arc;

use anyhow::{bail, Result};
use devwatch_core::{ConfigStore, DevToolsWatcher, Error, KubectlLogTailer, TracingSink};

use super::TargetArgs;

pub async fn run(store: &ConfigStore, target: TargetArgs, json: bool) -> Result<()> {
    let mut config = store.load().await?;
    target.apply(&mut config);

    let kubectl = super::kubectl(&config)?;
    let resources = target.load_resources().await?;
    let project = target.project()?;
    let sink = Arc::new(TracingSink::new(config.output_prefix.clone()));

    let watcher = DevToolsWatcher::new(
        Arc::new(kubectl.clone()),
        KubectlLogTailer::new(kubectl),
        config,
        project,
        sink,
    );
    if !watcher.is_applicable() {
        bail!("No devtools artifact configured (--companion-jar), nothing to watch");
    }

    let cancel = super::cancel_on_ctrl_c();
    let outcome = match watcher.watch(&resources, &cancel).await {
        Ok(outcome) => outcome,
        Err(Error::Cancelled) => {
            eprintln!("Watch cancelled before remote dev tools started");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("Endpoint: {}", outcome.url);
    match outcome.supervision.warning() {
        Some(warning) => println!("{}", warning),
        None => println!("Remote dev tools exited cleanly"),
    }
    Ok(())
}
