//! Resolve command - print the endpoint the remote client would use.

use std::sync::Arc;

use anyhow::Result;
use devwatch_core::{ConfigStore, DevToolsWatcher, KubectlLogTailer, TracingSink};

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
    let cancel = super::cancel_on_ctrl_c();
    let endpoint = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        endpoint = watcher.resolve(&resources) => endpoint?,
    };

    if json {
        let value = serde_json::json!({
            "url": endpoint.url(),
            "source": endpoint.source(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", endpoint.url());
    }

    if endpoint.tunnel().is_some() {
        eprintln!("Port forward active, press Ctrl-C to stop");
        cancel.cancelled().await;
    }
    endpoint.close().await;
    Ok(())
}
