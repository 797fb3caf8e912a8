//! Config command - show or change the stored configuration.

use anyhow::Result;
use devwatch_core::ConfigStore;

pub async fn show(store: &ConfigStore, json: bool) -> Result<()> {
    let config = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration ({})", store.config_path().display());
    println!("{}", "-".repeat(60));
    println!(
        "Service URL wait:        {}s",
        config.service_url_wait_time_seconds
    );
    println!(
        "Later service attempts:  {}",
        config.subsequent_service_wait_attempts
    );
    println!(
        "Expose label:            {}={}",
        config.expose_label_key, config.expose_label_value
    );
    println!("Expose annotation:       {}", config.expose_annotation_key);
    println!(
        "Namespace:               {}",
        config.namespace.as_deref().unwrap_or("(current context)")
    );
    println!(
        "kubectl:                 {}",
        config
            .kubectl_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(auto-detect)".to_string())
    );
    println!("Output prefix:           {}", config.output_prefix);
    Ok(())
}

pub async fn set_wait(store: &ConfigStore, seconds: u32) -> Result<()> {
    store.set_service_wait(seconds).await?;
    println!("Service URL wait set to {}s", seconds);
    Ok(())
}
