//! Endpoint resolution: exposed service URL first, port forward second.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EndpointResolutionConfig;
use crate::error::{Error, Result};
use crate::kubernetes::{ClusterClient, ResourceSet, ServiceRecord};
use crate::project::ApplicationProperties;
use crate::retry::{poll, PollStep};
use crate::tunnel::{PortForwarder, TunnelHandle, TunnelRequest};

/// Where a resolved endpoint came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EndpointSource {
    /// URL published on a service by an exposure controller.
    ServiceExpose { service: String },
    /// Local port forwarded to an application pod.
    #[serde(rename_all = "camelCase")]
    PortForward { local_port: u16 },
}

/// A URL the companion process can connect to.
///
/// Holds the tunnel, if any, so the forward lives as long as the endpoint.
#[derive(Debug)]
pub struct ResolvedEndpoint {
    url: String,
    source: EndpointSource,
    tunnel: Option<TunnelHandle>,
}

impl ResolvedEndpoint {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn source(&self) -> &EndpointSource {
        &self.source
    }

    pub fn tunnel(&self) -> Option<&TunnelHandle> {
        self.tunnel.as_ref()
    }

    /// Closes the tunnel, if any, and waits for it to stop.
    pub async fn close(self) {
        if let Some(tunnel) = self.tunnel {
            tunnel.close().await;
        }
    }
}

/// Finds an endpoint for the deployed workload.
pub struct EndpointResolver<C> {
    client: Arc<C>,
    forwarder: PortForwarder<C>,
}

impl<C: ClusterClient> EndpointResolver<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            forwarder: PortForwarder::new(Arc::clone(&client)),
            client,
        }
    }

    /// Resolves an endpoint, trying exposed services before a port forward.
    ///
    /// Fails with [`Error::NoEndpoint`] when neither strategy produces a URL.
    pub async fn resolve(
        &self,
        resources: &ResourceSet,
        config: &EndpointResolutionConfig,
        app: &ApplicationProperties,
    ) -> Result<ResolvedEndpoint> {
        if let Some(endpoint) = self.service_expose_url(resources, config).await {
            return Ok(endpoint);
        }

        match self.port_forward_url(resources, app) {
            Ok(endpoint) => Ok(endpoint),
            Err(Error::NoSelector) => {
                warn!("Unable to determine a selector for application pods");
                Err(Error::NoEndpoint)
            }
            Err(e) => Err(e),
        }
    }

    /// Polls each service for an exposed URL.
    ///
    /// Only the first service gets the full wait; exposure controllers
    /// converge cluster-wide, so later services get
    /// `subsequent_service_wait_attempts` polls.
    pub async fn service_expose_url(
        &self,
        resources: &ResourceSet,
        config: &EndpointResolutionConfig,
    ) -> Option<ResolvedEndpoint> {
        let mut budget = config.service_wait_seconds;

        for service in resources.services() {
            let outcome = poll(budget, config.poll_interval, |attempt| {
                self.poll_service(service, config, attempt)
            })
            .await;
            budget = config.subsequent_service_wait_attempts;

            match outcome.value {
                Some(url) if url.starts_with("http") => {
                    info!(
                        service = service.name(),
                        attempts = outcome.attempts,
                        url = %url,
                        "Found exposed service URL"
                    );
                    return Some(ResolvedEndpoint {
                        url,
                        source: EndpointSource::ServiceExpose {
                            service: service.name().to_string(),
                        },
                        tunnel: None,
                    });
                }
                Some(url) => {
                    debug!(service = service.name(), url = %url, "ignoring non-http exposed URL");
                }
                None => {}
            }
        }

        info!("No exposed service found for connecting the dev tools");
        None
    }

    async fn poll_service(
        &self,
        service: ServiceRecord<'_>,
        config: &EndpointResolutionConfig,
        attempt: u32,
    ) -> PollStep<String> {
        let url = match self.client.service_annotations(service.name()).await {
            Ok(Some(annotations)) => annotations
                .get(&config.expose_annotation_key)
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            Ok(None) => None,
            Err(e) => {
                warn!(service = service.name(), attempt, error = %e, "Failed to read service");
                None
            }
        };

        if let Some(url) = url {
            return PollStep::Ready(url);
        }
        if !service.is_marked_for_exposure(&config.expose_label_key, &config.expose_label_value) {
            return PollStep::Abandon(None);
        }

        debug!(service = service.name(), attempt, "waiting for exposed service URL");
        PollStep::Pending(None)
    }

    /// Opens a port forward to the application pods and builds its URL.
    pub fn port_forward_url(
        &self,
        resources: &ResourceSet,
        app: &ApplicationProperties,
    ) -> Result<ResolvedEndpoint> {
        let selector = resources.pod_selector().ok_or(Error::NoSelector)?;
        let remote_port = app.server_port()?;

        let tunnel = self.forwarder.open(TunnelRequest {
            selector,
            remote_port,
        })?;
        let local_port = tunnel.local_port();
        let url = forward_url(app, local_port);
        info!(url = %url, remote_port, "Using port forward for the dev tools");

        Ok(ResolvedEndpoint {
            url,
            source: EndpointSource::PortForward { local_port },
            tunnel: Some(tunnel),
        })
    }
}

/// `scheme://localhost:<port><contextPath>`, https when a keystore is set.
pub fn forward_url(app: &ApplicationProperties, local_port: u16) -> String {
    let scheme = if app.has_keystore() { "https" } else { "http" };
    format!("{}://localhost:{}{}", scheme, local_port, app.context_path())
}
