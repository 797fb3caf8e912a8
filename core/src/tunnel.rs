//! Local-to-pod port tunnels.
//!
//! A tunnel is opened in the background: [`PortForwarder::open`] hands back
//! the local port immediately while pod selection and the forward itself run
//! on their own task. Callers treat the port as best-effort until the forward
//! has connected.
//!
//! The task keeps the tunnel up until it is closed: pods that are not there
//! yet are waited for, and a forward that ends (pod replaced, kubectl exited)
//! is re-established against a freshly selected pod.

use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::kubernetes::{ClusterClient, LabelSelector};

/// Delay before selecting pods again after a miss or a dropped forward.
pub const RESELECT_DELAY: Duration = Duration::from_secs(1);

/// What to forward to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub selector: LabelSelector,
    pub remote_port: u16,
}

/// A live (or still connecting) tunnel.
///
/// Dropping the handle stops the forward.
#[derive(Debug)]
pub struct TunnelHandle {
    local_port: u16,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TunnelHandle {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// True once the background task has stopped, i.e. after closing.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the forward and waits for its task.
    pub async fn close(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.task).await;
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens tunnels through a [`ClusterClient`].
pub struct PortForwarder<C> {
    client: Arc<C>,
}

impl<C: ClusterClient> PortForwarder<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Allocates a free local port and starts forwarding it to
    /// `request.remote_port` on the first pod matching `request.selector`.
    ///
    /// Must be called from within a tokio runtime. An empty selector is
    /// rejected before any port is allocated.
    pub fn open(&self, request: TunnelRequest) -> Result<TunnelHandle> {
        if request.selector.is_empty() {
            return Err(Error::NoSelector);
        }

        let local_port = free_local_port()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_forward(
            Arc::clone(&self.client),
            request,
            local_port,
            cancel.clone(),
        ));

        Ok(TunnelHandle {
            local_port,
            cancel,
            task,
        })
    }
}

async fn run_forward<C: ClusterClient>(
    client: Arc<C>,
    request: TunnelRequest,
    local_port: u16,
    cancel: CancellationToken,
) {
    let selector = &request.selector;
    let mut misses = 0u32;

    while !cancel.is_cancelled() {
        match client.select_pods(selector).await {
            Ok(pods) => match pods.first() {
                Some(pod) => {
                    misses = 0;
                    if pods.len() > 1 {
                        debug!(%selector, pods = ?&pods[1..], "ignoring additional matching pods");
                    }
                    info!(
                        pod = %pod,
                        local_port,
                        remote_port = request.remote_port,
                        "Forwarding local port to pod"
                    );
                    match client
                        .forward_port(pod, local_port, request.remote_port, cancel.clone())
                        .await
                    {
                        Ok(()) if cancel.is_cancelled() => break,
                        Ok(()) => warn!(pod = %pod, local_port, "Port forward ended, reconnecting"),
                        Err(e) => {
                            warn!(pod = %pod, local_port, error = %e, "Port forward failed, reconnecting")
                        }
                    }
                }
                None => {
                    if misses == 0 {
                        warn!(%selector, "No pod matches the selector yet, waiting");
                    }
                    misses += 1;
                }
            },
            Err(e) => {
                warn!(%selector, error = %e, "Failed to list application pods, retrying");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RESELECT_DELAY) => {}
        }
    }
    debug!(local_port, "port forward task stopped");
}

/// Asks the OS for a free port on the loopback interface.
///
/// The socket is released before returning, so the port is only very likely
/// to still be free when the forward binds it.
pub fn free_local_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
