//! TCP listener for worker connections
//!
//! Each accepted connection gets its own [`WorkerSession`] task. The
//! listener itself never touches station state.

use crate::session::WorkerSession;
use crate::station::GroundStation;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uplink_common::error::{Result, UplinkError};

/// Accepts worker connections on behalf of a [`GroundStation`]
pub struct CoordinatorServer {
    listener: TcpListener,
    station: Arc<GroundStation>,
}

impl CoordinatorServer {
    /// Bind to `addr` (e.g. `127.0.0.1:65265`, port 0 picks a free one)
    pub async fn bind(addr: &str, station: Arc<GroundStation>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| UplinkError::connection(format!("Failed to bind {}: {}", addr, e)))?;

        info!("Ground station listening on {}", listener.local_addr()?);
        Ok(Self { listener, station })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub async fn serve(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Per-connection accept errors (e.g. the peer reset
                    // before accept) do not stop the listener
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }

            debug!("Accepted connection from {}", peer);
            let session = WorkerSession::new(self.station.clone(), stream, peer);
            tokio::spawn(async move {
                match session.run().await {
                    Ok(()) => {}
                    Err(e) if e.is_session_fatal() => warn!("Session with {} ended: {}", peer, e),
                    Err(e) => error!("Session with {} failed: {}", peer, e),
                }
            });
        }
    }

    /// Accept connections until `shutdown` completes
    pub async fn serve_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.serve() => result,
            _ = shutdown => {
                info!("Ground station listener stopped");
                Ok(())
            }
        }
    }
}
