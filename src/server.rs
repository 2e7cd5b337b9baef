//! UDP server for handling key-value requests.
//!
//! Every datagram is one request. Each one is handed to its own task, which
//! runs it through the protocol dispatcher and sends the reply (if any) back
//! to the sender.

use crate::config::Config;
use crate::protocol;
use crate::storage::Storage;
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

/// Server instance
pub struct Server {
    config: Config,
    storage: Arc<Storage>,
    /// Bound on requests being processed at once, if configured
    in_flight: Option<Arc<Semaphore>>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let in_flight = config
            .max_in_flight
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        Server {
            config,
            storage: Storage::new(),
            in_flight,
        }
    }

    /// Bind the UDP socket described by the configuration
    pub async fn bind(&self) -> io::Result<UdpSocket> {
        let listen = self.config.listen_addr();
        let addr = lookup_host(&listen).await?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address found for '{listen}'"),
            )
        })?;

        UdpSocket::from_std(create_udp_socket(addr)?)
    }

    /// Start the server and serve requests until Ctrl-C
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let socket = self.bind().await?;
        info!(address = %socket.local_addr()?, "Server listening");

        self.serve(socket, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl-C, shutting down");
        })
        .await
    }

    /// Receive datagrams on `socket` until `shutdown` completes
    pub async fn serve<F>(
        &self,
        socket: UdpSocket,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()>,
    {
        let socket = Arc::new(socket);
        let mut buffer = vec![0u8; self.config.max_datagram_size];

        // Start the expiration cleanup task
        let cleanup = (self.config.cleanup_interval > 0).then(|| {
            tokio::spawn(cleanup_task(
                Arc::clone(&self.storage),
                self.config.cleanup_interval,
            ))
        });

        tokio::pin!(shutdown);

        loop {
            let received = tokio::select! {
                result = socket.recv_from(&mut buffer) => result,
                _ = &mut shutdown => break,
            };

            let (n, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "Failed to receive datagram");
                    continue;
                }
            };

            // Wait for a processing slot when bounded
            let permit = match &self.in_flight {
                Some(limit) => Some(Arc::clone(limit).acquire_owned().await?),
                None => None,
            };

            let request = Bytes::copy_from_slice(&buffer[..n]);
            let socket = Arc::clone(&socket);
            let storage = Arc::clone(&self.storage);

            tokio::spawn(async move {
                handle_datagram(&socket, &storage, request, peer).await;
                drop(permit);
            });
        }

        if let Some(cleanup) = cleanup {
            cleanup.abort();
        }

        Ok(())
    }

    /// Get a reference to the storage for testing
    #[cfg(test)]
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }
}

/// Background task to clean up expired entries
async fn cleanup_task(storage: Arc<Storage>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        let count = storage.cleanup_expired();
        if count > 0 {
            let remaining = storage.stats().item_count;
            debug!(count, remaining, "Cleaned up expired entries");
        }
    }
}

/// Handle a single request datagram
async fn handle_datagram(socket: &UdpSocket, storage: &Storage, request: Bytes, peer: SocketAddr) {
    let request = String::from_utf8_lossy(&request);
    trace!(%peer, request = %request.trim_end(), "Received request");

    let Some(response) = protocol::dispatch(&request, storage) else {
        trace!(%peer, "Empty request, no response");
        return;
    };

    if let Err(e) = socket.send_to(response.as_bytes(), peer).await {
        debug!(%peer, error = %e, "Failed to send response");
    }
}

/// Create a non-blocking UDP socket bound to `addr`.
fn create_udp_socket(addr: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}
