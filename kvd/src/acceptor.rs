//! TCP accept loop plus the two background timers (snapshot flush, stats
//! dump) that run alongside it.
//!
//! Grounded in `blackhole::splunk_hec::SplunkHec::run`: a `tokio::select!`
//! over shutdown and `listener.accept()`, spawning one task per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kv_store::Store;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{error, info};

use crate::config::Config;
use crate::connection::{self, IdleTimeout};
use crate::signals::ShutdownWatch;

/// Errors that can prevent the acceptor from starting at all.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Bind `addr` and run the accept loop plus background timers until
/// `shutdown` fires. Every accepted connection is handed its own clone of
/// `store` and `shutdown`.
pub async fn run(
    addr: SocketAddr,
    store: Arc<Store>,
    config: &Config,
    mut shutdown: ShutdownWatch,
) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { addr, source })?;
    info!(%addr, "listening");

    let idle_timeout = IdleTimeout(Duration::from_secs(config.idle_timeout_secs));
    let mut snapshot_timer = interval(Duration::from_secs(config.snapshot_interval_secs));
    let mut stats_timer = interval(Duration::from_secs(config.stats_interval_secs));

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("shutdown signal received, no longer accepting connections");
                break;
            }

            _ = snapshot_timer.tick() => {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    match store.flush_if_dirty().await {
                        Ok(true) => info!("snapshot written"),
                        Ok(false) => {}
                        Err(e) => error!(error = %e, "snapshot flush failed"),
                    }
                });
            }

            _ = stats_timer.tick() => {
                let stats = store.get_stats();
                info!(
                    get_total = stats.get_total,
                    set_total = stats.set_total,
                    get_window = stats.get_window,
                    set_window = stats.set_window,
                    "stats"
                );
            }

            incoming = listener.accept() => {
                match incoming {
                    Ok((stream, peer)) => {
                        info!(%peer, "accepted connection");
                        let store = Arc::clone(&store);
                        let watch = shutdown.clone();
                        tokio::spawn(async move {
                            connection::handle(stream, peer, store, idle_timeout, watch).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        }
    }

    // Final flush so a clean shutdown never loses the tail of writes.
    match store.flush_if_dirty().await {
        Ok(_) => {}
        Err(e) => error!(error = %e, "final snapshot flush failed"),
    }

    Ok(())
}
