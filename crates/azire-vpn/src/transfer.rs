//! Transfer Poller
//!
//! Periodically asks the tunnel service for its byte counters over the
//! service's control channel and posts the totals to the presentation
//! thread.
//!
//! # Query protocol
//!
//! ```text
//! client: get=1\n\n
//! server: key=value\n ... \n
//! ```
//!
//! `rx_bytes`/`tx_bytes` appear once per peer, so they are summed.

use crate::runner::RunFlag;
use crate::service::TunnelService;
use crate::ui::UiEvent;
use crossbeam_channel::Sender;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// Request for the current device state
pub const GET_REQUEST: &[u8] = b"get=1\n\n";

/// Byte counters summed over all peers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferTotals {
    pub rx: u64,
    pub tx: u64,
}

impl TransferTotals {
    pub fn is_zero(&self) -> bool {
        self.rx == 0 && self.tx == 0
    }
}

/// Run one query over an open control channel
pub async fn query_transfer<S>(stream: S) -> io::Result<TransferTotals>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    stream.get_mut().write_all(GET_REQUEST).await?;
    stream.get_mut().flush().await?;

    let mut totals = TransferTotals::default();
    let mut line = String::new();
    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("rx_bytes=") {
            totals.rx = totals.rx.saturating_add(parse_counter(v)?);
        } else if let Some(v) = line.strip_prefix("tx_bytes=") {
            totals.tx = totals.tx.saturating_add(parse_counter(v)?);
        }
    }
    Ok(totals)
}

fn parse_counter(value: &str) -> io::Result<u64> {
    value
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("bad counter {:?}", value)))
}

/// Background task publishing transfer totals
pub struct TransferPoller {
    service: Arc<dyn TunnelService>,
    config_path: PathBuf,
    interval: Duration,
    retry: Duration,
    ui_tx: Sender<UiEvent>,
}

impl TransferPoller {
    pub fn new(
        service: Arc<dyn TunnelService>,
        config_path: PathBuf,
        interval: Duration,
        retry: Duration,
        ui_tx: Sender<UiEvent>,
    ) -> Self {
        Self {
            service,
            config_path,
            interval,
            retry,
            ui_tx,
        }
    }

    /// Poll until `running` is lowered.
    ///
    /// A service that is not listening yet, or any error mid-query, just
    /// ends the cycle; the next one reconnects from scratch. When the
    /// service goes away after reporting traffic, zero totals are posted
    /// once so no stale counters linger.
    pub async fn run(self, mut running: RunFlag) {
        info!("Transfer poller started");
        let mut showing_traffic = false;

        while running.is_running() {
            let stream = match self.service.open_query(&self.config_path).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("Tunnel service not reachable: {}", e);
                    if showing_traffic {
                        showing_traffic = false;
                        if self.ui_tx.send(UiEvent::Transfer(TransferTotals::default())).is_err() {
                            break;
                        }
                    }
                    if !running.sleep(self.retry).await {
                        break;
                    }
                    continue;
                }
            };

            let result = tokio::select! {
                r = query_transfer(stream) => r,
                _ = running.stopped() => break,
            };

            match result {
                Ok(totals) => {
                    showing_traffic = !totals.is_zero();
                    if self.ui_tx.send(UiEvent::Transfer(totals)).is_err() {
                        debug!("Presentation thread gone");
                        break;
                    }
                }
                Err(e) => debug!("Transfer query failed: {}", e),
            }

            if !running.sleep(self.interval).await {
                break;
            }
        }

        info!("Transfer poller stopped");
    }
}
