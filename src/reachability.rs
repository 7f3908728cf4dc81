//! Online/offline detection by periodically opening a TCP connection to the
//! service host.

use crate::session::ControllerHandle;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PROBE_HOST: &str = "generativelanguage.googleapis.com:443";

#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    address: String,
    interval: Duration,
    timeout: Duration,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_HOST, Duration::from_secs(5), Duration::from_secs(3))
    }
}

impl NetworkMonitor {
    pub fn new(address: &str, interval: Duration, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            interval,
            timeout,
        }
    }

    /// One reachability check
    pub async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                log::debug!("Network: Probe to {} failed: {}", self.address, e);
                false
            }
            Err(_) => {
                log::debug!("Network: Probe to {} timed out", self.address);
                false
            }
        }
    }

    /// Probe until cancelled, reporting each change to the controller.
    /// The first result is always reported.
    pub async fn run(self, controller: ControllerHandle, token: CancellationToken) {
        let mut last: Option<bool> = None;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let online = tokio::select! {
                _ = token.cancelled() => break,
                online = self.probe() => online,
            };

            if last != Some(online) {
                if online {
                    log::info!("🌐 Network: {} reachable", self.address);
                } else {
                    log::warn!("🌐 Network: {} unreachable", self.address);
                }
                controller.set_online(online);
                last = Some(online);
            }
        }
        log::debug!("Network: Monitor stopped");
    }
}
