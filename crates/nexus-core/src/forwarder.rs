//! Notification relay.
//!
//! Drains a hub subscription and POSTs batches to an external relay
//! (`{relay_url}/notifications`) with bounded retry. Delivery stays
//! best-effort: a batch that exhausts its retries is dropped and counted.

use crate::notify::{Notification, Subscription};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RELAY_URL: &str = "http://localhost:3001";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    pub relay_url: String,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            batch_size: 100,
            flush_interval_ms: 1000,
            max_retries: 3,
            retry_base_delay_ms: 100,
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct NotificationBatch<'a> {
    notifications: &'a [Notification],
}

#[derive(Debug, Default)]
pub struct ForwarderStats {
    pub sent: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub batches: AtomicU64,
}

pub struct NotificationForwarder {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    stats: Arc<ForwarderStats>,
}

impl NotificationForwarder {
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        subscription: Subscription,
        config: ForwarderConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(4)
            .build()?;
        let (stop, stop_rx) = watch::channel(false);
        let stats = Arc::new(ForwarderStats::default());
        let worker_stats = stats.clone();

        let handle = tokio::spawn(async move {
            Self::worker(client, subscription, config, stop_rx, worker_stats).await;
        });

        Ok(Self {
            stop,
            handle,
            stats,
        })
    }

    pub fn stats(&self) -> &ForwarderStats {
        &self.stats
    }

    /// Flushes what is buffered and waits for the worker to exit.
    pub async fn shutdown(self) -> Arc<ForwarderStats> {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Notification forwarder task failed");
        }
        self.stats
    }

    async fn worker(
        client: reqwest::Client,
        mut subscription: Subscription,
        config: ForwarderConfig,
        mut stop: watch::Receiver<bool>,
        stats: Arc<ForwarderStats>,
    ) {
        let url = format!("{}/notifications", config.relay_url.trim_end_matches('/'));
        let batch_size = config.batch_size.max(1);
        let mut batch: Vec<Notification> = Vec::with_capacity(batch_size);
        let period = Duration::from_millis(config.flush_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);

        info!(url = %url, "Notification forwarder started");

        loop {
            tokio::select! {
                received = subscription.recv() => match received {
                    Some(notification) => {
                        batch.push(notification);
                        if batch.len() >= batch_size {
                            Self::flush_batch(&client, &url, &mut batch, &config, &stats).await;
                        }
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    if !batch.is_empty() {
                        Self::flush_batch(&client, &url, &mut batch, &config, &stats).await;
                    }
                }
                _ = stop.changed() => break,
            }
        }

        while let Some(notification) = subscription.try_recv() {
            batch.push(notification);
        }
        if !batch.is_empty() {
            Self::flush_batch(&client, &url, &mut batch, &config, &stats).await;
        }

        info!(
            lagged = subscription.lagged(),
            "Notification forwarder stopped"
        );
    }

    async fn flush_batch(
        client: &reqwest::Client,
        url: &str,
        batch: &mut Vec<Notification>,
        config: &ForwarderConfig,
        stats: &ForwarderStats,
    ) {
        let notifications = std::mem::take(batch);
        let count = notifications.len() as u64;
        let payload = NotificationBatch {
            notifications: &notifications,
        };

        for attempt in 0..=config.max_retries {
            match client.post(url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    stats.sent.fetch_add(count, Ordering::Relaxed);
                    stats.batches.fetch_add(1, Ordering::Relaxed);
                    debug!(count, "Forwarded notifications to relay");
                    return;
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    warn!(attempt, status = %response.status(), "Relay rate limited");
                }
                Ok(response) => {
                    warn!(attempt, status = %response.status(), "Relay returned error");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to reach relay");
                }
            }

            if attempt < config.max_retries {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                let delay = config.retry_base_delay_ms * (1 << attempt);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        stats.failed.fetch_add(count, Ordering::Relaxed);
        error!(count, "Dropped notifications after max retries");
    }
}
