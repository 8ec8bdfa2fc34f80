//! Notification fan-out.
//!
//! Best-effort broadcast to whoever is subscribed right now: no persistence,
//! no acknowledgement, late subscribers only see later messages. Emission
//! returns a [`Delivery`] or a [`NotifyError`]; callers decide whether to care.

use crate::error::NotifyError;
use crate::records::{Alert, Hotspot, Recommendation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

const NUM_CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Hotspots,
    Alerts,
    Recommendations,
    Emissions,
}

impl Channel {
    pub const ALL: [Channel; NUM_CHANNELS] = [
        Channel::Hotspots,
        Channel::Alerts,
        Channel::Recommendations,
        Channel::Emissions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hotspots => "hotspots",
            Self::Alerts => "alerts",
            Self::Recommendations => "recommendations",
            Self::Emissions => "emissions",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: Channel,
    pub event: String,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

/// How many subscribers were listening on the channel at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub subscribers: usize,
}

/// Notification transport seam.
pub trait NotificationSink: Send + Sync {
    fn emit(
        &self,
        channel: Channel,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<Delivery, NotifyError>;
}

pub fn emit_json<T: Serialize>(
    sink: &dyn NotificationSink,
    channel: Channel,
    event: &str,
    value: &T,
) -> Result<Delivery, NotifyError> {
    let payload = serde_json::to_value(value).map_err(|e| NotifyError::Encode(e.to_string()))?;
    sink.emit(channel, event, payload)
}

/// Emits `hotspot` and `new_hotspot`; both always go out.
pub fn emit_hotspot(
    sink: &dyn NotificationSink,
    hotspot: &Hotspot,
) -> Result<Delivery, NotifyError> {
    let legacy = emit_json(sink, Channel::Hotspots, "hotspot", hotspot);
    let current = emit_json(sink, Channel::Hotspots, "new_hotspot", hotspot);
    legacy.and(current)
}

/// Emits `alert` and `new_alert`; both always go out.
pub fn emit_alert(sink: &dyn NotificationSink, alert: &Alert) -> Result<Delivery, NotifyError> {
    let legacy = emit_json(sink, Channel::Alerts, "alert", alert);
    let current = emit_json(sink, Channel::Alerts, "new_alert", alert);
    legacy.and(current)
}

pub fn emit_recommendation(
    sink: &dyn NotificationSink,
    recommendation: &Recommendation,
) -> Result<Delivery, NotifyError> {
    emit_json(
        sink,
        Channel::Recommendations,
        "recommendation",
        recommendation,
    )
}

#[derive(Debug, Default)]
struct HubCounters {
    subscribers: [AtomicUsize; NUM_CHANNELS],
    emitted: AtomicU64,
    undelivered: AtomicU64,
}

/// Serializable hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub emitted: u64,
    pub undelivered: u64,
    pub subscribers: Vec<(Channel, usize)>,
}

/// In-process broadcast hub over a single tokio broadcast channel.
/// Subscriptions filter by channel and keep per-channel subscriber counts.
pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
    counters: Arc<HubCounters>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            counters: Arc::new(HubCounters::default()),
        }
    }

    pub fn subscribe(&self, channels: &[Channel]) -> Subscription {
        let mut wanted = [false; NUM_CHANNELS];
        for channel in channels {
            wanted[channel.index()] = true;
        }
        for (i, w) in wanted.iter().enumerate() {
            if *w {
                self.counters.subscribers[i].fetch_add(1, Ordering::Relaxed);
            }
        }

        Subscription {
            rx: self.tx.subscribe(),
            wanted,
            counters: self.counters.clone(),
            lagged: 0,
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&Channel::ALL)
    }

    pub fn subscribers(&self, channel: Channel) -> usize {
        self.counters.subscribers[channel.index()].load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            undelivered: self.counters.undelivered.load(Ordering::Relaxed),
            subscribers: Channel::ALL
                .iter()
                .map(|c| (*c, self.subscribers(*c)))
                .collect(),
        }
    }
}

impl NotificationSink for NotificationHub {
    fn emit(
        &self,
        channel: Channel,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<Delivery, NotifyError> {
        let subscribers = self.subscribers(channel);
        if subscribers == 0 {
            self.counters.undelivered.fetch_add(1, Ordering::Relaxed);
            return Err(NotifyError::NoSubscribers(channel));
        }

        let notification = Notification {
            channel,
            event: event.to_string(),
            payload,
            emitted_at: Utc::now(),
        };
        match self.tx.send(notification) {
            Ok(_) => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
                Ok(Delivery { subscribers })
            }
            Err(_) => {
                self.counters.undelivered.fetch_add(1, Ordering::Relaxed);
                Err(NotifyError::NoSubscribers(channel))
            }
        }
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<Notification>,
    wanted: [bool; NUM_CHANNELS],
    counters: Arc<HubCounters>,
    lagged: u64,
}

impl Subscription {
    pub fn wants(&self, channel: Channel) -> bool {
        self.wanted[channel.index()]
    }

    /// Messages lost because this subscriber fell behind the buffer.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    fn on_lag(&mut self, skipped: u64) {
        self.lagged += skipped;
        warn!(skipped, "Notification subscriber lagged");
    }

    /// `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if self.wants(n.channel) => return Some(n),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => self.on_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Blocking variant for dedicated threads. Must not be called from async code.
    pub fn blocking_recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.blocking_recv() {
                Ok(n) if self.wants(n.channel) => return Some(n),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => self.on_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.try_recv() {
                Ok(n) if self.wants(n.channel) => return Some(n),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => self.on_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for (i, w) in self.wanted.iter().enumerate() {
            if *w {
                self.counters.subscribers[i].fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}
