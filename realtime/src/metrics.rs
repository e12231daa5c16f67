//! Connection metrics.
//!
//! Atomic counters describing the lifetime of a connection manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Metrics for a connection manager.
#[derive(Debug)]
pub struct ConnectionMetrics {
    /// Transports constructed (initial connects and reconnects).
    connect_attempts: AtomicU64,

    /// Open signals processed.
    opens: AtomicU64,

    /// Closes with a code other than normal closure.
    abnormal_closes: AtomicU64,

    /// Deliberate closes issued by the manager.
    manual_closes: AtomicU64,

    /// Reconnects scheduled.
    reconnects_scheduled: AtomicU64,

    /// Errors dispatched to listeners.
    errors: AtomicU64,

    /// Messages received.
    messages_received: AtomicU64,

    /// Messages handed to the transport.
    messages_sent: AtomicU64,

    start_time: Instant,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_attempts: AtomicU64::new(0),
            opens: AtomicU64::new(0),
            abnormal_closes: AtomicU64::new(0),
            manual_closes: AtomicU64::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a transport construction.
    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an open signal.
    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an abnormal close.
    pub fn record_abnormal_close(&self) {
        self.abnormal_closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a deliberate close.
    pub fn record_manual_close(&self) {
        self.manual_closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a scheduled reconnect.
    pub fn record_reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dispatched error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a received message.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a sent message.
    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns transports constructed.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Returns open signals processed.
    #[must_use]
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Returns abnormal closes.
    #[must_use]
    pub fn abnormal_closes(&self) -> u64 {
        self.abnormal_closes.load(Ordering::Relaxed)
    }

    /// Returns deliberate closes.
    #[must_use]
    pub fn manual_closes(&self) -> u64 {
        self.manual_closes.load(Ordering::Relaxed)
    }

    /// Returns reconnects scheduled.
    #[must_use]
    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled.load(Ordering::Relaxed)
    }

    /// Returns dispatched errors.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns received messages.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Returns sent messages.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts: self.connect_attempts(),
            opens: self.opens(),
            abnormal_closes: self.abnormal_closes(),
            manual_closes: self.manual_closes(),
            reconnects_scheduled: self.reconnects_scheduled(),
            errors: self.errors(),
            messages_received: self.messages_received(),
            messages_sent: self.messages_sent(),
            uptime: self.uptime(),
        }
    }
}

/// A point-in-time snapshot of connection metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Transports constructed.
    pub connect_attempts: u64,
    /// Open signals processed.
    pub opens: u64,
    /// Abnormal closes.
    pub abnormal_closes: u64,
    /// Deliberate closes.
    pub manual_closes: u64,
    /// Reconnects scheduled.
    pub reconnects_scheduled: u64,
    /// Dispatched errors.
    pub errors: u64,
    /// Received messages.
    pub messages_received: u64,
    /// Sent messages.
    pub messages_sent: u64,
    /// Uptime.
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = ConnectionMetrics::new();
        assert_eq!(metrics.connect_attempts(), 0);
        assert_eq!(metrics.opens(), 0);
        assert_eq!(metrics.messages_received(), 0);
    }

    #[test]
    fn test_metrics_record_lifecycle() {
        let metrics = ConnectionMetrics::default();

        metrics.record_connect_attempt();
        metrics.record_open();
        metrics.record_abnormal_close();
        metrics.record_reconnect_scheduled();
        metrics.record_connect_attempt();
        metrics.record_open();
        metrics.record_manual_close();

        assert_eq!(metrics.connect_attempts(), 2);
        assert_eq!(metrics.opens(), 2);
        assert_eq!(metrics.abnormal_closes(), 1);
        assert_eq!(metrics.reconnects_scheduled(), 1);
        assert_eq!(metrics.manual_closes(), 1);
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = ConnectionMetrics::new();

        metrics.record_message_received();
        metrics.record_message_received();
        metrics.record_message_sent();
        metrics.record_error();

        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.errors, 1);

        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert!(json.contains("\"messages_received\":2"));
    }
}
