//! In-memory connector for driving the manager in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, SignalSender, TransportHandle};
use crate::error::RealtimeError;
use crate::events::Payload;

/// A transport constructed by [`FakeConnector`].
#[derive(Debug, Clone)]
pub(crate) struct FakeConnection {
    pub url: Url,
    pub signals: SignalSender,
    pub sent: Arc<Mutex<Vec<Payload>>>,
    pub closes: Arc<Mutex<Vec<(u16, String)>>>,
}

impl FakeConnection {
    pub fn token(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
    }
}

/// Test side of a [`FakeConnector`].
#[derive(Debug)]
pub(crate) struct FakeConnections {
    opened: mpsc::UnboundedReceiver<FakeConnection>,
    count: Arc<AtomicUsize>,
}

impl FakeConnections {
    /// Waits for the next constructed transport.
    pub async fn next(&mut self) -> FakeConnection {
        match self.opened.recv().await {
            Some(connection) => connection,
            None => panic!("connector dropped"),
        }
    }

    /// Returns the next constructed transport if one is already queued.
    pub fn try_next(&mut self) -> Option<FakeConnection> {
        self.opened.try_recv().ok()
    }

    /// Returns how many transports were constructed.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Connector that records transports instead of opening sockets.
#[derive(Debug)]
pub(crate) struct FakeConnector {
    opened: mpsc::UnboundedSender<FakeConnection>,
    count: Arc<AtomicUsize>,
    fail_with: Option<RealtimeError>,
}

impl FakeConnector {
    pub fn new() -> (Self, FakeConnections) {
        let (tx, rx) = mpsc::unbounded_channel();
        let count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                opened: tx,
                count: Arc::clone(&count),
                fail_with: None,
            },
            FakeConnections { opened: rx, count },
        )
    }

    /// Makes every construction fail with `error`.
    pub fn failing(error: RealtimeError) -> (Self, FakeConnections) {
        let (mut connector, connections) = Self::new();
        connector.fail_with = Some(error);
        (connector, connections)
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        url: &Url,
        signals: SignalSender,
    ) -> Result<Box<dyn TransportHandle>, RealtimeError> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        self.count.fetch_add(1, Ordering::SeqCst);

        let connection = FakeConnection {
            url: url.clone(),
            signals,
            sent: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(Mutex::new(Vec::new())),
        };
        let handle = FakeHandle {
            sent: Arc::clone(&connection.sent),
            closes: Arc::clone(&connection.closes),
        };
        let _ = self.opened.send(connection);

        Ok(Box::new(handle))
    }
}

#[derive(Debug)]
struct FakeHandle {
    sent: Arc<Mutex<Vec<Payload>>>,
    closes: Arc<Mutex<Vec<(u16, String)>>>,
}

impl TransportHandle for FakeHandle {
    fn send(&self, payload: Payload) -> Result<(), RealtimeError> {
        self.sent.lock().push(payload);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.closes.lock().push((code, reason.to_string()));
    }
}
