//! Transport abstraction.
//!
//! A [`Connector`] constructs a transport and returns immediately; the
//! transport then reports progress through a [`SignalSender`]. Every signal
//! is tagged with the generation of the transport that produced it, so the
//! manager can tell a live connection from one it already released.

pub mod websocket;

#[cfg(test)]
pub(crate) mod fake;

use tokio::sync::mpsc;
use url::Url;

use crate::error::RealtimeError;
use crate::events::Payload;

pub use self::websocket::TungsteniteConnector;

/// Close code used when a close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Signals a transport reports to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The handshake completed.
    Opened,
    /// A frame arrived.
    Message(Payload),
    /// The transport failed.
    Error(RealtimeError),
    /// The transport closed.
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
        /// True when a close frame was received.
        was_clean: bool,
    },
}

/// Entries on the manager's event queue.
#[derive(Debug)]
pub(crate) enum Envelope {
    /// A transport signal.
    Signal {
        generation: u64,
        signal: TransportSignal,
    },
    /// A scheduled reconnect fired.
    ReconnectDue { epoch: u64 },
}

/// Sending half of the manager's event queue, bound to one transport.
#[derive(Debug, Clone)]
pub struct SignalSender {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl SignalSender {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { generation, tx }
    }

    /// Returns the generation of the transport this sender belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports a signal. Returns false once the manager is gone.
    pub fn emit(&self, signal: TransportSignal) -> bool {
        self.tx
            .send(Envelope::Signal {
                generation: self.generation,
                signal,
            })
            .is_ok()
    }

    /// Reports that the handshake completed.
    pub fn opened(&self) -> bool {
        self.emit(TransportSignal::Opened)
    }

    /// Reports an incoming frame.
    pub fn message(&self, payload: Payload) -> bool {
        self.emit(TransportSignal::Message(payload))
    }

    /// Reports a transport failure.
    pub fn error(&self, error: RealtimeError) -> bool {
        self.emit(TransportSignal::Error(error))
    }

    /// Reports that the transport closed.
    pub fn closed(&self, code: u16, reason: impl Into<String>, was_clean: bool) -> bool {
        self.emit(TransportSignal::Closed {
            code,
            reason: reason.into(),
            was_clean,
        })
    }
}

/// A live transport owned by the manager.
pub trait TransportHandle: Send {
    /// Queues a frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport can no longer accept frames.
    fn send(&self, payload: Payload) -> Result<(), RealtimeError>;

    /// Starts a deliberate close.
    fn close(&self, code: u16, reason: &str);
}

/// Constructs transports.
pub trait Connector: Send + Sync {
    /// Starts connecting to `url` and returns without waiting for the
    /// handshake. Progress is reported through `signals`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot even be constructed.
    fn open(
        &self,
        url: &Url,
        signals: SignalSender,
    ) -> Result<Box<dyn TransportHandle>, RealtimeError>;
}
