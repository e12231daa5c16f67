//! Event categories, event payloads and the listener registry.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::RealtimeError;

/// The four event categories a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// The connection opened.
    Open,
    /// The connection closed.
    Close,
    /// The transport or the manager reported an error.
    Error,
    /// A message arrived.
    Message,
}

impl EventCategory {
    /// All categories, in declaration order.
    pub const ALL: [Self; 4] = [Self::Open, Self::Close, Self::Error, Self::Message];
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
            Self::Error => write!(f, "error"),
            Self::Message => write!(f, "message"),
        }
    }
}

/// Message payload, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the text content for text frames.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RealtimeError> {
        let value = match self {
            Self::Text(text) => serde_json::from_str(text)?,
            Self::Binary(bytes) => serde_json::from_slice(bytes)?,
        };
        Ok(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Connection opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenEvent {
    /// Connected URL with the token redacted.
    pub url: String,
    /// When the open signal was processed.
    pub at: DateTime<Utc>,
}

/// Connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason, possibly empty.
    pub reason: String,
    /// True when the close was acknowledged with a close frame.
    pub was_clean: bool,
    /// When the close signal was processed.
    pub at: DateTime<Utc>,
}

/// Error reported by the transport or the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// The error.
    pub error: RealtimeError,
    /// When the error was processed.
    pub at: DateTime<Utc>,
}

/// Message received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Raw payload.
    pub payload: Payload,
    /// When the message was processed.
    pub at: DateTime<Utc>,
}

/// Event passed to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// See [`OpenEvent`].
    Open(OpenEvent),
    /// See [`CloseEvent`].
    Close(CloseEvent),
    /// See [`ErrorEvent`].
    Error(ErrorEvent),
    /// See [`MessageEvent`].
    Message(MessageEvent),
}

impl Event {
    /// Returns the category this event is dispatched to.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        match self {
            Self::Open(_) => EventCategory::Open,
            Self::Close(_) => EventCategory::Close,
            Self::Error(_) => EventCategory::Error,
            Self::Message(_) => EventCategory::Message,
        }
    }

    pub(crate) fn error(error: RealtimeError) -> Self {
        Self::Error(ErrorEvent {
            error,
            at: Utc::now(),
        })
    }
}

/// Listener callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Ordered listeners, one list per category.
///
/// Handlers are only ever appended.
#[derive(Default, Clone)]
pub struct Listeners {
    open: Vec<Handler>,
    close: Vec<Handler>,
    error: Vec<Handler>,
    message: Vec<Handler>,
}

impl Listeners {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler to a category.
    pub fn push(&mut self, category: EventCategory, handler: Handler) {
        self.slot_mut(category).push(handler);
    }

    /// Returns the handlers of a category in registration order.
    #[must_use]
    pub fn get(&self, category: EventCategory) -> &[Handler] {
        match category {
            EventCategory::Open => &self.open,
            EventCategory::Close => &self.close,
            EventCategory::Error => &self.error,
            EventCategory::Message => &self.message,
        }
    }

    /// Returns the number of handlers in a category.
    #[must_use]
    pub fn len(&self, category: EventCategory) -> usize {
        self.get(category).len()
    }

    fn slot_mut(&mut self, category: EventCategory) -> &mut Vec<Handler> {
        match category {
            EventCategory::Open => &mut self.open,
            EventCategory::Close => &mut self.close,
            EventCategory::Error => &mut self.error,
            EventCategory::Message => &mut self.message,
        }
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("open", &self.open.len())
            .field("close", &self.close.len())
            .field("error", &self.error.len())
            .field("message", &self.message.len())
            .finish()
    }
}
