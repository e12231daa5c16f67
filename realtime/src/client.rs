//! Realtime connection manager.
//!
//! Owns at most one live transport, derives its URL from the current access
//! token, fans transport signals out to listeners, and reconnects after
//! abnormal closes within a fixed budget.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::RealtimeConfig;
use crate::credential::CredentialProvider;
use crate::error::RealtimeError;
use crate::events::{
    CloseEvent, ErrorEvent, Event, EventCategory, Handler, Listeners, MessageEvent, OpenEvent,
    Payload,
};
use crate::metrics::ConnectionMetrics;
use crate::state::{
    CloseReason, ConnectionState, Input, ReconnectMachine, Transition, NORMAL_CLOSURE,
};
use crate::transport::{
    Connector, Envelope, SignalSender, TransportHandle, TransportSignal, TungsteniteConnector,
};

/// Query parameter carrying the access token.
pub const TOKEN_PARAM: &str = "token";

/// Realtime connection manager.
///
/// Cloning is cheap; clones share the same connection and listeners.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: RealtimeConfig,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
    core: Mutex<Core>,
    listeners: RwLock<Listeners>,
    queue: mpsc::UnboundedSender<Envelope>,
    runtime: Handle,
    metrics: Arc<ConnectionMetrics>,
}

struct Core {
    machine: ReconnectMachine,
    handle: Option<Box<dyn TransportHandle>>,
    generation: u64,
    /// Redacted URL of the current transport.
    url: String,
}

impl Core {
    fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }
}

impl RealtimeClient {
    /// Creates a manager using `connector` for transports.
    ///
    /// Must be called within a tokio runtime; signal processing and reconnect
    /// timers run on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no runtime is
    /// available.
    pub fn new<P, C>(
        config: RealtimeConfig,
        credentials: P,
        connector: C,
    ) -> Result<Self, RealtimeError>
    where
        P: CredentialProvider + 'static,
        C: Connector + 'static,
    {
        config.validate()?;

        let runtime =
            Handle::try_current().map_err(|e| RealtimeError::Connection(e.to_string()))?;
        let (queue, events) = mpsc::unbounded_channel();
        let machine =
            ReconnectMachine::new(config.max_reconnect_attempts, config.reconnect_delay);

        let inner = Arc::new(Inner {
            config,
            credentials: Arc::new(credentials),
            connector: Arc::new(connector),
            core: Mutex::new(Core {
                machine,
                handle: None,
                generation: 0,
                url: String::new(),
            }),
            listeners: RwLock::new(Listeners::new()),
            queue,
            runtime: runtime.clone(),
            metrics: Arc::new(ConnectionMetrics::new()),
        });

        runtime.spawn(drive(Arc::downgrade(&inner), events));

        Ok(Self { inner })
    }

    /// Creates a manager that opens real WebSocket connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or no runtime is
    /// available.
    pub fn with_tungstenite<P>(
        config: RealtimeConfig,
        credentials: P,
    ) -> Result<Self, RealtimeError>
    where
        P: CredentialProvider + 'static,
    {
        Self::new(config, credentials, TungsteniteConnector::new())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().machine.state()
    }

    /// Returns reconnect attempts used since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().machine.attempts()
    }

    /// Returns true iff a transport exists and is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let core = self.inner.core.lock();
        core.handle.is_some() && core.machine.state() == ConnectionState::Open
    }

    /// Starts connecting unless a connection is already open or opening.
    ///
    /// Returns immediately; progress is reported to listeners. Configuration
    /// and construction failures are dispatched once to the error listeners
    /// and never retried.
    pub fn connect(&self) {
        self.inner.attempt(Input::ConnectRequested);
    }

    /// Sends a payload over the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NotOpen`] with the current state when the
    /// connection is not open; nothing is sent in that case.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), RealtimeError> {
        let core = self.inner.core.lock();
        let state = core.machine.state();

        match (&core.handle, state) {
            (Some(handle), ConnectionState::Open) => {
                handle.send(payload.into())?;
                self.inner.metrics.record_message_sent();
                Ok(())
            }
            _ => {
                debug!(%state, "send rejected");
                Err(RealtimeError::not_open(state))
            }
        }
    }

    /// Serializes `message` as JSON and sends it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the connection is not open.
    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<(), RealtimeError> {
        let text = serde_json::to_string(message)?;
        self.send(text)
    }

    /// Closes the connection deliberately.
    ///
    /// Sends a normal-closure close with the configured reason, then releases
    /// the transport. The close never triggers a reconnect and cancels any
    /// pending one. Calling this without a connection is a no-op.
    pub fn close(&self) {
        let mut core = self.inner.core.lock();

        let Some(handle) = core.handle.take() else {
            // A dropped connection may still have a reconnect pending.
            if matches!(
                core.machine.state(),
                ConnectionState::Closed(CloseReason::Remote { .. })
            ) {
                core.machine.apply(Input::CloseRequested);
                debug!("pending reconnect cancelled");
            }
            return;
        };

        handle.close(NORMAL_CLOSURE, &self.inner.config.close_reason);
        drop(handle);

        core.machine.apply(Input::CloseRequested);
        self.inner.metrics.record_manual_close();
        info!(generation = core.generation, "connection closed by client");
    }

    /// Registers a listener for a category.
    ///
    /// Listeners run in registration order and are kept for the lifetime of
    /// the manager, across reconnects.
    pub fn on<F>(&self, category: EventCategory, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.inner.listeners.write().push(category, handler);
    }

    /// Registers an open listener.
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn(&OpenEvent) + Send + Sync + 'static,
    {
        self.on(EventCategory::Open, move |event| {
            if let Event::Open(open) = event {
                handler(open);
            }
        });
    }

    /// Registers a close listener.
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn(&CloseEvent) + Send + Sync + 'static,
    {
        self.on(EventCategory::Close, move |event| {
            if let Event::Close(close) = event {
                handler(close);
            }
        });
    }

    /// Registers an error listener.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.on(EventCategory::Error, move |event| {
            if let Event::Error(err) = event {
                handler(err);
            }
        });
    }

    /// Registers a message listener.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.on(EventCategory::Message, move |event| {
            if let Event::Message(message) = event {
                handler(message);
            }
        });
    }
}

impl fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("RealtimeClient")
            .field("config", &self.inner.config)
            .field("state", &core.machine.state())
            .field("generation", &core.generation)
            .field("listeners", &*self.inner.listeners.read())
            .finish()
    }
}

impl Inner {
    fn attempt(&self, input: Input) {
        let failure = {
            let mut core = self.core.lock();
            if core.machine.apply(input) != Transition::StartTransport {
                debug!(?input, state = %core.machine.state(), "connect skipped");
                return;
            }

            match self.open_transport(&mut core) {
                Ok(()) => return,
                Err(err) => {
                    core.machine.apply(Input::ConstructionFailed);
                    core.handle = None;
                    err
                }
            }
        };

        error!(error = %failure, "connection attempt failed");
        self.metrics.record_error();
        self.dispatch(&Event::error(failure));
    }

    fn open_transport(&self, core: &mut Core) -> Result<(), RealtimeError> {
        let url = connection_url(
            self.config.endpoint.as_deref(),
            self.credentials.access_token(),
        )?;

        core.generation += 1;
        let signals = SignalSender::new(core.generation, self.queue.clone());

        self.metrics.record_connect_attempt();
        let handle = self.connector.open(&url, signals)?;
        core.handle = Some(handle);
        core.url = redact(&url);

        info!(url = %core.url, generation = core.generation, "connecting");
        Ok(())
    }

    fn process(&self, envelope: Envelope) {
        match envelope {
            Envelope::Signal { generation, signal } => self.on_signal(generation, signal),
            Envelope::ReconnectDue { epoch } => {
                debug!(epoch, "reconnect timer fired");
                self.attempt(Input::ReconnectDue { epoch });
            }
        }
    }

    fn on_signal(&self, generation: u64, signal: TransportSignal) {
        match signal {
            TransportSignal::Opened => self.on_opened(generation),
            TransportSignal::Message(payload) => {
                if !self.core.lock().is_current(generation) {
                    debug!(generation, "message from released transport dropped");
                    return;
                }
                self.metrics.record_message_received();
                self.dispatch(&Event::Message(MessageEvent {
                    payload,
                    at: Utc::now(),
                }));
            }
            TransportSignal::Error(err) => {
                {
                    let mut core = self.core.lock();
                    if core.is_current(generation) {
                        core.machine.apply(Input::Errored);
                    }
                }
                warn!(generation, error = %err, "transport error");
                self.metrics.record_error();
                self.dispatch(&Event::error(err));
            }
            TransportSignal::Closed {
                code,
                reason,
                was_clean,
            } => self.on_closed(generation, code, reason, was_clean),
        }
    }

    fn on_opened(&self, generation: u64) {
        let url = {
            let mut core = self.core.lock();
            if !core.is_current(generation) {
                warn!(generation, "open from released transport ignored");
                return;
            }
            core.machine.apply(Input::Opened);
            core.url.clone()
        };

        info!(generation, "connection open");
        self.metrics.record_open();
        self.dispatch(&Event::Open(OpenEvent { url, at: Utc::now() }));
    }

    fn on_closed(&self, generation: u64, code: u16, reason: String, was_clean: bool) {
        let current = {
            let mut core = self.core.lock();
            let current = core.is_current(generation);
            if current {
                core.machine.apply(Input::Closing);
            }
            current
        };

        if code != NORMAL_CLOSURE {
            self.metrics.record_abnormal_close();
        }

        let event = Event::Close(CloseEvent {
            code,
            reason,
            was_clean,
            at: Utc::now(),
        });
        self.dispatch(&event);

        if !current {
            debug!(generation, code, "close from released transport");
            return;
        }

        let transition = {
            let mut core = self.core.lock();
            // A close listener may have closed or replaced the transport.
            if !core.is_current(generation) {
                return;
            }
            core.handle = None;
            core.machine.apply(Input::Closed { code })
        };

        match transition {
            Transition::ScheduleReconnect {
                attempt,
                delay,
                epoch,
            } => {
                warn!(
                    code,
                    attempt,
                    max = self.config.max_reconnect_attempts,
                    ?delay,
                    "connection lost, reconnecting"
                );
                self.metrics.record_reconnect_scheduled();
                let queue = self.queue.clone();
                self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = queue.send(Envelope::ReconnectDue { epoch });
                });
            }
            Transition::Exhausted { attempts } => {
                warn!(code, attempts, "reconnect budget exhausted, giving up");
            }
            _ => info!(code, "connection closed"),
        }
    }

    fn dispatch(&self, event: &Event) {
        let handlers: Vec<Handler> = self.listeners.read().get(event.category()).to_vec();
        debug!(category = %event.category(), listeners = handlers.len(), "dispatch");
        for handler in handlers {
            handler(event);
        }
    }
}

async fn drive(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.process(envelope);
    }
}

/// Builds the connection URL from the configured endpoint and token.
///
/// Any existing `token` parameter is replaced; other parameters are kept.
/// A missing token yields an empty `token` value.
///
/// # Errors
///
/// Returns an error if the endpoint is missing, unparsable, or not a
/// `ws`/`wss` URL.
pub fn connection_url(
    endpoint: Option<&str>,
    token: Option<String>,
) -> Result<Url, RealtimeError> {
    let endpoint = endpoint
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or(RealtimeError::MissingEndpoint)?;

    let mut url =
        Url::parse(endpoint).map_err(|e| RealtimeError::InvalidEndpoint(e.to_string()))?;

    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(RealtimeError::InvalidEndpoint(format!(
            "unsupported scheme {:?}, expected ws or wss",
            url.scheme()
        )));
    }

    set_query_param(&mut url, TOKEN_PARAM, &token.unwrap_or_default());
    Ok(url)
}

/// Returns the URL as a string with the token value masked.
#[must_use]
pub fn redact(url: &Url) -> String {
    let mut masked = url.clone();
    if masked.query_pairs().any(|(k, _)| k == TOKEN_PARAM) {
        set_query_param(&mut masked, TOKEN_PARAM, "***");
    }
    masked.to_string()
}

fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(key, value);
}
