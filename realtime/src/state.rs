//! Connection state machine.
//!
//! The reconnect policy lives here as a pure transition function so it can be
//! driven without a network transport.

use std::fmt;
use std::time::Duration;

/// Close code for a deliberate, mutually acknowledged close.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Why a connection ended up closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed through [`crate::RealtimeClient::close`].
    Manual,
    /// The transport could not be constructed.
    Error,
    /// The transport reported a close with this code.
    Remote {
        /// WebSocket close code.
        code: u16,
    },
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing attempted yet.
    Idle,
    /// A transport exists and has not reported open or close.
    Connecting,
    /// The transport reported open.
    Open,
    /// A close signal is being dispatched.
    Closing,
    /// No live transport.
    Closed(CloseReason),
}

impl ConnectionState {
    /// WebSocket `readyState` equivalent: 0 connecting, 1 open, 2 closing, 3 closed.
    #[must_use]
    pub const fn ready_state(&self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Idle | Self::Closed(_) => 3,
        }
    }

    /// Returns true while a connection is open or being opened.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed(CloseReason::Manual) => write!(f, "closed (manual)"),
            Self::Closed(CloseReason::Error) => write!(f, "closed (error)"),
            Self::Closed(CloseReason::Remote { code }) => write!(f, "closed ({})", code),
        }
    }
}

/// Inputs accepted by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// `connect()` was called.
    ConnectRequested,
    /// Building the URL or the transport failed.
    ConstructionFailed,
    /// The transport reported open.
    Opened,
    /// The transport reported a close; listeners are about to run.
    Closing,
    /// Close listeners ran; decide whether to reconnect.
    Closed {
        /// Close code reported by the transport.
        code: u16,
    },
    /// The transport reported an error.
    Errored,
    /// `close()` was called.
    CloseRequested,
    /// A scheduled reconnect fired.
    ReconnectDue {
        /// Epoch captured when the reconnect was scheduled.
        epoch: u64,
    },
}

/// What the caller must do after applying an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    Ignored,
    /// State changed; no further action.
    Updated,
    /// A transport must be constructed now.
    StartTransport,
    /// A reconnect must fire after `delay`, carrying `epoch`.
    ScheduleReconnect {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
        /// Epoch to hand back in [`Input::ReconnectDue`].
        epoch: u64,
    },
    /// Abnormal close with no reconnect budget left.
    Exhausted {
        /// Attempts used since the last open.
        attempts: u32,
    },
}

/// Reconnect state machine.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
    epoch: u64,
}

impl ReconnectMachine {
    /// Creates an idle machine with the given budget and fixed delay.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            max_attempts,
            delay,
            epoch: 0,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns the reconnect attempts used since the last open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Applies an input and returns the required follow-up.
    pub fn apply(&mut self, input: Input) -> Transition {
        match input {
            Input::ConnectRequested => self.start(),
            Input::ConstructionFailed => {
                self.state = ConnectionState::Closed(CloseReason::Error);
                Transition::Updated
            }
            Input::Opened => {
                self.state = ConnectionState::Open;
                self.attempts = 0;
                Transition::Updated
            }
            Input::Closing => {
                self.state = ConnectionState::Closing;
                Transition::Updated
            }
            Input::Closed { code } => self.closed(code),
            Input::Errored => Transition::Ignored,
            Input::CloseRequested => {
                // Invalidates any reconnect scheduled before this point.
                self.epoch = self.epoch.wrapping_add(1);
                self.state = ConnectionState::Closed(CloseReason::Manual);
                Transition::Updated
            }
            Input::ReconnectDue { epoch } => {
                if epoch != self.epoch {
                    return Transition::Ignored;
                }
                self.start()
            }
        }
    }

    fn start(&mut self) -> Transition {
        if self.state.is_active() {
            return Transition::Ignored;
        }
        self.state = ConnectionState::Connecting;
        Transition::StartTransport
    }

    fn closed(&mut self, code: u16) -> Transition {
        self.state = ConnectionState::Closed(CloseReason::Remote { code });

        if code == NORMAL_CLOSURE {
            return Transition::Updated;
        }

        if self.attempts >= self.max_attempts {
            return Transition::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        Transition::ScheduleReconnect {
            attempt: self.attempts,
            delay: self.delay,
            epoch: self.epoch,
        }
    }
}
