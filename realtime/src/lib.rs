//! Console Realtime - connection manager for the admin console's live channel.
//!
//! This crate owns the single WebSocket connection the console keeps open to
//! its backend: it authenticates the endpoint with the current access token,
//! fans transport events out to registered listeners, and recovers from
//! unexpected disconnects with a bounded, fixed-delay reconnect policy.
//!
//! # Components
//!
//! - [`client`]: The connection manager ([`RealtimeClient`])
//! - [`state`]: Connection state machine and reconnect policy
//! - [`events`]: Event categories, payloads and the listener registry
//! - [`transport`]: Transport abstraction and the tokio-tungstenite connector
//! - [`credential`]: Access token providers
//! - [`config`]: Manager configuration
//! - [`metrics`]: Connection metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use console_realtime::{RealtimeClient, RealtimeConfig, TokenStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tokens = TokenStore::new();
//!     tokens.set_access_token("eyJhbGciOi...");
//!
//!     let client = RealtimeClient::with_tungstenite(
//!         RealtimeConfig::new("wss://console.example/realtime"),
//!         tokens,
//!     )?;
//!
//!     client.on_message(|message| println!("{:?}", message.payload));
//!     client.connect();
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! `send` fails with [`RealtimeError::NotOpen`] while the connection is not
//! open; nothing is queued.

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod metrics;
pub mod state;
pub mod transport;

pub use client::RealtimeClient;
pub use config::{ConfigError, RealtimeConfig};
pub use credential::{CredentialProvider, NoCredentials, StaticToken, TokenStore};
pub use error::RealtimeError;
pub use events::{
    CloseEvent, ErrorEvent, Event, EventCategory, MessageEvent, OpenEvent, Payload,
};
pub use metrics::{ConnectionMetrics, MetricsSnapshot};
pub use state::{CloseReason, ConnectionState};
pub use transport::{Connector, SignalSender, TransportHandle, TungsteniteConnector};
