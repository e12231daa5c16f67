//! WebSocket transport built on tokio-tungstenite.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use super::{Connector, SignalSender, TransportHandle, NO_STATUS_RECEIVED};
use crate::error::RealtimeError;
use crate::events::Payload;
use crate::state::{ABNORMAL_CLOSURE, NORMAL_CLOSURE};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Default time allowed for the peer's side of a close handshake.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands from the handle to the connection task.
#[derive(Debug)]
enum Outbound {
    Frame(Message),
    Close { code: u16, reason: String },
}

/// Connector for real WebSocket endpoints.
///
/// Each transport runs on its own task spawned on the current tokio runtime.
#[derive(Debug, Clone, Copy)]
pub struct TungsteniteConnector {
    close_timeout: Duration,
}

impl TungsteniteConnector {
    /// Creates a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Sets how long a closing connection waits for the peer.
    ///
    /// Once it elapses the socket is dropped and the close is reported as
    /// abnormal.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TungsteniteConnector {
    fn open(
        &self,
        url: &Url,
        signals: SignalSender,
    ) -> Result<Box<dyn TransportHandle>, RealtimeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        runtime.spawn(run_connection(
            url.to_string(),
            outbound_rx,
            signals,
            self.close_timeout,
        ));

        Ok(Box::new(TungsteniteHandle {
            outbound: outbound_tx,
        }))
    }
}

/// Handle to a tungstenite connection task.
#[derive(Debug)]
struct TungsteniteHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle for TungsteniteHandle {
    fn send(&self, payload: Payload) -> Result<(), RealtimeError> {
        let frame = match payload {
            Payload::Text(text) => Message::Text(text.into()),
            Payload::Binary(bytes) => Message::Binary(bytes.into()),
        };

        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| RealtimeError::SendFailed("connection task stopped".to_string()))
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

async fn run_connection(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    signals: SignalSender,
    close_timeout: Duration,
) {
    let generation = signals.generation();
    let handshake = tokio_tungstenite::connect_async(url.as_str());
    tokio::pin!(handshake);

    let stream = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok((stream, _)) => break stream,
                Err(e) => {
                    signals.error(RealtimeError::Connection(e.to_string()));
                    signals.closed(ABNORMAL_CLOSURE, "", false);
                    return;
                }
            },
            command = outbound.recv() => match command {
                // Frames are only accepted once open.
                Some(Outbound::Frame(_)) => continue,
                Some(Outbound::Close { .. }) | None => {
                    debug!(generation, "closed before the handshake completed");
                    signals.closed(ABNORMAL_CLOSURE, "closed before open", false);
                    return;
                }
            },
        }
    };

    signals.opened();

    let (mut sink, mut source) = stream.split();
    let mut accepting = true;

    // Armed once a close frame has been sent.
    let close_deadline = tokio::time::sleep(close_timeout);
    tokio::pin!(close_deadline);

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    signals.message(Payload::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    signals.message(Payload::Binary(bytes.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    trace!(generation, code, "close frame received");
                    finish_close(&mut sink, &mut source, close_timeout, generation).await;
                    signals.closed(code, reason, true);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    signals.error(e.into());
                    signals.closed(ABNORMAL_CLOSURE, "", false);
                    return;
                }
                None => {
                    signals.closed(ABNORMAL_CLOSURE, "", false);
                    return;
                }
            },
            command = outbound.recv(), if accepting => match command {
                Some(Outbound::Frame(frame)) => {
                    if let Err(e) = sink.send(frame).await {
                        signals.error(RealtimeError::SendFailed(e.to_string()));
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    accepting = false;
                    close_deadline.as_mut().reset(Instant::now() + close_timeout);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!(generation, error = %e, "close frame not delivered");
                    }
                }
                None => {
                    // Handle dropped without an explicit close.
                    accepting = false;
                    close_deadline.as_mut().reset(Instant::now() + close_timeout);
                    let frame = CloseFrame {
                        code: CloseCode::from(NORMAL_CLOSURE),
                        reason: String::new().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
            },
            () = &mut close_deadline, if !accepting => {
                debug!(generation, "peer did not answer the close");
                signals.closed(ABNORMAL_CLOSURE, "close handshake timed out", false);
                return;
            }
        }
    }
}

/// Completes a close handshake after the peer's close frame.
///
/// tungstenite queues the close reply while reading; it reaches the peer
/// only once the connection is flushed. Reading on until the stream ends
/// lets the peer drop the socket first.
async fn finish_close(
    sink: &mut WsSink,
    source: &mut WsSource,
    close_timeout: Duration,
    generation: u64,
) {
    let drain = async {
        if let Err(e) = sink.flush().await {
            debug!(generation, error = %e, "close reply not delivered");
        }
        while let Some(Ok(_)) = source.next().await {}
    };

    if tokio::time::timeout(close_timeout, drain).await.is_err() {
        debug!(generation, "peer kept the socket open after the close");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Envelope, TransportSignal};

    #[test]
    fn test_open_outside_runtime_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let url = Url::parse("ws://127.0.0.1:9/ws").expect("url");
        let result = TungsteniteConnector::new().open(&url, SignalSender::new(1, tx));
        assert!(matches!(result, Err(RealtimeError::Connection(_))));
    }

    async fn next_signal(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> TransportSignal {
        match rx.recv().await {
            Some(Envelope::Signal { signal, .. }) => signal,
            other => panic!("unexpected envelope: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refused_endpoint_reports_error_then_abnormal_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://127.0.0.1:{}/ws", port)).expect("url");
        let _handle = TungsteniteConnector::new()
            .open(&url, SignalSender::new(3, tx))
            .expect("handle");

        assert!(matches!(
            next_signal(&mut rx).await,
            TransportSignal::Error(RealtimeError::Connection(_))
        ));
        assert_eq!(
            next_signal(&mut rx).await,
            TransportSignal::Closed {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
                was_clean: false,
            }
        );
    }

    #[tokio::test]
    async fn test_echo_round_trip_and_deliberate_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() {
                    let _ = ws.send(msg).await;
                }
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://127.0.0.1:{}/ws?token=abc", port)).expect("url");
        let handle = TungsteniteConnector::new()
            .open(&url, SignalSender::new(1, tx))
            .expect("handle");

        assert_eq!(next_signal(&mut rx).await, TransportSignal::Opened);

        handle.send(Payload::from("ping")).expect("send");
        assert_eq!(
            next_signal(&mut rx).await,
            TransportSignal::Message(Payload::from("ping"))
        );

        handle.close(NORMAL_CLOSURE, "Client closed connection");
        match next_signal(&mut rx).await {
            TransportSignal::Closed {
                code, was_clean, ..
            } => {
                assert_eq!(code, NORMAL_CLOSURE);
                assert!(was_clean);
            }
            other => panic!("unexpected signal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_close_is_answered() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            };
            ws.send(Message::Close(Some(frame))).await.expect("close");
            let _ = reply_tx.send(ws.next().await);
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://127.0.0.1:{}/ws", port)).expect("url");
        let _handle = TungsteniteConnector::new()
            .open(&url, SignalSender::new(1, tx))
            .expect("handle");

        assert_eq!(next_signal(&mut rx).await, TransportSignal::Opened);
        assert_eq!(
            next_signal(&mut rx).await,
            TransportSignal::Closed {
                code: NORMAL_CLOSURE,
                reason: "bye".to_string(),
                was_clean: true,
            }
        );

        let reply = reply_rx.await.expect("server result");
        assert!(
            matches!(reply, Some(Ok(Message::Close(_))) | None),
            "server saw {:?}",
            reply
        );
    }

    #[tokio::test]
    async fn test_dropped_socket_reports_error_then_abnormal_close() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            drop(ws);
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://127.0.0.1:{}/ws", port)).expect("url");
        let _handle = TungsteniteConnector::new()
            .open(&url, SignalSender::new(2, tx))
            .expect("handle");

        assert_eq!(next_signal(&mut rx).await, TransportSignal::Opened);
        assert!(matches!(
            next_signal(&mut rx).await,
            TransportSignal::Error(RealtimeError::Protocol(_))
        ));
        assert_eq!(
            next_signal(&mut rx).await,
            TransportSignal::Closed {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
                was_clean: false,
            }
        );
    }

    #[tokio::test]
    async fn test_unanswered_close_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            // Holds the socket without ever reading from it.
            let _ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let url = Url::parse(&format!("ws://127.0.0.1:{}/ws", port)).expect("url");
        let handle = TungsteniteConnector::new()
            .with_close_timeout(Duration::from_millis(100))
            .open(&url, SignalSender::new(4, tx))
            .expect("handle");

        assert_eq!(next_signal(&mut rx).await, TransportSignal::Opened);
        handle.close(NORMAL_CLOSURE, "Client closed connection");

        let signal = tokio::time::timeout(Duration::from_secs(5), next_signal(&mut rx))
            .await
            .expect("close reported");
        assert_eq!(
            signal,
            TransportSignal::Closed {
                code: ABNORMAL_CLOSURE,
                reason: "close handshake timed out".to_string(),
                was_clean: false,
            }
        );
    }

    #[test]
    fn test_connector_close_timeout() {
        assert_eq!(
            TungsteniteConnector::default().close_timeout,
            DEFAULT_CLOSE_TIMEOUT
        );
        let connector = TungsteniteConnector::new().with_close_timeout(Duration::from_secs(1));
        assert_eq!(connector.close_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_send_after_task_stopped_fails() {
        let (outbound, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = TungsteniteHandle { outbound };
        assert!(matches!(
            handle.send(Payload::from("hi")),
            Err(RealtimeError::SendFailed(_))
        ));
    }
}
