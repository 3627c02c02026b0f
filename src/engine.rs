//! Protocol Engine: drives one command/response exchange with a payment
//! terminal over the framed wire protocol.
//!
//! The receive loop below plays the client-side counterpart to the teacher's
//! `handle_client` loop (`src/server/legacy.rs`): a single `tokio::select!`
//! reads framed responses against two independent timers until a terminal
//! message kind arrives. Here there are two timers instead of one shutdown
//! watch: an overall session deadline that never resets, and an idle deadline
//! that resets every time a frame (valid or not) is observed. When both fire
//! on the same poll the overall timeout is reported, since it reflects an
//! intentional caller-imposed ceiling rather than terminal sluggishness.

use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::{
    net::TcpStream,
    time::{Instant, sleep},
};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::{
    envelope::{Envelope, MessageKind},
    framer::{Frame, FrameCodec, to_hex},
};

/// Timeout configuration for a single Protocol Engine session.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Ceiling on establishing the TCP connection.
    pub connect: Duration,
    /// Ceiling on the whole session, from the first byte sent.
    pub overall: Duration,
    /// Ceiling on silence since the last frame was observed.
    pub idle: Duration,
}

impl Timeouts {
    /// Build a new timeout set.
    #[must_use]
    pub const fn new(connect: Duration, overall: Duration, idle: Duration) -> Self {
        Self { connect, overall, idle }
    }
}

/// A single observation recorded during a session, kept for session logging.
#[derive(Debug, Clone)]
pub enum Event {
    /// The TCP connection to the terminal was established.
    Connected,
    /// The outbound command envelope.
    Sent(Value),
    /// A successfully parsed inbound frame.
    Received(Value),
    /// A frame whose payload failed to parse as JSON.
    InvalidFrame {
        /// Hex rendering of the raw frame bytes.
        raw_hex: String,
        /// Parse failure description.
        reason: String,
    },
}

/// Failure modes of a Protocol Engine session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Establishing the TCP connection exceeded [`Timeouts::connect`].
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// The session exceeded [`Timeouts::overall`] without a final response.
    #[error("session timed out after {0:?} overall")]
    OverallTimeout(Duration),
    /// No frame was observed for [`Timeouts::idle`].
    #[error("session timed out after {0:?} of inactivity")]
    IdleTimeout(Duration),
    /// The terminal closed the connection before sending a final response.
    #[error("terminal closed the connection before a final response")]
    ConnectionClosed,
    /// The command envelope could not be serialized.
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    /// An I/O error occurred on the underlying socket.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a completed session: the final response plus the event log
/// accumulated along the way.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// The terminal's final (`MSG`/`RSP`/`ERR`) response.
    pub response: Value,
    /// Every frame sent or received during the session, in order.
    pub events: Vec<Event>,
}

/// A failed session, paired with whatever event log had been accumulated
/// before the failure. Per spec §7 the log is the principal debugging
/// artifact and must survive a timeout or transport error, not just a clean
/// completion.
#[derive(Debug)]
pub struct SessionFailure {
    /// The failure that ended the session.
    pub error: EngineError,
    /// Every frame sent or received before the failure, in order.
    pub events: Vec<Event>,
}

/// Send `envelope` to the terminal at `addr` and wait for its final response.
///
/// Acknowledgement and progress frames (`ACK`, `EVT`, `DSP`, `PIN`, `CNF`,
/// `READY`) are logged and otherwise ignored; malformed frames are logged and
/// skipped without aborting the session. The idle timer resets on every
/// observed frame, valid or not.
///
/// # Errors
/// Returns [`SessionFailure`] if the connection cannot be established in
/// time, either timer elapses before a final response arrives, the
/// connection closes early, or the envelope cannot be serialized — always
/// paired with the event log accumulated up to that point.
pub async fn send_command(
    addr: SocketAddr,
    envelope: &Envelope,
    timeouts: Timeouts,
) -> Result<SessionOutcome, SessionFailure> {
    let mut events = Vec::new();

    let connect = tokio::time::timeout(timeouts.connect, TcpStream::connect(addr));
    let stream = match connect.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return Err(SessionFailure { error: EngineError::Io(err), events }),
        Err(_elapsed) => {
            return Err(SessionFailure { error: EngineError::ConnectTimeout(timeouts.connect), events });
        }
    };
    events.push(Event::Connected);

    let mut framed = Framed::new(stream, FrameCodec::new());

    let payload = match envelope.to_value() {
        Ok(payload) => payload,
        Err(err) => return Err(SessionFailure { error: EngineError::Encode(err), events }),
    };
    if let Err(err) = framed.send(payload.clone()).await {
        return Err(SessionFailure { error: EngineError::Io(err), events });
    }
    events.push(Event::Sent(payload));

    let overall = sleep(timeouts.overall);
    tokio::pin!(overall);
    let idle = sleep(timeouts.idle);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            biased;
            () = &mut overall => {
                return Err(SessionFailure { error: EngineError::OverallTimeout(timeouts.overall), events });
            }
            () = &mut idle => {
                return Err(SessionFailure { error: EngineError::IdleTimeout(timeouts.idle), events });
            }
            frame = framed.next() => {
                match handle_frame(frame, &mut events) {
                    Ok(Some(outcome)) => return Ok(outcome),
                    Ok(None) => {
                        idle.as_mut().reset(Instant::now() + timeouts.idle);
                        continue;
                    }
                    Err(error) => return Err(SessionFailure { error, events }),
                }
            }
        }
    }
}

/// Process one polled frame, returning `Ok(Some(..))` once a final response
/// has arrived and `Ok(None)` when the caller should keep waiting.
fn handle_frame(
    frame: Option<Result<Frame, std::io::Error>>,
    events: &mut Vec<Event>,
) -> Result<Option<SessionOutcome>, EngineError> {
    match frame {
        None => Err(EngineError::ConnectionClosed),
        Some(Err(err)) => Err(EngineError::Io(err)),
        Some(Ok(Frame::Invalid { raw, reason })) => {
            warn!(reason = %reason, "discarding malformed frame");
            events.push(Event::InvalidFrame { raw_hex: to_hex(&raw), reason });
            Ok(None)
        }
        Some(Ok(Frame::Value(value))) => {
            events.push(Event::Received(value.clone()));
            let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
            if MessageKind::classify(message).is_terminal() {
                Ok(Some(SessionOutcome { response: value, events: std::mem::take(events) }))
            } else {
                debug!(message, "non-terminal response; continuing to wait");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };
    use tokio_util::codec::Encoder;

    use super::*;

    fn timeouts() -> Timeouts {
        Timeouts::new(
            Duration::from_millis(200),
            Duration::from_millis(500),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn completes_on_final_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            let mut framed = Framed::new(socket, FrameCodec::new());
            let _sent = framed.next().await.expect("frame").expect("ok");
            framed
                .send(json!({"message": "ACK"}))
                .await
                .expect("send ack");
            framed
                .send(json!({"message": "MSG", "data": {"cmdResult": {"result": "Success"}}}))
                .await
                .expect("send final");
        });

        let envelope = Envelope::new("Ping", "ECR1", "000001");
        let outcome = send_command(addr, &envelope, timeouts()).await.expect("session");
        assert_eq!(outcome.response["message"], "MSG");
        assert!(matches!(outcome.events.first(), Some(Event::Connected)));
        assert_eq!(outcome.events.len(), 4);
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn idle_timeout_fires_without_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.expect("accept");
            // Hold the connection open without ever responding.
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let envelope = Envelope::new("Ping", "ECR1", "000002");
        let failure = send_command(addr, &envelope, timeouts())
            .await
            .expect_err("must time out");
        assert!(matches!(failure.error, EngineError::IdleTimeout(_)));
        assert!(matches!(failure.events.first(), Some(Event::Connected)));
        server.abort();
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped_without_aborting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = [0_u8; 4096];
            let _n = socket.read(&mut buf).await.expect("read command");

            // Malformed frame: STX LF '{x' LF ETX LF.
            socket
                .write_all(&[0x02, 0x0A, b'{', b'x', 0x0A, 0x03, 0x0A])
                .await
                .expect("write malformed");

            let mut codec = FrameCodec::new();
            let mut out = bytes::BytesMut::new();
            codec
                .encode(
                    json!({"message": "RSP", "data": {"cmdResult": {"result": "Failed"}}}),
                    &mut out,
                )
                .expect("encode final");
            socket.write_all(&out).await.expect("write final");
        });

        let envelope = Envelope::new("Ping", "ECR1", "000003");
        let outcome = send_command(addr, &envelope, timeouts()).await.expect("session");
        assert_eq!(outcome.response["message"], "RSP");
        assert!(outcome.events.iter().any(|e| matches!(e, Event::InvalidFrame { .. })));
        server.abort();
    }
}
