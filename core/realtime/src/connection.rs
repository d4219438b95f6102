//! Per-connection read and write loops.
//!
//! Each live connection runs two loops concurrently: an inbound loop that
//! decodes frames and forwards them to the shared dispatcher queue, and an
//! outbound loop that drains the connection's queue and keeps the peer
//! alive with periodic pings. When either loop ends the other is stopped
//! and the connection is unregistered.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RealtimeConfig;
use crate::dispatch::InboundMessage;
use crate::protocol::Message;
use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionSession};
use notevault_common::{DeviceId, UserId};

/// Transport-level frame.
///
/// The HTTP layer adapts its socket type to a `Stream` and a `Sink` of
/// frames, which keeps this crate independent of any particular websocket
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Who is on the other end of a connection.
struct Peer {
    id: ConnectionId,
    user_id: UserId,
    device_id: DeviceId,
}

/// Read frames until the peer goes away, goes quiet past `pong_wait`, or
/// the connection is shut down.
async fn run_inbound<S, E>(
    mut stream: S,
    peer: &Peer,
    shutdown: &CancellationToken,
    inbound: mpsc::Sender<InboundMessage>,
    pong_wait: Duration,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = timeout(pong_wait, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                debug!(connection = %peer.id, "Read deadline expired");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(connection = %peer.id, error = %e, "Read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Frame::Text(text) => text,
            Frame::Close => break,
            // Pings and pongs only extend the read deadline.
            Frame::Ping(_) | Frame::Pong(_) => continue,
        };

        let message = match Message::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection = %peer.id, error = %e, "Dropping malformed message");
                continue;
            }
        };

        let forwarded = InboundMessage {
            connection_id: peer.id.clone(),
            user_id: peer.user_id.clone(),
            device_id: peer.device_id.clone(),
            message,
        };
        tokio::select! {
            _ = shutdown.cancelled() => break,
            sent = inbound.send(forwarded) => {
                if sent.is_err() {
                    debug!(connection = %peer.id, "Dispatcher gone");
                    break;
                }
            }
        }
    }
}

async fn write_frame<W>(sink: &mut W, frame: Frame, write_wait: Duration) -> bool
where
    W: Sink<Frame> + Unpin,
    W::Error: Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Write failed");
            false
        }
        Err(_) => {
            debug!("Write deadline expired");
            false
        }
    }
}

/// Drain the outbound queue and ping every `ping_period`.
async fn run_outbound<W>(
    mut sink: W,
    outbound: &mut mpsc::Receiver<String>,
    shutdown: &CancellationToken,
    config: &RealtimeConfig,
) where
    W: Sink<Frame> + Unpin,
    W::Error: Display,
{
    let write_wait = config.write_wait();
    let ping_period = config.ping_period();
    let mut ticker = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                write_frame(&mut sink, Frame::Close, write_wait).await;
                break;
            }
            queued = outbound.recv() => match queued {
                Some(text) => {
                    if !write_frame(&mut sink, Frame::Text(text), write_wait).await {
                        break;
                    }
                }
                None => {
                    write_frame(&mut sink, Frame::Close, write_wait).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !write_frame(&mut sink, Frame::Ping(Vec::new()), write_wait).await {
                    break;
                }
            }
        }
    }
}

/// Run a registered connection until it ends, then unregister it.
pub async fn serve_connection<S, E, W>(
    registry: Arc<ConnectionRegistry>,
    session: ConnectionSession,
    stream: S,
    sink: W,
    inbound: mpsc::Sender<InboundMessage>,
    config: RealtimeConfig,
) where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
    W: Sink<Frame> + Unpin,
    W::Error: Display,
{
    let ConnectionSession {
        id,
        user_id,
        device_id,
        mut outbound,
        shutdown,
    } = session;
    let peer = Peer {
        id,
        user_id,
        device_id,
    };

    let reader = async {
        run_inbound(stream, &peer, &shutdown, inbound, config.pong_wait()).await;
        shutdown.cancel();
    };
    let writer = async {
        run_outbound(sink, &mut outbound, &shutdown, &config).await;
        shutdown.cancel();
    };
    tokio::join!(reader, writer);

    registry.unregister(&peer.id);
}
