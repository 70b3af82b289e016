//! Live candle stream sessions.
//!
//! One session = one socket + one subscribe request. The session task
//! forwards parsed events until the peer closes, the heartbeat lapses, or
//! the handle stops it; the event channel closing is the caller's
//! disconnect signal. Reconnecting belongs to the collector worker.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use candela_core::connector::StreamEvent;
use candela_core::error::CandelaError;
use candela_core::stream::StreamHandle;
use candela_core::types::{Symbol, Timeframe};

use crate::wire::{self, WsRequest};

const PING_INTERVAL: Duration = Duration::from_secs(20);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_GRACE: Duration = Duration::from_secs(10);

pub(crate) async fn open_session(
    ws_url: &str,
    symbol: &Symbol,
    timeframes: &[Timeframe],
) -> Result<(StreamHandle, mpsc::Receiver<StreamEvent>), CandelaError> {
    let (socket, _response) = connect_async(ws_url)
        .await
        .map_err(|e| CandelaError::venue("okx", e))?;
    let (mut sink, mut source) = socket.split();

    let request =
        serde_json::to_string(&WsRequest::subscribe(symbol, timeframes)).map_err(CandelaError::wire)?;
    sink.send(Message::Text(request))
        .await
        .map_err(|e| CandelaError::venue("okx", e))?;
    debug!(%symbol, channels = timeframes.len(), "candle subscription sent");

    let (tx, rx) = mpsc::channel(256);
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let symbol = symbol.clone();

    let join = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(PING_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it
        heartbeat.tick().await;
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = heartbeat.tick() => {
                    if last_inbound.elapsed() > PING_INTERVAL + PONG_TIMEOUT {
                        warn!(%symbol, "heartbeat lapsed, dropping session");
                        break;
                    }
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                frame = source.next() => {
                    let Some(frame) = frame else { break };
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(%symbol, error = %e, "socket read failed");
                            break;
                        }
                    };
                    last_inbound = Instant::now();
                    match frame {
                        Message::Text(text) => {
                            let events = match wire::parse_frame(&text) {
                                Ok(events) => events,
                                Err(e) => {
                                    let preview: String = text.chars().take(200).collect();
                                    warn!(%symbol, error = %e, payload = %preview, "malformed frame");
                                    vec![StreamEvent::VenueError { code: None, msg: e.to_string() }]
                                }
                            };
                            for event in events {
                                if tx.send(event).await.is_err() {
                                    // receiver gone; nothing left to feed
                                    let _ = tokio::time::timeout(
                                        CLOSE_GRACE,
                                        sink.send(Message::Close(None)),
                                    )
                                    .await;
                                    return;
                                }
                            }
                        }
                        Message::Ping(payload) => {
                            let _ = sink.send(Message::Pong(payload)).await;
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }
        let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await;
        debug!(%symbol, "candle session ended");
    });

    Ok((StreamHandle::new(join, stop_tx), rx))
}
