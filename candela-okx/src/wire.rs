//! OKX v5 wire formats, shared by the stream session and the REST client.
//!
//! Candle rows arrive as 9-element string arrays:
//! `[ts, open, high, low, close, volume, volCcy, volCcyQuote, confirm]`,
//! where `confirm == "1"` marks a closed bucket.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use candela_core::connector::StreamEvent;
use candela_core::error::CandelaError;
use candela_core::types::{Candle, Symbol, Timeframe};

pub(crate) const CODE_SUCCESS: &str = "0";

/// One subscription argument: a candle channel for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelArg {
    /// Channel name, e.g. `candle1H`.
    pub channel: String,
    /// Instrument id, e.g. `BTC-USDT-SWAP`.
    pub inst_id: String,
}

/// Outbound subscribe/unsubscribe request.
#[derive(Debug, Serialize)]
pub struct WsRequest {
    pub op: &'static str,
    pub args: Vec<ChannelArg>,
}

impl WsRequest {
    /// Build the subscribe request for one symbol across `timeframes`.
    pub fn subscribe(symbol: &Symbol, timeframes: &[Timeframe]) -> Self {
        Self {
            op: "subscribe",
            args: timeframes
                .iter()
                .map(|tf| ChannelArg {
                    channel: tf.channel(),
                    inst_id: symbol.as_str().to_owned(),
                })
                .collect(),
        }
    }
}

// The venue multiplexes acks, errors, and data over one socket; the shape is
// distinguished by which fields are present.
#[derive(Debug, Deserialize)]
struct RawInbound {
    event: Option<String>,
    code: Option<String>,
    msg: Option<String>,
    arg: Option<ChannelArg>,
    data: Option<Vec<Vec<String>>>,
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, CandelaError> {
    Decimal::from_str(raw).map_err(|_| CandelaError::wire(format!("bad {field}: {raw:?}")))
}

/// Decode one candle row for the channel identified by `arg`.
///
/// # Errors
/// Fails on short rows, unknown channels, or unparseable numbers.
pub fn parse_candle_row(arg: &ChannelArg, row: &[String]) -> Result<(Candle, bool), CandelaError> {
    if row.len() < 9 {
        return Err(CandelaError::wire(format!(
            "candle row has {} fields, expected 9",
            row.len()
        )));
    }
    let timeframe = Timeframe::from_channel(&arg.channel)
        .ok_or_else(|| CandelaError::wire(format!("unknown candle channel: {}", arg.channel)))?;
    let timestamp_ms: i64 = row[0]
        .parse()
        .map_err(|_| CandelaError::wire(format!("bad timestamp: {:?}", row[0])))?;
    let candle = Candle {
        symbol: Symbol::from(arg.inst_id.as_str()),
        timeframe,
        timestamp_ms,
        open: parse_decimal("open", &row[1])?,
        high: parse_decimal("high", &row[2])?,
        low: parse_decimal("low", &row[3])?,
        close: parse_decimal("close", &row[4])?,
        volume: parse_decimal("volume", &row[5])?,
    };
    Ok((candle, row[8] == "1"))
}

/// Parse one inbound socket frame into stream events.
///
/// Ack and error frames yield a single event; data frames yield one event
/// per candle row. Rows that fail to decode are dropped with a wire error
/// so one bad row cannot poison its batch.
///
/// # Errors
/// Fails when the frame itself is not valid JSON or has no recognizable
/// shape.
pub fn parse_frame(text: &str) -> Result<Vec<StreamEvent>, CandelaError> {
    let raw: RawInbound = serde_json::from_str(text).map_err(CandelaError::wire)?;

    match raw.event.as_deref() {
        Some("subscribe") => {
            let channel = raw.arg.map(|arg| arg.channel).unwrap_or_default();
            return Ok(vec![StreamEvent::Subscribed { channel }]);
        }
        Some("error") => {
            return Ok(vec![StreamEvent::VenueError {
                code: raw.code,
                msg: raw.msg.unwrap_or_default(),
            }]);
        }
        // "unsubscribe" acks and channel-conn-count notices carry nothing
        // the collector acts on
        Some(_) => return Ok(Vec::new()),
        None => {}
    }

    let (Some(arg), Some(data)) = (raw.arg, raw.data) else {
        return Err(CandelaError::wire("frame has neither event nor data"));
    };
    let mut events = Vec::with_capacity(data.len());
    for row in &data {
        match parse_candle_row(&arg, row) {
            Ok((candle, confirmed)) => events.push(StreamEvent::Candle { candle, confirmed }),
            Err(e) => events.push(StreamEvent::VenueError {
                code: None,
                msg: e.to_string(),
            }),
        }
    }
    Ok(events)
}

/// REST response envelope for `/api/v5/market/candles`.
#[derive(Debug, Deserialize)]
pub struct RestResponse {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<Vec<String>>,
}
