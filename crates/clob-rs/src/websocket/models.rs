use serde::Deserialize;
use tokio_tungstenite::tungstenite;

use crate::errors::ClobError;
use crate::serde_util::flexible_f64;

/// One decoded frame from either CLOB websocket channel.
///
/// A single text frame can carry a JSON array of events, so decoding
/// returns a batch. Text-level `"PONG"` heartbeat replies map to [`Self::Pong`].
#[derive(Debug)]
pub enum ClobSocketMessage {
    /// Market channel: one or more price_change events.
    PriceChanges(Vec<PriceChangeMsg>),
    /// User channel: trade and order-lifecycle events, in arrival order.
    UserEvents(Vec<UserEventMsg>),
    /// Reply to our text-level "PING" (ignored by consumers).
    Pong,
    /// Protocol ping from the server.
    Ping,
    /// Anything we do not consume (unknown event types, acks).
    Other(String),
    Close(Option<tungstenite::protocol::frame::CloseFrame>),
}

/// One event from the authenticated user channel.
#[derive(Debug)]
pub enum UserEventMsg {
    /// A trade touching one of our orders.
    Trade(TradeMsg),
    /// Order lifecycle (placement/update/cancellation).
    Order(OrderLifecycleMsg),
}

impl TryFrom<tungstenite::Message> for ClobSocketMessage {
    type Error = ClobError;
    fn try_from(msg: tungstenite::Message) -> Result<ClobSocketMessage, Self::Error> {
        match msg {
            tungstenite::Message::Text(text) => Self::from_textual_message(text.as_str()),
            tungstenite::Message::Ping(_) => Ok(Self::Ping),
            tungstenite::Message::Pong(_) => Ok(Self::Pong),
            tungstenite::Message::Close(c) => Ok(Self::Close(c)),
            other => Ok(Self::Other(format!("{other:?}"))),
        }
    }
}

impl ClobSocketMessage {
    pub fn from_textual_message(s: &str) -> Result<ClobSocketMessage, ClobError> {
        if s == "PONG" {
            return Ok(ClobSocketMessage::Pong);
        }
        let value: serde_json::Value = match serde_json::from_str(s) {
            Ok(v) => v,
            Err(_) => return Ok(ClobSocketMessage::Other(s.to_string())),
        };

        // The server batches events into arrays; a lone object is the
        // degenerate single-event batch.
        let events: Vec<serde_json::Value> = match value {
            serde_json::Value::Array(items) => items,
            obj => vec![obj],
        };

        let mut price_changes: Vec<PriceChangeMsg> = Vec::new();
        let mut user_events: Vec<UserEventMsg> = Vec::new();
        for event in &events {
            match event.get("event_type").and_then(|t| t.as_str()) {
                Some("price_change") => {
                    price_changes.extend(PriceChangeMsg::from_event(event));
                }
                Some("trade") => {
                    let trade: TradeMsg = serde_json::from_value(event.clone())?;
                    user_events.push(UserEventMsg::Trade(trade));
                }
                Some("order") => {
                    let order: OrderLifecycleMsg = serde_json::from_value(event.clone())?;
                    user_events.push(UserEventMsg::Order(order));
                }
                _ => {}
            }
        }

        if !user_events.is_empty() {
            return Ok(ClobSocketMessage::UserEvents(user_events));
        }
        if !price_changes.is_empty() {
            return Ok(ClobSocketMessage::PriceChanges(price_changes));
        }
        Ok(ClobSocketMessage::Other(s.to_string()))
    }
}

/// Best bid/ask for one token after a book change.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeMsg {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub best_bid: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub best_ask: f64,
}

impl PriceChangeMsg {
    /// A price_change event carries either top-level fields or a
    /// `price_changes[]` array of per-token entries.
    fn from_event(event: &serde_json::Value) -> Vec<PriceChangeMsg> {
        let raw: Vec<&serde_json::Value> = match event.get("price_changes") {
            Some(serde_json::Value::Array(items)) => items.iter().collect(),
            _ => vec![event],
        };
        raw.into_iter()
            .filter_map(|v| serde_json::from_value::<PriceChangeMsg>(v.clone()).ok())
            .filter(|p| !p.asset_id.is_empty() && p.best_bid > 0.0 && p.best_ask > 0.0)
            .collect()
    }
}

/// One of our resting orders hit by a trade.
#[derive(Debug, Clone, Deserialize)]
pub struct MakerOrderFill {
    #[serde(default, alias = "id")]
    pub order_id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub matched_amount: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub price: f64,
}

/// User-channel trade event. `side` is the TAKER side; our orders appear
/// in `maker_orders` and our side must be read from our own tracking,
/// never from this field.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeMsg {
    /// MATCHED | MINED | CONFIRMED — only MATCHED is consumed.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub price: f64,
    #[serde(default)]
    pub maker_orders: Vec<MakerOrderFill>,
}

/// User-channel order lifecycle event.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLifecycleMsg {
    #[serde(default, alias = "order_id")]
    pub id: String,
    #[serde(default)]
    pub asset_id: String,
    /// PLACEMENT | UPDATE | CANCELLATION
    #[serde(default, rename = "type")]
    pub event_kind: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub size_matched: f64,
}
