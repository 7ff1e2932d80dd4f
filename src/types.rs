pub use clob_rs::portfolio::models::OrderSide;

/// Outcome side of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

/// A detected fill, from either the stream or the REST sync path.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub condition_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
}

/// Market channel: best bid/ask after a book change.
#[derive(Debug, Clone)]
pub struct PriceEvent {
    pub asset_id: String,
    pub best_bid: f64,
    pub best_ask: f64,
}

impl PriceEvent {
    pub fn midpoint(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }
}

/// User channel: a trade matched against one of our orders.
///
/// `taker_side` is the aggressor's side from the event; our own side must
/// be read from the tracked order, never from this field.
#[derive(Debug, Clone)]
pub struct TradeEvent {
    pub order_id: String,
    pub asset_id: String,
    pub taker_side: String,
    pub size_matched: f64,
    pub price: f64,
    /// MATCHED | MINED | CONFIRMED — only MATCHED is consumed.
    pub status: String,
}

/// User channel: order lifecycle (placement/update/cancellation).
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub order_id: String,
    pub asset_id: String,
    pub event_kind: String,
    pub size_matched: f64,
}

#[derive(Debug, Clone)]
pub enum UserEvent {
    Trade(TradeEvent),
    Order(OrderEvent),
}

/// Freshest best bid/ask per token, written by the market stream worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopOfBook {
    pub best_bid: f64,
    pub best_ask: f64,
}

/// Commands sent to a stream worker so it can extend its subscriptions.
/// The worker keeps the full set locally for resubscribe-on-reconnect.
#[derive(Debug, Clone)]
pub enum WsCommand {
    Subscribe(Vec<String>),
}
