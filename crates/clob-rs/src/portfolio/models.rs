use serde::{Deserialize, Serialize};

use crate::serde_util::flexible_f64;
use crate::signing::{SignedOrder, SIDE_BUY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            OrderSide::Buy => crate::signing::SIDE_BUY,
            OrderSide::Sell => crate::signing::SIDE_SELL,
        }
    }
}

/// Time-in-force for order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Resting good-till-cancelled limit order.
    Gtc,
    /// Fill-or-kill (used for sub-minimum SELLs).
    Fok,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Gtc => "GTC",
            OrderType::Fok => "FOK",
        }
    }
}

/// Caller-facing order parameters; signing details are filled in by the
/// client.
#[derive(Debug, Clone)]
pub struct OrderArgs {
    pub token_id: String,
    pub price: f64,
    pub size: f64,
    pub side: OrderSide,
}

/// JSON shape of a signed order as POSTed to the exchange. Large integers
/// ship as decimal strings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub salt: u64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: String,
    pub signature_type: u8,
    pub signature: String,
}

impl From<&SignedOrder> for OrderPayload {
    fn from(o: &SignedOrder) -> Self {
        OrderPayload {
            salt: o.salt,
            maker: format!("{:?}", o.maker),
            signer: format!("{:?}", o.signer),
            taker: format!("{:?}", o.taker),
            token_id: o.token_id.to_string(),
            maker_amount: o.maker_amount.to_string(),
            taker_amount: o.taker_amount.to_string(),
            expiration: o.expiration.to_string(),
            nonce: o.nonce.to_string(),
            fee_rate_bps: o.fee_rate_bps.to_string(),
            side: if o.side == SIDE_BUY { "BUY" } else { "SELL" }.to_string(),
            signature_type: o.signature_type,
            signature: o.signature.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderRequest {
    pub order: OrderPayload,
    pub owner: String,
    pub order_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostOrderResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default, rename = "errorMsg")]
    pub error_msg: Option<String>,
    #[serde(default, rename = "orderID", alias = "orderId")]
    pub order_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    #[serde(rename = "orderID")]
    pub order_id: String,
}

/// One open order from the listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub side: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub price: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub original_size: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub size_matched: f64,
}

/// Definitive per-order record from the get-order endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub size_matched: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAllowanceResponse {
    #[serde(default, deserialize_with = "flexible_f64")]
    pub balance: f64,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub allowance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_order_response_aliases_both_id_spellings() {
        let a: PostOrderResponse =
            serde_json::from_str(r#"{"success": true, "orderID": "0x1"}"#).unwrap();
        let b: PostOrderResponse =
            serde_json::from_str(r#"{"success": true, "orderId": "0x2"}"#).unwrap();
        assert_eq!(a.order_id.as_deref(), Some("0x1"));
        assert_eq!(b.order_id.as_deref(), Some("0x2"));
    }

    #[test]
    fn rejection_carries_error_msg() {
        let r: PostOrderResponse =
            serde_json::from_str(r#"{"success": false, "errorMsg": "not enough balance"}"#)
                .unwrap();
        assert!(!r.success);
        assert_eq!(r.error_msg.as_deref(), Some("not enough balance"));
    }

    #[test]
    fn open_order_parses_string_sizes() {
        let o: OpenOrder = serde_json::from_str(
            r#"{"id": "0xabc", "status": "LIVE", "market": "0xc", "asset_id": "77",
                "side": "BUY", "price": "0.48", "original_size": "50", "size_matched": "0"}"#,
        )
        .unwrap();
        assert_eq!(o.price, 0.48);
        assert_eq!(o.original_size, 50.0);
    }
}
