//! Order placement, cancellation and balance endpoints (authenticated).

use crate::client::ClobClient;
use crate::errors::ClobError;
use crate::portfolio::models::{
    BalanceAllowanceResponse, CancelOrderRequest, OpenOrder, OrderArgs, OrderPayload, OrderRecord,
    OrderType, PostOrderRequest, PostOrderResponse,
};
use crate::signing;

const POST_ORDER: &str = "/order";
const CANCEL_ORDER: &str = "/order";
const CANCEL_ALL: &str = "/cancel-all";
const GET_ORDERS: &str = "/data/orders";
const GET_ORDER: &str = "/data/order/";
const GET_BALANCE_ALLOWANCE: &str = "/balance-allowance";
const UPDATE_BALANCE_ALLOWANCE: &str = "/balance-allowance/update";

/// USDC on-chain scale (6 decimals).
const COLLATERAL_SCALE: f64 = 1_000_000.0;

impl ClobClient {
    /// Sign and submit an order. GTC rests on the book; FOK fills
    /// immediately or not at all.
    ///
    /// Returns the exchange order id. A `success=false` response maps to
    /// [`ClobError::OrderRejected`] so callers can branch without string
    /// matching.
    pub async fn post_order(
        &self,
        args: &OrderArgs,
        order_type: OrderType,
    ) -> Result<String, ClobError> {
        // The exchange contract differs for shared-collateral markets.
        let neg_risk = self.get_neg_risk(&args.token_id).await.unwrap_or(false);
        let signed = signing::build_and_sign_order(
            &self.account,
            &args.token_id,
            args.price,
            args.size,
            args.side.to_u8(),
            neg_risk,
        )?;
        let creds = self.require_creds()?;
        let request = PostOrderRequest {
            order: OrderPayload::from(&signed),
            owner: creds.api_key.clone(),
            order_type: order_type.as_str().to_string(),
        };

        let resp = self.authenticated_post(POST_ORDER, &request).await?;
        let data: PostOrderResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        if !data.success {
            return Err(ClobError::OrderRejected(
                data.error_msg.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        data.order_id
            .ok_or_else(|| ClobError::Other(format!("no order id in response: {resp}")))
    }

    /// Cancel a single order by exchange id.
    pub async fn cancel(&self, order_id: &str) -> Result<(), ClobError> {
        let body = CancelOrderRequest {
            order_id: order_id.to_string(),
        };
        self.authenticated_delete(CANCEL_ORDER, Some(&body)).await?;
        Ok(())
    }

    /// Cancel every open order for this account.
    pub async fn cancel_all(&self) -> Result<(), ClobError> {
        self.authenticated_delete::<()>(CANCEL_ALL, None).await?;
        Ok(())
    }

    /// List all open orders. Eventually consistent: freshly placed orders
    /// can lag and filled orders can linger for a few seconds.
    pub async fn get_orders(&self) -> Result<Vec<OpenOrder>, ClobError> {
        let resp = self.authenticated_get(GET_ORDERS).await?;
        let data: Vec<OpenOrder> = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data)
    }

    /// Definitive status for one order
    /// (status ∈ MATCHED | CANCELLED | EXPIRED | LIVE).
    pub async fn get_order(&self, order_id: &str) -> Result<OrderRecord, ClobError> {
        let path = format!("{}{}", GET_ORDER, order_id);
        let resp = self.authenticated_get(&path).await?;
        let data: OrderRecord = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data)
    }

    /// Free USDC balance, in dollars.
    pub async fn get_collateral_balance(&self) -> Result<f64, ClobError> {
        let path = format!(
            "{}?asset_type=COLLATERAL&signature_type={}",
            GET_BALANCE_ALLOWANCE, self.account.signature_type
        );
        let resp = self.authenticated_get(&path).await?;
        let data: BalanceAllowanceResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data.balance / COLLATERAL_SCALE)
    }

    /// Conditional-token balance for one token id, in shares.
    pub async fn get_conditional_balance(&self, token_id: &str) -> Result<f64, ClobError> {
        let path = format!(
            "{}?asset_type=CONDITIONAL&token_id={}&signature_type={}",
            GET_BALANCE_ALLOWANCE, token_id, self.account.signature_type
        );
        let resp = self.authenticated_get(&path).await?;
        let data: BalanceAllowanceResponse = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(data.balance / COLLATERAL_SCALE)
    }

    /// Refresh the exchange's cached allowance for a conditional token.
    /// Required before SELLing shares acquired since the last refresh.
    pub async fn update_balance_allowance(&self, token_id: &str) -> Result<(), ClobError> {
        let path = format!(
            "{}?asset_type=CONDITIONAL&token_id={}&signature_type={}",
            UPDATE_BALANCE_ALLOWANCE, token_id, self.account.signature_type
        );
        self.authenticated_get(&path).await?;
        Ok(())
    }
}
