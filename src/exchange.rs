//! Exchange access seam.
//!
//! Everything the trading logic needs from the outside world goes through
//! [`ExchangeApi`], so the state machine can run against a mock in tests.
//! The production impl delegates straight to [`clob_rs::ClobClient`].

use async_trait::async_trait;

use clob_rs::data::endpoints::GammaMarketsQuery;
use clob_rs::data::models::{DataPosition, GammaMarket};
use clob_rs::errors::ClobError;
use clob_rs::markets::models::{OrderBook, PricePoint, SamplingMarketsResponse};
use clob_rs::portfolio::models::{OpenOrder, OrderArgs, OrderRecord, OrderType};
use clob_rs::ClobClient;

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    // Market data
    async fn get_midpoint(&self, token_id: &str) -> Result<f64, ClobError>;
    async fn get_tick_size(&self, token_id: &str) -> Result<f64, ClobError>;
    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ClobError>;
    async fn get_spread(&self, token_id: &str) -> Result<f64, ClobError>;
    async fn get_prices_history(
        &self,
        token_id: &str,
        interval: &str,
        fidelity: u32,
    ) -> Result<Vec<PricePoint>, ClobError>;
    async fn get_neg_risk(&self, token_id: &str) -> Result<bool, ClobError>;
    async fn get_sampling_markets(
        &self,
        next_cursor: &str,
    ) -> Result<SamplingMarketsResponse, ClobError>;

    // Orders
    async fn post_order(&self, args: &OrderArgs, order_type: OrderType)
        -> Result<String, ClobError>;
    async fn cancel(&self, order_id: &str) -> Result<(), ClobError>;
    async fn cancel_all(&self) -> Result<(), ClobError>;
    async fn get_orders(&self) -> Result<Vec<OpenOrder>, ClobError>;
    async fn get_order(&self, order_id: &str) -> Result<OrderRecord, ClobError>;

    // Balances
    async fn get_collateral_balance(&self) -> Result<f64, ClobError>;
    async fn update_balance_allowance(&self, token_id: &str) -> Result<(), ClobError>;

    // Off-exchange reads (Data / Gamma APIs)
    async fn get_my_positions(&self) -> Result<Vec<DataPosition>, ClobError>;
    async fn get_gamma_markets(
        &self,
        query: &GammaMarketsQuery,
    ) -> Result<Vec<GammaMarket>, ClobError>;
    async fn get_gamma_markets_by_token(
        &self,
        token_id: &str,
    ) -> Result<Vec<GammaMarket>, ClobError>;
}

#[async_trait]
impl ExchangeApi for ClobClient {
    async fn get_midpoint(&self, token_id: &str) -> Result<f64, ClobError> {
        ClobClient::get_midpoint(self, token_id).await
    }

    async fn get_tick_size(&self, token_id: &str) -> Result<f64, ClobError> {
        ClobClient::get_tick_size(self, token_id).await
    }

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ClobError> {
        ClobClient::get_order_book(self, token_id).await
    }

    async fn get_spread(&self, token_id: &str) -> Result<f64, ClobError> {
        ClobClient::get_spread(self, token_id).await
    }

    async fn get_prices_history(
        &self,
        token_id: &str,
        interval: &str,
        fidelity: u32,
    ) -> Result<Vec<PricePoint>, ClobError> {
        ClobClient::get_prices_history(self, token_id, interval, fidelity).await
    }

    async fn get_neg_risk(&self, token_id: &str) -> Result<bool, ClobError> {
        ClobClient::get_neg_risk(self, token_id).await
    }

    async fn get_sampling_markets(
        &self,
        next_cursor: &str,
    ) -> Result<SamplingMarketsResponse, ClobError> {
        ClobClient::get_sampling_markets(self, next_cursor).await
    }

    async fn post_order(
        &self,
        args: &OrderArgs,
        order_type: OrderType,
    ) -> Result<String, ClobError> {
        ClobClient::post_order(self, args, order_type).await
    }

    async fn cancel(&self, order_id: &str) -> Result<(), ClobError> {
        ClobClient::cancel(self, order_id).await
    }

    async fn cancel_all(&self) -> Result<(), ClobError> {
        ClobClient::cancel_all(self).await
    }

    async fn get_orders(&self) -> Result<Vec<OpenOrder>, ClobError> {
        ClobClient::get_orders(self).await
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderRecord, ClobError> {
        ClobClient::get_order(self, order_id).await
    }

    async fn get_collateral_balance(&self) -> Result<f64, ClobError> {
        ClobClient::get_collateral_balance(self).await
    }

    async fn update_balance_allowance(&self, token_id: &str) -> Result<(), ClobError> {
        ClobClient::update_balance_allowance(self, token_id).await
    }

    async fn get_my_positions(&self) -> Result<Vec<DataPosition>, ClobError> {
        let wallet = format!("{:?}", self.account().funder_address());
        ClobClient::get_user_positions(self, &wallet).await
    }

    async fn get_gamma_markets(
        &self,
        query: &GammaMarketsQuery,
    ) -> Result<Vec<GammaMarket>, ClobError> {
        ClobClient::get_gamma_markets(self, query).await
    }

    async fn get_gamma_markets_by_token(
        &self,
        token_id: &str,
    ) -> Result<Vec<GammaMarket>, ClobError> {
        ClobClient::get_gamma_markets_by_token(self, token_id).await
    }
}
