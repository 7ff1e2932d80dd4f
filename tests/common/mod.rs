//! In-memory exchange double for driving the order state machine.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use clob_rs::data::endpoints::GammaMarketsQuery;
use clob_rs::data::models::{DataPosition, GammaMarket};
use clob_rs::errors::ClobError;
use clob_rs::markets::models::{OrderBook, PricePoint, SamplingMarketsResponse};
use clob_rs::portfolio::models::{OpenOrder, OrderArgs, OrderRecord, OrderSide, OrderType};

use polymarket_bot::exchange::ExchangeApi;

/// One order the state machine asked the exchange to place.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub id: String,
    pub token_id: String,
    pub price: f64,
    pub size: f64,
    pub side: OrderSide,
    pub order_type: OrderType,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub midpoints: HashMap<String, f64>,
    pub tick_sizes: HashMap<String, f64>,
    pub spreads: HashMap<String, f64>,
    pub histories: HashMap<String, Vec<f64>>,
    pub books: HashMap<String, OrderBook>,
    /// Order ids the listing endpoint currently reports as open.
    pub live_order_ids: HashSet<String>,
    /// id -> (status, size_matched) for the get-order endpoint.
    pub order_statuses: HashMap<String, (String, f64)>,
    /// token -> on-chain share balance (Data API view).
    pub chain_positions: HashMap<String, f64>,
    pub collateral_balance: f64,
    pub placed: Vec<PlacedOrder>,
    pub cancelled: Vec<String>,
    /// Every order placement is rejected.
    pub reject_all: bool,
    /// Only SELL placements are rejected (settlement delays).
    pub reject_sells: bool,
    next_id: u64,
}

pub struct MockExchange {
    pub state: Mutex<MockState>,
}

#[allow(dead_code)]
impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                collateral_balance: 1000.0,
                ..MockState::default()
            }),
        }
    }

    pub fn set_midpoint(&self, token_id: &str, mid: f64) {
        self.state
            .lock()
            .unwrap()
            .midpoints
            .insert(token_id.to_string(), mid);
    }

    pub fn set_chain_position(&self, token_id: &str, size: f64) {
        self.state
            .lock()
            .unwrap()
            .chain_positions
            .insert(token_id.to_string(), size);
    }

    pub fn set_reject_sells(&self, reject: bool) {
        self.state.lock().unwrap().reject_sells = reject;
    }

    pub fn placed(&self) -> Vec<PlacedOrder> {
        self.state.lock().unwrap().placed.clone()
    }

    pub fn placed_sells(&self) -> Vec<PlacedOrder> {
        self.placed()
            .into_iter()
            .filter(|o| o.side == OrderSide::Sell)
            .collect()
    }

    pub fn placed_buys(&self) -> Vec<PlacedOrder> {
        self.placed()
            .into_iter()
            .filter(|o| o.side == OrderSide::Buy)
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock().unwrap();
        state.placed.clear();
        state.cancelled.clear();
    }

    /// Pretend the listing endpoint no longer shows this order.
    pub fn vanish_order(&self, order_id: &str) {
        self.state.lock().unwrap().live_order_ids.remove(order_id);
    }

    pub fn set_order_status(&self, order_id: &str, status: &str, size_matched: f64) {
        self.state
            .lock()
            .unwrap()
            .order_statuses
            .insert(order_id.to_string(), (status.to_string(), size_matched));
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn get_midpoint(&self, token_id: &str) -> Result<f64, ClobError> {
        self.state
            .lock()
            .unwrap()
            .midpoints
            .get(token_id)
            .copied()
            .ok_or_else(|| ClobError::Other(format!("no midpoint for {token_id}")))
    }

    async fn get_tick_size(&self, token_id: &str) -> Result<f64, ClobError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tick_sizes
            .get(token_id)
            .copied()
            .unwrap_or(0.01))
    }

    async fn get_order_book(&self, token_id: &str) -> Result<OrderBook, ClobError> {
        self.state
            .lock()
            .unwrap()
            .books
            .get(token_id)
            .cloned()
            .ok_or(ClobError::DeadMarket)
    }

    async fn get_spread(&self, token_id: &str) -> Result<f64, ClobError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .spreads
            .get(token_id)
            .copied()
            .unwrap_or(0.02))
    }

    async fn get_prices_history(
        &self,
        token_id: &str,
        _interval: &str,
        _fidelity: u32,
    ) -> Result<Vec<PricePoint>, ClobError> {
        let state = self.state.lock().unwrap();
        let prices = state.histories.get(token_id).cloned().unwrap_or_default();
        Ok(prices
            .into_iter()
            .enumerate()
            .map(|(i, p)| PricePoint { t: i as i64, p })
            .collect())
    }

    async fn get_neg_risk(&self, _token_id: &str) -> Result<bool, ClobError> {
        Ok(false)
    }

    async fn get_sampling_markets(
        &self,
        _next_cursor: &str,
    ) -> Result<SamplingMarketsResponse, ClobError> {
        Ok(SamplingMarketsResponse {
            data: Vec::new(),
            next_cursor: "LTE=".to_string(),
        })
    }

    async fn post_order(
        &self,
        args: &OrderArgs,
        order_type: OrderType,
    ) -> Result<String, ClobError> {
        let mut state = self.state.lock().unwrap();
        if state.reject_all || (state.reject_sells && args.side == OrderSide::Sell) {
            return Err(ClobError::OrderRejected("not enough balance".to_string()));
        }
        state.next_id += 1;
        let id = format!("0xorder{}", state.next_id);
        state.placed.push(PlacedOrder {
            id: id.clone(),
            token_id: args.token_id.clone(),
            price: args.price,
            size: args.size,
            side: args.side,
            order_type,
        });
        state.live_order_ids.insert(id.clone());
        Ok(id)
    }

    async fn cancel(&self, order_id: &str) -> Result<(), ClobError> {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(order_id.to_string());
        state.live_order_ids.remove(order_id);
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), ClobError> {
        self.state.lock().unwrap().live_order_ids.clear();
        Ok(())
    }

    async fn get_orders(&self) -> Result<Vec<OpenOrder>, ClobError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .live_order_ids
            .iter()
            .map(|id| OpenOrder {
                id: id.clone(),
                status: "LIVE".to_string(),
                market: String::new(),
                asset_id: String::new(),
                side: String::new(),
                price: 0.0,
                original_size: 0.0,
                size_matched: 0.0,
            })
            .collect())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderRecord, ClobError> {
        let state = self.state.lock().unwrap();
        match state.order_statuses.get(order_id) {
            Some((status, size_matched)) => Ok(OrderRecord {
                id: order_id.to_string(),
                status: status.clone(),
                size_matched: *size_matched,
            }),
            None if state.live_order_ids.contains(order_id) => Ok(OrderRecord {
                id: order_id.to_string(),
                status: "LIVE".to_string(),
                size_matched: 0.0,
            }),
            None => Err(ClobError::Other("order not found".to_string())),
        }
    }

    async fn get_collateral_balance(&self) -> Result<f64, ClobError> {
        Ok(self.state.lock().unwrap().collateral_balance)
    }

    async fn update_balance_allowance(&self, _token_id: &str) -> Result<(), ClobError> {
        Ok(())
    }

    async fn get_my_positions(&self) -> Result<Vec<DataPosition>, ClobError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .chain_positions
            .iter()
            .map(|(token, size)| DataPosition {
                asset: token.clone(),
                size: *size,
                title: String::new(),
                outcome: String::new(),
            })
            .collect())
    }

    async fn get_gamma_markets(
        &self,
        _query: &GammaMarketsQuery,
    ) -> Result<Vec<GammaMarket>, ClobError> {
        Ok(Vec::new())
    }

    async fn get_gamma_markets_by_token(
        &self,
        _token_id: &str,
    ) -> Result<Vec<GammaMarket>, ClobError> {
        Ok(Vec::new())
    }
}
