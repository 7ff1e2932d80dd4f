use std::time::Instant;

use crate::types::{OrderSide, Side};

/// An order we believe is resting on the exchange.
#[derive(Debug, Clone)]
pub struct ActiveOrder {
    pub order_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    /// Remaining size; reduced on partial fills.
    pub size: f64,
    pub condition_id: String,
    pub placed_at: Instant,
    pub midpoint_at_placement: f64,
}

/// Per-outcome inventory and cooldown state.
#[derive(Debug, Clone, Default)]
pub struct SideState {
    /// Shares held from filled BUYs. Never negative.
    pub inventory: f64,
    /// Acquisition price, for stop-loss. 0 when flat.
    pub entry_price: f64,
    /// Recent BUY fill times, for runaway-fill detection.
    pub fill_times: Vec<Instant>,
    /// Most recent SELL fill; drives the re-entry cooldown.
    pub last_sell_fill: Option<Instant>,
    /// Too many fills in the cooldown window; cleared on rescan.
    pub blocked: bool,
}

/// Authoritative local state for one market we are quoting.
#[derive(Debug, Clone)]
pub struct MarketPosition {
    pub condition_id: String,
    pub token_id_yes: String,
    pub token_id_no: String,
    pub max_spread: f64,
    pub min_size: f64,
    pub tick_size: f64,
    /// The midpoint the current quotes are priced against.
    pub last_midpoint: f64,
    pub orders: Vec<ActiveOrder>,
    pub yes: SideState,
    pub no: SideState,
}

impl MarketPosition {
    pub fn new(
        condition_id: String,
        token_id_yes: String,
        token_id_no: String,
        max_spread: f64,
        min_size: f64,
        tick_size: f64,
        last_midpoint: f64,
    ) -> Self {
        Self {
            condition_id,
            token_id_yes,
            token_id_no,
            max_spread,
            min_size,
            tick_size,
            last_midpoint,
            orders: Vec::new(),
            yes: SideState::default(),
            no: SideState::default(),
        }
    }

    pub fn side(&self, side: Side) -> &SideState {
        match side {
            Side::Yes => &self.yes,
            Side::No => &self.no,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideState {
        match side {
            Side::Yes => &mut self.yes,
            Side::No => &mut self.no,
        }
    }

    pub fn token_id(&self, side: Side) -> &str {
        match side {
            Side::Yes => &self.token_id_yes,
            Side::No => &self.token_id_no,
        }
    }

    /// Which outcome a token id belongs to, if either.
    pub fn side_for_token(&self, token_id: &str) -> Option<Side> {
        if token_id == self.token_id_yes {
            Some(Side::Yes)
        } else if token_id == self.token_id_no {
            Some(Side::No)
        } else {
            None
        }
    }

    pub fn find_order(&self, order_id: &str) -> Option<&ActiveOrder> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    pub fn sell_for(&self, token_id: &str) -> Option<&ActiveOrder> {
        self.orders
            .iter()
            .find(|o| o.side == OrderSide::Sell && o.token_id == token_id)
    }

    pub fn has_sell_for(&self, token_id: &str) -> bool {
        self.sell_for(token_id).is_some()
    }

    pub fn has_buy_for(&self, token_id: &str) -> bool {
        self.orders
            .iter()
            .any(|o| o.side == OrderSide::Buy && o.token_id == token_id)
    }

    pub fn has_any_buy(&self) -> bool {
        self.orders.iter().any(|o| o.side == OrderSide::Buy)
    }

    pub fn buy_orders(&self) -> Vec<ActiveOrder> {
        self.orders
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .cloned()
            .collect()
    }

    pub fn sell_orders(&self) -> Vec<ActiveOrder> {
        self.orders
            .iter()
            .filter(|o| o.side == OrderSide::Sell)
            .cloned()
            .collect()
    }

    pub fn drop_order(&mut self, order_id: &str) {
        self.orders.retain(|o| o.order_id != order_id);
    }

    pub fn drop_buys(&mut self) {
        self.orders.retain(|o| o.side != OrderSide::Buy);
    }

    pub fn drop_sells_for(&mut self, token_id: &str) {
        self.orders
            .retain(|o| !(o.side == OrderSide::Sell && o.token_id == token_id));
    }

    pub fn has_inventory(&self) -> bool {
        self.yes.inventory > 0.0 || self.no.inventory > 0.0
    }

    /// A position is dead once both the order list and both inventories
    /// are empty; the manager then drops it.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && !self.has_inventory()
    }

    /// Apply a SELL fill: decrement inventory (floored at zero); when the
    /// side goes flat, clear the entry price and start the cooldown.
    pub fn apply_sell_fill(&mut self, side: Side, size: f64, now: Instant) {
        let state = self.side_mut(side);
        state.inventory = (state.inventory - size).max(0.0);
        if state.inventory == 0.0 {
            state.entry_price = 0.0;
            state.last_sell_fill = Some(now);
        }
    }

    /// Apply a BUY fill: bump inventory, reset the entry price and record
    /// the fill time for runaway detection.
    pub fn apply_buy_fill(&mut self, side: Side, size: f64, price: f64, now: Instant) {
        let state = self.side_mut(side);
        state.inventory += size;
        state.entry_price = price;
        state.fill_times.push(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn position() -> MarketPosition {
        MarketPosition::new(
            "0xc0ffee".into(),
            "111".into(),
            "222".into(),
            0.03,
            50.0,
            0.01,
            0.50,
        )
    }

    fn order(id: &str, token: &str, side: OrderSide) -> ActiveOrder {
        ActiveOrder {
            order_id: id.into(),
            token_id: token.into(),
            side,
            price: 0.48,
            size: 50.0,
            condition_id: "0xc0ffee".into(),
            placed_at: Instant::now(),
            midpoint_at_placement: 0.50,
        }
    }

    #[test]
    fn side_for_token_maps_both_tokens() {
        let pos = position();
        assert_eq!(pos.side_for_token("111"), Some(Side::Yes));
        assert_eq!(pos.side_for_token("222"), Some(Side::No));
        assert_eq!(pos.side_for_token("333"), None);
    }

    #[test]
    fn sell_fill_floors_inventory_at_zero_and_starts_cooldown() {
        let mut pos = position();
        pos.yes.inventory = 30.0;
        pos.yes.entry_price = 0.48;
        pos.apply_sell_fill(Side::Yes, 50.0, Instant::now());
        assert_eq!(pos.yes.inventory, 0.0);
        assert_eq!(pos.yes.entry_price, 0.0);
        assert!(pos.yes.last_sell_fill.is_some());
    }

    #[test]
    fn partial_sell_fill_keeps_entry_price() {
        let mut pos = position();
        pos.yes.inventory = 50.0;
        pos.yes.entry_price = 0.48;
        pos.apply_sell_fill(Side::Yes, 20.0, Instant::now());
        assert_eq!(pos.yes.inventory, 30.0);
        assert_eq!(pos.yes.entry_price, 0.48);
        assert!(pos.yes.last_sell_fill.is_none());
    }

    #[test]
    fn buy_fill_records_entry_and_fill_time() {
        let mut pos = position();
        let t0 = Instant::now() - Duration::from_secs(1);
        pos.apply_buy_fill(Side::No, 50.0, 0.47, t0);
        assert_eq!(pos.no.inventory, 50.0);
        assert_eq!(pos.no.entry_price, 0.47);
        assert_eq!(pos.no.fill_times.len(), 1);
    }

    #[test]
    fn empty_means_no_orders_and_no_inventory() {
        let mut pos = position();
        assert!(pos.is_empty());
        pos.orders.push(order("a", "111", OrderSide::Buy));
        assert!(!pos.is_empty());
        pos.drop_buys();
        assert!(pos.is_empty());
        pos.no.inventory = 1.0;
        assert!(!pos.is_empty());
    }

    #[test]
    fn order_filters_distinguish_sides_and_tokens() {
        let mut pos = position();
        pos.orders.push(order("a", "111", OrderSide::Buy));
        pos.orders.push(order("b", "222", OrderSide::Buy));
        pos.orders.push(order("c", "111", OrderSide::Sell));
        assert!(pos.has_buy_for("111"));
        assert!(pos.has_sell_for("111"));
        assert!(!pos.has_sell_for("222"));
        assert_eq!(pos.buy_orders().len(), 2);
        assert_eq!(pos.sell_orders().len(), 1);
        pos.drop_sells_for("111");
        assert!(!pos.has_sell_for("111"));
        assert_eq!(pos.orders.len(), 2);
    }
}
