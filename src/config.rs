#[derive(Debug, Clone)]
pub struct Config {
    // --- Strategy parameters ---
    // Place orders at (max_spread * (1 - fraction)) from midpoint.
    // 0.40 = use 60% of the reward range as distance, keeping 40% closer to mid.
    pub spread_buffer_fraction: f64,
    // Floor: never less than 0.2 cents buffer regardless of max_spread.
    pub min_spread_buffer: f64,

    // Re-adjust orders when midpoint drifts > this fraction of max_spread.
    // Must be < spread_buffer_fraction to detect drift before leaving range.
    pub drift_threshold_fraction: f64,
    // Floor: never less than 0.5 cents drift threshold.
    pub min_drift_threshold: f64,

    // 0 = no hard cap (dynamic formula decides based on balance).
    pub max_markets_cap: usize,
    // Heuristic for "how many markets can we enter". Orders don't lock
    // collateral; the circuit breaker caps actual fill exposure.
    pub cost_per_market_estimate: f64,
    // Keep this fraction of balance as reserve for drift adjustments.
    pub balance_reserve_fraction: f64,

    // --- Cadence (seconds) ---
    // REST-only fallback pace for fill sync and midpoint checks.
    pub monitor_interval_s: u64,
    // Full market re-ranking cycle.
    pub rescan_interval_s: u64,
    // Newly placed orders may not appear in the listing immediately.
    // Treat younger orders as still alive (prevents phantom fills).
    pub order_grace_period_s: u64,
    // REST fill-sync safety net while streams are healthy.
    pub rest_fallback_interval_s: u64,
    // No BUY placement this long after process start: streams connect and
    // inventory reconciles first.
    pub startup_cooldown_s: u64,
    // Status heartbeat in the log.
    pub status_interval_s: u64,
    // Sweep for on-chain shares with no SELL anywhere.
    pub force_sell_sweep_interval_s: u64,

    // --- Market filtering thresholds ---
    // How many pre-filtered candidates get orderbook detail fetches.
    pub detail_candidates: usize,
    pub min_reward_rate: f64,
    pub max_book_depth_usdc: f64,
    pub min_book_depth_usdc: f64,
    pub min_daily_volume: f64,
    pub min_max_spread: f64,
    // Skip markets where current_spread > max_spread * this: no active LPs
    // means we'd be the sole provider and get adversely selected.
    pub max_spread_ratio: f64,
    // Skip markets where 24h price range / max_spread exceeds this.
    pub max_volatility_ratio: f64,
    pub min_volatility_data_points: usize,
    // Max markets from the same Gamma event group (correlated fills).
    pub max_markets_per_event: usize,
    pub min_midpoint: f64,
    pub max_midpoint: f64,
    pub min_hours_to_expiry: f64,
    // Score bonus for neg_risk markets (shared collateral).
    pub neg_risk_score_boost: f64,

    // --- Safety limits ---
    pub max_order_size: f64,
    pub max_single_order_usdc: f64,
    pub max_inventory_per_side: f64,
    // Total per-market cost cap (both sides combined).
    pub max_entry_cost: f64,
    // Hard cap: typically 2 BUY + 1 SELL (or fewer).
    pub max_orders_per_market: usize,
    // Force-sell if loss exceeds this fraction of max_spread.
    pub stop_loss_fraction: f64,
    pub min_stop_loss: f64,
    // After this many consecutive SELL failures, check on-chain reality.
    pub max_sell_retries: u32,

    // --- WebSocket ---
    // Text-level "PING" heartbeat pace, in addition to protocol pings.
    pub ws_ping_interval_s: u64,
    // Backoff sequence: 1, 2, 4, ... capped here.
    pub ws_max_reconnect_delay_s: u64,
    pub ws_enabled: bool,

    // --- Fill cooldown ---
    // After a SELL fill completes, do NOT re-place BUY for this long.
    // Prevents the fill->sell->buy->fill cycle in volatile markets.
    pub fill_cooldown_s: u64,
    // This many fills within the cooldown window blocks the side until
    // the next full rescan.
    pub max_fills_before_block: usize,

    // --- Global circuit breaker ---
    // When ANY BUY fills, cancel ALL BUYs across ALL markets and pause
    // new BUY placement. Limits worst case to one fill at a time.
    pub global_circuit_breaker: bool,
    pub global_fill_pause_s: u64,

    // --- Time-based sizing (hours in local time) ---
    pub peak_hours_start: u32,
    pub peak_hours_end: u32,
    pub off_peak_size_multiplier: f64,
    pub peak_size_multiplier: f64,
    pub peak_max_markets: usize,
    pub off_peak_max_markets: usize,

    // --- Market blacklist after fill ---
    // The conditions that caused a fill (volatility, adverse flow)
    // likely persist; stay out this long.
    pub market_blacklist_s: u64,

    // --- Self-healing ---
    // Consecutive main-loop errors before self-terminating so the
    // watchdog restarts us with fresh state.
    pub max_consecutive_errors: u32,

    // --- Exchange timing quirks ---
    // Wait after a cancel before SELLing the same conditional token, so
    // the exchange releases the collateral lock.
    pub collateral_release_delay_ms: u64,
    // Shorter wait for the aggressive stream-driven reprice path.
    pub reprice_delay_ms: u64,
    // Startup cancel-all retry bounds.
    pub cancel_all_attempts: u32,
    pub cancel_all_wait_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spread_buffer_fraction: 0.40,
            min_spread_buffer: 0.002,
            drift_threshold_fraction: 0.15,
            min_drift_threshold: 0.005,

            max_markets_cap: 0,
            cost_per_market_estimate: 10.0,
            balance_reserve_fraction: 0.10,

            monitor_interval_s: 5,
            rescan_interval_s: 180,
            order_grace_period_s: 30,
            rest_fallback_interval_s: 30,
            startup_cooldown_s: 60,
            status_interval_s: 30,
            force_sell_sweep_interval_s: 3600,

            detail_candidates: 80,
            min_reward_rate: 0.5,
            max_book_depth_usdc: 5000.0,
            min_book_depth_usdc: 500.0,
            min_daily_volume: 5000.0,
            min_max_spread: 0.01,
            max_spread_ratio: 1.5,
            max_volatility_ratio: 2.0,
            min_volatility_data_points: 10,
            max_markets_per_event: 3,
            min_midpoint: 0.05,
            max_midpoint: 0.95,
            min_hours_to_expiry: 72.0,
            neg_risk_score_boost: 1.3,

            max_order_size: 500.0,
            max_single_order_usdc: 250.0,
            max_inventory_per_side: 300.0,
            max_entry_cost: 100.0,
            max_orders_per_market: 3,
            stop_loss_fraction: 0.6,
            min_stop_loss: 0.01,
            max_sell_retries: 5,

            ws_ping_interval_s: 5,
            ws_max_reconnect_delay_s: 60,
            ws_enabled: true,

            fill_cooldown_s: 300,
            max_fills_before_block: 3,

            global_circuit_breaker: true,
            global_fill_pause_s: 120,

            peak_hours_start: 22,
            peak_hours_end: 7,
            off_peak_size_multiplier: 1.0,
            peak_size_multiplier: 1.0,
            peak_max_markets: 12,
            off_peak_max_markets: 50,

            market_blacklist_s: 7200,

            max_consecutive_errors: 20,

            collateral_release_delay_ms: 1500,
            reprice_delay_ms: 500,
            cancel_all_attempts: 20,
            cancel_all_wait_ms: 3000,
        }
    }
}

impl Config {
    /// Defaults with the exchange-timing waits zeroed and the retry
    /// throttle disabled. Used by the test suites so handlers don't sleep.
    pub fn fast() -> Self {
        Self {
            collateral_release_delay_ms: 0,
            reprice_delay_ms: 0,
            cancel_all_wait_ms: 0,
            startup_cooldown_s: 0,
            rescan_interval_s: 0,
            ..Self::default()
        }
    }
}
