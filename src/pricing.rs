//! Tick rounding and quote-price math.
//!
//! Prices are decimals in the open interval (0,1) snapped to the market's
//! tick size. BUY quotes sit at the inner edge of the reward window; SELL
//! unwind quotes sit at (or just below) midpoint so they fill fast.

use chrono::Timelike;

use crate::config::Config;

/// Round price DOWN to the nearest tick (BUY quotes, SELL unwind).
/// The inner round fixes float imprecision before flooring.
pub fn round_price_down(price: f64, tick_size: f64) -> f64 {
    let ticks = round_dp(price / tick_size, 8).floor();
    round_dp(ticks * tick_size, 6)
}

/// Round price UP to the nearest tick.
pub fn round_price_up(price: f64, tick_size: f64) -> f64 {
    let ticks = round_dp(price / tick_size, 8).ceil();
    round_dp(ticks * tick_size, 6)
}

/// Clamp into the valid range [tick, 1 - tick].
pub fn clamp_price(price: f64, tick_size: f64) -> f64 {
    price.max(tick_size).min(1.0 - tick_size)
}

fn round_dp(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Per-market spread buffer: proportional to max_spread, floored by the
/// config minimum and by one tick.
pub fn compute_buffer(cfg: &Config, max_spread: f64, tick_size: f64) -> f64 {
    (max_spread * cfg.spread_buffer_fraction)
        .max(cfg.min_spread_buffer)
        .max(tick_size)
}

/// BUY YES and BUY NO prices at the inner edge of the reward window.
///
/// If tick rounding pushed a price onto or past the window boundary, it
/// is moved one tick back inside.
pub fn buy_prices(cfg: &Config, midpoint: f64, max_spread: f64, tick_size: f64) -> (f64, f64) {
    let buffer = compute_buffer(cfg, max_spread, tick_size);
    let effective_spread = max_spread - buffer;

    let mut buy_yes = clamp_price(round_price_down(midpoint - effective_spread, tick_size), tick_size);
    if round_dp(midpoint - buy_yes, 8) >= max_spread {
        buy_yes = clamp_price(buy_yes + tick_size, tick_size);
    }

    // BUY NO is the same construction against the NO-side midpoint.
    let no_midpoint = 1.0 - midpoint;
    let mut buy_no = clamp_price(round_price_down(no_midpoint - effective_spread, tick_size), tick_size);
    if round_dp(no_midpoint - buy_no, 8) >= max_spread {
        buy_no = clamp_price(buy_no + tick_size, tick_size);
    }

    (buy_yes, buy_no)
}

/// SELL unwind price at or just below the side midpoint, so the order is
/// first in the ask queue (and may cross the best bid, which is fine for
/// unwinding).
pub fn sell_price(midpoint: f64, tick_size: f64, is_yes: bool) -> f64 {
    let side_mid = if is_yes { midpoint } else { 1.0 - midpoint };
    clamp_price(round_price_down(side_mid, tick_size), tick_size)
}

pub fn stop_loss_threshold(cfg: &Config, max_spread: f64) -> f64 {
    (max_spread * cfg.stop_loss_fraction).max(cfg.min_stop_loss)
}

pub fn drift_threshold(cfg: &Config, max_spread: f64) -> f64 {
    (max_spread * cfg.drift_threshold_fraction).max(cfg.min_drift_threshold)
}

/// Sum the USDC value of book levels within max_spread of midpoint.
pub fn book_depth_in_range(
    bids: &[clob_rs::markets::models::BookLevel],
    asks: &[clob_rs::markets::models::BookLevel],
    midpoint: f64,
    max_spread: f64,
) -> f64 {
    let lower = midpoint - max_spread;
    let upper = midpoint + max_spread;
    let mut depth = 0.0;
    for bid in bids {
        if bid.price >= lower {
            depth += bid.price * bid.size;
        }
    }
    for ask in asks {
        if ask.price <= upper {
            depth += ask.price * ask.size;
        }
    }
    depth
}

/// Rank a market by LP opportunity: reward relative to competition, scaled
/// by spread vacancy. Vacancy is capped at 1.0 so markets with spreads
/// wider than max_spread are not boosted (no active LPs there means
/// adverse selection).
pub fn opportunity_score(
    reward_rate: f64,
    book_depth_usdc: f64,
    current_spread: f64,
    max_spread: f64,
) -> f64 {
    let reward_ratio = reward_rate / book_depth_usdc.max(1.0);
    let spread_vacancy = (current_spread / max_spread.max(0.001)).min(1.0);
    reward_ratio * spread_vacancy
}

/// Whether the local clock is inside US market hours (high fill risk).
/// Handles the overnight wrap (e.g. 22:00 -> 07:00).
pub fn is_peak_hours(cfg: &Config) -> bool {
    let hour = chrono::Local::now().hour();
    let (start, end) = (cfg.peak_hours_start, cfg.peak_hours_end);
    if start > end {
        hour >= start || hour < end
    } else {
        (start..end).contains(&hour)
    }
}

/// Order size multiplier for the current time of day.
pub fn size_multiplier(cfg: &Config) -> f64 {
    if is_peak_hours(cfg) {
        cfg.peak_size_multiplier
    } else {
        cfg.off_peak_size_multiplier
    }
}
