//! Polymarket CLOB Rust client.
//!
//! Unofficial Rust client for the Polymarket CLOB trading API, plus the
//! Gamma (metadata) and Data (on-chain positions) read APIs. Provides
//! EIP-712 order signing, L2 HMAC request auth, market data retrieval and
//! websocket subscriptions.
//!
//! # Quick Start
//!
//! ```no_run
//! use clob_rs::{Account, ClobClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // 1. Build the signing identity
//! let account = Account::new("0xabc...", "0xdef...")?;
//!
//! // 2. Create a client and derive L2 API creds
//! let mut client = ClobClient::new(account);
//! client.create_or_derive_api_creds().await?;
//!
//! // 3. Call endpoints
//! let mid = client.get_midpoint("1234567890").await?;
//! println!("midpoint: {mid}");
//! # Ok(())
//! # }
//! ```
//!
//! # Main Components
//!
//! - [`ClobClient`] - Main client with all REST endpoint methods
//! - [`ClobWebsocketClient`] - One websocket connection (market or user channel)
//! - [`Account`] / [`ApiCreds`] - Signing identity and derived L2 credentials
//!
//! # API Endpoint Modules
//!
//! - [`markets`] - Midpoint, tick size, order book, spread, price history
//! - [`portfolio`] - Orders, cancellation, balances, allowances
//! - [`data`] - On-chain positions and Gamma market metadata

// Core modules
pub mod auth; // Signing identity and L2 credentials
pub mod client; // Main HTTP client
pub mod errors; // Error taxonomy
pub(crate) mod helpers; // Internal HTTP helpers
pub mod signing; // EIP-712 order and auth signing
pub mod ws_client; // Websocket client
pub(crate) mod serde_util; // Lenient JSON decoders

// API endpoint modules
pub mod data; // On-chain positions and Gamma metadata
pub mod markets; // Market data
pub mod portfolio; // Orders and balances
pub mod websocket; // Websocket message models

// Re-exports for convenient access
pub use auth::{Account, ApiCreds};
pub use client::ClobClient;
pub use errors::ClobError;
pub use ws_client::{ClobWebsocketClient, WsChannel};
