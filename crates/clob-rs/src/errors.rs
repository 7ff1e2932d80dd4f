use std::fmt;

/// Failure taxonomy for CLOB API calls.
///
/// Callers are expected to match on variants, never on stringified
/// messages. `Client` (4xx) and `OrderRejected` are terminal for the
/// operation; `Request` and `Server` are retried by the request helpers.
#[derive(Debug)]
pub enum ClobError {
    /// Transport-level failure (connect, timeout, TLS).
    Request(reqwest::Error),
    /// Response body did not decode into the expected shape.
    Parse(serde_json::Error),
    /// HTTP 4xx — caller error, surfaced immediately, never retried.
    Client { status: u16, body: String },
    /// HTTP 5xx — transient exchange-side failure.
    Server { status: u16, body: String },
    /// An authenticated endpoint was called before API creds were derived.
    CredentialMissing,
    /// The order-book endpoint 404'd: the market no longer exists.
    DeadMarket,
    /// The exchange accepted the request but rejected the order
    /// (success=false in the response).
    OrderRejected(String),
    Other(String),
}

impl ClobError {
    /// Whether the request helpers should retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClobError::Request(_) | ClobError::Server { .. })
    }
}

impl fmt::Display for ClobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClobError::Request(e) => write!(f, "Request error: {}", e),
            ClobError::Parse(e) => write!(f, "Parse error: {}", e),
            ClobError::Client { status, body } => write!(f, "Client error {}: {}", status, body),
            ClobError::Server { status, body } => write!(f, "Server error {}: {}", status, body),
            ClobError::CredentialMissing => write!(f, "API credentials not set"),
            ClobError::DeadMarket => write!(f, "Market has no orderbook"),
            ClobError::OrderRejected(msg) => write!(f, "Order rejected: {}", msg),
            ClobError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for ClobError {}

impl From<reqwest::Error> for ClobError {
    fn from(err: reqwest::Error) -> Self {
        ClobError::Request(err)
    }
}

impl From<serde_json::Error> for ClobError {
    fn from(err: serde_json::Error) -> Self {
        ClobError::Parse(err)
    }
}

impl From<String> for ClobError {
    fn from(s: String) -> ClobError {
        ClobError::Other(s)
    }
}
