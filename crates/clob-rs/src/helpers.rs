use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use sha2::Sha256;
use tokio::time::{Duration, sleep};

use crate::auth::{Account, ApiCreds};
use crate::errors::ClobError;

type HmacSha256 = Hmac<Sha256>;

const MAX_ATTEMPTS: u32 = 3;

pub(crate) fn unix_timestamp_s() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Build the five L2 auth headers for an authenticated CLOB request.
///
/// The signature is an HMAC-SHA256 over `timestamp + method + path + body`,
/// keyed with the base64url-decoded API secret, and base64url-encoded back.
pub(crate) fn create_l2_headers(
    account: &Account,
    creds: &ApiCreds,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<Vec<(&'static str, String)>, ClobError> {
    let timestamp = unix_timestamp_s();
    let mut message = format!("{}{}{}", timestamp, method, path);
    if let Some(b) = body {
        message.push_str(b);
    }

    let key = URL_SAFE
        .decode(creds.secret.as_bytes())
        .map_err(|e| ClobError::Other(format!("bad api secret encoding: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ClobError::Other(format!("hmac init: {e}")))?;
    mac.update(message.as_bytes());
    let signature = URL_SAFE.encode(mac.finalize().into_bytes());

    Ok(vec![
        ("POLY_ADDRESS", format!("{:?}", account.signer_address())),
        ("POLY_SIGNATURE", signature),
        ("POLY_TIMESTAMP", timestamp),
        ("POLY_API_KEY", creds.api_key.clone()),
        ("POLY_PASSPHRASE", creds.passphrase.clone()),
    ])
}

fn classify_status(status: u16, body: String) -> ClobError {
    if (400..500).contains(&status) {
        ClobError::Client { status, body }
    } else {
        ClobError::Server { status, body }
    }
}

/// Execute a request, retrying transient failures with exponential backoff
/// (1s, 2s, 4s). 4xx responses are surfaced immediately.
pub(crate) async fn execute_with_retry(
    http_client: &Client,
    method: Method,
    url: &str,
    headers: &[(&'static str, String)],
    json_body: Option<&serde_json::Value>,
) -> Result<String, ClobError> {
    let mut attempt = 0u32;
    loop {
        let mut request = http_client.request(method.clone(), url);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }

        let result = async {
            let resp = request.send().await?;
            let status = resp.status().as_u16();
            let text = resp.text().await?;
            if !(200..300).contains(&status) {
                return Err(classify_status(status, text));
            }
            Ok(text)
        }
        .await;

        match result {
            Ok(text) => return Ok(text),
            Err(e) => {
                attempt += 1;
                if !e.is_retryable() || attempt >= MAX_ATTEMPTS {
                    return Err(e);
                }
                sleep(Duration::from_secs(1u64 << (attempt - 1))).await;
            }
        }
    }
}

/// Append a urlencoded query to a path.
pub(crate) fn with_query<T: serde::Serialize>(path: &str, params: &T) -> Result<String, ClobError> {
    let query = serde_urlencoded::to_string(params)
        .map_err(|e| ClobError::Other(format!("query encode: {e}")))?;
    if query.is_empty() {
        Ok(path.to_string())
    } else {
        Ok(format!("{}?{}", path, query))
    }
}
