use reqwest::{Client, Method};
use tokio::time::Duration;

use crate::auth::{Account, ApiCreds};
use crate::errors::ClobError;
use crate::helpers;
use crate::signing;

// Production hosts
const CLOB_HOST: &str = "https://clob.polymarket.com";
const GAMMA_HOST: &str = "https://gamma-api.polymarket.com";
const DATA_HOST: &str = "https://data-api.polymarket.com";

const REQUEST_TIMEOUT_S: u64 = 10;

const DERIVE_API_KEY: &str = "/auth/derive-api-key";
const CREATE_API_KEY: &str = "/auth/api-key";

/// Main client for the Polymarket CLOB (plus the Gamma and Data read APIs).
///
/// Endpoint methods live in the category modules ([`crate::markets`],
/// [`crate::portfolio`], [`crate::data`]) and are all implemented on this
/// type. Authenticated endpoints require API creds: call
/// [`ClobClient::create_or_derive_api_creds`] once before sharing the
/// client.
pub struct ClobClient {
    pub(crate) http_client: Client,
    pub(crate) account: Account,
    pub(crate) creds: Option<ApiCreds>,
    pub(crate) base_url: String,
    pub(crate) gamma_url: String,
    pub(crate) data_url: String,
}

impl ClobClient {
    pub fn new(account: Account) -> ClobClient {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .build()
            .expect("reqwest client");
        ClobClient {
            http_client,
            account,
            creds: None,
            base_url: CLOB_HOST.to_string(),
            gamma_url: GAMMA_HOST.to_string(),
            data_url: DATA_HOST.to_string(),
        }
    }

    /// Override all three hosts. Useful for tests and alternate environments.
    pub fn new_with_hosts(
        account: Account,
        base_url: String,
        gamma_url: String,
        data_url: String,
    ) -> ClobClient {
        let mut client = ClobClient::new(account);
        client.base_url = base_url;
        client.gamma_url = gamma_url;
        client.data_url = data_url;
        client
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn api_creds(&self) -> Option<&ApiCreds> {
        self.creds.as_ref()
    }

    pub(crate) fn require_creds(&self) -> Result<&ApiCreds, ClobError> {
        self.creds.as_ref().ok_or(ClobError::CredentialMissing)
    }

    /// Derive existing L2 creds for this key, falling back to creating a
    /// fresh set when none exist yet. Must be called before any
    /// authenticated endpoint.
    pub async fn create_or_derive_api_creds(&mut self) -> Result<(), ClobError> {
        match self.l1_request(Method::GET, DERIVE_API_KEY).await {
            Ok(creds) => {
                self.creds = Some(creds);
                Ok(())
            }
            Err(ClobError::Client { .. }) => {
                let creds = self.l1_request(Method::POST, CREATE_API_KEY).await?;
                self.creds = Some(creds);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// L1 (key-signed) request used only by the creds endpoints.
    async fn l1_request(&self, method: Method, path: &str) -> Result<ApiCreds, ClobError> {
        let timestamp = helpers::unix_timestamp_s();
        let nonce = 0u64;
        let signature = signing::sign_clob_auth(&self.account, &timestamp, nonce)?;
        let headers = vec![
            (
                "POLY_ADDRESS",
                format!("{:?}", self.account.signer_address()),
            ),
            ("POLY_SIGNATURE", signature),
            ("POLY_TIMESTAMP", timestamp),
            ("POLY_NONCE", nonce.to_string()),
        ];
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let resp =
            helpers::execute_with_retry(&self.http_client, method, &url, &headers, None).await?;
        let creds: ApiCreds = serde_json::from_str(&resp)
            .map_err(|e| ClobError::Other(format!("Parse error: {e}. Response: {resp}")))?;
        Ok(creds)
    }

    /// Wrapper for authenticated GET requests against the CLOB host.
    pub(crate) async fn authenticated_get(&self, path: &str) -> Result<String, ClobError> {
        let creds = self.require_creds()?;
        let headers = helpers::create_l2_headers(&self.account, creds, "GET", path, None)?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        helpers::execute_with_retry(&self.http_client, Method::GET, &url, &headers, None).await
    }

    /// Wrapper for authenticated POST requests against the CLOB host.
    pub(crate) async fn authenticated_post<T>(
        &self,
        path: &str,
        json_body: &T,
    ) -> Result<String, ClobError>
    where
        T: serde::Serialize + ?Sized,
    {
        let creds = self.require_creds()?;
        let body = serde_json::to_value(json_body)?;
        let body_str = body.to_string();
        let headers =
            helpers::create_l2_headers(&self.account, creds, "POST", path, Some(&body_str))?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        helpers::execute_with_retry(&self.http_client, Method::POST, &url, &headers, Some(&body))
            .await
    }

    /// Wrapper for authenticated DELETE requests against the CLOB host.
    pub(crate) async fn authenticated_delete<T>(
        &self,
        path: &str,
        json_body: Option<&T>,
    ) -> Result<String, ClobError>
    where
        T: serde::Serialize + ?Sized,
    {
        let creds = self.require_creds()?;
        let body = match json_body {
            Some(b) => Some(serde_json::to_value(b)?),
            None => None,
        };
        let body_str = body.as_ref().map(|b| b.to_string());
        let headers = helpers::create_l2_headers(
            &self.account,
            creds,
            "DELETE",
            path,
            body_str.as_deref(),
        )?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        helpers::execute_with_retry(
            &self.http_client,
            Method::DELETE,
            &url,
            &headers,
            body.as_ref(),
        )
        .await
    }

    /// Wrapper for unauthenticated GET requests (public CLOB endpoints).
    pub(crate) async fn unauthenticated_get(&self, path: &str) -> Result<String, ClobError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        helpers::execute_with_retry(&self.http_client, Method::GET, &url, &[], None).await
    }

    /// Unauthenticated GET against the Gamma metadata API.
    pub(crate) async fn gamma_get(&self, path: &str) -> Result<String, ClobError> {
        let url = format!("{}{}", self.gamma_url.trim_end_matches('/'), path);
        helpers::execute_with_retry(&self.http_client, Method::GET, &url, &[], None).await
    }

    /// Unauthenticated GET against the Data API (on-chain positions).
    pub(crate) async fn data_get(&self, path: &str) -> Result<String, ClobError> {
        let url = format!("{}{}", self.data_url.trim_end_matches('/'), path);
        helpers::execute_with_retry(&self.http_client, Method::GET, &url, &[], None).await
    }
}
