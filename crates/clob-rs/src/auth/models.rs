use ethers_core::types::{Address, H256, Signature};
use ethers_signers::{LocalWallet, Signer};
use serde::Deserialize;
use std::str::FromStr;

use crate::errors::ClobError;

/// Polymarket browser proxy wallet (Gnosis Safe) signature type.
pub const SIGNATURE_TYPE_POLY_PROXY: u8 = 2;

/// L2 API credentials, derived from (or created for) the signing key.
///
/// These authenticate REST requests and the user websocket channel via
/// HMAC headers; they never leave the process.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiCreds {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// Signing identity for the CLOB.
///
/// `funder` is the proxy wallet that holds the USDC; the private key is
/// the EOA that signs on its behalf (signature type 2).
#[derive(Debug, Clone)]
pub struct Account {
    wallet: LocalWallet,
    funder: Address,
    pub signature_type: u8,
}

impl Account {
    pub fn new(private_key: &str, funder: &str) -> Result<Account, ClobError> {
        let key = private_key.trim().trim_start_matches("0x");
        let wallet = LocalWallet::from_str(key)
            .map_err(|e| ClobError::Other(format!("invalid private key: {e}")))?;
        let funder = Address::from_str(funder.trim())
            .map_err(|e| ClobError::Other(format!("invalid wallet address: {e}")))?;
        Ok(Account {
            wallet,
            funder,
            signature_type: SIGNATURE_TYPE_POLY_PROXY,
        })
    }

    /// Address of the signing EOA (derived from the private key).
    pub fn signer_address(&self) -> Address {
        self.wallet.address()
    }

    /// Address of the funding proxy wallet (order maker).
    pub fn funder_address(&self) -> Address {
        self.funder
    }

    /// Sign a 32-byte digest with the EOA key (EIP-712 digests).
    pub fn sign_digest(&self, digest: [u8; 32]) -> Result<Signature, ClobError> {
        self.wallet
            .sign_hash(H256::from(digest))
            .map_err(|e| ClobError::Other(format!("sign error: {e}")))
    }
}
