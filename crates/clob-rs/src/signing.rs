//! EIP-712 hashing and signing for CTF exchange orders and CLOB auth.
//!
//! The digests are built by hand (typehash + 32-byte-padded fields) so the
//! wire bytes match the exchange contracts exactly; the resulting 32-byte
//! digest is signed with the account's EOA key.

use ethers_core::types::{Address, U256};
use ethers_core::utils::keccak256;

use crate::auth::Account;
use crate::errors::ClobError;

pub const CHAIN_ID: u64 = 137;

/// CTF exchange verifying contracts on Polygon.
const EXCHANGE_ADDRESS: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
const NEG_RISK_EXCHANGE_ADDRESS: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const EIP712_DOMAIN_TYPE_NO_CONTRACT: &str =
    "EIP712Domain(string name,string version,uint256 chainId)";
const ORDER_TYPE: &str = "Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)";
const CLOB_AUTH_TYPE: &str =
    "ClobAuth(address address,string timestamp,uint256 nonce,string message)";
const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

pub const SIDE_BUY: u8 = 0;
pub const SIDE_SELL: u8 = 1;

/// USDC and conditional tokens both use 6 decimals on the exchange.
const AMOUNT_SCALE: f64 = 1_000_000.0;

/// All fields of an order as they are hashed and shipped to the exchange.
#[derive(Debug, Clone)]
pub struct SignedOrder {
    pub salt: u64,
    pub maker: Address,
    pub signer: Address,
    pub taker: Address,
    pub token_id: U256,
    pub maker_amount: U256,
    pub taker_amount: U256,
    pub expiration: u64,
    pub nonce: u64,
    pub fee_rate_bps: u64,
    pub side: u8,
    pub signature_type: u8,
    /// 65-byte r||s||v signature, 0x-prefixed hex.
    pub signature: String,
}

fn pad_address(a: Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(a.as_bytes());
    out
}

fn pad_u256(v: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    v.to_big_endian(&mut out);
    out
}

fn domain_separator(name: &str, verifying_contract: Option<Address>) -> [u8; 32] {
    let mut enc: Vec<u8> = Vec::with_capacity(32 * 5);
    match verifying_contract {
        Some(contract) => {
            enc.extend_from_slice(&keccak256(EIP712_DOMAIN_TYPE.as_bytes()));
            enc.extend_from_slice(&keccak256(name.as_bytes()));
            enc.extend_from_slice(&keccak256(b"1"));
            enc.extend_from_slice(&pad_u256(U256::from(CHAIN_ID)));
            enc.extend_from_slice(&pad_address(contract));
        }
        None => {
            enc.extend_from_slice(&keccak256(EIP712_DOMAIN_TYPE_NO_CONTRACT.as_bytes()));
            enc.extend_from_slice(&keccak256(name.as_bytes()));
            enc.extend_from_slice(&keccak256(b"1"));
            enc.extend_from_slice(&pad_u256(U256::from(CHAIN_ID)));
        }
    }
    keccak256(&enc)
}

fn eip712_digest(domain: [u8; 32], struct_hash: [u8; 32]) -> [u8; 32] {
    let mut enc = Vec::with_capacity(2 + 64);
    enc.extend_from_slice(&[0x19, 0x01]);
    enc.extend_from_slice(&domain);
    enc.extend_from_slice(&struct_hash);
    keccak256(&enc)
}

fn exchange_address(neg_risk: bool) -> Address {
    let s = if neg_risk {
        NEG_RISK_EXCHANGE_ADDRESS
    } else {
        EXCHANGE_ADDRESS
    };
    // Hard-coded well-formed constants
    s.parse().expect("static exchange address")
}

/// Build and sign a limit order for `token_id`.
///
/// Amounts follow the exchange convention: for a BUY the maker amount is
/// USDC in and the taker amount is shares out; for a SELL they swap. Both
/// are scaled to 6 decimals and truncated toward zero so we never offer
/// more than the float math implies.
pub fn build_and_sign_order(
    account: &Account,
    token_id: &str,
    price: f64,
    size: f64,
    side: u8,
    neg_risk: bool,
) -> Result<SignedOrder, ClobError> {
    let token = U256::from_dec_str(token_id.trim())
        .map_err(|e| ClobError::Other(format!("bad token id {token_id}: {e}")))?;

    let shares = U256::from((size * AMOUNT_SCALE) as u128);
    let usdc = U256::from((price * size * AMOUNT_SCALE) as u128);
    let (maker_amount, taker_amount) = if side == SIDE_BUY {
        (usdc, shares)
    } else {
        (shares, usdc)
    };

    let salt: u64 = rand::random();
    let maker = account.funder_address();
    let signer = account.signer_address();
    let taker = Address::zero();
    let expiration = 0u64;
    let nonce = 0u64;
    let fee_rate_bps = 0u64;
    let signature_type = account.signature_type;

    let mut enc: Vec<u8> = Vec::with_capacity(32 * 13);
    enc.extend_from_slice(&keccak256(ORDER_TYPE.as_bytes()));
    enc.extend_from_slice(&pad_u256(U256::from(salt)));
    enc.extend_from_slice(&pad_address(maker));
    enc.extend_from_slice(&pad_address(signer));
    enc.extend_from_slice(&pad_address(taker));
    enc.extend_from_slice(&pad_u256(token));
    enc.extend_from_slice(&pad_u256(maker_amount));
    enc.extend_from_slice(&pad_u256(taker_amount));
    enc.extend_from_slice(&pad_u256(U256::from(expiration)));
    enc.extend_from_slice(&pad_u256(U256::from(nonce)));
    enc.extend_from_slice(&pad_u256(U256::from(fee_rate_bps)));
    enc.extend_from_slice(&pad_u256(U256::from(side)));
    enc.extend_from_slice(&pad_u256(U256::from(signature_type)));
    let struct_hash = keccak256(&enc);

    let domain = domain_separator("Polymarket CTF Exchange", Some(exchange_address(neg_risk)));
    let digest = eip712_digest(domain, struct_hash);
    let sig = account.sign_digest(digest)?;

    Ok(SignedOrder {
        salt,
        maker,
        signer,
        taker,
        token_id: token,
        maker_amount,
        taker_amount,
        expiration,
        nonce,
        fee_rate_bps,
        side,
        signature_type,
        signature: format!("0x{}", hex::encode(sig.to_vec())),
    })
}

/// Sign the ClobAuth attestation used to create or derive L2 API creds.
pub fn sign_clob_auth(
    account: &Account,
    timestamp: &str,
    nonce: u64,
) -> Result<String, ClobError> {
    let mut enc: Vec<u8> = Vec::with_capacity(32 * 5);
    enc.extend_from_slice(&keccak256(CLOB_AUTH_TYPE.as_bytes()));
    enc.extend_from_slice(&pad_address(account.signer_address()));
    enc.extend_from_slice(&keccak256(timestamp.as_bytes()));
    enc.extend_from_slice(&pad_u256(U256::from(nonce)));
    enc.extend_from_slice(&keccak256(CLOB_AUTH_MESSAGE.as_bytes()));
    let struct_hash = keccak256(&enc);

    let domain = domain_separator("ClobAuthDomain", None);
    let digest = eip712_digest(domain, struct_hash);
    let sig = account.sign_digest(digest)?;
    Ok(format!("0x{}", hex::encode(sig.to_vec())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_account() -> Account {
        // Well-known anvil/hardhat dev key, never used on-chain here.
        Account::new(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            "0x00000000000000000000000000000000000000aa",
        )
        .unwrap()
    }

    #[test]
    fn buy_amounts_scale_to_six_decimals() {
        let order =
            build_and_sign_order(&test_account(), "123456", 0.48, 50.0, SIDE_BUY, false).unwrap();
        assert_eq!(order.maker_amount, U256::from(24_000_000u64));
        assert_eq!(order.taker_amount, U256::from(50_000_000u64));
        assert_eq!(order.side, SIDE_BUY);
    }

    #[test]
    fn sell_amounts_are_swapped() {
        let order =
            build_and_sign_order(&test_account(), "123456", 0.50, 20.0, SIDE_SELL, false).unwrap();
        assert_eq!(order.maker_amount, U256::from(20_000_000u64));
        assert_eq!(order.taker_amount, U256::from(10_000_000u64));
    }

    #[test]
    fn signature_is_65_bytes_hex() {
        let order =
            build_and_sign_order(&test_account(), "1", 0.5, 1.0, SIDE_BUY, true).unwrap();
        assert!(order.signature.starts_with("0x"));
        assert_eq!(order.signature.len(), 2 + 130);
    }
}
