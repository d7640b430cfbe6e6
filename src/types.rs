//! Wire types for the x402 payment protocol as spoken between the seller
//! middleware, the facilitator, and paying clients.
//!
//! The key objects are [`PaymentProof`] (submitted by the buyer in the
//! `PAYMENT-SIGNATURE` header), [`PaymentRequirements`] (the 402 challenge
//! envelope), [`VerifyOutcome`] and [`SettlementResult`] (facilitator
//! responses). Serialization is camelCase JSON, compatible with the
//! TypeScript seller/agent SDKs.

use alloy::primitives::U256;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Debug, Display};
use std::str::FromStr;

use crate::network::{Network, PaymentMethod, TokenDescriptor};
use crate::util::Base64Bytes;

/// Protocol version number. This implementation speaks version 2; anything
/// else is carried through deserialization and rejected by every scheme's
/// verify with "Unsupported x402 version" before any chain I/O.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct X402Version(pub u8);

impl X402Version {
    /// Version `2`, the only version this implementation accepts.
    pub const V2: X402Version = X402Version(2);

    pub fn is_supported(&self) -> bool {
        *self == X402Version::V2
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment scheme identifier. Only `"exact"` exists: the buyer pays exactly
/// the amount the challenge asked for (or more, for the native scheme).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// An EVM address, wrapping `alloy::primitives::Address` for typed handling
/// across the protocol surface.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy::primitives::Address);

impl EvmAddress {
    /// The zero address, used as the sentinel for the chain's native coin.
    pub const ZERO: EvmAddress = EvmAddress(alloy::primitives::Address::ZERO);

    pub fn is_zero(&self) -> bool {
        self.0 == alloy::primitives::Address::ZERO
    }
}

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy::primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<alloy::primitives::Address> for EvmAddress {
    fn from(address: alloy::primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for alloy::primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

/// A 65-byte EVM signature over EIP-712 typed data, serialized as a
/// 0x-prefixed hex string of 130 characters.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl Debug for EvmSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmSignature(0x{})", hex::encode(self.0))
    }
}

impl From<[u8; 65]> for EvmSignature {
    fn from(bytes: [u8; 65]) -> Self {
        EvmSignature(bytes)
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        static SIG_REGEX: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^0x[0-9a-fA-F]{130}$").expect("Invalid regex for EVM signature")
        });

        let s = String::deserialize(deserializer)?;
        if !SIG_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom(
                "Invalid EVM signature format: must be 0x-prefixed and 130 hex chars",
            ));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("Invalid hex in EVM signature"))?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Signature must be exactly 65 bytes"))?;
        Ok(EvmSignature(array))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A 32-byte authorization nonce, hex-encoded with 0x prefix (64 hex chars).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl Debug for HexEncodedNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexEncodedNonce(0x{})", hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        static NONCE_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("Invalid nonce regex"));

        let s = String::deserialize(deserializer)?;
        if !NONCE_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom("Invalid nonce format"));
        }
        let bytes =
            hex::decode(&s[2..]).map_err(|_| serde::de::Error::custom("Invalid hex in nonce"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid length for nonce"))?;
        Ok(HexEncodedNonce(array))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A 32-byte EVM transaction hash, encoded as a 0x-prefixed hex string.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct TransactionHash(pub [u8; 32]);

impl Debug for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionHash(0x{})", hex::encode(self.0))
    }
}

impl Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<alloy::primitives::B256> for TransactionHash {
    fn from(hash: alloy::primitives::B256) -> Self {
        TransactionHash(hash.0)
    }
}

impl From<TransactionHash> for alloy::primitives::B256 {
    fn from(hash: TransactionHash) -> Self {
        alloy::primitives::B256::new(hash.0)
    }
}

impl<'de> Deserialize<'de> for TransactionHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        static TX_HASH_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{64}$").expect("invalid regex"));

        let s = String::deserialize(deserializer)?;
        if !TX_HASH_REGEX.is_match(&s) {
            return Err(serde::de::Error::custom("Invalid transaction hash format"));
        }
        let bytes = hex::decode(s.trim_start_matches("0x"))
            .map_err(|_| serde::de::Error::custom("Invalid hex in transaction hash"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Transaction hash must be exactly 32 bytes"))?;
        Ok(TransactionHash(array))
    }
}

impl Serialize for TransactionHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

/// A Unix timestamp in seconds, serialized as a stringified integer to avoid
/// precision loss in JSON. Bounds the validity window of EIP-3009
/// authorizations (`validAfter`/`validBefore`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

impl From<UnixTimestamp> for U256 {
    fn from(value: UnixTimestamp) -> Self {
        U256::from(value.0)
    }
}

/// An on-chain amount in the token's smallest unit, serialized as a decimal
/// string (`"1000"`), never as a JSON number.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(U256::ZERO);
}

impl Debug for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenAmount({})", self.0)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        TokenAmount(value)
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid token amount: expected a decimal string")]
pub struct TokenAmountParseError;

impl FromStr for TokenAmount {
    type Err = TokenAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenAmountParseError);
        }
        let value = U256::from_str_radix(s, 10).map_err(|_| TokenAmountParseError)?;
        Ok(TokenAmount(value))
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        TokenAmount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// EIP-712 message fields of an ERC-3009 `transferWithAuthorization`:
/// who pays whom, how much, and within which time window.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Authorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// Proof body for the native scheme: the buyer already broadcast a plain
/// value transfer and submits its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeProof {
    pub tx_hash: TransactionHash,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub from: Option<EvmAddress>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub amount: Option<TokenAmount>,
}

/// Proof body for the ERC-20 scheme: the buyer granted an allowance to the
/// payment contract and asks the relayer to pull `amount` on their behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc20Proof {
    pub from: EvmAddress,
    pub amount: TokenAmount,
    pub invoice_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub approval_tx_hash: Option<TransactionHash>,
}

/// Proof body for the EIP-3009 scheme: an off-chain signed authorization the
/// relayer submits on the buyer's behalf. The buyer pays zero gas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Proof {
    pub signature: EvmSignature,
    pub authorization: Eip3009Authorization,
}

/// Scheme-tagged proof body. The JSON shapes of the variants are disjoint
/// (`signature`+`authorization` vs `invoiceId` vs `txHash`), so untagged
/// deserialization is unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProofPayload {
    Eip3009(Eip3009Proof),
    Erc20(Erc20Proof),
    Native(NativeProof),
}

impl ProofPayload {
    /// The payment method this payload belongs to.
    pub fn method(&self) -> PaymentMethod {
        match self {
            ProofPayload::Native(_) => PaymentMethod::Native,
            ProofPayload::Erc20(_) => PaymentMethod::Erc20,
            ProofPayload::Eip3009(_) => PaymentMethod::Eip3009,
        }
    }
}

/// A buyer-submitted payment proof: version, scheme, network, and the
/// scheme-specific payload. Travels base64-encoded in `PAYMENT-SIGNATURE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ProofPayload,
}

/// Error returned when decoding a base64-encoded [`PaymentProof`] fails.
///
/// Raised by the seller middleware for a malformed `PAYMENT-SIGNATURE`
/// header. This is a protocol error (4xx), distinct from a failed payment.
#[derive(Debug, thiserror::Error)]
pub enum ProofDecodingError {
    /// The input bytes were not valid base64.
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    /// The JSON structure was invalid or did not conform to [`PaymentProof`].
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TryFrom<Base64Bytes<'_>> for PaymentProof {
    type Error = ProofDecodingError;

    fn try_from(value: Base64Bytes) -> Result<Self, Self::Error> {
        let decoded = value.decode()?;
        serde_json::from_slice(&decoded).map_err(ProofDecodingError::from)
    }
}

/// Outcome of a facilitator verification. Serializes as
/// `{"valid": true}` or `{"valid": false, "reason": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    Invalid { reason: String },
}

impl VerifyOutcome {
    pub fn invalid(reason: impl Into<String>) -> Self {
        VerifyOutcome::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyOutcome::Valid)
    }
}

impl Serialize for VerifyOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VerifyOutcome::Valid => {
                let mut s = serializer.serialize_struct("VerifyOutcome", 1)?;
                s.serialize_field("valid", &true)?;
                s.end()
            }
            VerifyOutcome::Invalid { reason } => {
                let mut s = serializer.serialize_struct("VerifyOutcome", 2)?;
                s.serialize_field("valid", &false)?;
                s.serialize_field("reason", reason)?;
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for VerifyOutcome {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            valid: bool,
            #[serde(default)]
            reason: Option<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        match (raw.valid, raw.reason) {
            (true, _) => Ok(VerifyOutcome::Valid),
            (false, Some(reason)) => Ok(VerifyOutcome::Invalid { reason }),
            (false, None) => Err(serde::de::Error::custom(
                "`reason` must be present when `valid` is false",
            )),
        }
    }
}

/// Result of a settlement attempt. Immutable once produced; handed to the
/// downstream business handler and echoed to the client.
///
/// `success: true` is only ever set after the on-chain confirmation step
/// completed (or, for the native scheme, after verification confirmed the
/// already-broadcast transfer).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transaction: Option<TransactionHash>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payer: Option<EvmAddress>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl SettlementResult {
    /// A settlement confirmed on-chain (or echoed for the native scheme).
    pub fn confirmed(transaction: TransactionHash, payer: EvmAddress) -> Self {
        SettlementResult {
            success: true,
            transaction: Some(transaction),
            payer: Some(payer),
            error: None,
        }
    }

    /// A settlement that did not land on-chain. The payment is not collected.
    pub fn failed(error: impl Into<String>) -> Self {
        SettlementResult {
            success: false,
            transaction: None,
            payer: None,
            error: Some(error.into()),
        }
    }

    /// Encode as base64 JSON for the `X-Payment-Response` header.
    pub fn to_b64(&self) -> Result<Base64Bytes<'static>, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json))
    }
}

/// Request body of the facilitator's `verify-*` and `settle-*` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeRequest {
    pub payload: PaymentProof,
    pub token: TokenDescriptor,
    /// Target chain id. When absent, the facilitator's boot-time default
    /// network is used.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub network: Option<u64>,
    pub treasury: EvmAddress,
    pub payment_contract: EvmAddress,
}

/// The protected resource a challenge refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub url: String,
    pub description: String,
    pub mime_type: String,
}

/// Scheme-specific metadata of a payment offer, carried in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferExtra {
    pub payment_method: PaymentMethod,
    pub symbol: String,
    pub decimals: u8,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    pub payment_contract: EvmAddress,
}

/// One acceptable way to pay for the protected resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOffer {
    pub scheme: Scheme,
    pub network: Network,
    pub amount: TokenAmount,
    pub asset: EvmAddress,
    pub pay_to: EvmAddress,
    pub max_timeout_seconds: u64,
    pub extra: OfferExtra,
}

/// The full 402 challenge envelope, base64-encoded into the
/// `PAYMENT-REQUIRED` response header. Ephemeral: regenerated on every 402,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub x402_version: X402Version,
    pub resource: ResourceInfo,
    pub accepts: Vec<PaymentOffer>,
}

/// Generic error body for unexpected or fatal server errors, when no
/// structured protocol-level response applies.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
}
