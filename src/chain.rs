//! Chain access for one EVM network: a JSON-RPC provider with the relayer
//! wallet attached, the contract bindings settlement talks to, and EIP-712
//! helpers for ERC-3009 authorizations.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy::providers::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy::signers::Signature;
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct, eip712_domain};
use url::Url;

use crate::network::{Network, TokenDescriptor};
use crate::types::{Eip3009Authorization, EvmAddress, EvmSignature};

sol! {
    /// ERC-20 surface consumed by verification and settlement. EIP-3009
    /// tokens additionally expose `transferWithAuthorization`.
    #[sol(rpc)]
    interface PaymentToken {
        function balanceOf(address owner) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature
        ) external;
    }

    /// The payment-receiving contract. `payWithTokenFrom` is owner-only:
    /// the relayer is the sole caller authorized on-chain.
    #[sol(rpc)]
    interface PaymentReceiver {
        function payNative(bytes32 invoiceId) external payable;
        function payWithTokenFrom(address token, address from, uint256 amount, bytes32 invoiceId) external;
    }
}

sol! {
    /// EIP-712 typed-data message of an ERC-3009 authorization, used to
    /// reconstruct the signing hash when recovering the buyer's signature.
    #[derive(serde::Serialize, serde::Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// Gas ceiling for `payWithTokenFrom` settlement transactions.
pub const ERC20_SETTLE_GAS_LIMIT: u64 = 300_000;
/// Gas ceiling for `transferWithAuthorization` settlement transactions.
pub const EIP3009_SETTLE_GAS_LIMIT: u64 = 150_000;

/// Concrete provider type from `ProviderBuilder::new().wallet(...).connect_http(...)`.
pub type WalletProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

/// Errors from chain interaction: transport failures, reverted calls, and
/// addresses that cannot participate in the requested operation.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(#[from] alloy::transports::TransportError),
    #[error(transparent)]
    Contract(#[from] alloy::contract::Error),
    #[error("transaction receipt unavailable: {0}")]
    Receipt(String),
    #[error("signature recovery failed: {0}")]
    Recovery(String),
}

/// A connected EVM network: provider with the relayer wallet attached, plus
/// the relayer's own address for health and logging.
#[derive(Clone)]
pub struct EvmChain {
    network: Network,
    rpc_url: Url,
    provider: WalletProvider,
    signer_address: EvmAddress,
}

impl EvmChain {
    /// Connects a provider for `network` at `rpc_url`, signing with `wallet`.
    pub fn connect(network: Network, rpc_url: Url, wallet: EthereumWallet, signer_address: EvmAddress) -> Self {
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(rpc_url.clone());
        tracing::info!(
            network = %network,
            rpc = %rpc_url,
            relayer = %signer_address,
            "connected chain provider"
        );
        EvmChain {
            network,
            rpc_url,
            provider,
            signer_address,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn chain_id(&self) -> u64 {
        self.network.chain_id()
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    pub fn provider(&self) -> &WalletProvider {
        &self.provider
    }

    /// The relayer identity this chain signs settlement transactions with.
    pub fn signer_address(&self) -> EvmAddress {
        self.signer_address
    }

    /// Native-coin balance of the relayer, reported by the health endpoint
    /// as a liveness/capacity signal.
    pub async fn relayer_balance(&self) -> Result<U256, ChainError> {
        let balance = self
            .provider
            .get_balance(self.signer_address.into())
            .await?;
        Ok(balance)
    }
}

impl std::fmt::Debug for EvmChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmChain")
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url.as_str())
            .field("signer_address", &self.signer_address)
            .finish()
    }
}

/// EIP-712 domain of an EIP-3009 token: `{name, version, chainId,
/// verifyingContract=token}`. Name and version come from the token's
/// configured metadata.
pub fn token_eip712_domain(token: &TokenDescriptor, chain_id: u64) -> Option<Eip712Domain> {
    let eip712 = token.eip712.as_ref()?;
    let verifying_contract: Address = token.address.into();
    Some(eip712_domain! {
        name: eip712.name.clone(),
        version: eip712.version.clone(),
        chain_id: chain_id,
        verifying_contract: verifying_contract,
    })
}

/// Computes the EIP-712 signing hash for an authorization under `domain`.
pub fn authorization_signing_hash(auth: &Eip3009Authorization, domain: &Eip712Domain) -> B256 {
    let message = TransferWithAuthorization {
        from: auth.from.into(),
        to: auth.to.into(),
        value: auth.value.into(),
        validAfter: auth.valid_after.into(),
        validBefore: auth.valid_before.into(),
        nonce: alloy::primitives::FixedBytes(auth.nonce.0),
    };
    message.eip712_signing_hash(domain)
}

/// Recovers the signer of an ERC-3009 authorization from its 65-byte
/// signature. The caller compares the result against the claimed `from`.
pub fn recover_authorization_signer(
    auth: &Eip3009Authorization,
    signature: &EvmSignature,
    domain: &Eip712Domain,
) -> Result<EvmAddress, ChainError> {
    let signature = Signature::from_raw_array(&signature.0)
        .map_err(|e| ChainError::Recovery(e.to_string()))?;
    let hash = authorization_signing_hash(auth, domain);
    let recovered = signature
        .recover_address_from_prehash(&hash)
        .map_err(|e| ChainError::Recovery(e.to_string()))?;
    Ok(recovered.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PaymentMethod;
    use crate::types::{HexEncodedNonce, TokenAmount, UnixTimestamp};
    use alloy::signers::SignerSync;
    use alloy::signers::local::PrivateKeySigner;

    fn usdc() -> TokenDescriptor {
        Network::EspaceTestnet
            .token_by_method(PaymentMethod::Eip3009)
            .unwrap()
            .clone()
    }

    fn sample_authorization(from: EvmAddress) -> Eip3009Authorization {
        Eip3009Authorization {
            from,
            to: "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".parse().unwrap(),
            value: TokenAmount::from(1000u64),
            valid_after: UnixTimestamp(0),
            valid_before: UnixTimestamp(u64::MAX),
            nonce: HexEncodedNonce([0x42; 32]),
        }
    }

    #[test]
    fn sign_and_recover_round_trip() {
        let signer = PrivateKeySigner::random();
        let auth = sample_authorization(signer.address().into());
        let domain = token_eip712_domain(&usdc(), 71).unwrap();

        let hash = authorization_signing_hash(&auth, &domain);
        let signature = signer.sign_hash_sync(&hash).unwrap();
        let signature = EvmSignature(signature.as_bytes());

        let recovered = recover_authorization_signer(&auth, &signature, &domain).unwrap();
        assert_eq!(recovered, signer.address().into());
    }

    #[test]
    fn tampered_fields_break_recovery() {
        let signer = PrivateKeySigner::random();
        let domain = token_eip712_domain(&usdc(), 71).unwrap();
        let auth = sample_authorization(signer.address().into());
        let hash = authorization_signing_hash(&auth, &domain);
        let signature = EvmSignature(signer.sign_hash_sync(&hash).unwrap().as_bytes());

        let mut tampered = Vec::new();
        let mut t = auth;
        t.value = TokenAmount::from(9999u64);
        tampered.push(t);
        let mut t = auth;
        t.to = EvmAddress::ZERO;
        tampered.push(t);
        let mut t = auth;
        t.valid_before = UnixTimestamp(12345);
        tampered.push(t);
        let mut t = auth;
        t.nonce = HexEncodedNonce([0xff; 32]);
        tampered.push(t);

        for bad in tampered {
            let recovered = recover_authorization_signer(&bad, &signature, &domain).unwrap();
            assert_ne!(recovered, signer.address().into());
        }
    }

    #[test]
    fn native_token_has_no_domain() {
        let cfx = Network::EspaceTestnet
            .token_by_method(PaymentMethod::Native)
            .unwrap();
        assert!(token_eip712_domain(cfx, 71).is_none());
    }
}
