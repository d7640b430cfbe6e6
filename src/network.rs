//! Network definitions and the static token registry.
//!
//! Two networks exist for the lifetime of the process — Conflux eSpace
//! testnet and mainnet — selected per request and never mutated. Each carries
//! a fixed set of payable tokens with their payment method, minimum price,
//! and (for EIP-3009 tokens) EIP-712 domain metadata.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::types::{EvmAddress, TokenAmount};

/// Supported networks, identified on the wire by their CAIP-2 chain id.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Conflux eSpace testnet (chain ID 71).
    #[serde(rename = "eip155:71")]
    EspaceTestnet,
    /// Conflux eSpace mainnet (chain ID 1030).
    #[serde(rename = "eip155:1030")]
    Espace,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.caip2())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown network: {0}")]
pub struct UnknownNetworkError(pub String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eip155:71" => Ok(Network::EspaceTestnet),
            "eip155:1030" => Ok(Network::Espace),
            other => Err(UnknownNetworkError(other.to_string())),
        }
    }
}

impl Network {
    /// All known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[Network::EspaceTestnet, Network::Espace]
    }

    /// Numeric EIP-155 chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::EspaceTestnet => 71,
            Network::Espace => 1030,
        }
    }

    /// CAIP-2 chain identifier string.
    pub fn caip2(&self) -> &'static str {
        match self {
            Network::EspaceTestnet => "eip155:71",
            Network::Espace => "eip155:1030",
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Option<Network> {
        Network::variants()
            .iter()
            .copied()
            .find(|n| n.chain_id() == chain_id)
    }

    /// Default JSON-RPC endpoint, overridable via `RPC_URL_*` env vars.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::EspaceTestnet => "https://evmtestnet.confluxrpc.com",
            Network::Espace => "https://evm.confluxrpc.com",
        }
    }

    /// Environment variable that overrides the RPC endpoint for this network.
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Network::EspaceTestnet => "RPC_URL_ESPACE_TESTNET",
            Network::Espace => "RPC_URL_ESPACE",
        }
    }

    pub fn explorer_url(&self) -> &'static str {
        match self {
            Network::EspaceTestnet => "https://evmtestnet.confluxscan.org",
            Network::Espace => "https://evm.confluxscan.org",
        }
    }

    /// Whether this is the designated non-production network. The demo
    /// auto-pay path refuses to run anywhere else.
    pub fn is_test(&self) -> bool {
        matches!(self, Network::EspaceTestnet)
    }

    /// Tokens payable on this network.
    pub fn tokens(&self) -> &'static [TokenDescriptor] {
        match self {
            Network::EspaceTestnet => &ESPACE_TESTNET_TOKENS,
            Network::Espace => &ESPACE_TOKENS,
        }
    }

    pub fn token_by_symbol(&self, symbol: &str) -> Option<&'static TokenDescriptor> {
        self.tokens().iter().find(|t| t.symbol == symbol)
    }

    /// Token to offer when the gated route did not name one: the gasless
    /// (EIP-3009) token if the network has one, otherwise the native coin.
    pub fn default_token(&self) -> &'static TokenDescriptor {
        self.tokens()
            .iter()
            .find(|t| t.payment_method == PaymentMethod::Eip3009)
            .or_else(|| {
                self.tokens()
                    .iter()
                    .find(|t| t.payment_method == PaymentMethod::Native)
            })
            .expect("network token registry is never empty")
    }

    /// Token matching a given payment method, if the network has one.
    pub fn token_by_method(&self, method: PaymentMethod) -> Option<&'static TokenDescriptor> {
        self.tokens().iter().find(|t| t.payment_method == method)
    }
}

/// How a payment is executed and verified on-chain.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Plain value transfer, broadcast and paid for by the buyer.
    Native,
    /// Buyer approves the payment contract; the relayer pulls via
    /// `payWithTokenFrom` and pays settlement gas.
    Erc20,
    /// Buyer signs an ERC-3009 authorization off-chain; the relayer submits
    /// `transferWithAuthorization` and absorbs all gas.
    Eip3009,
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentMethod::Native => "native",
            PaymentMethod::Erc20 => "erc20",
            PaymentMethod::Eip3009 => "eip3009",
        };
        write!(f, "{}", s)
    }
}

impl PaymentMethod {
    pub fn variants() -> &'static [PaymentMethod] {
        &[
            PaymentMethod::Native,
            PaymentMethod::Erc20,
            PaymentMethod::Eip3009,
        ]
    }

    /// URL path segment of the facilitator endpoints (`verify-<segment>`).
    pub fn route_segment(&self) -> &'static str {
        match self {
            PaymentMethod::Native => "native",
            PaymentMethod::Erc20 => "erc20",
            PaymentMethod::Eip3009 => "eip3009",
        }
    }
}

/// EIP-712 domain metadata of an EIP-3009-capable token. Must match the
/// token contract's `name()`/`version()` exactly or signatures will not
/// recover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEip712 {
    pub name: String,
    pub version: String,
}

/// A payable token on one network: configuration data, loaded at startup,
/// immutable at runtime. The zero address marks the native coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDescriptor {
    pub symbol: String,
    pub address: EvmAddress,
    pub decimals: u8,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub eip712: Option<TokenEip712>,
    /// Minimum price per query, in smallest units. Anything below is
    /// rejected regardless of scheme.
    pub min_amount: TokenAmount,
}

impl TokenDescriptor {
    pub fn is_native(&self) -> bool {
        self.address.is_zero()
    }
}

fn native_cfx() -> TokenDescriptor {
    TokenDescriptor {
        symbol: "CFX".to_string(),
        address: EvmAddress::ZERO,
        decimals: 18,
        payment_method: PaymentMethod::Native,
        eip712: None,
        // 0.000001 CFX
        min_amount: TokenAmount::from(1_000_000_000_000u64),
    }
}

static ESPACE_TESTNET_TOKENS: Lazy<Vec<TokenDescriptor>> = Lazy::new(|| {
    vec![
        native_cfx(),
        TokenDescriptor {
            symbol: "USDT".to_string(),
            address: "0x7d682e65efc5c13bf4e394b8f376c48e6bae0355"
                .parse()
                .expect("valid address"),
            decimals: 18,
            payment_method: PaymentMethod::Erc20,
            eip712: None,
            min_amount: TokenAmount::from(100u64),
        },
        TokenDescriptor {
            symbol: "USDC".to_string(),
            address: "0x349298b0e20df67defd6efb8f3f09111a44aac70"
                .parse()
                .expect("valid address"),
            decimals: 6,
            payment_method: PaymentMethod::Eip3009,
            eip712: Some(TokenEip712 {
                name: "USD Coin".to_string(),
                version: "2".to_string(),
            }),
            min_amount: TokenAmount::from(100u64),
        },
    ]
});

static ESPACE_TOKENS: Lazy<Vec<TokenDescriptor>> = Lazy::new(|| {
    vec![
        native_cfx(),
        TokenDescriptor {
            symbol: "USDT".to_string(),
            address: "0xfe97e85d13abd9c1c33384e796f10b73905637ce"
                .parse()
                .expect("valid address"),
            decimals: 18,
            payment_method: PaymentMethod::Erc20,
            eip712: None,
            min_amount: TokenAmount::from(1000u64),
        },
        TokenDescriptor {
            symbol: "USDC".to_string(),
            address: "0x6963efed0ab40f6c3d7bda44a05dcf1437c44372"
                .parse()
                .expect("valid address"),
            decimals: 18,
            payment_method: PaymentMethod::Eip3009,
            eip712: Some(TokenEip712 {
                name: "USD Coin".to_string(),
                version: "2".to_string(),
            }),
            min_amount: TokenAmount::from(1000u64),
        },
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_wire_format_is_caip2() {
        assert_eq!(
            serde_json::to_string(&Network::EspaceTestnet).unwrap(),
            "\"eip155:71\""
        );
        let network: Network = serde_json::from_str("\"eip155:1030\"").unwrap();
        assert_eq!(network, Network::Espace);
        assert!("eip155:8453".parse::<Network>().is_err());
    }

    #[test]
    fn chain_id_round_trip() {
        for network in Network::variants() {
            assert_eq!(Network::from_chain_id(network.chain_id()), Some(*network));
        }
        assert_eq!(Network::from_chain_id(1), None);
    }

    #[test]
    fn default_token_prefers_gasless() {
        for network in Network::variants() {
            let token = network.default_token();
            assert_eq!(token.payment_method, PaymentMethod::Eip3009);
            assert!(token.eip712.is_some());
        }
    }

    #[test]
    fn native_sentinel_is_zero_address() {
        let cfx = Network::EspaceTestnet
            .token_by_method(PaymentMethod::Native)
            .unwrap();
        assert!(cfx.is_native());
        assert_eq!(cfx.decimals, 18);
    }

    #[test]
    fn every_method_has_a_token_on_testnet() {
        for method in PaymentMethod::variants() {
            assert!(
                Network::EspaceTestnet.token_by_method(*method).is_some(),
                "missing token for {method}"
            );
        }
    }
}
