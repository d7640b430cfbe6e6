//! Configuration of the facilitator server.
//!
//! Everything is settable as a CLI flag or environment variable; `.env`
//! values are loaded by the entrypoint before parsing. The relayer key and
//! the API key have no defaults on purpose — the server refuses to start
//! without them.

use alloy::signers::local::PrivateKeySigner;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};

use crate::network::Network;
use crate::types::EvmAddress;

#[derive(Parser, Debug)]
#[command(name = "x402-espace")]
#[command(about = "x402 facilitator HTTP server for Conflux eSpace")]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind.
    #[arg(long, env = "PORT", default_value_t = 8402)]
    pub port: u16,

    /// Shared secret expected in the `X-API-Key` header.
    #[arg(long = "api-key", env = "FACILITATOR_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Relayer private key (hex). The facilitator is the only component
    /// that holds this key.
    #[arg(long = "private-key", env = "EVM_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: String,

    /// Network used when a request names no chain id.
    #[arg(long = "default-network", env = "DEFAULT_NETWORK", default_value = "eip155:71")]
    pub default_network: Network,

    /// Address of the payment-receiving contract, reported by the health
    /// endpoint.
    #[arg(long = "payment-contract", env = "PAYMENT_CONTRACT")]
    pub payment_contract: EvmAddress,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid relayer private key: {0}")]
pub struct SignerConfigError(String);

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Parses the configured relayer key into a local signer.
    pub fn signer(&self) -> Result<PrivateKeySigner, SignerConfigError> {
        self.private_key
            .parse::<PrivateKeySigner>()
            .map_err(|e| SignerConfigError(e.to_string()))
    }
}
