//! Per-chain connection pool owned by the facilitator service.
//!
//! Maps a chain id to a lazily constructed [`EvmChain`] (RPC client plus the
//! relayer signer). Entries are created on first use and read-mostly after
//! warmup. A concurrent first access may construct a redundant client, but
//! `DashMap::entry` makes the insert atomic, so readers never observe a torn
//! value.
//!
//! Environment:
//! - `RPC_URL_ESPACE_TESTNET`, `RPC_URL_ESPACE` — per-network RPC overrides;
//!   public endpoints are used when unset.

use alloy::network::EthereumWallet;
use alloy::signers::local::PrivateKeySigner;
use dashmap::DashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

use crate::chain::EvmChain;
use crate::network::Network;
use crate::types::EvmAddress;

/// Errors raised while resolving a chain connection.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The requested chain id maps to no configured network. Buyer- or
    /// operator-fixable; surfaced as 400 by the dispatcher.
    #[error("Unknown chain id: {0}")]
    UnknownChain(u64),
    /// The RPC URL for a network did not parse.
    #[error("Invalid RPC URL for {network}: {url}")]
    InvalidRpcUrl { network: Network, url: String },
}

/// Lazily populated chain-id → connection map plus the relayer identity.
///
/// One instance lives for the process; request handlers share it by
/// reference through the service state.
pub struct ConnectionPool {
    wallet: EthereumWallet,
    signer_address: EvmAddress,
    default_network: Network,
    chains: DashMap<u64, Arc<EvmChain>>,
}

impl ConnectionPool {
    pub fn new(signer: PrivateKeySigner, default_network: Network) -> Self {
        let signer_address: EvmAddress = signer.address().into();
        ConnectionPool {
            wallet: EthereumWallet::from(signer),
            signer_address,
            default_network,
            chains: DashMap::new(),
        }
    }

    pub fn default_network(&self) -> Network {
        self.default_network
    }

    /// The relayer identity all pooled chains sign with.
    pub fn signer_address(&self) -> EvmAddress {
        self.signer_address
    }

    /// Resolves the connection for an explicit chain id, or the boot-time
    /// default network when none was requested.
    pub fn chain(&self, chain_id: Option<u64>) -> Result<Arc<EvmChain>, PoolError> {
        match chain_id {
            Some(id) => {
                let network = Network::from_chain_id(id).ok_or(PoolError::UnknownChain(id))?;
                self.chain_for(network)
            }
            None => self.chain_for(self.default_network),
        }
    }

    /// Gets or lazily creates the connection for `network`.
    pub fn chain_for(&self, network: Network) -> Result<Arc<EvmChain>, PoolError> {
        if let Some(existing) = self.chains.get(&network.chain_id()) {
            return Ok(existing.clone());
        }
        let rpc_url = rpc_url_for(network)?;
        let entry = self
            .chains
            .entry(network.chain_id())
            .or_insert_with(|| {
                Arc::new(EvmChain::connect(
                    network,
                    rpc_url,
                    self.wallet.clone(),
                    self.signer_address,
                ))
            });
        Ok(entry.clone())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("signer_address", &self.signer_address)
            .field("default_network", &self.default_network)
            .field("connected", &self.chains.len())
            .finish()
    }
}

fn rpc_url_for(network: Network) -> Result<Url, PoolError> {
    let url = env::var(network.rpc_env_var()).unwrap_or_else(|_| network.default_rpc_url().to_string());
    Url::from_str(&url).map_err(|_| PoolError::InvalidRpcUrl { network, url })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ConnectionPool {
        ConnectionPool::new(PrivateKeySigner::random(), Network::EspaceTestnet)
    }

    #[test]
    fn unknown_chain_id_is_rejected() {
        let pool = pool();
        assert!(matches!(
            pool.chain(Some(8453)),
            Err(PoolError::UnknownChain(8453))
        ));
    }

    #[test]
    fn absent_chain_id_resolves_default_network() {
        let pool = pool();
        let chain = pool.chain(None).unwrap();
        assert_eq!(chain.network(), Network::EspaceTestnet);
    }

    #[test]
    fn repeated_lookups_share_one_connection() {
        let pool = pool();
        let first = pool.chain(Some(71)).unwrap();
        let second = pool.chain(Some(71)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
