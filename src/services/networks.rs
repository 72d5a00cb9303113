//! Static network registry for the supported EVM chains
//!
//! Centralized configuration for Arbitrum, BSC and Polygon, mainnet or
//! testnet selected once at startup via `USE_TESTNET`. Pure data; every
//! other service resolves chain ids, RPC endpoints, token contracts and
//! explorer links through this table.

use lazy_static::lazy_static;

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Registry key (e.g. "USDT-ARB")
    pub key: &'static str,
    pub name: &'static str,
    pub chain_id: u64,
    pub rpc_url: &'static str,
    /// Native gas token symbol
    pub native_symbol: &'static str,
    /// Stablecoin symbol and contract address on this chain
    pub token_symbol: &'static str,
    pub token_contract: &'static str,
    pub token_decimals: u32,
    /// Prefix for transaction explorer links
    pub explorer_tx_base: &'static str,
}

#[derive(Debug)]
pub struct UnknownNetwork(pub String);

impl std::fmt::Display for UnknownNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unsupported network: {}. Supported: {}",
            self.0,
            network_keys().join(", ")
        )
    }
}

impl std::error::Error for UnknownNetwork {}

const MAINNET: &[NetworkConfig] = &[
    NetworkConfig {
        key: "USDT-ARB",
        name: "Arbitrum",
        chain_id: 42161,
        rpc_url: "https://arb1.arbitrum.io/rpc",
        native_symbol: "ETH",
        token_symbol: "USDT",
        token_contract: "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9",
        token_decimals: 6,
        explorer_tx_base: "https://arbiscan.io/tx/",
    },
    NetworkConfig {
        key: "USDT-BSC",
        name: "BSC",
        chain_id: 56,
        rpc_url: "https://bsc-dataseed.binance.org/",
        native_symbol: "BNB",
        token_symbol: "USDT",
        token_contract: "0x55d398326f99059fF775485246999027B3197955",
        token_decimals: 18,
        explorer_tx_base: "https://bscscan.com/tx/",
    },
    NetworkConfig {
        key: "USDT-MATIC",
        name: "Polygon",
        chain_id: 137,
        rpc_url: "https://polygon-rpc.com/",
        native_symbol: "MATIC",
        token_symbol: "USDT",
        token_contract: "0xc2132D05D31c914a87C6611C10748AEb04B58e8F",
        token_decimals: 6,
        explorer_tx_base: "https://polygonscan.com/tx/",
    },
];

const TESTNET: &[NetworkConfig] = &[
    NetworkConfig {
        key: "USDT-ARB",
        name: "Arbitrum Sepolia",
        chain_id: 421614,
        rpc_url: "https://sepolia-rollup.arbitrum.io/rpc",
        native_symbol: "ETH",
        token_symbol: "USDT",
        token_contract: "0x0000000000000000000000000000000000000000",
        token_decimals: 6,
        explorer_tx_base: "https://sepolia.arbiscan.io/tx/",
    },
    NetworkConfig {
        key: "USDT-BSC",
        name: "BSC Testnet",
        chain_id: 97,
        rpc_url: "https://data-seed-prebsc-1-s1.binance.org:8545/",
        native_symbol: "BNB",
        token_symbol: "USDT",
        token_contract: "0x0000000000000000000000000000000000000000",
        token_decimals: 18,
        explorer_tx_base: "https://testnet.bscscan.com/tx/",
    },
    NetworkConfig {
        key: "USDT-MATIC",
        name: "Polygon Amoy",
        chain_id: 80002,
        rpc_url: "https://rpc-amoy.polygon.technology/",
        native_symbol: "MATIC",
        token_symbol: "USDT",
        token_contract: "0x0000000000000000000000000000000000000000",
        token_decimals: 6,
        explorer_tx_base: "https://amoy.polygonscan.com/tx/",
    },
];

lazy_static! {
    static ref ACTIVE: &'static [NetworkConfig] = {
        let testnet = std::env::var("USE_TESTNET")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if testnet {
            TESTNET
        } else {
            MAINNET
        }
    };
}

/// Look up a network by its registry key
pub fn get_network(key: &str) -> Result<&'static NetworkConfig, UnknownNetwork> {
    ACTIVE
        .iter()
        .find(|n| n.key == key)
        .ok_or_else(|| UnknownNetwork(key.to_string()))
}

pub fn network_keys() -> Vec<&'static str> {
    ACTIVE.iter().map(|n| n.key).collect()
}

/// Explorer link for a transaction hash on the given network
pub fn explorer_tx_url(config: &NetworkConfig, tx_hash: &str) -> String {
    format!("{}{}", config.explorer_tx_base, tx_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_network_lookup() {
        let config = get_network("USDT-ARB").unwrap();
        assert_eq!(config.name, "Arbitrum");
        assert_eq!(config.chain_id, 42161);
        assert_eq!(config.token_decimals, 6);
    }

    #[test]
    fn test_unknown_network_lists_supported_keys() {
        let err = get_network("USDT-SOL").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("USDT-SOL"));
        assert!(msg.contains("USDT-ARB"));
    }

    #[test]
    fn test_all_keys_resolve() {
        for key in network_keys() {
            assert!(get_network(key).is_ok());
        }
    }

    #[test]
    fn test_explorer_tx_url() {
        let config = get_network("USDT-BSC").unwrap();
        let url = explorer_tx_url(config, "0xabc");
        assert_eq!(url, "https://bscscan.com/tx/0xabc");
    }
}
