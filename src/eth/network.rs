//! EVM networks understood by the x402 `exact` scheme

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Static metadata for a network
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub network: Network,
    /// EVM chain ID, used as the EIP-712 domain `chainId`
    pub chain_id: u64,
    pub is_testnet: bool,
    /// Accepted spellings; the first is the wire name
    pub names: &'static [&'static str],
}

// One row per network. Generates the enum, its serde names, per-network info
// constants and the lookup table, so a network is only ever declared here.
macro_rules! define_networks {
    ($(
        $variant:ident => ($chain_id:expr, $is_testnet:expr, [$wire:expr $(, $alias:expr)* $(,)?])
    ),+ $(,)?) => {
        paste::paste! {
            /// Networks a payment challenge may name.
            #[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
            pub enum Network {
                $(
                    #[serde(rename = $wire)]
                    $variant,
                )+
            }

            $(
                const [<$variant:upper _INFO>]: NetworkInfo = NetworkInfo {
                    network: Network::$variant,
                    chain_id: $chain_id,
                    is_testnet: $is_testnet,
                    names: &[$wire $(, $alias)*],
                };
            )+

            const NETWORKS: &[NetworkInfo] = &[
                $( [<$variant:upper _INFO>] ),+
            ];

            impl Network {
                pub fn info(&self) -> &'static NetworkInfo {
                    match self {
                        $( Network::$variant => &[<$variant:upper _INFO>] ),+
                    }
                }
            }
        }
    };
}

define_networks! {
    Base             => (8453,     false, ["base", "Base"]),
    BaseSepolia      => (84532,    true,  ["base-sepolia", "BaseSepolia"]),
    Avalanche        => (43114,    false, ["avalanche", "Avalanche"]),
    AvalancheFuji    => (43113,    true,  ["avalanche-fuji", "AvalancheFuji"]),
    Polygon          => (137,      false, ["polygon", "Polygon"]),
    PolygonAmoy      => (80002,    true,  ["polygon-amoy", "PolygonAmoy"]),
    Sei              => (1329,     false, ["sei", "Sei"]),
    SeiTestnet       => (1328,     true,  ["sei-testnet", "SeiTestnet"]),
    Iotex            => (4689,     false, ["iotex", "IoTeX"]),
    Ethereum         => (1,        false, ["ethereum", "eth", "Ethereum"]),
    EthereumSepolia  => (11155111, true,  ["ethereum-sepolia", "sepolia"]),
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        self.info().chain_id
    }

    /// Wire name, as used in `PaymentRequirements.network`
    pub fn name(&self) -> &'static str {
        self.info().names[0]
    }

    pub fn is_testnet(&self) -> bool {
        self.info().is_testnet
    }

    /// Parse any known spelling, case-insensitively
    pub fn parse(s: &str) -> Option<Network> {
        NETWORKS.iter().find_map(|info| {
            info.names
                .iter()
                .any(|name| name.eq_ignore_ascii_case(s))
                .then_some(info.network)
        })
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Network::parse("base-sepolia"), Some(Network::BaseSepolia));
        assert_eq!(Network::parse("BASESEPOLIA"), Some(Network::BaseSepolia));
        assert_eq!(Network::parse("sepolia"), Some(Network::EthereumSepolia));
        assert!(Network::parse("solana").is_none());
    }

    #[test]
    fn test_wire_name_round_trip() {
        let json = serde_json::to_string(&Network::BaseSepolia).unwrap();
        assert_eq!(json, "\"base-sepolia\"");
        let parsed: Network = serde_json::from_str("\"avalanche-fuji\"").unwrap();
        assert_eq!(parsed, Network::AvalancheFuji);
        assert_eq!(parsed.chain_id(), 43113);
    }

    #[test]
    fn test_testnet_flag() {
        assert!(Network::BaseSepolia.is_testnet());
        assert!(!Network::Base.is_testnet());
    }
}
