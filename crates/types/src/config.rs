//! Node-wide consensus configuration.

use crate::amount::Amount;
use crate::crypto::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the consensus core, ledger and runners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Byte string mixed into every signed payload.
    #[serde(with = "network_id_hex")]
    pub network_id: Vec<u8>,
    /// Fixed address receiving all transaction fees and inflation.
    pub common_account: Address,
    /// Balance the genesis account starts with; also the inflation base.
    pub initial_balance: Amount,
    /// Decimal ratio string applied per block, compared byte-for-byte.
    pub inflation_ratio: String,
    /// Last height (inclusive) at which inflation is paid.
    pub end_of_inflation: u64,
    /// SIGN-phase threshold percentage.
    pub sign_threshold_pct: u32,
    /// ACCEPT-phase threshold percentage.
    pub accept_threshold_pct: u32,
    /// Time allowed for a round to reach SIGN before it is abandoned.
    #[serde(with = "duration_millis")]
    pub sign_timeout: Duration,
    /// Time allowed for a round to reach ACCEPT before it is abandoned.
    #[serde(with = "duration_millis")]
    pub accept_timeout: Duration,
    /// Maximum ordinary transactions per proposal.
    pub block_max_transactions: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            network_id: b"isaac-testnet".to_vec(),
            common_account: Address::ZERO,
            initial_balance: Amount::from(1_000_000_000_000_000_000),
            inflation_ratio: "0.0000001".to_string(),
            end_of_inflation: 36_000_000,
            sign_threshold_pct: 66,
            accept_threshold_pct: 66,
            sign_timeout: Duration::from_secs(2),
            accept_timeout: Duration::from_secs(2),
            block_max_transactions: 1_000,
        }
    }
}

mod network_id_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = ConsensusConfig::default();
        let raw = serde_json::to_string(&config).unwrap();
        let back: ConsensusConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.network_id, config.network_id);
        assert_eq!(back.sign_timeout, config.sign_timeout);
        assert_eq!(back.inflation_ratio, config.inflation_ratio);
    }
}
