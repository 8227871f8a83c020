//! Off-chain statistics and index feeds.
//!
//! APY/TVL come from untrusted external endpoints and are best-effort:
//! every fetch races a fixed timeout and degrades to "no statistics"
//! instead of holding up a pool-info emission.

use std::time::Duration;

use serde::Deserialize;

use earnkit_core::types::{Balance, EarningStatus, YieldPoolType, YieldPositionInfo};
use earnkit_core::{EarningError, derive_pool_slug};

/// How long an off-chain fetch may run before it is abandoned.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(8);

/// Best-effort statistics for one pool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OffchainStats {
    #[serde(default)]
    pub apy: Option<f64>,
    #[serde(default)]
    pub apr: Option<f64>,
    #[serde(default)]
    pub tvl: Option<String>,
}

impl OffchainStats {
    /// APY as reported, or compounded from a reported APR at the given
    /// payout period.
    pub fn apy_or_compounded(&self, period_ms: u64) -> Option<f64> {
        self.apy.or_else(|| {
            self.apr
                .map(|apr| earnkit_core::rates::annual_apr_to_apy(apr, period_ms))
        })
    }

    pub fn tvl_amount(&self) -> Option<Balance> {
        self.tvl.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct StatsDocument {
    #[serde(default)]
    pools: std::collections::HashMap<String, OffchainStats>,
}

/// Fetch statistics for `slug`, or `None` on timeout / error / absence.
pub async fn fetch_pool_stats(
    client: &reqwest::Client,
    url: &str,
    slug: &str,
) -> Option<OffchainStats> {
    let fetch = async {
        let document: StatsDocument = client.get(url).send().await?.json().await?;
        Ok::<_, reqwest::Error>(document)
    };
    match tokio::time::timeout(FETCH_TIMEOUT, fetch).await {
        Ok(Ok(mut document)) => document.pools.remove(slug),
        Ok(Err(e)) => {
            tracing::warn!(url, slug, "statistics fetch failed: {e}");
            None
        }
        Err(_) => {
            tracing::warn!(url, slug, "statistics fetch timed out");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndexedPositionRow {
    address: String,
    #[serde(default)]
    active_stake: String,
}

#[derive(Debug, Deserialize)]
struct IndexedRewardRow {
    event_index: u64,
    #[serde(default)]
    amount: String,
    #[serde(default)]
    block_timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct IndexDocument {
    #[serde(default)]
    positions: Vec<IndexedPositionRow>,
}

#[derive(Debug, Deserialize)]
struct RewardDocument {
    #[serde(default)]
    rewards: Vec<IndexedRewardRow>,
}

/// Fetch positions for a batch of addresses from an external index.
///
/// Unlike statistics, the index is the only source the indexed-staking
/// variant has, so failures propagate instead of degrading silently.
pub async fn fetch_indexed_positions(
    client: &reqwest::Client,
    url: &str,
    chain: &str,
    symbol: &str,
    addresses: &[String],
) -> Result<Vec<YieldPositionInfo>, EarningError> {
    let slug = derive_pool_slug(symbol, YieldPoolType::NativeStaking, chain);
    let request = client
        .get(url)
        .query(&[("addresses", addresses.join(","))])
        .send();

    let document: IndexDocument = match tokio::time::timeout(FETCH_TIMEOUT, request).await {
        Ok(Ok(response)) => response
            .json()
            .await
            .map_err(|e| EarningError::InvalidData(format!("index document: {e}")))?,
        Ok(Err(e)) => return Err(EarningError::ChainApi(format!("index fetch: {e}"))),
        Err(_) => return Err(EarningError::ChainApi("index fetch timed out".to_string())),
    };

    let mut by_address: std::collections::HashMap<String, Balance> = document
        .positions
        .into_iter()
        .map(|row| {
            let amount = row.active_stake.parse().unwrap_or(0);
            (row.address, amount)
        })
        .collect();

    // Keep caller input order; addresses absent from the index are
    // reported as empty positions.
    Ok(addresses
        .iter()
        .map(|address| {
            let active = by_address.remove(address).unwrap_or(0);
            let status = if active > 0 {
                EarningStatus::EarningReward
            } else {
                EarningStatus::NotEarning
            };
            YieldPositionInfo::with_computed_total(
                slug.clone(),
                chain,
                address.clone(),
                YieldPoolType::NativeStaking,
                active,
                status,
                vec![],
                vec![],
            )
        })
        .collect())
}

/// Fetch the reward history of one address from an external index.
pub async fn fetch_reward_history(
    client: &reqwest::Client,
    url: &str,
    slug: &str,
    address: &str,
) -> Result<Vec<earnkit_core::types::EarningRewardHistoryItem>, EarningError> {
    let request = client
        .get(format!("{url}/rewards"))
        .query(&[("address", address)])
        .send();

    let document: RewardDocument = match tokio::time::timeout(FETCH_TIMEOUT, request).await {
        Ok(Ok(response)) => response
            .json()
            .await
            .map_err(|e| EarningError::InvalidData(format!("reward document: {e}")))?,
        Ok(Err(e)) => return Err(EarningError::ChainApi(format!("reward fetch: {e}"))),
        Err(_) => return Err(EarningError::ChainApi("reward fetch timed out".to_string())),
    };

    Ok(document
        .rewards
        .into_iter()
        .map(|row| earnkit_core::types::EarningRewardHistoryItem {
            slug: slug.to_string(),
            address: address.to_string(),
            event_index: row.event_index,
            amount: row.amount.parse().unwrap_or(0),
            block_timestamp: row.block_timestamp,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_document_parses_partial_entries() {
        let json = r#"{ "pools": {
            "DOT___native_staking___polkadot": { "apy": 0.15 },
            "KSM___native_staking___kusama": { "tvl": "123456" }
        }}"#;
        let document: StatsDocument = serde_json::from_str(json).unwrap();
        let dot = &document.pools["DOT___native_staking___polkadot"];
        assert_eq!(dot.apy, Some(0.15));
        assert_eq!(dot.tvl_amount(), None);
        let ksm = &document.pools["KSM___native_staking___kusama"];
        assert_eq!(ksm.tvl_amount(), Some(123_456));
    }

    #[test]
    fn malformed_tvl_degrades_to_none() {
        let stats = OffchainStats {
            apy: None,
            apr: None,
            tvl: Some("not-a-number".to_string()),
        };
        assert_eq!(stats.tvl_amount(), None);
    }
}
