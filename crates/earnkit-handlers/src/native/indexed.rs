//! Minimal native-staking variant whose positions come from an external
//! index only. Joining and leaving through the wallet are unsupported;
//! the pool exists so existing stakes stay visible.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use earnkit_core::error::EarningError;
use earnkit_core::types::{YieldPoolInfo, YieldPoolStatistic, YieldPositionInfo, now_ms};

use crate::config::ChainEarningEntry;
use crate::context::HandlerContext;
use crate::handler::{
    SubscriptionHandle, YieldPoolHandler, spawn_pool_info_worker, spawn_position_worker,
};
use crate::stats;

#[derive(Clone)]
pub struct IndexedStakingHandler {
    entry: Arc<ChainEarningEntry>,
    ctx: Arc<HandlerContext>,
    slug: String,
}

impl IndexedStakingHandler {
    pub fn new(entry: ChainEarningEntry, ctx: Arc<HandlerContext>) -> Self {
        let slug = entry.slug();
        Self {
            entry: Arc::new(entry),
            ctx,
            slug,
        }
    }
}

#[async_trait]
impl YieldPoolHandler for IndexedStakingHandler {
    fn entry(&self) -> &ChainEarningEntry {
        &self.entry
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    fn slug(&self) -> &str {
        &self.slug
    }

    async fn fetch_pool_info(&self) -> Result<YieldPoolInfo, EarningError> {
        let offchain = match &self.entry.stats_url {
            Some(url) => stats::fetch_pool_stats(&self.ctx.http, url, &self.slug).await,
            None => None,
        };
        let statistic = YieldPoolStatistic {
            apy: offchain.as_ref().and_then(|s| s.apy),
            apr: offchain.as_ref().and_then(|s| s.apr),
            tvl: offchain.as_ref().and_then(|s| s.tvl_amount()),
            min_join_amount: self.entry.min_join_amount,
            unstaking_period_hours: None,
            max_unstake_requests: None,
        };
        Ok(YieldPoolInfo {
            slug: self.slug.clone(),
            chain: self.entry.chain.clone(),
            pool_type: self.pool_type(),
            metadata: self.entry.pool_metadata(),
            statistic: Some(statistic),
            last_updated: now_ms(),
        })
    }

    async fn fetch_positions(
        &self,
        addresses: &[String],
    ) -> Result<Vec<YieldPositionInfo>, EarningError> {
        let url = self.entry.index_url.as_deref().ok_or_else(|| {
            EarningError::InvalidData("indexed staking entry has no index url".to_string())
        })?;
        stats::fetch_indexed_positions(
            &self.ctx.http,
            url,
            &self.entry.chain,
            &self.entry.symbol,
            addresses,
        )
        .await
    }

    fn subscribe_pool_info(&self, sender: UnboundedSender<YieldPoolInfo>) -> SubscriptionHandle {
        spawn_pool_info_worker(self.clone(), sender)
    }

    fn subscribe_pool_position(
        &self,
        addresses: Vec<String>,
        sender: UnboundedSender<YieldPositionInfo>,
    ) -> SubscriptionHandle {
        spawn_position_worker(self.clone(), addresses, sender)
    }

    async fn fetch_reward_history(
        &self,
        address: &str,
    ) -> Result<Vec<earnkit_core::types::EarningRewardHistoryItem>, EarningError> {
        let url = self.entry.index_url.as_deref().ok_or_else(|| {
            EarningError::InvalidData("indexed staking entry has no index url".to_string())
        })?;
        stats::fetch_reward_history(&self.ctx.http, url, &self.slug, address).await
    }

    // Join, leave, withdraw and the rest keep the trait's "unsupported"
    // defaults: the index is read-only.
}
