//! Pass-through handler: the pool is visible to the wallet, but no
//! protocol actions run through it. Positions reflect a held receipt
//! asset when one is configured.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use earnkit_core::error::EarningError;
use earnkit_core::types::{
    EarningStatus, YieldPoolInfo, YieldPoolStatistic, YieldPositionInfo, now_ms,
};

use crate::config::ChainEarningEntry;
use crate::context::HandlerContext;
use crate::handler::{
    SubscriptionHandle, YieldPoolHandler, spawn_pool_info_worker, spawn_position_worker,
};
use crate::stats;

#[derive(Clone)]
pub struct PassthroughHandler {
    entry: Arc<ChainEarningEntry>,
    ctx: Arc<HandlerContext>,
    slug: String,
}

impl PassthroughHandler {
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
impl YieldPoolHandler for PassthroughHandler {
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
        let asset = self
            .entry
            .derivative_asset
            .as_deref()
            .unwrap_or(&self.entry.input_asset)
            .to_string();

        let mut positions = Vec::with_capacity(addresses.len());
        for address in addresses {
            let held = self
                .ctx
                .balances
                .transferable(address, &self.entry.chain, &asset)
                .await?;
            let status = if held > 0 {
                EarningStatus::EarningReward
            } else {
                EarningStatus::NotEarning
            };
            positions.push(YieldPositionInfo::with_computed_total(
                self.slug.clone(),
                self.entry.chain.clone(),
                address.clone(),
                self.pool_type(),
                held,
                status,
                vec![],
                vec![],
            ));
        }
        Ok(positions)
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

    // Every join/exit operation keeps the trait's "unsupported" default.
}
