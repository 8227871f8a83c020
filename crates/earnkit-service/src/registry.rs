//! Handler registry: one handler per table entry on an active chain,
//! keyed by slug.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use earnkit_handlers::{ChainEarningEntry, HandlerContext, YieldPoolHandler, build_handler};

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn YieldPoolHandler>>,
}

impl HandlerRegistry {
    /// Instantiate handlers for every table entry whose chain is active.
    pub fn build(
        table: &[ChainEarningEntry],
        active_chains: &HashSet<String>,
        ctx: &Arc<HandlerContext>,
    ) -> Self {
        let mut handlers = HashMap::new();
        for entry in table {
            if !active_chains.contains(&entry.chain) {
                continue;
            }
            let slug = entry.slug();
            if handlers.contains_key(&slug) {
                tracing::warn!(slug = %slug, "duplicate table entry skipped");
                continue;
            }
            tracing::debug!(slug = %slug, chain = %entry.chain, "registering handler");
            handlers.insert(slug, build_handler(entry.clone(), ctx.clone()));
        }
        tracing::info!("handler registry built with {} handlers", handlers.len());
        Self { handlers }
    }

    pub fn get(&self, slug: &str) -> Option<Arc<dyn YieldPoolHandler>> {
        self.handlers.get(slug).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn YieldPoolHandler>)> {
        self.handlers.iter()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use earnkit_handlers::default_chain_table;

    use crate::testing::noop_context;

    #[tokio::test]
    async fn only_active_chains_get_handlers() {
        let table = default_chain_table();
        let active: HashSet<String> = ["polkadot".to_string()].into_iter().collect();
        let registry = HandlerRegistry::build(&table, &active, &noop_context());

        assert_eq!(registry.len(), 2);
        assert!(registry.get("DOT___native_staking___polkadot").is_some());
        assert!(registry.get("DOT___nomination_pool___polkadot").is_some());
        assert!(registry.get("KSM___native_staking___kusama").is_none());
    }

    #[tokio::test]
    async fn empty_active_set_builds_an_empty_registry() {
        let registry =
            HandlerRegistry::build(&default_chain_table(), &HashSet::new(), &noop_context());
        assert!(registry.is_empty());
    }
}
