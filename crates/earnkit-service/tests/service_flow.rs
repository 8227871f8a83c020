//! End-to-end service behavior over in-memory collaborators: fan-out
//! into the stores, persisted cache, lifecycle reloads, and the join
//! process records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use earnkit_core::types::{Balance, YieldPoolTarget};
use earnkit_core::{EarningError, ExtrinsicSpec, JoinRequest, ProcessState};
use earnkit_handlers::{
    BalanceProvider, ChainApi, ChainEarningEntry, EraProgress, HandlerContext, HandlerVariant,
    Nominations, StakingConstants, StakingLedger,
};
use earnkit_service::testing::{NoopChainApi, NoopEvm, NoopXcm};
use earnkit_service::{AccountProvider, BusEvent, EarningService, ServiceConfig, StoreConfig};

const SLUG: &str = "DOT___native_staking___polkadot";

/// Chain API with configurable ledgers, everything else delegated to
/// the no-op implementation.
struct TestChain {
    ledgers: Mutex<HashMap<String, StakingLedger>>,
}

#[async_trait]
impl ChainApi for TestChain {
    async fn wait_ready(&self, _chain: &str) -> Result<(), EarningError> {
        Ok(())
    }

    async fn staking_constants(&self, _chain: &str) -> Result<StakingConstants, EarningError> {
        Ok(StakingConstants {
            min_nominator_bond: 1_000,
            min_pool_join_bond: 100,
            max_nominations: 16,
            max_unlocking_chunks: 32,
            bonding_duration_eras: 28,
            existential_deposit: 1,
        })
    }

    async fn era_progress(&self, _chain: &str) -> Result<EraProgress, EarningError> {
        Ok(EraProgress {
            index: 100,
            start_ms: 0,
            duration_ms: 3_600_000,
        })
    }

    async fn staking_ledgers(
        &self,
        _chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<StakingLedger>>, EarningError> {
        let ledgers = self.ledgers.lock().unwrap();
        Ok(addresses.iter().map(|a| ledgers.get(a).cloned()).collect())
    }

    async fn nominations(
        &self,
        _chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<Nominations>>, EarningError> {
        Ok(addresses.iter().map(|_| None).collect())
    }

    async fn validator_snapshots(
        &self,
        chain: &str,
    ) -> Result<Vec<earnkit_handlers::ValidatorSnapshot>, EarningError> {
        NoopChainApi.validator_snapshots(chain).await
    }

    async fn bonded_pools(
        &self,
        chain: &str,
    ) -> Result<Vec<earnkit_handlers::BondedPool>, EarningError> {
        NoopChainApi.bonded_pools(chain).await
    }

    async fn pool_members(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<earnkit_handlers::PoolMember>>, EarningError> {
        NoopChainApi.pool_members(chain, addresses).await
    }

    async fn delegator_states(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Option<earnkit_handlers::DelegatorState>>, EarningError> {
        NoopChainApi.delegator_states(chain, addresses).await
    }

    async fn collator_candidates(
        &self,
        chain: &str,
    ) -> Result<Vec<earnkit_handlers::CollatorCandidate>, EarningError> {
        NoopChainApi.collator_candidates(chain).await
    }

    async fn dapp_stakes(
        &self,
        chain: &str,
        addresses: &[String],
    ) -> Result<Vec<Vec<earnkit_handlers::DappStake>>, EarningError> {
        NoopChainApi.dapp_stakes(chain, addresses).await
    }

    async fn dapp_registry(
        &self,
        chain: &str,
    ) -> Result<Vec<earnkit_handlers::DappInfo>, EarningError> {
        NoopChainApi.dapp_registry(chain).await
    }

    async fn exchange_rate(
        &self,
        chain: &str,
        derivative_asset: &str,
    ) -> Result<earnkit_handlers::ExchangeRate, EarningError> {
        NoopChainApi.exchange_rate(chain, derivative_asset).await
    }

    async fn estimate_fee(
        &self,
        _chain: &str,
        _call: &ExtrinsicSpec,
    ) -> Result<Balance, EarningError> {
        Ok(5)
    }
}

struct RichBalances;

#[async_trait]
impl BalanceProvider for RichBalances {
    async fn transferable(
        &self,
        _address: &str,
        _chain: &str,
        _asset: &str,
    ) -> Result<Balance, EarningError> {
        Ok(1_000_000_000)
    }

    async fn min_balance(&self, _chain: &str, _asset: &str) -> Result<Balance, EarningError> {
        Ok(1)
    }
}

/// Mutable address set, always ready.
struct MutableAccounts(Mutex<Vec<String>>);

#[async_trait]
impl AccountProvider for MutableAccounts {
    async fn wait_ready(&self) -> Result<(), EarningError> {
        Ok(())
    }

    async fn addresses(&self) -> Result<Vec<String>, EarningError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

fn test_context(ledgers: &[(&str, Balance)]) -> Arc<HandlerContext> {
    let map: HashMap<String, StakingLedger> = ledgers
        .iter()
        .map(|(address, active)| (address.to_string(), StakingLedger::new(*active, vec![])))
        .collect();
    Arc::new(HandlerContext::new(
        Arc::new(TestChain {
            ledgers: Mutex::new(map),
        }),
        Arc::new(RichBalances),
        Arc::new(NoopEvm),
        Arc::new(NoopXcm),
    ))
}

fn relay_table() -> Vec<ChainEarningEntry> {
    let mut entry = ChainEarningEntry::new(
        "polkadot",
        HandlerVariant::RelayStaking,
        "DOT",
        "Polkadot staking",
    );
    entry.refresh_interval_secs = 1;
    vec![entry]
}

fn fast_config(db_path: Option<std::path::PathBuf>) -> ServiceConfig {
    ServiceConfig {
        store: StoreConfig {
            soft_delay: Duration::from_millis(20),
            hard_ceiling: Duration::from_millis(200),
        },
        reload_debounce: Duration::from_millis(50),
        targets_cache_ttl: Duration::from_secs(300),
        db_path,
    }
}

fn temp_db(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("earnkit-test-{}-{name}.db", std::process::id()))
}

#[tokio::test]
async fn subscriptions_flow_into_both_stores() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("earnkit_service=debug,info")
        .try_init();

    let service = EarningService::new(
        fast_config(None),
        test_context(&[("alice", 50_000)]),
        Arc::new(MutableAccounts(Mutex::new(vec!["alice".to_string()]))),
        relay_table(),
    )
    .unwrap();

    let mut pool_rx = service.subscribe_yield_pool_info();
    let mut position_rx = service.subscribe_yield_position();
    service.start(vec!["polkadot".to_string()]).await.unwrap();

    let pools = pool_rx.recv().await.unwrap();
    assert_eq!(pools[0].slug, SLUG);
    assert_eq!(pools[0].statistic.as_ref().unwrap().min_join_amount, 1_000);

    let positions = position_rx.recv().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert!(positions[0].check_total());

    assert!(service.yield_pool(SLUG).is_some());
    let position = service.yield_position("alice", SLUG).unwrap();
    assert_eq!(position.active_stake, 50_000);

    service.shutdown();
}

#[tokio::test]
async fn account_removal_prunes_positions_and_resubscribes() {
    let accounts = Arc::new(MutableAccounts(Mutex::new(vec!["alice".to_string()])));
    let service = EarningService::new(
        fast_config(None),
        test_context(&[("alice", 50_000)]),
        accounts.clone(),
        relay_table(),
    )
    .unwrap();
    let (bus_tx, bus_rx) = broadcast::channel(16);
    service.attach_bus(bus_rx);
    service.start(vec!["polkadot".to_string()]).await.unwrap();

    let mut position_rx = service.subscribe_yield_position();
    position_rx.recv().await.unwrap();
    assert!(service.yield_position("alice", SLUG).is_some());

    // The wallet dropped the account; the provider no longer lists it.
    accounts.0.lock().unwrap().clear();
    bus_tx
        .send(BusEvent::AccountRemoved {
            address: "alice".to_string(),
        })
        .unwrap();

    // Debounced reload plus a couple of refresh intervals.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(service.yield_position("alice", SLUG).is_none());

    service.shutdown();
}

#[tokio::test]
async fn disabling_a_chain_prunes_its_positions_but_keeps_pool_info() {
    let service = EarningService::new(
        fast_config(None),
        test_context(&[("alice", 50_000)]),
        Arc::new(MutableAccounts(Mutex::new(vec!["alice".to_string()]))),
        relay_table(),
    )
    .unwrap();
    let (bus_tx, bus_rx) = broadcast::channel(16);
    service.attach_bus(bus_rx);
    service.start(vec!["polkadot".to_string()]).await.unwrap();

    let mut position_rx = service.subscribe_yield_position();
    position_rx.recv().await.unwrap();

    bus_tx
        .send(BusEvent::ChainStateUpdated {
            chain: "polkadot".to_string(),
            active: false,
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(service.yield_position("alice", SLUG).is_none());
    // Pool descriptors survive everything short of a full reset.
    assert!(service.yield_pool(SLUG).is_some());

    service.shutdown();
}

#[tokio::test]
async fn join_process_walks_validate_execute_complete() {
    let service = EarningService::new(
        fast_config(None),
        test_context(&[]),
        Arc::new(MutableAccounts(Mutex::new(vec!["alice".to_string()]))),
        relay_table(),
    )
    .unwrap();
    service.start(vec!["polkadot".to_string()]).await.unwrap();

    let req = JoinRequest {
        address: "alice".to_string(),
        amount: 5_000,
        slug: SLUG.to_string(),
        targets: vec![YieldPoolTarget {
            id: "validator-a".to_string(),
            name: None,
            commission: 0.1,
            total_stake: 0,
            own_stake: 0,
            other_stake: 0,
            nominator_count: 0,
            is_crowded: false,
            blocked: false,
            is_verified: false,
            min_bond: 0,
            expected_return: None,
        }],
    };

    let path = service.generate_optimal_steps(&req).await.unwrap();
    assert!(path.check_shape().is_ok());

    let validation = service.validate_yield_join(&req, &path).await.unwrap();
    assert!(validation.issues.is_empty());
    let pid = validation.process_id.unwrap();
    assert_eq!(service.process_state(pid), Some(ProcessState::Validating));

    // The caller-supplied step index is checked against the record.
    assert!(service.handle_yield_join(pid, 0).await.is_err());
    assert!(service.handle_yield_join(pid, 2).await.is_err());

    let result = service.handle_yield_join(pid, 1).await.unwrap();
    assert_eq!(result.transfer_native_amount, 5_000);
    assert_eq!(service.process_state(pid), Some(ProcessState::Submitting(1)));

    let state = service.complete_yield_step(pid).unwrap();
    assert_eq!(state, ProcessState::Done);

    service.shutdown();
}

#[tokio::test]
async fn user_rejection_at_the_first_step_discards_the_process() {
    let service = EarningService::new(
        fast_config(None),
        test_context(&[]),
        Arc::new(MutableAccounts(Mutex::new(vec!["alice".to_string()]))),
        relay_table(),
    )
    .unwrap();
    service.start(vec!["polkadot".to_string()]).await.unwrap();

    let req = JoinRequest {
        address: "alice".to_string(),
        amount: 5_000,
        slug: SLUG.to_string(),
        targets: vec![],
    };
    let path = service.generate_optimal_steps(&req).await.unwrap();
    let pid = service
        .validate_yield_join(&req, &path)
        .await
        .unwrap()
        .process_id
        .unwrap();

    service.handle_yield_join(pid, 1).await.unwrap();
    let state = service.fail_yield_step(pid, true).unwrap();
    assert_eq!(state, ProcessState::Idle);
    // Rolled back to idle: the record is gone.
    assert_eq!(service.process_state(pid), None);

    service.shutdown();
}

#[tokio::test]
async fn persisted_cache_survives_a_restart() {
    let db_path = temp_db("restart");
    let _ = std::fs::remove_file(&db_path);

    {
        let service = EarningService::new(
            fast_config(Some(db_path.clone())),
            test_context(&[("alice", 77_000)]),
            Arc::new(MutableAccounts(Mutex::new(vec!["alice".to_string()]))),
            relay_table(),
        )
        .unwrap();
        let mut position_rx = service.subscribe_yield_position();
        service.start(vec!["polkadot".to_string()]).await.unwrap();
        position_rx.recv().await.unwrap();
        // Let the fire-and-forget flush land before tearing down.
        tokio::time::sleep(Duration::from_millis(200)).await;
        service.shutdown();
    }

    // Fresh service, no addresses: whatever it shows must come from the
    // hydrated cache.
    let service = EarningService::new(
        fast_config(Some(db_path.clone())),
        test_context(&[]),
        Arc::new(MutableAccounts(Mutex::new(Vec::new()))),
        relay_table(),
    )
    .unwrap();
    service.start(vec!["polkadot".to_string()]).await.unwrap();

    let position = service.yield_position("alice", SLUG).unwrap();
    assert_eq!(position.active_stake, 77_000);
    assert!(position.check_total());

    service.shutdown();
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn unknown_slugs_surface_pool_not_found() {
    let service = EarningService::new(
        fast_config(None),
        test_context(&[]),
        Arc::new(MutableAccounts(Mutex::new(Vec::new()))),
        relay_table(),
    )
    .unwrap();
    service.start(vec!["polkadot".to_string()]).await.unwrap();

    let req = JoinRequest {
        address: "alice".to_string(),
        amount: 1,
        slug: "GLMR___native_staking___moonbeam".to_string(),
        targets: vec![],
    };
    assert!(matches!(
        service.generate_optimal_steps(&req).await.unwrap_err(),
        EarningError::PoolNotFound(_)
    ));

    service.shutdown();
}
