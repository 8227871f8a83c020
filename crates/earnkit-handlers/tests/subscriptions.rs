//! Subscription lifecycle: immediate first emission, periodic refresh,
//! cooperative cancellation.

mod support;

use earnkit_core::types::Balance;
use earnkit_handlers::{
    ChainEarningEntry, EraProgress, HandlerVariant, RelayStakingHandler, StakingConstants,
    StakingLedger, YieldPoolHandler,
};
use tokio::sync::mpsc;

use support::{MockChain, MockWorld};

fn relay_handler(query_delay_ms: u64) -> (MockWorld, RelayStakingHandler) {
    let chain = MockChain {
        constants: StakingConstants {
            min_nominator_bond: 100,
            max_nominations: 16,
            max_unlocking_chunks: 32,
            bonding_duration_eras: 28,
            ..Default::default()
        },
        era: EraProgress {
            index: 10,
            start_ms: 0,
            duration_ms: 3_600_000,
        },
        fee: 1,
        query_delay_ms,
        ..Default::default()
    };
    let world = MockWorld::new(chain, 0);
    let mut entry = ChainEarningEntry::new(
        "polkadot",
        HandlerVariant::RelayStaking,
        "DOT",
        "Polkadot staking",
    );
    entry.refresh_interval_secs = 1;
    let handler = RelayStakingHandler::new(entry, world.context());
    (world, handler)
}

#[tokio::test]
async fn pool_info_emits_immediately_and_then_on_the_interval() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("earnkit_handlers=debug,info")
        .try_init();

    let (_world, handler) = relay_handler(0);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = handler.subscribe_pool_info(tx);

    let first = rx.recv().await.expect("immediate emission");
    assert_eq!(first.slug, handler.slug());
    assert_eq!(first.statistic.as_ref().unwrap().min_join_amount, 100);

    let second = rx.recv().await.expect("interval emission");
    assert!(second.last_updated >= first.last_updated);

    handle.cancel();
}

#[tokio::test]
async fn cancellation_stops_emissions() {
    let (_world, handler) = relay_handler(0);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = handler.subscribe_pool_info(tx);

    rx.recv().await.expect("immediate emission");
    handle.cancel();
    // Cancelling twice is a no-op.
    handle.cancel();
    assert!(handle.is_cancelled());

    // Give the worker time to observe the token and wind down; nothing
    // further may arrive.
    tokio::time::sleep(std::time::Duration::from_millis(2_200)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn a_fetch_resolving_after_cancellation_emits_nothing() {
    // Every query stalls long enough for cancellation to land while the
    // first fetch is still in flight.
    let (_world, handler) = relay_handler(300);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = handler.subscribe_pool_info(tx);

    // Let the worker enter its fetch, then cancel mid-flight.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.cancel();

    // The stalled fetch resolves well within this window; the guard must
    // swallow its emission.
    tokio::time::sleep(std::time::Duration::from_millis(1_000)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn position_subscription_emits_batches_in_address_order() {
    let (world, handler) = relay_handler(0);
    world
        .chain
        .ledgers
        .lock()
        .unwrap()
        .insert("carol".to_string(), StakingLedger::new(4_000, vec![]));
    world
        .chain
        .ledgers
        .lock()
        .unwrap()
        .insert("dave".to_string(), StakingLedger::new(9_000, vec![]));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let addresses = vec!["dave".to_string(), "carol".to_string()];
    let handle = handler.subscribe_pool_position(addresses, tx);

    let first = rx.recv().await.expect("first position");
    let second = rx.recv().await.expect("second position");
    assert_eq!(first.address, "dave");
    assert_eq!(first.active_stake, 9_000 as Balance);
    assert_eq!(second.address, "carol");
    assert_eq!(second.active_stake, 4_000 as Balance);

    handle.cancel();
}

#[tokio::test]
async fn empty_address_batches_never_emit() {
    let (_world, handler) = relay_handler(0);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = handler.subscribe_pool_position(Vec::new(), tx);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
    handle.cancel();
}
