//! The orchestration service: registry, subscription fan-out, reactive
//! stores with persisted flushes, event-driven reloads, and the public
//! facade over the join/exit pipelines.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use earnkit_core::error::{EarningError, ValidationIssue};
use earnkit_core::types::{YieldPoolInfo, YieldPoolTarget, YieldPositionInfo, now_ms};
use earnkit_core::{
    CancelUnstakeRequest, ClaimRewardRequest, EarningDb, ExitExecution, JoinProcess, JoinRequest,
    LeaveRequest, OptimalYieldPath, ProcessId, ProcessState, StepExecutionResult, WithdrawRequest,
    position_key,
};
use earnkit_handlers::{ChainEarningEntry, HandlerContext, SubscriptionHandle, YieldPoolHandler};

use crate::events::{BusEvent, ReloadDebouncer};
use crate::registry::HandlerRegistry;
use crate::store::{KeyedStore, StoreConfig, StoreSink};

/// The wallet-account collaborator: readiness plus the current address
/// set.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    async fn wait_ready(&self) -> Result<(), EarningError>;

    async fn addresses(&self) -> Result<Vec<String>, EarningError>;
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub store: StoreConfig,
    /// Quiet window collapsing near-simultaneous reload triggers.
    pub reload_debounce: Duration,
    /// How long a cached target list stays preferred over a live query.
    pub targets_cache_ttl: Duration,
    /// Cache database location; `None` keeps the cache in memory.
    pub db_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            reload_debounce: Duration::from_secs(1),
            targets_cache_ttl: Duration::from_secs(300),
            db_path: default_db_path(),
        }
    }
}

/// Default cache location under the platform data directory.
pub fn default_db_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("network", "earnkit", "earnkit")
        .map(|dirs| dirs.data_dir().join("earning-cache.db"))
}

/// Asynchronous access to the SQLite cache. SQLite calls hop through
/// `spawn_blocking`; flushes are fire-and-forget.
#[derive(Clone)]
struct DbHandle {
    db: Arc<Mutex<EarningDb>>,
}

impl DbHandle {
    fn open(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        let db = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                EarningDb::open(path)?
            }
            None => EarningDb::open_memory()?,
        };
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    async fn load_pools(&self) -> Vec<YieldPoolInfo> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.lock().expect("db lock").all_pools().unwrap_or_default()
        })
        .await
        .unwrap_or_default()
    }

    async fn load_positions(&self) -> Vec<YieldPositionInfo> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            db.lock()
                .expect("db lock")
                .all_positions()
                .unwrap_or_default()
        })
        .await
        .unwrap_or_default()
    }

    fn remove_positions_by_address(&self, address: String) {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = db
                .lock()
                .expect("db lock")
                .remove_positions_by_address(&address)
            {
                tracing::warn!("failed to prune positions of {address}: {e}");
            }
        });
    }

    fn remove_positions_by_chain(&self, chain: String) {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = db
                .lock()
                .expect("db lock")
                .remove_positions_by_chain(&chain)
            {
                tracing::warn!("failed to prune positions on {chain}: {e}");
            }
        });
    }

    async fn reset(&self) {
        let db = self.db.clone();
        let _ = tokio::task::spawn_blocking(move || db.lock().expect("db lock").reset()).await;
    }
}

impl StoreSink<YieldPoolInfo> for DbHandle {
    fn flush(&self, batch: Vec<YieldPoolInfo>) {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = db.lock().expect("db lock").upsert_pools(&batch) {
                tracing::warn!("pool cache flush failed: {e}");
            }
        });
    }
}

impl StoreSink<YieldPositionInfo> for DbHandle {
    fn flush(&self, batch: Vec<YieldPositionInfo>) {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = db.lock().expect("db lock").upsert_positions(&batch) {
                tracing::warn!("position cache flush failed: {e}");
            }
        });
    }
}

/// One cancellation handle covering a whole fan-out.
pub struct AggregateSubscription {
    children: Vec<SubscriptionHandle>,
}

impl AggregateSubscription {
    pub fn cancel(&self) {
        for child in &self.children {
            child.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Result of plan validation: issues, plus a process id when the plan
/// is clean and ready to execute.
#[derive(Debug)]
pub struct JoinValidation {
    pub issues: Vec<ValidationIssue>,
    pub process_id: Option<ProcessId>,
}

struct Inner {
    config: ServiceConfig,
    ctx: Arc<HandlerContext>,
    accounts: Arc<dyn AccountProvider>,
    table: Vec<ChainEarningEntry>,
    active_chains: RwLock<HashSet<String>>,
    registry: RwLock<HandlerRegistry>,
    pool_store: KeyedStore<YieldPoolInfo>,
    position_store: KeyedStore<YieldPositionInfo>,
    db: DbHandle,
    info_sub: Mutex<Option<AggregateSubscription>>,
    position_sub: Mutex<Option<AggregateSubscription>>,
    processes: Mutex<HashMap<ProcessId, JoinProcess>>,
    next_process: AtomicU64,
    targets_cache: Mutex<HashMap<String, (u64, Vec<YieldPoolTarget>)>>,
    shutdown: CancellationToken,
}

impl Inner {
    fn handler(&self, slug: &str) -> Result<Arc<dyn YieldPoolHandler>, EarningError> {
        self.registry
            .read()
            .expect("registry lock")
            .get(slug)
            .ok_or_else(|| EarningError::PoolNotFound(slug.to_string()))
    }

    fn rebuild_registry(&self) {
        let active = self.active_chains.read().expect("chains lock").clone();
        let registry = HandlerRegistry::build(&self.table, &active, &self.ctx);
        *self.registry.write().expect("registry lock") = registry;
    }

    /// Fan out the pool-info subscriptions: one child per handler, all
    /// feeding the pool store's queue.
    fn subscribe_pools_info(&self) {
        let mut children = Vec::new();
        {
            let registry = self.registry.read().expect("registry lock");
            for (slug, handler) in registry.iter() {
                tracing::debug!(slug = %slug, "starting pool info subscription");
                children.push(handler.subscribe_pool_info(self.pool_store.update_sender()));
            }
        }
        let aggregate = AggregateSubscription { children };
        if let Some(old) = self
            .info_sub
            .lock()
            .expect("sub lock")
            .replace(aggregate)
        {
            old.cancel();
        }
    }

    /// Fan out the position subscriptions for the current address set.
    fn subscribe_pools_position(&self, addresses: Vec<String>) {
        let mut children = Vec::new();
        {
            let registry = self.registry.read().expect("registry lock");
            for (slug, handler) in registry.iter() {
                tracing::debug!(slug = %slug, "starting position subscription");
                children.push(handler.subscribe_pool_position(
                    addresses.clone(),
                    self.position_store.update_sender(),
                ));
            }
        }
        let aggregate = AggregateSubscription { children };
        if let Some(old) = self
            .position_sub
            .lock()
            .expect("sub lock")
            .replace(aggregate)
        {
            old.cancel();
        }
    }

    fn unsubscribe_pools_position(&self) {
        if let Some(old) = self.position_sub.lock().expect("sub lock").take() {
            old.cancel();
        }
    }
}

/// Full resubscribe, run debounced after lifecycle events.
async fn run_reload(inner: Arc<Inner>) {
    if inner.shutdown.is_cancelled() {
        return;
    }
    tracing::info!("reloading earning subscriptions");
    inner.rebuild_registry();
    inner.subscribe_pools_info();
    inner.unsubscribe_pools_position();
    match inner.accounts.addresses().await {
        Ok(addresses) => inner.subscribe_pools_position(addresses),
        Err(e) => tracing::warn!("reload could not resolve addresses: {e}"),
    }
}

pub struct EarningService {
    inner: Arc<Inner>,
    reload: Arc<ReloadDebouncer>,
}

impl EarningService {
    pub fn new(
        config: ServiceConfig,
        ctx: Arc<HandlerContext>,
        accounts: Arc<dyn AccountProvider>,
        table: Vec<ChainEarningEntry>,
    ) -> anyhow::Result<Self> {
        let db = DbHandle::open(config.db_path.as_ref())?;
        let pool_sink: Arc<dyn StoreSink<YieldPoolInfo>> = Arc::new(db.clone());
        let position_sink: Arc<dyn StoreSink<YieldPositionInfo>> = Arc::new(db.clone());
        let pool_store = KeyedStore::new(config.store, Some(pool_sink));
        let position_store = KeyedStore::new(config.store, Some(position_sink));
        let shutdown = CancellationToken::new();
        let reload_debounce = config.reload_debounce;

        let inner = Arc::new(Inner {
            config,
            ctx,
            accounts,
            table,
            active_chains: RwLock::new(HashSet::new()),
            registry: RwLock::new(HandlerRegistry::default()),
            pool_store,
            position_store,
            db,
            info_sub: Mutex::new(None),
            position_sub: Mutex::new(None),
            processes: Mutex::new(HashMap::new()),
            next_process: AtomicU64::new(1),
            targets_cache: Mutex::new(HashMap::new()),
            shutdown: shutdown.clone(),
        });

        let reload = {
            let inner = inner.clone();
            Arc::new(ReloadDebouncer::new(reload_debounce, shutdown, move || {
                run_reload(inner.clone())
            }))
        };

        Ok(Self { inner, reload })
    }

    /// Wait for readiness signals, build the registry for the active
    /// chains, warm the stores from the cache, and start every
    /// subscription.
    pub async fn start(&self, chains: Vec<String>) -> Result<(), EarningError> {
        let mut ready = HashSet::new();
        for chain in chains {
            match self.inner.ctx.chain.wait_ready(&chain).await {
                Ok(()) => {
                    ready.insert(chain);
                }
                Err(e) => tracing::warn!(chain = %chain, "chain not ready, skipping: {e}"),
            }
        }
        self.inner.accounts.wait_ready().await?;

        *self.inner.active_chains.write().expect("chains lock") = ready;
        self.inner.rebuild_registry();

        self.inner
            .pool_store
            .hydrate(self.inner.db.load_pools().await);
        self.inner
            .position_store
            .hydrate(self.inner.db.load_positions().await);

        self.inner.subscribe_pools_info();
        let addresses = self.inner.accounts.addresses().await?;
        self.inner.subscribe_pools_position(addresses);
        Ok(())
    }

    /// Consume the external event bus until shutdown.
    pub fn attach_bus(&self, mut rx: broadcast::Receiver<BusEvent>) {
        let inner = self.inner.clone();
        let reload = self.reload.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => handle_bus_event(&inner, &reload, event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!("event bus lagged, {missed} events dropped");
                            reload.trigger();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    // ---- store reads ----------------------------------------------------

    pub fn pool_handler(&self, slug: &str) -> Option<Arc<dyn YieldPoolHandler>> {
        self.inner.registry.read().expect("registry lock").get(slug)
    }

    pub fn yield_pool(&self, slug: &str) -> Option<YieldPoolInfo> {
        self.inner.pool_store.get(slug)
    }

    pub fn yield_position(&self, address: &str, slug: &str) -> Option<YieldPositionInfo> {
        self.inner.position_store.get(&position_key(slug, address))
    }

    pub fn all_yield_pools(&self) -> Vec<YieldPoolInfo> {
        self.inner.pool_store.snapshot()
    }

    pub fn all_yield_positions(&self) -> Vec<YieldPositionInfo> {
        self.inner.position_store.snapshot()
    }

    pub fn subscribe_yield_pool_info(&self) -> broadcast::Receiver<Vec<YieldPoolInfo>> {
        self.inner.pool_store.subscribe()
    }

    pub fn subscribe_yield_position(&self) -> broadcast::Receiver<Vec<YieldPositionInfo>> {
        self.inner.position_store.subscribe()
    }

    // ---- join pipeline --------------------------------------------------

    pub async fn generate_optimal_steps(
        &self,
        req: &JoinRequest,
    ) -> Result<OptimalYieldPath, EarningError> {
        let handler = self.inner.handler(&req.slug)?;
        handler.generate_optimal_path(req).await
    }

    /// Validate the whole plan. A clean plan opens a join process whose
    /// id drives the step executions.
    pub async fn validate_yield_join(
        &self,
        req: &JoinRequest,
        path: &OptimalYieldPath,
    ) -> Result<JoinValidation, EarningError> {
        let handler = self.inner.handler(&req.slug)?;
        let issues = handler.validate_join(req, path).await?;
        if !issues.is_empty() {
            return Ok(JoinValidation {
                issues,
                process_id: None,
            });
        }
        let id = self.inner.next_process.fetch_add(1, Ordering::Relaxed);
        let process = JoinProcess::new(id, req.clone(), path.clone());
        self.inner
            .processes
            .lock()
            .expect("process lock")
            .insert(id, process);
        Ok(JoinValidation {
            issues,
            process_id: Some(id),
        })
    }

    /// Execute one step of an open process. The supplied step index is
    /// checked against the stored record, never trusted.
    pub async fn handle_yield_join(
        &self,
        process_id: ProcessId,
        step: usize,
    ) -> Result<StepExecutionResult, EarningError> {
        let (request, path) = {
            let mut processes = self.inner.processes.lock().expect("process lock");
            let process = processes
                .get_mut(&process_id)
                .ok_or(EarningError::ProcessNotFound(process_id))?;
            // Resolve the handler before claiming the step, so a missing
            // pool cannot leave the record stuck in Submitting.
            self.inner.handler(process.slug())?;
            process.begin_step(step)?;
            (process.request.clone(), process.path.clone())
        };

        let handler = self.inner.handler(&request.slug)?;
        match handler.handle_join(&request, &path, step).await {
            Ok(result) => Ok(result),
            Err(e) => {
                let user_rejected = matches!(e, EarningError::UserRejected);
                let mut processes = self.inner.processes.lock().expect("process lock");
                if let Some(process) = processes.get_mut(&process_id) {
                    let _ = process.fail_step(user_rejected);
                }
                Err(e)
            }
        }
    }

    /// Record the on-chain confirmation of the submitting step.
    pub fn complete_yield_step(&self, process_id: ProcessId) -> Result<ProcessState, EarningError> {
        let mut processes = self.inner.processes.lock().expect("process lock");
        let process = processes
            .get_mut(&process_id)
            .ok_or(EarningError::ProcessNotFound(process_id))?;
        process.complete_step()?;
        let state = process.state();
        if state.is_terminal() {
            // A finished join will show up on the next position emission.
            self.reload.trigger();
        }
        Ok(state)
    }

    /// Record a step failure reported by the transaction collaborator.
    pub fn fail_yield_step(
        &self,
        process_id: ProcessId,
        user_rejected: bool,
    ) -> Result<ProcessState, EarningError> {
        let mut processes = self.inner.processes.lock().expect("process lock");
        let process = processes
            .get_mut(&process_id)
            .ok_or(EarningError::ProcessNotFound(process_id))?;
        process.fail_step(user_rejected)?;
        let state = process.state();
        if state == ProcessState::Idle {
            processes.remove(&process_id);
        }
        Ok(state)
    }

    pub fn process_state(&self, process_id: ProcessId) -> Option<ProcessState> {
        self.inner
            .processes
            .lock()
            .expect("process lock")
            .get(&process_id)
            .map(|p| p.state())
    }

    // ---- exit pipeline --------------------------------------------------

    pub async fn validate_yield_leave(
        &self,
        req: &LeaveRequest,
    ) -> Result<Vec<ValidationIssue>, EarningError> {
        self.inner.handler(&req.slug)?.validate_leave(req).await
    }

    pub async fn handle_yield_leave(
        &self,
        req: &LeaveRequest,
    ) -> Result<ExitExecution, EarningError> {
        self.inner.handler(&req.slug)?.handle_leave(req).await
    }

    pub async fn handle_yield_withdraw(
        &self,
        req: &WithdrawRequest,
    ) -> Result<ExitExecution, EarningError> {
        self.inner.handler(&req.slug)?.handle_withdraw(req).await
    }

    pub async fn handle_yield_cancel_unstake(
        &self,
        req: &CancelUnstakeRequest,
    ) -> Result<ExitExecution, EarningError> {
        self.inner
            .handler(&req.slug)?
            .handle_cancel_unstake(req)
            .await
    }

    pub async fn handle_yield_claim_reward(
        &self,
        req: &ClaimRewardRequest,
    ) -> Result<ExitExecution, EarningError> {
        self.inner
            .handler(&req.slug)?
            .handle_claim_reward(req)
            .await
    }

    // ---- rewards --------------------------------------------------------

    pub async fn reward_item(
        &self,
        slug: &str,
        address: &str,
    ) -> Result<earnkit_core::types::EarningRewardItem, EarningError> {
        self.inner.handler(slug)?.fetch_reward_item(address).await
    }

    pub async fn reward_history(
        &self,
        slug: &str,
        address: &str,
    ) -> Result<Vec<earnkit_core::types::EarningRewardHistoryItem>, EarningError> {
        self.inner
            .handler(slug)?
            .fetch_reward_history(address)
            .await
    }

    // ---- targets --------------------------------------------------------

    /// Target discovery: a fresh cached list is preferred; a live query
    /// refills the cache; a stale cache is still better than an error.
    pub async fn pool_targets(&self, slug: &str) -> Result<Vec<YieldPoolTarget>, EarningError> {
        let ttl = self.inner.config.targets_cache_ttl.as_millis() as u64;
        let now = now_ms();
        {
            let cache = self.inner.targets_cache.lock().expect("targets lock");
            if let Some((fetched_at, targets)) = cache.get(slug) {
                if now.saturating_sub(*fetched_at) < ttl {
                    return Ok(targets.clone());
                }
            }
        }

        let handler = self.inner.handler(slug)?;
        match handler.pool_targets().await {
            Ok(targets) => {
                self.inner
                    .targets_cache
                    .lock()
                    .expect("targets lock")
                    .insert(slug.to_string(), (now, targets.clone()));
                Ok(targets)
            }
            Err(e) => {
                let cache = self.inner.targets_cache.lock().expect("targets lock");
                if let Some((_, stale)) = cache.get(slug) {
                    tracing::warn!(slug = %slug, "live target query failed, serving cache: {e}");
                    return Ok(stale.clone());
                }
                Err(e)
            }
        }
    }

    // ---- lifecycle ------------------------------------------------------

    /// Drop every cached pool and position, in memory and on disk.
    pub async fn reset(&self) {
        self.inner.pool_store.clear();
        self.inner.position_store.clear();
        self.inner.db.reset().await;
        self.inner.processes.lock().expect("process lock").clear();
        self.inner
            .targets_cache
            .lock()
            .expect("targets lock")
            .clear();
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(sub) = self.inner.info_sub.lock().expect("sub lock").take() {
            sub.cancel();
        }
        self.inner.unsubscribe_pools_position();
        self.inner.pool_store.shutdown();
        self.inner.position_store.shutdown();
    }
}

fn handle_bus_event(inner: &Arc<Inner>, reload: &Arc<ReloadDebouncer>, event: BusEvent) {
    match event {
        BusEvent::AccountRemoved { address } => {
            let removed = inner
                .position_store
                .remove_where(|p| p.address == address);
            tracing::info!(address = %address, removed, "account removed, pruning positions");
            inner.db.remove_positions_by_address(address);
            reload.trigger();
        }
        BusEvent::ChainStateUpdated { chain, active } => {
            {
                let mut chains = inner.active_chains.write().expect("chains lock");
                if active {
                    chains.insert(chain.clone());
                } else {
                    chains.remove(&chain);
                }
            }
            if !active {
                let removed = inner.position_store.remove_where(|p| p.chain == chain);
                tracing::info!(chain = %chain, removed, "chain disabled, pruning positions");
                inner.db.remove_positions_by_chain(chain);
            }
            reload.trigger();
        }
        BusEvent::TransactionDone { kind } => {
            if !kind.is_pure_transfer() {
                reload.trigger();
            }
        }
    }
}
