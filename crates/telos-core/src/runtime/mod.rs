//! Runtime wiring
//!
//! [`CoreContext`] replaces the source system's global singletons: it owns
//! one instance of every subsystem and passes references explicitly, so
//! tests can instantiate multiple independent cores side by side.
//! `serve()` registers the background tasks on the scheduler; `shutdown()`
//! signals them, joins them and snapshots the world model.

mod scheduler;

pub use scheduler::Scheduler;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chaos::{
    ChaosConductor, ChaosConfig, FabricReplicationMetrics, FabricTarget, HrcMetrics, HrcTarget,
    MetricRegistry, OsMetrics, OutboxTarget, TelemetryMetrics, TransducerMetrics,
    TransducerTarget,
};
use crate::concept::ConceptRepository;
use crate::embeddings::{EmbeddingProvider, HashEmbedder};
use crate::hrc::{default_operators, HrcConfig, HrcController};
use crate::indexer::{GraphIndexer, IndexerConfig};
use crate::memory::{FabricConfig, FabricError, FederatedMemory};
use crate::planner::{ActiveInferencePlanner, PlannerError};
use crate::transducer::StubTransducer;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Context error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Fabric failed to open
    #[error(transparent)]
    Fabric(#[from] FabricError),
    /// World model snapshot failure
    #[error(transparent)]
    Planner(#[from] PlannerError),
    /// IO error on the data root
    #[error("Data root error: {0}")]
    Io(#[from] std::io::Error),
}

/// Context result type
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Top-level configuration; one data root, every subsystem's knobs
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Directory holding `l2/`, `l3/`, `outbox.log`, `experiments.log` and
    /// `world_model.json`
    pub data_root: PathBuf,
    /// Fabric configuration
    pub fabric: FabricConfig,
    /// HRC configuration
    pub hrc: HrcConfig,
    /// Chaos conductor configuration
    pub chaos: ChaosConfig,
    /// Graph indexer configuration
    pub indexer: IndexerConfig,
    /// Interval between world-model snapshots
    pub world_model_snapshot_interval: Duration,
}

impl CoreConfig {
    /// Production defaults rooted at `data_root`
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            fabric: FabricConfig::new(&data_root),
            hrc: HrcConfig::default(),
            chaos: ChaosConfig::default(),
            indexer: IndexerConfig::default(),
            world_model_snapshot_interval: Duration::from_secs(300),
            data_root,
        }
    }

    /// Millisecond-scale intervals for tests and local experimentation
    pub fn with_fast_intervals(mut self) -> Self {
        self.fabric.outbox_drain_interval = Duration::from_millis(20);
        self.fabric.sync_interval = Duration::from_millis(50);
        self.fabric.optimizer_interval = Duration::from_millis(50);
        self.chaos.baseline_interval = Duration::from_millis(5);
        self.chaos.baseline_samples = 3;
        self.chaos.steady_state_check_interval = Duration::from_millis(10);
        self.chaos.experiment_timeout = Duration::from_secs(30);
        self.indexer.interval = Duration::from_millis(200);
        self.world_model_snapshot_interval = Duration::from_millis(200);
        self
    }

    /// Path of the world model snapshot
    pub fn world_model_path(&self) -> PathBuf {
        self.data_root.join("world_model.json")
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// One fully wired core; no global state
pub struct CoreContext {
    config: CoreConfig,
    fabric: Arc<FederatedMemory>,
    repository: Arc<ConceptRepository>,
    hrc: Arc<HrcController>,
    planner: Arc<ActiveInferencePlanner>,
    transducer: Arc<StubTransducer>,
    indexer: Arc<GraphIndexer>,
    conductor: Arc<ChaosConductor>,
    scheduler: Scheduler,
}

impl CoreContext {
    /// Open every subsystem under the configured data root
    pub fn open(config: CoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_root)?;

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::default());
        let fabric = Arc::new(FederatedMemory::open_with_embedder(
            config.fabric.clone(),
            Arc::clone(&embedder),
        )?);
        let repository = Arc::new(ConceptRepository::new(fabric.object_store()));

        let hrc = Arc::new(HrcController::new(config.hrc.clone()));
        for operator in default_operators() {
            hrc.register_operator(operator);
        }

        let world_model_path = config.world_model_path();
        let planner = if world_model_path.exists() {
            match ActiveInferencePlanner::restore_from(&world_model_path) {
                Ok(planner) => Arc::new(planner),
                Err(e) => {
                    warn!(error = %e, "world model snapshot unreadable; starting fresh");
                    Arc::new(ActiveInferencePlanner::default())
                }
            }
        } else {
            Arc::new(ActiveInferencePlanner::default())
        };

        let transducer = Arc::new(StubTransducer::new());

        let indexer = Arc::new(GraphIndexer::new(
            Arc::clone(&repository),
            Arc::clone(&fabric),
            Arc::clone(&transducer) as Arc<dyn crate::transducer::LlmTransducer>,
            Arc::clone(&embedder),
            config.indexer.clone(),
        ));

        let mut metrics = MetricRegistry::new();
        metrics.register(Arc::new(TelemetryMetrics::new(Arc::clone(&fabric))));
        metrics.register(Arc::new(FabricReplicationMetrics::new(Arc::clone(&fabric))));
        metrics.register(Arc::new(TransducerMetrics::new(Arc::clone(&transducer))));
        metrics.register(Arc::new(HrcMetrics::new(Arc::clone(&hrc))));
        metrics.register(Arc::new(OsMetrics::new()));

        let conductor = Arc::new(ChaosConductor::new(
            config.chaos.clone(),
            metrics,
            config.data_root.join("experiments.log"),
            Some(Arc::clone(&hrc)),
        ));
        conductor.register_target(Arc::new(FabricTarget::new(Arc::clone(&fabric))));
        conductor.register_target(Arc::new(OutboxTarget::new(Arc::clone(&fabric))));
        conductor.register_target(Arc::new(TransducerTarget::new(Arc::clone(&transducer))));
        conductor.register_target(Arc::new(HrcTarget::new(Arc::clone(&hrc))));

        Ok(Self {
            config,
            fabric,
            repository,
            hrc,
            planner,
            transducer,
            indexer,
            conductor,
            scheduler: Scheduler::new(),
        })
    }

    /// Launch the background tasks: outbox processor, sync coordinator,
    /// performance optimiser, graph indexer and world-model snapshotter
    pub fn serve(&self) {
        let fabric_config = self.fabric.config();

        let fabric = Arc::clone(&self.fabric);
        self.scheduler.spawn_periodic(
            "outbox-processor",
            fabric_config.outbox_drain_interval,
            move || {
                let fabric = Arc::clone(&fabric);
                async move {
                    if let Err(e) = fabric.process_outbox_once() {
                        warn!(error = %e, "outbox drain failed");
                    }
                }
            },
        );

        let fabric = Arc::clone(&self.fabric);
        self.scheduler
            .spawn_periodic("sync-coordinator", fabric_config.sync_interval, move || {
                let fabric = Arc::clone(&fabric);
                async move {
                    if let Err(e) = fabric.sync_once() {
                        // An unresolvable conflict is fatal for this pass
                        // but must not kill the loop
                        warn!(error = %e, "sync pass failed");
                    }
                }
            });

        let fabric = Arc::clone(&self.fabric);
        self.scheduler.spawn_periodic(
            "performance-optimizer",
            fabric_config.optimizer_interval,
            move || {
                let fabric = Arc::clone(&fabric);
                async move {
                    if let Err(e) = fabric.optimize_once() {
                        warn!(error = %e, "optimizer pass failed");
                    }
                }
            },
        );

        let indexer = Arc::clone(&self.indexer);
        self.scheduler
            .spawn_periodic("graph-indexer", indexer.interval(), move || {
                let indexer = Arc::clone(&indexer);
                async move {
                    if let Err(e) = indexer.run_indexing_cycle().await {
                        warn!(error = %e, "indexing cycle failed");
                    }
                }
            });

        let planner = Arc::clone(&self.planner);
        let snapshot_path = self.config.world_model_path();
        self.scheduler.spawn_periodic(
            "world-model-snapshot",
            self.config.world_model_snapshot_interval,
            move || {
                let planner = Arc::clone(&planner);
                let path = snapshot_path.clone();
                async move {
                    if let Err(e) = planner.snapshot_to(&path) {
                        warn!(error = %e, "world model snapshot failed");
                    }
                }
            },
        );

        info!(tasks = ?self.scheduler.task_names(), "background tasks started");
    }

    /// Signal and join every background task, then snapshot the world model
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await;
        self.planner.snapshot_to(self.config.world_model_path())?;
        info!("core shut down cleanly");
        Ok(())
    }

    /// The configuration this core was opened with
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The memory fabric
    pub fn fabric(&self) -> Arc<FederatedMemory> {
        Arc::clone(&self.fabric)
    }

    /// The concept repository
    pub fn repository(&self) -> Arc<ConceptRepository> {
        Arc::clone(&self.repository)
    }

    /// The cognitive controller
    pub fn hrc(&self) -> Arc<HrcController> {
        Arc::clone(&self.hrc)
    }

    /// The active-inference planner
    pub fn planner(&self) -> Arc<ActiveInferencePlanner> {
        Arc::clone(&self.planner)
    }

    /// The transducer stub
    pub fn transducer(&self) -> Arc<StubTransducer> {
        Arc::clone(&self.transducer)
    }

    /// The graph indexer
    pub fn indexer(&self) -> Arc<GraphIndexer> {
        Arc::clone(&self.indexer)
    }

    /// The chaos conductor
    pub fn conductor(&self) -> Arc<ChaosConductor> {
        Arc::clone(&self.conductor)
    }
}

// ============================================================================
// TESTS
// ============================================================================
