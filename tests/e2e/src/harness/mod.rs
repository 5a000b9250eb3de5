//! Test core manager
//!
//! Creates isolated [`CoreContext`] instances over temporary data roots.
//! Each test gets its own core; the temp directory lives as long as the
//! harness value and is removed on drop.

use std::time::Duration;

use telos_core::{ChaosExperiment, CoreConfig, CoreContext};
use tempfile::TempDir;

/// An isolated core over a temporary data root
pub struct TestCore {
    /// The wired core
    pub core: CoreContext,
    /// Kept alive so the data root outlives the test body
    _dir: TempDir,
}

impl TestCore {
    /// Open a core with millisecond-scale background intervals
    pub fn open() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let config = CoreConfig::new(dir.path()).with_fast_intervals();
        let core = CoreContext::open(config).expect("core open");
        Self { core, _dir: dir }
    }

    /// Open a core and start its background tasks
    pub fn serving() -> Self {
        let harness = Self::open();
        harness.core.serve();
        harness
    }

    /// Re-register every canonical experiment with a short monitoring
    /// duration and light hazard parameters, so the gauntlet completes in
    /// milliseconds
    pub fn shorten_experiments(&self, duration: Duration) {
        let conductor = self.core.conductor();
        for mut experiment in telos_core::chaos::canonical_experiments() {
            experiment.duration = duration;
            if experiment.id == "CEP-005" {
                experiment.parameters = serde_json::json!({ "entries": 50, "entryBytes": 256 });
            }
            conductor.register_experiment(experiment);
        }
    }

    /// Register a single experiment
    pub fn register_experiment(&self, experiment: ChaosExperiment) {
        self.core.conductor().register_experiment(experiment);
    }
}
