//! Hazard targets - the seams experiments inject through
//!
//! A target accepts a named hazard with parameters, applies it to its
//! subsystem, and restores normal operation afterwards. Injected faults are
//! intentional: they are isolated to the target and never surface as system
//! errors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::hrc::{Condition, HrcController, Operator, WorkingMemory};
use crate::memory::{FederatedMemory, OutboxOperation, StoreOptions};
use crate::transducer::StubTransducer;

use super::conductor::ChaosError;
use super::experiment::{
    TARGET_FEDERATED_MEMORY, TARGET_HRC, TARGET_OUTBOX, TARGET_TRANSDUCER,
};

// ============================================================================
// TRAIT
// ============================================================================

/// A subsystem that accepts hazard injection
#[async_trait]
pub trait HazardTarget: Send + Sync {
    /// Target name, matched against `ChaosExperiment::target`
    fn name(&self) -> &'static str;

    /// Apply the hazard; rejection fails the experiment
    async fn inject(&self, hazard: &str, parameters: &Value) -> Result<(), ChaosError>;

    /// Restore normal operation
    async fn restore(&self) -> Result<(), ChaosError>;
}

fn rejected(target: &str, hazard: &str) -> ChaosError {
    ChaosError::InjectionRejected {
        target: target.to_string(),
        hazard: hazard.to_string(),
    }
}

// ============================================================================
// FABRIC TARGET (latency + memory pressure)
// ============================================================================

/// Fabric target handling `l2_latency` and `memory_pressure`
pub struct FabricTarget {
    fabric: Arc<FederatedMemory>,
    /// Filler keys inserted by memory pressure, removed on restore
    injected_keys: Mutex<Vec<String>>,
}

impl FabricTarget {
    /// Target over the given fabric
    pub fn new(fabric: Arc<FederatedMemory>) -> Self {
        Self {
            fabric,
            injected_keys: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HazardTarget for FabricTarget {
    fn name(&self) -> &'static str {
        TARGET_FEDERATED_MEMORY
    }

    async fn inject(&self, hazard: &str, parameters: &Value) -> Result<(), ChaosError> {
        match hazard {
            "l2_latency" => {
                let latency_ms = parameters
                    .get("latencyMs")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(200);
                self.fabric
                    .set_injected_l2_latency(Some(Duration::from_millis(latency_ms)));
                Ok(())
            }
            "memory_pressure" => {
                let entries = parameters
                    .get("entries")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1000) as usize;
                let entry_bytes = parameters
                    .get("entryBytes")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(512) as usize;

                let filler = "f".repeat(entry_bytes);
                let mut keys = Vec::with_capacity(entries);
                for i in 0..entries {
                    let key = format!("chaos/pressure/{i}");
                    let value = json!({ "filler": filler });
                    if self
                        .fabric
                        .store(&key, value, StoreOptions::default())
                        .await
                        .is_ok()
                    {
                        keys.push(key);
                    }
                }
                self.injected_keys
                    .lock()
                    .map_err(|_| ChaosError::LockPoisoned)?
                    .extend(keys);
                Ok(())
            }
            other => Err(rejected(self.name(), other)),
        }
    }

    async fn restore(&self) -> Result<(), ChaosError> {
        self.fabric.set_injected_l2_latency(None);

        let keys: Vec<String> = {
            let mut guard = self
                .injected_keys
                .lock()
                .map_err(|_| ChaosError::LockPoisoned)?;
            guard.drain(..).collect()
        };
        for key in keys {
            let _ = self.fabric.invalidate(&key);
        }
        Ok(())
    }
}

// ============================================================================
// OUTBOX TARGET (poison messages)
// ============================================================================

/// Outbox target handling `poison_message`
pub struct OutboxTarget {
    fabric: Arc<FederatedMemory>,
}

impl OutboxTarget {
    /// Target over the fabric's outbox
    pub fn new(fabric: Arc<FederatedMemory>) -> Self {
        Self { fabric }
    }
}

#[async_trait]
impl HazardTarget for OutboxTarget {
    fn name(&self) -> &'static str {
        TARGET_OUTBOX
    }

    async fn inject(&self, hazard: &str, parameters: &Value) -> Result<(), ChaosError> {
        if hazard != "poison_message" {
            return Err(rejected(self.name(), hazard));
        }
        let count = parameters
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(1);

        for i in 0..count {
            self.fabric
                .outbox()
                .enqueue(
                    OutboxOperation::Store,
                    json!({ "key": format!("chaos/poison/{i}"), "tag": "poison" }),
                )
                .map_err(|e| ChaosError::Injection(e.to_string()))?;
        }
        Ok(())
    }

    async fn restore(&self) -> Result<(), ChaosError> {
        // Poison events end in dead-letter by design; nothing to undo
        Ok(())
    }
}

// ============================================================================
// TRANSDUCER TARGET (schema violations)
// ============================================================================

/// Transducer target handling `schema_violation`
pub struct TransducerTarget {
    transducer: Arc<StubTransducer>,
}

impl TransducerTarget {
    /// Target over the given transducer
    pub fn new(transducer: Arc<StubTransducer>) -> Self {
        Self { transducer }
    }
}

#[async_trait]
impl HazardTarget for TransducerTarget {
    fn name(&self) -> &'static str {
        TARGET_TRANSDUCER
    }

    async fn inject(&self, hazard: &str, _parameters: &Value) -> Result<(), ChaosError> {
        if hazard != "schema_violation" {
            return Err(rejected(self.name(), hazard));
        }
        self.transducer.set_schema_violation_mode(true);

        // Drive traffic through the sabotaged path so adherence is measured
        let schema = json!({ "properties": { "title": {}, "summary": {} } });
        for _ in 0..5 {
            use crate::transducer::LlmTransducer;
            let _ = self
                .transducer
                .text_to_schema("probe request under injected schema faults", &schema)
                .await;
        }
        Ok(())
    }

    async fn restore(&self) -> Result<(), ChaosError> {
        self.transducer.set_schema_violation_mode(false);
        Ok(())
    }
}

// ============================================================================
// HRC TARGET (operator-tie storms)
// ============================================================================

/// HRC target handling `operator_tie`
pub struct HrcTarget {
    hrc: Arc<HrcController>,
}

impl HrcTarget {
    /// Target over the given controller
    pub fn new(hrc: Arc<HrcController>) -> Self {
        Self { hrc }
    }
}

const TIE_PROBE_A: &str = "chaos_tie_probe_a";
const TIE_PROBE_B: &str = "chaos_tie_probe_b";

#[async_trait]
impl HazardTarget for HrcTarget {
    fn name(&self) -> &'static str {
        TARGET_HRC
    }

    async fn inject(&self, hazard: &str, parameters: &Value) -> Result<(), ChaosError> {
        if hazard != "operator_tie" {
            return Err(rejected(self.name(), hazard));
        }
        let cycles = parameters
            .get("cycles")
            .and_then(|v| v.as_u64())
            .unwrap_or(5);

        // Two equal-utility operators over a probe slot force a tie
        for name in [TIE_PROBE_A, TIE_PROBE_B] {
            self.hrc.register_operator(
                Operator::new(name, 0.8)
                    .when(Condition::equals("chaosProbe", json!(true)))
                    .with_effect("goalAchieved", json!(true))
                    .with_cost(1.0),
            );
        }

        for _ in 0..cycles {
            let state =
                WorkingMemory::from_slots([("chaosProbe".to_string(), json!(true))]);
            let _ = self.hrc.run_decision_cycle(state);
        }
        Ok(())
    }

    async fn restore(&self) -> Result<(), ChaosError> {
        self.hrc.unregister_operator(TIE_PROBE_A);
        self.hrc.unregister_operator(TIE_PROBE_B);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
