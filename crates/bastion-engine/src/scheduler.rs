//! Priority-ordered system execution with soft time budgets.
//!
//! The [`SystemManager`] runs every enabled system of a phase once per pass,
//! lowest priority first. Systems with equal priority run in registration
//! order: each registration gets a sequence number, and the run order is
//! sorted by `(priority, sequence)`. Priority changes only mark the order as
//! stale; it is re-sorted the next time a pass runs or names are listed.
//!
//! A system with a budget has its pass cut short once the budget is used up:
//! the entities not yet processed are skipped for this pass only and a
//! [`BudgetExceeded`] notice is recorded. The check happens between
//! entities, so a single slow entity is never interrupted.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use bastion_ecs::entity::EntityId;
use bastion_ecs::manager::EntityManager;
use bastion_ecs::registry::ComponentRegistry;

use crate::system::{Phase, System, SystemContext, SystemSettings};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from system registration and configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("system '{0}' is already registered")]
    DuplicateName(String),

    #[error("system '{0}' is not registered")]
    UnknownSystem(String),
}

// ---------------------------------------------------------------------------
// Stats / diagnostics
// ---------------------------------------------------------------------------

/// Accumulated timing for one system.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemStats {
    /// Passes the system actually ran in.
    pub runs: u64,
    pub last_duration: Duration,
    pub max_duration: Duration,
    pub total_duration: Duration,
    /// Entities processed in the last pass.
    pub last_entity_count: usize,
    /// Entities skipped in the last pass because of the budget.
    pub last_skipped: usize,
    pub budget_overruns: u64,
}

impl SystemStats {
    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.runs) {
            Ok(0) => Duration::ZERO,
            Ok(runs) => self.total_duration / runs,
            Err(_) => self.total_duration.div_f64(self.runs as f64),
        }
    }

    fn record(&mut self, elapsed: Duration, processed: usize, skipped: usize, overran: bool) {
        self.runs += 1;
        self.last_duration = elapsed;
        self.max_duration = self.max_duration.max(elapsed);
        self.total_duration += elapsed;
        self.last_entity_count = processed;
        self.last_skipped = skipped;
        if overran {
            self.budget_overruns += 1;
        }
    }
}

/// Timing of the most recent pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickDiagnostics {
    pub phase: Phase,
    pub tick: u64,
    /// Wall-clock time per system, in execution order.
    pub system_times: Vec<(String, Duration)>,
    pub entities_processed: usize,
    pub total_time: Duration,
}

/// A system ran past its budget.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetExceeded {
    pub system: String,
    pub phase: Phase,
    pub tick: u64,
    pub budget: Duration,
    pub elapsed: Duration,
    pub processed: usize,
    /// Entities left unprocessed for this pass.
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// SystemManager
// ---------------------------------------------------------------------------

struct Entry {
    system: Box<dyn System>,
    settings: SystemSettings,
    sequence: u64,
    stats: SystemStats,
}

/// Orders and runs registered systems.
#[derive(Default)]
pub struct SystemManager {
    entries: Vec<Entry>,
    needs_resort: bool,
    next_sequence: u64,
    last_diagnostics: TickDiagnostics,
    budget_notices: Vec<BudgetExceeded>,
    touched: BTreeSet<EntityId>,
}

impl std::fmt::Debug for SystemManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemManager")
            .field(
                "systems",
                &self
                    .entries
                    .iter()
                    .map(|e| (e.system.name(), e.settings.priority, e.settings.enabled))
                    .collect::<Vec<_>>(),
            )
            .field("needs_resort", &self.needs_resort)
            .finish()
    }
}

impl SystemManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::DuplicateName`] if a system with the same name is
    /// already registered.
    pub fn register(
        &mut self,
        system: impl System + 'static,
        settings: SystemSettings,
    ) -> Result<(), ScheduleError> {
        self.register_boxed(Box::new(system), settings)
    }

    pub fn register_boxed(
        &mut self,
        system: Box<dyn System>,
        settings: SystemSettings,
    ) -> Result<(), ScheduleError> {
        let name = system.name().to_owned();
        if self.position(&name).is_some() {
            return Err(ScheduleError::DuplicateName(name));
        }
        debug!(system = %name, priority = settings.priority, phase = %settings.phase, "registered system");
        self.entries.push(Entry {
            system,
            settings,
            sequence: self.next_sequence,
            stats: SystemStats::default(),
        });
        self.next_sequence += 1;
        self.needs_resort = true;
        Ok(())
    }

    /// Remove a system, returning it.
    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn System>> {
        let index = self.position(name)?;
        debug!(system = %name, "unregistered system");
        Some(self.entries.remove(index).system)
    }

    pub fn enable(&mut self, name: &str) -> Result<(), ScheduleError> {
        self.settings_mut(name)?.enabled = true;
        Ok(())
    }

    pub fn disable(&mut self, name: &str) -> Result<(), ScheduleError> {
        self.settings_mut(name)?.enabled = false;
        Ok(())
    }

    /// Change a system's priority. The run order is re-sorted lazily.
    pub fn set_priority(&mut self, name: &str, priority: i32) -> Result<(), ScheduleError> {
        let settings = self.settings_mut(name)?;
        if settings.priority != priority {
            settings.priority = priority;
            self.needs_resort = true;
        }
        Ok(())
    }

    /// Set or clear a system's time budget.
    pub fn set_budget(&mut self, name: &str, budget: Option<Duration>) -> Result<(), ScheduleError> {
        self.settings_mut(name)?.budget = budget;
        Ok(())
    }

    pub fn settings(&self, name: &str) -> Option<&SystemSettings> {
        self.position(name).map(|i| &self.entries[i].settings)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.settings(name).is_some_and(|s| s.enabled)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a priority change or registration is waiting to be applied
    /// to the run order.
    pub fn needs_resort(&self) -> bool {
        self.needs_resort
    }

    /// System names in run order (all phases, enabled or not).
    pub fn system_names(&mut self) -> Vec<&str> {
        self.resort_if_needed();
        self.entries.iter().map(|e| e.system.name()).collect()
    }

    pub fn stats(&self, name: &str) -> Option<&SystemStats> {
        self.position(name).map(|i| &self.entries[i].stats)
    }

    pub fn last_diagnostics(&self) -> &TickDiagnostics {
        &self.last_diagnostics
    }

    /// Budget overruns recorded since the last drain, oldest first.
    pub fn drain_budget_notices(&mut self) -> Vec<BudgetExceeded> {
        std::mem::take(&mut self.budget_notices)
    }

    /// Entities created or structurally changed by systems since the last
    /// call.
    pub fn take_touched(&mut self) -> BTreeSet<EntityId> {
        std::mem::take(&mut self.touched)
    }

    // -- execution ------------------------------------------------------------

    /// Run every enabled variable-phase system once.
    pub fn tick(
        &mut self,
        entities: &mut EntityManager,
        registry: &ComponentRegistry,
        tick: u64,
        dt: f64,
    ) -> &TickDiagnostics {
        self.run_phase(Phase::Variable, entities, registry, tick, dt)
    }

    /// Run every enabled fixed-phase system once.
    pub fn fixed_tick(
        &mut self,
        entities: &mut EntityManager,
        registry: &ComponentRegistry,
        tick: u64,
        dt: f64,
    ) -> &TickDiagnostics {
        self.run_phase(Phase::Fixed, entities, registry, tick, dt)
    }

    fn run_phase(
        &mut self,
        phase: Phase,
        entities: &mut EntityManager,
        registry: &ComponentRegistry,
        tick: u64,
        dt: f64,
    ) -> &TickDiagnostics {
        self.resort_if_needed();
        let pass_start = Instant::now();
        let mut diagnostics = TickDiagnostics {
            phase,
            tick,
            ..Default::default()
        };

        for entry in &mut self.entries {
            if !entry.settings.enabled || entry.settings.phase != phase {
                continue;
            }
            let name = entry.system.name().to_owned();
            let required = entry.system.required_components();
            let matching = entities.query_all(required);
            let budget = entry.settings.effective_budget();
            let start = Instant::now();
            let mut processed = 0;
            let mut skipped = 0;

            let mut ctx = SystemContext::new(entities, registry, &mut self.touched, tick, phase);
            for (i, &id) in matching.iter().enumerate() {
                if i > 0 && budget.is_some_and(|b| start.elapsed() > b) {
                    skipped = matching.len() - i;
                    break;
                }
                // Earlier entities in this pass may have deactivated it or
                // stripped a required component.
                let still_matches = ctx
                    .entity(id)
                    .is_some_and(|e| e.is_active() && required.iter().all(|t| e.has_component(t)));
                if !still_matches {
                    continue;
                }
                entry.system.process(id, &mut ctx, dt);
                processed += 1;
            }

            let elapsed = start.elapsed();
            let overran = budget.is_some_and(|b| elapsed > b);
            if let Some(budget) = budget.filter(|_| overran) {
                warn!(
                    system = %name,
                    %phase,
                    tick,
                    budget_us = budget.as_micros() as u64,
                    elapsed_us = elapsed.as_micros() as u64,
                    skipped,
                    "system exceeded its time budget"
                );
                self.budget_notices.push(BudgetExceeded {
                    system: name.clone(),
                    phase,
                    tick,
                    budget,
                    elapsed,
                    processed,
                    skipped,
                });
            }
            trace!(system = %name, processed, elapsed_us = elapsed.as_micros() as u64, "system pass complete");
            entry.stats.record(elapsed, processed, skipped, overran);
            diagnostics.entities_processed += processed;
            diagnostics.system_times.push((name, elapsed));
        }

        diagnostics.total_time = pass_start.elapsed();
        self.last_diagnostics = diagnostics;
        &self.last_diagnostics
    }

    // -- internals ------------------------------------------------------------

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.system.name() == name)
    }

    fn settings_mut(&mut self, name: &str) -> Result<&mut SystemSettings, ScheduleError> {
        match self.position(name) {
            Some(i) => Ok(&mut self.entries[i].settings),
            None => Err(ScheduleError::UnknownSystem(name.to_owned())),
        }
    }

    fn resort_if_needed(&mut self) {
        if self.needs_resort {
            self.entries
                .sort_by_key(|e| (e.settings.priority, e.sequence));
            self.needs_resort = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
