//! Periodic evaluation of active flows against near-expiry inventory.

use crate::config::SchedulerConfig;
use crate::graph::ValidatedGraph;
use crate::interpreter::{DispatchGuard, Interpreter};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use pantrycore::{
    DedupLedger, ExecutionResult, FlowStore, InventoryItem, Payload, RunMode, SchedulerTickError,
};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

/// Source of "now" for ticks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mutual exclusion between ticks. A distributed lock can stand in for the
/// in-process flag when several schedulers share one store.
pub trait TickGuard: Send + Sync {
    /// Returns false if a tick is already in flight.
    fn try_acquire(&self) -> bool;

    fn release(&self);
}

#[derive(Debug, Default)]
pub struct InProcessGuard {
    running: AtomicBool,
}

impl InProcessGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TickGuard for InProcessGuard {
    fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.running.store(false, Ordering::Release);
    }
}

struct Held<'a>(&'a dyn TickGuard);

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub started_at: Option<DateTime<Utc>>,
    pub flows_evaluated: usize,
    pub pairs_evaluated: usize,
    pub matches: usize,
    pub actions_dispatched: usize,
    /// Adapter failures and timeouts absorbed by the interpreter.
    pub actions_failed: usize,
    pub duplicates_skipped: usize,
    pub demo_fallbacks: usize,
    pub ledger_pruned: usize,
    pub errors: Vec<SchedulerTickError>,
    pub overlapped: bool,
}

impl RunReport {
    fn absorb(&mut self, result: &ExecutionResult) {
        self.matches += result.stats.triggers_matched;
        self.actions_dispatched += result.stats.actions_dispatched;
        self.actions_failed += result.stats.actions_failed;
        self.duplicates_skipped += result.stats.duplicates_skipped;
        self.demo_fallbacks += result.stats.demo_fallbacks;
    }
}

pub struct Scheduler {
    store: Arc<dyn FlowStore>,
    interpreter: Arc<Interpreter>,
    ledger: Arc<dyn DedupLedger>,
    guard: Arc<dyn TickGuard>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn FlowStore>,
        interpreter: Arc<Interpreter>,
        ledger: Arc<dyn DedupLedger>,
    ) -> Self {
        Self {
            store,
            interpreter,
            ledger,
            guard: Arc::new(InProcessGuard::new()),
            clock: Arc::new(SystemClock),
            config: SchedulerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_guard(mut self, guard: Arc<dyn TickGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Evaluate every (flow, item, event) pair once. Never fails: problems
    /// are collected in the report.
    pub async fn tick(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport {
            started_at: Some(now),
            ..Default::default()
        };

        if !self.guard.try_acquire() {
            tracing::warn!("Previous tick still running; skipping");
            report.overlapped = true;
            return report;
        }
        let _held = Held(self.guard.as_ref());

        report.ledger_pruned = self.ledger.prune(now, self.config.dedup_window).await;

        for org in &self.config.organizations {
            self.tick_org(org, now, &mut report).await;
        }

        tracing::info!(
            flows = report.flows_evaluated,
            pairs = report.pairs_evaluated,
            matches = report.matches,
            dispatched = report.actions_dispatched,
            failed = report.actions_failed,
            skipped = report.duplicates_skipped,
            errors = report.errors.len(),
            "Tick complete"
        );
        report
    }

    async fn tick_org(&self, org: &str, now: DateTime<Utc>, report: &mut RunReport) {
        let flows = match self.store.list_active_flows(org).await {
            Ok(flows) => flows,
            Err(e) => {
                tracing::warn!(org, "Failed to load flows: {}", e);
                report.errors.push(tick_error("*", "*", format!("org {}: {}", org, e)));
                return;
            }
        };
        let items = match self.store.list_inventory_near_expiry(org).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(org, "Failed to load inventory: {}", e);
                report.errors.push(tick_error("*", "*", format!("org {}: {}", org, e)));
                return;
            }
        };
        tracing::debug!(org, flows = flows.len(), items = items.len(), "Evaluating organization");

        let mut jobs = Vec::new();
        for flow in flows {
            report.flows_evaluated += 1;
            let graph = match ValidatedGraph::validate(&flow, self.interpreter.registry()) {
                Ok(graph) => Arc::new(graph),
                Err(e) => {
                    tracing::warn!(flow_id = %flow.id, "Skipping invalid flow: {}", e);
                    report.errors.push(tick_error(&flow.id, "*", e.to_string()));
                    continue;
                }
            };
            for item in &items {
                for event in flow.trigger_events() {
                    jobs.push((graph.clone(), payload_for(org, item, event, now)));
                }
            }
        }
        report.pairs_evaluated += jobs.len();

        let guard = DispatchGuard {
            ledger: self.ledger.clone(),
            now,
            window: self.config.dedup_window,
        };

        let results: Vec<_> = stream::iter(jobs)
            .map(|(graph, payload)| {
                let interpreter = self.interpreter.clone();
                let guard = guard.clone();
                let flow_id = graph.flow_id().to_string();
                let item_id = payload.inventory_item.id.clone();
                let handle = tokio::spawn(async move {
                    interpreter
                        .run_guarded(&graph, payload, RunMode::Live, Some(&guard))
                        .await
                });
                async move { (flow_id, item_id, handle.await) }
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for (flow_id, item_id, joined) in results {
            match joined {
                Ok(result) => report.absorb(&result),
                Err(e) => {
                    tracing::error!(flow_id = %flow_id, item_id = %item_id, "Evaluation aborted: {}", e);
                    report.errors.push(tick_error(&flow_id, &item_id, format!("evaluation aborted: {}", e)));
                }
            }
        }
    }

    /// Tick on the configured interval until `shutdown` resolves. A tick
    /// in flight finishes before the loop exits.
    pub async fn run_forever<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            interval_secs = self.config.tick_interval.as_secs(),
            orgs = self.config.organizations.len(),
            "Scheduler started"
        );
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.tick(self.clock.now()).await;
                }
            }
        }
    }
}

fn payload_for(
    org: &str,
    item: &InventoryItem,
    event: pantrycore::TriggerEvent,
    now: DateTime<Utc>,
) -> Payload {
    Payload::new(event, item.clone(), now).with_user(org)
}

fn tick_error(flow_id: &str, item_id: &str, message: String) -> SchedulerTickError {
    SchedulerTickError {
        flow_id: flow_id.to_string(),
        item_id: item_id.to_string(),
        message,
    }
}
