//! Flow execution runtime
//!
//! This crate provides the engine that validates flow graphs, interprets
//! them against inventory payloads, protects credentials, and drives the
//! periodic trigger scheduler.

mod condition;
mod config;
mod demo;
mod graph;
mod interpreter;
mod ledger;
mod registry;
mod runtime;
mod scheduler;
mod vault;

pub use condition::evaluate as evaluate_condition;
pub use config::{EngineConfig, InterpreterConfig, SchedulerConfig};
pub use demo::DEMO_TAG;
pub use graph::{Branch, GraphNode, ValidatedGraph};
pub use interpreter::{Adapters, DispatchGuard, Interpreter};
pub use ledger::InMemoryDedupLedger;
pub use registry::{
    schema_for, Channel, ConditionalBranchConfig, ExpirationTriggerConfig, GenerateRecipeConfig,
    InventoryStatusTriggerConfig, NodeConfig, NodeMetadata, NodeRegistry, Operator,
    PartnerIntegrationConfig, SendNotificationConfig, UpdateDataConfig, WebhookDeliveryConfig,
};
pub use runtime::{FlowRuntime, RuntimeBuilder};
pub use scheduler::{Clock, InProcessGuard, RunReport, Scheduler, SystemClock, TickGuard};
pub use vault::CredentialVault;
