//! Core abstractions for the pantry flow engine
//!
//! This crate provides the data model, node kinds, error taxonomy and the
//! collaborator traits that the runtime and adapters depend on. It performs
//! no I/O.

mod credential;
mod error;
pub mod events;
mod flow;
mod kind;
mod payload;
mod traits;

pub use credential::{Credential, CredentialKind};
pub use error::{
    AdapterError, FlowError, GraphError, SchedulerTickError, StoreError, ValidationError,
    VaultError,
};
pub use events::*;
pub use flow::{Edge, Flow, FlowId, NodeId, NodeSpec, Position};
pub use kind::{Capability, FieldSpec, FieldType, NodeKind};
pub use payload::{
    display_value, ExecutionResult, InventoryItem, Payload, RunMode, RunStats, TriggerEvent,
};
pub use traits::{
    CompletionAdapter, CredentialStore, DedupKey, DedupLedger, FlowStore, NotificationAdapter,
    PartnerAdapter, WebhookAdapter,
};
