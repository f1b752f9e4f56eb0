use crate::config::EngineConfig;
use crate::graph::ValidatedGraph;
use crate::interpreter::{Adapters, Interpreter};
use crate::registry::NodeRegistry;
use crate::scheduler::Scheduler;
use crate::vault::CredentialVault;
use pantrycore::{
    CredentialStore, DedupLedger, EventBus, ExecutionResult, Flow, FlowError, FlowEvent,
    FlowStore, Payload, RunMode, VaultError,
};
use std::sync::Arc;

/// Main runtime: one registry, one interpreter and one event bus shared by
/// every entry point.
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    interpreter: Arc<Interpreter>,
    event_bus: Arc<EventBus>,
    vault: Option<Arc<CredentialVault>>,
    config: EngineConfig,
}

impl FlowRuntime {
    /// Runtime with built-in node kinds and no external collaborators.
    /// Every live action takes the demo path.
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let registry = Arc::new(NodeRegistry::builtin());
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let interpreter = Interpreter::new(registry.clone())
            .with_config(config.interpreter.clone())
            .with_events(event_bus.clone());

        Self {
            registry,
            interpreter: Arc::new(interpreter),
            event_bus,
            vault: None,
            config,
        }
    }

    pub fn builder(config: EngineConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            registry: None,
            credentials: None,
            adapters: Adapters::default(),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn interpreter(&self) -> &Arc<Interpreter> {
        &self.interpreter
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.event_bus.subscribe()
    }

    /// The vault. Always present on a built runtime, absent on `new()`.
    pub fn vault(&self) -> Option<&Arc<CredentialVault>> {
        self.vault.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn validate(&self, flow: &Flow) -> Result<ValidatedGraph, FlowError> {
        ValidatedGraph::validate(flow, &self.registry)
    }

    /// Run against a sample payload without touching any collaborator.
    pub async fn test_run(&self, flow: &Flow, payload: Payload) -> Result<ExecutionResult, FlowError> {
        self.interpreter.run_flow(flow, payload, RunMode::Test).await
    }

    /// Run once in live mode, without dedup.
    pub async fn live_run(&self, flow: &Flow, payload: Payload) -> Result<ExecutionResult, FlowError> {
        self.interpreter.run_flow(flow, payload, RunMode::Live).await
    }

    pub fn scheduler(&self, store: Arc<dyn FlowStore>, ledger: Arc<dyn DedupLedger>) -> Scheduler {
        Scheduler::new(store, self.interpreter.clone(), ledger).with_config(self.config.scheduler.clone())
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RuntimeBuilder {
    config: EngineConfig,
    registry: Option<Arc<NodeRegistry>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    adapters: Adapters,
}

impl RuntimeBuilder {
    pub fn registry(mut self, registry: Arc<NodeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn adapters(mut self, adapters: Adapters) -> Self {
        self.adapters = adapters;
        self
    }

    /// Fails with `MissingKey` when no vault key is configured and with
    /// `InvalidKey` when it is malformed.
    pub fn build(self) -> Result<FlowRuntime, VaultError> {
        let vault = Arc::new(CredentialVault::from_config(self.config.vault_key.as_deref())?);
        tracing::debug!("Credential vault initialized");

        let registry = self.registry.unwrap_or_else(|| Arc::new(NodeRegistry::builtin()));
        let event_bus = Arc::new(EventBus::new(self.config.event_buffer_size));

        let mut interpreter = Interpreter::new(registry.clone())
            .with_config(self.config.interpreter.clone())
            .with_adapters(self.adapters)
            .with_events(event_bus.clone())
            .with_vault(vault.clone());
        if let Some(store) = self.credentials {
            interpreter = interpreter.with_credentials(store);
        }

        Ok(FlowRuntime {
            registry,
            interpreter: Arc::new(interpreter),
            event_bus,
            vault: Some(vault),
            config: self.config,
        })
    }
}
