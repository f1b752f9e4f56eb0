use crate::condition;
use crate::config::InterpreterConfig;
use crate::demo::{self, DEMO_TAG};
use crate::graph::{Branch, GraphNode, ValidatedGraph};
use crate::registry::{
    Channel, ExpirationTriggerConfig, GenerateRecipeConfig, InventoryStatusTriggerConfig,
    NodeConfig, NodeRegistry,
};
use crate::vault::CredentialVault;
use chrono::{DateTime, Utc};
use pantrycore::{
    AdapterError, CompletionAdapter, CredentialStore, DedupKey, DedupLedger, EventBus,
    ExecutionResult, Flow, FlowError, FlowEvent, InventoryItem, NodeId, NotificationAdapter,
    PartnerAdapter, Payload, RunId, RunMode, RunStats, WebhookAdapter,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// External collaborators reachable from action and enrichment nodes.
/// An absent adapter sends its nodes down the demo path.
#[derive(Clone, Default)]
pub struct Adapters {
    pub notifications: Option<Arc<dyn NotificationAdapter>>,
    pub webhooks: Option<Arc<dyn WebhookAdapter>>,
    pub completion: Option<Arc<dyn CompletionAdapter>>,
    pub partners: Option<Arc<dyn PartnerAdapter>>,
}

impl Adapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(mut self, adapter: Arc<dyn NotificationAdapter>) -> Self {
        self.notifications = Some(adapter);
        self
    }

    pub fn with_webhooks(mut self, adapter: Arc<dyn WebhookAdapter>) -> Self {
        self.webhooks = Some(adapter);
        self
    }

    pub fn with_completion(mut self, adapter: Arc<dyn CompletionAdapter>) -> Self {
        self.completion = Some(adapter);
        self
    }

    pub fn with_partners(mut self, adapter: Arc<dyn PartnerAdapter>) -> Self {
        self.partners = Some(adapter);
        self
    }
}

/// Dedup context for scheduler-driven runs.
#[derive(Clone)]
pub struct DispatchGuard {
    pub ledger: Arc<dyn DedupLedger>,
    pub now: DateTime<Utc>,
    pub window: chrono::Duration,
}

enum Step {
    /// Follow outgoing edges, optionally only those with this branch label.
    Continue(Option<Branch>),
    Stop,
}

enum Outcome {
    Sent,
    Unavailable(String),
    Failed(AdapterError),
}

struct RunState<'a> {
    run_id: RunId,
    flow_id: &'a str,
    mode: RunMode,
    guard: Option<&'a DispatchGuard>,
    trace: Vec<NodeId>,
    log: Vec<String>,
    stats: RunStats,
}

impl RunState<'_> {
    fn note(&mut self, line: String) {
        tracing::debug!(run_id = %self.run_id, "{}", line);
        self.log.push(line);
    }
}

/// Walks a validated flow graph for one payload.
///
/// Runs are strictly sequential: one node at a time, depth-first from each
/// matching trigger, with the payload moved from step to step.
pub struct Interpreter {
    registry: Arc<NodeRegistry>,
    vault: Option<Arc<CredentialVault>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    adapters: Adapters,
    config: InterpreterConfig,
    events: Option<Arc<EventBus>>,
}

impl Interpreter {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            vault: None,
            credentials: None,
            adapters: Adapters::default(),
            config: InterpreterConfig::default(),
            events: None,
        }
    }

    pub fn with_vault(mut self, vault: Arc<CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn with_adapters(mut self, adapters: Adapters) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_config(mut self, config: InterpreterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Validate and run. Only structural errors surface as `Err`.
    pub async fn run_flow(
        &self,
        flow: &Flow,
        payload: Payload,
        mode: RunMode,
    ) -> Result<ExecutionResult, FlowError> {
        self.run_flow_guarded(flow, payload, mode, None).await
    }

    pub async fn run_flow_guarded(
        &self,
        flow: &Flow,
        payload: Payload,
        mode: RunMode,
        guard: Option<&DispatchGuard>,
    ) -> Result<ExecutionResult, FlowError> {
        let graph = ValidatedGraph::validate(flow, &self.registry)?;
        Ok(self.run_guarded(&graph, payload, mode, guard).await)
    }

    pub async fn run(&self, graph: &ValidatedGraph, payload: Payload, mode: RunMode) -> ExecutionResult {
        self.run_guarded(graph, payload, mode, None).await
    }

    pub async fn run_guarded(
        &self,
        graph: &ValidatedGraph,
        mut payload: Payload,
        mode: RunMode,
        guard: Option<&DispatchGuard>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut run = RunState {
            run_id: RunId::new_v4(),
            flow_id: graph.flow_id(),
            mode,
            guard,
            trace: Vec::new(),
            log: Vec::new(),
            stats: RunStats::default(),
        };

        tracing::info!(
            run_id = %run.run_id,
            flow_id = run.flow_id,
            item_id = %payload.inventory_item.id,
            "Starting {} run for {} event",
            mode_name(mode),
            payload.trigger_event
        );
        self.emit(FlowEvent::RunStarted {
            run_id: run.run_id,
            flow_id: run.flow_id.to_string(),
            trigger_event: payload.trigger_event,
            mode,
            timestamp: Utc::now(),
        });

        let roots: Vec<&GraphNode> = graph
            .roots()
            .into_iter()
            .filter(|node| node.kind.trigger_event() == Some(payload.trigger_event))
            .collect();

        if roots.is_empty() {
            run.note(format!(
                "No trigger in flow {} listens for {} events",
                run.flow_id, payload.trigger_event
            ));
        }

        for root in roots {
            // Scoped to one trigger's path.
            let mut visited = HashSet::new();
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                if !visited.insert(node.id.as_str()) {
                    run.note(format!("Node {} already visited; not re-entering", node.id));
                    continue;
                }

                run.trace.push(node.id.clone());
                run.note(format!("Entering node {} ({})", node.id, node.kind));
                self.emit(FlowEvent::NodeEntered {
                    run_id: run.run_id,
                    node_id: node.id.clone(),
                    kind: node.kind,
                    timestamp: Utc::now(),
                });

                let (next, step) = self.step(&mut run, node, payload).await;
                payload = next;

                if let Step::Continue(handle) = step {
                    let successors = graph.successors(&node.id, handle);
                    stack.extend(successors.into_iter().rev());
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run.run_id,
            flow_id = run.flow_id,
            visited = run.trace.len(),
            dispatched = run.stats.actions_dispatched,
            duration_ms,
            "Flow run completed"
        );
        self.emit(FlowEvent::RunCompleted {
            run_id: run.run_id,
            visited: run.trace.len(),
            duration_ms,
            timestamp: Utc::now(),
        });

        ExecutionResult {
            trace: run.trace,
            log: run.log,
            final_payload: payload,
            stats: run.stats,
        }
    }

    async fn step(&self, run: &mut RunState<'_>, node: &GraphNode, payload: Payload) -> (Payload, Step) {
        match &node.config {
            NodeConfig::ExpirationTrigger(cfg) => {
                let matched = expiration_matches(cfg, &payload.inventory_item);
                let step = self.trigger_outcome(run, node, &payload.inventory_item, matched);
                (payload, step)
            }
            NodeConfig::InventoryStatusTrigger(cfg) => {
                let matched = status_matches(cfg, &payload.inventory_item);
                let step = self.trigger_outcome(run, node, &payload.inventory_item, matched);
                (payload, step)
            }
            NodeConfig::ConditionalBranch(cfg) => {
                let field = payload.lookup(&cfg.check_field);
                let branch = Branch::from(condition::evaluate(cfg.operator, field.as_ref(), &cfg.check_value));
                run.note(format!(
                    "Condition {}: {} {} {} -> {}",
                    node.id, cfg.check_field, cfg.operator, cfg.check_value, branch
                ));
                (payload, Step::Continue(Some(branch)))
            }
            NodeConfig::UpdateData(cfg) => {
                let value = payload.render(&cfg.value);
                let key = cfg
                    .target_field
                    .strip_prefix("related_data.")
                    .unwrap_or(&cfg.target_field)
                    .to_string();
                run.note(format!("Set related_data.{} = {}", key, value));
                (payload.merge_related(key, Value::String(value)), Step::Continue(None))
            }
            NodeConfig::GenerateRecipe(cfg) => {
                let payload = self.generate_recipe(run, node, cfg, payload).await;
                (payload, Step::Continue(None))
            }
            NodeConfig::SendNotification(_)
            | NodeConfig::WebhookDelivery(_)
            | NodeConfig::PartnerIntegration(_) => {
                let step = self.action(run, node, &payload).await;
                (payload, step)
            }
        }
    }

    fn trigger_outcome(
        &self,
        run: &mut RunState<'_>,
        node: &GraphNode,
        item: &InventoryItem,
        matched: bool,
    ) -> Step {
        if matched {
            run.stats.triggers_matched += 1;
            run.note(format!("Trigger {} matched item {} ({})", node.id, item.id, item.name));
            Step::Continue(None)
        } else {
            run.note(format!("Trigger {} did not match item {}; branch stops", node.id, item.id));
            Step::Stop
        }
    }

    async fn generate_recipe(
        &self,
        run: &mut RunState<'_>,
        node: &GraphNode,
        cfg: &GenerateRecipeConfig,
        payload: Payload,
    ) -> Payload {
        let result = match run.mode {
            RunMode::Test => Err("test mode".to_string()),
            RunMode::Live => self
                .complete(cfg, &recipe_prompt(cfg, &payload))
                .await
                .map_err(|e| e.to_string()),
        };

        match result {
            Ok(text) => {
                run.note(format!("Recipe generated for {}", payload.inventory_item.name));
                payload
                    .merge_related("recipe_suggestion", Value::String(text))
                    .merge_related("recipe_source", json!("ai"))
            }
            Err(reason) => {
                let recipe = demo::recipe_suggestion(&payload.inventory_item);
                self.demo(
                    run,
                    node,
                    format!("Recipe suggestion for {} from demo set", payload.inventory_item.name),
                    reason,
                );
                payload
                    .merge_related("recipe_suggestion", Value::String(recipe))
                    .merge_related("recipe_source", json!("demo"))
            }
        }
    }

    async fn complete(&self, cfg: &GenerateRecipeConfig, prompt: &str) -> Result<String, AdapterError> {
        let adapter = self
            .adapters
            .completion
            .as_ref()
            .ok_or_else(|| AdapterError::Failed("no completion adapter configured".into()))?;

        let api_key = match &cfg.credential_id {
            Some(id) => self.resolve_secret(id).await?,
            None => self
                .config
                .default_ai_key
                .clone()
                .ok_or_else(|| AdapterError::MissingCredential("no AI API key configured".into()))?,
        };

        let text = self.call(adapter.complete_ai(prompt, &api_key)).await?;
        if text.trim().is_empty() {
            return Err(AdapterError::Failed("completion was empty".into()));
        }
        Ok(text)
    }

    async fn action(&self, run: &mut RunState<'_>, node: &GraphNode, payload: &Payload) -> Step {
        let description = describe_action(&node.config, payload);

        if run.mode == RunMode::Test {
            self.demo(run, node, format!("Would dispatch {}", description), "test mode".into());
            return Step::Continue(None);
        }

        let reservation = match run.guard {
            Some(guard) => {
                let key = DedupKey::new(run.flow_id, payload.inventory_item.id.clone(), node.id.clone());
                if !guard.ledger.reserve(&key, guard.now, guard.window).await {
                    run.stats.duplicates_skipped += 1;
                    run.note(format!("Skipped duplicate {} for item {}", description, payload.inventory_item.id));
                    self.emit(FlowEvent::ActionSkipped {
                        run_id: run.run_id,
                        node_id: node.id.clone(),
                        timestamp: Utc::now(),
                    });
                    return Step::Stop;
                }
                Some((guard, key))
            }
            None => None,
        };

        match self.dispatch(&node.config, payload).await {
            Outcome::Sent => {
                run.stats.actions_dispatched += 1;
                run.note(format!("Dispatched {}", description));
                self.emit(FlowEvent::ActionDispatched {
                    run_id: run.run_id,
                    node_id: node.id.clone(),
                    timestamp: Utc::now(),
                });
                Step::Continue(None)
            }
            Outcome::Unavailable(reason) => {
                if let Some((guard, key)) = &reservation {
                    guard.ledger.release(key).await;
                }
                self.demo(run, node, format!("Would dispatch {}", description), reason);
                Step::Continue(None)
            }
            Outcome::Failed(error) => {
                if let Some((guard, key)) = &reservation {
                    guard.ledger.release(key).await;
                }
                run.stats.actions_failed += 1;
                tracing::warn!(run_id = %run.run_id, node_id = %node.id, "Action failed: {}", error);
                run.note(format!("Failed to dispatch {}: {}", description, error));
                self.emit(FlowEvent::ActionFailed {
                    run_id: run.run_id,
                    node_id: node.id.clone(),
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                Step::Stop
            }
        }
    }

    async fn dispatch(&self, config: &NodeConfig, payload: &Payload) -> Outcome {
        match config {
            NodeConfig::SendNotification(cfg) => {
                let Some(adapter) = &self.adapters.notifications else {
                    return Outcome::Unavailable("no notification adapter configured".into());
                };
                if let Some(id) = &cfg.credential_id {
                    if let Err(e) = self.resolve_secret(id).await {
                        return Outcome::Unavailable(e.to_string());
                    }
                }
                let to = payload.render(&cfg.recipient);
                let message = payload.render(&cfg.message);
                let result = match cfg.channel {
                    Channel::Email => {
                        let subject = match &cfg.subject {
                            Some(subject) => payload.render(subject),
                            None => format!("Pantry alert: {}", payload.inventory_item.name),
                        };
                        self.call(adapter.send_email(&to, &subject, &message)).await
                    }
                    Channel::Sms => self.call(adapter.send_sms(&to, &message)).await,
                };
                settle(result)
            }
            NodeConfig::WebhookDelivery(cfg) => {
                let Some(adapter) = &self.adapters.webhooks else {
                    return Outcome::Unavailable("no webhook adapter configured".into());
                };
                let body = if cfg.include_payload.unwrap_or(true) {
                    serde_json::to_value(payload).unwrap_or(Value::Null)
                } else {
                    json!({
                        "trigger_event": payload.trigger_event,
                        "item_id": payload.inventory_item.id,
                        "timestamp": payload.timestamp,
                    })
                };
                settle(self.call(adapter.call_webhook(&cfg.target_url, cfg.method(), &body)).await)
            }
            NodeConfig::PartnerIntegration(cfg) => {
                let Some(adapter) = &self.adapters.partners else {
                    return Outcome::Unavailable("no partner adapter configured".into());
                };
                let api_key = match self.resolve_secret(&cfg.credential_id).await {
                    Ok(key) => key,
                    Err(e) => return Outcome::Unavailable(e.to_string()),
                };
                let body = json!({
                    "action": cfg.action,
                    "item": payload.inventory_item,
                    "user_id": payload.user_id,
                    "related_data": payload.related_data,
                });
                settle(
                    self.call(adapter.push(&cfg.partner, &cfg.action, &body, &api_key))
                        .await,
                )
            }
            other => Outcome::Failed(AdapterError::Failed(format!("{} is not an action", other.kind()))),
        }
    }

    /// Look up a credential and decrypt its secret. Errors never carry
    /// secret material.
    async fn resolve_secret(&self, credential_id: &str) -> Result<String, AdapterError> {
        let store = self
            .credentials
            .as_ref()
            .ok_or_else(|| AdapterError::MissingCredential("no credential store configured".into()))?;
        let vault = self
            .vault
            .as_ref()
            .ok_or_else(|| AdapterError::MissingCredential("vault key is not configured".into()))?;

        let lookup = async {
            store
                .get_credential(credential_id)
                .await
                .map_err(|e| AdapterError::MissingCredential(format!("credential {}: {}", credential_id, e)))
        };
        let credential = self
            .call(lookup)
            .await?
            .ok_or_else(|| AdapterError::MissingCredential(format!("credential {} not found", credential_id)))?;

        vault.decrypt(&credential.secret).map_err(|_| {
            AdapterError::MissingCredential(format!("credential {} could not be decrypted", credential_id))
        })
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T, AdapterError>>) -> Result<T, AdapterError> {
        let limit = self.config.adapter_timeout;
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                millis: limit.as_millis() as u64,
            }),
        }
    }

    fn demo(&self, run: &mut RunState<'_>, node: &GraphNode, what: String, reason: String) {
        run.stats.demo_fallbacks += 1;
        if run.mode == RunMode::Live {
            tracing::warn!(run_id = %run.run_id, node_id = %node.id, "Demo fallback: {}", reason);
        }
        run.note(format!("{} {} ({})", DEMO_TAG, what, reason));
        self.emit(FlowEvent::DemoFallback {
            run_id: run.run_id,
            node_id: node.id.clone(),
            reason,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: FlowEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

fn settle(result: Result<(), AdapterError>) -> Outcome {
    match result {
        Ok(()) => Outcome::Sent,
        Err(AdapterError::MissingCredential(reason)) => Outcome::Unavailable(reason),
        Err(e) => Outcome::Failed(e),
    }
}

fn mode_name(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Test => "test",
        RunMode::Live => "live",
    }
}

fn category_matches(filter: Option<&str>, item: &InventoryItem) -> bool {
    match filter.map(str::trim) {
        None | Some("") => true,
        Some(f) if f.eq_ignore_ascii_case("all") => true,
        Some(f) => item
            .category
            .as_deref()
            .is_some_and(|c| f.eq_ignore_ascii_case(c.trim())),
    }
}

pub(crate) fn expiration_matches(cfg: &ExpirationTriggerConfig, item: &InventoryItem) -> bool {
    let Some(days) = item.remaining_days else {
        return false;
    };
    (days as f64) <= cfg.time_offset && category_matches(cfg.filter_category.as_deref(), item)
}

pub(crate) fn status_matches(cfg: &InventoryStatusTriggerConfig, item: &InventoryItem) -> bool {
    let status_ok = item
        .status
        .as_deref()
        .is_some_and(|s| s.trim().eq_ignore_ascii_case(cfg.status.trim()));
    let threshold_ok = match cfg.threshold {
        Some(limit) => item.quantity.is_some_and(|q| q <= limit),
        None => true,
    };
    status_ok && threshold_ok && category_matches(cfg.filter_category.as_deref(), item)
}

fn recipe_prompt(cfg: &GenerateRecipeConfig, payload: &Payload) -> String {
    let item = &payload.inventory_item;
    let mut prompt = match &cfg.prompt {
        Some(template) => payload.render(template),
        None => match item.category.as_deref() {
            Some(category) => format!(
                "Suggest one practical kitchen recipe that uses {} ({}) before it expires.",
                item.name, category
            ),
            None => format!("Suggest one practical kitchen recipe that uses {} before it expires.", item.name),
        },
    };
    if let Some(days) = item.remaining_days {
        prompt.push_str(&format!(" It expires in {} day(s).", days));
    }
    if let Some(servings) = cfg.servings {
        prompt.push_str(&format!(" Serves {}.", servings));
    }
    prompt
}

fn describe_action(config: &NodeConfig, payload: &Payload) -> String {
    match config {
        NodeConfig::SendNotification(cfg) => {
            let channel = match cfg.channel {
                Channel::Email => "email",
                Channel::Sms => "sms",
            };
            format!("{} notification to {}", channel, payload.render(&cfg.recipient))
        }
        NodeConfig::WebhookDelivery(cfg) => format!("webhook {} {}", cfg.method(), cfg.target_url),
        NodeConfig::PartnerIntegration(cfg) => format!("{} {} request", cfg.partner, cfg.action),
        other => other.kind().to_string(),
    }
}
