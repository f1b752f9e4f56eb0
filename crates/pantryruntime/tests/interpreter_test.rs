mod common;

use common::*;
use pantrycore::{
    Flow, FlowError, GraphError, InventoryItem, NodeKind, NodeSpec, Payload, RunMode, TriggerEvent,
};
use pantryruntime::{
    Adapters, CredentialVault, DispatchGuard, InMemoryDedupLedger, Interpreter, InterpreterConfig,
    NodeRegistry, DEMO_TAG,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn interpreter() -> Interpreter {
    Interpreter::new(Arc::new(NodeRegistry::builtin()))
}

fn trace(result: &pantrycore::ExecutionResult) -> Vec<&str> {
    result.trace.iter().map(String::as_str).collect()
}

#[tokio::test]
async fn test_end_to_end_dairy_flow_in_test_mode() {
    init_tracing();
    let notifier = Arc::new(RecordingNotifier::default());
    let completion = Arc::new(FixedCompletion::new("Milk pancakes"));
    let interpreter = interpreter().with_adapters(
        Adapters::new()
            .with_notifications(notifier.clone())
            .with_completion(completion.clone()),
    );

    let result = interpreter
        .run_flow(&sample_flow(), payload(milk()), RunMode::Test)
        .await
        .unwrap();

    assert_eq!(trace(&result), vec!["trigger-1", "cond-1", "recipe-1", "notify-1"]);
    let recipe = result.final_payload.related_data["recipe_suggestion"].as_str().unwrap();
    assert!(recipe.contains("Milk (Gallon)"));
    assert_eq!(result.final_payload.related_data["recipe_source"], json!("demo"));
    assert!(result
        .log
        .iter()
        .any(|line| line.contains("email notification to chef@example.com")));

    assert_eq!(notifier.count(), 0);
    assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_end_to_end_live_with_adapters() {
    let notifier = Arc::new(RecordingNotifier::default());
    let completion = Arc::new(FixedCompletion::new("Milk pancakes"));
    let interpreter = interpreter()
        .with_config(InterpreterConfig {
            default_ai_key: Some("sk-default".into()),
            ..Default::default()
        })
        .with_adapters(
            Adapters::new()
                .with_notifications(notifier.clone())
                .with_completion(completion.clone()),
        );

    let result = interpreter
        .run_flow(&sample_flow(), payload(milk()), RunMode::Live)
        .await
        .unwrap();

    assert_eq!(trace(&result), vec!["trigger-1", "cond-1", "recipe-1", "notify-1"]);
    assert_eq!(result.final_payload.related_data["recipe_source"], json!("ai"));
    assert_eq!(result.stats.actions_dispatched, 1);
    assert_eq!(completion.keys.lock().unwrap().as_slice(), ["sk-default".to_string()]);

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "chef@example.com");
    assert_eq!(sent[0].1, "Milk (Gallon) expires soon");
    assert_eq!(sent[0].2, "Try this: Milk pancakes");
}

#[tokio::test]
async fn test_condition_false_and_missing_field() {
    let interpreter = interpreter();

    let mut produce = milk();
    produce.category = Some("Produce".into());
    let result = interpreter
        .run_flow(&sample_flow(), payload(produce), RunMode::Test)
        .await
        .unwrap();
    assert_eq!(trace(&result), vec!["trigger-1", "cond-1", "update-1"]);
    assert_eq!(
        result.final_payload.related_data["note"],
        json!("Milk (Gallon) is not dairy")
    );

    let mut flow = sample_flow();
    flow.nodes[1].config.insert("checkField".into(), json!("related_data.missing"));
    let result = interpreter
        .run_flow(&flow, payload(milk()), RunMode::Test)
        .await
        .unwrap();
    assert_eq!(trace(&result), vec!["trigger-1", "cond-1", "update-1"]);
}

#[tokio::test]
async fn test_trigger_outside_window_stops() {
    let mut fresh = milk();
    fresh.remaining_days = Some(10);
    let result = interpreter()
        .run_flow(&sample_flow(), payload(fresh), RunMode::Test)
        .await
        .unwrap();
    assert_eq!(trace(&result), vec!["trigger-1"]);
    assert_eq!(result.stats.triggers_matched, 0);
}

#[tokio::test]
async fn test_no_matching_trigger_event() {
    let payload = Payload::new(TriggerEvent::InventoryStatus, milk(), chrono::Utc::now());
    let result = interpreter()
        .run_flow(&sample_flow(), payload, RunMode::Test)
        .await
        .unwrap();
    assert!(result.trace.is_empty());
    assert_eq!(result.log.len(), 1);
}

#[tokio::test]
async fn test_live_unresolvable_credential_falls_back_to_demo() {
    let notifier = Arc::new(RecordingNotifier::default());
    let interpreter = interpreter()
        .with_vault(Arc::new(CredentialVault::from_hex(KEY).unwrap()))
        .with_credentials(Arc::new(MapCredentials::default()))
        .with_adapters(Adapters::new().with_notifications(notifier.clone()));

    let mut flow = sample_flow();
    flow.nodes[3].config.insert("credentialId".into(), json!("cred-missing"));

    let result = interpreter
        .run_flow(&flow, payload(milk()), RunMode::Live)
        .await
        .unwrap();

    assert_eq!(trace(&result), vec!["trigger-1", "cond-1", "recipe-1", "notify-1"]);
    assert_eq!(notifier.count(), 0);
    assert_eq!(result.stats.actions_dispatched, 0);
    assert!(result.stats.demo_fallbacks >= 2);
    assert!(result
        .log
        .iter()
        .any(|line| line.starts_with(DEMO_TAG) && line.contains("cred-missing")));
    assert!(result.final_payload.related_data.contains_key("recipe_suggestion"));
}

#[tokio::test]
async fn test_partner_receives_decrypted_secret() {
    let vault = Arc::new(CredentialVault::from_hex(KEY).unwrap());
    let ciphertext = vault.encrypt("instacart-live-key").unwrap();
    let partner = Arc::new(RecordingPartner::default());
    let interpreter = interpreter()
        .with_vault(vault)
        .with_credentials(Arc::new(MapCredentials::default().with("cred-ic", ciphertext)))
        .with_adapters(Adapters::new().with_partners(partner.clone()));

    let mut flow = Flow::new("flow-2", "Reorder dairy");
    flow.add_node(NodeSpec::new("trigger-1", NodeKind::ExpirationTrigger).with_config("timeOffset", 5));
    flow.add_node(
        NodeSpec::new("partner-1", NodeKind::PartnerIntegration)
            .with_config("partner", "Instacart")
            .with_config("action", "reorder")
            .with_config("credentialId", "cred-ic"),
    );
    flow.connect("trigger-1", "partner-1");

    let result = interpreter
        .run_flow(&flow, payload(milk()), RunMode::Live)
        .await
        .unwrap();

    assert_eq!(result.stats.actions_dispatched, 1);
    let pushes = partner.pushes.lock().unwrap();
    assert_eq!(
        pushes.as_slice(),
        [("instacart".to_string(), "reorder".to_string(), "instacart-live-key".to_string())]
    );
    assert!(result.log.iter().all(|line| !line.contains("instacart-live-key")));
}

fn webhook_then_notify() -> Flow {
    let mut flow = Flow::new("flow-3", "Webhook then notify");
    flow.add_node(NodeSpec::new("trigger-1", NodeKind::ExpirationTrigger).with_config("timeOffset", 3));
    flow.add_node(
        NodeSpec::new("webhook-1", NodeKind::WebhookDelivery)
            .with_config("targetUrl", "https://hooks.example.com/pantry"),
    );
    flow.add_node(
        NodeSpec::new("notify-1", NodeKind::SendNotification)
            .with_config("channel", "sms")
            .with_config("recipient", "+15550100")
            .with_config("message", "{{name}} flagged"),
    );
    flow.connect("trigger-1", "webhook-1");
    flow.connect("webhook-1", "notify-1");
    flow
}

#[tokio::test]
async fn test_adapter_failure_stops_branch_and_releases_reservation() {
    let notifier = Arc::new(RecordingNotifier::default());
    let webhook = Arc::new(RecordingWebhook {
        fail: true,
        ..Default::default()
    });
    let interpreter = interpreter().with_adapters(
        Adapters::new()
            .with_notifications(notifier.clone())
            .with_webhooks(webhook),
    );
    let ledger = Arc::new(InMemoryDedupLedger::new());
    let guard = DispatchGuard {
        ledger: ledger.clone(),
        now: chrono::Utc::now(),
        window: days(30),
    };

    let result = interpreter
        .run_flow_guarded(&webhook_then_notify(), payload(milk()), RunMode::Live, Some(&guard))
        .await
        .unwrap();

    assert_eq!(trace(&result), vec!["trigger-1", "webhook-1"]);
    assert_eq!(result.stats.actions_failed, 1);
    assert_eq!(notifier.count(), 0);
    assert!(ledger.is_empty().await);
}

#[tokio::test]
async fn test_adapter_timeout_is_a_failure() {
    let webhook = Arc::new(RecordingWebhook {
        delay: Some(Duration::from_secs(5)),
        ..Default::default()
    });
    let interpreter = interpreter()
        .with_config(InterpreterConfig {
            adapter_timeout: Duration::from_millis(50),
            ..Default::default()
        })
        .with_adapters(Adapters::new().with_webhooks(webhook.clone()));

    let result = interpreter
        .run_flow(&webhook_then_notify(), payload(milk()), RunMode::Live)
        .await
        .unwrap();

    assert_eq!(trace(&result), vec!["trigger-1", "webhook-1"]);
    assert!(result.log.iter().any(|line| line.contains("Timeout after 50ms")));
    assert_eq!(webhook.count(), 0);
}

#[tokio::test]
async fn test_webhook_body_without_payload() {
    let webhook = Arc::new(RecordingWebhook::default());
    let interpreter = interpreter().with_adapters(Adapters::new().with_webhooks(webhook.clone()));

    let mut flow = webhook_then_notify();
    flow.nodes[1].config.insert("includePayload".into(), json!(false));
    flow.nodes[1].config.insert("method".into(), json!("put"));

    interpreter
        .run_flow(&flow, payload(milk()), RunMode::Live)
        .await
        .unwrap();

    let calls = webhook.calls.lock().unwrap();
    assert_eq!(calls[0].1, "PUT");
    assert_eq!(calls[0].2["item_id"], json!("item-101"));
    assert!(calls[0].2.get("inventory_item").is_none());
}

#[tokio::test]
async fn test_guard_skips_duplicate_dispatch() {
    let notifier = Arc::new(RecordingNotifier::default());
    let webhook = Arc::new(RecordingWebhook::default());
    let interpreter = interpreter().with_adapters(
        Adapters::new()
            .with_notifications(notifier.clone())
            .with_webhooks(webhook.clone()),
    );
    let guard = DispatchGuard {
        ledger: Arc::new(InMemoryDedupLedger::new()),
        now: chrono::Utc::now(),
        window: days(30),
    };
    let flow = webhook_then_notify();

    let first = interpreter
        .run_flow_guarded(&flow, payload(milk()), RunMode::Live, Some(&guard))
        .await
        .unwrap();
    let second = interpreter
        .run_flow_guarded(&flow, payload(milk()), RunMode::Live, Some(&guard))
        .await
        .unwrap();

    assert_eq!(first.stats.actions_dispatched, 2);
    assert_eq!(trace(&second), vec!["trigger-1", "webhook-1"]);
    assert_eq!(second.stats.duplicates_skipped, 1);
    assert_eq!(webhook.count(), 1);
    assert_eq!(notifier.count(), 1);
}

#[tokio::test]
async fn test_structural_errors_surface() {
    let mut flow = sample_flow();
    flow.connect("notify-1", "cond-1");
    let err = interpreter()
        .run_flow(&flow, payload(milk()), RunMode::Test)
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Graph(GraphError::Cycle(_))));
    assert!(err.is_structural());
}

#[tokio::test]
async fn test_status_trigger_flow() {
    let mut flow = Flow::new("flow-4", "Low stock");
    flow.add_node(
        NodeSpec::new("status-1", NodeKind::InventoryStatusTrigger)
            .with_config("status", "low_stock")
            .with_config("threshold", "2"),
    );
    flow.add_node(
        NodeSpec::new("update-1", NodeKind::UpdateData)
            .with_config("targetField", "related_data.reorder")
            .with_config("value", "{{quantity}} left"),
    );
    flow.connect("status-1", "update-1");

    let item = InventoryItem {
        status: Some("Low_Stock".into()),
        quantity: Some(1.0),
        ..milk()
    };
    let payload = Payload::new(TriggerEvent::InventoryStatus, item, chrono::Utc::now());
    let result = interpreter().run_flow(&flow, payload, RunMode::Test).await.unwrap();

    assert_eq!(trace(&result), vec!["status-1", "update-1"]);
    assert_eq!(result.final_payload.related_data["reorder"], json!("1.0 left"));
}

#[tokio::test]
async fn test_absent_category_takes_false_branch() {
    let item: InventoryItem =
        serde_json::from_str(r#"{"id":"item-101","name":"Milk (Gallon)","remaining_days":2}"#).unwrap();
    assert_eq!(item.category, None);

    for operator in ["==", "!="] {
        let mut flow = sample_flow();
        flow.nodes[1].config.insert("operator".into(), json!(operator));
        let result = interpreter()
            .run_flow(&flow, payload(item.clone()), RunMode::Test)
            .await
            .unwrap();
        assert_eq!(
            trace(&result),
            vec!["trigger-1", "cond-1", "update-1"],
            "operator {}",
            operator
        );
    }
}

#[tokio::test]
async fn test_trigger_fan_in_is_rejected() {
    let mut flow = Flow::new("flow-5", "Two triggers, one action");
    flow.add_node(NodeSpec::new("t1", NodeKind::ExpirationTrigger).with_config("timeOffset", 3));
    flow.add_node(NodeSpec::new("t2", NodeKind::ExpirationTrigger).with_config("timeOffset", 5));
    flow.add_node(
        NodeSpec::new("w", NodeKind::WebhookDelivery).with_config("targetUrl", "https://hooks.example.com/pantry"),
    );
    flow.connect("t1", "w");
    flow.connect("t2", "w");

    let err = interpreter()
        .run_flow(&flow, payload(milk()), RunMode::Live)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Graph(GraphError::SharedByTriggers { ref node_id, .. }) if node_id == "w"
    ));
    assert!(err.is_structural());
}

#[tokio::test]
async fn test_each_trigger_path_runs_in_full() {
    let webhook = Arc::new(RecordingWebhook::default());
    let interpreter = interpreter().with_adapters(Adapters::new().with_webhooks(webhook.clone()));

    let mut flow = Flow::new("flow-6", "Two independent paths");
    for (trigger, hook) in [("t1", "w1"), ("t2", "w2")] {
        flow.add_node(NodeSpec::new(trigger, NodeKind::ExpirationTrigger).with_config("timeOffset", 3));
        flow.add_node(
            NodeSpec::new(hook, NodeKind::WebhookDelivery)
                .with_config("targetUrl", format!("https://hooks.example.com/{}", hook)),
        );
        flow.connect(trigger, hook);
    }

    let result = interpreter
        .run_flow(&flow, payload(milk()), RunMode::Live)
        .await
        .unwrap();

    assert_eq!(trace(&result), vec!["t1", "w1", "t2", "w2"]);
    assert_eq!(result.stats.triggers_matched, 2);
    assert_eq!(webhook.count(), 2);
    assert!(result.log.iter().all(|line| !line.contains("already visited")));
}

#[tokio::test]
async fn test_test_mode_ignores_valid_credentials() {
    let vault = Arc::new(CredentialVault::from_hex(KEY).unwrap());
    let credentials = MapCredentials::default()
        .with("cred-ic", vault.encrypt("instacart-live-key").unwrap())
        .with("cred-mail", vault.encrypt("smtp-password").unwrap())
        .with("cred-ai", vault.encrypt("sk-live").unwrap());
    let partner = Arc::new(RecordingPartner::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let completion = Arc::new(FixedCompletion::new("Milk pancakes"));
    let interpreter = interpreter()
        .with_vault(vault)
        .with_credentials(Arc::new(credentials))
        .with_adapters(
            Adapters::new()
                .with_partners(partner.clone())
                .with_notifications(notifier.clone())
                .with_completion(completion.clone()),
        );

    let mut flow = sample_flow();
    flow.nodes[2].config.insert("credentialId".into(), json!("cred-ai"));
    flow.nodes[3].config.insert("credentialId".into(), json!("cred-mail"));
    flow.add_node(
        NodeSpec::new("partner-1", NodeKind::PartnerIntegration)
            .with_config("partner", "instacart")
            .with_config("action", "reorder")
            .with_config("credentialId", "cred-ic"),
    );
    flow.connect("notify-1", "partner-1");

    let result = interpreter
        .run_flow(&flow, payload(milk()), RunMode::Test)
        .await
        .unwrap();

    assert_eq!(trace(&result), vec!["trigger-1", "cond-1", "recipe-1", "notify-1", "partner-1"]);
    assert_eq!(result.stats.actions_dispatched, 0);
    assert_eq!(result.final_payload.related_data["recipe_source"], json!("demo"));
    assert!(partner.pushes.lock().unwrap().is_empty());
    assert_eq!(notifier.count(), 0);
    assert_eq!(completion.calls.load(Ordering::SeqCst), 0);
}
