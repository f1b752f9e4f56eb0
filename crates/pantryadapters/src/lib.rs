//! Standard collaborator implementations
//!
//! File and in-memory stores, HTTP transports for webhooks, partners and AI
//! completions, and a log-only notifier.

mod http;
mod notify;
mod openai;
mod store;

pub use http::{HttpPartnerAdapter, HttpWebhookAdapter};
pub use notify::LogNotifier;
pub use openai::{OpenAiCompletionAdapter, OpenAiConfig};
pub use store::{is_near_expiry, FileStore, InMemoryStore, DEFAULT_HORIZON_DAYS};

use pantryruntime::{Adapters, EngineConfig};
use std::sync::Arc;

/// All standard adapters, configured from the engine config.
///
/// Webhooks, partners and completions go over HTTP. Notifications only
/// reach the log through [`LogNotifier`], so notification nodes fall back
/// to demo output until a real gateway adapter replaces it.
pub fn standard_adapters(config: &EngineConfig) -> Adapters {
    let completion = OpenAiCompletionAdapter::new(OpenAiConfig {
        base_url: config.ai_base_url.clone(),
        model: config.ai_model.clone(),
    });

    Adapters::new()
        .with_notifications(Arc::new(LogNotifier))
        .with_webhooks(Arc::new(HttpWebhookAdapter::new()))
        .with_completion(Arc::new(completion))
        .with_partners(Arc::new(HttpPartnerAdapter::with_default_endpoints()))
}
