use async_trait::async_trait;
use pantrycore::{AdapterError, NotificationAdapter};

/// Notification transport that writes each message to the log instead of
/// an email or SMS gateway. Useful for local runs.
///
/// Nothing is delivered, so every send reports the gateway as unavailable.
/// Notification nodes then take the demo path and keep no dedup slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

fn not_delivered(channel: &str) -> AdapterError {
    AdapterError::MissingCredential(format!("no {} gateway configured; message logged only", channel))
}

#[async_trait]
impl NotificationAdapter for LogNotifier {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), AdapterError> {
        if to.trim().is_empty() {
            return Err(AdapterError::Failed("empty recipient".into()));
        }
        tracing::info!(channel = "email", to, subject, "{}", body);
        Err(not_delivered("email"))
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<(), AdapterError> {
        if to.trim().is_empty() {
            return Err(AdapterError::Failed("empty recipient".into()));
        }
        tracing::info!(channel = "sms", to, "{}", body);
        Err(not_delivered("sms"))
    }
}
