use async_trait::async_trait;
use tracing::info;

/// Outbound delivery of verification codes. Results are observed, never awaited on
/// by tenant resolution.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the message was handed off for delivery.
    async fn send_verification_code(&self, email: &str, code: &str, user_ref: &str) -> bool;
}

/// Records deliveries in the log instead of sending mail.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification_code(&self, email: &str, code: &str, user_ref: &str) -> bool {
        info!(
            email = %email,
            user = %user_ref,
            "Verification code {} issued",
            code
        );
        true
    }
}
