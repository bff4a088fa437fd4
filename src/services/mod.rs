pub mod notification;
pub mod onboarding;

pub use notification::{LogNotifier, Notifier};
pub use onboarding::{AuthSession, OnboardingError, OnboardingService};
