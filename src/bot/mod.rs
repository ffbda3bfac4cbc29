/// Allow-list and denial cooldown
pub mod access;
/// Command and message handlers
pub mod handlers;
/// Live transfer status
pub mod progress;
/// Per-user request rate limiting
pub mod rate_limit;
/// Telegram calls with automatic retry
pub mod resilient;
/// Telegram side of the relay
pub mod transport;
/// Reply texts and keyboards
pub mod views;

pub use access::AccessGuard;
pub use progress::ProgressReporter;
pub use rate_limit::RateLimiter;
pub use transport::TelegramRelayTransport;
