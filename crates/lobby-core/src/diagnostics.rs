//! Diagnostics sink for human-readable hub events.

use tracing::info;

/// Receives fire-and-forget diagnostic lines.
pub trait Diagnostics: Send + Sync {
    /// Record a diagnostic message.
    fn log(&self, message: &str);
}

/// Forwards diagnostics to `tracing` under the `lobby::diagnostics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn log(&self, message: &str) {
        info!(target: "lobby::diagnostics", "{}", message);
    }
}
