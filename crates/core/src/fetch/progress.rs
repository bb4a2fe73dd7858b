//! Progress checkpoints emitted during a fetch.

/// Sink for `(message, percent)` checkpoints.
///
/// Percent is in `[0, 100]` and non-decreasing within one fetch; a successful
/// fetch ends with exactly one call at 100. A failed fetch may end without a
/// terminal call. Implementations must not block: callers treat reports as
/// fire-and-forget.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, message: &str, percent: u8);
}

impl<F> ProgressReporter for F
where
    F: Fn(&str, u8) + Send + Sync,
{
    fn report(&self, message: &str, percent: u8) {
        self(message, percent)
    }
}

/// Discards every checkpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _message: &str, _percent: u8) {}
}

/// Logs checkpoints at debug level, for hosts without a UI.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, message: &str, percent: u8) {
        tracing::debug!(percent, "{message}");
    }
}
