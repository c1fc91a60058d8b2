/// The engine's error taxonomy (§7).
///
/// All three variants carry a `String` message rather than a nested domain
/// error type: domain rule definitions are an out-of-scope external
/// collaborator, so the engine core has no concrete error type of theirs to
/// name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// Raised from `EventKind::setup`. The event aborts silently: never
    /// logged, no phase after setup runs.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Raised from `EventKind::check`. Same abort semantics as `Setup`.
    #[error("check failed: {0}")]
    Check(String),

    /// Raised from `EventKind::payload`. The event is already logged (log
    /// precedes payload); the session is notified of failure and
    /// post-phases are skipped.
    #[error("payload failed: {0}")]
    Payload(String),
}
