//! First-class cancellation marker for in-flight driver runs.
//!
//! Cancellation originates at the service: its response to a progress post
//! may carry `{"status": "cancel"}`. The progress sink surfaces that as a
//! tagged return value, and the driver runner converts it into SIGUSR1 or a
//! kill depending on what the driver's `--info` advertised.

/// Returned by a progress sink when the service directed the in-flight
/// operation to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequested;

impl std::fmt::Display for CancelRequested {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cancellation requested by the service")
    }
}
