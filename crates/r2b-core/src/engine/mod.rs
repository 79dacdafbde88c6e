//! Ingestion engine and flush coordination.

mod coordinator;
mod ingestion;
mod source;
mod timer;

pub use coordinator::{FlushCoordinator, FlushOutcome, FlushReport, FlushTrigger, KeyWriteOutcome};
pub use ingestion::{IngestionEngine, ShutdownHandle};
pub use source::{LineSource, RecordSource};
pub use timer::FlushTimer;

use tokio::sync::watch;

// Resolves once the flag is set or the sender is gone. The borrow guard
// returned by `wait_for` is not `Send`, so it must not escape into `select!`.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
