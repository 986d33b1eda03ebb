//! Boolean watch channels used as one-way stop signals.

use tokio::sync::watch;

/// Resolve once `signal` reads `true` or its sender is gone.
///
/// The borrow taken by `wait_for` never outlives this call, so the future
/// stays `Send` inside `select!` loops of spawned tasks.
pub async fn raised(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|raised| *raised).await;
}
