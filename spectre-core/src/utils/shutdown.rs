use tokio::sync::watch;

/// Resolves once shutdown is requested or the signal's sender is dropped.
///
/// Checks the current value first, so a signal sent before the receiver was
/// created is still observed.
pub async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
