use candela_core::stream::StreamHandle;

#[tokio::test(flavor = "multi_thread")]
async fn stop_lets_the_session_observe_the_signal() {
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let _ = stop_rx.await;
        let _ = done_tx.send(());
    });

    let handle = StreamHandle::new(task, stop_tx);
    handle.stop().await;

    // Completed via the stop signal, not an abort
    let _ = tokio::time::timeout(std::time::Duration::from_millis(100), done_rx)
        .await
        .expect("session did not complete after stop()");
}

#[tokio::test(flavor = "multi_thread")]
async fn drop_cancels_a_session_with_no_stop_channel() {
    let task = tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    });
    let probe = tokio::spawn(async {});
    let _ = probe.await;

    let handle = StreamHandle::new_abort_only(task);
    drop(handle);
    // nothing to assert beyond not hanging; the abort lands asynchronously
}
