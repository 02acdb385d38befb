use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use offload_client::proto::RequestStatus;
use offload_client::{
    example_session, run_session_offload, Connection, Coordinator, CoordinatorState,
    DeadlineContext, GrpcSessionTable, OffloadError, SessionOffload, MAX_JITTER,
};
use pretty_assertions::assert_eq;
use sessionoffload_testing::test_utils::{assert_with_retries, seeded_rng, unused_addr};
use sessionoffload_testing::{
    StubBehavior, StubConfig, StubServerHandle, TEST_REQUEST_TIMEOUT_MS, TEST_RUN_BUDGET_SECS,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tonic::Code;

fn run_budget() -> Duration {
    Duration::from_secs(TEST_RUN_BUDGET_SECS)
}

#[test_log::test(tokio::test)]
async fn open_succeeds_when_listening() -> anyhow::Result<()> {
    let server = StubServerHandle::default().await?;

    let connection = Connection::open(&server.addr()).await?;
    assert_eq!(connection.target(), format!("http://{}", server.addr()));
    connection.close();

    server.shutdown().await
}

#[test_log::test(tokio::test)]
async fn eager_open_fails_fast_without_listener() -> anyhow::Result<()> {
    let addr = unused_addr()?;
    let start = Instant::now();

    let err = Connection::open(&addr).await.unwrap_err();

    assert!(matches!(err, OffloadError::Connection { .. }), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(2));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn lazy_open_surfaces_failure_on_first_use() -> anyhow::Result<()> {
    let addr = unused_addr()?;
    let connection = Connection::open_lazy(&addr)?;
    let session_table = GrpcSessionTable::new(connection.channel());

    let ctx = DeadlineContext::new(Duration::from_secs(5));
    let err = session_table.offload_session(&ctx).await.unwrap_err();

    match err {
        OffloadError::Rpc(status) => assert_eq!(status.code(), Code::Unavailable),
        other => panic!("expected an unavailable status, got {other:?}"),
    }
    Ok(())
}

#[test_log::test(tokio::test)]
async fn immediate_server_completes_quickly() -> anyhow::Result<()> {
    let server = StubServerHandle::default().await?;
    let calls = server.calls();
    let start = Instant::now();

    let report = timeout(
        run_budget(),
        run_session_offload(&server.addr(), seeded_rng(1), CancellationToken::new()),
    )
    .await??;

    let response = report.offload?;
    assert!(response.is_accepted());
    assert_eq!(response.session_id, 1);
    assert_eq!(report.background_notifications, 1);
    // one round trip each
    assert_eq!(calls.add_session(), 1);
    assert_eq!(calls.get_all_sessions(), 1);
    assert!(start.elapsed() < Duration::from_secs(1) + MAX_JITTER);

    server.shutdown().await
}

#[test_log::test(tokio::test)]
async fn silent_server_hits_deadline_then_runs_background() -> anyhow::Result<()> {
    let server =
        StubServerHandle::spawn(StubConfig::default().with_add_session(StubBehavior::Never))
            .await?;
    let calls = server.calls();
    let request_timeout = Duration::from_millis(TEST_REQUEST_TIMEOUT_MS);

    let connection = Connection::open(&server.addr()).await?;
    let coordinator = Coordinator::new(
        GrpcSessionTable::new(connection.channel()),
        seeded_rng(2),
    )
    .with_request_timeout(request_timeout);
    let states = coordinator.subscribe();

    let start = Instant::now();
    let report = timeout(run_budget(), coordinator.run(connection)).await?;
    let elapsed = start.elapsed();

    assert!(
        matches!(report.offload, Err(OffloadError::DeadlineExceeded(t)) if t == request_timeout),
        "{:?}",
        report.offload
    );
    assert!(elapsed >= request_timeout);
    assert!(elapsed < request_timeout + MAX_JITTER + Duration::from_secs(2));
    assert_eq!(calls.add_session(), 1);
    assert_eq!(calls.get_all_sessions(), 1);
    assert_eq!(*states.borrow(), CoordinatorState::Done);

    server.shutdown().await
}

#[test_log::test(tokio::test)]
async fn no_server_is_fatal_before_background() -> anyhow::Result<()> {
    let addr = unused_addr()?;

    let err = run_session_offload(&addr, seeded_rng(3), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn service_error_is_reported_not_fatal() -> anyhow::Result<()> {
    let server = StubServerHandle::spawn(
        StubConfig::default().with_add_session(StubBehavior::Fail(Code::ResourceExhausted)),
    )
    .await?;
    let calls = server.calls();

    let report = timeout(
        run_budget(),
        run_session_offload(&server.addr(), seeded_rng(4), CancellationToken::new()),
    )
    .await??;

    match report.offload {
        Err(OffloadError::Rpc(status)) => assert_eq!(status.code(), Code::ResourceExhausted),
        other => panic!("expected a service error, got {other:?}"),
    }
    assert_eq!(calls.get_all_sessions(), 1);

    server.shutdown().await
}

#[test_log::test(tokio::test)]
async fn background_failure_is_silent() -> anyhow::Result<()> {
    let server = StubServerHandle::spawn(
        StubConfig::default().with_get_all_sessions(StubBehavior::Fail(Code::Internal)),
    )
    .await?;

    let report = timeout(
        run_budget(),
        run_session_offload(&server.addr(), seeded_rng(5), CancellationToken::new()),
    )
    .await??;

    assert!(report.offload.is_ok());
    assert_eq!(report.background_notifications, 1);

    server.shutdown().await
}

#[test_log::test(tokio::test)]
async fn connection_closed_once_after_background() -> anyhow::Result<()> {
    let server = StubServerHandle::default().await?;
    let calls = server.calls();
    let closes = Arc::new(AtomicUsize::new(0));
    let background_calls_at_close = Arc::new(AtomicUsize::new(usize::MAX));

    let connection = Connection::open(&server.addr()).await?.on_close({
        let closes = closes.clone();
        let seen = background_calls_at_close.clone();
        let calls = calls.clone();
        move |_| {
            closes.fetch_add(1, Ordering::SeqCst);
            seen.store(calls.get_all_sessions(), Ordering::SeqCst);
        }
    });
    let session_table = GrpcSessionTable::new(connection.channel());

    timeout(
        run_budget(),
        Coordinator::new(session_table, seeded_rng(6)).run(connection),
    )
    .await?;

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(background_calls_at_close.load(Ordering::SeqCst), 1);

    server.shutdown().await
}

#[test_log::test(tokio::test)]
async fn channel_clones_outlive_close() -> anyhow::Result<()> {
    let server = StubServerHandle::default().await?;
    let calls = server.calls();

    let connection = Connection::open(&server.addr()).await?;
    let session_table = GrpcSessionTable::new(connection.channel());
    connection.close();

    // the handle taken before close still reaches the server
    let ctx = DeadlineContext::new(Duration::from_secs(5));
    let response = session_table.offload_session(&ctx).await?;
    assert!(response.is_accepted());
    assert_eq!(calls.add_session(), 1);

    drop(session_table);
    server.shutdown().await
}

#[test_log::test(tokio::test)]
async fn repeated_session_is_rejected() -> anyhow::Result<()> {
    let server = StubServerHandle::default().await?;

    for expected in [
        RequestStatus::Accepted,
        RequestStatus::RejectedSessionAlreadyExists,
    ] {
        let connection = Connection::open(&server.addr()).await?;
        let session_table =
            GrpcSessionTable::new(connection.channel()).with_session(example_session(42));
        let report = timeout(
            run_budget(),
            Coordinator::new(session_table, seeded_rng(7)).run(connection),
        )
        .await?;

        let response = report.offload?;
        assert_eq!(response.session_id, 42);
        assert_eq!(response.request_status(), expected);
    }

    server.shutdown().await
}

#[test_log::test(tokio::test)]
async fn stalled_background_blocks_forever() -> anyhow::Result<()> {
    let server = StubServerHandle::spawn(
        StubConfig::default().with_get_all_sessions(StubBehavior::Never),
    )
    .await?;
    let calls = server.calls();

    let connection = Connection::open(&server.addr()).await?;
    let coordinator =
        Coordinator::new(GrpcSessionTable::new(connection.channel()), seeded_rng(8));
    let states = coordinator.subscribe();
    let run = tokio::spawn(coordinator.run(connection));

    // the background request reached the server and will never be answered
    assert_with_retries(
        || {
            let calls = calls.clone();
            async move { calls.get_all_sessions() }
        },
        1,
    )
    .await;
    assert_with_retries(
        || {
            let states = states.clone();
            async move { *states.borrow() }
        },
        CoordinatorState::AwaitingCompletion,
    )
    .await;

    // watchdog: still stuck well past any reasonable completion time
    tokio::time::sleep(MAX_JITTER + Duration::from_millis(500)).await;
    assert!(!run.is_finished());
    assert_eq!(*states.borrow(), CoordinatorState::AwaitingCompletion);

    run.abort();
    server.shutdown().await
}
