/// Transaction retry-driver tests
///
/// Drives `with_transaction` against a scripted dispatcher to exercise the
/// retry decision table: transient errors re-run the whole callback,
/// ambiguous commits retry only the commit, deadlines and cancellation stop
/// the loop.
/// Run with: cargo test --test with_transaction_tests
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use quorumdb_driver::{
    Acknowledgment, CancellationToken, Client, ClientConfig, CommandDispatcher, DriverError,
    ErrorLabels, Result, SessionId, SessionOptions, TransactionContext, TransactionState,
};

/// Dispatcher with a scripted queue of commit outcomes. Once the queue is
/// exhausted every commit succeeds. Aborts always succeed.
#[derive(Default)]
struct ScriptedDispatcher {
    commit_outcomes: Mutex<VecDeque<Result<()>>>,
    commits: AtomicUsize,
    aborts: AtomicUsize,
    last_commit_context: Mutex<Option<TransactionContext>>,
}

impl ScriptedDispatcher {
    fn with_commit_outcomes(outcomes: Vec<Result<()>>) -> Arc<Self> {
        Arc::new(Self {
            commit_outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        })
    }

    fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandDispatcher for ScriptedDispatcher {
    async fn commit_transaction(
        &self,
        ctx: TransactionContext,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        *self.last_commit_context.lock() = Some(ctx);
        self.commit_outcomes.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn abort_transaction(
        &self,
        _ctx: TransactionContext,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end_sessions(&self, _ids: Vec<SessionId>) -> Result<()> {
        Ok(())
    }
}

fn client_with(dispatcher: Arc<ScriptedDispatcher>, config: ClientConfig) -> Client {
    Client::new(dispatcher, config).unwrap()
}

fn transient_error() -> DriverError {
    DriverError::server(112, "write conflict").with_labels(ErrorLabels::transient())
}

#[tokio::test]
async fn test_commits_callback_result_on_first_try() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let result: i32 = session
        .with_transaction(
            |handle, _cancel| {
                async move {
                    // Simulate one operation executing inside the transaction.
                    handle.about_to_send_command()?;
                    Ok(42)
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result, 42);
    assert_eq!(dispatcher.commits(), 1);
    assert_eq!(dispatcher.aborts(), 0);
    assert_eq!(
        session.transaction_state().unwrap(),
        TransactionState::Committed
    );
}

#[tokio::test]
async fn test_transient_failures_rerun_whole_callback() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_callback = Arc::clone(&attempts);

    let result: &str = session
        .with_transaction(
            move |handle, _cancel| {
                let attempts = Arc::clone(&attempts_in_callback);
                async move {
                    handle.about_to_send_command()?;
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient_error())
                    } else {
                        Ok("done")
                    }
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result, "done");
    // Two failed attempts plus the successful one.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    // Each failed attempt aborted its in-progress transaction.
    assert_eq!(dispatcher.aborts(), 2);
    assert_eq!(dispatcher.commits(), 1);
    // All three transaction starts ran on one pooled server session.
    assert_eq!(client.pool_stats().created_sessions, 1);
}

#[tokio::test]
async fn test_ambiguous_commit_retries_commit_only() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![Err(DriverError::network(
        "connection reset during commit",
    ))]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_callback = Arc::clone(&attempts);

    let result: i32 = session
        .with_transaction(
            move |handle, _cancel| {
                let attempts = Arc::clone(&attempts_in_callback);
                async move {
                    handle.about_to_send_command()?;
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result, 7);
    // The callback ran once; only the commit was retried.
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.commits(), 2);
    assert_eq!(dispatcher.aborts(), 0);

    // The retried commit upgraded its write concern to majority.
    let ctx = dispatcher.last_commit_context.lock().clone().unwrap();
    assert_eq!(ctx.write_concern.unwrap().w, Some(Acknowledgment::Majority));
}

#[tokio::test]
async fn test_transient_commit_failure_reruns_callback() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![Err(DriverError::server(
        251,
        "no such transaction",
    )
    .with_labels(ErrorLabels::transient()))]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_callback = Arc::clone(&attempts);

    session
        .with_transaction(
            move |handle, _cancel| {
                let attempts = Arc::clone(&attempts_in_callback);
                async move {
                    handle.about_to_send_command()?;
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.commits(), 2);
}

#[tokio::test]
async fn test_transient_commit_failure_with_mixed_labels_reruns_callback() {
    // A non-retryable server error can carry both labels at once; the
    // commit-only path is closed to it, so the whole callback must re-run.
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![Err(DriverError::server(
        8000,
        "mixed labels",
    )
    .with_labels(ErrorLabels {
        transient_transaction: true,
        unknown_commit_result: true,
    }))]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_callback = Arc::clone(&attempts);

    session
        .with_transaction(
            move |handle, _cancel| {
                let attempts = Arc::clone(&attempts_in_callback);
                async move {
                    handle.about_to_send_command()?;
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.commits(), 2);
    assert_eq!(
        session.transaction_state().unwrap(),
        TransactionState::Committed
    );
}

#[tokio::test]
async fn test_deadline_stops_retrying_with_last_error() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let config = ClientConfig::new().with_transaction_timeout(Duration::from_millis(100));
    let client = client_with(Arc::clone(&dispatcher), config);
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_callback = Arc::clone(&attempts);

    let err = session
        .with_transaction::<(), _>(
            move |handle, _cancel| {
                let attempts = Arc::clone(&attempts_in_callback);
                async move {
                    handle.about_to_send_command()?;
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    Err(transient_error())
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    // The last transient error is surfaced once the budget is exhausted.
    assert!(err.is_transient_transaction_error());
    let attempts = attempts.load(Ordering::SeqCst);
    assert!(
        (2..=4).contains(&attempts),
        "expected a bounded number of attempts, got {attempts}"
    );
    assert_eq!(dispatcher.commits(), 0);
}

#[tokio::test]
async fn test_cancellation_aborts_and_wins_over_retry() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let cancel = CancellationToken::new();
    let err = session
        .with_transaction::<(), _>(
            |handle, token| {
                async move {
                    handle.about_to_send_command()?;
                    // Cancellation arrives mid-callback; the callback surfaces
                    // a transient error that would otherwise trigger a retry.
                    token.cancel();
                    Err(transient_error())
                }
                .boxed()
            },
            None,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::Cancelled));
    // The transaction was not left in progress.
    assert_eq!(
        session.transaction_state().unwrap(),
        TransactionState::Aborted
    );
}

#[tokio::test]
async fn test_callback_error_propagates_verbatim_after_abort() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let err = session
        .with_transaction::<(), _>(
            |handle, _cancel| {
                async move {
                    handle.about_to_send_command()?;
                    Err(DriverError::server(121, "document validation failed"))
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::Command { .. }));
    assert!(!err.is_transient_transaction_error());
    assert_eq!(dispatcher.aborts(), 1);
    assert_eq!(dispatcher.commits(), 0);
    assert_eq!(
        session.transaction_state().unwrap(),
        TransactionState::Aborted
    );
}

#[tokio::test]
async fn test_callback_that_commits_itself() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    let result: i32 = session
        .with_transaction(
            |handle, cancel| {
                async move {
                    handle.about_to_send_command()?;
                    handle.commit_transaction(&cancel).await?;
                    Ok(9)
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result, 9);
    // The runner did not commit a second time.
    assert_eq!(dispatcher.commits(), 1);
}

#[tokio::test]
async fn test_commit_is_idempotent_after_success() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();
    let cancel = CancellationToken::new();

    session.start_transaction(None).unwrap();
    session.about_to_send_command().unwrap();
    session.commit_transaction(&cancel).await.unwrap();

    // Committing again is a no-op success and sends nothing.
    session.commit_transaction(&cancel).await.unwrap();
    session.commit_transaction(&cancel).await.unwrap();
    assert_eq!(dispatcher.commits(), 1);
    assert_eq!(
        session.transaction_state().unwrap(),
        TransactionState::Committed
    );
}

#[tokio::test]
async fn test_commit_without_operations_sends_nothing() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    session.start_transaction(None).unwrap();
    session
        .commit_transaction(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(dispatcher.commits(), 0);
    assert_eq!(
        session.transaction_state().unwrap(),
        TransactionState::Committed
    );
}

#[tokio::test]
async fn test_start_transaction_failure_is_not_retried() {
    let dispatcher = ScriptedDispatcher::with_commit_outcomes(vec![]);
    let client = client_with(Arc::clone(&dispatcher), ClientConfig::new());
    let mut session = client.start_session(SessionOptions::new()).unwrap();

    // Leave a transaction active so start_transaction inside the runner fails.
    session.start_transaction(None).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_callback = Arc::clone(&calls);

    let err = session
        .with_transaction::<(), _>(
            move |_handle, _cancel| {
                let calls = Arc::clone(&calls_in_callback);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            },
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::InvalidOperation(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
