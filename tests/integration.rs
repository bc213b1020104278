use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use waitctx::{Context, Error};

#[tokio::test(start_paused = true)]
async fn test_wait_one_child() {
    let root = Context::background();
    let (ctx, _cancel) = root.with_cancel();

    let value = Arc::new(AtomicUsize::new(0));
    let worker = ctx.enable_wait();
    let seen = value.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1)).await;
        seen.store(1, Ordering::SeqCst);
        worker.finished();
    });

    root.wait_for_children().await;
    assert_eq!(value.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_multiple_children() {
    let root = Context::background();
    let (ctx, _cancel) = root.with_cancel();

    let completed = Arc::new(AtomicUsize::new(0));
    for delay_ms in [1u64, 2, 3] {
        let worker = ctx.enable_wait();
        let completed = completed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            completed.fetch_add(1, Ordering::SeqCst);
            worker.finished();
        });
    }

    root.wait_for_children().await;
    assert_eq!(completed.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_wait_returns_immediately_without_registrations() {
    let root = Context::background();
    let (unregistered, _cancel) = root.with_cancel();

    // Neither a root's finished() nor an unregistered child's may touch
    // any counter.
    root.finished();
    unregistered.finished();

    root.wait_for_children().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_does_not_release_wait() {
    let root = Context::background();
    let (ctx, cancel) = root.with_cancel();
    let ctx = ctx.enable_wait();

    cancel.cancel();
    ctx.done().await;
    assert_eq!(ctx.err(), Some(Error::Canceled));

    // Cancelled is not finished: the parent must still be blocked.
    let blocked = tokio::time::timeout(Duration::from_millis(10), root.wait_for_children()).await;
    assert!(blocked.is_err(), "cancellation released wait_for_children");

    ctx.finished();
    root.wait_for_children().await;
}

#[tokio::test(start_paused = true)]
async fn test_independent_parents_do_not_interfere() {
    let parent_a = Context::background();
    let parent_b = Context::background();

    let (child_a, _cancel_a) = parent_a.child();
    let (child_b, _cancel_b) = parent_b.child();

    child_a.finished();
    parent_a.wait_for_children().await;

    // Completing A's children must not unblock B.
    let blocked =
        tokio::time::timeout(Duration::from_millis(10), parent_b.wait_for_children()).await;
    assert!(blocked.is_err(), "parent B released by parent A's children");

    child_b.finished();
    parent_b.wait_for_children().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_is_reentrant() {
    let root = Context::background();
    let (worker, _cancel) = root.child();

    let first = tokio::spawn({
        let root = root.clone();
        async move { root.wait_for_children().await }
    });
    let second = tokio::spawn({
        let root = root.clone();
        async move { root.wait_for_children().await }
    });

    tokio::time::sleep(Duration::from_millis(1)).await;
    worker.finished();

    first.await.unwrap();
    second.await.unwrap();
}

#[tokio::test]
async fn test_err_is_none_while_live() {
    let root = Context::background();
    let (ctx, _cancel) = root.with_cancel();
    assert!(root.err().is_none());
    assert!(ctx.err().is_none());
}

#[tokio::test]
async fn test_err_after_explicit_cancel() {
    let root = Context::background();
    let (ctx, cancel) = root.with_cancel();
    cancel.cancel();
    ctx.done().await;
    assert_eq!(ctx.err(), Some(Error::Canceled));
}

#[tokio::test(start_paused = true)]
async fn test_err_after_timeout() {
    let root = Context::background();
    let (ctx, _cancel) = root.with_timeout(Duration::from_millis(5));
    assert!(ctx.err().is_none());

    ctx.done().await;
    assert_eq!(ctx.err(), Some(Error::DeadlineExceeded));
}

#[tokio::test]
async fn test_parent_cancel_propagates_to_descendants() {
    let root = Context::background();
    let (parent, cancel) = root.with_cancel();
    let (child, _child_cancel) = parent.with_cancel();

    cancel.cancel();
    child.done().await;
    assert_eq!(child.err(), Some(Error::Canceled));
}

#[tokio::test(start_paused = true)]
async fn test_descendants_report_ancestor_deadline() {
    let root = Context::background();
    let (parent, _cancel) = root.with_timeout(Duration::from_millis(5));
    let (child, _child_cancel) = parent.with_cancel();

    child.done().await;
    assert_eq!(child.err(), Some(Error::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn test_child_deadline_clamped_to_parent() {
    let root = Context::background();
    let now = Instant::now();
    let (parent, _cancel) = root.with_deadline(now + Duration::from_millis(5));
    let (child, _child_cancel) = parent.with_deadline(now + Duration::from_millis(50));

    assert_eq!(child.deadline(), parent.deadline());

    child.done().await;
    assert!(Instant::now() < now + Duration::from_millis(50));
    assert_eq!(child.err(), Some(Error::DeadlineExceeded));
}

#[tokio::test]
async fn test_past_deadline_cancels_immediately() {
    let root = Context::background();
    let deadline = Instant::now() - Duration::from_millis(1);
    let (ctx, _cancel) = root.with_deadline(deadline);
    assert_eq!(ctx.err(), Some(Error::DeadlineExceeded));
}

#[tokio::test]
async fn test_from_token_normalizes_external_cancel() {
    let token = CancellationToken::new();
    let root = Context::from_token(token.clone());
    assert!(root.err().is_none());

    token.cancel();
    assert_eq!(root.err(), Some(Error::Canceled));
}

#[tokio::test]
#[should_panic(expected = "finished() called more times")]
async fn test_finished_overcall_panics() {
    let root = Context::background();
    let (ctx, _cancel) = root.with_cancel();
    let ctx = ctx.enable_wait();

    ctx.finished();
    ctx.finished();
}

#[tokio::test(start_paused = true)]
async fn test_registration_per_task() {
    // One context handed to three tasks, registered once per task, as the
    // accounting discipline requires.
    let root = Context::background();
    let (ctx, _cancel) = root.with_cancel();

    for delay_ms in [3u64, 1, 2] {
        let worker = ctx.enable_wait();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            worker.finished();
        });
    }

    root.wait_for_children().await;
}

#[tokio::test(start_paused = true)]
async fn test_finished_required_even_when_cancelled() {
    let root = Context::background();
    let (worker, cancel) = root.child();

    let done = tokio::spawn(async move {
        worker.done().await;
        // The cancellation path still owes its completion signal.
        worker.finished();
    });

    cancel.cancel();
    done.await.unwrap();
    root.wait_for_children().await;
}
