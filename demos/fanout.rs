use std::time::Duration;

use waitctx::{Context, Error};

/// Fan out a batch of workers under one deadline-bound parent, then wait
/// for every one of them to report completion, including the ones the
/// deadline cancels mid-flight.
#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let root = Context::background();
    let (batch, _cancel) = root.with_timeout(Duration::from_millis(30));

    for id in 0..4u32 {
        let (worker, _) = batch.child();
        tokio::spawn(async move {
            let work = tokio::time::sleep(Duration::from_millis(10 * u64::from(id)));
            tokio::select! {
                _ = worker.done() => match worker.err() {
                    Some(Error::DeadlineExceeded) => println!("worker {id}: deadline exceeded"),
                    other => println!("worker {id}: canceled ({other:?})"),
                },
                _ = work => println!("worker {id}: done"),
            }
            // Every exit path reports completion, cancellation included.
            worker.finished();
        });
    }

    batch.wait_for_children().await;
    println!("batch: all workers accounted for");
}
