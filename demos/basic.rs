use std::time::Duration;

use waitctx::Context;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let root = Context::background();

    // Derive a cancellable child and opt it into wait-tracking.
    let (ctx, cancel) = root.with_cancel();
    let worker = ctx.enable_wait();
    tokio::spawn(async move {
        tokio::select! {
            _ = worker.done() => {
                println!("worker: canceled ({:?})", worker.err());
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                println!("worker: work complete");
            }
        }
        worker.finished();
    });

    println!("parent: waiting for children");
    root.wait_for_children().await;
    println!("parent: all children finished");

    cancel.cancel();
}
