//! # Example: open_ended
//!
//! Demonstrates an open-ended aggregate: the source is refreshed on a
//! schedule while at least one caller listens, retried with backoff when a
//! refresh fails, and torn down once everyone has left.
//!
//! ## Flow
//! ```text
//! data(p) ──► attach ──► AggregateCreated
//!   ├─► fetch ─► Next(v1) ─► RefreshScheduled{delay=500ms}
//!   ├─► fetch ─► Error     ─► RefreshScheduled{attempt=1, backoff}
//!   ├─► fetch ─► Next(v2) ─► ...
//!   └─► caller drops the stream ─► teardown after keep_alive ─► AggregateEvicted
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example open_ended --features logging
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use stashkit::{
    Aggregable, BackoffPolicy, Config, JitterPolicy, KeyParams, LogWriter, RequestProcessor,
    SourceError, SourceFn, SourceRef, SourceSpec, StashPolicy, Subscribe,
};
use tokio_util::sync::CancellationToken;

static TICKS: AtomicU64 = AtomicU64::new(0);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // 1. A ticker that fails every third call
    let ticker: SourceRef<KeyParams, u64> =
        SourceFn::arc("ticker", |_p: KeyParams, _ctx: CancellationToken| async move {
            let n = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 3 == 0 {
                return Err(SourceError::failed(format!("tick #{n} lost")));
            }
            Ok(Some(n))
        });

    // 2. Refresh every 500ms, retry failures with backoff, linger 1s after the last caller
    let backoff = BackoffPolicy {
        first: Duration::from_millis(100),
        max: Duration::from_secs(1),
        factor: 2.0,
        jitter: JitterPolicy::Equal,
    };
    let aggregable = Aggregable::by_stash_key()
        .open_ended(|_last: Option<&u64>| Some(Duration::from_millis(500)))
        .with_retry(backoff)
        .with_keep_alive(Duration::from_secs(1));

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let processor = RequestProcessor::builder(Config::default())
        .with_subscribers(subs)
        .build(SourceSpec::new(ticker).with_aggregable(aggregable));

    // 3. Listen to five values, then leave
    let p = KeyParams::new("ticks").with_policy(StashPolicy::SourceOnlyNoStash);
    let mut values = processor.data(p).take(5);
    while let Some(value) = values.next().await {
        println!("[listener] value {}", value?);
    }
    drop(values);

    println!("in flight after leaving: {}", processor.in_flight());
    tokio::time::sleep(Duration::from_millis(1500)).await;
    println!("in flight after keep-alive: {}", processor.in_flight());
    Ok(())
}
