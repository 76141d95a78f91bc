//! # Example: basic_request
//!
//! Demonstrates how [`RequestProcessor`] combines a stash with a source and
//! how concurrent requests share one source call.
//!
//! ## Flow
//! ```text
//! request #1 (empty stash)
//!   ├─► Executing
//!   ├─► CallingSource ─► ReceivedFromSource("...")
//!   ├─► SavingToStash ─► SavedToStash
//!   └─► Complete
//!
//! request #2 (fresh stash, StashThenSourceIfExpired)
//!   ├─► Executing
//!   ├─► FetchingFromStash ─► ReceivedFromStash("...")
//!   └─► Complete
//!
//! 3 × concurrent request (Source policy, aggregable) ─► 1 source call
//! ```
//!
//! ## Run
//! ```bash
//! cargo run --example basic_request
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
    Aggregable, Config, Expiry, KeyParams, MemoryStash, RequestProcessor, SourceError, SourceFn,
    SourceRef, SourceSpec, StashBackend, StashPolicy, Stashable,
};
use tokio_util::sync::CancellationToken;

static CALLS: AtomicU64 = AtomicU64::new(0);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. A slow source that counts its calls
    let weather: SourceRef<KeyParams, String> =
        SourceFn::arc("weather", |p: KeyParams, ctx: CancellationToken| async move {
            let n = CALLS.fetch_add(1, Ordering::Relaxed) + 1;
            println!("[weather] call #{n} for {}", p.key());
            tokio::select! {
                _ = ctx.cancelled() => Err(SourceError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    Ok(Some(format!("sunny in {}", p.key())))
                }
            }
        });

    // 2. Stash entries expire after a minute; callers share in-flight calls
    let memory: Arc<dyn StashBackend<String>> = Arc::new(MemoryStash::new());
    let spec = SourceSpec::new(weather)
        .with_stashable(Stashable::backed_by(memory).with_expiry(Expiry::max_age(Duration::from_secs(60))))
        .with_aggregable(Aggregable::by_stash_key());

    let processor = RequestProcessor::builder(Config::default()).build(spec);

    // 3. First request: nothing stashed yet
    let mut steps = processor.progress(KeyParams::new("berlin"));
    while let Some(step) = steps.next().await {
        println!("  #1 {:?}", step?);
    }

    // 4. Second request: served from the stash
    let mut steps = processor.progress(KeyParams::new("berlin"));
    while let Some(step) = steps.next().await {
        println!("  #2 {:?}", step?);
    }

    // 5. Concurrent requests forcing the source: one physical call
    let p = KeyParams::new("paris").with_policy(StashPolicy::Source);
    let (a, b, c) = tokio::join!(
        processor.request(p.clone()),
        processor.request(p.clone()),
        processor.request(p)
    );
    println!("  concurrent: {:?} {:?} {:?}", a?, b?, c?);
    println!("source calls: {}", CALLS.load(Ordering::Relaxed));
    Ok(())
}
