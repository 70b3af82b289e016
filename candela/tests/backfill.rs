use std::sync::Arc;

use candela::reconciler::{BackfillOptions, BackfillStatus, Reconciler};
use candela_core::connector::OhlcvProvider;
use candela_core::store::{CandleWriter, ReconcileStore};
use candela_core::types::{Symbol, Timeframe};
use candela_mock::{MemoryStore, MockConnector, fixtures};

const H: i64 = 3_600_000;
const DAY: i64 = 86_400_000;
const BASE: i64 = 1_699_999_200_000; // a 1h boundary

fn sym() -> Symbol {
    Symbol::from("BTC-USDT-SWAP")
}

fn rig(store: &Arc<MemoryStore>, venue: MockConnector) -> (Reconciler, Arc<MockConnector>) {
    let venue = Arc::new(venue);
    (
        Reconciler::new(
            Arc::clone(store) as Arc<dyn ReconcileStore>,
            Arc::clone(&venue) as Arc<dyn OhlcvProvider>,
        ),
        venue,
    )
}

fn opts(days: i64) -> BackfillOptions {
    BackfillOptions {
        symbols: vec![sym()],
        timeframes: vec![Timeframe::H1],
        days,
        dry_run: false,
    }
}

#[tokio::test(start_paused = true)]
async fn walks_the_range_in_pages_until_now() {
    // 50 days of hourly buckets = 1200 candles, two pages of 1000
    let store = Arc::new(MemoryStore::new());
    let series = fixtures::series(&sym(), Timeframe::H1, BASE, 1200);
    let now = BASE + 1200 * H;
    let (reconciler, venue) = rig(&store, MockConnector::new().with_oracle(series));

    let progresses = reconciler.run_backfill(&opts(50), now).await;

    assert_eq!(progresses.len(), 1);
    let p = &progresses[0];
    assert_eq!(p.status, BackfillStatus::Completed);
    assert_eq!(p.total_fetched, 1200);
    assert_eq!(p.total_inserted, 1200);
    assert_eq!(p.total_duplicates, 0);

    let fetches = venue.fetches();
    assert_eq!(fetches.len(), 2);
    assert_eq!(fetches[0].since_ms, now - 50 * DAY);
    // the second page starts one interval after the last candle of the first
    assert_eq!(fetches[1].since_ms, BASE + 1000 * H);

    let stored = store
        .stored_timestamps(&sym(), Timeframe::H1, BASE, now)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1200);
}

#[tokio::test(start_paused = true)]
async fn existing_rows_count_as_duplicates_not_overwrites() {
    let store = Arc::new(MemoryStore::new());
    let series = fixtures::series(&sym(), Timeframe::H1, BASE, 24);
    let mut pre_seeded = series[3].clone();
    pre_seeded.close = rust_decimal::Decimal::from(9_999);
    store.upsert_batch(&[pre_seeded.clone()]).await.unwrap();
    let now = BASE + 24 * H;
    let (reconciler, _venue) = rig(&store, MockConnector::new().with_oracle(series));

    let progresses = reconciler.run_backfill(&opts(1), now).await;
    let p = &progresses[0];
    assert_eq!(p.total_inserted, 23);
    assert_eq!(p.total_duplicates, 1);

    // backfill never overwrites what the stream already persisted
    let stored = store.series(&sym(), Timeframe::H1);
    assert_eq!(stored[3], pre_seeded);
}

#[tokio::test(start_paused = true)]
async fn an_empty_venue_ends_the_walk_cleanly() {
    let store = Arc::new(MemoryStore::new());
    let now = BASE + 24 * H;
    let (reconciler, venue) = rig(&store, MockConnector::new());

    let progresses = reconciler.run_backfill(&opts(1), now).await;
    let p = &progresses[0];
    assert_eq!(p.status, BackfillStatus::Completed);
    assert_eq!(p.total_fetched, 0);
    assert_eq!(venue.fetches().len(), 1);
    assert!(store.rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn timeframes_within_a_symbol_run_serially_in_order() {
    let store = Arc::new(MemoryStore::new());
    let h1 = fixtures::series(&sym(), Timeframe::H1, BASE, 24);
    let h4 = fixtures::series(&sym(), Timeframe::H4, BASE, 6);
    let now = BASE + 24 * H;
    let (reconciler, venue) = rig(
        &store,
        MockConnector::new().with_oracle(h1).with_oracle(h4),
    );

    let mut options = opts(1);
    options.timeframes = vec![Timeframe::H1, Timeframe::H4];
    let progresses = reconciler.run_backfill(&options, now).await;

    assert_eq!(progresses.len(), 2);
    assert_eq!(progresses[0].timeframe, Timeframe::H1);
    assert_eq!(progresses[1].timeframe, Timeframe::H4);

    let fetched_tfs: Vec<Timeframe> = venue.fetches().iter().map(|f| f.timeframe).collect();
    assert_eq!(fetched_tfs, vec![Timeframe::H1, Timeframe::H4]);
    assert_eq!(store.series(&sym(), Timeframe::H4).len(), 6);
}

#[tokio::test(start_paused = true)]
async fn dry_run_plans_without_fetching() {
    let store = Arc::new(MemoryStore::new());
    let now = BASE + 24 * H;
    let (reconciler, venue) = rig(&store, MockConnector::new());

    let mut options = opts(1);
    options.dry_run = true;
    let progresses = reconciler.run_backfill(&options, now).await;

    assert_eq!(progresses.len(), 1);
    let p = &progresses[0];
    assert_eq!(p.status, BackfillStatus::Planned);
    // inclusive bucket count over exactly one aligned day
    assert_eq!(p.total_expected, 25);
    assert!(venue.fetches().is_empty());
    assert!(store.rows().is_empty());
}
