//! Concurrent ingestion and ledger contention

mod common;

use adx_store::{BidRecord, Money, OpContext};
use chrono::{Duration, Utc};
use common::{impression, memory_store, money};
use std::collections::HashSet;

const THREADS: usize = 8;
const CREDITS_PER_THREAD: usize = 500;

#[test]
fn test_concurrent_credits_same_miner_are_not_lost() {
    let store = memory_store(100);
    let ctx = OpContext::background();
    let one = money("1.00");

    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                for _ in 0..CREDITS_PER_THREAD {
                    store.credit_earnings(&ctx, "miner-shared", one).unwrap();
                }
            });
        }
    });

    let expected = Money::from_units((THREADS * CREDITS_PER_THREAD) as i64);
    assert_eq!(store.get_earnings(&ctx, "miner-shared").unwrap(), expected);
    assert_eq!(
        store.get_metrics()["credits"],
        (THREADS * CREDITS_PER_THREAD) as u64
    );
}

#[test]
fn test_concurrent_credits_distinct_miners() {
    let store = memory_store(100);
    let ctx = OpContext::background();

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let store = &store;
            let ctx = &ctx;
            s.spawn(move || {
                let miner = format!("miner-{}", t);
                for _ in 0..CREDITS_PER_THREAD {
                    store.credit_earnings(ctx, &miner, money("0.25")).unwrap();
                }
            });
        }
    });

    let entries = store.earnings_entries(&ctx).unwrap();
    assert_eq!(entries.len(), THREADS);
    for entry in entries {
        assert_eq!(entry.balance, money("125"));
    }
}

#[test]
fn test_concurrent_ingestion_keeps_every_record() {
    let store = memory_store(64);
    let ctx = OpContext::background();
    let base = Utc::now() - Duration::hours(1);
    let per_thread = 300;

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let store = &store;
            let ctx = &ctx;
            s.spawn(move || {
                for i in 0..per_thread {
                    let ts = base + Duration::milliseconds((i * THREADS + t) as i64);
                    let id = format!("imp-{}-{}", t, i);
                    store.store_impression(ctx, &impression(&id, ts, "0.10")).unwrap();
                    if i % 3 == 0 {
                        let bid = BidRecord::new(format!("bid-{}-{}", t, i), ts, money("0.20"));
                        store.store_bid(ctx, &bid).unwrap();
                    }
                }
            });
        }
    });
    store.flush().unwrap();

    let all = store
        .get_impressions(&ctx, base, Utc::now(), 100_000)
        .unwrap();
    assert_eq!(all.len(), THREADS * per_thread);
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    let ids: HashSet<&str> = all.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), all.len());

    let bids = store.get_bids(&ctx, base, Utc::now(), 100_000).unwrap();
    assert_eq!(bids.len(), THREADS * per_thread.div_ceil(3));
}

#[test]
fn test_concurrent_upserts_of_one_id_leave_single_record() {
    let store = memory_store(8);
    let ctx = OpContext::background();
    let base = Utc::now() - Duration::hours(1);

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let store = &store;
            let ctx = &ctx;
            s.spawn(move || {
                for i in 0..50 {
                    let ts = base + Duration::seconds((t * 50 + i) as i64);
                    store.store_impression(ctx, &impression("same-id", ts, "1")).unwrap();
                }
            });
        }
    });
    store.flush().unwrap();

    let all = store
        .get_impressions(&ctx, base - Duration::hours(1), Utc::now(), 1000)
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(store.get_impression(&ctx, "same-id").unwrap(), all[0]);
}

#[test]
fn test_reads_proceed_during_ingestion() {
    let store = memory_store(32);
    let ctx = OpContext::background();
    let base = Utc::now() - Duration::hours(2);

    for i in 0..500 {
        store
            .store_impression(&ctx, &impression(&format!("seed-{}", i), base + Duration::seconds(i), "1"))
            .unwrap();
    }
    store.flush().unwrap();

    std::thread::scope(|s| {
        s.spawn(|| {
            for i in 0..500 {
                store
                    .store_impression(
                        &ctx,
                        &impression(&format!("live-{}", i), base + Duration::minutes(30) + Duration::seconds(i), "1"),
                    )
                    .unwrap();
            }
        });
        s.spawn(|| {
            for _ in 0..20 {
                let seen = store
                    .get_impressions(&ctx, base, base + Duration::minutes(10), 1000)
                    .unwrap();
                assert_eq!(seen.len(), 500);
            }
        });
    });
}
