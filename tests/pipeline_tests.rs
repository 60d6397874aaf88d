//! Cross-component tests: ring buffer under real concurrency, and the
//! worker's backfill/restart behavior against on-disk logs.

use std::collections::HashMap;
use std::sync::Arc;
use tickwindow_rs::keys::{Platform, WindowKey, WindowKind};
use tickwindow_rs::orchestrator::{checkpoint_key, discover_checkpoints};
use tickwindow_rs::prelude::*;
use tickwindow_rs::store::WindowStore;
use tickwindow_rs::window::BookHandler;

fn trade_json(time: i64) -> Vec<u8> {
    format!(
        r#"{{"symbol":"btc_usdt","price":"10","quantity":"1","time":{time},"platform":"binance","side":0,"orderType":0}}"#
    )
    .into_bytes()
}

fn live_trade_json(id: i64, time: i64, price: &str) -> Vec<u8> {
    format!(
        r#"{{"id":{id},"symbol":"btc_usdt","price":"{price}","quantity":"1","time":{time},"platform":"binance","side":0,"orderType":0}}"#
    )
    .into_bytes()
}

fn book_json(kind: &str, time: i64) -> Vec<u8> {
    format!(
        r#"{{"type":"{kind}","symbol":"btc_usdt","bids":[["100","1"]],"asks":[["101","1"]],"time":{time},"platform":"binance"}}"#
    )
    .into_bytes()
}

fn drain(ring: &Ring) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(record) = ring.read() {
        out.push(record);
    }
    out
}

fn worker_options(log_dir: &std::path::Path, checkpoint: Option<i64>) -> WorkerOptions {
    WorkerOptions {
        platform: Platform::Binance,
        log_dir: log_dir.to_path_buf(),
        symbols: vec!["btc_usdt".to_string()],
        window_sizes_ms: vec![1000],
        checkpoints: HashMap::from([("btc_usdt".to_string(), checkpoint)]),
    }
}

// ─── Ring buffer under concurrency ──────────────────────────────────────────

#[test]
fn test_ring_fifo_across_threads() {
    let ring = Arc::new(Ring::in_memory(4096).unwrap_or_else(|_| panic!("ring")));
    let n = 5000u32;

    let producer_ring = Arc::clone(&ring);
    let producer = std::thread::spawn(move || {
        for i in 0..n {
            let key = format!("key-{i:08}");
            // Vary record sizes so wraps land at many different offsets.
            let value = vec![b'v'; 1 + (i as usize * 7) % 200];
            while !producer_ring.write(key.as_bytes(), &value) {
                std::hint::spin_loop();
            }
        }
    });

    let mut seen = 0u32;
    while seen < n {
        let Some((key, value)) = ring.read() else {
            std::hint::spin_loop();
            continue;
        };
        assert_eq!(key, format!("key-{seen:08}").into_bytes(), "FIFO order broken");
        assert_eq!(value.len(), 1 + (seen as usize * 7) % 200);
        assert!(value.iter().all(|b| *b == b'v'));
        seen += 1;
    }

    assert!(ring.read().is_none());
    assert!(producer.join().is_ok());
}

#[test]
fn test_ring_shared_memory_peer_views() {
    // Consumer creates the segments, producer attaches its own view; the
    // same protocol that spans processes, exercised in one.
    let (consumer, addr) = Ring::create(1024).unwrap_or_else(|_| panic!("create"));
    let producer = Ring::attach(&addr).unwrap_or_else(|_| panic!("attach"));

    let writer = std::thread::spawn(move || {
        for i in 0..100u32 {
            let key = i.to_be_bytes();
            while !producer.write(&key, b"window-bytes") {
                std::hint::spin_loop();
            }
        }
    });

    let mut seen = 0u32;
    while seen < 100 {
        let Some((key, value)) = consumer.read() else {
            std::hint::spin_loop();
            continue;
        };
        assert_eq!(key, seen.to_be_bytes().to_vec());
        assert_eq!(value, b"window-bytes".to_vec());
        seen += 1;
    }

    assert!(writer.join().is_ok());
    assert!(consumer.unlink().is_ok());
}

// ─── Worker backfill and restart ────────────────────────────────────────────

#[tokio::test]
async fn test_trade_backfill_emits_closed_and_open_windows() {
    let dir = tempfile::tempdir().unwrap_or_else(|_| panic!("tempdir"));
    let log_dir = dir.path().join("trade");
    {
        let mut log =
            SegmentLog::open(log_dir.join("btc_usdt")).unwrap_or_else(|_| panic!("log"));
        for t in [500i64, 700, 1200, 2200] {
            assert!(log.append(&trade_json(t)).is_ok());
        }
    }

    let ring = Ring::in_memory(1 << 16).unwrap_or_else(|_| panic!("ring"));
    let shutdown = ShutdownFlag::local();
    let opts = worker_options(&log_dir, None);

    let result =
        run_worker::<TradeHandler, ChannelFeed, _>(&ring, &shutdown, &opts, |_| None).await;
    assert!(result.is_ok(), "worker failed: {result:?}");

    let records = drain(&ring);
    assert_eq!(records.len(), 2);

    // Window [0, 1000): two trades, closed by the rotation at t=2200.
    let key = WindowKey::unpack(&records[0].0).unwrap_or_else(|_| panic!("key"));
    assert_eq!(key.window_end_ms, 0);
    assert_eq!(key.symbol, "btc_usdt");
    assert_eq!(key.kind, WindowKind::Trade);
    assert_eq!(key.window_size_ms, 1000);
    assert_eq!(key.platform, Platform::Binance);
    let (agg, _): (TradeWindowAggregate, usize) =
        bincode::serde::decode_from_slice(&records[0].1, bincode::config::standard())
            .unwrap_or_else(|_| panic!("decode"));
    assert_eq!(agg.trade_count, 2);
    assert_eq!(agg.first_ts, 500);
    assert_eq!(agg.last_ts, 700);

    // Window [1000, 2000): still open at the end of backfill, flushed.
    let key = WindowKey::unpack(&records[1].0).unwrap_or_else(|_| panic!("key"));
    assert_eq!(key.window_end_ms, 1000);
    let (agg, _): (TradeWindowAggregate, usize) =
        bincode::serde::decode_from_slice(&records[1].1, bincode::config::standard())
            .unwrap_or_else(|_| panic!("decode"));
    assert_eq!(agg.trade_count, 1);
    assert_eq!(agg.first_ts, 1200);
}

#[tokio::test]
async fn test_restart_does_not_reemit_below_checkpoint() {
    let dir = tempfile::tempdir().unwrap_or_else(|_| panic!("tempdir"));
    let log_dir = dir.path().join("order_book");
    {
        let mut log =
            SegmentLog::open(log_dir.join("btc_usdt")).unwrap_or_else(|_| panic!("log"));
        assert!(log.append(&book_json("snapshot", 100)).is_ok());
        for t in [400i64, 1200, 2200] {
            assert!(log.append(&book_json("update", t)).is_ok());
        }
    }

    // First run: backfill everything, persist the emitted windows.
    let windows_dir = dir.path().join("windows");
    let mut store = SegmentLog::open(&windows_dir).unwrap_or_else(|_| panic!("store"));
    let pairs = vec![(Platform::Binance, "btc_usdt".to_string())];

    let ring = Ring::in_memory(1 << 16).unwrap_or_else(|_| panic!("ring"));
    let shutdown = ShutdownFlag::local();
    let opts = worker_options(&log_dir, None);
    let result =
        run_worker::<BookHandler, ChannelFeed, _>(&ring, &shutdown, &opts, |_| None).await;
    assert!(result.is_ok(), "worker failed: {result:?}");

    let mut max_persisted_end = 0u64;
    for (key, value) in drain(&ring) {
        let decoded = WindowKey::unpack(&key).unwrap_or_else(|_| panic!("key"));
        max_persisted_end = max_persisted_end.max(decoded.window_end_ms);
        assert!(WindowStore::put(&mut store, &key, &value).is_ok());
    }
    // Boundary crossings at 1200 and 2200 plus the flush of [2000, 3000).
    assert_eq!(max_persisted_end, 3000);

    // Restart: discover checkpoints from the windows log and run again.
    let checkpoints =
        discover_checkpoints(&store, &pairs, &[1000]).unwrap_or_else(|_| panic!("discover"));
    let order_checkpoint = checkpoints
        .get(&checkpoint_key(Platform::Binance, "btc_usdt", WindowKind::Order, 1000))
        .copied()
        .flatten();
    assert_eq!(order_checkpoint, Some(3000));

    let ring = Ring::in_memory(1 << 16).unwrap_or_else(|_| panic!("ring"));
    let opts = worker_options(&log_dir, order_checkpoint);
    let result =
        run_worker::<BookHandler, ChannelFeed, _>(&ring, &shutdown, &opts, |_| None).await;
    assert!(result.is_ok(), "worker failed: {result:?}");

    for (key, _) in drain(&ring) {
        let decoded = WindowKey::unpack(&key).unwrap_or_else(|_| panic!("key"));
        assert!(
            decoded.window_end_ms > max_persisted_end,
            "window {} re-emitted at or below checkpoint {max_persisted_end}",
            decoded.window_end_ms
        );
    }
}

#[tokio::test]
async fn test_live_phase_consumes_feed_after_backfill() {
    let dir = tempfile::tempdir().unwrap_or_else(|_| panic!("tempdir"));
    let log_dir = dir.path().join("trade");
    // The log exists but holds nothing; everything arrives live.
    {
        let log = SegmentLog::open(log_dir.join("btc_usdt"));
        assert!(log.is_ok());
    }

    let (tx, feed) = ChannelFeed::new();
    for (id, time, price) in [(1, 500, "10"), (2, 700, "11"), (3, 1200, "12"), (4, 2200, "13")] {
        assert!(tx.send(live_trade_json(id, time, price)).is_ok());
    }
    drop(tx); // Feed closes once drained; the worker then exits.

    let ring = Ring::in_memory(1 << 16).unwrap_or_else(|_| panic!("ring"));
    let shutdown = ShutdownFlag::local();
    let opts = worker_options(&log_dir, None);

    let mut feed = Some(feed);
    let result =
        run_worker::<TradeHandler, ChannelFeed, _>(&ring, &shutdown, &opts, |_| feed.take())
            .await;
    assert!(result.is_ok(), "worker failed: {result:?}");

    // The rotation at t=2200 closed window [0, 1000).
    let records = drain(&ring);
    assert_eq!(records.len(), 1);
    let key = WindowKey::unpack(&records[0].0).unwrap_or_else(|_| panic!("key"));
    assert_eq!(key.window_end_ms, 0);
    let (agg, _): (TradeWindowAggregate, usize) =
        bincode::serde::decode_from_slice(&records[0].1, bincode::config::standard())
            .unwrap_or_else(|_| panic!("decode"));
    assert_eq!(agg.trade_count, 2);
    assert_eq!(agg.open, 10.0);
    assert_eq!(agg.close, 11.0);
}
