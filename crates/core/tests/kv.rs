use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use vectorkv_core::kv::wal::{Wal, WalOptions};
use vectorkv_core::kv::{BatchOptions, Db, IndexType, Options};
use vectorkv_core::Error;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn options(dir: &Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        ..Options::default()
    }
}

fn small_options(dir: &Path) -> Options {
    Options {
        dir_path: dir.to_path_buf(),
        memtable_size: 4 * 1024,
        memtable_nums: 4,
        value_log_file_size: 64 * 1024,
        compact_batch_count: 16,
        wait_memtable_space_timeout: Duration::from_secs(10),
        ..Options::default()
    }
}

fn dir_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

// ── WAL durability ──

#[test]
fn wal_records_survive_reopen_in_order() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let wal_options = WalOptions {
        dir_path: dir.path().to_path_buf(),
        segment_size: 256 * 1024,
        ..WalOptions::default()
    };

    let mut written = Vec::new();
    {
        let wal = Wal::open(wal_options.clone()).unwrap();
        for i in 0..2000u32 {
            // Mix tiny records with ones spanning several blocks.
            let len = if i % 100 == 0 { 70_000 } else { (i % 300) as usize + 1 };
            let data = vec![(i % 251) as u8; len];
            wal.write(&data).unwrap();
            written.push(data);
        }
        wal.sync().unwrap();
        wal.close().unwrap();
    }

    let wal = Wal::open(wal_options).unwrap();
    let read: Vec<Vec<u8>> = wal
        .reader()
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    assert_eq!(read.len(), written.len());
    assert!(read == written);
    assert!(wal.active_segment_id() > 1);
}

// ── Read order ──

#[test]
fn latest_write_wins_within_one_memtable() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Db::open(options(dir.path())).unwrap();
    db.put(b"k", b"1").unwrap();
    db.delete(b"k").unwrap();
    db.put(b"k", b"3").unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"3");
}

#[test]
fn latest_write_wins_across_flushes() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Db::open(options(dir.path())).unwrap();
    db.put(b"k", b"1").unwrap();
    db.flush().unwrap();
    db.delete(b"k").unwrap();
    db.flush().unwrap();
    assert!(matches!(db.get(b"k"), Err(Error::KeyNotFound)));
    db.put(b"k", b"3").unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"3");
    db.flush().unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"3");
    db.close().unwrap();

    let db = Db::open(options(dir.path())).unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"3");
}

#[test]
fn latest_write_wins_within_one_batch() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Db::open(options(dir.path())).unwrap();
    let mut batch = db.new_batch(BatchOptions::default());
    batch.put(b"k", b"1").unwrap();
    batch.delete(b"k").unwrap();
    batch.put(b"k", b"3").unwrap();
    batch.commit().unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"3");
}

#[test]
fn scenario_same_batch_overwrite() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Db::open(options(dir.path())).unwrap();
    let mut batch = db.new_batch(BatchOptions::default());
    batch.put(b"a", b"1").unwrap();
    batch.put(b"a", b"2").unwrap();
    batch.commit().unwrap();
    assert_eq!(db.get(b"a").unwrap(), b"2");
}

#[test]
fn scenario_delete_in_later_batch() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Db::open(options(dir.path())).unwrap();
    let mut first = db.new_batch(BatchOptions::default());
    first.put(b"a", b"1").unwrap();
    first.commit().unwrap();
    let mut second = db.new_batch(BatchOptions::default());
    second.delete(b"a").unwrap();
    second.commit().unwrap();
    assert!(matches!(db.get(b"a"), Err(Error::KeyNotFound)));
}

// ── Compaction ──

fn compaction_keeps_reads(index_type: IndexType) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Db::open(Options {
        index_type,
        ..small_options(dir.path())
    })
    .unwrap();

    for round in 0..5u32 {
        for i in 0..200u32 {
            let key = format!("key-{i:04}");
            db.put(key.as_bytes(), format!("v{round}-{i}").as_bytes())
                .unwrap();
        }
    }
    for i in (0..200u32).step_by(7) {
        db.delete(format!("key-{i:04}").as_bytes()).unwrap();
    }
    db.flush().unwrap();

    let snapshot: Vec<Option<Vec<u8>>> = (0..200u32)
        .map(|i| db.get(format!("key-{i:04}").as_bytes()).ok())
        .collect();
    let before = dir_size(&dir.path().join("vlog"));

    db.compact().unwrap();

    let after: Vec<Option<Vec<u8>>> = (0..200u32)
        .map(|i| db.get(format!("key-{i:04}").as_bytes()).ok())
        .collect();
    assert_eq!(snapshot, after);
    assert!(dir_size(&dir.path().join("vlog")) < before);
    assert_eq!(after[1].as_deref(), Some(b"v4-1".as_slice()));
    assert_eq!(after[0], None);
    db.close().unwrap();

    let db = Db::open(Options {
        index_type,
        ..small_options(dir.path())
    })
    .unwrap();
    let reopened: Vec<Option<Vec<u8>>> = (0..200u32)
        .map(|i| db.get(format!("key-{i:04}").as_bytes()).ok())
        .collect();
    assert_eq!(snapshot, reopened);
}

#[test]
fn compaction_keeps_reads_btree() {
    compaction_keeps_reads(IndexType::BTree);
}

#[test]
fn compaction_keeps_reads_hash() {
    compaction_keeps_reads(IndexType::Hash);
}

// ── Batch atomicity ──

#[test]
fn readers_never_see_half_applied_batches() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Db::open(options(dir.path())).unwrap());
    db.put(b"a", b"0").unwrap();
    db.put(b"b", b"0").unwrap();
    db.put(b"c", b"0").unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for i in 1..=1000u32 {
                let value = i.to_string();
                let mut batch = db.new_batch(BatchOptions::default());
                batch.put(b"a", value.as_bytes()).unwrap();
                batch.put(b"b", value.as_bytes()).unwrap();
                if i % 2 == 1 {
                    batch.delete(b"c").unwrap();
                } else {
                    batch.put(b"c", value.as_bytes()).unwrap();
                }
                batch.commit().unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut observations = 0;
    while !done.load(Ordering::SeqCst) || observations == 0 {
        let batch = db.new_batch(BatchOptions {
            read_only: true,
            ..BatchOptions::default()
        });
        let a = batch.get(b"a").unwrap();
        let b = batch.get(b"b").unwrap();
        let c = batch.get(b"c");
        drop(batch);
        thread::yield_now();

        assert_eq!(a, b);
        let n: u32 = String::from_utf8(a.clone()).unwrap().parse().unwrap();
        if n % 2 == 1 {
            assert!(matches!(c, Err(Error::KeyNotFound)), "c present at {n}");
        } else {
            assert_eq!(c.unwrap(), a);
        }
        observations += 1;
    }
    writer.join().unwrap();
    assert_eq!(db.get(b"a").unwrap(), b"1000");
}
