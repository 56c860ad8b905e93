use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rstest::rstest;
use tempfile::TempDir;
use texsync_core::OwnerToken;
use texsync_sync::lock::{FileLeaseStore, LeaseStore, MemoryLeaseStore};
use texsync_sync::{DistributedLock, LocalFileGuard, SyncError};

#[test]
fn concurrent_guarded_writes_both_land_whole() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("paper.tex");
    let guard = Arc::new(LocalFileGuard::new(200, Duration::from_millis(5)));
    let barrier = Arc::new(Barrier::new(2));
    let a = "a".repeat(64 * 1024);
    let b = "b".repeat(64 * 1024);

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|content| {
            let guard = guard.clone();
            let barrier = barrier.clone();
            let path = path.clone();
            thread::spawn(move || {
                barrier.wait();
                guard.write(&path, &content).expect("guarded write")
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }

    let final_content = fs::read_to_string(&path).expect("read");
    assert!(final_content == a || final_content == b);
    assert!(!LocalFileGuard::lock_path(&path).exists());
}

#[test]
fn guarded_read_waits_out_a_held_lock() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("paper.tex");
    fs::write(&path, "x").expect("seed");
    let lock_file = fs::File::create(LocalFileGuard::lock_path(&path)).expect("lock file");
    fs2::FileExt::lock_exclusive(&lock_file).expect("hold");

    let guard = LocalFileGuard::new(2, Duration::from_millis(5));
    let err = guard.read(&path).expect_err("held lock");
    assert!(matches!(err, SyncError::LockTimeout { attempts: 2, .. }), "{err}");
}

fn stores(tmp: &TempDir) -> (Arc<dyn LeaseStore>, Arc<dyn LeaseStore>) {
    let dir = tmp.path().join("leases");
    (
        Arc::new(FileLeaseStore::new(&dir).expect("store a")),
        Arc::new(FileLeaseStore::new(&dir).expect("store b")),
    )
}

#[rstest]
#[case::file(true)]
#[case::memory(false)]
fn at_most_one_holder_under_contention(#[case] file_backed: bool) {
    let tmp = TempDir::new().expect("tmp");
    let memory: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
    let (a, b) = if file_backed {
        stores(&tmp)
    } else {
        (memory.clone(), memory)
    };

    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = if i % 2 == 0 { a.clone() } else { b.clone() };
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            thread::spawn(move || {
                let lock = DistributedLock::new(
                    store,
                    Duration::from_secs(10),
                    500,
                    Duration::from_millis(2),
                );
                let owner = OwnerToken::generate();
                for _ in 0..5 {
                    let lease = lock.lock("repo-key", &owner).expect("lease");
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    assert!(lease.release().expect("release"));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn expired_lease_cannot_delete_successor() {
    let store: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());
    let first = OwnerToken::generate();
    let second = OwnerToken::generate();

    assert!(store
        .set_if_absent("k", &first, Duration::from_millis(20))
        .unwrap());
    thread::sleep(Duration::from_millis(40));
    assert!(store.set_if_absent("k", &second, Duration::from_secs(5)).unwrap());

    assert!(!store.compare_and_delete("k", &first).unwrap());
    assert_eq!(store.holder("k").unwrap(), Some(second));
}
