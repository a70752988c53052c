//! End-to-end key/value operations through DataBaseManager over LogStore.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ringio::{DataBaseManager, DataBaseManagerPool, DbStatus, LogStore, ManagerConfig};

fn open(name: &str) -> (tempfile::TempDir, Arc<LogStore>, DataBaseManager<LogStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LogStore::open(dir.path()).unwrap());
    let db = DataBaseManager::new(store.clone(), ManagerConfig::new().name(name).sq_entries(32))
        .unwrap();
    (dir, store, db)
}

#[test]
fn test_get_put_erase_scenario() {
    let (_dir, store, db) = open("scenario");
    let cf = store.create_family("default").unwrap();

    assert_eq!(db.get_blocking(&cf, "user:1"), (DbStatus::NotFound, None));
    assert_eq!(db.put_blocking(&cf, "user:1", "alice"), DbStatus::Ok);
    assert_eq!(db.get_blocking(&cf, "user:1"), (DbStatus::Ok, Some(b"alice".to_vec())));

    assert_eq!(db.put_blocking(&cf, "user:1", "alice v2"), DbStatus::Ok);
    assert_eq!(db.get_blocking(&cf, "user:1"), (DbStatus::Ok, Some(b"alice v2".to_vec())));

    assert_eq!(db.erase_blocking(&cf, "user:1"), DbStatus::Ok);
    assert_eq!(db.get_blocking(&cf, "user:1"), (DbStatus::NotFound, None));
    assert_eq!(db.erase_blocking(&cf, "never-there"), DbStatus::Ok);
}

#[test]
fn test_callback_api() {
    let (_dir, store, db) = open("callbacks");
    let cf = store.create_family("default").unwrap();
    let (tx, rx) = mpsc::channel();

    let t = tx.clone();
    db.put(&cf, "k", "v", move |st| t.send(format!("put {st}")).unwrap());
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "put ok");

    let t = tx.clone();
    db.get(&cf, "k", move |st, v| {
        t.send(format!("get {st} {}", String::from_utf8(v.unwrap()).unwrap())).unwrap()
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "get ok v");

    db.erase(&cf, "k", move |st| tx.send(format!("erase {st}")).unwrap());
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "erase ok");
}

#[test]
fn test_multi_get_preserves_key_order() {
    let (_dir, store, db) = open("multi");
    let cf = store.create_family("default").unwrap();
    db.put_blocking(&cf, "a", "1");
    db.put_blocking(&cf, "c", "3");

    let keys = vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()];
    let got = db.multi_get_blocking(&cf, keys);
    assert_eq!(
        got,
        vec![
            (DbStatus::Ok, Some(b"3".to_vec())),
            (DbStatus::NotFound, None),
            (DbStatus::Ok, Some(b"1".to_vec())),
        ]
    );
    assert!(db.multi_get_blocking(&cf, Vec::new()).is_empty());
}

#[test]
fn test_families_are_isolated() {
    let (_dir, store, db) = open("families");
    let users = store.create_family("users").unwrap();
    let orders = store.create_family("orders").unwrap();
    db.put_blocking(&users, "id", "u");
    assert_eq!(db.get_blocking(&orders, "id"), (DbStatus::NotFound, None));
    assert_eq!(db.get_blocking(&users, "id"), (DbStatus::Ok, Some(b"u".to_vec())));
}

#[test]
fn test_large_value() {
    let (_dir, store, db) = open("large");
    let cf = store.create_family("blobs").unwrap();
    let blob: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(db.put_blocking(&cf, "blob", blob.clone()), DbStatus::Ok);
    assert_eq!(db.get_blocking(&cf, "blob"), (DbStatus::Ok, Some(blob)));
}

#[test]
fn test_values_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(LogStore::open(dir.path()).unwrap());
        let cf = store.create_family("state").unwrap();
        let db = DataBaseManager::new(store, ManagerConfig::new().name("restart")).unwrap();
        for i in 0..50 {
            assert_eq!(db.put_blocking(&cf, format!("k{i}"), format!("v{i}")), DbStatus::Ok);
        }
        db.erase_blocking(&cf, "k7");
    }
    let store = Arc::new(LogStore::open(dir.path()).unwrap());
    let cf = store.family("state").unwrap();
    let db = DataBaseManager::new(store, ManagerConfig::new().name("restart")).unwrap();
    assert_eq!(db.get_blocking(&cf, "k49"), (DbStatus::Ok, Some(b"v49".to_vec())));
    assert_eq!(db.get_blocking(&cf, "k7"), (DbStatus::NotFound, None));
}

#[test]
fn test_close_with_operations_in_flight() {
    const N: usize = 500;
    let (_dir, store, db) = open("close");
    let cf = store.create_family("default").unwrap();
    let ok = Arc::new(AtomicUsize::new(0));

    for i in 0..N {
        let ok = ok.clone();
        db.put(&cf, format!("key-{i}"), vec![i as u8; 64], move |st| {
            if st == DbStatus::Ok {
                ok.fetch_add(1, Ordering::SeqCst);
            }
        });
    }
    drop(db);

    assert_eq!(ok.load(Ordering::SeqCst), N);
    assert_eq!(cf.len(), N);

    let db = DataBaseManager::new(store.clone(), ManagerConfig::new().name("close-check")).unwrap();
    let keys: Vec<Vec<u8>> = (0..N).map(|i| format!("key-{i}").into_bytes()).collect();
    let values = db.multi_get_blocking(&cf, keys);
    assert_eq!(values.len(), N);
    for (i, (status, value)) in values.into_iter().enumerate() {
        assert_eq!(status, DbStatus::Ok, "key-{i}");
        assert_eq!(value, Some(vec![i as u8; 64]), "key-{i}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_tasks() {
    let (_dir, store, db) = open("async");
    let db = Arc::new(db);
    let cf = store.create_family("default").unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let db = db.clone();
            let cf = cf.clone();
            tokio::spawn(async move {
                let key = format!("task-{i}");
                assert_eq!(db.put_async(&cf, key.clone(), format!("{i}")).await, DbStatus::Ok);
                db.get_async(&cf, key).await
            })
        })
        .collect();
    for (i, t) in tasks.into_iter().enumerate() {
        assert_eq!(t.await.unwrap(), (DbStatus::Ok, Some(i.to_string().into_bytes())));
    }

    let keys = vec![b"task-0".to_vec(), b"nope".to_vec()];
    let got = db.multi_get_async(&cf, keys).await;
    assert_eq!(got[0].0, DbStatus::Ok);
    assert_eq!(got[1].0, DbStatus::NotFound);
    assert_eq!(db.erase_async(&cf, "task-0").await, DbStatus::Ok);

    // Thread-blocking form from inside the runtime.
    assert_eq!(db.get_blocking(&cf, "task-0"), (DbStatus::NotFound, None));
}

#[test]
fn test_dropped_family_is_invalid_handle() {
    let (_dir, store, db) = open("dropped");
    let cf = store.create_family("tmp").unwrap();
    assert_eq!(db.put_blocking(&cf, "k", "v"), DbStatus::Ok);
    assert!(store.drop_family("tmp").unwrap());
    assert_eq!(db.get_blocking(&cf, "k"), (DbStatus::InvalidHandle, None));
    assert_eq!(db.put_blocking(&cf, "k", "v"), DbStatus::InvalidHandle);
}

#[test]
fn test_pool_spreads_operations() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LogStore::open(dir.path()).unwrap());
    let cf = store.create_family("default").unwrap();
    let pool =
        DataBaseManagerPool::new(2, store, ManagerConfig::new().name("dbpool").sq_entries(16))
            .unwrap();

    for i in 0..10 {
        assert_eq!(pool.put_blocking(&cf, format!("k{i}"), "v"), DbStatus::Ok);
    }
    for member in pool.members() {
        assert_eq!(member.submitted(), 5);
    }
    assert_eq!(pool.get_blocking(&cf, "k3"), (DbStatus::Ok, Some(b"v".to_vec())));
}
