mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use nskv_client::{ClientError, ErrorKind, MutexOptions};

use common::{client_for, open_store};

fn quick() -> MutexOptions {
    MutexOptions {
        expiry: Duration::from_secs(5),
        tries: 3,
        retry_delay: Duration::from_millis(10),
        ..MutexOptions::default()
    }
}

#[test]
fn second_holder_is_refused_until_release() {
    let store = open_store();
    let client = client_for(&store);

    let mut first = client.new_mutex_with("jobs:nightly", quick()).unwrap();
    let mut second = client.new_mutex_with("jobs:nightly", quick()).unwrap();

    first.lock().expect("first lock");
    assert!(first.is_held());
    assert_eq!(
        store.keyspace().get(b"jobs:nightly"),
        Some(first.value().as_bytes().to_vec())
    );

    match second.lock() {
        Err(ClientError::LockFailed { name }) => assert_eq!(name, "jobs:nightly"),
        other => panic!("expected LockFailed, got {other:?}"),
    }
    assert!(!second.is_held());

    assert!(first.unlock().unwrap());
    assert!(!first.is_held());
    second.try_lock().expect("lock after release");
    assert!(second.unlock().unwrap());
}

#[test]
fn unlock_and_extend_require_ownership() {
    let store = open_store();
    let client = client_for(&store);

    let mut owner = client.new_mutex_with("report", quick()).unwrap();
    owner.lock().unwrap();

    // Someone else's token.
    store
        .keyspace()
        .set(b"report", b"intruder", Some(Duration::from_secs(5)))
        .unwrap();
    assert!(!owner.extend().unwrap());
    assert!(!owner.unlock().unwrap());
    assert_eq!(store.keyspace().get(b"report"), Some(b"intruder".to_vec()));
}

#[test]
fn extend_pushes_the_deadline() {
    let store = open_store();
    let client = client_for(&store);

    let mut mutex = client.new_mutex_with("lease", quick()).unwrap();
    mutex.lock().unwrap();
    let before = mutex.valid_until().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(mutex.extend().unwrap());
    assert!(mutex.valid_until().unwrap() > before);
}

#[test]
fn expired_lock_can_be_taken_over() {
    let store = open_store();
    let client = client_for(&store);
    let short = MutexOptions {
        expiry: Duration::from_millis(100),
        ..quick()
    };

    let mut first = client.new_mutex_with("cron", short).unwrap();
    first.lock().unwrap();
    thread::sleep(Duration::from_millis(150));
    assert!(!first.is_held());

    let mut second = client.new_mutex_with("cron", short).unwrap();
    second.try_lock().expect("lock after expiry");
    assert!(!first.unlock().unwrap());
    assert!(second.unlock().unwrap());
}

#[test]
fn lock_serializes_critical_sections() {
    let store = open_store();
    let client = client_for(&store);
    let inside = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let options = MutexOptions {
        tries: 200,
        retry_delay: Duration::from_millis(5),
        ..quick()
    };

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut mutex = client.new_mutex_with("counter", options).unwrap();
                for _ in 0..5 {
                    mutex.lock().expect("lock");
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    assert!(mutex.unlock().unwrap());
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });
    assert_eq!(completed.load(Ordering::SeqCst), 20);
}

#[test]
fn lock_against_unreachable_store_reports_transport() {
    let store = open_store();
    let mut client = client_for(&store);
    let mut mutex = client.new_mutex_with("gone", quick()).unwrap();
    client.close();

    let err = mutex.lock().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lock);
    assert!(matches!(err, ClientError::LockTransport(_)));
}

#[test]
fn late_acquisition_releases_its_own_key() {
    let store = open_store();
    let client = client_for(&store);
    // Drift eats the whole window: every acquisition arrives too late.
    let hopeless = MutexOptions {
        drift_factor: 1.0,
        ..quick()
    };

    let mut mutex = client.new_mutex_with("backup", hopeless).unwrap();
    assert!(matches!(mutex.try_lock(), Err(ClientError::LockFailed { .. })));
    assert!(!store.keyspace().exists(b"backup"));

    // Nothing left behind, so a normal mutex gets it straight away.
    let mut other = client.new_mutex_with("backup", quick()).unwrap();
    other.try_lock().expect("lock after late acquisition");
    assert!(other.unlock().unwrap());
}
