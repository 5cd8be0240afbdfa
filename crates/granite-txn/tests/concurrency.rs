//! Concurrency tests: multi-transaction interleavings over the lock
//! manager and the transaction manager.

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use granite_common::error::GraniteError;
use granite_common::types::{SessionId, TableName, TxnId};
use granite_txn::{
    AccessMode, EndType, LockManager, LockMode, LockResult, ResourceId, TransactionManager,
    TransactionManagerConfig,
};

fn txn(id: u64) -> TxnId {
    TxnId::new(id)
}

fn session(id: u64) -> SessionId {
    SessionId::new(id)
}

/// Spins until `count` requests are parked on the lock manager.
fn wait_for_blocked(locks: &LockManager, count: usize) {
    for _ in 0..400 {
        if locks.waiting_count() >= count {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("waiters never blocked");
}

#[test]
fn shared_readers_never_block_each_other() {
    let tm = TransactionManager::new();
    let table = TableName::from("t");

    let t1 = tm.begin(session(1));
    let t2 = tm.begin(session(2));

    tm.access_table(t1, &table, AccessMode::Read).unwrap();
    tm.access_table(t2, &table, AccessMode::Read).unwrap();

    let locks = tm.lock_manager();
    assert!(locks.holds(t1, &ResourceId::Table(table.clone())));
    assert!(locks.holds(t2, &ResourceId::Table(table)));
    assert_eq!(locks.waiting_count(), 0);

    tm.end(t1, EndType::Commit).unwrap();
    tm.end(t2, EndType::Commit).unwrap();
}

/// The end-to-end scenario: a writer of "T" blocks a reader of "T" until
/// it ends, after which the reader proceeds and the lock table drains.
#[test]
fn writer_excludes_reader_until_end() {
    let tm = Arc::new(TransactionManager::new());
    let table = TableName::from("T");

    let t1 = tm.begin(session(1));
    let t2 = tm.begin(session(2));

    tm.access_table(t1, &table, AccessMode::Write).unwrap();

    let (tx, rx) = mpsc::channel();
    let reader = {
        let tm = Arc::clone(&tm);
        let table = table.clone();
        thread::spawn(move || {
            let result = tm.access_table(t2, &table, AccessMode::Read);
            tx.send(()).unwrap();
            result
        })
    };

    wait_for_blocked(tm.lock_manager(), 1);
    // The reader is parked, not done.
    assert!(rx.try_recv().is_err());
    // And it is waiting on the table, not on the database-wide resource.
    assert!(!tm.lock_manager().holds(t2, &ResourceId::Database));

    tm.end(t1, EndType::Commit).unwrap();

    reader.join().unwrap().unwrap();
    rx.recv_timeout(Duration::from_secs(1)).ok();
    assert!(tm
        .lock_manager()
        .holds(t2, &ResourceId::Table(table.clone())));

    tm.end(t2, EndType::Commit).unwrap();
    assert_eq!(tm.lock_manager().lock_count(), 0);
    assert_eq!(tm.lock_manager().held_locks(t1).len(), 0);
    assert_eq!(tm.lock_manager().held_locks(t2).len(), 0);
}

#[test]
fn fifo_order_among_queued_writers() {
    let locks = Arc::new(LockManager::new());
    let resource = ResourceId::table("r");
    let order = Arc::new(Mutex::new(Vec::new()));

    assert_eq!(
        locks.try_lock(txn(10), resource.clone(), LockMode::Exclusive),
        LockResult::Granted
    );

    let spawn_waiter = |id: u64| {
        let locks = Arc::clone(&locks);
        let resource = resource.clone();
        let order = Arc::clone(&order);
        thread::spawn(move || {
            let result = locks.lock(
                txn(id),
                resource.clone(),
                LockMode::Exclusive,
                Some(Duration::from_secs(5)),
            );
            assert_eq!(result, LockResult::Granted);
            order.lock().unwrap().push(id);
            thread::sleep(Duration::from_millis(50));
            locks.release_all(txn(id));
        })
    };

    // T1 queues first, then T2.
    let w1 = spawn_waiter(1);
    wait_for_blocked(&locks, 1);
    let w2 = spawn_waiter(2);
    wait_for_blocked(&locks, 2);

    locks.unlock(txn(10), &resource);

    w1.join().unwrap();
    w2.join().unwrap();
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    assert_eq!(locks.lock_count(), 0);
}

#[test]
fn crossed_writers_produce_exactly_one_victim() {
    let locks = Arc::new(LockManager::new());
    let barrier = Arc::new(Barrier::new(2));

    let spawn_writer = |id: u64, first: ResourceId, second: ResourceId| {
        let locks = Arc::clone(&locks);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            assert_eq!(
                locks.try_lock(txn(id), first, LockMode::Exclusive),
                LockResult::Granted
            );
            barrier.wait();
            let result = locks.lock(
                txn(id),
                second,
                LockMode::Exclusive,
                Some(Duration::from_secs(5)),
            );
            if result == LockResult::Deadlock {
                // Victim: roll back so the survivor can proceed.
                locks.release_all(txn(id));
            } else {
                assert_eq!(result, LockResult::Granted);
                locks.release_all(txn(id));
            }
            result
        })
    };

    let a = ResourceId::table("a");
    let b = ResourceId::table("b");
    let w1 = spawn_writer(1, a.clone(), b.clone());
    let w2 = spawn_writer(2, b, a);

    let r1 = w1.join().unwrap();
    let r2 = w2.join().unwrap();

    let victims = [r1, r2]
        .iter()
        .filter(|r| **r == LockResult::Deadlock)
        .count();
    assert_eq!(victims, 1, "exactly one of the writers must be aborted");
    assert!(
        [r1, r2].contains(&LockResult::Granted),
        "the survivor completes"
    );

    assert_eq!(locks.lock_count(), 0);
    assert_eq!(locks.stats().deadlocks.load(AtomicOrdering::Relaxed), 1);
}

/// A reader that turns writer while another writer waits on its table
/// deadlocks through the hierarchy; the latest requester is the victim.
#[test]
fn reader_turned_writer_is_deadlock_victim() {
    let tm = Arc::new(TransactionManager::with_config(TransactionManagerConfig {
        lock_timeout: Duration::from_secs(2),
        deadlock_detection: true,
    }));
    let table_a = TableName::from("a");
    let table_b = TableName::from("b");

    let t1 = tm.begin(session(1));
    let t2 = tm.begin(session(2));

    tm.access_table(t1, &table_a, AccessMode::Read).unwrap();
    tm.access_table(t2, &table_b, AccessMode::Write).unwrap();

    // T2 wants table a too, but T1 holds it shared.
    let writer = {
        let tm = Arc::clone(&tm);
        let table_a = table_a.clone();
        thread::spawn(move || tm.access_table(t2, &table_a, AccessMode::Write))
    };
    wait_for_blocked(tm.lock_manager(), 1);

    // T1 now wants to write b: it needs the database lock T2 holds,
    // closing the cycle. T1 issued the most recent request, so T1 is
    // the victim.
    let err = tm
        .access_table(t1, &table_b, AccessMode::Write)
        .unwrap_err();
    assert!(matches!(err, GraniteError::Deadlock { .. }));
    assert!(!err.is_retryable());
    assert_eq!(tm.stats().deadlocks.load(AtomicOrdering::Relaxed), 1);

    // The victim rolls back; the blocked writer proceeds.
    tm.end(t1, EndType::Rollback).unwrap();
    writer.join().unwrap().unwrap();

    tm.end(t2, EndType::Commit).unwrap();
    assert_eq!(tm.lock_manager().lock_count(), 0);
}

#[test]
fn timed_out_waiter_leaves_queue_usable() {
    let locks = Arc::new(LockManager::new());
    let resource = ResourceId::table("r");

    assert_eq!(
        locks.try_lock(txn(1), resource.clone(), LockMode::Exclusive),
        LockResult::Granted
    );

    // T2 gives up quickly.
    let result = locks.lock(
        txn(2),
        resource.clone(),
        LockMode::Shared,
        Some(Duration::from_millis(100)),
    );
    assert_eq!(result, LockResult::Timeout);
    assert_eq!(locks.waiting_count(), 0);

    // T3 queues after the cancellation and is granted on release.
    let waiter = {
        let locks = Arc::clone(&locks);
        let resource = resource.clone();
        thread::spawn(move || {
            locks.lock(
                txn(3),
                resource,
                LockMode::Shared,
                Some(Duration::from_secs(5)),
            )
        })
    };
    wait_for_blocked(&locks, 1);

    locks.unlock(txn(1), &resource);
    assert_eq!(waiter.join().unwrap(), LockResult::Granted);
    assert!(locks.holds(txn(3), &resource));
}

#[test]
fn writers_do_not_disturb_unrelated_readers() {
    let tm = TransactionManager::new();
    let table_t = TableName::from("t");
    let table_u = TableName::from("u");

    let writer = tm.begin(session(1));
    let reader1 = tm.begin(session(2));
    let reader2 = tm.begin(session(3));

    tm.access_table(writer, &table_t, AccessMode::Write).unwrap();

    // Readers of an unrelated table proceed immediately, without ever
    // touching the database-wide resource.
    tm.access_table(reader1, &table_u, AccessMode::Read).unwrap();
    tm.access_table(reader2, &table_u, AccessMode::Read).unwrap();
    assert!(!tm.lock_manager().holds(reader1, &ResourceId::Database));
    assert!(!tm.lock_manager().holds(reader2, &ResourceId::Database));
    assert_eq!(tm.lock_manager().waiting_count(), 0);

    tm.end(writer, EndType::Commit).unwrap();
    tm.end(reader1, EndType::Commit).unwrap();
    tm.end(reader2, EndType::Commit).unwrap();
    assert_eq!(tm.lock_manager().lock_count(), 0);
}
