/// Edge cases: reclamation thresholds, registry capacity, bounded waits and
/// unusual payloads.
use super::{DropCounter, counter};
use crate::{MAX_READERS, RcuDomain, RcuError, RcuPtr, WaitPolicy};
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Test 1: exactly reaching the threshold does not reclaim
#[test]
fn test_threshold_not_exceeded() {
    let domain = RcuDomain::new();
    let drops = counter();

    for i in 0..16 {
        domain.retire_box(Box::new(DropCounter::new(&drops, i)));
    }

    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(domain.pending_retirements(), 16);
    assert_eq!(domain.epoch(), 0);
}

/// Test 2: the 17th retire reclaims everything retired before it
#[test]
fn test_threshold_triggered_reclamation() {
    let domain = RcuDomain::new();
    let drops = counter();

    for i in 0..17 {
        domain.retire_box(Box::new(DropCounter::new(&drops, i)));
    }

    // With no readers, the grace period is immediate and every entry
    // retired before the epoch advance is reclaimed.
    assert_eq!(drops.load(Ordering::SeqCst), 17);
    assert_eq!(domain.pending_retirements(), 0);
    assert_eq!(domain.epoch(), 1);
    assert_eq!(domain.last_synchronized_epoch(), 1);
}

/// Test 3: pending retirements stay bounded under a steady stream
#[test]
fn test_pending_stays_bounded() {
    let domain = RcuDomain::new();
    let drops = counter();

    for i in 0..10_000 {
        domain.retire_box(Box::new(DropCounter::new(&drops, i)));
        assert!(domain.pending_retirements() <= 16);
    }

    domain.barrier();
    assert_eq!(drops.load(Ordering::SeqCst), 10_000);
}

/// Test 4: disabling the threshold keeps everything until barrier
#[test]
fn test_threshold_disabled() {
    let domain = RcuDomain::builder().auto_reclaim_threshold(None).build();
    let drops = counter();

    for i in 0..100 {
        domain.retire_box(Box::new(DropCounter::new(&drops, i)));
    }
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(domain.pending_retirements(), 100);
    assert_eq!(domain.epoch(), 0);

    assert_eq!(domain.barrier(), 100);
    assert_eq!(drops.load(Ordering::SeqCst), 100);
}

/// Test 5: a custom threshold
#[test]
fn test_custom_threshold() {
    let domain = RcuDomain::builder().auto_reclaim_threshold(4).build();
    let drops = counter();

    for i in 0..4 {
        domain.retire_box(Box::new(DropCounter::new(&drops, i)));
    }
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    domain.retire_box(Box::new(DropCounter::new(&drops, 4)));
    assert_eq!(drops.load(Ordering::SeqCst), 5);
}

/// Test 6: the registry rejects readers beyond capacity and frees slots on drop
#[test]
fn test_reader_capacity() {
    let domain = RcuDomain::builder().max_readers(2).build();

    let first = domain.register_reader().unwrap();
    let _second = domain.register_reader().unwrap();
    assert_eq!(
        domain.register_reader().unwrap_err(),
        RcuError::ReaderCapacityExhausted { capacity: 2 }
    );
    assert_eq!(domain.reader_count(), 2);

    drop(first);
    assert_eq!(domain.reader_count(), 1);
    assert!(domain.register_reader().is_ok());
}

/// Test 7: default capacity is MAX_READERS
#[test]
fn test_default_capacity() {
    let domain = RcuDomain::new();
    let readers: Vec<_> = (0..MAX_READERS)
        .map(|_| domain.register_reader().unwrap())
        .collect();

    assert!(matches!(
        domain.register_reader(),
        Err(RcuError::ReaderCapacityExhausted { capacity: MAX_READERS })
    ));
    drop(readers);
    assert_eq!(domain.reader_count(), 0);
}

/// Test 8: zero capacity rejects every reader
#[test]
fn test_zero_capacity() {
    let domain = RcuDomain::builder().max_readers(0).build();
    assert!(domain.register_reader().is_err());
}

/// Test 9: try_synchronize times out while a reader stays inside its section
#[test]
fn test_try_synchronize_timeout() {
    let domain = RcuDomain::new();
    let reader = domain.register_reader().unwrap();
    reader.enter_reader();

    match domain.try_synchronize(Duration::from_millis(20)) {
        Err(RcuError::GracePeriodTimeout {
            target_epoch,
            waited,
        }) => {
            assert_eq!(target_epoch, 1);
            assert!(waited >= Duration::from_millis(20));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // The epoch moved but no grace period was recorded.
    assert_eq!(domain.epoch(), 1);
    assert_eq!(domain.last_synchronized_epoch(), 0);

    reader.exit_reader();
    assert_eq!(domain.try_synchronize(Duration::from_millis(20)), Ok(2));
    assert_eq!(domain.last_synchronized_epoch(), 2);
}

/// Test 10: a timed-out barrier reclaims nothing
#[test]
fn test_try_barrier_timeout_keeps_entries() {
    let domain = RcuDomain::new();
    let drops = counter();
    let reader = domain.register_reader().unwrap();

    domain.retire_box(Box::new(DropCounter::new(&drops, 0)));
    reader.enter_reader();

    assert!(domain.try_barrier(Duration::from_millis(10)).is_err());
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(domain.pending_retirements(), 1);

    reader.exit_reader();
    assert_eq!(domain.try_barrier(Duration::from_millis(10)), Ok(1));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// Test 11: the error messages name the failure
#[test]
fn test_error_display() {
    let full = RcuError::ReaderCapacityExhausted { capacity: 8 };
    assert_eq!(full.to_string(), "reader registry is full (8 readers registered)");

    let timeout = RcuError::GracePeriodTimeout {
        target_epoch: 3,
        waited: Duration::from_millis(5),
    };
    assert!(timeout.to_string().contains("epoch 3"));
}

/// Test 12: the pure spin policy still waits for and then passes a reader
#[test]
fn test_spin_wait_policy() {
    let domain = RcuDomain::builder().wait_policy(WaitPolicy::Spin).build();
    let (entered_tx, entered_rx) = mpsc::channel();

    let reader_domain = domain.clone();
    let reader = thread::spawn(move || {
        let handle = reader_domain.register_reader().unwrap();
        handle.enter_reader();
        entered_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.exit_reader();
    });

    entered_rx.recv().unwrap();
    assert_eq!(domain.synchronize(), 1);
    reader.join().unwrap();
}

/// Test 13: yielding after a single spin
#[test]
fn test_spin_then_yield_policy() {
    let domain = RcuDomain::builder()
        .wait_policy(WaitPolicy::SpinThenYield { spin_limit: 1 })
        .build();
    let reader = domain.register_reader().unwrap();

    reader.enter_reader();
    assert!(domain.try_synchronize(Duration::from_millis(5)).is_err());
    reader.exit_reader();
    assert_eq!(domain.synchronize(), 2);
}

/// Test 14: zero-sized values are retired and dropped like any other
#[test]
fn test_zero_sized_type() {
    #[derive(Debug, PartialEq)]
    struct ZeroSized;

    let domain = RcuDomain::new();
    let ptr = RcuPtr::new(&domain, ZeroSized);
    let mut reader = domain.register_reader().unwrap();

    ptr.store(Some(Box::new(ZeroSized)));
    {
        let guard = reader.read_lock();
        assert_eq!(ptr.load_ref(&guard), Some(&ZeroSized));
    }
    assert_eq!(domain.barrier(), 1);
}

/// Test 15: a deleter that retires again queues the new entry for a later grace period
#[test]
fn test_reentrant_retire_from_deleter() {
    let domain = RcuDomain::new();
    let drops = counter();

    let inner_domain = domain.clone();
    let inner_drops = drops.clone();
    domain.call(move || {
        inner_domain.retire_box(Box::new(DropCounter::new(&inner_drops, 1)));
    });

    assert_eq!(domain.barrier(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(domain.pending_retirements(), 1);

    assert_eq!(domain.barrier(), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

/// Test 16: large payloads
#[test]
fn test_large_payload() {
    let domain = RcuDomain::new();
    let ptr = RcuPtr::new(&domain, vec![0u8; 1 << 20]);
    let mut reader = domain.register_reader().unwrap();

    ptr.store(Some(Box::new(vec![1u8; 1 << 20])));
    {
        let guard = reader.read_lock();
        let data = ptr.load_ref(&guard).unwrap();
        assert_eq!(data.len(), 1 << 20);
        assert!(data.iter().all(|&b| b == 1));
    }
    assert_eq!(domain.barrier(), 1);
}
