use crate::domain::RcuDomain;
use crate::error::{RcuError, Result};
use crate::state::{ReaderSlot, SharedState};
use crate::sync::{Arc, Ordering, fence};
use std::cell::Cell;
use std::marker::PhantomData;

/// A registered reader of an [`RcuDomain`].
///
/// Each reader thread obtains its own handle through
/// [`RcuDomain::register_reader`] and brackets every access to shared data
/// with [`enter_reader`](ReaderHandle::enter_reader) /
/// [`exit_reader`](ReaderHandle::exit_reader), or with the RAII form
/// [`read_lock`](ReaderHandle::read_lock).
///
/// The handle is `Send` but not `Sync`: it may move to another thread
/// between read sections, but it is never used by two threads at once.
/// Dropping the handle leaves any open read section and removes the reader
/// from the domain's registry.
///
/// [`RcuDomain`] 的一个已注册读者。
/// 每个读者线程通过 `register_reader` 获取自己的句柄，并用 `enter_reader` / `exit_reader`
/// 或 RAII 形式的 `read_lock` 包围对共享数据的每次访问。
/// 句柄是 `Send` 但不是 `Sync`：可以在读临界区之间移动到其他线程，但绝不会被两个线程同时使用。
/// drop 句柄会离开任何未结束的读临界区并将读者从注册表中移除。
pub struct ReaderHandle {
    slot: Arc<ReaderSlot>,
    shared: Arc<SharedState>,
    _not_sync: PhantomData<Cell<()>>,
}

impl ReaderHandle {
    pub(crate) fn register(shared: Arc<SharedState>) -> Result<Self> {
        let mut readers = shared.readers.lock();

        if readers.len() >= shared.max_readers {
            let capacity = shared.max_readers;
            drop(readers);
            tracing::warn!(target: "rcu_domain", capacity, "reader registry full");
            return Err(RcuError::ReaderCapacityExhausted { capacity });
        }

        let id = shared.next_reader_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ReaderSlot::new(id));
        readers.push(Arc::clone(&slot));
        drop(readers);

        Ok(ReaderHandle {
            slot,
            shared,
            _not_sync: PhantomData,
        })
    }

    /// Enter a read-side critical section.
    ///
    /// Marks the reader active and snapshots the current global epoch. Any
    /// pointer loaded from an [`RcuPtr`](crate::RcuPtr) of this domain after
    /// this call stays valid until the matching
    /// [`exit_reader`](ReaderHandle::exit_reader).
    ///
    /// Calls do not nest: entering again before exiting only refreshes the
    /// epoch snapshot, and a single `exit_reader` ends the section. Objects
    /// loaded before the refresh are then no longer protected.
    ///
    /// 进入读临界区。将读者标记为活跃并快照当前全局纪元。
    /// 调用不嵌套：未退出前再次进入只会刷新纪元快照，一次 `exit_reader` 即结束临界区。
    #[inline]
    pub fn enter_reader(&self) {
        self.slot.active.store(true, Ordering::Relaxed);
        // Orders the activation before the epoch read and every later load of
        // shared data, against the writer's fence before it scans readers.
        fence(Ordering::SeqCst);
        let epoch = self.shared.global_epoch.load(Ordering::Acquire);
        self.slot.epoch.store(epoch, Ordering::Release);
    }

    /// Leave the read-side critical section. Calling it while already outside
    /// a section has no effect.
    /// 离开读临界区。在临界区外调用没有效果。
    #[inline]
    pub fn exit_reader(&self) {
        self.slot.active.store(false, Ordering::Release);
    }

    /// Enter a read section that ends when the returned guard is dropped.
    ///
    /// The guard borrows the handle exclusively, so guards cannot nest and
    /// references obtained through [`RcuPtr::load_ref`](crate::RcuPtr::load_ref)
    /// cannot outlive the section.
    ///
    /// 进入一个在返回的守卫被 drop 时结束的读临界区。
    /// 守卫独占借用句柄，因此守卫不能嵌套，通过 `load_ref` 获得的引用也不会超出临界区。
    ///
    /// # Example
    /// ```
    /// use rcu_domain::{RcuDomain, RcuPtr};
    ///
    /// let domain = RcuDomain::new();
    /// let mut reader = domain.register_reader().unwrap();
    /// let shared = RcuPtr::new(&domain, 7u32);
    ///
    /// let guard = reader.read_lock();
    /// assert_eq!(shared.load_ref(&guard), Some(&7));
    /// ```
    #[inline]
    pub fn read_lock(&mut self) -> ReadGuard<'_> {
        self.enter_reader();
        ReadGuard {
            reader: &*self,
        }
    }

    /// Whether this reader is currently inside a read section.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.slot.active.load(Ordering::Acquire)
    }

    /// Epoch observed by the most recent `enter_reader`.
    #[inline]
    pub fn snapshot_epoch(&self) -> usize {
        self.slot.epoch.load(Ordering::Acquire)
    }

    /// The domain this reader is registered with.
    pub fn domain(&self) -> RcuDomain {
        RcuDomain::from_shared(Arc::clone(&self.shared))
    }

    #[inline]
    pub(crate) fn shared(&self) -> &SharedState {
        &self.shared
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.exit_reader();
        let id = self.slot.id;
        self.shared.readers.lock().retain(|slot| slot.id != id);
    }
}

impl std::fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderHandle")
            .field("id", &self.slot.id)
            .field("active", &self.is_active())
            .field("epoch", &self.snapshot_epoch())
            .finish()
    }
}

/// Proof that the current thread is inside a read section.
///
/// Obtained from [`ReaderHandle::read_lock`]; dropping it leaves the section.
/// It is neither `Send` nor `Sync`.
///
/// 当前线程处于读临界区内的证明。由 `read_lock` 获得；drop 它即离开临界区。
#[must_use]
pub struct ReadGuard<'a> {
    reader: &'a ReaderHandle,
}

impl ReadGuard<'_> {
    /// Epoch snapshot taken when the section was entered.
    #[inline]
    pub fn epoch(&self) -> usize {
        self.reader.snapshot_epoch()
    }

    #[inline]
    pub(crate) fn shared(&self) -> &SharedState {
        self.reader.shared()
    }
}

impl Drop for ReadGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.reader.exit_reader();
    }
}
