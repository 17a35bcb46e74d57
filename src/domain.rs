use crate::error::{RcuError, Result};
use crate::reader::ReaderHandle;
use crate::retire::RetireEntry;
use crate::state::{
    AUTO_RECLAIM_THRESHOLD, Backoff, MAX_READERS, ReaderSlot, SharedState, WaitPolicy,
};
use crate::sync::{Arc, AtomicBool, Ordering, fence};
use std::boxed::Box;
use std::time::{Duration, Instant};
use std::vec::Vec;

/// Builder for configuring an [`RcuDomain`].
///
/// - `auto_reclaim_threshold`: pending retirements above which `retire` reclaims on its own
/// - `max_readers`: capacity of the reader registry
/// - `wait_policy`: what a writer does while waiting for readers
///
/// # Example
/// ```
/// use rcu_domain::{RcuDomain, WaitPolicy};
///
/// let domain = RcuDomain::builder()
///     .auto_reclaim_threshold(128)
///     .max_readers(32)
///     .wait_policy(WaitPolicy::Spin)
///     .build();
/// assert_eq!(domain.epoch(), 0);
/// ```
///
/// 用于配置 [`RcuDomain`] 的构建器。
/// - `auto_reclaim_threshold`：`retire` 自动回收的待回收数量阈值
/// - `max_readers`：读者注册表的容量
/// - `wait_policy`：写入者等待读者时的行为
#[derive(Debug, Clone)]
pub struct RcuDomainBuilder {
    auto_reclaim_threshold: Option<usize>,
    max_readers: usize,
    wait_policy: WaitPolicy,
}

impl RcuDomainBuilder {
    /// Create a new builder with default settings.
    /// 使用默认设置创建一个新的构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            auto_reclaim_threshold: Some(AUTO_RECLAIM_THRESHOLD),
            max_readers: MAX_READERS,
            wait_policy: WaitPolicy::default(),
        }
    }

    /// Set the automatic reclamation threshold.
    ///
    /// When a retire call leaves more than this many entries pending, the
    /// calling thread runs a grace period and reclaims what it proved safe.
    /// Pass `None` to disable automatic reclamation.
    ///
    /// Default: `Some(16)`
    ///
    /// 设置自动回收阈值。
    /// 当一次退休调用后待回收条目超过该数量时，调用线程会执行一次宽限期并回收已证明安全的条目。
    /// 传入 `None` 可禁用自动回收。
    #[inline]
    pub fn auto_reclaim_threshold(mut self, threshold: impl Into<Option<usize>>) -> Self {
        self.auto_reclaim_threshold = threshold.into();
        self
    }

    /// Set the maximum number of live reader handles.
    ///
    /// Default: `256`
    ///
    /// 设置存活读者句柄的最大数量。
    #[inline]
    pub fn max_readers(mut self, max_readers: usize) -> Self {
        self.max_readers = max_readers;
        self
    }

    /// Set how writers wait for readers during a grace period.
    ///
    /// Default: `WaitPolicy::SpinThenYield { spin_limit: 1024 }`
    ///
    /// 设置宽限期内写入者等待读者的方式。
    #[inline]
    pub fn wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// Build the domain.
    /// 构建域。
    #[inline]
    pub fn build(self) -> RcuDomain {
        RcuDomain::from_shared(Arc::new(SharedState::new(
            self.auto_reclaim_threshold,
            self.max_readers,
            self.wait_policy,
        )))
    }
}

impl Default for RcuDomainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time counters of a domain.
/// 域在某一时刻的计数器快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainStats {
    /// Current global epoch.
    /// 当前全局纪元。
    pub epoch: usize,
    /// Most recent epoch for which a grace period was proven.
    /// 最近一次被证明完成宽限期的纪元。
    pub last_synchronized_epoch: usize,
    /// Retired objects not yet reclaimed.
    /// 已退休但尚未回收的对象数量。
    pub pending_retirements: usize,
    /// Live reader handles.
    /// 存活的读者句柄数量。
    pub registered_readers: usize,
    /// Readers inside a read section when the snapshot was taken.
    /// 快照时处于读临界区内的读者数量。
    pub active_readers: usize,
    /// Grace periods completed since the domain was built.
    /// 自域构建以来完成的宽限期数量。
    pub grace_periods: usize,
    /// Deleters run since the domain was built.
    /// 自域构建以来执行的删除器数量。
    pub reclaimed: usize,
}

/// Clears the reclaiming flag even if a deleter panics.
struct ReclaimFlag<'a>(&'a AtomicBool);

impl Drop for ReclaimFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An epoch-based deferred reclamation domain.
///
/// The domain owns:
/// - The global epoch counter.
/// - The registry of reader slots.
/// - The queue of retired objects waiting for a grace period.
///
/// `RcuDomain` is `Clone`; clones share the same state. Reader handles,
/// managed pointers and batches keep the state alive, so the domain always
/// outlives everything that refers to it.
///
/// **Teardown**: dropping the last `RcuDomain` handle runs barriers until the
/// retire queue is empty, waiting for readers still inside a read section.
/// Managed pointers and batches do not count as handles, so a retired value
/// that holds an [`RcuPtr`](crate::RcuPtr) of the same domain is reclaimed
/// too. Anything retired after that point is reclaimed by the retiring
/// thread before `retire` returns.
///
/// **Liveness**: a reader that never leaves its read section stalls every
/// `synchronize`, `barrier` and threshold-triggered reclamation. A thread
/// must not retire past the threshold, synchronize, barrier or drop the last
/// handle while its own reader handle is inside a read section, since it
/// would wait for itself. Use [`try_synchronize`](RcuDomain::try_synchronize)
/// to bound the wait.
///
/// **Typical Usage**:
/// ```
/// use rcu_domain::{RcuDomain, RcuPtr};
///
/// let domain = RcuDomain::new();
/// let config = RcuPtr::new(&domain, String::from("v1"));
///
/// // Reader thread
/// let mut reader = domain.register_reader().unwrap();
/// {
///     let guard = reader.read_lock();
///     assert_eq!(config.load_ref(&guard).map(String::as_str), Some("v1"));
/// }
///
/// // Writer thread
/// config.store(Some(Box::new(String::from("v2"))));
/// assert_eq!(domain.barrier(), 1);
/// ```
///
/// 基于纪元的延迟回收域。
/// 域持有全局纪元计数器、读者槽注册表以及等待宽限期的退休对象队列。
/// `RcuDomain` 可克隆，克隆共享同一状态。读者句柄、受管指针和批处理器会保持状态存活。
/// **销毁**：最后一个 `RcuDomain` 句柄被 drop 时会反复执行 barrier 直到退休队列为空。
/// 受管指针和批处理器不算作句柄，因此持有同域 `RcuPtr` 的退休值也会被回收。
/// **活性**：永不离开读临界区的读者会阻塞所有 `synchronize`、`barrier` 和阈值触发的回收。
pub struct RcuDomain {
    shared: Arc<SharedState>,
    /// Whether this handle is counted in `SharedState::owners`.
    counted: bool,
}

impl RcuDomain {
    /// Create a domain with default settings.
    /// 使用默认设置创建一个域。
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring a domain.
    /// 创建一个用于配置域的构建器。
    #[inline]
    pub fn builder() -> RcuDomainBuilder {
        RcuDomainBuilder::new()
    }

    /// The process-wide default domain.
    /// 进程级默认域。
    #[cfg(not(feature = "loom"))]
    pub fn global() -> &'static RcuDomain {
        static GLOBAL: std::sync::OnceLock<RcuDomain> = std::sync::OnceLock::new();
        GLOBAL.get_or_init(RcuDomain::new)
    }

    /// A counted handle to `shared`.
    pub(crate) fn from_shared(shared: Arc<SharedState>) -> Self {
        shared.owners.fetch_add(1, Ordering::Relaxed);
        RcuDomain {
            shared,
            counted: true,
        }
    }

    /// A handle that keeps the state alive without delaying teardown.
    ///
    /// Held by pointers and batches: their values may sit in the retire queue
    /// of the very domain they refer to.
    pub(crate) fn link(&self) -> Self {
        RcuDomain {
            shared: Arc::clone(&self.shared),
            counted: false,
        }
    }

    #[inline]
    pub(crate) fn shared(&self) -> &SharedState {
        &self.shared
    }

    /// Register a new reader.
    ///
    /// Returns [`RcuError::ReaderCapacityExhausted`] when the registry
    /// already holds `max_readers` live handles.
    ///
    /// 注册一个新的读者。注册表已满时返回 [`RcuError::ReaderCapacityExhausted`]。
    pub fn register_reader(&self) -> Result<ReaderHandle> {
        ReaderHandle::register(Arc::clone(&self.shared))
    }

    /// Current global epoch.
    /// 当前全局纪元。
    #[inline]
    pub fn epoch(&self) -> usize {
        self.shared.global_epoch.load(Ordering::Acquire)
    }

    /// Most recent epoch for which a grace period was proven.
    /// 最近一次被证明完成宽限期的纪元。
    #[inline]
    pub fn last_synchronized_epoch(&self) -> usize {
        self.shared.sync_epoch.load(Ordering::Acquire)
    }

    /// Number of retired objects not yet reclaimed.
    /// 已退休但尚未回收的对象数量。
    #[inline]
    pub fn pending_retirements(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Number of live reader handles.
    /// 存活的读者句柄数量。
    pub fn reader_count(&self) -> usize {
        self.shared.readers.lock().len()
    }

    /// Take a snapshot of the domain's counters.
    ///
    /// The fields are read one after another, so under concurrent use they
    /// need not describe a single instant.
    ///
    /// 获取域计数器的快照。各字段依次读取，并发使用时不一定对应同一时刻。
    pub fn stats(&self) -> DomainStats {
        let (registered_readers, active_readers) = {
            let readers = self.shared.readers.lock();
            let active = readers
                .iter()
                .filter(|slot| slot.active.load(Ordering::Acquire))
                .count();
            (readers.len(), active)
        };

        DomainStats {
            epoch: self.epoch(),
            last_synchronized_epoch: self.last_synchronized_epoch(),
            pending_retirements: self.pending_retirements(),
            registered_readers,
            active_readers,
            grace_periods: self.shared.grace_periods.load(Ordering::Relaxed),
            reclaimed: self.shared.reclaimed_total.load(Ordering::Relaxed),
        }
    }

    /// Retire a raw pointer: `deleter(ptr)` runs once a grace period has
    /// passed since this call.
    ///
    /// # Safety
    /// - `ptr` must already be unreachable for readers that enter a read
    ///   section after this call.
    /// - `deleter(ptr)` must be sound to call exactly once, from any thread.
    ///
    /// 退休一个裸指针：自本次调用起经过一个宽限期后执行 `deleter(ptr)`。
    pub unsafe fn retire(&self, ptr: *mut (), deleter: unsafe fn(*mut ())) {
        let entry = unsafe { RetireEntry::new(ptr, deleter) };
        self.enqueue(entry);
    }

    /// Retire a boxed value; it is dropped once a grace period has passed.
    ///
    /// The value must already be unreachable for new readers, as after an
    /// [`RcuPtr`](crate::RcuPtr) swap.
    ///
    /// 退休一个装箱值；经过一个宽限期后将其 drop。该值必须已对新读者不可达。
    pub fn retire_box<T: Send + 'static>(&self, value: Box<T>) {
        self.enqueue(RetireEntry::from_box(value));
    }

    /// Run `f` once a grace period has passed since this call.
    /// 自本次调用起经过一个宽限期后执行 `f`。
    pub fn call<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.enqueue(RetireEntry::from_fn(f));
    }

    fn enqueue(&self, entry: RetireEntry) {
        let epoch = self.shared.global_epoch.load(Ordering::SeqCst);
        let pending = {
            let mut queue = self.shared.queue.lock();
            queue.push(entry, epoch);
            self.shared.pending.store(queue.len(), Ordering::Release);
            queue.len()
        };

        tracing::trace!(target: "rcu_domain", epoch, pending, "retired");
        self.maybe_reclaim(pending);
    }

    /// Queue several entries under one lock acquisition.
    pub(crate) fn retire_many<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = RetireEntry>,
    {
        let epoch = self.shared.global_epoch.load(Ordering::SeqCst);
        let (added, pending) = {
            let mut queue = self.shared.queue.lock();
            let before = queue.len();
            for entry in entries {
                queue.push(entry, epoch);
            }
            self.shared.pending.store(queue.len(), Ordering::Release);
            (queue.len() - before, queue.len())
        };

        tracing::trace!(target: "rcu_domain", epoch, added, pending, "retired batch");
        self.maybe_reclaim(pending);
        added
    }

    fn maybe_reclaim(&self, pending: usize) {
        if self.shared.owners.load(Ordering::Acquire) == 0 {
            // No handle is left to run a barrier later.
            self.barrier();
            return;
        }

        let Some(threshold) = self.shared.auto_reclaim_threshold else {
            return;
        };
        if pending <= threshold {
            return;
        }
        if self
            .shared
            .reclaiming
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Another thread is already reclaiming.
            return;
        }

        let _flag = ReclaimFlag(&self.shared.reclaiming);
        let safe_epoch = self.synchronize();
        self.reclaim_before(safe_epoch);
    }

    /// Advance the global epoch and return the new value.
    #[inline]
    fn advance_epoch(&self) -> usize {
        self.shared.global_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Poll the registry until every active reader has left its section or
    /// observed `target`. Returns `false` if `deadline` passed first.
    fn wait_for_readers(&self, target: usize, deadline: Option<Instant>) -> bool {
        // Pairs with the fence in `ReaderHandle::enter_reader`.
        fence(Ordering::SeqCst);

        // Readers registered after this snapshot enter at `target` or later.
        let mut waiting: Vec<Arc<ReaderSlot>> = self.shared.readers.lock().clone();
        let mut backoff = Backoff::new(self.shared.wait_policy);

        loop {
            waiting.retain(|slot| {
                slot.active.load(Ordering::Acquire) && slot.epoch.load(Ordering::Acquire) < target
            });
            if waiting.is_empty() {
                return true;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return false;
                }
            }
            backoff.snooze();
        }
    }

    fn finish_grace_period(&self, target: usize, started: Instant) {
        let mut recorded = self.shared.sync_epoch.load(Ordering::Acquire);
        while recorded < target {
            match self.shared.sync_epoch.compare_exchange_weak(
                recorded,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => recorded = actual,
            }
        }
        self.shared.grace_periods.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            target: "rcu_domain",
            epoch = target,
            waited_us = started.elapsed().as_micros() as u64,
            "grace period established"
        );
    }

    /// Advance the epoch and block until every reader has left the read
    /// section it was in, or has re-entered at the new epoch.
    ///
    /// Returns the epoch the grace period was proven for. Blocks forever if
    /// a reader never exits.
    ///
    /// 推进纪元并阻塞，直到每个读者都离开了其所在的读临界区，或已在新纪元重新进入。
    /// 返回被证明完成宽限期的纪元。若某读者永不退出则永久阻塞。
    pub fn synchronize(&self) -> usize {
        let started = Instant::now();
        let target = self.advance_epoch();
        self.wait_for_readers(target, None);
        self.finish_grace_period(target, started);
        target
    }

    /// Like [`synchronize`](RcuDomain::synchronize), but give up after `timeout`.
    /// 与 `synchronize` 相同，但在 `timeout` 后放弃。
    pub fn try_synchronize(&self, timeout: Duration) -> Result<usize> {
        let started = Instant::now();
        let target = self.advance_epoch();

        if !self.wait_for_readers(target, Some(started + timeout)) {
            let waited = started.elapsed();
            tracing::warn!(
                target: "rcu_domain",
                epoch = target,
                waited_ms = waited.as_millis() as u64,
                "grace period timed out"
            );
            return Err(RcuError::GracePeriodTimeout {
                target_epoch: target,
                waited,
            });
        }

        self.finish_grace_period(target, started);
        Ok(target)
    }

    /// Synchronize, then reclaim every object retired before the new epoch.
    ///
    /// Returns the number of deleters run.
    ///
    /// 执行 `synchronize`，然后回收新纪元之前退休的所有对象。返回执行的删除器数量。
    pub fn barrier(&self) -> usize {
        let safe_epoch = self.synchronize();
        self.reclaim_before(safe_epoch)
    }

    /// Like [`barrier`](RcuDomain::barrier), but give up after `timeout`
    /// without reclaiming anything.
    ///
    /// 与 `barrier` 相同，但在 `timeout` 后放弃且不回收任何对象。
    pub fn try_barrier(&self, timeout: Duration) -> Result<usize> {
        let safe_epoch = self.try_synchronize(timeout)?;
        Ok(self.reclaim_before(safe_epoch))
    }

    /// Run the deleters of every entry retired strictly before `safe_epoch`.
    ///
    /// Entries are unlinked under the queue lock; deleters run after it is
    /// released.
    fn reclaim_before(&self, safe_epoch: usize) -> usize {
        let mut expired = {
            let mut queue = self.shared.queue.lock();
            let expired = queue.take_expired(safe_epoch);
            self.shared.pending.store(queue.len(), Ordering::Release);
            expired
        };

        let reclaimed: usize = expired.iter().map(Vec::len).sum();
        if reclaimed == 0 {
            return 0;
        }

        for bag in expired.iter_mut() {
            bag.clear();
        }
        self.shared.queue.lock().recycle(expired);
        self.shared
            .reclaimed_total
            .fetch_add(reclaimed, Ordering::Relaxed);

        tracing::debug!(target: "rcu_domain", safe_epoch, reclaimed, "reclaimed retired objects");
        reclaimed
    }

    /// Reclaim until the queue stays empty. Deleters may retire further
    /// values, which the next round picks up.
    fn drain(&self) {
        let mut rounds = 0usize;
        while self.pending_retirements() > 0 {
            self.barrier();
            rounds += 1;
        }
        if rounds > 0 {
            tracing::debug!(target: "rcu_domain", rounds, "drained retire queue on teardown");
        }
    }
}

impl Clone for RcuDomain {
    fn clone(&self) -> Self {
        Self::from_shared(Arc::clone(&self.shared))
    }
}

impl Drop for RcuDomain {
    fn drop(&mut self) {
        if !self.counted {
            return;
        }
        if self.shared.owners.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drain();
        }
    }
}

impl Default for RcuDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RcuDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcuDomain")
            .field("epoch", &self.epoch())
            .field("pending_retirements", &self.pending_retirements())
            .finish_non_exhaustive()
    }
}
