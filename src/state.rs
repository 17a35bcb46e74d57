use crate::retire::RetireQueue;
use crate::sync::{Arc, AtomicBool, AtomicUsize, Mutex, spin_hint, yield_now};
use std::vec::Vec;

/// Default number of pending retirements above which `retire` reclaims on its own.
/// `retire` 自动回收的默认待回收数量阈值。
pub(crate) const AUTO_RECLAIM_THRESHOLD: usize = 16;

/// Default capacity of the reader registry.
/// 读者注册表的默认容量。
pub const MAX_READERS: usize = 256;

/// Default number of pause-hint spins before a waiting writer starts yielding.
/// 等待中的写入者开始让出时间片之前的默认自旋次数。
pub(crate) const DEFAULT_SPIN_LIMIT: u32 = 1024;

/// How a writer waits for readers to leave a grace period.
///
/// Every policy keeps polling until the readers clear; the difference is only
/// in what the writer does between two scans of the registry. Use
/// [`RcuDomain::try_synchronize`](crate::RcuDomain::try_synchronize) to put
/// an upper bound on the wait itself.
///
/// 写入者等待读者离开宽限期的方式。
/// 所有策略都会持续轮询直到读者全部离开，区别仅在于两次扫描之间写入者做什么。
/// 使用 `try_synchronize` 为等待设置上限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Busy-wait with a CPU pause hint between scans. Never enters the scheduler.
    /// 扫描之间以 CPU 暂停提示忙等，从不进入调度器。
    Spin,
    /// Busy-wait for `spin_limit` scans, then yield the time slice on each further scan.
    /// 先忙等 `spin_limit` 次扫描，之后每次扫描都让出时间片。
    SpinThenYield { spin_limit: u32 },
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::SpinThenYield {
            spin_limit: DEFAULT_SPIN_LIMIT,
        }
    }
}

/// Per-wait backoff state driven by a [`WaitPolicy`].
/// 由 [`WaitPolicy`] 驱动的单次等待退避状态。
pub(crate) struct Backoff {
    policy: WaitPolicy,
    spins: u32,
}

impl Backoff {
    #[inline]
    pub(crate) fn new(policy: WaitPolicy) -> Self {
        Self { policy, spins: 0 }
    }

    #[inline]
    pub(crate) fn snooze(&mut self) {
        match self.policy {
            WaitPolicy::Spin => spin_hint(),
            WaitPolicy::SpinThenYield { spin_limit } => {
                if self.spins < spin_limit {
                    self.spins += 1;
                    spin_hint();
                } else {
                    yield_now();
                }
            }
        }
    }
}

/// The epoch snapshot and activity flag of one registered reader.
///
/// Cache-aligned to prevent false sharing between readers.
///
/// 一个已注册读者的纪元快照和活跃标志。
/// 缓存对齐以防止读者之间的伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct ReaderSlot {
    /// Registry key, used to deregister the slot.
    /// 注册表键，用于注销该槽。
    pub(crate) id: usize,
    /// Global epoch observed when the reader last entered a read section.
    /// 读者最近一次进入读临界区时观察到的全局纪元。
    pub(crate) epoch: AtomicUsize,
    /// Whether the reader is inside a read section.
    /// 读者是否处于读临界区内。
    pub(crate) active: AtomicBool,
}

impl ReaderSlot {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            epoch: AtomicUsize::new(0),
            active: AtomicBool::new(false),
        }
    }
}

/// State shared by every handle of one domain.
///
/// Contains the epoch counters, the reader registry, the retire queue and
/// the configuration fixed at build time.
///
/// 一个域的所有句柄共享的状态。
/// 包含纪元计数器、读者注册表、退休队列以及构建时确定的配置。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct SharedState {
    /// The global monotonic epoch counter.
    /// 全局单调纪元计数器。
    pub(crate) global_epoch: AtomicUsize,
    /// Most recent epoch for which a grace period was proven.
    /// 最近一次被证明完成宽限期的纪元。
    pub(crate) sync_epoch: AtomicUsize,
    /// Registered reader slots.
    /// 已注册的读者槽。
    pub(crate) readers: Mutex<Vec<Arc<ReaderSlot>>>,
    /// Source of unique reader slot ids.
    /// 读者槽唯一 ID 的来源。
    pub(crate) next_reader_id: AtomicUsize,
    /// Retired entries awaiting a grace period.
    /// 等待宽限期的退休条目。
    pub(crate) queue: Mutex<RetireQueue>,
    /// Number of entries in `queue`, readable without the lock.
    /// `queue` 中的条目数，无需加锁即可读取。
    pub(crate) pending: AtomicUsize,
    /// Set while an opportunistic reclamation pass runs.
    /// 机会性回收进行期间置位。
    pub(crate) reclaiming: AtomicBool,
    /// Number of live `RcuDomain` handles. Pointers and batches do not count.
    /// 存活的 `RcuDomain` 句柄数量。指针和批处理器不计入。
    pub(crate) owners: AtomicUsize,
    /// Grace periods completed so far.
    /// 迄今完成的宽限期数量。
    pub(crate) grace_periods: AtomicUsize,
    /// Deleters run so far.
    /// 迄今执行的删除器数量。
    pub(crate) reclaimed_total: AtomicUsize,
    /// Pending count above which `retire` reclaims; `None` disables it.
    /// `retire` 触发回收的待回收数量阈值；`None` 表示禁用。
    pub(crate) auto_reclaim_threshold: Option<usize>,
    /// Maximum number of live reader handles.
    /// 存活读者句柄的最大数量。
    pub(crate) max_readers: usize,
    /// How writers wait for readers.
    /// 写入者等待读者的方式。
    pub(crate) wait_policy: WaitPolicy,
}

impl SharedState {
    pub(crate) fn new(
        auto_reclaim_threshold: Option<usize>,
        max_readers: usize,
        wait_policy: WaitPolicy,
    ) -> Self {
        Self {
            global_epoch: AtomicUsize::new(0),
            sync_epoch: AtomicUsize::new(0),
            readers: Mutex::new(Vec::new()),
            next_reader_id: AtomicUsize::new(0),
            queue: Mutex::new(RetireQueue::new()),
            pending: AtomicUsize::new(0),
            reclaiming: AtomicBool::new(false),
            owners: AtomicUsize::new(0),
            grace_periods: AtomicUsize::new(0),
            reclaimed_total: AtomicUsize::new(0),
            auto_reclaim_threshold,
            max_readers,
            wait_policy,
        }
    }
}
