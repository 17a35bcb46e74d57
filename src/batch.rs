use crate::domain::RcuDomain;
use crate::retire::RetireEntry;
use std::boxed::Box;
use std::vec::Vec;

/// Initial capacity of a batch.
/// 批处理器的初始容量。
const DEFAULT_BATCH_CAPACITY: usize = 16;

/// Collects values and retires them together.
///
/// [`flush`](RcuBatch::flush) queues every collected value under a single
/// acquisition of the domain's queue lock. Values still collected when the
/// batch is dropped are flushed then.
///
/// ```
/// use rcu_domain::{RcuBatch, RcuDomain};
///
/// let domain = RcuDomain::builder().auto_reclaim_threshold(None).build();
/// let mut batch = RcuBatch::new(&domain);
/// for i in 0..4u32 {
///     batch.add(Box::new(i));
/// }
/// assert_eq!(batch.flush(), 4);
/// assert_eq!(domain.pending_retirements(), 4);
/// ```
///
/// 收集多个值并一起退休。
/// `flush` 在一次获取域队列锁的过程中将所有已收集的值入队。批处理器被 drop 时会刷新剩余的值。
pub struct RcuBatch<T: Send + 'static> {
    /// Uncounted link, like the one held by `RcuPtr`.
    domain: RcuDomain,
    objects: Vec<Box<T>>,
}

impl<T: Send + 'static> RcuBatch<T> {
    pub fn new(domain: &RcuDomain) -> Self {
        Self::with_capacity(domain, DEFAULT_BATCH_CAPACITY)
    }

    pub fn with_capacity(domain: &RcuDomain, capacity: usize) -> Self {
        Self {
            domain: domain.link(),
            objects: Vec::with_capacity(capacity),
        }
    }

    /// Collect a value. It must already be unreachable for new readers.
    /// 收集一个值。该值必须已对新读者不可达。
    #[inline]
    pub fn add(&mut self, value: Box<T>) {
        self.objects.push(value);
    }

    /// Retire every collected value and return how many were retired.
    /// 退休所有已收集的值并返回退休的数量。
    pub fn flush(&mut self) -> usize {
        if self.objects.is_empty() {
            return 0;
        }
        self.domain
            .retire_many(self.objects.drain(..).map(RetireEntry::from_box))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<T: Send + 'static> Drop for RcuBatch<T> {
    fn drop(&mut self) {
        self.flush();
    }
}
