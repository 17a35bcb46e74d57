use std::boxed::Box;
use std::collections::VecDeque;
use std::vec::Vec;

/// An object handed to the domain for deferred destruction.
///
/// Stores the raw pointer together with the function that knows how to
/// destroy it. Dropping the entry runs the deleter, so an entry is reclaimed
/// exactly once: when the queue lets go of it.
///
/// 交给域延迟销毁的对象。
/// 保存裸指针以及知道如何销毁它的函数。drop 条目即执行删除器，因此每个条目恰好回收一次。
pub(crate) struct RetireEntry {
    ptr: *mut (),
    deleter: unsafe fn(*mut ()),
}

// SAFETY: entries are only built from `Send` payloads (see `from_box` and
// `from_fn`) or through the `unsafe` raw retire path, whose caller promises
// the deleter may run on any thread.
unsafe impl Send for RetireEntry {}

/// Deleter used for boxed values: rebuild the `Box<T>` and drop it.
unsafe fn drop_box<T>(ptr: *mut ()) {
    unsafe {
        drop(Box::from_raw(ptr as *mut T));
    }
}

/// Deleter used for deferred callbacks: rebuild the closure box and call it.
unsafe fn run_callback(ptr: *mut ()) {
    let callback = unsafe { Box::from_raw(ptr as *mut Box<dyn FnOnce() + Send>) };
    callback();
}

impl RetireEntry {
    /// # Safety
    /// `deleter(ptr)` must be sound to call exactly once, from any thread,
    /// once no reader can still observe `ptr`.
    #[inline]
    pub(crate) unsafe fn new(ptr: *mut (), deleter: unsafe fn(*mut ())) -> Self {
        RetireEntry { ptr, deleter }
    }

    #[inline]
    pub(crate) fn from_box<T: Send + 'static>(value: Box<T>) -> Self {
        RetireEntry {
            ptr: Box::into_raw(value) as *mut (),
            deleter: drop_box::<T>,
        }
    }

    #[inline]
    pub(crate) fn from_fn<F: FnOnce() + Send + 'static>(f: F) -> Self {
        let callback: Box<dyn FnOnce() + Send> = Box::new(f);
        RetireEntry {
            ptr: Box::into_raw(Box::new(callback)) as *mut (),
            deleter: run_callback,
        }
    }
}

impl Drop for RetireEntry {
    #[inline]
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                (self.deleter)(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// Retired entries grouped into bags by the epoch they were retired in.
///
/// Bags are kept in insertion order. Concurrent retirers may append with an
/// epoch older than the newest bag, so expiry scans every bag instead of
/// stopping at the first live one.
///
/// 按退休纪元分组为袋的退休条目。
/// 袋按插入顺序保存。并发退休者可能以比最新袋更旧的纪元追加，因此过期扫描会检查每个袋。
pub(crate) struct RetireQueue {
    bags: VecDeque<(usize, Vec<RetireEntry>)>,
    /// Empty bags kept around to avoid reallocating.
    pool: Vec<Vec<RetireEntry>>,
    len: usize,
}

/// Bags unlinked from the queue, ready to run their deleters.
pub(crate) type ExpiredBags = Vec<Vec<RetireEntry>>;

impl RetireQueue {
    pub(crate) fn new() -> Self {
        Self {
            bags: VecDeque::new(),
            pool: Vec::new(),
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Append an entry stamped with `epoch`.
    pub(crate) fn push(&mut self, entry: RetireEntry, epoch: usize) {
        match self.bags.back_mut() {
            Some((last_epoch, bag)) if *last_epoch == epoch => bag.push(entry),
            _ => {
                let mut bag = self.pool.pop().unwrap_or_else(|| Vec::with_capacity(16));
                bag.push(entry);
                self.bags.push_back((epoch, bag));
            }
        }
        self.len += 1;
    }

    /// Unlink every bag retired strictly before `safe_epoch`.
    ///
    /// The returned bags still own their entries; dropping them (outside the
    /// queue lock) runs the deleters.
    pub(crate) fn take_expired(&mut self, safe_epoch: usize) -> ExpiredBags {
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(self.bags.len());

        for (epoch, bag) in self.bags.drain(..) {
            if epoch < safe_epoch {
                self.len -= bag.len();
                expired.push(bag);
            } else {
                kept.push_back((epoch, bag));
            }
        }

        self.bags = kept;
        expired
    }

    /// Return drained bags to the pool.
    pub(crate) fn recycle(&mut self, bags: ExpiredBags) {
        for bag in bags {
            debug_assert!(bag.is_empty(), "recycled bag still holds entries");
            self.pool.push(bag);
        }
    }
}

impl std::fmt::Debug for RetireQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetireQueue")
            .field("bags", &self.bags.len())
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
