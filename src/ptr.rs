use crate::domain::RcuDomain;
use crate::reader::ReadGuard;
use crate::sync::{AtomicPtr, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;

/// A shared pointer whose replaced values are reclaimed through an [`RcuDomain`].
///
/// `RcuPtr<T>` publishes one heap value (or null) to readers. Every
/// successful replacement hands the previous value to the domain's
/// [`retire_box`](RcuDomain::retire_box), so it is dropped only after a grace
/// period, never synchronously. Readers that already loaded it stay safe until
/// they leave their read section.
///
/// **Safety Contract**:
/// - [`load_ref`](RcuPtr::load_ref) ties the returned reference to a
///   [`ReadGuard`] of the same domain, so it cannot outlive the read section.
/// - The raw [`load`](RcuPtr::load) may only be dereferenced between
///   `enter_reader` and `exit_reader` of a handle registered with the same
///   domain. The type does not enforce this.
///
/// ```
/// use rcu_domain::{RcuDomain, RcuPtr};
///
/// let domain = RcuDomain::new();
/// let shared = RcuPtr::new(&domain, 1u64);
/// let mut reader = domain.register_reader().unwrap();
///
/// shared.store(Some(Box::new(2)));
/// {
///     let guard = reader.read_lock();
///     assert_eq!(shared.load_ref(&guard), Some(&2));
/// }
/// domain.barrier();
/// ```
///
/// 一个其被替换的值通过 [`RcuDomain`] 回收的共享指针。
/// `RcuPtr<T>` 向读者发布一个堆上的值（或空）。每次成功替换都会把旧值交给域的
/// `retire_box`，因此旧值只会在宽限期之后被 drop，绝不会被同步释放。
/// **安全合约**：
/// - `load_ref` 把返回的引用绑定到同一域的 `ReadGuard`，因此它不会超出读临界区。
/// - 裸 `load` 的结果只能在同一域注册的句柄的 `enter_reader` 与 `exit_reader` 之间解引用。
pub struct RcuPtr<T: Send + 'static> {
    ptr: AtomicPtr<T>,
    /// Uncounted link: a retired value may hold a pointer into its own domain.
    domain: RcuDomain,
    _owns: PhantomData<Box<T>>,
}

#[inline]
fn into_raw<T>(value: Option<Box<T>>) -> *mut T {
    value.map_or(std::ptr::null_mut(), Box::into_raw)
}

impl<T: Send + 'static> RcuPtr<T> {
    /// Create a pointer publishing `value`.
    /// 创建一个发布 `value` 的指针。
    #[inline]
    pub fn new(domain: &RcuDomain, value: T) -> Self {
        Self::from_box(domain, Box::new(value))
    }

    #[inline]
    pub fn from_box(domain: &RcuDomain, value: Box<T>) -> Self {
        Self {
            ptr: AtomicPtr::new(Box::into_raw(value)),
            domain: domain.link(),
            _owns: PhantomData,
        }
    }

    /// Create a pointer publishing nothing.
    /// 创建一个不发布任何值的指针。
    #[inline]
    pub fn null(domain: &RcuDomain) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            domain: domain.link(),
            _owns: PhantomData,
        }
    }

    /// The domain replaced values are retired to.
    ///
    /// A pointer does not keep the domain from tearing down; clone the
    /// returned handle to do that.
    ///
    /// 被替换的值所退休到的域。指针本身不会推迟域的销毁；如需推迟请克隆返回的句柄。
    #[inline]
    pub fn domain(&self) -> &RcuDomain {
        &self.domain
    }

    /// Load the current raw pointer.
    ///
    /// Dereference the result only inside a read section of this domain.
    ///
    /// 加载当前的裸指针。仅可在本域的读临界区内解引用结果。
    #[inline]
    pub fn load(&self) -> *mut T {
        self.ptr.load(Ordering::Acquire)
    }

    /// Borrow the current value for the lifetime of `guard`.
    ///
    /// # Panics
    /// If `guard` belongs to a reader of another domain: that reader does
    /// not hold back this domain's reclamation.
    ///
    /// 在 `guard` 的生命周期内借用当前值。
    /// 若 `guard` 属于其他域的读者则 panic：该读者无法阻止本域的回收。
    #[inline]
    pub fn load_ref<'g>(&self, guard: &'g ReadGuard<'_>) -> Option<&'g T> {
        assert!(
            std::ptr::eq(guard.shared(), self.domain.shared()),
            "ReadGuard from a different RcuDomain"
        );
        let ptr = self.ptr.load(Ordering::Acquire);
        // SAFETY: the guard keeps its reader active in this domain, and the
        // domain does not run the deleter of a value retired after that
        // reader entered until the guard is dropped.
        unsafe { ptr.as_ref() }
    }

    /// Publish `value`, retiring the previous value if there was one.
    /// 发布 `value`，若存在旧值则将其退休。
    #[inline]
    pub fn store(&self, value: Option<Box<T>>) {
        self.exchange(value);
    }

    /// Publish `value` and return the previous pointer.
    ///
    /// The previous value, if non-null, has already been retired: the
    /// returned pointer must not be freed by the caller and may only be
    /// dereferenced inside a read section.
    ///
    /// 发布 `value` 并返回旧指针。旧值（若非空）已被退休：
    /// 调用者不得释放返回的指针，且只能在读临界区内解引用。
    pub fn exchange(&self, value: Option<Box<T>>) -> *mut T {
        let new_ptr = into_raw(value);
        let old_ptr = self.ptr.swap(new_ptr, Ordering::SeqCst);
        if !old_ptr.is_null() {
            // SAFETY: every non-null value came from `Box::into_raw`, and the
            // swap made it unreachable for readers entering from now on.
            self.domain.retire_box(unsafe { Box::from_raw(old_ptr) });
        }
        old_ptr
    }

    /// Publish `desired` if the current pointer is `expected`.
    ///
    /// On success `expected` is retired (unless null). On failure `desired`
    /// is handed back untouched.
    ///
    /// 若当前指针为 `expected` 则发布 `desired`。
    /// 成功时退休 `expected`（除非为空）；失败时原样返还 `desired`。
    pub fn compare_exchange(
        &self,
        expected: *mut T,
        desired: Option<Box<T>>,
    ) -> Result<(), Option<Box<T>>> {
        let new_ptr = into_raw(desired);
        match self
            .ptr
            .compare_exchange(expected, new_ptr, Ordering::SeqCst, Ordering::Acquire)
        {
            Ok(old_ptr) => {
                if !old_ptr.is_null() {
                    // SAFETY: as in `exchange`.
                    self.domain.retire_box(unsafe { Box::from_raw(old_ptr) });
                }
                Ok(())
            }
            Err(_) => {
                // SAFETY: `new_ptr` was never published.
                Err((!new_ptr.is_null()).then(|| unsafe { Box::from_raw(new_ptr) }))
            }
        }
    }

    /// Whether nothing is published.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.load().is_null()
    }
}

impl<T: Send + 'static> std::fmt::Debug for RcuPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ptr = self.ptr.load(Ordering::Relaxed);
        f.debug_tuple("RcuPtr").field(&ptr).finish()
    }
}

impl<T: Send + 'static> Drop for RcuPtr<T> {
    /// Retires the published value instead of dropping it in place: a reader
    /// may still hold a raw pointer obtained through `load`.
    fn drop(&mut self) {
        let ptr = self.ptr.swap(std::ptr::null_mut(), Ordering::SeqCst);
        if !ptr.is_null() {
            self.domain.retire_box(unsafe { Box::from_raw(ptr) });
        }
    }
}
