use std::time::Duration;

use thiserror::Error;

/// Errors reported by an [`RcuDomain`](crate::RcuDomain).
///
/// Allocation failure is not represented: like any other Rust allocation,
/// failing to queue a retired object aborts the process.
///
/// [`RcuDomain`](crate::RcuDomain) 报告的错误。
/// 不表示分配失败：与其他 Rust 分配一样，退休对象入队失败会中止进程。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RcuError {
    /// The reader registry already holds `capacity` live readers.
    /// 读者注册表已容纳 `capacity` 个存活读者。
    #[error("reader registry is full ({capacity} readers registered)")]
    ReaderCapacityExhausted { capacity: usize },

    /// Readers did not leave their read sections before the deadline.
    ///
    /// The epoch has still been advanced, but no grace period was proven and
    /// nothing was reclaimed.
    ///
    /// 读者未在截止时间前离开读临界区。纪元已推进，但宽限期未被证明，也未回收任何对象。
    #[error("grace period for epoch {target_epoch} not established after {waited:?}")]
    GracePeriodTimeout { target_epoch: usize, waited: Duration },
}

/// Result type alias for domain operations.
/// 域操作的结果类型别名。
pub type Result<T> = std::result::Result<T, RcuError>;
