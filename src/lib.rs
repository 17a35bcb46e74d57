//! Epoch-based deferred reclamation.
//!
//! An [`RcuDomain`] lets many reader threads dereference shared pointers
//! without locks while writers replace those pointers and hand the old
//! values back to the domain. The domain frees a retired value only after a
//! grace period: once every reader that was inside a read section when the
//! value was retired has left it.
//!
//! - Readers register once with [`RcuDomain::register_reader`] and bracket
//!   accesses with [`ReaderHandle::read_lock`] (or
//!   `enter_reader`/`exit_reader`).
//! - Writers publish through [`RcuPtr`], or retire values themselves with
//!   [`RcuDomain::retire_box`], [`RcuDomain::call`] or the raw
//!   [`RcuDomain::retire`].
//! - [`RcuDomain::synchronize`] waits for a grace period;
//!   [`RcuDomain::barrier`] additionally reclaims everything it proved safe.
//! - [`RcuBatch`] retires many values at once.
//!
//! ```
//! use rcu_domain::{RcuDomain, RcuPtr};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let domain = RcuDomain::new();
//! let table = Arc::new(RcuPtr::new(&domain, vec![1, 2, 3]));
//!
//! let reader = {
//!     let domain = domain.clone();
//!     let table = Arc::clone(&table);
//!     thread::spawn(move || {
//!         let mut handle = domain.register_reader().unwrap();
//!         let guard = handle.read_lock();
//!         let len = table.load_ref(&guard).map(|v| v.len()).unwrap_or(0);
//!         len
//!     })
//! };
//!
//! table.store(Some(Box::new(vec![4, 5, 6, 7])));
//! let seen = reader.join().unwrap();
//! assert!(seen == 3 || seen == 4);
//! domain.barrier();
//! ```

mod batch;
mod domain;
mod error;
mod ptr;
mod reader;
mod retire;
mod state;
mod sync;

pub use batch::RcuBatch;
pub use domain::{DomainStats, RcuDomain, RcuDomainBuilder};
pub use error::{RcuError, Result};
pub use ptr::RcuPtr;
pub use reader::{ReadGuard, ReaderHandle};
pub use state::{MAX_READERS, WaitPolicy};

#[cfg(test)]
mod tests;
