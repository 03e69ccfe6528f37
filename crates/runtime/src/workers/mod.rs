//! Worker tasks that back the runtime orchestration.
//!
//! One key worker runs per queue key and executes that key's units of work
//! strictly one at a time, in arrival order.

mod key_worker;

pub(crate) use key_worker::{Job, KeyWorker};
