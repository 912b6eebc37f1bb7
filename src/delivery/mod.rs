//! The two delivery paths and the background redelivery of the safe path.

pub mod fast;
pub mod safe;
pub mod worker;

pub use fast::FastChannel;
pub use safe::{SafeChannel, SafePolicy};
pub use worker::{RecoveryHandle, RecoveryWorker, Step, WorkerState};
