//! warmpool-reconcile — keeps the warm pool at its target size.
//!
//! # Reconcile cycle
//!
//! ```text
//! ping store                 → abort cycle if unreachable
//! idle, active = queue lengths
//! claimed      = live pods in neither queue, held by an in-flight dispatch
//! booting      = other live agent pods in neither queue
//! total        = idle + active + booting + claimed
//!
//! if total >= max_pods:      at capacity, create nothing
//! deficit = min_idle - (idle + booting), clamped to max_pods - total
//! launch `deficit` independent creates on the background pool
//! ```
//!
//! Cycles run on demand through a coalescing [`ReconcileTrigger`]. The
//! [`Trimmer`] runs on a timer and pops surplus warm pods from the tail.

pub mod reconciler;
pub mod trimmer;

pub use reconciler::{PoolLimits, ReconcileOutcome, ReconcileTrigger, Reconciler};
pub use trimmer::Trimmer;
