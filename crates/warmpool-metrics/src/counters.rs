//! Lock-free pool event counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Countable pool events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    PodCreated,
    PodCreateFailed,
    PodDeleted,
    PodDeleteFailed,
    DispatchSucceeded,
    DispatchDeadPod,
    DispatchHandoffFailed,
    DispatchExhausted,
    WatchDeletion,
    PodTrimmed,
}

impl PoolEvent {
    pub const ALL: [PoolEvent; 10] = [
        PoolEvent::PodCreated,
        PoolEvent::PodCreateFailed,
        PoolEvent::PodDeleted,
        PoolEvent::PodDeleteFailed,
        PoolEvent::DispatchSucceeded,
        PoolEvent::DispatchDeadPod,
        PoolEvent::DispatchHandoffFailed,
        PoolEvent::DispatchExhausted,
        PoolEvent::WatchDeletion,
        PoolEvent::PodTrimmed,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Prometheus metric name.
    pub fn metric_name(self) -> &'static str {
        match self {
            PoolEvent::PodCreated => "warmpool_pods_created_total",
            PoolEvent::PodCreateFailed => "warmpool_pod_create_failures_total",
            PoolEvent::PodDeleted => "warmpool_pods_deleted_total",
            PoolEvent::PodDeleteFailed => "warmpool_pod_delete_failures_total",
            PoolEvent::DispatchSucceeded => "warmpool_dispatch_success_total",
            PoolEvent::DispatchDeadPod => "warmpool_dispatch_dead_pods_total",
            PoolEvent::DispatchHandoffFailed => "warmpool_dispatch_handoff_failures_total",
            PoolEvent::DispatchExhausted => "warmpool_dispatch_exhausted_total",
            PoolEvent::WatchDeletion => "warmpool_watch_deletions_total",
            PoolEvent::PodTrimmed => "warmpool_trimmed_pods_total",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            PoolEvent::PodCreated => "Pod create requests accepted by the orchestrator.",
            PoolEvent::PodCreateFailed => "Pod create requests rejected or failed.",
            PoolEvent::PodDeleted => "Pods deleted (including already-gone pods).",
            PoolEvent::PodDeleteFailed => "Pod delete requests that failed.",
            PoolEvent::DispatchSucceeded => "Calls handed off to a warm pod.",
            PoolEvent::DispatchDeadPod => "Claimed warm pods found dead and discarded.",
            PoolEvent::DispatchHandoffFailed => "Hand-offs that failed and deleted the pod.",
            PoolEvent::DispatchExhausted => "Calls rejected because no warm pod was left.",
            PoolEvent::WatchDeletion => "Pod deletions observed on the orchestrator watch.",
            PoolEvent::PodTrimmed => "Excess warm pods removed by the trimmer.",
        }
    }
}

/// Shared counters, one per [`PoolEvent`].
#[derive(Debug, Default)]
pub struct PoolMetrics {
    counts: [AtomicU64; PoolEvent::ALL.len()],
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: PoolEvent) {
        self.counts[event.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, event: PoolEvent) -> u64 {
        self.counts[event.index()].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = PoolMetrics::new();
        for event in PoolEvent::ALL {
            assert_eq!(metrics.get(event), 0);
        }
    }

    #[test]
    fn record_increments_only_that_event() {
        let metrics = PoolMetrics::new();
        metrics.record(PoolEvent::PodCreated);
        metrics.record(PoolEvent::PodCreated);
        metrics.record(PoolEvent::PodTrimmed);

        assert_eq!(metrics.get(PoolEvent::PodCreated), 2);
        assert_eq!(metrics.get(PoolEvent::PodTrimmed), 1);
        assert_eq!(metrics.get(PoolEvent::PodDeleted), 0);
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names: Vec<_> = PoolEvent::ALL.iter().map(|e| e.metric_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), PoolEvent::ALL.len());
    }
}
