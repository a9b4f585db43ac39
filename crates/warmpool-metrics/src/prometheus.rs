//! Prometheus text exposition format.

use warmpool_state::PoolCounts;

use crate::counters::{PoolEvent, PoolMetrics};

/// Render pool gauges and event counters.
///
/// `counts` is `None` when the store could not be read; the gauges are
/// then left out rather than reported as zero.
pub fn render_prometheus(counts: Option<PoolCounts>, metrics: &PoolMetrics) -> String {
    let mut out = String::new();

    out.push_str("# HELP warmpool_warm_pods Pods in the warm queue.\n");
    out.push_str("# TYPE warmpool_warm_pods gauge\n");
    if let Some(c) = counts {
        out.push_str(&format!("warmpool_warm_pods {}\n", c.idle));
    }

    out.push_str("# HELP warmpool_active_pods Pods bound to an in-flight call.\n");
    out.push_str("# TYPE warmpool_active_pods gauge\n");
    if let Some(c) = counts {
        out.push_str(&format!("warmpool_active_pods {}\n", c.active));
    }

    for event in PoolEvent::ALL {
        let name = event.metric_name();
        out.push_str(&format!("# HELP {name} {}\n", event.help()));
        out.push_str(&format!("# TYPE {name} counter\n"));
        out.push_str(&format!("{name} {}\n", metrics.get(event)));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_with_counts() {
        let metrics = PoolMetrics::new();
        metrics.record(PoolEvent::PodCreated);
        let output = render_prometheus(Some(PoolCounts { idle: 3, active: 2 }), &metrics);

        assert!(output.contains("warmpool_warm_pods 3\n"));
        assert!(output.contains("warmpool_active_pods 2\n"));
        assert!(output.contains("warmpool_pods_created_total 1\n"));
        assert!(output.contains("# TYPE warmpool_pods_created_total counter"));
    }

    #[test]
    fn render_without_counts_omits_gauge_samples() {
        let output = render_prometheus(None, &PoolMetrics::new());

        assert!(output.contains("# TYPE warmpool_warm_pods gauge"));
        assert!(!output.contains("warmpool_warm_pods 0"));
        assert!(output.contains("warmpool_trimmed_pods_total 0\n"));
    }
}
