//! Prometheus text exposition format.
//!
//! Renders a pipeline snapshot into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use crate::collector::MetricsSnapshot;

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    out.push_str(&format!("# HELP labelgrid_{name} {help}\n"));
    out.push_str(&format!("# TYPE labelgrid_{name} {kind}\n"));
}

fn labelled(out: &mut String, name: &str, label: &str, samples: &[(&str, u64)]) {
    for (value, count) in samples {
        out.push_str(&format!("labelgrid_{name}{{{label}=\"{value}\"}} {count}\n"));
    }
}

/// Render a pipeline snapshot into Prometheus text format.
///
/// Counters carry an `outcome` label; gauges are unlabelled.
pub fn render_prometheus(s: &MetricsSnapshot) -> String {
    let mut out = String::new();

    header(&mut out, "requests_submitted_total", "Submissions accepted by the gateway.", "counter");
    out.push_str(&format!("labelgrid_requests_submitted_total {}\n", s.requests_submitted));

    header(&mut out, "requests_total", "Finished submissions by outcome.", "counter");
    labelled(
        &mut out,
        "requests_total",
        "outcome",
        &[
            ("completed", s.requests_completed),
            ("failed", s.requests_failed),
            ("timed_out", s.requests_timed_out),
            ("rejected", s.requests_rejected),
        ],
    );

    header(&mut out, "results_total", "Result messages handled by the correlator.", "counter");
    labelled(
        &mut out,
        "results_total",
        "outcome",
        &[
            ("delivered", s.results_delivered),
            ("orphaned", s.results_orphaned),
            ("malformed", s.results_malformed),
        ],
    );

    header(&mut out, "orphans_swept_total", "Unclaimed results discarded after their TTL.", "counter");
    out.push_str(&format!("labelgrid_orphans_swept_total {}\n", s.orphans_swept));

    header(&mut out, "tasks_total", "Worker task attempts by outcome.", "counter");
    labelled(
        &mut out,
        "tasks_total",
        "outcome",
        &[
            ("processed", s.tasks_processed),
            ("classification_failed", s.tasks_classification_failed),
            ("given_up", s.tasks_given_up),
            ("retried", s.tasks_retried),
        ],
    );

    header(&mut out, "fleet_commands_total", "Instances launched or terminated.", "counter");
    labelled(
        &mut out,
        "fleet_commands_total",
        "action",
        &[
            ("launch", s.instances_launched),
            ("terminate", s.instances_terminated),
        ],
    );

    header(&mut out, "task_queue_depth", "Visible task messages at the last autoscaler cycle.", "gauge");
    out.push_str(&format!("labelgrid_task_queue_depth {}\n", s.task_queue_depth));

    header(&mut out, "fleet_target", "Worker count the autoscaler is converging to.", "gauge");
    out.push_str(&format!("labelgrid_fleet_target {}\n", s.fleet_target));

    header(&mut out, "fleet_active", "Pending or running worker instances.", "gauge");
    out.push_str(&format!("labelgrid_fleet_active {}\n", s.fleet_active));

    header(&mut out, "latency_p50_ms", "P50 request latency in milliseconds.", "gauge");
    out.push_str(&format!("labelgrid_latency_p50_ms {:.2}\n", s.latency_p50_ms));

    header(&mut out, "latency_p99_ms", "P99 request latency in milliseconds.", "gauge");
    out.push_str(&format!("labelgrid_latency_p99_ms {:.2}\n", s.latency_p99_ms));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            requests_submitted: 10,
            requests_completed: 7,
            requests_failed: 1,
            requests_timed_out: 2,
            results_delivered: 8,
            results_orphaned: 1,
            tasks_processed: 9,
            instances_launched: 5,
            instances_terminated: 3,
            task_queue_depth: 4,
            fleet_target: 4,
            fleet_active: 2,
            latency_p50_ms: 5.2,
            latency_p99_ms: 45.8,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&MetricsSnapshot::default());
        // Should still have type declarations.
        assert!(output.contains("# HELP labelgrid_requests_total"));
        assert!(output.contains("# TYPE labelgrid_requests_total counter"));
        assert!(output.contains("labelgrid_fleet_active 0\n"));
    }

    #[test]
    fn render_counters_with_outcomes() {
        let output = render_prometheus(&test_snapshot());

        assert!(output.contains("labelgrid_requests_submitted_total 10\n"));
        assert!(output.contains("labelgrid_requests_total{outcome=\"completed\"} 7\n"));
        assert!(output.contains("labelgrid_requests_total{outcome=\"timed_out\"} 2\n"));
        assert!(output.contains("labelgrid_results_total{outcome=\"orphaned\"} 1\n"));
        assert!(output.contains("labelgrid_tasks_total{outcome=\"processed\"} 9\n"));
        assert!(output.contains("labelgrid_fleet_commands_total{action=\"launch\"} 5\n"));
        assert!(output.contains("labelgrid_fleet_commands_total{action=\"terminate\"} 3\n"));
    }

    #[test]
    fn render_gauges() {
        let output = render_prometheus(&test_snapshot());

        assert!(output.contains("# TYPE labelgrid_fleet_target gauge"));
        assert!(output.contains("labelgrid_task_queue_depth 4\n"));
        assert!(output.contains("labelgrid_latency_p50_ms 5.20\n"));
        assert!(output.contains("labelgrid_latency_p99_ms 45.80\n"));
    }
}
