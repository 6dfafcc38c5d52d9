//! Prometheus counters for intake, review and publish.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    pub records_normalized: IntCounter,
    pub records_rejected: IntCounter,
    pub reclassifications: IntCounterVec,
    pub publishes: IntCounterVec,
    pub active_sessions: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("aduana".to_string()), None)?;

        let records_normalized = IntCounter::new(
            "records_normalized_total",
            "Extraction records turned into line items",
        )?;
        let records_rejected = IntCounter::new(
            "records_rejected_total",
            "Extraction records dropped as malformed",
        )?;
        let reclassifications = IntCounterVec::new(
            Opts::new("reclassifications_total", "Reclassification requests by outcome"),
            &["outcome"],
        )?;
        let publishes = IntCounterVec::new(
            Opts::new("publishes_total", "Publish attempts by outcome"),
            &["outcome"],
        )?;
        let active_sessions = IntGauge::new("active_sessions", "Review sessions held in memory")?;

        registry.register(Box::new(records_normalized.clone()))?;
        registry.register(Box::new(records_rejected.clone()))?;
        registry.register(Box::new(reclassifications.clone()))?;
        registry.register(Box::new(publishes.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            registry,
            records_normalized,
            records_rejected,
            reclassifications,
            publishes,
            active_sessions,
        })
    }

    pub fn record_intake(&self, items: usize, rejected: usize) {
        self.records_normalized.inc_by(items as u64);
        self.records_rejected.inc_by(rejected as u64);
    }

    pub fn record_reclassification(&self, outcome: &str) {
        self.reclassifications.with_label_values(&[outcome]).inc();
    }

    pub fn record_publish(&self, succeeded: bool) {
        let outcome = if succeeded { "success" } else { "failure" };
        self.publishes.with_label_values(&[outcome]).inc();
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|_| "Error encoding metrics".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_intake(3, 1);
        metrics.record_reclassification("applied");
        metrics.record_publish(false);
        metrics.active_sessions.set(2);

        let text = metrics.render();
        assert!(text.contains("aduana_records_normalized_total 3"));
        assert!(text.contains("aduana_records_rejected_total 1"));
        assert!(text.contains("outcome=\"applied\""));
        assert!(text.contains("aduana_publishes_total{outcome=\"failure\"} 1"));
        assert!(text.contains("aduana_active_sessions 2"));
    }
}
