use crate::access::Verdict;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// 访问守卫相关指标，随 AppState 共享
pub struct Metrics {
    pub registry: Registry,
    pub access_decisions: IntCounterVec,
    pub lockouts: IntCounter,
    pub tracked_ips: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let access_decisions = IntCounterVec::new(
            Opts::new("access_decisions_total", "Access guard decisions grouped by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(access_decisions.clone()))?;

        let lockouts = IntCounter::new("access_lockouts_total", "IP lockouts imposed after too many wrong passwords")?;
        registry.register(Box::new(lockouts.clone()))?;

        let tracked_ips = IntGauge::new("access_tracked_ips", "IPs currently holding a failed-attempt record")?;
        registry.register(Box::new(tracked_ips.clone()))?;

        Ok(Self {
            registry,
            access_decisions,
            lockouts,
            tracked_ips,
        })
    }

    pub fn record_verdict(&self, verdict: &Verdict) {
        self.access_decisions
            .with_label_values(&[verdict.decision.outcome()])
            .inc();
        if verdict.lock_imposed {
            self.lockouts.inc();
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer).map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessDecision, RecordChange};

    #[test]
    fn test_record_and_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_verdict(&Verdict {
            decision: AccessDecision::Locked { remaining_hours: 24 },
            change: RecordChange::Unchanged,
            lock_imposed: true,
            lock_expired: false,
            bypassed: false,
        });
        metrics.record_verdict(&Verdict {
            decision: AccessDecision::Allow,
            change: RecordChange::Unchanged,
            lock_imposed: false,
            lock_expired: false,
            bypassed: false,
        });

        assert_eq!(metrics.lockouts.get(), 1);
        assert_eq!(metrics.access_decisions.with_label_values(&["allow"]).get(), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("access_decisions_total{outcome=\"locked\"} 1"));
        assert!(text.contains("access_lockouts_total 1"));
    }
}
