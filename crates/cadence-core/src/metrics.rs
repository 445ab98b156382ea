//! Engine metrics

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Prometheus collectors for the orchestration engine
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    /// Send attempts by outcome and kind
    sends: IntCounterVec,
    /// Tick results by outcome
    ticks: IntCounterVec,
    /// Gate refusals by reason
    gate_blocks: IntCounterVec,
    /// Campaign status changes by target status
    transitions: IntCounterVec,
    /// Drafts created by snapshots
    drafts_created: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("cadence".to_string()), None)?;

        let sends = IntCounterVec::new(
            Opts::new("sends_total", "Send attempts by outcome"),
            &["outcome", "kind"],
        )?;
        registry.register(Box::new(sends.clone()))?;

        let ticks = IntCounterVec::new(
            Opts::new("ticks_total", "Campaign ticks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ticks.clone()))?;

        let gate_blocks = IntCounterVec::new(
            Opts::new("gate_blocks_total", "Sends deferred by the rate gate"),
            &["reason"],
        )?;
        registry.register(Box::new(gate_blocks.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new("campaign_transitions_total", "Campaign status changes"),
            &["to"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let drafts_created = IntGauge::with_opts(Opts::new(
            "snapshot_drafts_last",
            "Drafts created by the most recent snapshot",
        ))?;
        registry.register(Box::new(drafts_created.clone()))?;

        Ok(Self {
            registry,
            sends,
            ticks,
            gate_blocks,
            transitions,
            drafts_created,
        })
    }

    pub fn record_send(&self, outcome: &str, kind: &str) {
        self.sends.with_label_values(&[outcome, kind]).inc();
    }

    pub fn record_tick(&self, outcome: &str) {
        self.ticks.with_label_values(&[outcome]).inc();
    }

    pub fn record_gate_block(&self, reason: &str) {
        self.gate_blocks.with_label_values(&[reason]).inc();
    }

    pub fn record_transition(&self, to: &str) {
        self.transitions.with_label_values(&[to]).inc();
    }

    pub fn record_snapshot(&self, drafts: u64) {
        self.drafts_created.set(i64::try_from(drafts).unwrap_or(i64::MAX));
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all collectors in the Prometheus text format
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_send("sent", "campaign");
        metrics.record_gate_block("quota_exhausted");

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("cadence_sends_total{kind=\"campaign\",outcome=\"sent\"} 1"));
        assert!(text.contains("cadence_gate_blocks_total{reason=\"quota_exhausted\"} 1"));
    }
}
