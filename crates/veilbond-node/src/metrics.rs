use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub messages_forwarded: IntCounter,
    pub messages_rejected: IntCounter,
    pub attestations_filed: IntCounter,
    pub slashes_executed: IntCounter,
    pub slashes_failed: IntCounter,
    pub disputes_upheld: IntCounter,
    pub bonds_expired: IntCounter,
    pub evidence_swept: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let messages_forwarded = IntCounter::new(
            "veilbond_messages_forwarded_total",
            "Messages verified and forwarded",
        )
        .unwrap();
        let messages_rejected = IntCounter::new(
            "veilbond_messages_rejected_total",
            "Messages rejected by the relay",
        )
        .unwrap();
        let attestations_filed = IntCounter::new(
            "veilbond_attestations_filed_total",
            "Abuse attestations accepted",
        )
        .unwrap();
        let slashes_executed = IntCounter::new(
            "veilbond_slashes_executed_total",
            "Scheduled slashes executed",
        )
        .unwrap();
        let slashes_failed = IntCounter::new(
            "veilbond_slashes_failed_total",
            "Slash jobs that exhausted their retry budget",
        )
        .unwrap();
        let disputes_upheld = IntCounter::new(
            "veilbond_disputes_upheld_total",
            "Disputes that cancelled a scheduled slash",
        )
        .unwrap();
        let bonds_expired = IntCounter::new(
            "veilbond_bonds_expired_total",
            "Bonds resolved by the expiry sweep",
        )
        .unwrap();
        let evidence_swept = IntCounter::new(
            "veilbond_evidence_swept_total",
            "Evidence records removed by retention",
        )
        .unwrap();

        for collector in [
            &messages_forwarded,
            &messages_rejected,
            &attestations_filed,
            &slashes_executed,
            &slashes_failed,
            &disputes_upheld,
            &bonds_expired,
            &evidence_swept,
        ] {
            registry.register(Box::new(collector.clone())).unwrap();
        }

        Self {
            registry,
            messages_forwarded,
            messages_rejected,
            attestations_filed,
            slashes_executed,
            slashes_failed,
            disputes_upheld,
            bonds_expired,
            evidence_swept,
        }
    }

    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
