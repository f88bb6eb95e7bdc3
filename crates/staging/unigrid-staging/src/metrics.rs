//! Prometheus counters for staging, enabled by the `metrics` feature.

use prometheus::{IntCounterVec, Registry};

use crate::transfer::{Direction, TransferSummary};

/// Transfer outcome and volume counters
#[derive(Clone)]
pub struct StagingMetrics {
    /// Transfers by direction and result (`ok`, `skipped`, `error`)
    pub transfers: IntCounterVec,
    /// Bytes moved by direction
    pub bytes: IntCounterVec,
}

impl StagingMetrics {
    /// Create the counters and register them with `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let transfers = IntCounterVec::new(
            prometheus::opts!("unigrid_staging_transfers", "File transfers by direction and result"),
            &["direction", "result"],
        )?;
        let bytes = IntCounterVec::new(
            prometheus::opts!("unigrid_staging_bytes", "Bytes moved by direction"),
            &["direction"],
        )?;
        registry.register(Box::new(transfers.clone()))?;
        registry.register(Box::new(bytes.clone()))?;
        Ok(Self { transfers, bytes })
    }

    pub(crate) fn record(&self, direction: Direction, summary: &TransferSummary) {
        let label = direction.as_str();
        self.transfers
            .with_label_values(&[label, "ok"])
            .inc_by(summary.files as u64);
        self.transfers
            .with_label_values(&[label, "skipped"])
            .inc_by(summary.skipped as u64);
        self.bytes.with_label_values(&[label]).inc_by(summary.bytes);
    }

    pub(crate) fn record_failure(&self, direction: Direction) {
        self.transfers.with_label_values(&[direction.as_str(), "error"]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_count() {
        let registry = Registry::new();
        let metrics = StagingMetrics::new(&registry).unwrap();
        metrics.record(
            Direction::Download,
            &TransferSummary {
                files: 2,
                skipped: 1,
                bytes: 512,
            },
        );
        metrics.record_failure(Direction::Upload);

        assert_eq!(metrics.transfers.with_label_values(&["download", "ok"]).get(), 2);
        assert_eq!(metrics.transfers.with_label_values(&["upload", "error"]).get(), 1);
        assert_eq!(metrics.bytes.with_label_values(&["download"]).get(), 512);
        assert_eq!(registry.gather().len(), 2);
    }
}
