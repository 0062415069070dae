use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Where in the algorithm a record was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopPhase {
    /// The initial subproblem that makes the iterate feasible.
    Initialization,
    /// One subproblem solve at fixed penalty.
    Inner,
    /// Penalty increased after an inner loop finished.
    PenaltyUpdate,
    /// Final record of a run.
    Terminated,
}

/// Per-iteration diagnostics record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub phase: LoopPhase,
    pub outer_iteration: usize,
    pub inner_iteration: usize,
    pub total_iteration: usize,
    pub penalty: f64,
    pub complementarity: f64,
    pub stationarity: f64,
    pub objective: f64,
    pub merit: f64,
    pub step_length: f64,
    pub step_norm: f64,
    pub qp_iterations: usize,
}

impl IterationRecord {
    pub fn is_outer(&self) -> bool {
        !matches!(self.phase, LoopPhase::Inner)
    }
}

/// Receives iteration records. Sinks are observational and must not block
/// for long.
pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, record: &IterationRecord);
}

/// Forwards records to `tracing`: outer records at info, inner at debug.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, r: &IterationRecord) {
        if r.is_outer() {
            info!(
                phase = ?r.phase,
                outer = r.outer_iteration,
                total = r.total_iteration,
                rho = r.penalty,
                compl = r.complementarity,
                stat = r.stationarity,
                obj = r.objective,
                "outer iterate"
            );
        } else {
            debug!(
                outer = r.outer_iteration,
                inner = r.inner_iteration,
                rho = r.penalty,
                compl = r.complementarity,
                stat = r.stationarity,
                merit = r.merit,
                alpha = r.step_length,
                step = r.step_norm,
                qp_iter = r.qp_iterations,
                "inner iterate"
            );
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&self, _record: &IterationRecord) {}
}

/// Collects records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<IterationRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<IterationRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, record: &IterationRecord) {
        let mut guard = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(record.clone());
    }
}

/// Cooperative cancellation flag, checked at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(phase: LoopPhase) -> IterationRecord {
        IterationRecord {
            phase,
            outer_iteration: 1,
            inner_iteration: 2,
            total_iteration: 3,
            penalty: 0.01,
            complementarity: 0.5,
            stationarity: 1e-3,
            objective: -1.0,
            merit: -0.9,
            step_length: 1.0,
            step_norm: 0.1,
            qp_iterations: 2,
        }
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.record(&record(LoopPhase::Inner));
        sink.record(&record(LoopPhase::PenaltyUpdate));
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(!records[0].is_outer());
        assert!(records[1].is_outer());
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_record_serializes() {
        let json = serde_json::to_string(&record(LoopPhase::Initialization)).unwrap();
        assert!(json.contains("\"Initialization\""));
    }
}
