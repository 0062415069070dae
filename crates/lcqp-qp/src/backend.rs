use lcqp_types::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::active_set_backend::ActiveSetSolver;
use crate::clarabel_backend::ClarabelSolver;
use crate::qp_model::QpModel;

/// QP solver status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QpStatus {
    Solved,
    Infeasible,
    Unbounded,
    MaxIterations,
    NumericalError,
}

impl QpStatus {
    pub fn is_solved(&self) -> bool {
        matches!(self, QpStatus::Solved)
    }
}

/// Solution from a QP backend.
///
/// Multipliers follow the sign convention `P x + q - A^T y = 0`: a positive
/// `y_i` means the lower bound of row `i` is active, a negative one the
/// upper bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QpSolution {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub status: QpStatus,
    pub objective: f64,
    pub iterations: usize,
}

/// Primal/dual starting point handed to a backend.
#[derive(Debug, Clone, Default)]
pub struct QpWarmStart {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Trait for QP solver backends
///
/// Backends are stateless across calls so one instance can be shared by
/// concurrent solves.
pub trait SolverBackend: Send + Sync {
    /// Solve: minimize 0.5 * x^T P x + q^T x subject to l <= A x <= u
    ///
    /// `Err` is reserved for malformed input; solver outcomes are reported
    /// through [`QpStatus`]. The warm start is a hint that backends may
    /// ignore.
    fn solve_qp(&self, model: &QpModel, warm_start: Option<&QpWarmStart>) -> Result<QpSolution>;

    /// Whether P must be strictly positive definite.
    fn requires_positive_definite(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// Settings shared by all backends built through [`QpBackendChoice`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    pub max_iterations: u32,
    pub tolerance: f64,
    pub verbose: bool,
}

impl Default for BackendSettings {
    fn default() -> Self {
        BackendSettings {
            max_iterations: 10_000,
            tolerance: 1e-9,
            verbose: false,
        }
    }
}

/// Enumerated backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QpBackendChoice {
    /// Dense Goldfarb-Idnani dual active set via `quadprog`.
    #[default]
    DenseActiveSet,
    /// Clarabel interior point on sparse (CSC) data.
    SparseInteriorPoint,
}

impl QpBackendChoice {
    pub fn build(&self, settings: &BackendSettings) -> Arc<dyn SolverBackend> {
        match self {
            // Exact method: no iteration cap or tolerance to pass on.
            QpBackendChoice::DenseActiveSet => Arc::new(ActiveSetSolver::new()),
            QpBackendChoice::SparseInteriorPoint => Arc::new(
                ClarabelSolver::with_params(settings.max_iterations, settings.tolerance)
                    .verbose(settings.verbose),
            ),
        }
    }
}
