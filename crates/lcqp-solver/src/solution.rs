use lcqp_qp::QpStatus;
use lcqp_types::{ReturnStatus, StationarityType};
use serde::{Deserialize, Serialize};

use crate::diagnostics::IterationRecord;
use crate::problem::Problem;

/// Output statistics of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveStats {
    /// Penalty levels whose inner loop was run.
    pub outer_iterations: usize,
    /// Subproblem solves, including the initial one.
    pub inner_iterations: usize,
    /// Iterations reported by the QP backend, summed.
    pub qp_iterations: usize,
    pub final_penalty: f64,
    /// Every penalty value used, in order.
    pub penalty_history: Vec<f64>,
    pub complementarity: f64,
    pub stationarity: f64,
    pub objective: f64,
    /// Diagonal shift applied to Q.
    pub regularization: f64,
    pub last_qp_status: Option<QpStatus>,
    pub elapsed_seconds: f64,
    /// Filled only with `store_steps`.
    pub trace: Vec<IterationRecord>,
}

/// Result of an LCQP solve. Always carries an iterate; check `status` to
/// learn what it means.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcqpSolution {
    pub x: Vec<f64>,
    /// Multipliers `[y_A; y_L; y_R]`, in LCQP form after a successful solve
    /// and in penalty form otherwise.
    pub y: Vec<f64>,
    pub status: ReturnStatus,
    pub stationarity_type: StationarityType,
    pub stats: SolveStats,
}

impl LcqpSolution {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Multipliers of the general constraints (box rows included).
    pub fn constraint_duals<'s>(&'s self, problem: &Problem) -> &'s [f64] {
        &self.y[..problem.num_constraints().min(self.y.len())]
    }

    /// Multipliers of the L and R sides.
    pub fn complementarity_duals<'s>(&'s self, problem: &Problem) -> (&'s [f64], &'s [f64]) {
        let n_c = problem.num_constraints();
        let n_comp = problem.num_complementarities();
        if self.y.len() < n_c + 2 * n_comp {
            return (&[], &[]);
        }
        (&self.y[n_c..n_c + n_comp], &self.y[n_c + n_comp..n_c + 2 * n_comp])
    }

    /// Warm start that resumes from this solution at its final penalty.
    pub fn warm_start(&self) -> WarmStart {
        WarmStart {
            x: Some(self.x.clone()),
            y: Some(self.y.clone()),
            penalty: Some(self.stats.final_penalty),
        }
    }
}

/// Explicit starting point for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmStart {
    pub x: Option<Vec<f64>>,
    pub y: Option<Vec<f64>>,
    /// Starting penalty, clamped to `[initial_penalty, max_penalty]`.
    pub penalty: Option<f64>,
}

impl WarmStart {
    pub fn from_problem(problem: &Problem) -> Self {
        WarmStart {
            x: problem.x0().map(|v| v.iter().copied().collect()),
            y: problem.y0().map(|v| v.iter().copied().collect()),
            penalty: None,
        }
    }

    pub fn primal(x: Vec<f64>) -> Self {
        WarmStart {
            x: Some(x),
            ..Default::default()
        }
    }
}
