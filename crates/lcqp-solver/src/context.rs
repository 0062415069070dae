use lcqp_qp::{QpModel, QpSolution, QpStatus, QpWarmStart, SolverBackend};
use nalgebra::DVector;
use std::time::Instant;
use tracing::{debug, warn};

use crate::diagnostics::{CancelToken, DiagnosticsSink, IterationRecord};
use crate::options::{SolverOptions, Verbosity};
use crate::problem::Problem;
use crate::subproblem::SubproblemBuilder;

/// Mutable bookkeeping for one run. Lives on the stack of the calling
/// thread; nothing in it is shared between runs.
pub(crate) struct SolveContext<'a> {
    pub problem: &'a Problem,
    pub options: &'a SolverOptions,
    backend: &'a dyn SolverBackend,
    sink: &'a dyn DiagnosticsSink,
    cancel: Option<&'a CancelToken>,
    started: Instant,
    pub outer_iterations: usize,
    pub total_iterations: usize,
    pub qp_iterations: usize,
    pub last_qp_status: Option<QpStatus>,
    pub penalty_history: Vec<f64>,
    pub trace: Vec<IterationRecord>,
}

impl<'a> SolveContext<'a> {
    pub fn new(
        problem: &'a Problem,
        options: &'a SolverOptions,
        backend: &'a dyn SolverBackend,
        sink: &'a dyn DiagnosticsSink,
        cancel: Option<&'a CancelToken>,
    ) -> Self {
        SolveContext {
            problem,
            options,
            backend,
            sink,
            cancel,
            started: Instant::now(),
            outer_iterations: 0,
            total_iterations: 0,
            qp_iterations: 0,
            last_qp_status: None,
            penalty_history: Vec::new(),
            trace: Vec::new(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Cancellation requested or wall-clock budget spent.
    pub fn should_abort(&self) -> bool {
        if self.cancel.map_or(false, |c| c.is_cancelled()) {
            debug!("solve cancelled");
            return true;
        }
        match self.options.time_limit_seconds {
            Some(limit) if self.elapsed_seconds() > limit => {
                debug!(limit, "time limit reached");
                true
            }
            _ => false,
        }
    }

    /// Solve one subproblem. `Err` carries the backend status when it was
    /// not `Solved`, or `None` when the backend rejected the model.
    fn solve_subproblem(
        &mut self,
        model: &QpModel,
        warm_start: &QpWarmStart,
    ) -> std::result::Result<QpSolution, Option<QpStatus>> {
        match self.backend.solve_qp(model, Some(warm_start)) {
            Ok(solution) => {
                self.qp_iterations += solution.iterations;
                self.last_qp_status = Some(solution.status);
                if solution.status.is_solved() {
                    Ok(solution)
                } else {
                    warn!(backend = self.backend.name(), status = ?solution.status, "subproblem not solved");
                    Err(Some(solution.status))
                }
            }
            Err(err) => {
                warn!(backend = self.backend.name(), %err, "subproblem rejected");
                Err(None)
            }
        }
    }

    /// Solve a subproblem built by `builder` at `x`. A solved shifted
    /// subproblem whose step is an unbounded ray of the unshifted one is
    /// reported as `Unbounded`, the status an unshifted backend would give.
    pub fn solve_linearized(
        &mut self,
        builder: &SubproblemBuilder,
        model: &QpModel,
        x: &DVector<f64>,
        warm_start: &QpWarmStart,
    ) -> std::result::Result<QpSolution, Option<QpStatus>> {
        let solution = self.solve_subproblem(model, warm_start)?;
        let step = DVector::from_column_slice(&solution.x) - x;
        if builder.is_unbounded_ray(model, x, &step) {
            warn!(backend = self.backend.name(), "subproblem unbounded below the proximal shift");
            self.last_qp_status = Some(QpStatus::Unbounded);
            return Err(Some(QpStatus::Unbounded));
        }
        Ok(solution)
    }

    /// Store and forward a record, filtered by verbosity.
    pub fn emit(&mut self, record: IterationRecord) {
        let forward = match self.options.verbosity {
            Verbosity::None => false,
            Verbosity::OuterLoopIterates => record.is_outer(),
            Verbosity::InnerLoopIterates | Verbosity::SubproblemSolverIterates => true,
        };
        if forward {
            self.sink.record(&record);
        }
        if self.options.store_steps {
            self.trace.push(record);
        }
    }
}
