use lcqp_qp::{QpWarmStart, SolverBackend};
use lcqp_types::{LcqpError, Result, ReturnStatus, StationarityType};
use nalgebra::DVector;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::SolveContext;
use crate::diagnostics::{CancelToken, DiagnosticsSink, IterationRecord, LoopPhase, TracingSink};
use crate::inner::{self, InnerResult, InnerStatus};
use crate::options::SolverOptions;
use crate::problem::Problem;
use crate::solution::{LcqpSolution, SolveStats, WarmStart};
use crate::stationarity::{classify, is_certified_solution, lcqp_stationarity, penalty_stationarity, transform_duals};
use crate::subproblem::SubproblemBuilder;

/// Penalty method for linear complementarity quadratic programs.
///
/// The solver holds only immutable configuration. Every call to
/// [`LcqpSolver::run`] keeps its state on the calling thread, so one solver
/// can serve concurrent solves.
pub struct LcqpSolver {
    backend: Arc<dyn SolverBackend>,
    options: SolverOptions,
    diagnostics: Arc<dyn DiagnosticsSink>,
    cancel: Option<CancelToken>,
}

impl LcqpSolver {
    /// Solver with the backend selected in `options`.
    pub fn new(options: SolverOptions) -> Result<Self> {
        options.validate()?;
        let backend = options.qp_backend.build(&options.backend_settings());
        Ok(Self::assemble(backend, options))
    }

    /// Solver with a caller-provided QP backend.
    pub fn with_backend(backend: Arc<dyn SolverBackend>, options: SolverOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::assemble(backend, options))
    }

    fn assemble(backend: Arc<dyn SolverBackend>, options: SolverOptions) -> Self {
        LcqpSolver {
            backend,
            options,
            diagnostics: Arc::new(TracingSink),
            cancel: None,
        }
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Solve starting from the problem's own initial guess, if any.
    pub fn run(&self, problem: &Problem) -> LcqpSolution {
        self.run_from(problem, &WarmStart::from_problem(problem))
    }

    /// Solve from an explicit starting point.
    pub fn run_from(&self, problem: &Problem, warm_start: &WarmStart) -> LcqpSolution {
        let n = problem.num_vars();
        let m = problem.num_duals();
        let mut ctx = SolveContext::new(
            problem,
            &self.options,
            self.backend.as_ref(),
            self.diagnostics.as_ref(),
            self.cancel.as_ref(),
        );

        let x0 = match to_vector(warm_start.x.as_deref(), n, "x") {
            Ok(x0) => x0,
            Err(err) => return self.reject(ctx, err),
        };
        let y0 = match to_vector(warm_start.y.as_deref(), m, "y") {
            Ok(y0) => y0,
            Err(err) => return self.reject(ctx, err),
        };

        if let (Some(x), Some(y)) = (&x0, &y0) {
            if is_certified_solution(problem, x, y, &self.options) {
                debug!("warm start is already a solution");
                let rho = warm_start.penalty.filter(|r| r.is_finite()).unwrap_or(self.options.initial_penalty);
                return self.finish(ctx, x.clone(), y.clone(), rho, 0.0, ReturnStatus::SuccessfulReturn, true);
            }
        }

        let builder = match SubproblemBuilder::new(problem, self.backend.requires_positive_definite(), &self.options) {
            Ok(builder) => builder,
            Err(err) => {
                warn!(%err, "cannot build subproblems");
                let x = x0.unwrap_or_else(|| DVector::zeros(n));
                let y = y0.unwrap_or_else(|| DVector::zeros(m));
                return self.finish(ctx, x, y, self.options.initial_penalty, 0.0, ReturnStatus::QpSolverFailed, false);
            }
        };
        let regularization = builder.regularization();

        let mut rho = match warm_start.penalty.filter(|r| r.is_finite()) {
            Some(r) => r.clamp(self.options.initial_penalty, self.options.max_penalty),
            None => self.options.initial_penalty,
        };
        ctx.penalty_history.push(rho);

        // Initial subproblem
        let x_start = x0.clone().unwrap_or_else(|| DVector::zeros(n));
        let y_start = y0.unwrap_or_else(|| DVector::zeros(m));
        let model = if x0.is_none() && self.options.solve_zero_penalty_first {
            builder.build_unpenalized(&x_start)
        } else {
            builder.build(&x_start, rho)
        };
        let qp_warm_start = QpWarmStart {
            x: x_start.iter().copied().collect(),
            y: y_start.iter().copied().collect(),
        };
        let (mut x, mut y) = match ctx.solve_linearized(&builder, &model, &x_start, &qp_warm_start) {
            Ok(solution) => (DVector::from_vec(solution.x), DVector::from_vec(solution.y)),
            Err(_) => {
                return self.finish(
                    ctx,
                    x_start,
                    y_start,
                    rho,
                    regularization,
                    ReturnStatus::InitialSubproblemFailed,
                    false,
                )
            }
        };
        ctx.total_iterations += 1;
        let record = self.outer_record(&ctx, LoopPhase::Initialization, &x, &y, rho);
        ctx.emit(record);

        let status = loop {
            if ctx.should_abort() {
                break ReturnStatus::Aborted;
            }
            if ctx.outer_iterations >= self.options.max_outer_iterations {
                break ReturnStatus::MaxIterationsReached;
            }
            ctx.outer_iterations += 1;

            let InnerResult {
                x: x_inner,
                y: y_inner,
                status: inner_status,
                complementarity,
                ..
            } = inner::run_inner(&mut ctx, &builder, rho, x, y);
            x = x_inner;
            y = y_inner;

            let at_max = rho >= self.options.max_penalty;
            match inner_status {
                InnerStatus::Failed(_) => break ReturnStatus::QpSolverFailed,
                InnerStatus::Aborted => break ReturnStatus::Aborted,
                InnerStatus::Stationary if complementarity <= self.options.complementarity_tolerance => {
                    break ReturnStatus::SuccessfulReturn
                }
                InnerStatus::Stationary if at_max => break ReturnStatus::MaxPenaltyReached,
                InnerStatus::IterationLimit if at_max => break ReturnStatus::MaxIterationsReached,
                _ => {}
            }

            rho = (rho * self.options.penalty_growth_factor).min(self.options.max_penalty);
            ctx.penalty_history.push(rho);
            let record = self.outer_record(&ctx, LoopPhase::PenaltyUpdate, &x, &y, rho);
            ctx.emit(record);
        };

        self.finish(ctx, x, y, rho, regularization, status, false)
    }

    /// Run one fixed-penalty inner loop from `(x0, y0)`, outside the penalty
    /// schedule. `y0` is in penalty form.
    pub fn run_inner(&self, problem: &Problem, rho: f64, x0: &[f64], y0: &[f64]) -> Result<InnerResult> {
        if !(rho.is_finite() && rho >= 0.0) {
            return Err(LcqpError::InvalidOptions(format!("penalty must be finite and nonnegative, got {rho}")));
        }
        let x = to_vector(Some(x0), problem.num_vars(), "x")?.unwrap_or_else(|| DVector::zeros(0));
        let y = to_vector(Some(y0), problem.num_duals(), "y")?.unwrap_or_else(|| DVector::zeros(0));
        let builder = SubproblemBuilder::new(problem, self.backend.requires_positive_definite(), &self.options)?;
        let mut ctx = SolveContext::new(
            problem,
            &self.options,
            self.backend.as_ref(),
            self.diagnostics.as_ref(),
            self.cancel.as_ref(),
        );
        Ok(inner::run_inner(&mut ctx, &builder, rho, x, y))
    }

    fn outer_record(
        &self,
        ctx: &SolveContext<'_>,
        phase: LoopPhase,
        x: &DVector<f64>,
        y: &DVector<f64>,
        rho: f64,
    ) -> IterationRecord {
        let problem = ctx.problem;
        IterationRecord {
            phase,
            outer_iteration: ctx.outer_iterations,
            inner_iteration: 0,
            total_iteration: ctx.total_iterations,
            penalty: rho,
            complementarity: problem.complementarity_residual(x),
            stationarity: penalty_stationarity(problem, x, y, rho).amax(),
            objective: problem.objective(x),
            merit: problem.merit(x, rho),
            step_length: 0.0,
            step_norm: 0.0,
            qp_iterations: ctx.qp_iterations,
        }
    }

    fn reject(&self, ctx: SolveContext<'_>, err: LcqpError) -> LcqpSolution {
        warn!(%err, "invalid warm start");
        let x = DVector::zeros(ctx.problem.num_vars());
        let y = DVector::zeros(ctx.problem.num_duals());
        self.finish(ctx, x, y, self.options.initial_penalty, 0.0, ReturnStatus::InvalidProblem, false)
    }

    /// Assemble the solution. On success the multipliers are converted to
    /// LCQP form (unless `lcqp_duals` says they already are) and classified.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        mut ctx: SolveContext<'_>,
        x: DVector<f64>,
        mut y: DVector<f64>,
        rho: f64,
        regularization: f64,
        status: ReturnStatus,
        lcqp_duals: bool,
    ) -> LcqpSolution {
        let problem = ctx.problem;
        let (stationarity_type, stationarity) = if status.is_success() {
            if !lcqp_duals {
                transform_duals(problem, &x, &mut y, rho);
            }
            let kind = classify(problem, &x, &y, self.options.complementarity_tolerance);
            (kind, lcqp_stationarity(problem, &x, &y).amax())
        } else {
            (StationarityType::NotSolved, penalty_stationarity(problem, &x, &y, rho).amax())
        };

        let mut record = self.outer_record(&ctx, LoopPhase::Terminated, &x, &y, rho);
        record.stationarity = stationarity;
        ctx.emit(record);

        let complementarity = problem.complementarity_residual(&x);
        let objective = problem.objective(&x);
        info!(
            status = %status,
            stationarity_type = %stationarity_type,
            outer = ctx.outer_iterations,
            total = ctx.total_iterations,
            rho,
            compl = complementarity,
            obj = objective,
            "lcqp solve finished"
        );

        let stats = SolveStats {
            outer_iterations: ctx.outer_iterations,
            inner_iterations: ctx.total_iterations,
            qp_iterations: ctx.qp_iterations,
            final_penalty: rho,
            penalty_history: std::mem::take(&mut ctx.penalty_history),
            complementarity,
            stationarity,
            objective,
            regularization,
            last_qp_status: ctx.last_qp_status,
            elapsed_seconds: ctx.elapsed_seconds(),
            trace: std::mem::take(&mut ctx.trace),
        };

        LcqpSolution {
            x: x.iter().copied().collect(),
            y: y.iter().copied().collect(),
            status,
            stationarity_type,
            stats,
        }
    }
}

/// Solve `problem` with a fresh solver built from `options`.
pub fn solve(problem: &Problem, options: SolverOptions) -> Result<LcqpSolution> {
    Ok(LcqpSolver::new(options)?.run(problem))
}

fn to_vector(values: Option<&[f64]>, expected: usize, name: &str) -> Result<Option<DVector<f64>>> {
    match values {
        None => Ok(None),
        Some(v) if v.len() != expected => Err(LcqpError::InvalidDimensions(format!(
            "warm start {name} has length {}, expected {expected}",
            v.len()
        ))),
        Some(v) if v.iter().any(|x| !x.is_finite()) => {
            Err(LcqpError::NonFinite(format!("warm start {name} has non-finite entries")))
        }
        Some(v) => Ok(Some(DVector::from_column_slice(v))),
    }
}
