//! Fixed-penalty inner loop.

use lcqp_qp::{QpStatus, QpWarmStart};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::context::SolveContext;
use crate::diagnostics::{IterationRecord, LoopPhase};
use crate::options::EPS;
use crate::problem::Problem;
use crate::stationarity::penalty_stationarity;
use crate::subproblem::SubproblemBuilder;

/// How an inner loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InnerStatus {
    /// Stationary for the penalty problem at the current penalty.
    Stationary,
    /// Complementarity stagnated; a larger penalty is wanted.
    PenaltyIncreaseRequested,
    IterationLimit,
    /// Subproblem failed. `None` when the backend rejected the model.
    Failed(Option<QpStatus>),
    Aborted,
}

/// Iterate and residuals at the end of an inner loop. `y` holds penalty-form
/// multipliers.
#[derive(Debug, Clone)]
pub struct InnerResult {
    pub x: DVector<f64>,
    pub y: DVector<f64>,
    pub status: InnerStatus,
    pub iterations: usize,
    pub stationarity: f64,
    pub complementarity: f64,
}

/// Sliding window of complementarity values used to detect stagnation.
#[derive(Debug)]
struct StagnationWindow {
    window: usize,
    eta: f64,
    values: VecDeque<f64>,
}

impl StagnationWindow {
    fn new(window: usize, eta: f64) -> Self {
        StagnationWindow {
            window,
            eta,
            values: VecDeque::with_capacity(window),
        }
    }

    /// Record `current`; true when it failed to drop below `eta` times every
    /// value in the window. Never fires while `satisfied`.
    fn push(&mut self, current: f64, satisfied: bool) -> bool {
        if self.window == 0 {
            return false;
        }
        if self.values.len() < self.window {
            self.values.push_back(current);
            return false;
        }
        let stagnating = !satisfied && self.values.iter().all(|&prev| current >= self.eta * prev);
        self.values.pop_front();
        self.values.push_back(current);
        stagnating
    }
}

/// Exact minimizer of the quadratic merit along `p`, capped at 1.
///
/// Along the ray the merit is `m(x) + alpha lk + 0.5 alpha^2 qk`. A
/// non-descent direction is taken in full only when it raises the merit by
/// no more than `allowance` (absolute), which lets the iteration leave points
/// where the linearization is flat.
pub(crate) fn step_length(
    problem: &Problem,
    x: &DVector<f64>,
    p: &DVector<f64>,
    rho: f64,
    allowance: f64,
) -> f64 {
    let curvature = problem.hessian() * p + (problem.complementarity_matrix() * p) * rho;
    let qk = p.dot(&curvature);
    let gradient = problem.hessian() * x
        + problem.gradient()
        + (problem.complementarity_matrix() * x + problem.complementarity_gradient()) * rho;
    let lk = p.dot(&gradient);

    if lk < 0.0 {
        if qk > 0.0 {
            (-lk / qk).min(1.0)
        } else {
            1.0
        }
    } else if lk + 0.5 * qk <= allowance {
        1.0
    } else {
        0.0
    }
}

/// Deterministic relative nudge of size `EPS`, cycling -1, 0, +1 over the
/// components. Moves iterates off symmetric saddles of the penalty.
pub(crate) fn perturb(x: &mut DVector<f64>, iteration: usize) {
    for (i, xi) in x.iter_mut().enumerate() {
        let sign = ((i + iteration) % 3) as f64 - 1.0;
        *xi += sign * EPS * xi.abs().max(1.0);
    }
}

/// Solve linearized subproblems at fixed `rho` until the iterate is
/// stationary, stagnates, or a limit is hit.
pub(crate) fn run_inner(
    ctx: &mut SolveContext<'_>,
    builder: &SubproblemBuilder,
    rho: f64,
    mut x: DVector<f64>,
    mut y: DVector<f64>,
) -> InnerResult {
    let problem = ctx.problem;
    let options = ctx.options;
    let can_grow = rho < options.max_penalty;
    let perturb_step = options.perturb_step && problem.num_complementarities() > 0;
    let mut window = StagnationWindow::new(options.dynamic_penalty_window, options.dynamic_penalty_eta);

    let mut iterations = 0;
    let mut stationarity = penalty_stationarity(problem, &x, &y, rho).amax();
    let mut complementarity = problem.complementarity_residual(&x);

    let status = loop {
        if ctx.should_abort() {
            break InnerStatus::Aborted;
        }

        // Merit may rise by at most the tolerance over the unperturbed
        // iterate, nudge and step together.
        let reference = problem.merit(&x, rho);
        let budget = options.merit_tolerance * reference.abs().max(1.0);

        // Nudge before linearizing so that deviations from a symmetric
        // saddle survive a stationary exit and grow once rho is large.
        if perturb_step {
            let mut nudged = x.clone();
            perturb(&mut nudged, ctx.total_iterations);
            if problem.merit(&nudged, rho) - reference <= budget {
                x = nudged;
            } else {
                debug!(rho, iteration = ctx.total_iterations, "perturbation raises the merit, skipped");
            }
        }
        let allowance = reference + budget - problem.merit(&x, rho);

        let model = builder.build(&x, rho);
        let warm_start = QpWarmStart {
            x: x.iter().copied().collect(),
            y: y.iter().copied().collect(),
        };
        let qp_before = ctx.qp_iterations;
        let solution = match ctx.solve_linearized(builder, &model, &x, &warm_start) {
            Ok(solution) => solution,
            Err(status) => break InnerStatus::Failed(status),
        };
        iterations += 1;
        ctx.total_iterations += 1;

        let p = DVector::from_vec(solution.x) - &x;
        let alpha = step_length(problem, &x, &p, rho, allowance);
        x.axpy(alpha, &p, 1.0);
        y = DVector::from_vec(solution.y);

        let step_norm = alpha * p.amax();
        stationarity = penalty_stationarity(problem, &x, &y, rho).amax();
        complementarity = problem.complementarity_residual(&x);

        ctx.emit(IterationRecord {
            phase: LoopPhase::Inner,
            outer_iteration: ctx.outer_iterations,
            inner_iteration: iterations,
            total_iteration: ctx.total_iterations,
            penalty: rho,
            complementarity,
            stationarity,
            objective: problem.objective(&x),
            merit: problem.merit(&x, rho),
            step_length: alpha,
            step_norm,
            qp_iterations: ctx.qp_iterations - qp_before,
        });

        if stationarity <= options.stationarity_tolerance || step_norm <= options.step_tolerance {
            break InnerStatus::Stationary;
        }

        let satisfied = complementarity <= options.complementarity_tolerance;
        if can_grow && window.push(complementarity, satisfied) {
            break InnerStatus::PenaltyIncreaseRequested;
        }

        if iterations >= options.max_inner_iterations {
            break InnerStatus::IterationLimit;
        }
    };

    InnerResult {
        x,
        y,
        status,
        iterations,
        stationarity,
        complementarity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn warm_up() -> Problem {
        Problem::builder(
            DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 2.0])),
            DVector::from_vec(vec![-2.0, -2.0]),
        )
        .complementarity(
            DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            DMatrix::from_row_slice(1, 2, &[0.0, 1.0]),
        )
        .build()
        .unwrap()
    }

    #[test]
    fn test_window_fills_before_firing() {
        let mut window = StagnationWindow::new(3, 0.9);
        assert!(!window.push(1.0, false));
        assert!(!window.push(1.0, false));
        assert!(!window.push(1.0, false));
        // Full window, no decrease
        assert!(window.push(1.0, false));
        // Strong decrease relative to every stored value
        assert!(!window.push(0.5, false));
    }

    #[test]
    fn test_window_silent_when_satisfied_or_disabled() {
        let mut window = StagnationWindow::new(1, 0.9);
        assert!(!window.push(0.0, true));
        assert!(!window.push(0.0, true));

        let mut disabled = StagnationWindow::new(0, 0.9);
        for _ in 0..10 {
            assert!(!disabled.push(1.0, false));
        }
    }

    #[test]
    fn test_step_length_exact_minimizer() {
        let problem = warm_up();
        // rho = 0: merit is |x - 1|^2 - 2, minimizer along p from origin
        let x = DVector::zeros(2);
        let p = DVector::from_vec(vec![2.0, 2.0]);
        let alpha = step_length(&problem, &x, &p, 0.0, 1e-13);
        assert!((alpha - 0.5).abs() < 1e-15);

        // Full step when the minimizer lies beyond 1
        let p = DVector::from_vec(vec![0.5, 0.5]);
        assert_eq!(step_length(&problem, &x, &p, 0.0, 1e-13), 1.0);
    }

    #[test]
    fn test_step_length_rejects_ascent() {
        let problem = warm_up();
        let x = DVector::from_vec(vec![1.0, 1.0]);
        let p = DVector::from_vec(vec![1.0, 0.0]);
        assert_eq!(step_length(&problem, &x, &p, 0.0, 1e-13), 0.0);
        // Zero step is trivially accepted
        assert_eq!(step_length(&problem, &x, &DVector::zeros(2), 0.0, 1e-13), 1.0);
    }

    #[test]
    fn test_perturbation_is_tiny_and_deterministic() {
        let mut a = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let mut b = a.clone();
        perturb(&mut a, 4);
        perturb(&mut b, 4);
        assert_eq!(a, b);
        // (i + 4) % 3 - 1 = 0, 1, -1
        assert_eq!(a[0], 1.0);
        assert!(a[1] > 1.0 && a[1] - 1.0 <= 2.0 * EPS);
        assert!(a[2] < 1.0 && 1.0 - a[2] <= 2.0 * EPS);
    }
}
