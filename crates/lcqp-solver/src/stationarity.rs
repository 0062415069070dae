//! Residuals, dual conversion and stationarity classification.
//!
//! Dual vectors are laid out as `[y_A; y_L; y_R]` and follow the sign
//! convention `Q x + g - A^T y_A - L^T y_L - R^T y_R = 0`.

use lcqp_types::StationarityType;
use nalgebra::DVector;

use crate::options::SolverOptions;
use crate::problem::Problem;

/// Q x + g - [A; L; R]^T y
pub fn lcqp_stationarity(problem: &Problem, x: &DVector<f64>, y: &DVector<f64>) -> DVector<f64> {
    let (stacked, _, _) = problem.stacked_constraints();
    problem.hessian() * x + problem.gradient() - stacked.transpose() * y
}

/// Gradient of the Lagrangian of the penalty problem at `rho`.
pub fn penalty_stationarity(
    problem: &Problem,
    x: &DVector<f64>,
    y: &DVector<f64>,
    rho: f64,
) -> DVector<f64> {
    let mut stat = lcqp_stationarity(problem, x, y);
    stat += (problem.complementarity_matrix() * x + problem.complementarity_gradient()) * rho;
    stat
}

/// Convert penalty-problem multipliers into LCQP multipliers in place:
/// `y_L -= rho (R x - lbR)`, `y_R -= rho (L x - lbL)`.
pub fn transform_duals(problem: &Problem, x: &DVector<f64>, y: &mut DVector<f64>, rho: f64) {
    let n_c = problem.num_constraints();
    let n_comp = problem.num_complementarities();
    let (lx, rx) = problem.shifted_pairs(x);
    for i in 0..n_comp {
        y[n_c + i] -= rho * rx[i];
        y[n_c + n_comp + i] -= rho * lx[i];
    }
}

/// Classify a complementary point from the multipliers of its bi-active
/// pairs. `y` must already be in LCQP form.
pub fn classify(problem: &Problem, x: &DVector<f64>, y: &DVector<f64>, tol: f64) -> StationarityType {
    let n_c = problem.num_constraints();
    let n_comp = problem.num_complementarities();
    let (lx, rx) = problem.shifted_pairs(x);

    let mut strong = true;
    let mut mordukhovich = true;

    for i in (0..n_comp).filter(|&i| lx[i] <= tol && rx[i] <= tol) {
        let (yl, yr) = (y[n_c + i], y[n_c + n_comp + i]);
        let product = yl * yr;
        let smallest = yl.min(yr);

        if smallest < 0.0 {
            strong = false;
        }

        if product.abs() >= tol && smallest <= 0.0 {
            if product <= tol {
                return StationarityType::Weak;
            }
            mordukhovich = false;
        }
    }

    if strong {
        StationarityType::Strong
    } else if mordukhovich {
        StationarityType::Mordukhovich
    } else {
        StationarityType::Clarke
    }
}

/// Whether `(x, y)` (LCQP-form duals) is already a solution: primal
/// feasible, complementary, stationary, with consistent multiplier signs.
pub fn is_certified_solution(
    problem: &Problem,
    x: &DVector<f64>,
    y: &DVector<f64>,
    options: &SolverOptions,
) -> bool {
    if x.len() != problem.num_vars() || y.len() != problem.num_duals() {
        return false;
    }

    let stat_tol = options.stationarity_tolerance;
    let feas_tol = stat_tol * (1.0 + x.amax());

    if problem.max_violation(x) > feas_tol {
        return false;
    }
    if problem.complementarity_residual(x) > options.complementarity_tolerance {
        return false;
    }
    if lcqp_stationarity(problem, x, y).amax() > stat_tol {
        return false;
    }

    // General rows: a multiplier may only be nonzero on the active side
    let (lb_a, ub_a) = problem.constraint_bounds();
    let n_c = problem.num_constraints();
    let ax = problem.constraint_matrix() * x;
    for i in 0..n_c {
        if y[i] > stat_tol && (ax[i] - lb_a[i]).abs() > feas_tol {
            return false;
        }
        if y[i] < -stat_tol && (ax[i] - ub_a[i]).abs() > feas_tol {
            return false;
        }
    }

    // Complementarity sides strictly inside their bounds carry no multiplier
    let n_comp = problem.num_complementarities();
    let (lx, rx) = problem.shifted_pairs(x);
    let (lb_l, ub_l) = problem.left_bounds();
    let (lb_r, ub_r) = problem.right_bounds();
    for i in 0..n_comp {
        let sides = [
            (lx[i], ub_l[i] - lb_l[i] - lx[i], y[n_c + i]),
            (rx[i], ub_r[i] - lb_r[i] - rx[i], y[n_c + n_comp + i]),
        ];
        for (above_lower, below_upper, yi) in sides {
            let lower_active = above_lower <= feas_tol;
            let upper_active = below_upper <= feas_tol;
            if !lower_active && !upper_active && yi.abs() > stat_tol {
                return false;
            }
            if !lower_active && upper_active && yi > stat_tol {
                return false;
            }
        }
    }

    true
}
