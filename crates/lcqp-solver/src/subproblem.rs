use lcqp_qp::matrix_utils::{is_positive_definite, is_positive_semidefinite, max_abs_diagonal};
use lcqp_qp::QpModel;
use lcqp_types::{LcqpError, Result};
use nalgebra::{DMatrix, DVector};
use tracing::warn;

use crate::options::SolverOptions;
use crate::problem::Problem;

/// Relative tolerance for the recession-ray test.
const RAY_TOL: f64 = 1e-9;

/// Builds the convex QP solved at every iterate.
///
/// The bilinear penalty is linearized around the current iterate, so the
/// subproblem Hessian is Q itself and only the gradient depends on `x_k` and
/// `rho`:
///
/// ```text
/// minimize    0.5 x^T (Q + delta I) x + (g + rho (C x_k + g_phi) - delta x_k)^T x
/// subject to  [lbA; lbL; lbR] <= [A; L; R] x <= [ubA; ubL; ubR]
/// ```
///
/// `delta` is a proximal shift, zero unless Q is not acceptable to the
/// backend. It leaves fixed points and descent directions of the iteration
/// unchanged.
#[derive(Debug, Clone)]
pub struct SubproblemBuilder {
    hessian: DMatrix<f64>,
    regularization: f64,
    gradient: DVector<f64>,
    compl_matrix: DMatrix<f64>,
    compl_gradient: DVector<f64>,
    constraints: DMatrix<f64>,
    lower: DVector<f64>,
    upper: DVector<f64>,
}

impl SubproblemBuilder {
    /// Fails with [`LcqpError::Regularization`] when no shift within the
    /// configured number of attempts makes Q acceptable.
    pub fn new(problem: &Problem, requires_pd: bool, options: &SolverOptions) -> Result<Self> {
        let q = problem.hessian();
        let n = problem.num_vars();
        let scale = max_abs_diagonal(q).max(1.0);
        let psd_tol = 1e-12 * scale;

        let acceptable = |m: &DMatrix<f64>| {
            if requires_pd {
                is_positive_definite(m)
            } else {
                is_positive_semidefinite(m, psd_tol)
            }
        };

        let mut regularization = 0.0;
        if !acceptable(q) {
            let mut delta = options.regularization_initial * scale;
            let mut found = false;
            for _ in 0..options.regularization_max_attempts {
                let shifted = q + DMatrix::identity(n, n) * delta;
                if acceptable(&shifted) {
                    found = true;
                    break;
                }
                delta *= options.regularization_growth;
            }
            if !found {
                return Err(LcqpError::Regularization(format!(
                    "Q not acceptable after {} attempts (last shift {:e})",
                    options.regularization_max_attempts,
                    delta / options.regularization_growth
                )));
            }
            warn!(delta, requires_pd, "regularizing subproblem Hessian");
            regularization = delta;
        }

        let (a, l, u) = problem.stacked_constraints();
        Ok(SubproblemBuilder {
            hessian: q + DMatrix::identity(n, n) * regularization,
            regularization,
            gradient: problem.gradient().clone(),
            compl_matrix: problem.complementarity_matrix().clone(),
            compl_gradient: problem.complementarity_gradient().clone(),
            constraints: a.clone(),
            lower: l.clone(),
            upper: u.clone(),
        })
    }

    /// Diagonal shift applied to Q (0 when none was needed).
    pub fn regularization(&self) -> f64 {
        self.regularization
    }

    /// Gradient of the penalty subproblem linearized at `x`.
    pub fn linearized_gradient(&self, x: &DVector<f64>, rho: f64) -> DVector<f64> {
        let mut gk = &self.gradient + (&self.compl_matrix * x + &self.compl_gradient) * rho;
        if self.regularization > 0.0 {
            gk.axpy(-self.regularization, x, 1.0);
        }
        gk
    }

    /// Subproblem at iterate `x` and penalty `rho`.
    pub fn build(&self, x: &DVector<f64>, rho: f64) -> QpModel {
        self.model(self.linearized_gradient(x, rho))
    }

    /// Subproblem without the penalty term: the plain QP relaxation of the
    /// LCQP, proximal around `x` if regularized.
    pub fn build_unpenalized(&self, x: &DVector<f64>) -> QpModel {
        let mut gk = self.gradient.clone();
        if self.regularization > 0.0 {
            gk.axpy(-self.regularization, x, 1.0);
        }
        self.model(gk)
    }

    /// Whether `step`, taken from `x` to the solution of `model` (built at
    /// `x`), exposes a ray along which the unshifted subproblem is unbounded
    /// below: Q `step` = 0, the linear term decreases along it and no finite
    /// bound stops it.
    ///
    /// The proximal shift turns such a subproblem into a bounded one whose
    /// solution drifts by `-gk / delta` per call, so without this check the
    /// drift is mistaken for progress. Always false without a shift.
    pub fn is_unbounded_ray(&self, model: &QpModel, x: &DVector<f64>, step: &DVector<f64>) -> bool {
        if self.regularization == 0.0 {
            return false;
        }
        let size = step.amax();
        if size == 0.0 || !size.is_finite() {
            return false;
        }
        let d = step / size;

        let mut qd = &self.hessian * &d;
        qd.axpy(-self.regularization, &d, 1.0);
        if qd.amax() > RAY_TOL * max_abs_diagonal(&self.hessian).max(1.0) {
            return false;
        }

        let mut linear = model.q.clone();
        linear.axpy(self.regularization, x, 1.0);
        if linear.dot(&d) >= -RAY_TOL * linear.amax().max(1.0) {
            return false;
        }

        let ad = &self.constraints * &d;
        ad.iter().enumerate().all(|(i, v)| {
            let tol = RAY_TOL * self.constraints.row(i).amax().max(1.0);
            (!self.lower[i].is_finite() || *v >= -tol) && (!self.upper[i].is_finite() || *v <= tol)
        })
    }

    fn model(&self, gradient: DVector<f64>) -> QpModel {
        QpModel::new(
            self.hessian.clone(),
            gradient,
            self.constraints.clone(),
            self.lower.clone(),
            self.upper.clone(),
        )
    }
}
