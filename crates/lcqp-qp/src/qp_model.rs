use lcqp_types::{LcqpError, Result};
use nalgebra::{DMatrix, DVector};

/// Convex QP in two-sided form:
/// minimize 0.5 * x^T P x + q^T x
/// subject to l <= A x <= u
///
/// Infinite entries of `l`/`u` mean the side is absent. `l_i == u_i` is an
/// equality row.
#[derive(Debug, Clone)]
pub struct QpModel {
    /// Hessian P (symmetric, PSD or PD depending on the backend)
    pub p: DMatrix<f64>,
    /// Linear term q
    pub q: DVector<f64>,
    /// Constraint matrix A
    pub a: DMatrix<f64>,
    /// Lower bounds l
    pub l: DVector<f64>,
    /// Upper bounds u
    pub u: DVector<f64>,
}

impl QpModel {
    pub fn new(
        p: DMatrix<f64>,
        q: DVector<f64>,
        a: DMatrix<f64>,
        l: DVector<f64>,
        u: DVector<f64>,
    ) -> Self {
        QpModel { p, q, a, l, u }
    }

    /// Model without general constraints.
    pub fn unconstrained(p: DMatrix<f64>, q: DVector<f64>) -> Self {
        let n = q.len();
        QpModel {
            p,
            q,
            a: DMatrix::zeros(0, n),
            l: DVector::zeros(0),
            u: DVector::zeros(0),
        }
    }

    pub fn num_vars(&self) -> usize {
        self.q.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.l.len()
    }

    /// Validate dimensions and bound ordering
    pub fn validate(&self) -> Result<()> {
        let n = self.num_vars();
        let m = self.num_constraints();

        if self.p.nrows() != n || self.p.ncols() != n {
            return Err(LcqpError::InvalidDimensions(format!(
                "P must be {}x{}, got {}x{}",
                n,
                n,
                self.p.nrows(),
                self.p.ncols()
            )));
        }

        if self.a.nrows() != m || self.a.ncols() != n {
            return Err(LcqpError::InvalidDimensions(format!(
                "A must be {}x{}, got {}x{}",
                m,
                n,
                self.a.nrows(),
                self.a.ncols()
            )));
        }

        if self.u.len() != m {
            return Err(LcqpError::InvalidDimensions(format!(
                "u length {} != l length {}",
                self.u.len(),
                m
            )));
        }

        for i in 0..m {
            if self.l[i].is_nan() || self.u[i].is_nan() {
                return Err(LcqpError::MalformedBounds(format!("row {} has a NaN bound", i)));
            }
            if self.l[i] > self.u[i] {
                return Err(LcqpError::MalformedBounds(format!(
                    "row {}: l = {} > u = {}",
                    i, self.l[i], self.u[i]
                )));
            }
        }

        Ok(())
    }

    /// 0.5 * x^T P x + q^T x
    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        0.5 * (x.transpose() * &self.p * x)[(0, 0)] + self.q.dot(x)
    }

    /// Largest bound violation of A x (0 when feasible).
    pub fn max_violation(&self, x: &DVector<f64>) -> f64 {
        let ax = &self.a * x;
        let mut worst: f64 = 0.0;
        for i in 0..ax.len() {
            if self.l[i].is_finite() {
                worst = worst.max(self.l[i] - ax[i]);
            }
            if self.u[i].is_finite() {
                worst = worst.max(ax[i] - self.u[i]);
            }
        }
        worst
    }

    /// Rows whose two bounds coincide within `tol`.
    pub fn is_equality_row(&self, i: usize, tol: f64) -> bool {
        self.l[i].is_finite() && self.u[i].is_finite() && (self.u[i] - self.l[i]).abs() <= tol
    }
}
