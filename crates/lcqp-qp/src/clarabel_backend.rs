use clarabel::solver::{
    DefaultSettings, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};
use lcqp_types::Result;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::matrix_utils::{to_csc, to_csc_upper};
use crate::{QpModel, QpSolution, QpStatus, QpWarmStart, SolverBackend};

/// Clarabel-based interior point QP solver (pure Rust, sparse)
pub struct ClarabelSolver {
    verbose: bool,
    max_iter: u32,
    tol_gap_abs: f64,
    tol_gap_rel: f64,
    equality_tol: f64,
}

/// Which side of a model row a Clarabel row encodes
#[derive(Debug, Clone, Copy)]
enum RowKind {
    Equality,
    Lower,
    Upper,
}

impl ClarabelSolver {
    pub fn new() -> Self {
        ClarabelSolver {
            verbose: false,
            max_iter: 200,
            tol_gap_abs: 1e-10,
            tol_gap_rel: 1e-10,
            equality_tol: 1e-12,
        }
    }

    /// Create solver with custom settings
    pub fn with_params(max_iter: u32, tolerance: f64) -> Self {
        ClarabelSolver {
            max_iter,
            tol_gap_abs: tolerance,
            tol_gap_rel: tolerance,
            ..Self::new()
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Default for ClarabelSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverBackend for ClarabelSolver {
    fn solve_qp(&self, model: &QpModel, _warm_start: Option<&QpWarmStart>) -> Result<QpSolution> {
        model.validate()?;

        let n = model.num_vars();
        let m = model.num_constraints();

        // Clarabel form: A_c x + s = b, s in K.
        // Equality rows go first into a zero cone, then every finite side of
        // an inequality row becomes one nonnegative-cone row:
        //   lower: -a x + s = -l
        //   upper:  a x + s =  u
        let mut rows: Vec<(usize, RowKind)> = Vec::with_capacity(2 * m);
        for i in 0..m {
            if model.is_equality_row(i, self.equality_tol) {
                rows.push((i, RowKind::Equality));
            }
        }
        let num_eq = rows.len();
        for i in 0..m {
            if model.is_equality_row(i, self.equality_tol) {
                continue;
            }
            if model.l[i].is_finite() {
                rows.push((i, RowKind::Lower));
            }
            if model.u[i].is_finite() {
                rows.push((i, RowKind::Upper));
            }
        }

        let mut a_ext = DMatrix::zeros(rows.len(), n);
        let mut b = Vec::with_capacity(rows.len());
        for (k, (i, kind)) in rows.iter().enumerate() {
            let (scale, rhs) = match kind {
                RowKind::Equality => (1.0, model.l[*i]),
                RowKind::Lower => (-1.0, -model.l[*i]),
                RowKind::Upper => (1.0, model.u[*i]),
            };
            for j in 0..n {
                a_ext[(k, j)] = scale * model.a[(*i, j)];
            }
            b.push(rhs);
        }

        let mut cones = Vec::new();
        if num_eq > 0 {
            cones.push(SupportedConeT::ZeroConeT(num_eq));
        }
        if rows.len() > num_eq {
            cones.push(SupportedConeT::NonnegativeConeT(rows.len() - num_eq));
        }

        let p_csc = to_csc_upper(&model.p);
        let a_csc = to_csc(&a_ext);

        let mut settings = DefaultSettings::default();
        settings.verbose = self.verbose;
        settings.max_iter = self.max_iter;
        settings.tol_gap_abs = self.tol_gap_abs;
        settings.tol_gap_rel = self.tol_gap_rel;
        settings.presolve_enable = false;

        let mut solver = DefaultSolver::new(
            &p_csc,
            model.q.as_slice(),
            &a_csc,
            &b,
            &cones,
            settings,
        )
        .map_err(|e| lcqp_types::LcqpError::Backend(format!("{:?}", e)))?;
        solver.solve();

        let status = match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => QpStatus::Solved,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                QpStatus::Infeasible
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                QpStatus::Unbounded
            }
            SolverStatus::MaxIterations | SolverStatus::MaxTime => QpStatus::MaxIterations,
            _ => QpStatus::NumericalError,
        };
        debug!(
            status = ?solver.solution.status,
            iterations = solver.info.iterations,
            "clarabel solve finished"
        );

        // Fold cone duals back into one signed multiplier per model row
        let mut y = vec![0.0; m];
        for (k, (i, kind)) in rows.iter().enumerate() {
            let zk = solver.solution.z.get(k).copied().unwrap_or(0.0);
            match kind {
                RowKind::Lower => y[*i] += zk,
                RowKind::Upper | RowKind::Equality => y[*i] -= zk,
            }
        }

        let mut x = solver.solution.x.clone();
        if status.is_solved() {
            clamp_single_variable_rows(model, &mut x);
        }

        Ok(QpSolution {
            x,
            y,
            status,
            objective: solver.solution.obj_val,
            iterations: solver.info.iterations as usize,
        })
    }

    fn name(&self) -> &'static str {
        "clarabel"
    }
}

/// Interior point iterates sit strictly inside the bounds. For rows that
/// bound a single variable, snap that variable onto the bound it overshoots,
/// unless the snapped point violates the coupling rows more than before.
fn clamp_single_variable_rows(model: &QpModel, x: &mut [f64]) {
    let mut clamped = x.to_vec();
    for i in 0..model.num_constraints() {
        let mut nonzero = model
            .a
            .row(i)
            .iter()
            .enumerate()
            .filter(|(_, v)| v.abs() > 1e-14)
            .map(|(idx, v)| (idx, *v))
            .collect::<Vec<_>>();
        if nonzero.len() != 1 {
            continue;
        }
        let (var, coeff) = nonzero.remove(0);
        let (lo, hi) = if coeff > 0.0 {
            (model.l[i] / coeff, model.u[i] / coeff)
        } else {
            (model.u[i] / coeff, model.l[i] / coeff)
        };
        if lo.is_finite() && clamped[var] < lo {
            clamped[var] = lo;
        }
        if hi.is_finite() && clamped[var] > hi {
            clamped[var] = hi;
        }
    }

    let before = model.max_violation(&DVector::from_column_slice(x));
    let after = model.max_violation(&DVector::from_column_slice(&clamped));
    if after <= before {
        x.copy_from_slice(&clamped);
    }
}
