use lcqp_types::Result;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::{QpModel, QpSolution, QpStatus, QpWarmStart, SolverBackend};

/// Dense dual active-set QP solver on top of `quadprog` (Goldfarb-Idnani).
///
/// Two-sided rows `l <= a x <= u` are split into the `A1 x = b1`,
/// `A2 x <= b2` layout the crate expects and the multipliers are folded back
/// into one signed value per row. P must be positive definite.
///
/// A warm start is used as an active-set guess: rows with a nonzero
/// multiplier are held at the bound the sign points to and the resulting
/// equality-constrained KKT system is solved directly. If that point is
/// primal and dual feasible it is the solution and no active-set change was
/// needed, so it reports zero iterations. Otherwise the cold solve runs.
pub struct ActiveSetSolver {
    feasibility_tol: f64,
    equality_tol: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Equality,
    Lower,
    Upper,
}

/// Model rows in `quadprog` form: equalities first, then `<=` half-spaces,
/// all stored row-major.
struct HalfSpaces {
    amat: Vec<f64>,
    bvec: Vec<f64>,
    meq: usize,
    origin: Vec<(usize, Side)>,
}

impl HalfSpaces {
    /// `None` if a zero row has bounds that exclude zero.
    fn from_model(model: &QpModel, equality_tol: f64) -> Option<Self> {
        let n = model.num_vars();
        let mut equalities = Vec::new();
        let mut inequalities = Vec::new();

        for i in 0..model.num_constraints() {
            let (lo, hi) = (model.l[i], model.u[i]);
            if model.a.row(i).iter().all(|v| *v == 0.0) {
                if lo > equality_tol || hi < -equality_tol {
                    return None;
                }
                continue;
            }
            if model.is_equality_row(i, equality_tol) {
                equalities.push((i, Side::Equality, 1.0, lo));
                continue;
            }
            if lo.is_finite() {
                inequalities.push((i, Side::Lower, -1.0, -lo));
            }
            if hi.is_finite() {
                inequalities.push((i, Side::Upper, 1.0, hi));
            }
        }

        let meq = equalities.len();
        let rows = equalities.len() + inequalities.len();
        let mut out = HalfSpaces {
            amat: Vec::with_capacity(rows * n),
            bvec: Vec::with_capacity(rows),
            meq,
            origin: Vec::with_capacity(rows),
        };
        for (row, side, sign, rhs) in equalities.into_iter().chain(inequalities) {
            out.amat.extend(model.a.row(row).iter().map(|v| sign * v));
            out.bvec.push(rhs);
            out.origin.push((row, side));
        }
        Some(out)
    }

    /// Fold half-space multipliers into per-row values with the
    /// `P x + q - A^T y = 0` convention.
    ///
    /// `quadprog` reports `P x + q + A2^T lambda = 0` with `lambda >= 0` for
    /// the inequalities; equality multipliers lose their sign, so they are
    /// recovered from the stationarity residual instead.
    fn row_multipliers(&self, model: &QpModel, x: &DVector<f64>, lagr: &[f64]) -> Vec<f64> {
        let mut y = DVector::zeros(model.num_constraints());
        for (k, &(row, side)) in self.origin.iter().enumerate().skip(self.meq) {
            match side {
                Side::Lower => y[row] += lagr[k],
                Side::Upper => y[row] -= lagr[k],
                Side::Equality => {}
            }
        }

        if self.meq > 0 {
            let residual = &model.p * x + &model.q - model.a.transpose() * &y;
            let mut normals = DMatrix::zeros(model.num_vars(), self.meq);
            for (j, &(row, _)) in self.origin.iter().take(self.meq).enumerate() {
                normals.set_column(j, &model.a.row(row).transpose());
            }
            match normals.svd(true, true).solve(&residual, 1e-14) {
                Ok(eq) => {
                    for (j, &(row, _)) in self.origin.iter().take(self.meq).enumerate() {
                        y[row] = eq[j];
                    }
                }
                Err(reason) => debug!(reason, "active set: equality multipliers unresolved"),
            }
        }
        y.iter().copied().collect()
    }
}

impl ActiveSetSolver {
    pub fn new() -> Self {
        ActiveSetSolver {
            feasibility_tol: 1e-12,
            equality_tol: 1e-12,
        }
    }

    fn solve_cold(&self, model: &QpModel) -> QpSolution {
        let n = model.num_vars();
        let Some(split) = HalfSpaces::from_model(model, self.equality_tol) else {
            return failed(model, QpStatus::Infeasible);
        };

        // Row-major copy; quadprog overwrites it with the inverse factor.
        let mut qmat = model.p.transpose().as_slice().to_vec();
        let result = quadprog::solve_qp(
            &mut qmat,
            model.q.as_slice(),
            &split.amat,
            &split.bvec,
            split.meq,
            false,
        );

        match result {
            Ok(solution) => {
                let x = DVector::from_vec(solution.sol);
                let y = split.row_multipliers(model, &x, &solution.lagr);
                QpSolution {
                    objective: model.objective(&x),
                    x: x.iter().copied().collect(),
                    y,
                    status: QpStatus::Solved,
                    iterations: solution.iter,
                }
            }
            Err(reason) => {
                debug!(reason, n, "active set: quadprog rejected the subproblem");
                let status = if reason.contains("infeasible") {
                    QpStatus::Infeasible
                } else {
                    QpStatus::NumericalError
                };
                failed(model, status)
            }
        }
    }

    /// Solve the KKT system on the active set guessed from `warm.y` and keep
    /// the point only if it is a KKT point of the full model.
    fn solve_hot(&self, model: &QpModel, warm: &QpWarmStart) -> Option<QpSolution> {
        let n = model.num_vars();
        let m = model.num_constraints();
        if warm.y.len() != m {
            return None;
        }

        let active: Vec<(usize, f64)> = (0..m)
            .filter_map(|i| {
                if model.is_equality_row(i, self.equality_tol) {
                    Some((i, model.l[i]))
                } else if warm.y[i] > 0.0 && model.l[i].is_finite() {
                    Some((i, model.l[i]))
                } else if warm.y[i] < 0.0 && model.u[i].is_finite() {
                    Some((i, model.u[i]))
                } else {
                    None
                }
            })
            .collect();
        let k = active.len();
        if k > n {
            return None;
        }

        let mut kkt = DMatrix::zeros(n + k, n + k);
        kkt.view_mut((0, 0), (n, n)).copy_from(&model.p);
        let mut rhs = DVector::zeros(n + k);
        rhs.rows_mut(0, n).copy_from(&(-&model.q));
        for (j, &(row, bound)) in active.iter().enumerate() {
            for c in 0..n {
                let a = model.a[(row, c)];
                kkt[(c, n + j)] = -a;
                kkt[(n + j, c)] = a;
            }
            rhs[n + j] = bound;
        }

        let sol = kkt.lu().solve(&rhs)?;
        if !sol.iter().all(|v| v.is_finite()) {
            return None;
        }

        let x = sol.rows(0, n).into_owned();
        let mut y = DVector::zeros(m);
        for (j, &(row, _)) in active.iter().enumerate() {
            y[row] = sol[n + j];
        }

        let dual_tol = self.feasibility_tol * (1.0 + y.amax());
        for &(row, _) in &active {
            if model.is_equality_row(row, self.equality_tol) {
                continue;
            }
            let wrong_sign = if warm.y[row] > 0.0 {
                y[row] < -dual_tol
            } else {
                y[row] > dual_tol
            };
            if wrong_sign {
                return None;
            }
        }

        if model.max_violation(&x) > self.feasibility_tol * (1.0 + x.amax()) {
            return None;
        }

        let px = &model.p * &x;
        let residual = &px + &model.q - model.a.transpose() * &y;
        if residual.amax() > 1e-10 * (1.0 + px.amax() + model.q.amax()) {
            return None;
        }

        Some(QpSolution {
            objective: model.objective(&x),
            x: x.iter().copied().collect(),
            y: y.iter().copied().collect(),
            status: QpStatus::Solved,
            iterations: 0,
        })
    }
}

impl Default for ActiveSetSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverBackend for ActiveSetSolver {
    fn solve_qp(&self, model: &QpModel, warm_start: Option<&QpWarmStart>) -> Result<QpSolution> {
        model.validate()?;

        if let Some(warm) = warm_start {
            if let Some(solution) = self.solve_hot(model, warm) {
                debug!("active set: warm-start active set accepted");
                return Ok(solution);
            }
        }
        Ok(self.solve_cold(model))
    }

    fn requires_positive_definite(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "dense-active-set"
    }
}

fn failed(model: &QpModel, status: QpStatus) -> QpSolution {
    let x = DVector::zeros(model.num_vars());
    QpSolution {
        objective: model.objective(&x),
        x: x.iter().copied().collect(),
        y: vec![0.0; model.num_constraints()],
        status,
        iterations: 0,
    }
}
