use lcqp_qp::matrix_utils::{asymmetry, symmetrize};
use lcqp_types::{LcqpError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Relative tolerance for the load-time symmetry check on Q.
const SYMMETRY_TOL: f64 = 1e-10;

/// Linear complementarity quadratic program:
///
/// ```text
/// minimize    0.5 x^T Q x + g^T x
/// subject to  lbA <= A x <= ubA
///             lbL <= L x <= ubL
///             lbR <= R x <= ubR
///             (L x - lbL)^T (R x - lbR) = 0
/// ```
///
/// Immutable once built. Only the warm-start vectors can be replaced, and
/// that produces a new value (see [`Problem::with_warm_start`]).
#[derive(Debug, Clone)]
pub struct Problem {
    hessian: DMatrix<f64>,
    gradient: DVector<f64>,
    left: DMatrix<f64>,
    right: DMatrix<f64>,
    a: DMatrix<f64>,
    lb_a: DVector<f64>,
    ub_a: DVector<f64>,
    lb_left: DVector<f64>,
    ub_left: DVector<f64>,
    lb_right: DVector<f64>,
    ub_right: DVector<f64>,
    // Penalty phi(x) = 0.5 x^T C x + g_phi^T x + c_phi
    compl_matrix: DMatrix<f64>,
    compl_gradient: DVector<f64>,
    compl_constant: f64,
    // Stacked [A; L; R] rows and their bounds
    stacked: DMatrix<f64>,
    stacked_lower: DVector<f64>,
    stacked_upper: DVector<f64>,
    x0: Option<DVector<f64>>,
    y0: Option<DVector<f64>>,
}

impl Problem {
    /// Start building a problem from its objective.
    pub fn builder(hessian: DMatrix<f64>, gradient: DVector<f64>) -> ProblemBuilder {
        ProblemBuilder::new(hessian, gradient)
    }

    /// Load from a JSON document in the [`ProblemData`] layout.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let data: ProblemData = serde_json::from_str(json)?;
        data.into_problem()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn num_vars(&self) -> usize {
        self.gradient.len()
    }

    /// General constraints, including folded box bounds.
    pub fn num_constraints(&self) -> usize {
        self.a.nrows()
    }

    pub fn num_complementarities(&self) -> usize {
        self.left.nrows()
    }

    /// One multiplier per general row and per complementarity side.
    pub fn num_duals(&self) -> usize {
        self.num_constraints() + 2 * self.num_complementarities()
    }

    pub fn hessian(&self) -> &DMatrix<f64> {
        &self.hessian
    }

    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    pub fn left(&self) -> &DMatrix<f64> {
        &self.left
    }

    pub fn right(&self) -> &DMatrix<f64> {
        &self.right
    }

    pub fn constraint_matrix(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn constraint_bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.lb_a, &self.ub_a)
    }

    pub fn left_bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.lb_left, &self.ub_left)
    }

    pub fn right_bounds(&self) -> (&DVector<f64>, &DVector<f64>) {
        (&self.lb_right, &self.ub_right)
    }

    /// C = L^T R + R^T L
    pub fn complementarity_matrix(&self) -> &DMatrix<f64> {
        &self.compl_matrix
    }

    /// g_phi = -(R^T lbL + L^T lbR)
    pub fn complementarity_gradient(&self) -> &DVector<f64> {
        &self.compl_gradient
    }

    /// [A; L; R] with stacked lower and upper bounds
    pub fn stacked_constraints(&self) -> (&DMatrix<f64>, &DVector<f64>, &DVector<f64>) {
        (&self.stacked, &self.stacked_lower, &self.stacked_upper)
    }

    pub fn x0(&self) -> Option<&DVector<f64>> {
        self.x0.as_ref()
    }

    pub fn y0(&self) -> Option<&DVector<f64>> {
        self.y0.as_ref()
    }

    /// Same problem with new initial guesses.
    pub fn with_warm_start(
        &self,
        x0: Option<DVector<f64>>,
        y0: Option<DVector<f64>>,
    ) -> Result<Self> {
        check_warm_start(self.num_vars(), self.num_duals(), x0.as_ref(), y0.as_ref())?;
        let mut next = self.clone();
        next.x0 = x0;
        next.y0 = y0;
        Ok(next)
    }

    /// 0.5 x^T Q x + g^T x
    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        0.5 * x.dot(&(&self.hessian * x)) + self.gradient.dot(x)
    }

    /// phi(x) = (L x - lbL)^T (R x - lbR)
    pub fn penalty(&self, x: &DVector<f64>) -> f64 {
        0.5 * x.dot(&(&self.compl_matrix * x)) + self.compl_gradient.dot(x) + self.compl_constant
    }

    /// Objective plus `rho` times the penalty, without the constant term.
    pub fn merit(&self, x: &DVector<f64>, rho: f64) -> f64 {
        self.objective(x) + rho * (0.5 * x.dot(&(&self.compl_matrix * x)) + self.compl_gradient.dot(x))
    }

    /// Sum of |(L x - lbL)_i (R x - lbR)_i|
    pub fn complementarity_residual(&self, x: &DVector<f64>) -> f64 {
        let (lx, rx) = self.shifted_pairs(x);
        lx.iter().zip(rx.iter()).map(|(l, r)| (l * r).abs()).sum()
    }

    /// (L x - lbL, R x - lbR)
    pub fn shifted_pairs(&self, x: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        (&self.left * x - &self.lb_left, &self.right * x - &self.lb_right)
    }

    /// Largest violation of any stacked bound.
    pub fn max_violation(&self, x: &DVector<f64>) -> f64 {
        let ax = &self.stacked * x;
        let mut worst: f64 = 0.0;
        for i in 0..ax.len() {
            if self.stacked_lower[i].is_finite() {
                worst = worst.max(self.stacked_lower[i] - ax[i]);
            }
            if self.stacked_upper[i].is_finite() {
                worst = worst.max(ax[i] - self.stacked_upper[i]);
            }
        }
        worst
    }
}

/// Incremental construction of a [`Problem`]. Every setter is optional except
/// the objective; validation happens in [`ProblemBuilder::build`].
#[derive(Debug, Clone)]
pub struct ProblemBuilder {
    hessian: DMatrix<f64>,
    gradient: DVector<f64>,
    left: Option<DMatrix<f64>>,
    right: Option<DMatrix<f64>>,
    a: Option<DMatrix<f64>>,
    lb_a: Option<DVector<f64>>,
    ub_a: Option<DVector<f64>>,
    lb: Option<DVector<f64>>,
    ub: Option<DVector<f64>>,
    lb_left: Option<DVector<f64>>,
    ub_left: Option<DVector<f64>>,
    lb_right: Option<DVector<f64>>,
    ub_right: Option<DVector<f64>>,
    x0: Option<DVector<f64>>,
    y0: Option<DVector<f64>>,
}

impl ProblemBuilder {
    pub fn new(hessian: DMatrix<f64>, gradient: DVector<f64>) -> Self {
        ProblemBuilder {
            hessian,
            gradient,
            left: None,
            right: None,
            a: None,
            lb_a: None,
            ub_a: None,
            lb: None,
            ub: None,
            lb_left: None,
            ub_left: None,
            lb_right: None,
            ub_right: None,
            x0: None,
            y0: None,
        }
    }

    /// Pairs `(L x)_i ⟂ (R x)_i`.
    pub fn complementarity(mut self, left: DMatrix<f64>, right: DMatrix<f64>) -> Self {
        self.left = Some(left);
        self.right = Some(right);
        self
    }

    /// Selection-matrix form of [`ProblemBuilder::complementarity`].
    pub fn selectors(self, s1: DMatrix<f64>, s2: DMatrix<f64>) -> Self {
        self.complementarity(s1, s2)
    }

    /// General constraints `lbA <= A x <= ubA`. Missing bounds default to
    /// -inf / +inf.
    pub fn constraints(
        mut self,
        a: DMatrix<f64>,
        lb_a: Option<DVector<f64>>,
        ub_a: Option<DVector<f64>>,
    ) -> Self {
        self.a = Some(a);
        self.lb_a = lb_a;
        self.ub_a = ub_a;
        self
    }

    /// Box bounds on x, folded into general constraint rows.
    pub fn box_bounds(mut self, lb: Option<DVector<f64>>, ub: Option<DVector<f64>>) -> Self {
        self.lb = lb;
        self.ub = ub;
        self
    }

    /// Lower complementarity bounds (default 0).
    pub fn complementarity_lower_bounds(mut self, lb_left: DVector<f64>, lb_right: DVector<f64>) -> Self {
        self.lb_left = Some(lb_left);
        self.lb_right = Some(lb_right);
        self
    }

    /// Upper complementarity bounds (default +inf).
    pub fn complementarity_upper_bounds(mut self, ub_left: DVector<f64>, ub_right: DVector<f64>) -> Self {
        self.ub_left = Some(ub_left);
        self.ub_right = Some(ub_right);
        self
    }

    pub fn initial_guess(mut self, x0: DVector<f64>) -> Self {
        self.x0 = Some(x0);
        self
    }

    pub fn initial_duals(mut self, y0: DVector<f64>) -> Self {
        self.y0 = Some(y0);
        self
    }

    pub fn build(self) -> Result<Problem> {
        let n = self.gradient.len();
        if n == 0 {
            return Err(LcqpError::InvalidDimensions("problem has no variables".to_string()));
        }
        check_shape("Q", &self.hessian, n, n)?;
        check_finite_matrix("Q", &self.hessian)?;
        check_finite_vector("g", &self.gradient)?;

        let scale = self.hessian.amax().max(1.0);
        let asym = asymmetry(&self.hessian);
        if asym > SYMMETRY_TOL * scale {
            return Err(LcqpError::AsymmetricHessian(format!(
                "max |Q_ij - Q_ji| = {:e}",
                asym
            )));
        }
        let hessian = symmetrize(&self.hessian);

        let (left, right) = match (self.left, self.right) {
            (Some(l), Some(r)) => (l, r),
            (None, None) => (DMatrix::zeros(0, n), DMatrix::zeros(0, n)),
            _ => {
                return Err(LcqpError::InvalidDimensions(
                    "L and R must be given together".to_string(),
                ))
            }
        };
        let n_comp = left.nrows();
        check_shape("L", &left, n_comp, n)?;
        check_shape("R", &right, n_comp, n)?;
        check_finite_matrix("L", &left)?;
        check_finite_matrix("R", &right)?;

        // General constraints
        let a = self.a.unwrap_or_else(|| DMatrix::zeros(0, n));
        let n_c = a.nrows();
        check_shape("A", &a, n_c, n)?;
        check_finite_matrix("A", &a)?;
        let lb_a = bound_or("lbA", self.lb_a, n_c, f64::NEG_INFINITY)?;
        let ub_a = bound_or("ubA", self.ub_a, n_c, f64::INFINITY)?;
        check_ordered("lbA", "ubA", &lb_a, &ub_a)?;

        // Box bounds become identity rows appended to A
        let lb = bound_or("lb", self.lb, n, f64::NEG_INFINITY)?;
        let ub = bound_or("ub", self.ub, n, f64::INFINITY)?;
        check_ordered("lb", "ub", &lb, &ub)?;
        let boxed: Vec<usize> = (0..n)
            .filter(|&i| lb[i].is_finite() || ub[i].is_finite())
            .collect();

        let n_rows = n_c + boxed.len();
        let mut a_full = DMatrix::zeros(n_rows, n);
        let mut lb_full = DVector::zeros(n_rows);
        let mut ub_full = DVector::zeros(n_rows);
        a_full.rows_mut(0, n_c).copy_from(&a);
        lb_full.rows_mut(0, n_c).copy_from(&lb_a);
        ub_full.rows_mut(0, n_c).copy_from(&ub_a);
        for (k, &i) in boxed.iter().enumerate() {
            a_full[(n_c + k, i)] = 1.0;
            lb_full[n_c + k] = lb[i];
            ub_full[n_c + k] = ub[i];
        }

        // Complementarity bounds
        let lb_left = bound_or("lbL", self.lb_left, n_comp, 0.0)?;
        let ub_left = bound_or("ubL", self.ub_left, n_comp, f64::INFINITY)?;
        let lb_right = bound_or("lbR", self.lb_right, n_comp, 0.0)?;
        let ub_right = bound_or("ubR", self.ub_right, n_comp, f64::INFINITY)?;
        for (name, lb_side) in [("lbL", &lb_left), ("lbR", &lb_right)] {
            if let Some(i) = lb_side.iter().position(|v| !v.is_finite()) {
                return Err(LcqpError::MalformedBounds(format!(
                    "{}[{}] must be finite, got {}",
                    name, i, lb_side[i]
                )));
            }
        }
        check_ordered("lbL", "ubL", &lb_left, &ub_left)?;
        check_ordered("lbR", "ubR", &lb_right, &ub_right)?;

        let compl_matrix = left.transpose() * &right + right.transpose() * &left;
        let compl_gradient = -(right.transpose() * &lb_left + left.transpose() * &lb_right);
        let compl_constant = lb_left.dot(&lb_right);

        let total = n_rows + 2 * n_comp;
        let mut stacked = DMatrix::zeros(total, n);
        stacked.rows_mut(0, n_rows).copy_from(&a_full);
        stacked.rows_mut(n_rows, n_comp).copy_from(&left);
        stacked.rows_mut(n_rows + n_comp, n_comp).copy_from(&right);
        let stacked_lower = DVector::from_iterator(
            total,
            lb_full.iter().chain(lb_left.iter()).chain(lb_right.iter()).copied(),
        );
        let stacked_upper = DVector::from_iterator(
            total,
            ub_full.iter().chain(ub_left.iter()).chain(ub_right.iter()).copied(),
        );

        check_warm_start(n, total, self.x0.as_ref(), self.y0.as_ref())?;

        Ok(Problem {
            hessian,
            gradient: self.gradient,
            left,
            right,
            a: a_full,
            lb_a: lb_full,
            ub_a: ub_full,
            lb_left,
            ub_left,
            lb_right,
            ub_right,
            compl_matrix,
            compl_gradient,
            compl_constant,
            stacked,
            stacked_lower,
            stacked_upper,
            x0: self.x0,
            y0: self.y0,
        })
    }
}

fn check_shape(name: &str, m: &DMatrix<f64>, rows: usize, cols: usize) -> Result<()> {
    if m.nrows() != rows || m.ncols() != cols {
        return Err(LcqpError::InvalidDimensions(format!(
            "{} must be {}x{}, got {}x{}",
            name,
            rows,
            cols,
            m.nrows(),
            m.ncols()
        )));
    }
    Ok(())
}

fn check_finite_matrix(name: &str, m: &DMatrix<f64>) -> Result<()> {
    if m.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(LcqpError::NonFinite(format!("{} has NaN or infinite entries", name)))
    }
}

fn check_finite_vector(name: &str, v: &DVector<f64>) -> Result<()> {
    if v.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(LcqpError::NonFinite(format!("{} has NaN or infinite entries", name)))
    }
}

fn bound_or(name: &str, given: Option<DVector<f64>>, len: usize, default: f64) -> Result<DVector<f64>> {
    match given {
        Some(v) if v.len() != len => Err(LcqpError::InvalidDimensions(format!(
            "{} has length {}, expected {}",
            name,
            v.len(),
            len
        ))),
        Some(v) => {
            if let Some(i) = v.iter().position(|x| x.is_nan()) {
                return Err(LcqpError::MalformedBounds(format!("{}[{}] is NaN", name, i)));
            }
            Ok(v)
        }
        None => Ok(DVector::from_element(len, default)),
    }
}

fn check_ordered(lo_name: &str, hi_name: &str, lo: &DVector<f64>, hi: &DVector<f64>) -> Result<()> {
    for i in 0..lo.len() {
        if lo[i] > hi[i] {
            return Err(LcqpError::MalformedBounds(format!(
                "{}[{}] = {} > {}[{}] = {}",
                lo_name, i, lo[i], hi_name, i, hi[i]
            )));
        }
    }
    Ok(())
}

fn check_warm_start(
    n: usize,
    n_duals: usize,
    x0: Option<&DVector<f64>>,
    y0: Option<&DVector<f64>>,
) -> Result<()> {
    if let Some(x0) = x0 {
        if x0.len() != n {
            return Err(LcqpError::InvalidDimensions(format!(
                "x0 has length {}, expected {}",
                x0.len(),
                n
            )));
        }
        check_finite_vector("x0", x0)?;
    }
    if let Some(y0) = y0 {
        if y0.len() != n_duals {
            return Err(LcqpError::InvalidDimensions(format!(
                "y0 has length {}, expected {}",
                y0.len(),
                n_duals
            )));
        }
        check_finite_vector("y0", y0)?;
    }
    Ok(())
}

/// Matrix payload of a problem file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum MatrixData {
    /// Row-major dense values
    Dense {
        rows: usize,
        cols: usize,
        values: Vec<f64>,
    },
    /// Compressed sparse column
    Csc {
        rows: usize,
        cols: usize,
        colptr: Vec<usize>,
        rowval: Vec<usize>,
        nzval: Vec<f64>,
    },
}

impl MatrixData {
    pub fn to_dense(&self, name: &str) -> Result<DMatrix<f64>> {
        match self {
            MatrixData::Dense { rows, cols, values } => {
                if values.len() != rows * cols {
                    return Err(LcqpError::InvalidDimensions(format!(
                        "{}: {} values for a {}x{} matrix",
                        name,
                        values.len(),
                        rows,
                        cols
                    )));
                }
                Ok(DMatrix::from_row_slice(*rows, *cols, values))
            }
            MatrixData::Csc {
                rows,
                cols,
                colptr,
                rowval,
                nzval,
            } => {
                let nnz = nzval.len();
                let well_formed = colptr.len() == cols + 1
                    && rowval.len() == nnz
                    && colptr.first() == Some(&0)
                    && colptr.last() == Some(&nnz)
                    && colptr.windows(2).all(|w| w[0] <= w[1])
                    && rowval.iter().all(|&r| r < *rows);
                if !well_formed {
                    return Err(LcqpError::InvalidDimensions(format!(
                        "{}: malformed CSC structure for a {}x{} matrix",
                        name, rows, cols
                    )));
                }
                let mut m = DMatrix::zeros(*rows, *cols);
                for col in 0..*cols {
                    for k in colptr[col]..colptr[col + 1] {
                        m[(rowval[k], col)] += nzval[k];
                    }
                }
                Ok(m)
            }
        }
    }
}

/// Serializable problem description. Bound arrays use `null` for an absent
/// (infinite) bound, since JSON has no infinity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemData {
    #[serde(alias = "Q")]
    pub hessian: MatrixData,
    #[serde(alias = "g")]
    pub gradient: Vec<f64>,
    #[serde(default, alias = "L", alias = "S1")]
    pub left: Option<MatrixData>,
    #[serde(default, alias = "R", alias = "S2")]
    pub right: Option<MatrixData>,
    #[serde(default, alias = "A")]
    pub constraints: Option<MatrixData>,
    #[serde(default, alias = "lbA")]
    pub lb_a: Option<Vec<Option<f64>>>,
    #[serde(default, alias = "ubA")]
    pub ub_a: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub lb: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub ub: Option<Vec<Option<f64>>>,
    #[serde(default, alias = "lbL")]
    pub lb_left: Option<Vec<f64>>,
    #[serde(default, alias = "ubL")]
    pub ub_left: Option<Vec<Option<f64>>>,
    #[serde(default, alias = "lbR")]
    pub lb_right: Option<Vec<f64>>,
    #[serde(default, alias = "ubR")]
    pub ub_right: Option<Vec<Option<f64>>>,
    #[serde(default)]
    pub x0: Option<Vec<f64>>,
    #[serde(default)]
    pub y0: Option<Vec<f64>>,
}

impl ProblemData {
    pub fn into_problem(self) -> Result<Problem> {
        let hessian = self.hessian.to_dense("Q")?;
        let mut builder = ProblemBuilder::new(hessian, DVector::from_vec(self.gradient));

        match (self.left, self.right) {
            (Some(l), Some(r)) => {
                builder = builder.complementarity(l.to_dense("L")?, r.to_dense("R")?);
            }
            (None, None) => {}
            _ => {
                return Err(LcqpError::InvalidDimensions(
                    "L and R must be given together".to_string(),
                ))
            }
        }

        if let Some(a) = self.constraints {
            builder = builder.constraints(
                a.to_dense("A")?,
                self.lb_a.map(|v| nullable(v, f64::NEG_INFINITY)),
                self.ub_a.map(|v| nullable(v, f64::INFINITY)),
            );
        }

        builder = builder.box_bounds(
            self.lb.map(|v| nullable(v, f64::NEG_INFINITY)),
            self.ub.map(|v| nullable(v, f64::INFINITY)),
        );
        builder.lb_left = self.lb_left.map(DVector::from_vec);
        builder.lb_right = self.lb_right.map(DVector::from_vec);
        builder.ub_left = self.ub_left.map(|v| nullable(v, f64::INFINITY));
        builder.ub_right = self.ub_right.map(|v| nullable(v, f64::INFINITY));
        builder.x0 = self.x0.map(DVector::from_vec);
        builder.y0 = self.y0.map(DVector::from_vec);

        builder.build()
    }
}

fn nullable(values: Vec<Option<f64>>, absent: f64) -> DVector<f64> {
    DVector::from_iterator(values.len(), values.into_iter().map(|v| v.unwrap_or(absent)))
}
