use clarabel::algebra::CscMatrix;
use nalgebra::DMatrix;

const SPARSITY_THRESHOLD: f64 = 1e-14;

/// Largest absolute difference between mirrored entries
pub fn asymmetry(matrix: &DMatrix<f64>) -> f64 {
    let n = matrix.nrows().min(matrix.ncols());
    let mut worst: f64 = 0.0;
    for col in 0..n {
        for row in 0..col {
            worst = worst.max((matrix[(row, col)] - matrix[(col, row)]).abs());
        }
    }
    worst
}

/// 0.5 * (M + M^T)
pub fn symmetrize(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    (matrix + matrix.transpose()) * 0.5
}

/// Smallest eigenvalue of a symmetric matrix (+inf for an empty matrix)
pub fn min_eigenvalue(matrix: &DMatrix<f64>) -> f64 {
    if matrix.nrows() == 0 {
        return f64::INFINITY;
    }
    matrix
        .clone()
        .symmetric_eigen()
        .eigenvalues
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min)
}

/// Cholesky succeeds
pub fn is_positive_definite(matrix: &DMatrix<f64>) -> bool {
    matrix.clone().cholesky().is_some()
}

/// Positive semi-definite up to `tolerance` on the smallest eigenvalue
pub fn is_positive_semidefinite(matrix: &DMatrix<f64>, tolerance: f64) -> bool {
    min_eigenvalue(matrix) >= -tolerance
}

pub fn max_abs_diagonal(matrix: &DMatrix<f64>) -> f64 {
    matrix.diagonal().iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
}

/// Convert DMatrix to Clarabel CSC format (upper triangle only, for P)
pub fn to_csc_upper(mat: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut colptr = vec![0];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for col in 0..mat.ncols() {
        for row in 0..=col.min(mat.nrows().saturating_sub(1)) {
            let val = mat[(row, col)];
            if val.abs() > SPARSITY_THRESHOLD {
                rowval.push(row);
                nzval.push(val);
            }
        }
        colptr.push(nzval.len());
    }

    CscMatrix {
        m: mat.nrows(),
        n: mat.ncols(),
        colptr,
        rowval,
        nzval,
    }
}

/// Convert DMatrix to Clarabel CSC format (full matrix)
pub fn to_csc(mat: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut colptr = vec![0];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for col in 0..mat.ncols() {
        for row in 0..mat.nrows() {
            let val = mat[(row, col)];
            if val.abs() > SPARSITY_THRESHOLD {
                rowval.push(row);
                nzval.push(val);
            }
        }
        colptr.push(nzval.len());
    }

    CscMatrix {
        m: mat.nrows(),
        n: mat.ncols(),
        colptr,
        rowval,
        nzval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    #[test]
    fn test_symmetrize_removes_asymmetry() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 0.0, 1.0]);
        assert_eq!(asymmetry(&m), 2.0);
        let s = symmetrize(&m);
        assert_eq!(asymmetry(&s), 0.0);
        assert_eq!(s[(0, 1)], 1.0);
    }

    #[test]
    fn test_definiteness_checks() {
        let pd = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 2.0]));
        assert!(is_positive_definite(&pd));

        let psd = DMatrix::from_diagonal(&DVector::from_vec(vec![0.0, 2.0]));
        assert!(!is_positive_definite(&psd));
        assert!(is_positive_semidefinite(&psd, 1e-12));

        let indefinite = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        assert!((min_eigenvalue(&indefinite) + 1.0).abs() < 1e-12);
        assert!(!is_positive_semidefinite(&indefinite, 1e-12));
    }

    #[test]
    fn test_csc_upper_keeps_upper_triangle() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let csc = to_csc_upper(&m);
        assert_eq!(csc.colptr, vec![0, 1, 3]);
        assert_eq!(csc.rowval, vec![0, 0, 1]);
        assert_eq!(csc.nzval, vec![4.0, 1.0, 3.0]);
    }

    #[test]
    fn test_csc_full_skips_zeros() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 2.0, 0.0, 0.0, -1.0]);
        let csc = to_csc(&m);
        assert_eq!(csc.colptr, vec![0, 1, 1, 3]);
        assert_eq!(csc.rowval, vec![0, 0, 1]);
        assert_eq!(csc.nzval, vec![1.0, 2.0, -1.0]);
    }
}
