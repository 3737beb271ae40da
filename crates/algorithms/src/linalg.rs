//! Small dense linear algebra for band-by-band matrices
//!
//! The matrices handled here are covariance blocks whose order equals the
//! number of spectral bands (rarely more than a dozen), so straightforward
//! O(n³) routines are used: Cholesky factorisation, triangular inversion
//! and cyclic Jacobi rotations for symmetric eigenproblems.

use ndarray::Array2;
use changedet_core::{Error, Result};

/// Relative pivot threshold below which a matrix is considered singular
const SINGULAR_EPS: f64 = 1e-12;

/// Maximum number of Jacobi sweeps
const MAX_SWEEPS: usize = 100;

/// Cholesky factor `L` (lower triangular) with `A = L Lᵀ`.
///
/// Fails with [`Error::SingularMatrix`] when `A` is not symmetric
/// positive definite (to working precision).
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = check_square(a)?;
    let scale = (0..n).map(|i| a[(i, i)].abs()).fold(0.0_f64, f64::max);
    let mut l = Array2::<f64>::zeros((n, n));

    for j in 0..n {
        let mut d = a[(j, j)];
        for k in 0..j {
            d -= l[(j, k)] * l[(j, k)];
        }
        if !d.is_finite() || d <= SINGULAR_EPS * scale {
            return Err(Error::SingularMatrix {
                what: format!("not positive definite (pivot {} = {:.3e})", j, d),
            });
        }
        let d = d.sqrt();
        l[(j, j)] = d;

        for i in (j + 1)..n {
            let mut s = a[(i, j)];
            for k in 0..j {
                s -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = s / d;
        }
    }
    Ok(l)
}

/// Inverse of a lower-triangular matrix by forward substitution
pub fn invert_lower(l: &Array2<f64>) -> Result<Array2<f64>> {
    let n = check_square(l)?;
    let mut inv = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        let d = l[(i, i)];
        if d == 0.0 || !d.is_finite() {
            return Err(Error::SingularMatrix {
                what: format!("zero diagonal at {} in triangular factor", i),
            });
        }
        inv[(i, i)] = 1.0 / d;
        for j in 0..i {
            let mut s = 0.0;
            for k in j..i {
                s += l[(i, k)] * inv[(k, j)];
            }
            inv[(i, j)] = -s / d;
        }
    }
    Ok(inv)
}

/// Inverse of a symmetric positive definite matrix via its Cholesky factor
pub fn invert_spd(a: &Array2<f64>) -> Result<Array2<f64>> {
    let li = invert_lower(&cholesky(a)?)?;
    Ok(symmetrize(li.t().dot(&li)))
}

/// Eigen decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns the eigenvalues sorted in descending order and the matching
/// unit eigenvectors as the columns of the second matrix. Ties keep their
/// original diagonal order, so the result is deterministic.
pub fn jacobi_eigen(matrix: &Array2<f64>) -> Result<(Vec<f64>, Array2<f64>)> {
    let n = check_square(matrix)?;
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(Error::Algorithm("eigen decomposition of non-finite matrix".into()));
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);
    let norm = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let tol = f64::EPSILON * norm;

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0_f64;
        for p in 0..n {
            for q in (p + 1)..n {
                off = off.max(a[(p, q)].abs());
            }
        }
        if off <= tol {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[(p, q)];
                if apq.abs() <= tol {
                    continue;
                }
                // Stable rotation angle
                let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[(k, p)];
                    let akq = a[(k, q)];
                    a[(k, p)] = c * akp - s * akq;
                    a[(k, q)] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[(p, k)];
                    let aqk = a[(q, k)];
                    a[(p, k)] = c * apk - s * aqk;
                    a[(q, k)] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[(k, p)];
                    let vkq = v[(k, q)];
                    v[(k, p)] = c * vkp - s * vkq;
                    v[(k, q)] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[(j, j)].total_cmp(&a[(i, i)]));

    let values = order.iter().map(|&i| a[(i, i)]).collect();
    let mut vectors = Array2::<f64>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        vectors.column_mut(dst).assign(&v.column(src));
    }
    Ok((values, vectors))
}

/// Generalized symmetric-definite eigenproblem `C x = λ B x`.
///
/// `B` is reduced by its Cholesky factor, so the returned eigenvectors
/// (columns, eigenvalues descending) are normalized to `Xᵀ B X = I`.
pub fn generalized_eigen(c: &Array2<f64>, b: &Array2<f64>) -> Result<(Vec<f64>, Array2<f64>)> {
    let n = check_square(c)?;
    if b.dim() != (n, n) {
        return Err(Error::SizeMismatch {
            er: n,
            ec: n,
            ar: b.nrows(),
            ac: b.ncols(),
        });
    }
    let li = invert_lower(&cholesky(b)?)?;
    let reduced = symmetrize(li.dot(c).dot(&li.t()));
    let (values, y) = jacobi_eigen(&reduced)?;
    Ok((values, li.t().dot(&y)))
}

/// Average a nearly symmetric matrix with its transpose
pub fn symmetrize(m: Array2<f64>) -> Array2<f64> {
    (&m + &m.t()) * 0.5
}

fn check_square(a: &Array2<f64>) -> Result<usize> {
    let (r, c) = a.dim();
    if r != c || r == 0 {
        return Err(Error::Algorithm(format!("expected a non-empty square matrix, got {}x{}", r, c)));
    }
    Ok(r)
}
