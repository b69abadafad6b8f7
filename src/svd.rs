use nalgebra::DMatrix;
use nalgebra_sparse::csc::CscMatrix;
use ndarray::Array1;
use nshare::IntoNdarray2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::error::SoftImputeError;
use crate::factors::LowRank;

/// Matrix-free linear operator: everything the randomized factorization needs
/// from its input. `apply` computes y = A*x, or y = A^T*x when `transposed`.
pub trait MatOp {
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;
    fn nnz(&self) -> usize;
    fn apply(&self, x: &[f64], y: &mut [f64], transposed: bool);
}

#[rustfmt::skip]
impl MatOp for CscMatrix<f64> {
    fn nrows(&self) -> usize { self.nrows() }
    fn ncols(&self) -> usize { self.ncols() }
    fn nnz(&self) -> usize { self.nnz() }

    fn apply(&self, x: &[f64], y: &mut [f64], transposed: bool) {
        let nrows = if transposed { self.ncols() } else { self.nrows() };
        let ncols = if transposed { self.nrows() } else { self.ncols() };
        assert_eq!(x.len(), ncols, "apply: x must be {ncols} long, got {}", x.len());
        assert_eq!(y.len(), nrows, "apply: y must be {nrows} long, got {}", y.len());

        let (col_offsets, row_indices, values) = self.csc_data();

        for y_val in y.iter_mut() {
            *y_val = 0.0;
        }

        if transposed {
            for (c, yval) in y.iter_mut().enumerate() {
                for idx in col_offsets[c]..col_offsets[c + 1] {
                    *yval += values[idx] * x[row_indices[idx]];
                }
            }
        } else {
            for (c, xval) in x.iter().enumerate() {
                for idx in col_offsets[c]..col_offsets[c + 1] {
                    y[row_indices[idx]] += values[idx] * *xval;
                }
            }
        }
    }
}

/// The warm-start operator Y + U * diag(S) * V^T, evaluated without ever
/// materializing the sum. The sparse part and the low-rank part are applied
/// separately on every matvec.
pub struct ResidualOp<'a> {
    sparse: &'a CscMatrix<f64>,
    low_rank: &'a LowRank<f64>,
}

impl<'a> ResidualOp<'a> {
    pub fn new(sparse: &'a CscMatrix<f64>, low_rank: &'a LowRank<f64>) -> Self {
        assert_eq!(sparse.nrows(), low_rank.nrows(), "operand row counts differ");
        assert_eq!(sparse.ncols(), low_rank.ncols(), "operand column counts differ");
        Self { sparse, low_rank }
    }
}

impl MatOp for ResidualOp<'_> {
    fn nrows(&self) -> usize {
        self.sparse.nrows()
    }

    fn ncols(&self) -> usize {
        self.sparse.ncols()
    }

    /// Structural nonzeros of the sparse part; the low-rank term is dense by
    /// construction and not counted.
    fn nnz(&self) -> usize {
        self.sparse.nnz()
    }

    fn apply(&self, x: &[f64], y: &mut [f64], transposed: bool) {
        self.sparse.apply(x, y, transposed);

        let (u, s, v) = (&self.low_rank.u, &self.low_rank.s, &self.low_rank.v);
        let k = s.len();
        // left/right swap under transposition: Z^T = V * diag(S) * U^T
        let (a, b) = if transposed { (v, u) } else { (u, v) };

        let mut t = vec![0.0; k];
        for (l, tl) in t.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (j, &xj) in x.iter().enumerate() {
                acc += b[[j, l]] * xj;
            }
            *tl = acc * s[l];
        }
        for (i, yval) in y.iter_mut().enumerate() {
            let mut acc = 0.0;
            for (l, &tl) in t.iter().enumerate() {
                acc += a[[i, l]] * tl;
            }
            *yval += acc;
        }
    }
}

// Randomized range-finder parameters, following Halko et al.
const OVERSAMPLES: usize = 10;
const POWER_ITERATIONS: usize = 2;

/// Top-k soft-thresholded SVD of a sparse matrix: the leading factors of `a`
/// with every singular value shrunk by `lambda` (floored at zero).
///
/// # Parameters
/// - a: column-compressed input
/// - lambda: shrinkage threshold, >= 0
/// - k: target rank, bounded by the matrix shape
pub fn svd_soft(a: &CscMatrix<f64>, lambda: f64, k: usize) -> Result<LowRank<f64>, SoftImputeError> {
    soft_thresholded_svd(a, lambda, k, 0)
}

/// `svd_soft` with a supplied seed for the randomized range finder.
/// A seed of 0 asks for an internally generated one.
pub fn svd_soft_seeded(
    a: &CscMatrix<f64>,
    lambda: f64,
    k: usize,
    random_seed: u64,
) -> Result<LowRank<f64>, SoftImputeError> {
    soft_thresholded_svd(a, lambda, k, random_seed)
}

/// Warm-started variant: the top-k soft-thresholded factors of
/// Y + U * diag(S) * V^T, where (U, S, V) is the previous state.
pub fn svd_soft_warm(
    y: &CscMatrix<f64>,
    previous: &LowRank<f64>,
    lambda: f64,
    k: usize,
) -> Result<LowRank<f64>, SoftImputeError> {
    svd_soft_warm_seeded(y, previous, lambda, k, 0)
}

/// `svd_soft_warm` with a supplied seed, 0 meaning internally generated.
pub fn svd_soft_warm_seeded(
    y: &CscMatrix<f64>,
    previous: &LowRank<f64>,
    lambda: f64,
    k: usize,
    random_seed: u64,
) -> Result<LowRank<f64>, SoftImputeError> {
    let op = ResidualOp::new(y, previous);
    soft_thresholded_svd(&op, lambda, k, random_seed)
}

fn soft_thresholded_svd<M: MatOp>(
    a: &M,
    lambda: f64,
    k: usize,
    random_seed: u64,
) -> Result<LowRank<f64>, SoftImputeError> {
    if k == 0 {
        return Err(SoftImputeError::SvdSoftError(
            "target rank must be at least 1".to_string(),
        ));
    }
    if lambda < 0.0 {
        return Err(SoftImputeError::SvdSoftError(format!(
            "shrinkage threshold must be nonnegative, got {lambda}"
        )));
    }

    let nrows = a.nrows();
    let ncols = a.ncols();
    let min_dim = nrows.min(ncols);
    if min_dim == 0 {
        return Err(SoftImputeError::SvdSoftError(format!(
            "cannot factorize a {nrows}x{ncols} matrix"
        )));
    }

    let rank = k.min(min_dim);
    let target = (rank + OVERSAMPLES).min(min_dim);
    let random_seed = match random_seed > 0 {
        true => random_seed,
        false => rand::rng().random(),
    };
    let mut rng = StdRng::seed_from_u64(random_seed);
    let normal = Normal::new(0.0, 1.0).unwrap();

    // Range finder: sample the column space through Gaussian probes.
    let mut y = DMatrix::<f64>::zeros(nrows, target);
    let mut probe = vec![0.0; ncols];
    let mut image = vec![0.0; nrows];
    for j in 0..target {
        for p in probe.iter_mut() {
            *p = normal.sample(&mut rng);
        }
        a.apply(&probe, &mut image, false);
        for i in 0..nrows {
            y[(i, j)] = image[i];
        }
    }
    let mut q = y.qr().q();

    // Power iterations sharpen the basis toward the leading subspace,
    // re-orthonormalizing at each half-step to keep it well conditioned.
    for _ in 0..POWER_ITERATIONS {
        let z = apply_columns(a, &q, true);
        let qz = z.qr().q();
        let w = apply_columns(a, &qz, false);
        q = w.qr().q();
    }

    // B = Q^T A, computed through transposed matvecs as (A^T Q)^T.
    let b = apply_columns(a, &q, true).transpose();

    let svd = b.svd(true, true);
    let u_b = svd.u.ok_or_else(|| {
        SoftImputeError::SvdSoftError("dense SVD returned no left vectors".to_string())
    })?;
    let v_t = svd.v_t.ok_or_else(|| {
        SoftImputeError::SvdSoftError("dense SVD returned no right vectors".to_string())
    })?;

    let mut s = Array1::<f64>::zeros(rank);
    for (i, sval) in s.iter_mut().enumerate() {
        *sval = (svd.singular_values[i] - lambda).max(0.0);
    }

    let u_small = u_b.columns(0, rank).into_owned();
    let u = (&q * &u_small).into_ndarray2();
    let v = v_t.rows(0, rank).transpose().into_ndarray2();

    Ok(LowRank { u, s, v })
}

// Applies the operator to every column of a dense block.
fn apply_columns<M: MatOp>(a: &M, block: &DMatrix<f64>, transposed: bool) -> DMatrix<f64> {
    let (in_len, out_len) = if transposed {
        (a.nrows(), a.ncols())
    } else {
        (a.ncols(), a.nrows())
    };
    assert_eq!(block.nrows(), in_len, "block rows must match operator input");

    let mut out = DMatrix::<f64>::zeros(out_len, block.ncols());
    let mut x = vec![0.0; in_len];
    let mut y = vec![0.0; out_len];
    for j in 0..block.ncols() {
        for i in 0..in_len {
            x[i] = block[(i, j)];
        }
        a.apply(&x, &mut y, transposed);
        for i in 0..out_len {
            out[(i, j)] = y[i];
        }
    }
    out
}
