use nalgebra_sparse::coo::CooMatrix;
use nalgebra_sparse::csc::CscMatrix;

use crate::error::SoftImputeError;
use crate::factors::LowRank;
use crate::svd::svd_soft_warm_seeded;

// Absolute floor under which norms are treated as exact fixed points.
const FIXED_POINT_TOL: f64 = 1e-6;

/// Observed sparse matrix handed to the solver.
///
/// Only structurally stored entries are observed; a structural zero means
/// "unknown", never "rated zero". The solver's single algorithmic path works
/// on the column-compressed layout; the triplet variant exists so callers can
/// hand over whatever they built, and is rejected rather than silently
/// converted.
pub enum ObservedMatrix {
    ColumnMajor(CscMatrix<f64>),
    Triplets(CooMatrix<f64>),
}

impl From<CscMatrix<f64>> for ObservedMatrix {
    fn from(x: CscMatrix<f64>) -> Self {
        ObservedMatrix::ColumnMajor(x)
    }
}

impl From<CooMatrix<f64>> for ObservedMatrix {
    fn from(x: CooMatrix<f64>) -> Self {
        ObservedMatrix::Triplets(x)
    }
}

/// Convergence record for one regularization value.
///
/// # Fields
/// - lambda: the regularization strength this fit ran under
/// - iterations: inner iterations until the relative change dropped below eps
/// - gamma: final relative change (0 when an exact fixed point was hit)
#[derive(Debug, Clone, PartialEq)]
pub struct FitDiagnostics {
    pub lambda: f64,
    pub iterations: usize,
    pub gamma: f64,
}

/// One per-lambda result, in the representation the caller asked for.
pub enum Reconstruction {
    /// Raw factor triple.
    Factors(LowRank<f64>),
    /// U * diag(S) * V^T with structural zeros eliminated.
    Matrix(CscMatrix<f64>),
}

pub struct Completion {
    pub z: Reconstruction,
    pub diagnostics: FitDiagnostics,
}

/// What `learn` returns: a single-lambda call yields the bare result, a
/// multi-lambda call the ordered sequence.
pub enum Learned {
    Single(Completion),
    Path(Vec<Completion>),
}

impl Learned {
    /// Flatten either shape into a vector, in lambda order.
    pub fn into_vec(self) -> Vec<Completion> {
        match self {
            Learned::Single(c) => vec![c],
            Learned::Path(cs) => cs,
        }
    }
}

/// Iterative soft-thresholded SVD matrix completion.
///
/// For each lambda in a decreasing sequence the solver alternates partial
/// reconstruction at the observed positions, residual formation, and a
/// warm-started soft-thresholded SVD, until the relative change of the
/// low-rank state falls below `eps`. The state at the end of one lambda's
/// loop seeds the next lambda's loop.
pub struct SoftImpute {
    lambdas: Vec<f64>,
    eps: f64,
    k: usize,
    random_seed: u64,
}

impl SoftImpute {
    /// # Parameters
    /// - lambdas: decreasing regularization sequence, processed in order
    /// - eps: relative-change convergence threshold
    /// - k: target rank of every factorization
    pub fn new(lambdas: Vec<f64>, eps: f64, k: usize) -> Self {
        Self {
            lambdas,
            eps,
            k,
            random_seed: 0,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn set_k(&mut self, k: usize) {
        assert!(k >= 1, "target rank must be at least 1");
        self.k = k;
    }

    /// Pin the randomized range finder to a seed; 0 restores fresh entropy.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.random_seed = seed;
    }

    /// Complete the observed matrix for every lambda.
    ///
    /// With `full_matrices` the per-lambda results are reconstructed sparse
    /// matrices, otherwise raw factor triples.
    ///
    /// # Errors
    /// `InvalidInputFormat` when `x` is not column-compressed; the SVD errors
    /// propagate unchanged.
    pub fn learn(
        &self,
        x: &ObservedMatrix,
        full_matrices: bool,
    ) -> Result<Learned, SoftImputeError> {
        let x = match x {
            ObservedMatrix::ColumnMajor(m) => m,
            ObservedMatrix::Triplets(_) => {
                return Err(SoftImputeError::InvalidInputFormat(
                    "learn requires a column-compressed matrix; \
                     convert triplets with CscMatrix::from first"
                        .to_string(),
                ))
            }
        };

        let (nrows, ncols) = (x.nrows(), x.ncols());
        let mut rows = Vec::with_capacity(x.nnz());
        let mut cols = Vec::with_capacity(x.nnz());
        let mut observed = Vec::with_capacity(x.nnz());
        for (i, j, &v) in x.triplet_iter() {
            rows.push(i);
            cols.push(j);
            observed.push(v);
        }

        let mut state = LowRank::zero(nrows, ncols);
        let mut path = Vec::with_capacity(self.lambdas.len());

        for &lambda in &self.lambdas {
            // sentinel above eps so the loop body runs at least once
            let mut gamma = self.eps + 1.0;
            let mut iterations = 0usize;

            while gamma > self.eps {
                let z_omega = state.partial_reconstruct(&rows, &cols);
                let y = residual_matrix(nrows, ncols, &rows, &cols, &observed, &z_omega);
                let next = svd_soft_warm_seeded(&y, &state, lambda, self.k, self.random_seed)?;

                let norm_old = state.norm_sq();
                let norm_diff = LowRank::diff_norm_sq(&state, &next);

                gamma = if norm_diff < FIXED_POINT_TOL {
                    // newZ == oldZ: converged outright
                    0.0
                } else if norm_old.abs() < FIXED_POINT_TOL {
                    // old state is numerically zero; the ratio would blow up,
                    // so force another pass instead
                    self.eps + 1.0
                } else {
                    norm_diff / norm_old
                };

                state = next;
                iterations += 1;
            }

            let diagnostics = FitDiagnostics {
                lambda,
                iterations,
                gamma,
            };
            let z = if full_matrices {
                Reconstruction::Matrix(reconstruct_csc(&state))
            } else {
                Reconstruction::Factors(state.clone())
            };
            path.push(Completion { z, diagnostics });
        }

        if path.len() == 1 {
            Ok(Learned::Single(path.remove(0)))
        } else {
            Ok(Learned::Path(path))
        }
    }
}

// Y = X - Z_Omega at the observed positions; everything else implicitly zero.
fn residual_matrix(
    nrows: usize,
    ncols: usize,
    rows: &[usize],
    cols: &[usize],
    observed: &[f64],
    z_omega: &[f64],
) -> CscMatrix<f64> {
    let mut coo = CooMatrix::new(nrows, ncols);
    for idx in 0..rows.len() {
        coo.push(rows[idx], cols[idx], observed[idx] - z_omega[idx]);
    }
    CscMatrix::from(&coo)
}

fn reconstruct_csc(state: &LowRank<f64>) -> CscMatrix<f64> {
    let dense = state.reconstruct();
    let mut coo = CooMatrix::new(dense.nrows(), dense.ncols());
    for ((i, j), &v) in dense.indexed_iter() {
        if v != 0.0 {
            coo.push(i, j, v);
        }
    }
    CscMatrix::from(&coo)
}
