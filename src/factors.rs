use ndarray::{Array1, Array2, LinalgScalar};
use num_traits::{Float, FromPrimitive};
use rayon::prelude::*;
use std::fmt::Debug;
use std::iter::Sum;

/// Scalar bound for the factor arithmetic.
pub trait FactorFloat:
    Float + FromPrimitive + LinalgScalar + Sum + Send + Sync + Debug + 'static
{
}

impl<T> FactorFloat for T where
    T: Float + FromPrimitive + LinalgScalar + Sum + Send + Sync + Debug + 'static
{
}

// Below this many requested entries the rayon fan-out costs more than it saves.
const PAR_RECONSTRUCT_CUTOFF: usize = 10_000;

/// Factor triple (U, S, V) representing the low-rank approximation
/// Z = U * diag(S) * V^T.
///
/// # Fields
/// - u: n x k left factors
/// - s: length-k nonnegative scale vector
/// - v: m x k right factors
///
/// A state is replaced wholesale on every solver step; nothing mutates a
/// factor in place, which keeps old-vs-new comparisons sound.
#[derive(Debug, Clone, PartialEq)]
pub struct LowRank<T: FactorFloat> {
    pub u: Array2<T>,
    pub s: Array1<T>,
    pub v: Array2<T>,
}

impl<T: FactorFloat> LowRank<T> {
    /// The rank-zero starting state for an n x m problem: single zero factors
    /// on both sides and a zero scale.
    pub fn zero(nrows: usize, ncols: usize) -> Self {
        Self {
            u: Array2::zeros((nrows, 1)),
            s: Array1::zeros(1),
            v: Array2::zeros((ncols, 1)),
        }
    }

    pub fn nrows(&self) -> usize {
        self.u.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.v.nrows()
    }

    pub fn rank(&self) -> usize {
        self.s.len()
    }

    fn entry(&self, i: usize, j: usize) -> T {
        let mut acc = T::zero();
        for l in 0..self.s.len() {
            acc = acc + self.u[[i, l]] * self.s[l] * self.v[[j, l]];
        }
        acc
    }

    /// Values of U * diag(S) * V^T at exactly the given (row, col) pairs.
    ///
    /// The dense product is never formed; each entry costs one length-k dot.
    /// Large requests are evaluated in parallel.
    pub fn partial_reconstruct(&self, rows: &[usize], cols: &[usize]) -> Vec<T> {
        assert_eq!(
            rows.len(),
            cols.len(),
            "row and column index slices must pair up"
        );
        if rows.len() > PAR_RECONSTRUCT_CUTOFF {
            rows.par_iter()
                .zip(cols.par_iter())
                .map(|(&i, &j)| self.entry(i, j))
                .collect()
        } else {
            rows.iter()
                .zip(cols.iter())
                .map(|(&i, &j)| self.entry(i, j))
                .collect()
        }
    }

    /// Squared Frobenius norm, computed from the scales alone.
    pub fn norm_sq(&self) -> T {
        self.s.iter().map(|&x| x * x).sum()
    }

    /// Squared Frobenius norm of Znew - Zold computed algebraically from the
    /// factor triples:
    ///
    /// ||Zold||^2 + ||Znew||^2
    ///     - 2 * trace((Vold^T . (Vnew * Snew)) . (Unew^T . (Uold * Sold)))
    ///
    /// Exact for factor triples with orthonormal columns, which every state
    /// produced by the soft-thresholded SVD (and the zero state) satisfies.
    pub fn diff_norm_sq(old: &Self, new: &Self) -> T {
        assert_eq!(old.nrows(), new.nrows(), "factor row spaces differ");
        assert_eq!(old.ncols(), new.ncols(), "factor column spaces differ");

        let v_new_s = scale_columns(&new.v, &new.s);
        let u_old_s = scale_columns(&old.u, &old.s);
        let left = old.v.t().dot(&v_new_s);
        let right = new.u.t().dot(&u_old_s);
        let trace = left.dot(&right).diag().sum();

        let two = T::from_f64(2.0).unwrap();
        old.norm_sq() + new.norm_sq() - two * trace
    }

    /// Dense U * diag(S) * V^T. Only for emitting full reconstructions and for
    /// tests; the solver's inner loop never calls this.
    pub fn reconstruct(&self) -> Array2<T> {
        scale_columns(&self.u, &self.s).dot(&self.v.t())
    }
}

/// M with column l scaled by s[l].
pub(crate) fn scale_columns<T: FactorFloat>(m: &Array2<T>, s: &Array1<T>) -> Array2<T> {
    assert_eq!(m.ncols(), s.len(), "scale vector must match column count");
    let mut out = m.clone();
    for (l, &sl) in s.iter().enumerate() {
        out.column_mut(l).mapv_inplace(|x| x * sl);
    }
    out
}
