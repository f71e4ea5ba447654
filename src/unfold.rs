//! Iterative Bayesian (D'Agostini) unfolding.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::{
    error::{Error, Result},
    histogram::{Hist1D, Hist2D, UniverseHist},
};

/// Iteration count used for the central-value covariance pass.
pub const COVARIANCE_ITERATIONS: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct Unfolded {
    pub truth: Hist1D,
    /// Covariance of the unfolded bins from first-order propagation of the
    /// measured statistical variance.
    pub covariance: DMatrix<f64>,
}

/// Unfolds `data` (reconstructed axis) through `migration` (reconstructed x true).
///
/// Reconstructed bins with an empty migration row cannot be attributed to any
/// true bin and are left out. Fails when the migration is empty, or when no
/// bin holding data has a response.
pub fn unfold(
    migration: &Hist2D,
    data: &Hist1D,
    iterations: usize,
) -> std::result::Result<Unfolded, String> {
    if data.edges() != migration.x_edges() {
        return Err("data binning differs from the migration reconstructed axis".into());
    }
    let m = migration.to_matrix();
    let (nx, ny) = m.shape();
    let truth: DVector<f64> = DVector::from_fn(ny, |j, _| m.column(j).sum());
    let total = truth.sum();
    if !(total > 0.0) {
        return Err("migration matrix is empty".into());
    }
    let response = DMatrix::from_fn(nx, ny, |i, j| {
        if truth[j] > 0.0 {
            m[(i, j)] / truth[j]
        } else {
            0.0
        }
    });
    let efficiency = DVector::from_fn(ny, |j, _| response.column(j).sum());
    let d = data.to_vector();

    let informative = (0..nx).filter(|&i| d[i] != 0.0 && response.row(i).sum() > 0.0).count();
    if informative == 0 {
        return Err("no measured bin has a response".into());
    }

    let mut prior = &truth / total;
    let mut unfolding = DMatrix::zeros(ny, nx);
    let mut u = DVector::zeros(ny);
    for iteration in 0..iterations.max(1) {
        let folded = &response * &prior;
        unfolding = DMatrix::from_fn(ny, nx, |j, i| {
            if folded[i] > 0.0 && efficiency[j] > 0.0 {
                response[(i, j)] * prior[j] / (folded[i] * efficiency[j])
            } else {
                0.0
            }
        });
        u = &unfolding * &d;
        let positive: DVector<f64> = u.map(|v| v.max(0.0));
        let norm = positive.sum();
        if !(norm > 0.0) {
            return Err(format!("unfolded spectrum vanished at iteration {iteration}"));
        }
        prior = positive / norm;
    }

    let variance = DMatrix::from_diagonal(&DVector::from_column_slice(data.sumw2()));
    let covariance = &unfolding * variance * unfolding.transpose();
    let mut truth_hist = Hist1D::new(migration.y_edges()).map_err(|e| e.to_string())?;
    for j in 0..ny {
        truth_hist.set_bin(j, u[j], covariance[(j, j)]);
    }
    Ok(Unfolded {
        truth: truth_hist,
        covariance,
    })
}

/// Unfolds every universe of `data` with the same universe of `migration`.
pub fn unfold_universes(
    variable: &str,
    migration: &UniverseHist<Hist2D>,
    data: &UniverseHist<Hist1D>,
    iterations: usize,
    name: &str,
) -> Result<UniverseHist<Hist1D>> {
    migration.zip_with(data, name, |m, d| {
        unfold(m, d, iterations)
            .map(|u| u.truth)
            .map_err(|reason| Error::Unfold {
                variable: variable.to_string(),
                reason,
            })
    })
}

/// Bin-to-bin covariance induced by unfolding the central value alone.
pub fn unfolding_covariance(
    variable: &str,
    migration: &Hist2D,
    data: &Hist1D,
) -> Result<DMatrix<f64>> {
    let unfolded = unfold(migration, data, COVARIANCE_ITERATIONS).map_err(|reason| Error::Unfold {
        variable: variable.to_string(),
        reason,
    })?;
    debug!(variable, trace = unfolded.covariance.trace(), "unfolding covariance");
    Ok(unfolded.covariance)
}
