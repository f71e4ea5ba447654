//! Per-variable cross-section extraction.

use nalgebra::DMatrix;
use polars::prelude::*;
use tracing::{error, info, warn};

use crate::{
    error::{Error, Result},
    histogram::{backfill_pair, Hist1D, UniverseHist},
    normalize::Normalizer,
    sideband::SidebandFitResult,
    store::HistogramStore,
    unfold::{unfold_universes, unfolding_covariance},
    variable::{find_variable, Role, Variable, WCategory, FIT_VARIABLE},
};

/// Run-wide inputs shared by every variable.
pub struct Extraction<'a> {
    pub fit: &'a SidebandFitResult,
    pub normalizer: &'a Normalizer<'a>,
    pub data_pot: f64,
    pub mc_pot: f64,
}

/// Final products of one variable.
#[derive(Clone, Debug)]
pub struct VariableResult {
    pub name: String,
    pub cross_section: UniverseHist<Hist1D>,
    pub mc_cross_section: UniverseHist<Hist1D>,
    /// Off-diagonal unfolding covariance of the cross section.
    pub unfolding_cov: DMatrix<f64>,
}

/// Data exposure over simulated exposure; zero when either is not positive.
pub fn pot_scale(data_pot: f64, mc_pot: f64) -> f64 {
    if !(data_pot > 0.0 && mc_pot > 0.0) {
        warn!(data_pot, mc_pot, "non-positive exposure, POT scale set to zero");
        return 0.0;
    }
    data_pot / mc_pot
}

pub fn unfolding_cov_name(variable: &str) -> String {
    format!("unfolding_cov_matrix_{variable}")
}

fn role<'v>(var: &'v Variable, role: Role) -> Result<&'v UniverseHist<Hist1D>> {
    var.hists
        .get(role)
        .ok_or_else(|| Error::Lookup(var.store_name(role)))
}

/// Scales each truth-W background component by its fit factor and sums them.
pub fn tune_background(
    var: &Variable,
    fit: &SidebandFitResult,
    store: &mut HistogramStore,
) -> Result<UniverseHist<Hist1D>> {
    let mut total: Option<UniverseHist<Hist1D>> = None;
    for category in WCategory::ALL {
        let factor = fit
            .factor(category)
            .broadcast(var.edges(), &format!("fit_param_{}_{}", category.tag(), var.name()))?;
        let tuned = role(var, category.background())?.multiply(
            &factor,
            &format!("tuned_bg_{}_{}", category.tag(), var.name()),
        )?;
        store.write_hist1d(tuned.name(), tuned.clone());
        total = Some(match total {
            Some(sum) => sum.add(&tuned, &var.store_name(Role::TunedBg))?,
            None => tuned.renamed(var.store_name(Role::TunedBg)),
        });
    }
    total.ok_or_else(|| Error::Lookup(var.store_name(Role::TunedBg)))
}

/// Bins of the central-value efficiency outside `[0, 1]` where the
/// denominator is populated.
pub fn efficiency_outliers(efficiency: &Hist1D, denominator: &Hist1D) -> Vec<usize> {
    (0..efficiency.n_bins())
        .filter(|&bin| denominator.content(bin) > 0.0)
        .filter(|&bin| !(0.0..=1.0).contains(&efficiency.content(bin)))
        .collect()
}

/// Runs the full chain for one reconstructed variable and its truth partner,
/// writing every intermediate product to `store`.
pub fn extract_variable(
    var: &mut Variable,
    truth: &Variable,
    ctx: &Extraction<'_>,
    store: &mut HistogramStore,
) -> Result<VariableResult> {
    let name = var.name().to_string();
    info!(variable = %name, "extracting");
    let scale = pot_scale(ctx.data_pot, ctx.mc_pot);

    let tuned = tune_background(var, ctx.fit, store)?;
    store.write_hist1d(tuned.name(), tuned.clone());
    let bg_subbed = role(var, Role::SelectionData)?.subtract(
        &tuned.scaled(scale, tuned.name()),
        &var.store_name(Role::BgSubbedData),
    )?;
    store.write_hist1d(bg_subbed.name(), bg_subbed.clone());
    var.hists.insert(Role::TunedBg, tuned);
    var.hists.insert(Role::BgSubbedData, bg_subbed.clone());

    let migration = var
        .hists
        .migration()
        .ok_or_else(|| Error::Lookup(format!("migration_{name}")))?;
    let iterations = var.quantity().unfolding_iterations();
    let mut unfolded = unfold_universes(
        &name,
        migration,
        &bg_subbed,
        iterations,
        &var.store_name(Role::Unfolded),
    )?;
    let cov = unfolding_covariance(&name, migration.cv(), bg_subbed.cv())?;
    unfolded.push_cov_matrix(unfolding_cov_name(&name), cov);
    store.write_hist1d(unfolded.name(), unfolded.clone());
    var.hists.insert(Role::Unfolded, unfolded.clone());

    let mut effnum = role(truth, Role::EffNum)?.clone();
    let mut effden = role(truth, Role::EffDen)?.clone();
    backfill_pair(&mut effnum, &mut effden);
    let mut efficiency = effnum.divide(&effden, &var.store_name(Role::Efficiency))?;
    let outliers = efficiency_outliers(efficiency.cv(), effden.cv());
    if !outliers.is_empty() {
        warn!(variable = %name, bins = ?outliers, "efficiency outside [0, 1]");
    }
    store.write_hist1d(efficiency.name(), efficiency.clone());

    backfill_pair(&mut unfolded, &mut efficiency);
    let corrected = unfolded.divide(&efficiency, &var.store_name(Role::EfficiencyCorrected))?;
    store.write_hist1d(corrected.name(), corrected.clone());
    var.hists.insert(Role::Efficiency, efficiency);
    var.hists.insert(Role::EfficiencyCorrected, corrected.clone());

    let mut xsec = ctx
        .normalizer
        .cross_section(&corrected, ctx.data_pot, &var.store_name(Role::CrossSection))?;
    let mc_xsec = ctx
        .normalizer
        .cross_section(&effden, ctx.mc_pot, &var.store_name(Role::McCrossSection))?;

    // the diagonal is already carried by the statistical errors
    let cov_name = unfolding_cov_name(&name);
    let mut unfolding_cov = xsec
        .cov_matrix(&cov_name)
        .cloned()
        .unwrap_or_else(|| DMatrix::zeros(var.n_bins(), var.n_bins()));
    unfolding_cov.fill_diagonal(0.0);
    xsec.push_cov_matrix(cov_name.clone(), unfolding_cov.clone());

    store.write_hist1d(xsec.name(), xsec.clone());
    store.write_hist1d(mc_xsec.name(), mc_xsec.clone());
    store.write_matrix(cov_name, unfolding_cov.clone());
    var.hists.insert(Role::CrossSection, xsec.clone());
    var.hists.insert(Role::McCrossSection, mc_xsec.clone());

    Ok(VariableResult {
        name,
        cross_section: xsec,
        mc_cross_section: mc_xsec,
        unfolding_cov,
    })
}

/// Extracts every reconstructed variable except the fit variable. Variables
/// whose unfolding fails are logged and skipped.
pub fn extract_all(
    variables: &mut [Variable],
    truth: &[Variable],
    ctx: &Extraction<'_>,
    store: &mut HistogramStore,
) -> Result<Vec<VariableResult>> {
    let mut results = Vec::new();
    for var in variables.iter_mut() {
        if var.is_true() || var.name() == FIT_VARIABLE {
            continue;
        }
        let Some(true_var) = find_variable(truth, &format!("{}_true", var.name())) else {
            continue;
        };
        match extract_variable(var, true_var, ctx, store) {
            Ok(result) => results.push(result),
            Err(err @ Error::Unfold { .. }) => {
                error!(variable = var.name(), %err, "skipping variable");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(results)
}

/// One row per variable and bin with the data and simulated cross sections.
pub fn summary_frame(results: &[VariableResult]) -> Result<DataFrame> {
    let mut variable = Vec::new();
    let mut bin = Vec::new();
    let mut low = Vec::new();
    let mut high = Vec::new();
    let mut xsec = Vec::new();
    let mut stat = Vec::new();
    let mut total = Vec::new();
    let mut mc = Vec::new();
    let mut unfolding = Vec::new();
    for r in results {
        let cv = r.cross_section.cv();
        let cov = r.cross_section.total_covariance();
        let offdiag_norm = r.unfolding_cov.norm();
        for i in 0..cv.n_bins() {
            variable.push(r.name.clone());
            bin.push(i as u32);
            low.push(cv.edges()[i]);
            high.push(cv.edges()[i + 1]);
            xsec.push(cv.content(i));
            stat.push(cv.error(i));
            total.push(cov[(i, i)].max(0.0).sqrt());
            mc.push(r.mc_cross_section.cv().content(i));
            unfolding.push(offdiag_norm);
        }
    }
    Ok(df!(
        "Variable" => variable,
        "Bin" => bin,
        "Low" => low,
        "High" => high,
        "CrossSection" => xsec,
        "StatError" => stat,
        "TotalError" => total,
        "MCCrossSection" => mc,
        "UnfoldingCovNorm" => unfolding,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pot_scale_guards_exposure() {
        assert_relative_eq!(pot_scale(2.0, 4.0), 0.5);
        assert_eq!(pot_scale(1.0, 0.0), 0.0);
        assert_eq!(pot_scale(-1.0, 1.0), 0.0);
    }

    #[test]
    fn efficiency_outliers_only_where_populated() {
        let edges = [0.0, 1.0, 2.0, 3.0];
        let eff = Hist1D::from_contents(&edges, vec![0.5, 1.5, 2.0], vec![0.0; 3]).unwrap();
        let den = Hist1D::from_contents(&edges, vec![4.0, 2.0, 0.0], vec![0.0; 3]).unwrap();
        assert_eq!(efficiency_outliers(&eff, &den), vec![1]);
    }
}
