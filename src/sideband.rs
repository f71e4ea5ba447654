//! W sideband template fit.

use indexmap::IndexMap;
use nalgebra::{Matrix3, Vector3};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    histogram::{Binned, Hist1D, UniverseHist},
    store::HistogramStore,
    universe::CV_BAND,
    variable::{Role, Variable, WCategory},
};

/// Weighted least-squares scale factors `[lo, mid, hi]` for one universe,
/// modelling `data - signal` as `x_lo * T_lo + x_mid * T_mid + x_hi * T_hi`.
///
/// Bins where every template is zero, or whose combined variance is not
/// positive, carry no information and are skipped. A singular system is
/// reported with the reason as the error.
pub fn fit_templates(
    data: &Hist1D,
    signal: Option<&Hist1D>,
    templates: [&Hist1D; 3],
) -> std::result::Result<[f64; 3], String> {
    let n = data.n_bins();
    if templates.iter().any(|t| t.n_bins() != n) || signal.is_some_and(|s| s.n_bins() != n) {
        return Err("templates and data have different binning".into());
    }
    let mut a = Matrix3::<f64>::zeros();
    let mut b = Vector3::<f64>::zeros();
    let mut used = 0;
    for bin in 0..n {
        let t = Vector3::new(
            templates[0].content(bin),
            templates[1].content(bin),
            templates[2].content(bin),
        );
        if t.iter().all(|&v| v == 0.0) {
            continue;
        }
        let mut variance =
            data.sumw2()[bin] + templates.iter().map(|h| h.sumw2()[bin]).sum::<f64>();
        let mut y = data.content(bin);
        if let Some(s) = signal {
            y -= s.content(bin);
            variance += s.sumw2()[bin];
        }
        if !(variance > 0.0) {
            continue;
        }
        a += t * t.transpose() / variance;
        b += t * (y / variance);
        used += 1;
    }
    for (i, category) in WCategory::ALL.iter().enumerate() {
        if a[(i, i)] == 0.0 {
            return Err(format!(
                "{} template is empty in the fitted bins",
                category.tag()
            ));
        }
    }
    // determinant relative to the diagonal product is 1 for orthogonal
    // templates and 0 for linearly dependent ones
    let diagonal = a[(0, 0)] * a[(1, 1)] * a[(2, 2)];
    if (a.determinant() / diagonal).abs() < 1e-12 {
        return Err(format!("normal equations singular over {used} bins"));
    }
    let x = a
        .lu()
        .solve(&b)
        .ok_or_else(|| format!("normal equations singular over {used} bins"))?;
    Ok([x[0], x[1], x[2]])
}

/// One-bin scale-factor bundles, one per truth-W category.
#[derive(Clone, Debug, PartialEq)]
pub struct SidebandFitResult {
    factors: [UniverseHist<Hist1D>; 3],
}

impl SidebandFitResult {
    pub fn factor(&self, category: WCategory) -> &UniverseHist<Hist1D> {
        &self.factors[category as usize]
    }

    /// Scale factors of the universe at `index` in `band`.
    pub fn scale_factors(&self, band: &str, index: usize) -> Option<[f64; 3]> {
        let get = |h: &UniverseHist<Hist1D>| {
            h.band(band)
                .and_then(|b| b.get(index))
                .map(|h| h.content(0))
        };
        Some([
            get(&self.factors[0])?,
            get(&self.factors[1])?,
            get(&self.factors[2])?,
        ])
    }

    pub fn write(&self, store: &mut HistogramStore) {
        for h in &self.factors {
            store.write_hist1d(h.name(), h.clone());
        }
    }
}

/// Fits every universe of the templates independently against central-value data.
///
/// Templates are scaled by `pot_scale` (data exposure over simulated exposure)
/// before the fit.
pub fn fit_universes(
    data: &Hist1D,
    signal: &UniverseHist<Hist1D>,
    templates: [&UniverseHist<Hist1D>; 3],
    pot_scale: f64,
) -> Result<SidebandFitResult> {
    for t in templates.iter().copied().chain([signal]) {
        t.ensure_synced()?;
        if t.layout() != templates[0].layout() {
            return Err(Error::MissingErrorBands {
                left: templates[0].band_names(),
                right: t.band_names(),
            });
        }
    }
    let mut bands: [IndexMap<String, Vec<Hist1D>>; 3] = Default::default();
    for (band, n) in templates[0].layout() {
        let mut per_category: [Vec<Hist1D>; 3] = Default::default();
        for index in 0..n {
            let scaled = |h: &UniverseHist<Hist1D>| -> Result<Hist1D> {
                let mut hist = h
                    .band(&band)
                    .and_then(|b| b.get(index))
                    .cloned()
                    .ok_or_else(|| Error::Lookup(format!("{} has no {band}[{index}]", h.name())))?;
                hist.scale(pot_scale);
                Ok(hist)
            };
            let sig = scaled(signal)?;
            let lo = scaled(templates[0])?;
            let mid = scaled(templates[1])?;
            let hi = scaled(templates[2])?;
            let label = if band == CV_BAND {
                CV_BAND.to_string()
            } else {
                format!("{band}[{index}]")
            };
            let x = fit_templates(data, Some(&sig), [&lo, &mid, &hi]).map_err(|reason| {
                Error::Fit {
                    universe: label.clone(),
                    reason,
                }
            })?;
            debug!(universe = %label, lo = x[0], mid = x[1], hi = x[2], "sideband fit");
            for (k, value) in x.into_iter().enumerate() {
                per_category[k].push(Hist1D::scalar(value, 0.0));
            }
        }
        for (k, hists) in per_category.into_iter().enumerate() {
            bands[k].insert(band.clone(), hists);
        }
    }
    let [lo, mid, hi] = bands;
    let cv = |b: &IndexMap<String, Vec<Hist1D>>| {
        b.get(CV_BAND)
            .and_then(|h| h.first())
            .map(|h| h.content(0))
    };
    info!(
        lo = cv(&lo),
        mid = cv(&mid),
        hi = cv(&hi),
        "central value sideband scale factors"
    );
    Ok(SidebandFitResult {
        factors: [
            UniverseHist::from_bands("fit_param_loW", lo)?,
            UniverseHist::from_bands("fit_param_midW", mid)?,
            UniverseHist::from_bands("fit_param_hiW", hi)?,
        ],
    })
}

/// Runs the fit on the sideband histograms of the fit variable.
pub fn fit_sideband(fit_var: &Variable, pot_scale: f64) -> Result<SidebandFitResult> {
    let role = |r: Role| {
        fit_var
            .hists
            .get(r)
            .ok_or_else(|| Error::Lookup(fit_var.store_name(r)))
    };
    let data = role(Role::SidebandData)?;
    data.ensure_synced()?;
    fit_universes(
        data.cv(),
        role(Role::SidebandSig)?,
        [
            role(Role::SidebandLoW)?,
            role(Role::SidebandMidW)?,
            role(Role::SidebandHiW)?,
        ],
        pot_scale,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn hist(contents: &[f64], variance: f64) -> Hist1D {
        let edges: Vec<f64> = (0..=contents.len()).map(|i| i as f64).collect();
        Hist1D::from_contents(&edges, contents.to_vec(), vec![variance; contents.len()]).unwrap()
    }

    #[test]
    fn separable_templates_recover_data() {
        let data = hist(&[10.0, 10.0, 10.0], 1.0);
        let lo = hist(&[1.0, 0.0, 0.0], 0.0);
        let mid = hist(&[0.0, 1.0, 0.0], 0.0);
        let hi = hist(&[0.0, 0.0, 1.0], 0.0);
        assert_eq!(fit_templates(&data, None, [&lo, &mid, &hi]).unwrap(), [10.0, 10.0, 10.0]);
    }

    #[test]
    fn absent_component_is_a_fit_error() {
        let data = hist(&[10.0, 10.0, 10.0], 1.0);
        let lo = hist(&[1.0, 0.0, 0.0], 0.0);
        let mid = hist(&[0.0, 1.0, 1.0], 0.0);
        let hi = hist(&[0.0, 0.0, 0.0], 0.0);
        assert!(fit_templates(&data, None, [&lo, &mid, &hi]).is_err());
        let twin = hist(&[0.0, 2.0, 2.0], 0.0);
        assert!(fit_templates(&data, None, [&lo, &mid, &twin]).is_err());
    }

    #[test]
    fn fixed_signal_is_subtracted() {
        let data = hist(&[12.0, 10.0, 14.0], 1.0);
        let sig = hist(&[2.0, 0.0, 4.0], 0.0);
        let lo = hist(&[1.0, 0.0, 0.0], 0.0);
        let mid = hist(&[0.0, 2.0, 0.0], 0.0);
        let hi = hist(&[0.0, 0.0, 5.0], 0.0);
        let x = fit_templates(&data, Some(&sig), [&lo, &mid, &hi]).unwrap();
        assert_relative_eq!(x[0], 10.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 5.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_universe_names_itself() {
        let layout: IndexMap<String, usize> = [("Flux".to_string(), 1)].into_iter().collect();
        let data = hist(&[10.0, 10.0, 10.0], 1.0);
        let make = |c: [f64; 3]| UniverseHist::new("t", hist(&c, 0.0), &layout);
        let sig = make([0.0; 3]);
        let lo = make([1.0, 0.0, 0.0]);
        let mid = make([0.0, 1.0, 0.0]);
        let hi = make([0.0, 0.0, 0.0]);
        match fit_universes(&data, &sig, [&lo, &mid, &hi], 1.0) {
            Err(Error::Fit { universe, .. }) => assert_eq!(universe, "cv"),
            other => panic!("expected fit error, got {other:?}"),
        }
    }

    fn permuted(h: &Hist1D, order: &[usize]) -> Hist1D {
        let contents: Vec<f64> = order.iter().map(|&i| h.content(i)).collect();
        let sumw2: Vec<f64> = order.iter().map(|&i| h.sumw2()[i]).collect();
        Hist1D::from_contents(h.edges(), contents, sumw2).unwrap()
    }

    proptest! {
        #[test]
        fn fit_is_invariant_under_bin_permutation(
            rows in proptest::collection::vec(
                (1.0..50.0f64, 1.0..5.0f64, 1.0..5.0f64, 1.0..5.0f64),
                6..12,
            ),
            seed in any::<u64>(),
        ) {
            // each template dominates every third bin with a small leak elsewhere
            let template = |k: usize| -> Vec<f64> {
                rows.iter()
                    .enumerate()
                    .map(|(i, r)| {
                        let v = [r.1, r.2, r.3][k];
                        if i % 3 == k { v } else { 0.02 * v }
                    })
                    .collect()
            };
            let data = hist(&rows.iter().map(|r| r.0).collect::<Vec<_>>(), 1.0);
            let [lo, mid, hi] = [0, 1, 2].map(|k| hist(&template(k), 0.0));
            let x = fit_templates(&data, None, [&lo, &mid, &hi]).unwrap();

            let n = rows.len();
            let mut order: Vec<usize> = (0..n).collect();
            for i in 0..n {
                let j = ((seed >> (i % 60)) as usize + i * 7) % n;
                order.swap(i, j);
            }
            let y = fit_templates(
                &permuted(&data, &order),
                None,
                [&permuted(&lo, &order), &permuted(&mid, &order), &permuted(&hi, &order)],
            )
            .unwrap();
            for k in 0..3 {
                prop_assert!((x[k] - y[k]).abs() <= 1e-9 * (1.0 + x[k].abs()));
            }
        }
    }
}
