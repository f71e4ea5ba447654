//! Absolute normalization by flux, target nucleons and exposure.

use std::path::Path;

use indexmap::IndexMap;
use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    candidate::read_csv,
    config::{NormalizationConfig, SignalDefinition},
    error::{Error, Result},
    histogram::{backfill_pair, Binned, Hist1D, UniverseHist},
    universe::CV_BAND,
};

/// Nucleons per gram.
pub const AVOGADRO: f64 = 6.02214076e23;
const M2_TO_CM2: f64 = 1.0e-4;

/// Source of the integrated neutrino flux, in neutrinos / m^2 / POT.
pub trait FluxProvider {
    /// One-bin integrated flux over `[e_min, e_max)` GeV for every universe
    /// of `layout`, plus any band the provider carries on its own.
    fn integrated_flux(
        &self,
        e_min: f64,
        e_max: f64,
        layout: &IndexMap<String, usize>,
    ) -> Result<UniverseHist<Hist1D>>;
}

/// The same flux integral in every universe.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConstantFlux(pub f64);

impl FluxProvider for ConstantFlux {
    fn integrated_flux(
        &self,
        _e_min: f64,
        _e_max: f64,
        layout: &IndexMap<String, usize>,
    ) -> Result<UniverseHist<Hist1D>> {
        Ok(UniverseHist::new("flux_integral", Hist1D::scalar(self.0, 0.0), layout))
    }
}

/// Binned flux spectrum with optional per-universe variations.
///
/// Contents are per-bin integrals, so a bin partly inside the integration
/// range contributes in proportion to its overlap.
#[derive(Clone, Debug, PartialEq)]
pub struct TabulatedFlux {
    edges: Vec<f64>,
    cv: Vec<f64>,
    bands: IndexMap<String, Vec<Vec<f64>>>,
}

impl TabulatedFlux {
    pub fn new(edges: Vec<f64>, cv: Vec<f64>) -> Result<Self> {
        Hist1D::new(&edges)?;
        if cv.len() + 1 != edges.len() {
            return Err(Error::Binning(format!(
                "flux table has {} edges but {} values",
                edges.len(),
                cv.len()
            )));
        }
        Ok(Self {
            edges,
            cv,
            bands: IndexMap::new(),
        })
    }

    pub fn with_band(mut self, name: &str, universes: Vec<Vec<f64>>) -> Result<Self> {
        if universes.iter().any(|u| u.len() != self.cv.len()) {
            return Err(Error::Binning(format!(
                "flux band {name} does not match the table binning"
            )));
        }
        self.bands.insert(name.to_string(), universes);
        Ok(self)
    }

    /// Reads `e_lo`, `e_hi`, `flux` columns plus one `flux_<band>_<index>`
    /// column per universe.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let frame = read_csv(path)?;
        let column = |name: &str| -> Result<Vec<f64>> {
            Ok(frame
                .column(name)?
                .cast(&DataType::Float64)?
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(0.0))
                .collect())
        };
        let lo = column("e_lo")?;
        let hi = column("e_hi")?;
        let mut edges = lo.clone();
        edges.extend(hi.last());
        if lo.iter().skip(1).zip(&hi).any(|(l, h)| l != h) {
            return Err(Error::Binning("flux table bins are not contiguous".into()));
        }
        let mut table = Self::new(edges, column("flux")?)?;

        let mut bands: IndexMap<String, Vec<(usize, Vec<f64>)>> = IndexMap::new();
        for name in frame.get_column_names() {
            let Some(rest) = name.strip_prefix("flux_") else {
                continue;
            };
            let Some((band, index)) = rest.rsplit_once('_') else {
                continue;
            };
            let Ok(index) = index.parse::<usize>() else {
                continue;
            };
            bands
                .entry(band.to_string())
                .or_default()
                .push((index, column(name)?));
        }
        for (band, mut universes) in bands {
            universes.sort_by_key(|(i, _)| *i);
            table = table.with_band(&band, universes.into_iter().map(|(_, v)| v).collect())?;
        }
        debug!(bins = table.cv.len(), bands = table.bands.len(), "loaded flux table");
        Ok(table)
    }

    fn integrate(&self, values: &[f64], e_min: f64, e_max: f64) -> f64 {
        self.edges
            .windows(2)
            .zip(values)
            .map(|(w, &v)| {
                let overlap = (w[1].min(e_max) - w[0].max(e_min)).max(0.0);
                v * overlap / (w[1] - w[0])
            })
            .sum()
    }
}

impl FluxProvider for TabulatedFlux {
    fn integrated_flux(
        &self,
        e_min: f64,
        e_max: f64,
        layout: &IndexMap<String, usize>,
    ) -> Result<UniverseHist<Hist1D>> {
        let cv = self.integrate(&self.cv, e_min, e_max);
        let mut bands = IndexMap::new();
        bands.insert(CV_BAND.to_string(), vec![Hist1D::scalar(cv, 0.0)]);
        for (band, &n) in layout {
            if band == CV_BAND {
                continue;
            }
            let tabulated = self.bands.get(band);
            let universes = (0..n)
                .map(|i| {
                    let value = tabulated
                        .and_then(|u| u.get(i))
                        .map_or(cv, |v| self.integrate(v, e_min, e_max));
                    Hist1D::scalar(value, 0.0)
                })
                .collect();
            bands.insert(band.clone(), universes);
        }
        for (band, universes) in &self.bands {
            if !bands.contains_key(band) {
                let hists = universes
                    .iter()
                    .map(|v| Hist1D::scalar(self.integrate(v, e_min, e_max), 0.0))
                    .collect();
                bands.insert(band.clone(), hists);
            }
        }
        UniverseHist::from_bands("flux_integral", bands)
    }
}

/// Number of target nucleons in the fiducial volume, computed once per run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TargetGeometry {
    n_nucleons: f64,
}

impl TargetGeometry {
    /// Hexagonal prism of the fiducial apothem between the vertex z bounds.
    pub fn fiducial(signal: &SignalDefinition, config: &NormalizationConfig) -> Self {
        let apothem_cm = signal.apothem / 10.0;
        let length_cm = (signal.z_vtx_max - signal.z_vtx_min) / 10.0;
        let area = 2.0 * 3f64.sqrt() * apothem_cm * apothem_cm;
        let n_nucleons = area * length_cm * config.target_density * AVOGADRO;
        info!(n_nucleons, "target nucleons");
        Self { n_nucleons }
    }

    pub fn with_nucleons(n_nucleons: f64) -> Self {
        Self { n_nucleons }
    }

    pub fn n_nucleons(&self) -> f64 {
        self.n_nucleons
    }
}

/// Divides rates by flux, target count and exposure.
pub struct Normalizer<'a> {
    flux: &'a dyn FluxProvider,
    targets: TargetGeometry,
    e_min: f64,
    e_max: f64,
}

impl<'a> Normalizer<'a> {
    pub fn new(
        flux: &'a dyn FluxProvider,
        targets: TargetGeometry,
        config: &NormalizationConfig,
    ) -> Self {
        Self {
            flux,
            targets,
            e_min: config.flux_e_min,
            e_max: config.flux_e_max,
        }
    }

    pub fn targets(&self) -> TargetGeometry {
        self.targets
    }

    /// Flux integral per cm^2, repeated over the binning of `reference`.
    pub fn flux_normalization(
        &self,
        reference: &UniverseHist<Hist1D>,
    ) -> Result<UniverseHist<Hist1D>> {
        let mut integral = self
            .flux
            .integrated_flux(self.e_min, self.e_max, &reference.layout())?;
        integral.scale(M2_TO_CM2);
        debug!(cv = integral.cv().content(0), "flux integral per cm^2");
        integral.broadcast(reference.edges(), "flux_normalization")
    }

    /// Scale turning a flux-divided rate into a per-nucleon cross section.
    pub fn exposure_scale(&self, pot: f64) -> f64 {
        let denominator = self.targets.n_nucleons * pot;
        if !(pot > 0.0) || !(denominator > 0.0) {
            warn!(
                pot,
                n_nucleons = self.targets.n_nucleons,
                "non-positive exposure, cross section zeroed"
            );
            return 0.0;
        }
        1.0 / denominator
    }

    /// Cross section of `rate` at exposure `pot`. Error bands missing on
    /// either side are filled with that side's central value first.
    pub fn cross_section(
        &self,
        rate: &UniverseHist<Hist1D>,
        pot: f64,
        name: &str,
    ) -> Result<UniverseHist<Hist1D>> {
        let mut numerator = rate.clone();
        let mut flux = self.flux_normalization(rate)?;
        backfill_pair(&mut numerator, &mut flux);
        let mut xsec = numerator.divide(&flux, name)?;
        xsec.scale(self.exposure_scale(pot));
        Ok(xsec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    fn layout(bands: &[(&str, usize)]) -> IndexMap<String, usize> {
        bands.iter().map(|(n, k)| (n.to_string(), *k)).collect()
    }

    #[test]
    fn unit_inputs_give_unit_cross_section() {
        let edges = [0.0, 1.0, 2.0, 3.0];
        let efficiency = Hist1D::from_contents(&edges, vec![0.2, 0.5, 0.8], vec![0.0; 3]).unwrap();
        let rate = UniverseHist::cv_only("effcorr", efficiency.clone())
            .divide(&UniverseHist::cv_only("eff", efficiency), "effcorr")
            .unwrap();
        let flux = ConstantFlux(1.0 / M2_TO_CM2);
        let normalizer = Normalizer::new(
            &flux,
            TargetGeometry::with_nucleons(1.0),
            &NormalizationConfig::default(),
        );
        let xsec = normalizer.cross_section(&rate, 1.0, "cross_section").unwrap();
        for bin in 0..3 {
            assert_relative_eq!(xsec.cv().content(bin), 1.0, max_relative = 1e-12);
        }
    }

    #[test]
    fn flux_bands_are_backfilled_into_the_rate() {
        let edges = [0.0, 1.0];
        let rate = UniverseHist::cv_only(
            "r",
            Hist1D::from_contents(&edges, vec![4.0], vec![0.0]).unwrap(),
        );
        let flux = TabulatedFlux::new(vec![0.0, 10.0], vec![2.0])
            .unwrap()
            .with_band("Flux", vec![vec![1.0], vec![4.0]])
            .unwrap();
        let normalizer = Normalizer::new(
            &flux,
            TargetGeometry::with_nucleons(1.0),
            &NormalizationConfig::default(),
        );
        let xsec = normalizer.cross_section(&rate, 1.0, "xs").unwrap();
        assert_eq!(xsec.band_names(), ["cv", "Flux"]);
        let flux_band = xsec.band("Flux").unwrap();
        assert_relative_eq!(xsec.cv().content(0), 4.0 / 2.0e-4, max_relative = 1e-12);
        assert_relative_eq!(flux_band[0].content(0), 4.0 / 1.0e-4, max_relative = 1e-12);
        assert_relative_eq!(flux_band[1].content(0), 4.0 / 4.0e-4, max_relative = 1e-12);
    }

    #[test]
    fn partial_bins_integrate_by_overlap() {
        let flux = TabulatedFlux::new(vec![0.0, 2.0, 4.0, 6.0], vec![2.0, 4.0, 6.0]).unwrap();
        let integral = flux.integrated_flux(1.0, 5.0, &layout(&[("GENIE_MaRES", 2)])).unwrap();
        assert_relative_eq!(integral.cv().content(0), 1.0 + 4.0 + 3.0);
        // untabulated bands fall back to the central value
        assert_relative_eq!(integral.band("GENIE_MaRES").unwrap()[1].content(0), 8.0);
    }

    #[test]
    fn flux_table_from_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flux.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "e_lo,e_hi,flux,flux_Flux_0,flux_Flux_1").unwrap();
        writeln!(file, "0,50,1.0,0.5,1.5").unwrap();
        writeln!(file, "50,100,1.0,0.5,1.5").unwrap();
        let flux = TabulatedFlux::from_csv(&path).unwrap();
        let integral = flux.integrated_flux(0.0, 100.0, &IndexMap::new()).unwrap();
        assert_relative_eq!(integral.cv().content(0), 2.0);
        assert_relative_eq!(integral.band("Flux").unwrap()[1].content(0), 3.0);
    }

    #[test]
    fn fiducial_nucleon_count() {
        let targets =
            TargetGeometry::fiducial(&SignalDefinition::default(), &NormalizationConfig::default());
        let volume = 2.0 * 3f64.sqrt() * 85.0 * 85.0 * 235.0;
        assert_relative_eq!(
            targets.n_nucleons(),
            volume * 0.91 * AVOGADRO,
            max_relative = 1e-12
        );
        assert!(targets.n_nucleons() > 3.0e30 && targets.n_nucleons() < 3.5e30);
    }

    #[test]
    fn non_positive_exposure_zeroes_scale() {
        let flux = ConstantFlux(1.0);
        let normalizer = Normalizer::new(
            &flux,
            TargetGeometry::with_nucleons(1.0),
            &NormalizationConfig::default(),
        );
        assert_eq!(normalizer.exposure_scale(0.0), 0.0);
        assert_eq!(normalizer.exposure_scale(-1.0), 0.0);
        assert_eq!(normalizer.exposure_scale(2.0), 0.5);
    }
}
