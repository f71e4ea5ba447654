//! Weighted binned accumulators and their per-universe bundles.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    universe::{Universe, UniverseSet, CV_BAND},
};

fn validate_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(Error::Binning(format!(
            "need at least two bin edges, got {}",
            edges.len()
        )));
    }
    if edges.windows(2).any(|w| !(w[0] < w[1])) {
        return Err(Error::Binning(format!(
            "bin edges must be strictly increasing: {edges:?}"
        )));
    }
    Ok(())
}

/// Bin index of `x`, or `None` outside `[edges[0], edges[n])`.
pub fn find_bin(edges: &[f64], x: f64) -> Option<usize> {
    let (&lo, &hi) = (edges.first()?, edges.last()?);
    if !(x >= lo && x < hi) {
        return None;
    }
    Some(edges.partition_point(|&e| e <= x) - 1)
}

/// Operations a bundle needs from its per-universe histogram.
pub trait Binned: Clone {
    fn same_binning(&self, other: &Self) -> bool;
    fn add_scaled(&mut self, other: &Self, factor: f64);
    fn scale(&mut self, factor: f64);
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hist1D {
    edges: Vec<f64>,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
}

impl Hist1D {
    pub fn new(edges: &[f64]) -> Result<Self> {
        validate_edges(edges)?;
        let n = edges.len() - 1;
        Ok(Self {
            edges: edges.to_vec(),
            contents: vec![0.0; n],
            sumw2: vec![0.0; n],
        })
    }

    pub fn from_contents(edges: &[f64], contents: Vec<f64>, sumw2: Vec<f64>) -> Result<Self> {
        validate_edges(edges)?;
        if contents.len() != edges.len() - 1 || sumw2.len() != contents.len() {
            return Err(Error::Binning(format!(
                "{} edges cannot hold {} contents / {} variances",
                edges.len(),
                contents.len(),
                sumw2.len()
            )));
        }
        Ok(Self {
            edges: edges.to_vec(),
            contents,
            sumw2,
        })
    }

    /// One-bin histogram over `[0, 1)` holding a single scalar.
    pub fn scalar(value: f64, variance: f64) -> Self {
        Self {
            edges: vec![0.0, 1.0],
            contents: vec![value],
            sumw2: vec![variance],
        }
    }

    pub fn n_bins(&self) -> usize {
        self.contents.len()
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn contents(&self) -> &[f64] {
        &self.contents
    }

    pub fn sumw2(&self) -> &[f64] {
        &self.sumw2
    }

    pub fn content(&self, bin: usize) -> f64 {
        self.contents.get(bin).copied().unwrap_or(0.0)
    }

    pub fn error(&self, bin: usize) -> f64 {
        self.sumw2.get(bin).copied().unwrap_or(0.0).sqrt()
    }

    pub fn errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|v| v.sqrt()).collect()
    }

    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    pub fn fill(&mut self, x: f64, weight: f64) {
        if let Some(bin) = find_bin(&self.edges, x) {
            self.contents[bin] += weight;
            self.sumw2[bin] += weight * weight;
        }
    }

    pub fn set_bin(&mut self, bin: usize, content: f64, variance: f64) {
        if bin < self.contents.len() {
            self.contents[bin] = content;
            self.sumw2[bin] = variance;
        }
    }

    fn check_binning(&self, other: &Self) -> Result<()> {
        if self.same_binning(other) {
            Ok(())
        } else {
            Err(Error::Binning(format!(
                "edges {:?} and {:?} differ",
                self.edges, other.edges
            )))
        }
    }

    /// Bin-wise product with uncorrelated error propagation.
    pub fn multiply(&self, other: &Self) -> Result<Self> {
        self.check_binning(other)?;
        let mut out = self.clone();
        for i in 0..out.n_bins() {
            let (a, b) = (self.contents[i], other.contents[i]);
            out.contents[i] = a * b;
            out.sumw2[i] = self.sumw2[i] * b * b + other.sumw2[i] * a * a;
        }
        Ok(out)
    }

    /// Bin-wise ratio; bins with a zero denominator are set to zero.
    pub fn divide(&self, other: &Self) -> Result<Self> {
        self.check_binning(other)?;
        let mut out = self.clone();
        for i in 0..out.n_bins() {
            let (a, b) = (self.contents[i], other.contents[i]);
            if b == 0.0 {
                out.contents[i] = 0.0;
                out.sumw2[i] = 0.0;
            } else {
                out.contents[i] = a / b;
                out.sumw2[i] = self.sumw2[i] / (b * b) + other.sumw2[i] * a * a / b.powi(4);
            }
        }
        Ok(out)
    }

    /// Repeats the single bin of a one-bin histogram over `edges`.
    pub fn broadcast(&self, edges: &[f64]) -> Result<Self> {
        if self.n_bins() != 1 {
            return Err(Error::Binning(format!(
                "only one-bin histograms broadcast, got {} bins",
                self.n_bins()
            )));
        }
        let n = edges.len().saturating_sub(1);
        Self::from_contents(edges, vec![self.contents[0]; n], vec![self.sumw2[0]; n])
    }

    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.contents)
    }
}

impl Binned for Hist1D {
    fn same_binning(&self, other: &Self) -> bool {
        self.edges == other.edges
    }

    fn add_scaled(&mut self, other: &Self, factor: f64) {
        for i in 0..self.contents.len() {
            self.contents[i] += factor * other.contents[i];
            self.sumw2[i] += factor * factor * other.sumw2[i];
        }
    }

    fn scale(&mut self, factor: f64) {
        self.contents.iter_mut().for_each(|c| *c *= factor);
        self.sumw2.iter_mut().for_each(|v| *v *= factor * factor);
    }
}

/// Two-dimensional accumulator; x is the reconstructed axis, y the true axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hist2D {
    x_edges: Vec<f64>,
    y_edges: Vec<f64>,
    contents: Vec<f64>,
    sumw2: Vec<f64>,
}

impl Hist2D {
    pub fn new(x_edges: &[f64], y_edges: &[f64]) -> Result<Self> {
        validate_edges(x_edges)?;
        validate_edges(y_edges)?;
        let n = (x_edges.len() - 1) * (y_edges.len() - 1);
        Ok(Self {
            x_edges: x_edges.to_vec(),
            y_edges: y_edges.to_vec(),
            contents: vec![0.0; n],
            sumw2: vec![0.0; n],
        })
    }

    pub fn nx(&self) -> usize {
        self.x_edges.len() - 1
    }

    pub fn ny(&self) -> usize {
        self.y_edges.len() - 1
    }

    pub fn x_edges(&self) -> &[f64] {
        &self.x_edges
    }

    pub fn y_edges(&self) -> &[f64] {
        &self.y_edges
    }

    fn index(&self, ix: usize, iy: usize) -> usize {
        ix * self.ny() + iy
    }

    pub fn content(&self, ix: usize, iy: usize) -> f64 {
        if ix < self.nx() && iy < self.ny() {
            self.contents[self.index(ix, iy)]
        } else {
            0.0
        }
    }

    pub fn fill(&mut self, x: f64, y: f64, weight: f64) {
        if let (Some(ix), Some(iy)) = (find_bin(&self.x_edges, x), find_bin(&self.y_edges, y)) {
            let i = self.index(ix, iy);
            self.contents[i] += weight;
            self.sumw2[i] += weight * weight;
        }
    }

    pub fn set_bin(&mut self, ix: usize, iy: usize, content: f64, variance: f64) {
        if ix < self.nx() && iy < self.ny() {
            let i = self.index(ix, iy);
            self.contents[i] = content;
            self.sumw2[i] = variance;
        }
    }

    /// Reconstructed-axis projection.
    pub fn projection_x(&self) -> Hist1D {
        let mut contents = vec![0.0; self.nx()];
        let mut sumw2 = vec![0.0; self.nx()];
        for ix in 0..self.nx() {
            for iy in 0..self.ny() {
                contents[ix] += self.contents[self.index(ix, iy)];
                sumw2[ix] += self.sumw2[self.index(ix, iy)];
            }
        }
        Hist1D {
            edges: self.x_edges.clone(),
            contents,
            sumw2,
        }
    }

    /// True-axis projection.
    pub fn projection_y(&self) -> Hist1D {
        let mut contents = vec![0.0; self.ny()];
        let mut sumw2 = vec![0.0; self.ny()];
        for ix in 0..self.nx() {
            for iy in 0..self.ny() {
                contents[iy] += self.contents[self.index(ix, iy)];
                sumw2[iy] += self.sumw2[self.index(ix, iy)];
            }
        }
        Hist1D {
            edges: self.y_edges.clone(),
            contents,
            sumw2,
        }
    }

    /// Contents as a matrix with reconstructed bins as rows.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_fn(self.nx(), self.ny(), |ix, iy| self.content(ix, iy))
    }
}

impl Binned for Hist2D {
    fn same_binning(&self, other: &Self) -> bool {
        self.x_edges == other.x_edges && self.y_edges == other.y_edges
    }

    fn add_scaled(&mut self, other: &Self, factor: f64) {
        for i in 0..self.contents.len() {
            self.contents[i] += factor * other.contents[i];
            self.sumw2[i] += factor * factor * other.sumw2[i];
        }
    }

    fn scale(&mut self, factor: f64) {
        self.contents.iter_mut().for_each(|c| *c *= factor);
        self.sumw2.iter_mut().for_each(|v| *v *= factor * factor);
    }
}

/// One histogram per registered universe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniverseHist<H> {
    name: String,
    bands: IndexMap<String, Vec<H>>,
    cov_matrices: BTreeMap<String, DMatrix<f64>>,
    synced: bool,
}

impl<H: Binned> UniverseHist<H> {
    /// Bundle of `proto` copies laid out as `layout`; the central value is always first.
    pub fn new(name: impl Into<String>, proto: H, layout: &IndexMap<String, usize>) -> Self {
        let mut bands = IndexMap::new();
        bands.insert(CV_BAND.to_string(), vec![proto.clone()]);
        for (band, &n) in layout {
            if band != CV_BAND {
                bands.insert(band.clone(), vec![proto.clone(); n]);
            }
        }
        Self {
            name: name.into(),
            bands,
            cov_matrices: BTreeMap::new(),
            synced: true,
        }
    }

    /// Bundle from per-band histograms; the central value band must come first.
    pub fn from_bands(name: impl Into<String>, bands: IndexMap<String, Vec<H>>) -> Result<Self> {
        let hist = Self {
            name: name.into(),
            bands,
            cov_matrices: BTreeMap::new(),
            synced: true,
        };
        hist.check_layout()?;
        Ok(hist)
    }

    pub fn for_universes(name: impl Into<String>, proto: H, universes: &UniverseSet) -> Self {
        Self::new(name, proto, &universes.layout())
    }

    pub fn cv_only(name: impl Into<String>, proto: H) -> Self {
        Self::new(name, proto, &IndexMap::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn layout(&self) -> IndexMap<String, usize> {
        self.bands
            .iter()
            .map(|(name, hists)| (name.clone(), hists.len()))
            .collect()
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.keys().cloned().collect()
    }

    /// Confirms the central value is present and first, as constructors guarantee.
    pub fn check_layout(&self) -> Result<()> {
        match self.bands.get_index(0) {
            Some((name, hists)) if name == CV_BAND && hists.len() == 1 => Ok(()),
            _ => Err(Error::Lookup(format!(
                "{} has no central value universe",
                self.name
            ))),
        }
    }

    pub fn cv(&self) -> &H {
        &self.bands[0][0]
    }

    pub fn band(&self, name: &str) -> Option<&[H]> {
        self.bands.get(name).map(Vec::as_slice)
    }

    pub fn get(&self, universe: &Universe) -> Option<&H> {
        self.bands
            .get(universe.short_name())
            .and_then(|hists| hists.get(universe.index()))
    }

    /// Mutable access for filling; clears the sync flag.
    pub fn get_mut(&mut self, universe: &Universe) -> Result<&mut H> {
        self.synced = false;
        let name = &self.name;
        self.bands
            .get_mut(universe.short_name())
            .and_then(|hists| hists.get_mut(universe.index()))
            .ok_or_else(|| Error::Lookup(format!("{name} has no universe {}", universe.label())))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize, &H)> {
        self.bands.iter().flat_map(|(name, hists)| {
            hists
                .iter()
                .enumerate()
                .map(move |(i, h)| (name.as_str(), i, h))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut H> {
        self.bands.values_mut().flat_map(|hists| hists.iter_mut())
    }

    pub fn n_universes(&self) -> usize {
        self.bands.values().map(Vec::len).sum()
    }

    /// Barrier between the fill phase and any cross-universe arithmetic.
    pub fn sync(&mut self) {
        self.synced = true;
    }

    pub fn ensure_synced(&self) -> Result<()> {
        if self.synced {
            Ok(())
        } else {
            Err(Error::Unsynced(self.name.clone()))
        }
    }

    fn check_bands<G: Binned>(&self, other: &UniverseHist<G>) -> Result<()> {
        if self.layout() == other.layout() {
            Ok(())
        } else {
            Err(Error::MissingErrorBands {
                left: self.band_names(),
                right: other.band_names(),
            })
        }
    }

    /// Per-universe combination of two bundles with identical bands.
    pub fn zip_with<G: Binned, O, F>(
        &self,
        other: &UniverseHist<G>,
        name: &str,
        f: F,
    ) -> Result<UniverseHist<O>>
    where
        F: Fn(&H, &G) -> Result<O>,
    {
        self.ensure_synced()?;
        other.ensure_synced()?;
        self.check_bands(other)?;
        let mut bands = IndexMap::new();
        for (band, left) in &self.bands {
            let right = other.bands.get(band).map(Vec::as_slice).unwrap_or_default();
            let combined = left
                .iter()
                .zip(right)
                .map(|(l, r)| f(l, r))
                .collect::<Result<Vec<_>>>()?;
            bands.insert(band.clone(), combined);
        }
        Ok(UniverseHist {
            name: name.to_string(),
            bands,
            cov_matrices: BTreeMap::new(),
            synced: true,
        })
    }

    /// Per-universe transformation; attached matrices are not carried over.
    pub fn map<O, F>(&self, name: &str, f: F) -> Result<UniverseHist<O>>
    where
        F: Fn(&H) -> Result<O>,
    {
        self.ensure_synced()?;
        let mut bands = IndexMap::new();
        for (band, hists) in &self.bands {
            bands.insert(band.clone(), hists.iter().map(&f).collect::<Result<Vec<_>>>()?);
        }
        Ok(UniverseHist {
            name: name.to_string(),
            bands,
            cov_matrices: BTreeMap::new(),
            synced: true,
        })
    }

    /// Registers every band of `other` missing here, each universe a copy of
    /// this bundle's central value. Returns the names of the added bands.
    pub fn add_missing_bands_from<G>(&mut self, other: &UniverseHist<G>) -> Vec<String> {
        let cv = self.cv().clone();
        let mut added = Vec::new();
        for (band, hists) in &other.bands {
            if !self.bands.contains_key(band) {
                self.bands.insert(band.clone(), vec![cv.clone(); hists.len()]);
                added.push(band.clone());
            }
        }
        added
    }

    fn combine(&self, other: &Self, factor: f64, name: &str) -> Result<Self> {
        let mut out = self.zip_with(other, name, |a, b| {
            if !a.same_binning(b) {
                return Err(Error::Binning(format!(
                    "{} and {} have different binning",
                    self.name, other.name
                )));
            }
            let mut sum = a.clone();
            sum.add_scaled(b, factor);
            Ok(sum)
        })?;
        out.cov_matrices = self.cov_matrices.clone();
        Ok(out)
    }

    pub fn add(&self, other: &Self, name: &str) -> Result<Self> {
        self.combine(other, 1.0, name)
    }

    pub fn subtract(&self, other: &Self, name: &str) -> Result<Self> {
        self.combine(other, -1.0, name)
    }

    pub fn scale(&mut self, factor: f64) {
        self.iter_mut().for_each(|h| h.scale(factor));
        self.cov_matrices
            .values_mut()
            .for_each(|m| *m *= factor * factor);
    }

    pub fn scaled(&self, factor: f64, name: &str) -> Self {
        let mut out = self.clone().renamed(name);
        out.scale(factor);
        out
    }

    pub fn push_cov_matrix(&mut self, name: impl Into<String>, matrix: DMatrix<f64>) {
        self.cov_matrices.insert(name.into(), matrix);
    }

    pub fn cov_matrix(&self, name: &str) -> Option<&DMatrix<f64>> {
        self.cov_matrices.get(name)
    }

    pub fn cov_matrices(&self) -> &BTreeMap<String, DMatrix<f64>> {
        &self.cov_matrices
    }
}

impl UniverseHist<Hist1D> {
    pub fn fill(&mut self, universe: &Universe, x: f64, weight: f64) -> Result<()> {
        self.get_mut(universe)?.fill(x, weight);
        Ok(())
    }

    pub fn edges(&self) -> &[f64] {
        self.cv().edges()
    }

    pub fn multiply(&self, other: &Self, name: &str) -> Result<Self> {
        let mut out = self.zip_with(other, name, Hist1D::multiply)?;
        let factor = other.cv().to_vector();
        for (key, m) in &self.cov_matrices {
            out.push_cov_matrix(key.clone(), outer_scaled(m, &factor));
        }
        Ok(out)
    }

    pub fn divide(&self, other: &Self, name: &str) -> Result<Self> {
        let mut out = self.zip_with(other, name, Hist1D::divide)?;
        let inverse = other
            .cv()
            .to_vector()
            .map(|d| if d == 0.0 { 0.0 } else { 1.0 / d });
        for (key, m) in &self.cov_matrices {
            out.push_cov_matrix(key.clone(), outer_scaled(m, &inverse));
        }
        Ok(out)
    }

    /// Expands a bundle of one-bin histograms onto `edges`, universe by universe.
    pub fn broadcast(&self, edges: &[f64], name: &str) -> Result<Self> {
        self.map(name, |h| h.broadcast(edges))
    }

    /// Spread-based covariance of one error band.
    ///
    /// Bands of up to two universes use the shifts from the central value;
    /// larger bands use the spread about their own mean.
    pub fn band_covariance(&self, band: &str) -> Option<DMatrix<f64>> {
        let hists = self.band(band)?;
        let n = self.cv().n_bins();
        let mut cov = DMatrix::zeros(n, n);
        if band == CV_BAND || hists.is_empty() {
            return Some(cov);
        }
        let center = if hists.len() <= 2 {
            self.cv().to_vector()
        } else {
            hists
                .iter()
                .fold(DVector::zeros(n), |acc, h| acc + h.to_vector())
                / hists.len() as f64
        };
        for h in hists {
            let d = h.to_vector() - &center;
            cov += &d * d.transpose();
        }
        Some(cov / hists.len() as f64)
    }

    /// Central-value statistical variance, every band's spread and every
    /// attached matrix.
    pub fn total_covariance(&self) -> DMatrix<f64> {
        let mut cov = DMatrix::from_diagonal(&DVector::from_column_slice(self.cv().sumw2()));
        for band in self.bands.keys() {
            if let Some(b) = self.band_covariance(band) {
                cov += b;
            }
        }
        for m in self.cov_matrices.values() {
            if m.shape() == cov.shape() {
                cov += m;
            }
        }
        cov
    }
}

impl UniverseHist<Hist2D> {
    pub fn fill(&mut self, universe: &Universe, x: f64, y: f64, weight: f64) -> Result<()> {
        self.get_mut(universe)?.fill(x, y, weight);
        Ok(())
    }
}

fn outer_scaled(m: &DMatrix<f64>, factor: &DVector<f64>) -> DMatrix<f64> {
    if m.nrows() != factor.len() {
        return m.clone();
    }
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[(i, j)] * factor[i] * factor[j])
}

/// Fills each operand's missing bands from its own central value so the
/// two bundles can be combined universe by universe.
pub fn backfill_pair<A: Binned, B: Binned>(a: &mut UniverseHist<A>, b: &mut UniverseHist<B>) {
    a.add_missing_bands_from(b);
    b.add_missing_bands_from(a);
    // both now share the union of bands; align the order on the left operand
    let order = a.band_names();
    b.bands.sort_by(|ka, _, kb, _| {
        let pa = order.iter().position(|n| n == ka);
        let pb = order.iter().position(|n| n == kb);
        pa.cmp(&pb)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SystematicsConfig;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn layout(bands: &[(&str, usize)]) -> IndexMap<String, usize> {
        bands.iter().map(|(n, k)| (n.to_string(), *k)).collect()
    }

    #[test]
    fn fill_drops_out_of_range() {
        let mut h = Hist1D::new(&[0.0, 1.0, 2.0, 3.0]).unwrap();
        for x in [0.5, 1.5, 2.5, 0.5, -1.0, 3.0, 3.5] {
            h.fill(x, 1.0);
        }
        h.fill(1.0, 2.0);
        assert_eq!(h.contents(), &[2.0, 3.0, 1.0]);
        assert_eq!(h.sumw2(), &[2.0, 5.0, 1.0]);
        assert!(Hist1D::new(&[0.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn projections_of_migration() {
        let mut m = Hist2D::new(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0, 3.0]).unwrap();
        m.fill(0.5, 0.5, 2.0);
        m.fill(0.5, 2.5, 1.0);
        m.fill(1.5, 1.5, 4.0);
        assert_eq!(m.projection_x().contents(), &[3.0, 4.0]);
        assert_eq!(m.projection_y().contents(), &[2.0, 4.0, 1.0]);
        assert_eq!(m.to_matrix()[(0, 2)], 1.0);
    }

    #[test]
    fn arithmetic_requires_sync() {
        let universes = UniverseSet::from_config(&SystematicsConfig::default());
        let proto = Hist1D::new(&[0.0, 1.0]).unwrap();
        let mut a = UniverseHist::for_universes("a", proto.clone(), &universes);
        let b = UniverseHist::for_universes("b", proto, &universes);
        a.fill(universes.cv(), 0.5, 1.0).unwrap();
        assert!(matches!(a.add(&b, "sum"), Err(Error::Unsynced(_))));
        a.sync();
        let sum = a.add(&b, "sum").unwrap();
        assert_eq!(sum.cv().contents(), &[1.0]);
        assert_eq!(sum.n_universes(), universes.n_universes());
    }

    #[test]
    fn divide_with_missing_band_is_an_error_until_backfilled() {
        let edges = [0.0, 1.0, 2.0];
        let proto = Hist1D::new(&edges).unwrap();
        let a_layout = layout(&[("A", 1), ("B", 2)]);
        let mut num = UniverseHist::new("num", proto.clone(), &a_layout);
        let mut den = UniverseHist::new("den", proto, &layout(&[("A", 1)]));
        let b0 = Universe::vertical("B", 0, -1.0, "b");
        num.fill(&Universe::cv(), 0.5, 2.0).unwrap();
        num.fill(&b0, 0.5, 6.0).unwrap();
        den.fill(&Universe::cv(), 0.5, 4.0).unwrap();
        den.fill(&Universe::vertical("A", 0, 1.0, "a"), 0.5, 8.0).unwrap();
        num.sync();
        den.sync();

        assert!(matches!(
            num.divide(&den, "ratio"),
            Err(Error::MissingErrorBands { .. })
        ));
        backfill_pair(&mut num, &mut den);
        let ratio = num.divide(&den, "ratio").unwrap();
        assert_eq!(ratio.band_names(), ["cv", "A", "B"]);
        assert_relative_eq!(ratio.cv().content(0), 0.5);
        assert_relative_eq!(ratio.get(&b0).unwrap().content(0), 1.5);
        // zero denominator
        assert_eq!(ratio.cv().content(1), 0.0);
    }

    #[test]
    fn band_covariance_from_shifts() {
        let proto = Hist1D::new(&[0.0, 1.0, 2.0]).unwrap();
        let mut h = UniverseHist::new("h", proto, &layout(&[("S", 2)]));
        let cv = Universe::cv();
        for x in [0.5, 1.5] {
            h.fill(&cv, x, 10.0).unwrap();
        }
        h.fill(&Universe::vertical("S", 0, -1.0, "s"), 0.5, 8.0).unwrap();
        h.fill(&Universe::vertical("S", 0, -1.0, "s"), 1.5, 10.0).unwrap();
        h.fill(&Universe::vertical("S", 1, 1.0, "s"), 0.5, 12.0).unwrap();
        h.fill(&Universe::vertical("S", 1, 1.0, "s"), 1.5, 10.0).unwrap();
        h.sync();
        let cov = h.band_covariance("S").unwrap();
        assert_relative_eq!(cov[(0, 0)], 4.0);
        assert_relative_eq!(cov[(1, 1)], 0.0);
        let total = h.total_covariance();
        assert_relative_eq!(total[(0, 0)], 104.0);
    }

    #[test]
    fn divide_scales_attached_covariance() {
        let edges = [0.0, 1.0, 2.0];
        let h = |contents: Vec<f64>| Hist1D::from_contents(&edges, contents, vec![0.0; 2]).unwrap();
        let mut num = UniverseHist::cv_only("n", h(vec![4.0, 6.0]));
        num.push_cov_matrix("unfolding", DMatrix::from_element(2, 2, 4.0));
        let den = UniverseHist::cv_only("d", h(vec![2.0, 4.0]));
        let out = num.divide(&den, "q").unwrap();
        let m = out.cov_matrix("unfolding").unwrap();
        assert_relative_eq!(m[(0, 0)], 1.0);
        assert_relative_eq!(m[(0, 1)], 0.5);
        assert_relative_eq!(m[(1, 1)], 0.25);
    }

    proptest! {
        #[test]
        fn broadcast_repeats_scalar(value in -100.0..100.0f64, k in 1usize..40) {
            let edges: Vec<f64> = (0..=k).map(|i| i as f64 * 2.5).collect();
            let fit = UniverseHist::new("f", Hist1D::scalar(value, 1.0), &layout(&[("B", 3)]));
            let wide = fit.broadcast(&edges, "wide").unwrap();
            for (_, _, h) in wide.iter() {
                prop_assert_eq!(h.n_bins(), k);
                for bin in 0..k {
                    prop_assert_eq!(h.content(bin), value);
                }
            }
        }
    }
}
