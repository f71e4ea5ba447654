//! Named-object container for histograms, matrices and exposure records.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    histogram::{Hist1D, Hist2D, UniverseHist},
};

pub const MC_POT: &str = "mc_pot";
pub const DATA_POT: &str = "data_pot";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoredObject {
    Hist1D(UniverseHist<Hist1D>),
    Hist2D(UniverseHist<Hist2D>),
    Matrix(DMatrix<f64>),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramStore {
    objects: BTreeMap<String, StoredObject>,
}

impl HistogramStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `object` under `name`, replacing any previous object.
    pub fn write(&mut self, name: impl Into<String>, object: StoredObject) {
        self.objects.insert(name.into(), object);
    }

    pub fn write_hist1d(&mut self, name: impl Into<String>, hist: UniverseHist<Hist1D>) {
        self.write(name, StoredObject::Hist1D(hist));
    }

    pub fn write_hist2d(&mut self, name: impl Into<String>, hist: UniverseHist<Hist2D>) {
        self.write(name, StoredObject::Hist2D(hist));
    }

    pub fn write_matrix(&mut self, name: impl Into<String>, matrix: DMatrix<f64>) {
        self.write(name, StoredObject::Matrix(matrix));
    }

    pub fn read(&self, name: &str) -> Result<&StoredObject> {
        self.objects
            .get(name)
            .ok_or_else(|| Error::Lookup(format!("no object named {name}")))
    }

    pub fn read_hist1d(&self, name: &str) -> Result<UniverseHist<Hist1D>> {
        match self.read(name)? {
            StoredObject::Hist1D(h) => {
                h.check_layout()?;
                Ok(h.clone())
            }
            _ => Err(Error::Lookup(format!("{name} is not a 1D histogram"))),
        }
    }

    pub fn read_hist2d(&self, name: &str) -> Result<UniverseHist<Hist2D>> {
        match self.read(name)? {
            StoredObject::Hist2D(h) => {
                h.check_layout()?;
                Ok(h.clone())
            }
            _ => Err(Error::Lookup(format!("{name} is not a 2D histogram"))),
        }
    }

    pub fn read_matrix(&self, name: &str) -> Result<DMatrix<f64>> {
        match self.read(name)? {
            StoredObject::Matrix(m) => Ok(m.clone()),
            _ => Err(Error::Lookup(format!("{name} is not a matrix"))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Copies every object of `other` into this store.
    pub fn copy_from(&mut self, other: &HistogramStore) {
        for (name, object) in &other.objects {
            self.objects.insert(name.clone(), object.clone());
        }
        debug!(n = other.len(), "copied objects from prior store");
    }

    /// Writes an exposure as a one-bin central-value histogram.
    pub fn write_pot(&mut self, name: &str, pot: f64) {
        if pot <= 0.0 {
            warn!(name, pot, "non-positive exposure");
        }
        self.write_hist1d(name, UniverseHist::cv_only(name, Hist1D::scalar(pot, 0.0)));
    }

    pub fn read_pot(&self, name: &str) -> Result<f64> {
        let pot = self.read_hist1d(name)?.cv().content(0);
        if pot <= 0.0 {
            warn!(name, pot, "non-positive exposure");
        }
        Ok(pot)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::Configuration(format!("cannot open store {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SystematicsConfig, universe::UniverseSet};
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        let universes = UniverseSet::from_config(&SystematicsConfig::default());
        let proto = Hist1D::new(&[0.0, 1.0, 2.0]).unwrap();
        let mut h = UniverseHist::for_universes("selection_mc_pmu", proto, &universes);
        h.fill(universes.cv(), 1.5, 2.0).unwrap();
        h.sync();
        let mut store = HistogramStore::new();
        store.write_hist1d("selection_mc_pmu", h.clone());
        store.write_pot(MC_POT, 3.5e20);
        store.write_matrix("unfolding_cov_matrix_pmu", DMatrix::identity(2, 2));
        store.save(&path).unwrap();

        let back = HistogramStore::load(&path).unwrap();
        assert_eq!(back.read_hist1d("selection_mc_pmu").unwrap(), h);
        assert_eq!(back.read_pot(MC_POT).unwrap(), 3.5e20);
        assert_eq!(
            back.names().collect::<Vec<_>>(),
            ["mc_pot", "selection_mc_pmu", "unfolding_cov_matrix_pmu"]
        );
    }

    #[test]
    fn lookups_are_typed() {
        let mut store = HistogramStore::new();
        store.write_matrix("m", DMatrix::zeros(1, 1));
        assert!(matches!(store.read_hist1d("m"), Err(Error::Lookup(_))));
        assert!(matches!(store.read("missing"), Err(Error::Lookup(_))));
        let mut copy = HistogramStore::new();
        copy.copy_from(&store);
        assert!(copy.contains("m"));
    }
}
