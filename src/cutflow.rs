//! Cut-flow table of yields, efficiency and purity.

use polars::prelude::*;

use crate::{
    candidate::Candidate,
    cuts::Cut,
    error::Result,
    selection::Selector,
    universe::Universe,
};

#[derive(Clone, Debug, PartialEq)]
pub struct CutFlow {
    cuts: Vec<Cut>,
    signal: Vec<f64>,
    background: Vec<f64>,
    data: Vec<f64>,
    generated_signal: f64,
}

impl CutFlow {
    pub fn new(cuts: &[Cut]) -> Self {
        Self {
            cuts: cuts.to_vec(),
            signal: vec![0.0; cuts.len()],
            background: vec![0.0; cuts.len()],
            data: vec![0.0; cuts.len()],
            generated_signal: 0.0,
        }
    }

    fn accumulate(counts: &mut [f64], survived: usize, weight: f64) {
        counts.iter_mut().take(survived).for_each(|c| *c += weight);
    }

    /// Adds a simulated candidate to the signal or background column.
    pub fn add_mc(&mut self, selector: &Selector<'_>, candidate: &Candidate) {
        let Some(truth) = candidate.truth.as_ref() else {
            return;
        };
        let cv = Universe::cv();
        let survived = selector.survived_cuts(candidate, &cv);
        let column = if truth.is_signal {
            &mut self.signal
        } else {
            &mut self.background
        };
        Self::accumulate(column, survived, cv.weight(candidate));
    }

    pub fn add_data(&mut self, selector: &Selector<'_>, candidate: &Candidate) {
        let survived = selector.survived_cuts(candidate, &Universe::cv());
        Self::accumulate(&mut self.data, survived, candidate.weight);
    }

    /// Adds a generated-signal record to the efficiency denominator.
    pub fn add_generated(&mut self, candidate: &Candidate) {
        if candidate.truth.as_ref().is_some_and(|t| t.is_signal) {
            self.generated_signal += Universe::cv().weight(candidate);
        }
    }

    pub fn generated_signal(&self) -> f64 {
        self.generated_signal
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let names: Vec<&str> = self.cuts.iter().map(|c| c.name()).collect();
        let efficiency = if self.generated_signal > 0.0 {
            col("Signal") / lit(self.generated_signal)
        } else {
            lit(f64::NAN)
        };
        Ok(df!(
            "Cut" => names,
            "Signal" => &self.signal,
            "Background" => &self.background,
            "Data" => &self.data,
        )?
        .lazy()
        .with_columns([
            efficiency.alias("Efficiency"),
            (col("Signal") / (col("Signal") + col("Background"))).alias("Purity"),
        ])
        .collect()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        candidate::TruthInfo,
        config::{SelectionConfig, SignalDefinition},
        selection::tests::selected,
    };
    use approx::assert_relative_eq;

    fn mc(recoil: f64, signal: bool, precuts: bool) -> Candidate {
        Candidate {
            passes_precuts: precuts,
            truth: Some(TruthInfo {
                is_signal: signal,
                ..TruthInfo::default()
            }),
            ..selected(recoil)
        }
    }

    #[test]
    fn yields_decrease_along_the_cut_list() {
        let signal = SignalDefinition::default();
        let selector = Selector::new(&signal, &SelectionConfig::default()).unwrap();
        let mut flow = CutFlow::new(selector.active_cuts());
        flow.add_mc(&selector, &mc(300.0, true, true));
        flow.add_mc(&selector, &mc(300.0, true, false));
        flow.add_mc(&selector, &mc(900.0, false, true));
        flow.add_data(&selector, &selected(300.0));
        for _ in 0..4 {
            flow.add_generated(&mc(300.0, true, true));
        }

        let frame = flow.to_frame().unwrap();
        assert_eq!(frame.height(), selector.active_cuts().len());
        let column = |name: &str| -> Vec<f64> {
            frame
                .column(name)
                .unwrap()
                .f64()
                .unwrap()
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect()
        };
        let signal = column("Signal");
        let background = column("Background");
        assert_eq!(signal[0], 2.0);
        assert_eq!(signal[1], 1.0);
        assert_eq!(*signal.last().unwrap(), 1.0);
        assert!(signal.windows(2).all(|w| w[0] >= w[1]));
        // the high-W background falls at the W cut
        assert_eq!(background[0], 1.0);
        assert_eq!(*background.last().unwrap(), 0.0);
        assert_relative_eq!(column("Efficiency")[0], 0.5);
        assert_relative_eq!(*column("Purity").last().unwrap(), 1.0);
        assert!(column("Data").iter().all(|&d| d == 1.0));
    }
}
