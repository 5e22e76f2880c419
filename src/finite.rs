//! Models over a small, finite set of labelled states.
//!
//! Each unit (for example a single methylation site) sits in one labelled
//! state and switches to another at a constant, parameter-dependent rate.
//! The state of a population of units is the count in each label.

use crate::config::EngineConfig;
use crate::engine::{Event, EventModel};
use crate::model::Model;
use crate::params::Params;
use anyhow::{Context, Result, bail};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of units in each labelled state.
pub type Occupancy = BTreeMap<String, u64>;

/// A switch from one labelled state to another at a constant per-unit rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantEvent {
    pub source: String,
    pub target: String,
    pub param: String,
    /// Multiplier applied to the parameter.
    pub factor: f64,
}

impl ConstantEvent {
    pub fn new(source: &str, target: &str, param: &str) -> Self {
        Self::scaled(source, target, param, 1.0)
    }

    pub fn scaled(source: &str, target: &str, param: &str, factor: f64) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            param: param.to_string(),
            factor,
        }
    }

    pub fn unit_rate(&self, params: &Params) -> Result<f64> {
        let rate = self.factor * params.get(&self.param)?;
        if !(rate >= 0.0) {
            bail!("rate {:?} must be non-negative, but is {rate}", self.param);
        }
        Ok(rate)
    }
}

impl Event for ConstantEvent {
    type State = Occupancy;

    fn rate(&self, state: &Occupancy, params: &Params) -> Result<f64> {
        let count = state.get(&self.source).copied().unwrap_or(0);
        Ok(self.unit_rate(params)? * count as f64)
    }

    fn apply<R: Rng + ?Sized>(&self, state: &mut Occupancy, _rng: &mut R) {
        if let Some(count) = state.get_mut(&self.source) {
            *count -= 1;
        }
        *state.entry(self.target.clone()).or_insert(0) += 1;
    }
}

/// Continuous-time Markov chain over labelled states.
#[derive(Debug, Clone)]
pub struct FiniteModel {
    engine: EventModel<ConstantEvent>,
    labels: Vec<String>,
    indices: BTreeMap<String, usize>,
}

impl FiniteModel {
    pub fn new(name: impl Into<String>, events: Vec<ConstantEvent>) -> Result<Self> {
        let mut labels: Vec<String> = Vec::new();
        for event in &events {
            if event.source == event.target {
                bail!("event {:?} must change the state", event.param);
            }
            for label in [&event.source, &event.target] {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }
        if labels.is_empty() {
            bail!("a finite model needs at least one event");
        }
        let indices = labels
            .iter()
            .enumerate()
            .map(|(i, label)| (label.clone(), i))
            .collect();
        Ok(Self {
            engine: EventModel::new(name, events),
            labels,
            indices,
        })
    }

    pub fn with_config(mut self, cfg: &EngineConfig) -> Self {
        self.engine = self.engine.with_config(cfg);
        self
    }

    /// State labels, in order of first appearance among the events.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn index(&self, label: &str) -> Result<usize> {
        self.indices
            .get(label)
            .copied()
            .with_context(|| format!("unknown state label {label:?}"))
    }

    /// Generator matrix over [`Self::labels`].
    pub fn rate_matrix(&self, params: &Params) -> Result<DMatrix<f64>> {
        let n = self.labels.len();
        let mut matrix = DMatrix::zeros(n, n);
        for event in self.engine.events() {
            let rate = event
                .unit_rate(params)
                .with_context(|| format!("failed to evaluate rate {:?}", event.param))?;
            let (i, j) = (self.index(&event.source)?, self.index(&event.target)?);
            matrix[(i, j)] += rate;
            matrix[(i, i)] -= rate;
        }
        Ok(matrix)
    }

    /// Stationary distribution, solving `x·Q = 0` with `Σx = 1`.
    ///
    /// # Errors
    /// Fails if the chain has more than one closed communicating class, in
    /// which case the stationary distribution is not unique.
    pub fn stationary_distribution(&self, params: &Params) -> Result<BTreeMap<String, f64>> {
        let n = self.labels.len();

        // Replace the first equation by the normalization.
        let mut system = self.rate_matrix(params)?.transpose();
        system.row_mut(0).fill(1.0);
        let mut rhs = DVector::zeros(n);
        rhs[0] = 1.0;

        let eps = 1e-10 * system.amax().max(1.0);
        let rank = system.clone().svd(false, false).rank(eps);
        if rank < n {
            bail!("rate matrix is rank deficient ({rank} < {n}): stationary distribution is not unique");
        }

        let solution = system
            .clone()
            .lu()
            .solve(&rhs)
            .context("failed to solve stationary system")?;

        let residual = (&system * &solution - &rhs).amax();
        if !(residual < 1e-9) {
            bail!("stationary solve did not meet tolerance (residual {residual})");
        }

        Ok(self
            .labels
            .iter()
            .cloned()
            .zip(solution.iter().copied())
            .collect())
    }
}

impl Model for FiniteModel {
    type State = Occupancy;

    fn name(&self) -> String {
        self.engine.name()
    }

    fn run<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_state: &Occupancy,
        duration: f64,
        rng: &mut R,
    ) -> Result<Occupancy> {
        if let Some(label) = initial_state.keys().find(|l| !self.indices.contains_key(*l)) {
            bail!("unknown state label {label:?}");
        }
        self.engine.run(params, initial_state, duration, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn cycle(labels: &[&str]) -> FiniteModel {
        let events = labels
            .iter()
            .zip(labels.iter().cycle().skip(1))
            .map(|(a, b)| ConstantEvent::new(a, b, &format!("{a}->{b}")))
            .collect();
        FiniteModel::new("cycle", events).unwrap()
    }

    #[test]
    fn rate_matrix() {
        let model = FiniteModel::new(
            "pair",
            vec![
                ConstantEvent::new("A", "B", "A->B"),
                ConstantEvent::new("B", "A", "B->A"),
            ],
        )
        .unwrap();
        let params = Params::from([("A->B", 1.0), ("B->A", 1.0)]);
        let matrix = model.rate_matrix(&params).unwrap();
        assert_eq!(matrix, DMatrix::from_row_slice(2, 2, &[-1.0, 1.0, 1.0, -1.0]));
    }

    #[test]
    fn stationary_two_states() {
        let model = cycle(&["A", "B"]);
        let params = Params::from([("A->B", 2.0), ("B->A", 1.0)]);
        let dist = model.stationary_distribution(&params).unwrap();
        assert_abs_diff_eq!(dist["A"], 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dist["B"], 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn stationary_three_state_cycle() {
        let model = cycle(&["A", "B", "C"]);
        let params = Params::from([("A->B", 2.0), ("B->C", 1.0), ("C->A", 1.0)]);
        let dist = model.stationary_distribution(&params).unwrap();
        assert_abs_diff_eq!(dist["A"], 1.0 / 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dist["B"], 2.0 / 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dist["C"], 2.0 / 5.0, epsilon = 1e-12);
    }

    #[test]
    fn reducible_chain_is_reported() {
        let model = FiniteModel::new(
            "split",
            vec![
                ConstantEvent::new("A", "B", "r"),
                ConstantEvent::new("C", "D", "s"),
            ],
        )
        .unwrap();
        let params = Params::from([("r", 1.0), ("s", 1.0)]);
        let err = model.stationary_distribution(&params).unwrap_err();
        assert!(err.to_string().contains("rank deficient"));
    }

    #[test]
    fn scaled_event_rate() {
        let event = ConstantEvent::scaled("h", "u", "b", 0.5);
        let state = Occupancy::from([("h".to_string(), 4)]);
        let params = Params::from([("b", 3.0)]);
        assert_eq!(event.rate(&state, &params).unwrap(), 6.0);
    }

    #[test]
    fn simulated_occupancy_approaches_stationary() {
        let model = cycle(&["A", "B"]);
        let params = Params::from([("A->B", 2.0), ("B->A", 1.0)]);
        let initial = Occupancy::from([("A".to_string(), 300)]);
        let mut rng = ChaCha12Rng::seed_from_u64(8);
        let state = model.run(&params, &initial, 20.0, &mut rng).unwrap();
        let total: u64 = state.values().sum();
        assert_eq!(total, 300);
        let frac_b = state["B"] as f64 / total as f64;
        assert!((frac_b - 2.0 / 3.0).abs() < 0.1, "fraction {frac_b}");
    }

    #[test]
    fn unknown_labels_are_rejected() {
        let model = cycle(&["A", "B"]);
        let params = Params::from([("A->B", 2.0), ("B->A", 1.0)]);
        let initial = Occupancy::from([("Z".to_string(), 1)]);
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        assert!(model.run(&params, &initial, 1.0, &mut rng).is_err());
    }

    #[test]
    fn labels_are_indexed_by_first_appearance() {
        let model = cycle(&["B", "A", "C"]);
        assert_eq!(model.index("B").unwrap(), 0);
        assert_eq!(model.index("C").unwrap(), 2);
        let err = model.index("Z").unwrap_err();
        assert!(err.to_string().contains("unknown state label \"Z\""));
    }
}
