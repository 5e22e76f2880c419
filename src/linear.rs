//! Linear (non-interacting) population models.
//!
//! Every event is sourced at a single type and fires at a rate equal to a
//! per-capita rate times the count of that type, as in a multitype branching
//! process. Besides stochastic simulation these models admit an exact
//! deterministic companion and exact extinction probabilities.

use crate::config::{EngineConfig, ExtinctionConfig, FixedPointMethod};
use crate::engine::{Event, EventModel};
use crate::model::Model;
use crate::params::Params;
use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Context, Result, bail, ensure};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Population counts per type.
pub type Counts = Vec<u64>;

/// How the per-capita rate of a linear event is obtained from parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLaw {
    /// The per-capita rate is a parameter.
    Param(String),
    /// Interpolates linearly between `min` (for type 0) and `max`
    /// (for type `type_count - 1`).
    Interpolated {
        min: String,
        max: String,
        type_count: usize,
    },
    /// `(site_count - i) * param` for source type `i`.
    Methylation { param: String, site_count: usize },
    /// `i * param` for source type `i`.
    Demethylation { param: String },
    /// A constant multiple of another law.
    Scaled { factor: f64, law: Box<RateLaw> },
}

impl RateLaw {
    pub fn per_capita(&self, source: usize, params: &Params) -> Result<f64> {
        let rate = match self {
            RateLaw::Param(name) => params.get(name)?,
            RateLaw::Interpolated {
                min,
                max,
                type_count,
            } => {
                let (min, max) = (params.get(min)?, params.get(max)?);
                if *type_count < 2 {
                    return Ok(min);
                }
                let i = source as f64;
                let n = *type_count as f64;
                (max * i + min * (n - i - 1.0)) / (n - 1.0)
            }
            RateLaw::Methylation { param, site_count } => {
                (site_count.saturating_sub(source)) as f64 * params.get(param)?
            }
            RateLaw::Demethylation { param } => source as f64 * params.get(param)?,
            RateLaw::Scaled { factor, law } => factor * law.per_capita(source, params)?,
        };
        Ok(rate)
    }
}

/// What happens to the population when a linear event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// One more individual of the source type.
    Birth,
    /// One fewer individual of the source type.
    Death,
    /// One individual switches from the source type to `target`.
    Transition { target: usize },
}

/// An event whose rate scales linearly with the count of its source type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearEvent {
    pub source: usize,
    pub law: RateLaw,
    pub effect: Effect,
}

impl LinearEvent {
    pub fn new(source: usize, law: RateLaw, effect: Effect) -> Self {
        Self {
            source,
            law,
            effect,
        }
    }

    pub fn birth(source: usize, param: &str) -> Self {
        Self::new(source, RateLaw::Param(param.to_string()), Effect::Birth)
    }

    pub fn death(source: usize, param: &str) -> Self {
        Self::new(source, RateLaw::Param(param.to_string()), Effect::Death)
    }

    pub fn transition(source: usize, target: usize, param: &str) -> Self {
        Self::new(
            source,
            RateLaw::Param(param.to_string()),
            Effect::Transition { target },
        )
    }

    /// Rate at which a single individual of the source type triggers the event.
    pub fn per_capita_rate(&self, params: &Params) -> Result<f64> {
        let rate = self.law.per_capita(self.source, params)?;
        if !(rate >= 0.0) {
            bail!("per-capita rate must be non-negative, but is {rate}");
        }
        Ok(rate)
    }

    /// Largest type index touched by this event.
    pub fn max_index(&self) -> usize {
        match self.effect {
            Effect::Transition { target } => self.source.max(target),
            _ => self.source,
        }
    }

    /// Offspring of a single source individual after the event fires.
    pub fn impact(&self, population_count: usize) -> Vec<i32> {
        let mut impact = vec![0; population_count];
        impact[self.source] = 1;
        match self.effect {
            Effect::Birth => impact[self.source] += 1,
            Effect::Death => impact[self.source] -= 1,
            Effect::Transition { target } => {
                impact[self.source] -= 1;
                impact[target] += 1;
            }
        }
        impact
    }
}

impl Event for LinearEvent {
    type State = Counts;

    fn rate(&self, state: &Counts, params: &Params) -> Result<f64> {
        Ok(self.per_capita_rate(params)? * state[self.source] as f64)
    }

    fn apply<R: Rng + ?Sized>(&self, state: &mut Counts, _rng: &mut R) {
        match self.effect {
            Effect::Birth => state[self.source] += 1,
            Effect::Death => state[self.source] -= 1,
            Effect::Transition { target } => {
                state[self.source] -= 1;
                state[target] += 1;
            }
        }
    }
}

/// Asymptotic behaviour of the mean-field dynamics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermBehavior {
    /// Exponential growth (or decay) rate.
    pub growth_rate: f64,
    /// Type composition conditional on survival, summing to 1.
    pub composition: Vec<f64>,
}

/// Stochastic population model built from linear events.
#[derive(Debug, Clone)]
pub struct LinearModel {
    engine: EventModel<LinearEvent>,
    population_count: usize,
}

impl LinearModel {
    pub fn new(name: impl Into<String>, events: Vec<LinearEvent>) -> Result<Self> {
        let population_count = events
            .iter()
            .map(|event| event.max_index() + 1)
            .max()
            .context("a linear model needs at least one event")?;
        Ok(Self {
            engine: EventModel::new(name, events),
            population_count,
        })
    }

    pub fn with_config(mut self, cfg: &EngineConfig) -> Self {
        self.engine = self.engine.with_config(cfg);
        self
    }

    pub fn population_count(&self) -> usize {
        self.population_count
    }

    pub fn events(&self) -> &[LinearEvent] {
        self.engine.events()
    }

    /// Generator matrix of the mean-field dynamics.
    ///
    /// Row `i` holds the per-capita rates at which a type-`i` individual is
    /// replaced by its offspring: entry `[i][j]` gains `rate * offspring_j`
    /// and the diagonal loses `rate` for every event sourced at `i`.
    pub fn generator(&self, params: &Params) -> Result<DMatrix<f64>> {
        let n = self.population_count;
        let mut generator = DMatrix::zeros(n, n);
        for (i_event, event) in self.events().iter().enumerate() {
            let rate = event
                .per_capita_rate(params)
                .with_context(|| format!("failed to evaluate rate of event {i_event}"))?;
            let source = event.source;
            generator[(source, source)] -= rate;
            for (j, &offspring) in event.impact(n).iter().enumerate() {
                generator[(source, j)] += rate * f64::from(offspring);
            }
        }
        Ok(generator)
    }

    /// The deterministic (expected-count) companion of this model.
    pub fn deterministic(&self) -> DeterministicModel<'_> {
        DeterministicModel { model: self }
    }

    /// Dominant eigenvalue of the generator and its normalized left eigenvector.
    pub fn long_term_behavior(&self, params: &Params) -> Result<LongTermBehavior> {
        let generator = self.generator(params)?;
        let n = self.population_count;
        if n == 1 {
            return Ok(LongTermBehavior {
                growth_rate: generator[(0, 0)],
                composition: vec![1.0],
            });
        }

        let growth_rate = generator
            .complex_eigenvalues()
            .iter()
            .map(|eig| eig.re)
            .fold(f64::NEG_INFINITY, f64::max);
        ensure!(growth_rate.is_finite(), "failed to compute eigenvalues");

        // Left eigenvector: null vector of Q^T - λI.
        let shifted = generator.transpose() - DMatrix::identity(n, n) * growth_rate;
        let svd = shifted.svd(false, true);
        let v_t = svd.v_t.context("failed to compute singular vectors")?;
        let (i_min, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .context("empty generator")?;
        let vector: Vec<f64> = v_t.row(i_min).iter().copied().collect();

        let sum: f64 = vector.iter().sum();
        if sum.abs() < 1e-12 {
            bail!("dominant eigenvector cannot be normalized");
        }
        let composition = vector.iter().map(|val| val / sum).collect();

        Ok(LongTermBehavior {
            growth_rate,
            composition,
        })
    }

    /// Extinction probability of a population started from one individual of
    /// each type.
    ///
    /// Solves the first-step self-consistency equation of the branching
    /// process by iterating from an interior guess (0.5 per type). Burn-in
    /// iterations move the guess away from the trivial fixed point at 1
    /// before the refinement; the number needed has no proven bound.
    pub fn calculate_extinction(&self, params: &Params, cfg: &ExtinctionConfig) -> Result<Vec<f64>> {
        let branches = self.extinction_branches(params)?;
        let map = |guess: &[f64]| apply_branches(&branches, guess);
        let extinction = solve_fixed_point(map, vec![0.5; self.population_count], cfg)
            .context("failed to solve extinction fixed point")?;

        log::debug!("extinction probabilities: {extinction:?}");

        Ok(extinction)
    }

    /// Branches of the extinction map: each event as a probability of being
    /// the first event of its source type.
    fn extinction_branches(&self, params: &Params) -> Result<Vec<Branch>> {
        let n = self.population_count;

        let mut total_rates = vec![0.0; n];
        let mut rates = Vec::with_capacity(self.events().len());
        for (i_event, event) in self.events().iter().enumerate() {
            let rate = event
                .per_capita_rate(params)
                .with_context(|| format!("failed to evaluate rate of event {i_event}"))?;
            total_rates[event.source] += rate;
            rates.push(rate);
        }

        let mut branches = Vec::with_capacity(rates.len());
        for (event, rate) in self.events().iter().zip(rates) {
            let total_rate = total_rates[event.source];
            if total_rate == 0.0 {
                bail!("type {} has zero total rate", event.source);
            }
            branches.push(Branch {
                source: event.source,
                prob: rate / total_rate,
                impact: event.impact(n),
            });
        }
        Ok(branches)
    }

    /// Monte Carlo estimate of extinction probabilities within `duration`.
    ///
    /// For each type, runs `n_attempts` simulations from a single individual
    /// of that type and records whether the population died out.
    pub fn sample_extinction<R: Rng + ?Sized>(
        &self,
        params: &Params,
        duration: f64,
        n_attempts: usize,
        rng: &mut R,
    ) -> Result<Vec<AccumulatorReport>> {
        let n = self.population_count;
        let mut reports = Vec::with_capacity(n);
        for i_type in 0..n {
            let mut initial = vec![0; n];
            initial[i_type] = 1;

            let mut acc = Accumulator::new();
            for _ in 0..n_attempts {
                let state = self
                    .run(params, &initial, duration, rng)
                    .with_context(|| format!("failed to sample extinction of type {i_type}"))?;
                acc.add(if state.iter().all(|&count| count == 0) { 1.0 } else { 0.0 });
            }
            reports.push(acc.report());
        }
        Ok(reports)
    }
}

impl Model for LinearModel {
    type State = Counts;

    fn name(&self) -> String {
        self.engine.name()
    }

    fn run<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_state: &Counts,
        duration: f64,
        rng: &mut R,
    ) -> Result<Counts> {
        if initial_state.len() != self.population_count {
            bail!(
                "state must have {} types, but has {}",
                self.population_count,
                initial_state.len()
            );
        }
        self.engine.run(params, initial_state, duration, rng)
    }
}

/// Expected-count trajectory of a [`LinearModel`], `x · exp(Q t)`.
#[derive(Debug, Clone, Copy)]
pub struct DeterministicModel<'a> {
    model: &'a LinearModel,
}

impl DeterministicModel<'_> {
    /// Propagate expected counts, given as integers, for `duration`.
    pub fn run_counts(&self, params: &Params, counts: &[u64], duration: f64) -> Result<Vec<f64>> {
        let state: Vec<f64> = counts.iter().map(|&count| count as f64).collect();
        self.propagate(params, &state, duration)
    }

    fn propagate(&self, params: &Params, state: &[f64], duration: f64) -> Result<Vec<f64>> {
        let n = self.model.population_count;
        if state.len() != n {
            bail!("state must have {n} types, but has {}", state.len());
        }
        let generator = self.model.generator(params)?;
        let propagator = (generator * duration).exp();
        let state = propagator.transpose() * DVector::from_column_slice(state);
        Ok(state.iter().copied().collect())
    }
}

impl Model for DeterministicModel<'_> {
    type State = Vec<f64>;

    fn name(&self) -> String {
        format!("{} (deterministic)", self.model.name())
    }

    fn run<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_state: &Vec<f64>,
        duration: f64,
        _rng: &mut R,
    ) -> Result<Vec<f64>> {
        self.propagate(params, initial_state, duration)
    }
}

/// One possible first event of an individual, for the extinction map.
struct Branch {
    source: usize,
    prob: f64,
    impact: Vec<i32>,
}

/// The probability-generating-function map `q -> F(q)`.
fn apply_branches(branches: &[Branch], guess: &[f64]) -> Vec<f64> {
    let mut next = vec![0.0; guess.len()];
    for branch in branches {
        let contribution = branch
            .impact
            .iter()
            .zip(guess)
            .fold(branch.prob, |acc, (&power, &q)| acc * q.powi(power));
        next[branch.source] += contribution;
    }
    next
}

/// Find a fixed point of `map` by burn-in iteration followed by refinement.
pub fn solve_fixed_point<F>(map: F, initial_guess: Vec<f64>, cfg: &ExtinctionConfig) -> Result<Vec<f64>>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let mut guess = initial_guess;
    for _ in 0..cfg.burn_in {
        guess = map(&guess);
    }

    let residual = |point: &[f64]| {
        map(point)
            .iter()
            .zip(point)
            .map(|(mapped, p)| (mapped - p).abs())
            .fold(0.0, f64::max)
    };

    for i_iter in 0..cfg.max_iter {
        let next = match cfg.method {
            FixedPointMethod::Iteration => map(&guess),
            FixedPointMethod::Del2 => {
                let p1 = map(&guess);
                let p2 = map(&p1);
                // Aitken extrapolation, only where each component converges
                // monotonically at a linear rate.
                let accelerated: Option<Vec<f64>> = guess
                    .iter()
                    .zip(&p1)
                    .zip(&p2)
                    .map(|((&p0, &p1), &p2)| {
                        let ratio = (p2 - p1) / (p1 - p0);
                        let d = p2 - 2.0 * p1 + p0;
                        ((0.0..1.0).contains(&ratio) && d.abs() > 1e-14)
                            .then(|| p0 - (p1 - p0).powi(2) / d)
                    })
                    .collect();
                // Extrapolated points must stay off the trivial root and
                // improve on the plain iterate.
                match accelerated {
                    Some(point)
                        if point.iter().all(|p| (0.0..1.0).contains(p))
                            && residual(&point) < residual(&p2) =>
                    {
                        point
                    }
                    _ => p2,
                }
            }
        };

        if next.iter().any(|val| !val.is_finite()) {
            bail!("fixed-point iteration diverged at iteration {i_iter}");
        }

        if is_close(&guess, &next, cfg.tolerance) {
            let check = map(&next);
            if is_close(&next, &check, cfg.tolerance) {
                log::debug!("fixed point reached after {} iterations", i_iter + 1);
                return Ok(next);
            }
            guess = check;
            continue;
        }

        guess = next;
    }

    bail!(
        "fixed-point iteration did not converge within {} iterations",
        cfg.max_iter
    )
}

/// Componentwise relative change below `tolerance`.
fn is_close(prev: &[f64], next: &[f64], tolerance: f64) -> bool {
    prev.iter().zip(next).all(|(&p0, &p)| {
        let rel_err = if p0 != 0.0 { (p - p0) / p0 } else { p };
        rel_err.abs() < tolerance
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn two_type_model() -> LinearModel {
        LinearModel::new(
            "two types",
            vec![
                LinearEvent::birth(0, "b1"),
                LinearEvent::birth(1, "b2"),
                LinearEvent::death(0, "d1"),
                LinearEvent::death(1, "d2"),
                LinearEvent::transition(0, 1, "0->1"),
                LinearEvent::transition(1, 0, "1->0"),
            ],
        )
        .unwrap()
    }

    fn two_type_params() -> Params {
        Params::from([
            ("b1", 2.0),
            ("b2", 1.0),
            ("d1", 1.0),
            ("d2", 2.0),
            ("0->1", 1.0),
            ("1->0", 1.0),
        ])
    }

    #[test]
    fn linear_event_rate() {
        let event = LinearEvent::birth(2, "p");
        let params = Params::from([("q", 1.0), ("p", 2.0)]);
        assert_eq!(event.rate(&vec![1, 3, 5], &params).unwrap(), 10.0);
    }

    #[test]
    fn event_effects() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);

        let mut state = vec![0, 1, 1];
        LinearEvent::birth(1, "b").apply(&mut state, &mut rng);
        assert_eq!(state, vec![0, 2, 1]);

        let mut state = vec![1, 1, 1];
        LinearEvent::death(0, "d").apply(&mut state, &mut rng);
        assert_eq!(state, vec![0, 1, 1]);

        let mut state = vec![1, 0];
        let transition = LinearEvent::transition(0, 1, "0->1");
        let params = Params::from([("0->1", 3.0)]);
        assert_eq!(transition.rate(&state, &params).unwrap(), 3.0);
        transition.apply(&mut state, &mut rng);
        assert_eq!(state, vec![0, 1]);
    }

    #[test]
    fn interpolated_rates() {
        let law = RateLaw::Interpolated {
            min: "b_0".to_string(),
            max: "b_M".to_string(),
            type_count: 7,
        };
        let params = Params::from([("b_0", 0.0), ("b_M", 1.0)]);
        assert_abs_diff_eq!(law.per_capita(2, &params).unwrap(), 1.0 / 3.0, epsilon = 1e-15);
        assert_abs_diff_eq!(law.per_capita(6, &params).unwrap(), 1.0, epsilon = 1e-15);
    }

    #[test]
    fn population_count_covers_transition_targets() {
        let model = LinearModel::new("t", vec![LinearEvent::transition(0, 3, "r")]).unwrap();
        assert_eq!(model.population_count(), 4);
        assert!(LinearModel::new("empty", vec![]).is_err());
    }

    #[test]
    fn generator_matrix() {
        let model = LinearModel::new(
            "g",
            vec![
                LinearEvent::birth(0, "b"),
                LinearEvent::death(0, "d"),
                LinearEvent::transition(0, 1, "0->1"),
                LinearEvent::transition(1, 0, "1->0"),
            ],
        )
        .unwrap();
        let params = Params::from([("b", 2.0), ("d", 0.5), ("0->1", 1.0), ("1->0", 3.0)]);
        let generator = model.generator(&params).unwrap();
        let expected = [[0.5, 1.0], [3.0, -3.0]];
        for (i, row) in expected.iter().enumerate() {
            for (j, &val) in row.iter().enumerate() {
                assert_abs_diff_eq!(generator[(i, j)], val, epsilon = 1e-15);
            }
        }
    }

    #[test]
    fn deterministic_zero_duration() {
        let model = LinearModel::new(
            "d",
            vec![
                LinearEvent::birth(0, "b"),
                LinearEvent::death(0, "d"),
                LinearEvent::transition(0, 1, "0->1"),
            ],
        )
        .unwrap();
        let params = Params::from([("b", 1.0), ("d", 1.0), ("0->1", 1.0)]);
        let state = model.deterministic().run_counts(&params, &[1, 0], 0.0).unwrap();
        assert_abs_diff_eq!(state[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn deterministic_single_type_growth() {
        let model = LinearModel::new(
            "bd",
            vec![LinearEvent::birth(0, "b"), LinearEvent::death(0, "d")],
        )
        .unwrap();
        let params = Params::from([("b", 1.5), ("d", 0.5)]);
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let state = model.deterministic().run(&params, &vec![10.0], 2.0, &mut rng).unwrap();
        assert_abs_diff_eq!(state[0], 10.0 * 2.0_f64.exp(), epsilon = 1e-9);
        assert_eq!(model.deterministic().name(), "bd (deterministic)");
    }

    #[test]
    fn stochastic_mean_matches_deterministic() {
        let model = LinearModel::new(
            "mean field",
            vec![
                LinearEvent::birth(0, "b"),
                LinearEvent::death(0, "d"),
                LinearEvent::transition(0, 1, "0->1"),
                LinearEvent::transition(1, 0, "1->0"),
            ],
        )
        .unwrap();
        let params = Params::from([("b", 1.0), ("d", 0.2), ("0->1", 0.5), ("1->0", 0.3)]);
        let initial = vec![100, 0];
        let timepoints = [0.25, 0.5];

        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let n_reps = 400;
        let mut sums = [[0.0; 2]; 2];
        for _ in 0..n_reps {
            let result = model
                .generate_simulation_data(&params, &initial, &timepoints, &mut rng)
                .unwrap();
            for (i_time, &time) in timepoints.iter().enumerate() {
                let state = result.data.at(time).unwrap();
                for i_type in 0..2 {
                    sums[i_time][i_type] += state[i_type] as f64;
                }
            }
        }

        let deterministic = model.deterministic();
        for (i_time, &time) in timepoints.iter().enumerate() {
            let expected = deterministic.run_counts(&params, &initial, time).unwrap();
            for i_type in 0..2 {
                let mean = sums[i_time][i_type] / n_reps as f64;
                assert!(
                    (mean - expected[i_type]).abs() < 0.05 * expected[i_type] + 1.0,
                    "time {time}, type {i_type}: mean {mean}, expected {}",
                    expected[i_type]
                );
            }
        }
    }

    #[test]
    fn long_term_behavior_single_type() {
        let model = LinearModel::new(
            "bd",
            vec![LinearEvent::birth(0, "b"), LinearEvent::death(0, "d")],
        )
        .unwrap();
        let params = Params::from([("b", 1.0), ("d", 0.4)]);
        let behavior = model.long_term_behavior(&params).unwrap();
        assert_abs_diff_eq!(behavior.growth_rate, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(behavior.composition[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn long_term_behavior_two_types() {
        // Pure switching between two types: Q = [[-1, 1], [2, -2]].
        let model = LinearModel::new(
            "switch",
            vec![
                LinearEvent::transition(0, 1, "0->1"),
                LinearEvent::transition(1, 0, "1->0"),
            ],
        )
        .unwrap();
        let params = Params::from([("0->1", 1.0), ("1->0", 2.0)]);
        let behavior = model.long_term_behavior(&params).unwrap();
        assert_abs_diff_eq!(behavior.growth_rate, 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(behavior.composition[0], 2.0 / 3.0, epsilon = 1e-10);
        assert_abs_diff_eq!(behavior.composition[1], 1.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn extinction_two_types() {
        let model = two_type_model();
        let extinction = model
            .calculate_extinction(&two_type_params(), &ExtinctionConfig::default())
            .unwrap();
        assert_abs_diff_eq!(extinction[0], 0.7632670961, epsilon = 1e-5);
        assert_abs_diff_eq!(extinction[1], 0.8879150645, epsilon = 1e-5);
    }

    #[test]
    fn extinction_two_types_accelerated() {
        let cfg = ExtinctionConfig {
            method: FixedPointMethod::Del2,
            ..ExtinctionConfig::default()
        };
        let extinction = two_type_model()
            .calculate_extinction(&two_type_params(), &cfg)
            .unwrap();
        assert_abs_diff_eq!(extinction[0], 0.7632670961, epsilon = 1e-5);
        assert_abs_diff_eq!(extinction[1], 0.8879150645, epsilon = 1e-5);
    }

    #[test]
    fn accelerated_extinction_avoids_trivial_root() {
        // Overshooting extrapolation used to land on [1, 1] here.
        let params = Params::from([
            ("b1", 2.889),
            ("b2", 1.022),
            ("d1", 1.584),
            ("d2", 1.141),
            ("0->1", 1.038),
            ("1->0", 0.826),
        ]);
        let model = two_type_model();
        let plain = model
            .calculate_extinction(&params, &ExtinctionConfig::default())
            .unwrap();
        let cfg = ExtinctionConfig {
            method: FixedPointMethod::Del2,
            ..ExtinctionConfig::default()
        };
        let accelerated = model.calculate_extinction(&params, &cfg).unwrap();
        assert!(plain.iter().all(|&q| q < 0.99), "{plain:?}");
        for (p, a) in plain.iter().zip(&accelerated) {
            assert_abs_diff_eq!(p, a, epsilon = 1e-9);
        }
    }

    #[test]
    fn extinction_single_type_birth_death() {
        let model = LinearModel::new(
            "bd",
            vec![LinearEvent::birth(0, "b"), LinearEvent::death(0, "d")],
        )
        .unwrap();
        let params = Params::from([("b", 1.0), ("d", 0.4)]);
        let extinction = model
            .calculate_extinction(&params, &ExtinctionConfig::default())
            .unwrap();
        assert_abs_diff_eq!(extinction[0], 0.4, epsilon = 1e-10);
    }

    #[test]
    fn extinction_is_a_fixed_point() {
        let model = two_type_model();
        let params = two_type_params();
        let extinction = model
            .calculate_extinction(&params, &ExtinctionConfig::default())
            .unwrap();

        let branches = model.extinction_branches(&params).unwrap();
        let reapplied = apply_branches(&branches, &extinction);
        for (q, q_next) in extinction.iter().zip(&reapplied) {
            assert!((0.0..=1.0).contains(q));
            assert_abs_diff_eq!(q, q_next, epsilon = 1e-10);
        }
    }

    #[test]
    fn extinction_is_the_minimal_root_for_random_rates() {
        let model = two_type_model();
        let names = ["b1", "b2", "d1", "d2", "0->1", "1->0"];
        let mut rng = ChaCha12Rng::seed_from_u64(2024);
        let mut checked = 0;
        for _ in 0..200 {
            let params: Params = names
                .iter()
                .map(|name| (name.to_string(), rng.random_range(0.1..3.0)))
                .collect();
            let growth_rate = model.long_term_behavior(&params).unwrap().growth_rate;
            // Convergence is sublinear at criticality.
            if growth_rate.abs() < 0.1 {
                continue;
            }
            checked += 1;

            let branches = model.extinction_branches(&params).unwrap();
            for method in [FixedPointMethod::Iteration, FixedPointMethod::Del2] {
                let cfg = ExtinctionConfig {
                    method,
                    ..ExtinctionConfig::default()
                };
                let extinction = model
                    .calculate_extinction(&params, &cfg)
                    .unwrap_or_else(|err| panic!("{method:?} failed for {params:?}: {err:#}"));
                let reapplied = apply_branches(&branches, &extinction);
                for (q, q_next) in extinction.iter().zip(&reapplied) {
                    assert!((0.0..=1.0).contains(q), "{method:?} {params:?}: {q}");
                    assert!((q - q_next).abs() < 1e-9, "{method:?} {params:?}: {q} -> {q_next}");
                    if growth_rate > 0.0 {
                        assert!(*q < 1.0 - 1e-6, "{method:?} {params:?}: {q}");
                    } else {
                        assert!(*q > 1.0 - 1e-6, "{method:?} {params:?}: {q}");
                    }
                }
            }
        }
        assert!(checked > 100, "only {checked} rate sets checked");
    }

    #[test]
    fn extinction_fails_for_degenerate_rates() {
        let model = LinearModel::new(
            "bd",
            vec![LinearEvent::birth(0, "b"), LinearEvent::death(0, "d")],
        )
        .unwrap();
        let params = Params::from([("b", 0.0), ("d", 0.0)]);
        assert!(model
            .calculate_extinction(&params, &ExtinctionConfig::default())
            .is_err());
    }

    #[test]
    fn sampled_extinction_agrees_with_fixed_point() {
        let model = LinearModel::new(
            "bd",
            vec![LinearEvent::birth(0, "b"), LinearEvent::death(0, "d")],
        )
        .unwrap();
        let params = Params::from([("b", 1.0), ("d", 0.4)]);
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        // By t = 10 surviving lineages number in the hundreds.
        let reports = model.sample_extinction(&params, 10.0, 2000, &mut rng).unwrap();
        assert!((reports[0].mean - 0.4).abs() < 0.04, "sampled {}", reports[0].mean);
    }
}
