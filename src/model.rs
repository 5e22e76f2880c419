//! Shared model contract and simulation result records.

use crate::params::Params;
use anyhow::{Context, Result, bail};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// A model evolves a state for a given duration under a parameter set.
///
/// Models are parameter-agnostic: the same model object can be run under
/// any number of parameter sets, which are supplied on every call.
pub trait Model {
    type State: Clone;

    /// Human-readable model name, recorded in simulation results.
    fn name(&self) -> String;

    /// Evolve a copy of `initial_state` for `duration` time units.
    ///
    /// The caller's state is never mutated.
    fn run<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_state: &Self::State,
        duration: f64,
        rng: &mut R,
    ) -> Result<Self::State>;

    /// Run the model through consecutive sorted timepoints, recording the
    /// state at each one (plus the initial state at time 0).
    ///
    /// A failure discards the whole result.
    fn generate_simulation_data<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_state: &Self::State,
        timepoints: &[f64],
        rng: &mut R,
    ) -> Result<SimulationResult<Self::State>> {
        let mut data = Vec::with_capacity(timepoints.len() + 1);
        data.push((0.0, initial_state.clone()));

        let mut last_time = 0.0;
        let mut state = initial_state.clone();
        for &time in timepoints {
            if time < last_time {
                bail!("timepoints must be sorted, but {time} follows {last_time}");
            }
            if time == 0.0 {
                continue;
            }
            if time == last_time {
                bail!("timepoint {time} is repeated");
            }
            state = self
                .run(params, &state, time - last_time, rng)
                .with_context(|| format!("failed to run model up to time {time}"))?;
            data.push((time, state.clone()));
            last_time = time;
        }

        Ok(SimulationResult {
            parameters: params.clone(),
            model: self.name(),
            data: Timeline(data),
        })
    }
}

/// Output of [`Model::generate_simulation_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult<S> {
    pub parameters: Params,
    pub model: String,
    pub data: Timeline<S>,
}

/// States indexed by time, in increasing time order.
///
/// Serialized as a map whose keys are the times rendered as text (integral
/// times without a fractional part), since text formats lack numeric keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline<S>(pub Vec<(f64, S)>);

impl<S> Timeline<S> {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f64, S)> {
        self.0.iter()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().map(|(time, _)| *time)
    }

    /// State recorded at exactly `time`, if any.
    pub fn at(&self, time: f64) -> Option<&S> {
        self.0
            .iter()
            .find(|(t, _)| *t == time)
            .map(|(_, state)| state)
    }

    pub fn last(&self) -> Option<&(f64, S)> {
        self.0.last()
    }
}

pub fn format_time(time: f64) -> String {
    if time.is_finite() && time.fract() == 0.0 && time.abs() < 1e15 {
        format!("{}", time as i64)
    } else {
        format!("{time}")
    }
}

impl<S: Serialize> Serialize for Timeline<S> {
    fn serialize<Z: Serializer>(&self, serializer: Z) -> Result<Z::Ok, Z::Error> {
        serializer.collect_map(self.0.iter().map(|(time, state)| (format_time(*time), state)))
    }
}

impl<'de, S: Deserialize<'de>> Deserialize<'de> for Timeline<S> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, S>::deserialize(deserializer)?;
        let mut data = Vec::with_capacity(map.len());
        for (key, state) in map {
            let time = key
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("invalid time key {key:?}")))?;
            data.push((time, state));
        }
        data.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Timeline(data))
    }
}
