//! Piecewise-deterministic Markov process over three methylation classes.
//!
//! The state is the fraction of sites that are methylated (`m`),
//! hemimethylated (`h`) and unmethylated (`u`). Between cell divisions the
//! fractions follow a deterministic flow; divisions arrive as a Poisson
//! process of rate `b` and remap the state with [`split`].

use crate::config::{Config, CouplingConfig, EngineConfig, FlowConfig};
use crate::model::{Model, Timeline};
use crate::params::Params;
use crate::sampling::{exponential_waiting_time, poisson_times};
use crate::stats::{Accumulator, AccumulatorReport};
use crate::ode;
use anyhow::{Context, Result, bail};
use ode_solvers::{SVector, System};
use rand::Rng;

/// Fractions of methylated, hemimethylated and unmethylated sites.
pub type Fractions = [f64; 3];

pub const M: usize = 0;
pub const H: usize = 1;
pub const U: usize = 2;

const CLASS_NAMES: [&str; 3] = ["m", "h", "u"];

/// Every parameter the flow and the division process read.
pub const PARAM_NAMES: [&str; 13] = [
    "b", "r_uh", "r_hm", "r_mh", "r_hu", "r_uh_h", "r_uh_m", "r_hm_h", "r_hm_m", "r_mh_h",
    "r_mh_u", "r_hu_h", "r_hu_u",
];

type Vector3 = SVector<f64, 3>;

/// Division remap: full methylation is lost and each hemimethylated site
/// becomes hemimethylated or unmethylated with equal probability.
pub fn split(state: Fractions) -> Fractions {
    [0.0, state[M] + state[H] / 2.0, state[H] / 2.0 + state[U]]
}

/// Mean methylation per site pair, `2m + h`.
pub fn methylation_level(state: &Fractions) -> f64 {
    2.0 * state[M] + state[H]
}

/// Whether class `c` catalyzes the switch `a -> b`.
///
/// Only adjacent classes switch. Methylation (towards `m`) is never
/// catalyzed by `u`, demethylation (towards `u`) never by `m`.
fn is_catalyst(a: usize, b: usize, c: usize) -> bool {
    a.abs_diff(b) == 1 && !(a > b && c == U) && !(a < b && c == M)
}

fn rate_name(a: usize, b: usize, c: Option<usize>) -> String {
    let mut name = format!("r_{}{}", CLASS_NAMES[a], CLASS_NAMES[b]);
    if let Some(c) = c {
        name.push('_');
        name.push_str(CLASS_NAMES[c]);
    }
    name
}

/// Rates of the deterministic flow and of the division process.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRates {
    /// Per-capita switching rate `a -> b`.
    noncollaborative: [[f64; 3]; 3],
    /// Switching rate `a -> b` per unit fraction of catalyst `c`.
    collaborative: [[[f64; 3]; 3]; 3],
    /// Division rate.
    pub division: f64,
}

impl FlowRates {
    pub fn from_params(params: &Params) -> Result<Self> {
        let mut noncollaborative = [[0.0; 3]; 3];
        let mut collaborative = [[[0.0; 3]; 3]; 3];
        for a in 0..3usize {
            for b in 0..3usize {
                if a.abs_diff(b) != 1 {
                    continue;
                }
                noncollaborative[a][b] = params.rate(&rate_name(a, b, None))?;
                for c in 0..3usize {
                    if is_catalyst(a, b, c) {
                        collaborative[a][b][c] = params.rate(&rate_name(a, b, Some(c)))?;
                    }
                }
            }
        }
        Ok(Self {
            noncollaborative,
            collaborative,
            division: params.rate("b")?,
        })
    }

    /// Right-hand side of the flow: net flux into each class.
    pub fn derivative(&self, x: &Fractions) -> Fractions {
        let mut flow = [0.0; 3];
        for a in 0..3 {
            for b in 0..3 {
                let mut rate = self.noncollaborative[a][b];
                for c in 0..3 {
                    rate += self.collaborative[a][b][c] * x[c];
                }
                let flux = x[a] * rate;
                flow[a] -= flux;
                flow[b] += flux;
            }
        }
        flow
    }
}

/// Flow system handed to the integrator.
struct FlowSystem<'a> {
    rates: &'a FlowRates,
}

impl System<f64, Vector3> for FlowSystem<'_> {
    fn system(&self, _x: f64, y: &Vector3, dy: &mut Vector3) {
        let flow = self.rates.derivative(&[y[0], y[1], y[2]]);
        *dy = Vector3::from(flow);
    }
}

/// Accepted steps of the flow from `t_start` to `t_end`.
fn flow_steps(
    rates: &FlowRates,
    state: Fractions,
    t_start: f64,
    t_end: f64,
    cfg: &FlowConfig,
) -> Result<Vec<(f64, Fractions)>> {
    let steps = ode::integrate(FlowSystem { rates }, t_start, t_end, Vector3::from(state), cfg)
        .context("failed to integrate flow")?;
    Ok(steps
        .into_iter()
        .map(|(time, y)| (time, [y[0], y[1], y[2]]))
        .collect())
}

fn flow_state(
    rates: &FlowRates,
    state: Fractions,
    t_start: f64,
    t_end: f64,
    cfg: &FlowConfig,
) -> Result<Fractions> {
    flow_steps(rates, state, t_start, t_end, cfg)?
        .last()
        .map(|&(_, state)| state)
        .context("missing final flow state")
}

/// The three-class hybrid flow-and-jump process.
#[derive(Debug, Clone, Default)]
pub struct Pdmp {
    engine: EngineConfig,
    flow: FlowConfig,
    coupling: CouplingConfig,
}

impl Pdmp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(cfg: &Config) -> Self {
        Self {
            engine: cfg.engine.clone(),
            flow: cfg.flow.clone(),
            coupling: cfg.coupling.clone(),
        }
    }

    /// States at every requested time and every division time.
    ///
    /// Divisions are drawn from a Poisson process of rate `b` over the
    /// requested horizon unless `splitting_times` is given. At a division
    /// time the recorded state is the one after the split.
    pub fn generate_timepoint_data<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_state: &Fractions,
        times: &[f64],
        splitting_times: Option<&[f64]>,
        rng: &mut R,
    ) -> Result<Timeline<Fractions>> {
        check_fractions(initial_state).context("invalid initial state")?;
        if times.windows(2).any(|pair| pair[0] > pair[1]) || times.iter().any(|&t| !(t >= 0.0)) {
            bail!("times must be sorted and non-negative");
        }
        let rates = FlowRates::from_params(params)?;

        let horizon = times.last().copied().unwrap_or(0.0);
        let splitting_times = match splitting_times {
            Some(splitting_times) => splitting_times.to_vec(),
            None => poisson_times(rates.division, horizon, rng)?,
        };
        if splitting_times.iter().any(|&t| !(t >= 0.0)) {
            bail!("splitting times must be non-negative");
        }

        // Queries sort before splits at the same time, so the split wins.
        let mut stops: Vec<(f64, bool)> = times
            .iter()
            .map(|&t| (t, false))
            .chain(splitting_times.iter().map(|&t| (t, true)))
            .collect();
        stops.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut data = vec![(0.0, *initial_state)];
        let mut state = *initial_state;
        let mut time = 0.0;
        for (stop, is_split) in stops {
            if stop > time {
                state = flow_state(&rates, state, time, stop, &self.flow)?;
                time = stop;
            }
            if is_split {
                state = split(state);
            }
            match data.last_mut() {
                Some(last) if last.0 == stop => last.1 = state,
                _ => data.push((stop, state)),
            }
        }

        Ok(Timeline(data))
    }

    /// Sample one trajectory per initial state under a shared division sequence.
    pub fn sample_simultaneously<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_states: &[Fractions],
        times: &[f64],
        rng: &mut R,
    ) -> Result<Vec<Timeline<Fractions>>> {
        let horizon = times.last().copied().unwrap_or(0.0);
        let splitting_times = poisson_times(params.rate("b")?, horizon, rng)?;
        initial_states
            .iter()
            .map(|initial_state| {
                self.generate_timepoint_data(params, initial_state, times, Some(&splitting_times), rng)
            })
            .collect()
    }

    /// Coupled estimate of the distance between the fully methylated and
    /// the fully unmethylated starting points at each time.
    ///
    /// For each sample, both paths share their division times, and the
    /// discrepancy `(m₁ - m₂) + (u₂ - u₁)` is averaged over samples.
    pub fn sample_wasserstein<R: Rng + ?Sized>(
        &self,
        params: &Params,
        times: &[f64],
        sample_count: usize,
        rng: &mut R,
    ) -> Result<Timeline<AccumulatorReport>> {
        if !Self::verify_wasserstein_lemma(params)? {
            if !self.coupling.allow_unverified {
                bail!("coupling precondition does not hold (r_hu_u >= r_uh_h and r_hm_m >= r_mh_h)");
            }
            log::warn!("coupling precondition does not hold: coupling may not be optimal");
        }

        let initial_states = [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let mut accs = vec![Accumulator::new(); times.len()];
        for i_sample in 0..sample_count {
            let paths = self
                .sample_simultaneously(params, &initial_states, times, rng)
                .with_context(|| format!("failed to sample coupled paths {i_sample}"))?;
            for (acc, &time) in accs.iter_mut().zip(times) {
                let first = paths[0].at(time).context("missing first path state")?;
                let second = paths[1].at(time).context("missing second path state")?;
                acc.add(first[M] - second[M] + second[U] - first[U]);
            }

            if (i_sample + 1) % (sample_count / 10).max(1) == 0 {
                let progress = 100.0 * (i_sample + 1) as f64 / sample_count as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        Ok(Timeline(
            times
                .iter()
                .zip(&accs)
                .map(|(&time, acc)| (time, acc.report()))
                .collect(),
        ))
    }

    /// Time for the flow alone to carry `(0, start, 1 - start)` to a
    /// methylation level `2m + h` of at least `end`.
    ///
    /// # Errors
    /// Fails if the coupling precondition does not hold, since the hitting
    /// time is then ill-defined, or if the level is not reached within the
    /// chunk ceiling.
    pub fn get_hitting_time(&self, params: &Params, start: f64, end: f64) -> Result<f64> {
        if !Self::verify_wasserstein_lemma(params)? {
            bail!("hitting time is undefined: coupling precondition does not hold");
        }
        if !(0.0..=1.0).contains(&start) {
            bail!("start must be in [0, 1], but is {start}");
        }
        let rates = FlowRates::from_params(params)?;
        let cfg = &self.flow;

        let mut state = [0.0, start, 1.0 - start];
        if methylation_level(&state) >= end {
            return Ok(0.0);
        }

        let mut time = 0.0;
        for _ in 0..cfg.max_chunks {
            let chunk_end = time + cfg.hitting_step;
            let steps = flow_steps(&rates, state, time, chunk_end, cfg)?;
            if let Some(k) = steps.iter().position(|(_, s)| methylation_level(s) >= end) {
                // The initial level is below `end`, so the crossing follows a step.
                let (t_lo, lo_state) = steps[k.saturating_sub(1)];
                return bisect_hitting_time(&rates, lo_state, t_lo, steps[k].0, end, cfg);
            }
            state = steps.last().map(|&(_, s)| s).context("missing final flow state")?;
            time = chunk_end;
        }

        bail!("methylation level did not reach {end} by time {time}")
    }

    /// Whether the rate inequalities behind the coupling argument hold.
    pub fn verify_wasserstein_lemma(params: &Params) -> Result<bool> {
        Ok(params.get("r_hu_u")? >= params.get("r_uh_h")?
            && params.get("r_hm_m")? >= params.get("r_mh_h")?)
    }

    /// Average rates into a model symmetric per cytosine.
    pub fn convert_to_cytosine_mean(params: &Params) -> Result<Params> {
        let p = |name: &str| params.get(name);

        let methylation = (p("r_uh")? / 2.0 + p("r_hm")?) / 2.0;
        let demethylation = (p("r_mh")? / 2.0 + p("r_hu")?) / 2.0;
        let coll_methylation =
            (p("r_uh_h")? / 2.0 + p("r_uh_m")? / 4.0 + p("r_hm_h")? + p("r_hm_m")? / 2.0) / 4.0;
        let coll_demethylation =
            (p("r_mh_h")? / 2.0 + p("r_mh_u")? / 4.0 + p("r_hu_h")? + p("r_hu_u")? / 2.0) / 4.0;

        Ok(Params::from([
            ("b", p("b")?),
            ("r_hm", methylation),
            ("r_uh", methylation * 2.0),
            ("r_hu", demethylation),
            ("r_mh", demethylation * 2.0),
            ("r_hm_h", coll_methylation),
            ("r_hm_m", coll_methylation * 2.0),
            ("r_uh_h", coll_methylation * 2.0),
            ("r_uh_m", coll_methylation * 4.0),
            ("r_hu_h", coll_demethylation),
            ("r_hu_u", coll_demethylation * 2.0),
            ("r_mh_h", coll_demethylation * 2.0),
            ("r_mh_u", coll_demethylation * 4.0),
        ]))
    }

    /// Zero every collaborative rate.
    pub fn convert_to_noncollaborative(params: &Params) -> Params {
        let mut params = params.clone();
        for name in [
            "r_hm_h", "r_hm_m", "r_uh_h", "r_uh_m", "r_hu_h", "r_hu_u", "r_mh_h", "r_mh_u",
        ] {
            params.insert(name, 0.0);
        }
        params
    }
}

impl Model for Pdmp {
    type State = Fractions;

    fn name(&self) -> String {
        "Piecewise Deterministic Methylation".to_string()
    }

    fn run<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_state: &Fractions,
        duration: f64,
        rng: &mut R,
    ) -> Result<Fractions> {
        if !(duration >= 0.0) {
            bail!("duration must be non-negative, but is {duration}");
        }
        check_fractions(initial_state).context("invalid initial state")?;
        let rates = FlowRates::from_params(params)?;

        let mut state = *initial_state;
        let mut time = 0.0;
        for _ in 0..self.engine.max_steps {
            let waiting_time = if rates.division > 0.0 {
                exponential_waiting_time(rates.division, rng)?
            } else {
                f64::INFINITY
            };
            if time + waiting_time >= duration {
                return flow_state(&rates, state, time, duration, &self.flow);
            }
            state = flow_state(&rates, state, time, time + waiting_time, &self.flow)?;
            state = split(state);
            time += waiting_time;
        }

        bail!(
            "maximum number of divisions ({}) exceeded in a single run",
            self.engine.max_steps
        )
    }
}

fn bisect_hitting_time(
    rates: &FlowRates,
    state: Fractions,
    t_start: f64,
    t_hit: f64,
    target: f64,
    cfg: &FlowConfig,
) -> Result<f64> {
    const MAX_BISECTIONS: usize = 200;

    let (mut lo, mut hi) = (t_start, t_hit);
    for _ in 0..MAX_BISECTIONS {
        if hi - lo <= cfg.hitting_tol {
            break;
        }
        let mid = 0.5 * (lo + hi);
        let mid_state = flow_state(rates, state, t_start, mid, cfg)?;
        if methylation_level(&mid_state) >= target {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Ok(hi)
}

fn check_fractions(state: &Fractions) -> Result<()> {
    // Integration drift may push a fraction marginally outside [0, 1].
    let tol = 1e-8;
    if state.iter().any(|&x| !(-tol..=1.0 + tol).contains(&x)) {
        bail!("fractions must be in [0, 1], but are {state:?}");
    }
    let sum: f64 = state.iter().sum();
    if (sum - 1.0).abs() > tol {
        bail!("fractions must sum to 1.0 (tolerance: {tol}), but sum to {sum}");
    }
    Ok(())
}
