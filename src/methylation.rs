//! Ready-made methylation models.

use crate::config::{EngineConfig, FlowConfig};
use crate::engine::{Event, EventModel};
use crate::finite::{ConstantEvent, FiniteModel};
use crate::linear::{Counts, Effect, LinearEvent, LinearModel, RateLaw};
use crate::model::Model;
use crate::ode;
use crate::params::Params;
use anyhow::{Context, Result, bail, ensure};
use ode_solvers::{SVector, System};
use rand::Rng;

/// Population of cells typed by how many of their `site_count` sites are
/// methylated.
///
/// Sites methylate independently at rate `r_um` and demethylate at rate
/// `r_mu`. Birth and death rates interpolate linearly between `b_0`/`d_0`
/// (no site methylated) and `b_M`/`d_M` (every site methylated).
pub fn one_dimensional_noncollaborative(site_count: usize) -> Result<LinearModel> {
    let type_count = site_count + 1;
    let interpolated = |min: &str, max: &str| RateLaw::Interpolated {
        min: min.to_string(),
        max: max.to_string(),
        type_count,
    };

    let mut events = Vec::new();
    for i in 0..type_count {
        if i != site_count {
            events.push(LinearEvent::new(
                i,
                RateLaw::Methylation {
                    param: "r_um".to_string(),
                    site_count,
                },
                Effect::Transition { target: i + 1 },
            ));
        }
        if i != 0 {
            events.push(LinearEvent::new(
                i,
                RateLaw::Demethylation {
                    param: "r_mu".to_string(),
                },
                Effect::Transition { target: i - 1 },
            ));
        }
        events.push(LinearEvent::new(i, interpolated("b_0", "b_M"), Effect::Birth));
        events.push(LinearEvent::new(i, interpolated("d_0", "d_M"), Effect::Death));
    }

    LinearModel::new(
        format!("One Dimensional Noncollaborative Methylation ({site_count} sites)"),
        events,
    )
}

/// Infinite-site limit of [`one_dimensional_noncollaborative`].
pub fn one_dimensional_noncollaborative_limit() -> InfiniteSiteLimit {
    InfiniteSiteLimit::default()
}

/// Rates of the limit model at methylation level `x`.
#[derive(Debug, Clone, PartialEq)]
struct LimitRates {
    b_0: f64,
    b_m: f64,
    d_0: f64,
    d_m: f64,
    r_um: f64,
    r_mu: f64,
}

impl LimitRates {
    fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            b_0: params.rate("b_0")?,
            b_m: params.rate("b_M")?,
            d_0: params.rate("d_0")?,
            d_m: params.rate("d_M")?,
            r_um: params.rate("r_um")?,
            r_mu: params.rate("r_mu")?,
        })
    }

    fn birth(&self, x: f64) -> f64 {
        x * self.b_m + (1.0 - x) * self.b_0
    }

    fn death(&self, x: f64) -> f64 {
        x * self.d_m + (1.0 - x) * self.d_0
    }

    /// Rate of change of the methylation level.
    fn drift(&self, x: f64) -> f64 {
        self.r_um * (1.0 - x) - self.r_mu * x
    }

    /// Root of the drift.
    fn equilibrium(&self) -> Result<f64> {
        let total = self.r_um + self.r_mu;
        ensure!(total > 0.0, "methylation level has no drift (r_um + r_mu = 0)");
        Ok(self.r_um / total)
    }
}

/// Extinction ODE in the distance `s` from the equilibrium, walking
/// towards lower (`direction = -1`) or higher (`direction = 1`) levels.
#[derive(Debug, Clone, Copy)]
struct ExtinctionSlope<'a> {
    rates: &'a LimitRates,
    equilibrium: f64,
    direction: f64,
    /// Slope of the solution through the singular point at the equilibrium.
    tangent: f64,
}

impl ExtinctionSlope<'_> {
    fn slope(&self, x: f64, q: f64) -> f64 {
        let drift = self.rates.drift(x);
        if drift.abs() <= 1e-12 * (self.rates.r_um + self.rates.r_mu) {
            return if q >= 1.0 { 0.0 } else { self.tangent };
        }
        (self.rates.birth(x) * q - self.rates.death(x)) * (q - 1.0) / -drift
    }
}

impl System<f64, SVector<f64, 1>> for ExtinctionSlope<'_> {
    fn system(&self, s: f64, y: &SVector<f64, 1>, dy: &mut SVector<f64, 1>) {
        let x = self.equilibrium + self.direction * s;
        dy[0] = self.direction * self.slope(x, y[0]);
    }
}

/// Methylation level as a continuous variable `x` in `[0, 1]`.
///
/// Each cell's level drifts deterministically towards `r_um / (r_um +
/// r_mu)` while cells divide and die at rates interpolated in `x`. The
/// extinction probability of a cell at level `x` solves
/// `drift(x) q' + (b q - d)(q - 1) = 0`, starting from `q = min(d / b, 1)`
/// at the equilibrium, where the drift vanishes.
#[derive(Debug, Clone, Default)]
pub struct InfiniteSiteLimit {
    flow: FlowConfig,
}

impl InfiniteSiteLimit {
    pub fn with_config(mut self, cfg: &FlowConfig) -> Self {
        self.flow = cfg.clone();
        self
    }

    /// Extinction probabilities at the `point_count` evenly spaced levels
    /// `i / (point_count - 1)`.
    pub fn calculate_extinction(&self, params: &Params, point_count: usize) -> Result<Vec<f64>> {
        ensure!(point_count >= 2, "point count must be at least 2, but is {point_count}");
        let rates = LimitRates::from_params(params)?;
        let equilibrium = rates.equilibrium()?;

        let birth = rates.birth(equilibrium);
        let death = rates.death(equilibrium);
        let q_eq = if birth > 0.0 { (death / birth).min(1.0) } else { 1.0 };
        let tangent = if q_eq < 1.0 {
            let (birth_slope, death_slope) = (rates.b_m - rates.b_0, rates.d_m - rates.d_0);
            (q_eq - 1.0) * (birth_slope * q_eq - death_slope)
                / (rates.r_um + rates.r_mu + birth - death)
        } else {
            0.0
        };
        log::debug!("equilibrium level {equilibrium}, extinction there {q_eq}");

        let levels: Vec<f64> = (0..point_count)
            .map(|i| i as f64 / (point_count - 1) as f64)
            .collect();
        let below: Vec<usize> = (0..point_count).rev().filter(|&i| levels[i] < equilibrium).collect();
        let above: Vec<usize> = (0..point_count).filter(|&i| levels[i] >= equilibrium).collect();

        let mut extinction = vec![q_eq; point_count];
        for (direction, indices) in [(-1.0, below), (1.0, above)] {
            let system = ExtinctionSlope {
                rates: &rates,
                equilibrium,
                direction,
                tangent,
            };
            let (mut s, mut q) = (0.0, q_eq);
            for i in indices {
                let s_next = (levels[i] - equilibrium).abs();
                q = ode::integrate(system, s, s_next, SVector::from([q]), &self.flow)
                    .with_context(|| format!("failed to integrate extinction to level {}", levels[i]))?
                    .last()
                    .map(|(_, y)| y[0])
                    .context("missing extinction value")?;
                if !q.is_finite() {
                    bail!("extinction diverged at level {}", levels[i]);
                }
                extinction[i] = q;
                s = s_next;
            }
        }

        Ok(extinction)
    }
}

/// Site classes of a single cell, in state order.
pub const SINGLE_CELL_CLASSES: [&str; 3] = ["u", "h", "m"];

/// Event of the single-cell model over `(N_u, N_h, N_m)`.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleCellEvent {
    /// A single site changes class.
    Switch(LinearEvent),
    /// Cell division at a constant rate, followed by tracking one daughter.
    ///
    /// Every methylated site becomes hemimethylated and every hemimethylated
    /// site becomes unmethylated with probability one half.
    Division { param: String },
}

impl Event for SingleCellEvent {
    type State = Counts;

    fn rate(&self, state: &Counts, params: &Params) -> Result<f64> {
        match self {
            SingleCellEvent::Switch(event) => event.rate(state, params),
            SingleCellEvent::Division { param } => params.rate(param),
        }
    }

    fn apply<R: Rng + ?Sized>(&self, state: &mut Counts, rng: &mut R) {
        match self {
            SingleCellEvent::Switch(event) => event.apply(state, rng),
            SingleCellEvent::Division { .. } => {
                let lost = (0..state[1]).filter(|_| rng.random_bool(0.5)).count() as u64;
                state[0] += lost;
                state[1] = state[1] - lost + state[2];
                state[2] = 0;
            }
        }
    }
}

/// Site classes of one cell followed through divisions.
#[derive(Debug, Clone)]
pub struct SingleCellModel {
    engine: EventModel<SingleCellEvent>,
}

impl SingleCellModel {
    pub fn with_config(mut self, cfg: &EngineConfig) -> Self {
        self.engine = self.engine.with_config(cfg);
        self
    }
}

/// Single cell with noncollaborative switching `u <-> h <-> m` and
/// divisions at rate `b`.
pub fn single_cell_noncollaborative() -> SingleCellModel {
    let events = vec![
        SingleCellEvent::Switch(LinearEvent::transition(0, 1, "r_uh")),
        SingleCellEvent::Switch(LinearEvent::transition(1, 0, "r_hu")),
        SingleCellEvent::Switch(LinearEvent::transition(1, 2, "r_hm")),
        SingleCellEvent::Switch(LinearEvent::transition(2, 1, "r_mh")),
        SingleCellEvent::Division {
            param: "b".to_string(),
        },
    ];
    SingleCellModel {
        engine: EventModel::new("Single Cell Noncollaborative Methylation", events),
    }
}

impl Model for SingleCellModel {
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
        if initial_state.len() != SINGLE_CELL_CLASSES.len() {
            bail!(
                "state must hold (N_u, N_h, N_m), but has {} entries",
                initial_state.len()
            );
        }
        self.engine.run(params, initial_state, duration, rng)
    }
}

/// One site followed along a lineage.
///
/// The site switches `u <-> h <-> m` and a division at rate `b` resets
/// `m` to `u` and `h` to `u` half the time.
pub fn single_site() -> Result<FiniteModel> {
    FiniteModel::new(
        "Single Site Methylation",
        vec![
            ConstantEvent::new("u", "h", "r_uh"),
            ConstantEvent::new("h", "m", "r_hm"),
            ConstantEvent::new("h", "u", "r_hu"),
            ConstantEvent::new("m", "h", "r_mh"),
            ConstantEvent::new("m", "u", "b"),
            ConstantEvent::scaled("h", "u", "b", 0.5),
        ],
    )
}
