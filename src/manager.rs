use crate::config::Config;
use crate::finite::{FiniteModel, Occupancy};
use crate::io;
use crate::linear::{Counts, LinearEvent, LinearModel};
use crate::methylation;
use crate::model::{Model, SimulationResult};
use crate::params::Params;
use crate::pdmp::{Fractions, Pdmp};
use crate::stats::AccumulatorReport;
use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Model selected in `run.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Linear model assembled from explicit events.
    Linear {
        #[serde(default = "default_linear_name")]
        name: String,
        events: Vec<LinearEvent>,
    },
    OneDimensional {
        site_count: usize,
    },
    SingleCell,
    SingleSite,
    Pdmp,
}

fn default_linear_name() -> String {
    "Linear Model".to_string()
}

/// Level crossing for the hitting-time query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HittingSpec {
    pub start: f64,
    pub end: f64,
}

/// Contents of `run.toml`: what to simulate or analyze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunSpec {
    /// Name under which results are stored.
    pub name: String,
    pub model: ModelSpec,
    pub params: Params,
    #[serde(default)]
    pub initial_state: Vec<f64>,
    #[serde(default)]
    pub times: Vec<f64>,
    /// Monte Carlo sample count.
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Time horizon of sampled extinction, if it should be estimated.
    #[serde(default)]
    pub extinction_horizon: Option<f64>,
    #[serde(default)]
    pub hitting: Option<HittingSpec>,
    /// Level count of the infinite-site extinction curve, for
    /// one-dimensional models.
    #[serde(default)]
    pub limit_points: Option<usize>,
}

fn default_samples() -> usize {
    100
}

impl RunSpec {
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        toml::from_str(&contents).context("failed to deserialize run")
    }

    fn counts(&self) -> Result<Counts> {
        self.initial_state
            .iter()
            .map(|&val| {
                if !(val >= 0.0 && val.fract() == 0.0) {
                    bail!("initial count must be a non-negative integer, but is {val}");
                }
                Ok(val as u64)
            })
            .collect()
    }

    fn fractions(&self) -> Result<Fractions> {
        match self.initial_state.as_slice() {
            &[m, h, u] => Ok([m, h, u]),
            state => bail!("initial state must hold (m, h, u), but is {state:?}"),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExtinctionReport {
    fixed_point: Vec<f64>,
    sampled: Option<Vec<AccumulatorReport>>,
    limit: Option<Vec<f64>>,
}

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
    run: RunSpec,
    rng: ChaCha12Rng,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P, seed: Option<u64>) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg_file = sim_dir.join("config.toml");
        let cfg = if cfg_file.exists() {
            Config::from_file(&cfg_file).context("failed to construct cfg")?
        } else {
            log::info!("{cfg_file:?} not found, using defaults");
            Config::default()
        };
        log::info!("{cfg:#?}");

        let run = RunSpec::from_file(sim_dir.join("run.toml")).context("failed to construct run")?;
        log::info!("{run:#?}");

        let rng = match seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        Ok(Self {
            sim_dir,
            cfg,
            run,
            rng,
        })
    }

    pub fn simulate(&mut self) -> Result<()> {
        let run = &self.run;
        match &run.model {
            ModelSpec::Linear { .. } | ModelSpec::OneDimensional { .. } => {
                let model = self.linear_model()?;
                let counts = run.counts()?;
                let result = model
                    .generate_simulation_data(&run.params, &counts, &run.times, &mut self.rng)
                    .context("failed to generate simulation data")?;
                io::write_simulation(self.simulations_dir(), &run.name, &result)?;

                let initial: Vec<f64> = counts.iter().map(|&count| count as f64).collect();
                let result = model
                    .deterministic()
                    .generate_simulation_data(&run.params, &initial, &run.times, &mut self.rng)
                    .context("failed to generate deterministic data")?;
                io::write_simulation(
                    self.simulations_dir(),
                    &format!("{}-deterministic", run.name),
                    &result,
                )?;
            }
            ModelSpec::SingleCell => {
                let model = methylation::single_cell_noncollaborative().with_config(&self.cfg.engine);
                let result = model
                    .generate_simulation_data(&run.params, &run.counts()?, &run.times, &mut self.rng)
                    .context("failed to generate simulation data")?;
                io::write_simulation(self.simulations_dir(), &run.name, &result)?;
            }
            ModelSpec::SingleSite => {
                let model = self.finite_model()?;
                let counts = run.counts()?;
                if counts.len() != model.labels().len() {
                    bail!("initial state must hold one count per label {:?}", model.labels());
                }
                let initial: Occupancy = model.labels().iter().cloned().zip(counts).collect();
                let result = model
                    .generate_simulation_data(&run.params, &initial, &run.times, &mut self.rng)
                    .context("failed to generate simulation data")?;
                io::write_simulation(self.simulations_dir(), &run.name, &result)?;
            }
            ModelSpec::Pdmp => {
                let pdmp = Pdmp::with_config(&self.cfg);
                let data = pdmp
                    .generate_timepoint_data(&run.params, &run.fractions()?, &run.times, None, &mut self.rng)
                    .context("failed to generate timepoint data")?;
                let result = SimulationResult {
                    parameters: run.params.clone(),
                    model: pdmp.name(),
                    data,
                };
                io::write_simulation(self.simulations_dir(), &run.name, &result)?;
            }
        }
        Ok(())
    }

    pub fn extinction(&mut self) -> Result<()> {
        let model = self.linear_model()?;
        let run = &self.run;

        let fixed_point = model
            .calculate_extinction(&run.params, &self.cfg.extinction)
            .context("failed to compute extinction probabilities")?;
        log::info!("extinction probabilities: {fixed_point:?}");

        let sampled = match run.extinction_horizon {
            Some(horizon) => {
                let reports = model
                    .sample_extinction(&run.params, horizon, run.samples, &mut self.rng)
                    .context("failed to sample extinction")?;
                log::info!("sampled extinction: {reports:?}");
                Some(reports)
            }
            None => None,
        };

        let limit = match (&run.model, run.limit_points) {
            (ModelSpec::OneDimensional { .. }, Some(point_count)) => {
                let limit = methylation::one_dimensional_noncollaborative_limit()
                    .with_config(&self.cfg.flow)
                    .calculate_extinction(&run.params, point_count)
                    .context("failed to compute infinite-site extinction")?;
                Some(limit)
            }
            (_, Some(_)) => bail!("limit_points requires a one_dimensional model"),
            (_, None) => None,
        };

        self.save_result(
            "extinction",
            &ExtinctionReport {
                fixed_point,
                sampled,
                limit,
            },
        )
    }

    pub fn long_term(&self) -> Result<()> {
        let behavior = self
            .linear_model()?
            .long_term_behavior(&self.run.params)
            .context("failed to compute long-term behavior")?;
        log::info!("{behavior:?}");
        self.save_result("long-term", &behavior)
    }

    pub fn stationary(&self) -> Result<()> {
        let distribution = self
            .finite_model()?
            .stationary_distribution(&self.run.params)
            .context("failed to compute stationary distribution")?;
        log::info!("{distribution:?}");
        self.save_result("stationary", &distribution)
    }

    pub fn wasserstein(&mut self) -> Result<()> {
        let pdmp = self.pdmp()?;
        let distances = pdmp
            .sample_wasserstein(&self.run.params, &self.run.times, self.run.samples, &mut self.rng)
            .context("failed to sample wasserstein distance")?;
        log::info!("{distances:?}");
        self.save_result("wasserstein", &distances)
    }

    pub fn hitting_time(&self) -> Result<()> {
        let pdmp = self.pdmp()?;
        let hitting = self.run.hitting.as_ref().context("run has no [hitting] section")?;
        let time = pdmp
            .get_hitting_time(&self.run.params, hitting.start, hitting.end)
            .context("failed to compute hitting time")?;
        log::info!("hitting time: {time}");
        self.save_result("hitting-time", &time)
    }

    pub fn list(&self) -> Result<()> {
        let dir = self.simulations_dir();
        if !dir.is_dir() {
            return Ok(());
        }
        for name in io::list_simulations(&dir)? {
            println!("{name}");
        }
        Ok(())
    }

    fn linear_model(&self) -> Result<LinearModel> {
        let model = match &self.run.model {
            ModelSpec::Linear { name, events } => LinearModel::new(name.clone(), events.clone())?,
            ModelSpec::OneDimensional { site_count } => {
                methylation::one_dimensional_noncollaborative(*site_count)?
            }
            other => bail!("{other:?} is not a linear model"),
        };
        Ok(model.with_config(&self.cfg.engine))
    }

    fn finite_model(&self) -> Result<FiniteModel> {
        match &self.run.model {
            ModelSpec::SingleSite => Ok(methylation::single_site()?.with_config(&self.cfg.engine)),
            other => bail!("{other:?} is not a finite-state model"),
        }
    }

    fn pdmp(&self) -> Result<Pdmp> {
        match &self.run.model {
            ModelSpec::Pdmp => Ok(Pdmp::with_config(&self.cfg)),
            other => bail!("{other:?} is not a piecewise-deterministic model"),
        }
    }

    fn simulations_dir(&self) -> PathBuf {
        self.sim_dir.join("simulations")
    }

    fn save_result<T: Serialize>(&self, analysis: &str, result: &T) -> Result<()> {
        io::write_simulation(
            self.sim_dir.join("results"),
            &format!("{}-{analysis}", self.run.name),
            result,
        )
        .with_context(|| format!("failed to save {analysis} result"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_run_is_parsed() {
        let run: RunSpec = toml::from_str(
            r#"
            name = "bd"
            initial_state = [10, 0]
            times = [1.0, 2.0]

            [model]
            kind = "linear"
            events = [
                { source = 0, law = { param = "b" }, effect = "birth" },
                { source = 0, law = { param = "s" }, effect = { transition = { target = 1 } } },
            ]

            [params]
            b = 1.0
            s = 0.5
            "#,
        )
        .unwrap();
        let ModelSpec::Linear { name, events } = &run.model else {
            panic!("expected a linear model");
        };
        assert_eq!(name, "Linear Model");
        assert_eq!(events[1], LinearEvent::transition(0, 1, "s"));
        assert_eq!(run.counts().unwrap(), vec![10, 0]);
        assert_eq!(run.samples, 100);
    }

    #[test]
    fn pdmp_run_is_parsed() {
        let run: RunSpec = toml::from_str(
            r#"
            name = "p"
            initial_state = [0.0, 0.5, 0.5]

            [model]
            kind = "pdmp"

            [params]
            b = 1.0

            [hitting]
            start = 0.0
            end = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(run.model, ModelSpec::Pdmp);
        assert_eq!(run.fractions().unwrap(), [0.0, 0.5, 0.5]);
        assert_eq!(run.hitting, Some(HittingSpec { start: 0.0, end: 1.0 }));
    }

    #[test]
    fn fractional_counts_are_rejected() {
        let run: RunSpec = toml::from_str(
            r#"
            name = "x"
            initial_state = [1.5]
            [model]
            kind = "single_cell"
            [params]
            "#,
        )
        .unwrap();
        assert!(run.counts().is_err());
    }

    #[test]
    fn limit_points_are_parsed() {
        let run: RunSpec = toml::from_str(
            r#"
            name = "od"
            limit_points = 11
            [model]
            kind = "one_dimensional"
            site_count = 4
            [params]
            "#,
        )
        .unwrap();
        assert_eq!(run.limit_points, Some(11));
        assert_eq!(run.model, ModelSpec::OneDimensional { site_count: 4 });
    }
}
