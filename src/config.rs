use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Numerical constants shared by every model.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub extinction: ExtinctionConfig,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub coupling: CouplingConfig,
}

/// Event loop limits.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of events (or resets) in a single run.
    pub max_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
        }
    }
}

/// Refinement scheme applied after the burn-in iterations.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedPointMethod {
    /// Plain repeated application of the map.
    Iteration,
    /// Steffensen's method (Aitken's delta-squared acceleration).
    Del2,
}

/// Extinction fixed-point solver constants.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtinctionConfig {
    /// Plain iterations from the interior guess before refinement.
    pub burn_in: usize,
    /// Relative tolerance between successive refined guesses, also required
    /// of one confirming application of the map.
    pub tolerance: f64,
    /// Maximum number of refinement iterations.
    pub max_iter: usize,
    pub method: FixedPointMethod,
}

impl Default for ExtinctionConfig {
    fn default() -> Self {
        Self {
            burn_in: 10,
            tolerance: 1e-13,
            max_iter: 50_000,
            method: FixedPointMethod::Iteration,
        }
    }
}

/// Flow integration constants.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// Length of each integration chunk while searching for a hitting time.
    pub hitting_step: f64,
    /// Width below which a bracketed hitting time is accepted.
    pub hitting_tol: f64,
    /// Maximum number of chunks while searching for a hitting time.
    pub max_chunks: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            abs_tol: 1e-10,
            rel_tol: 1e-10,
            hitting_step: 0.01,
            hitting_tol: 1e-9,
            max_chunks: 1_000_000,
        }
    }
}

/// Coupled sampling policy.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CouplingConfig {
    /// Continue (with a warning) when the coupling precondition fails.
    pub allow_unverified: bool,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded. Missing sections take their defaults.
    /// Performs validation on all values before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_num(self.engine.max_steps, 1..).context("invalid maximum number of steps")?;

        let ext = &self.extinction;
        check_num(ext.burn_in, 0..1_000_000).context("invalid number of burn-in iterations")?;
        check_num(ext.tolerance, 0.0..1.0).context("invalid fixed-point tolerance")?;
        check_num(ext.max_iter, 1..).context("invalid maximum number of iterations")?;

        let flow = &self.flow;
        check_num(flow.abs_tol, 0.0..1.0).context("invalid absolute tolerance")?;
        check_num(flow.rel_tol, 0.0..1.0).context("invalid relative tolerance")?;
        if flow.abs_tol == 0.0 && flow.rel_tol == 0.0 {
            bail!("flow tolerances must not both be zero");
        }
        check_num(flow.hitting_step, f64::MIN_POSITIVE..).context("invalid hitting step")?;
        check_num(flow.hitting_tol, f64::MIN_POSITIVE..).context("invalid hitting tolerance")?;
        check_num(flow.max_chunks, 1..).context("invalid maximum number of chunks")?;

        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
