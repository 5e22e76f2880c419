use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Model parameters.
///
/// A flat mapping from parameter name to value, supplied fresh to every
/// simulation or analysis call. Models never store parameters themselves.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, f64>);

impl Params {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Look up a parameter, failing if it is missing.
    pub fn get(&self, name: &str) -> Result<f64> {
        match self.0.get(name) {
            Some(&val) => Ok(val),
            None => bail!("missing parameter {name:?}"),
        }
    }

    /// Look up a parameter that must be a non-negative rate.
    pub fn rate(&self, name: &str) -> Result<f64> {
        let val = self.get(name)?;
        if !(val >= 0.0) {
            bail!("parameter {name:?} must be a non-negative rate, but is {val}");
        }
        Ok(val)
    }

    pub fn insert(&mut self, name: impl Into<String>, val: f64) {
        self.0.insert(name.into(), val);
    }

    pub fn with(mut self, name: impl Into<String>, val: f64) -> Self {
        self.insert(name, val);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, &val)| (name.as_str(), val))
    }
}

impl<K: Into<String>, const N: usize> From<[(K, f64); N]> for Params {
    fn from(pairs: [(K, f64); N]) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl FromIterator<(String, f64)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
