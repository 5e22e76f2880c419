//! Persisted simulation files.
//!
//! Simulations are stored as `<dir>/<name>.json`. JSON object keys are
//! always text, so reading converts keys that look like numbers back into
//! numeric keys.

use crate::model::SimulationResult;
use anyhow::{Context, Result};
use glob::glob;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

/// Object key of a stored document.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Key {
    /// Integer if possible, then float, otherwise text.
    pub fn parse(key: &str) -> Self {
        if let Ok(val) = key.parse::<i64>() {
            Key::Int(val)
        } else if let Ok(val) = key.parse::<f64>() {
            Key::Float(val)
        } else {
            Key::Text(key.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Int(val) => Some(*val as f64),
            Key::Float(val) => Some(*val),
            Key::Text(_) => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Key::Int(val) => val.to_string(),
            Key::Float(val) => val.to_string(),
            Key::Text(val) => val.clone(),
        }
    }
}

/// A stored document with numeric keys restored.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    Leaf(Value),
    List(Vec<Tree>),
    Map(Vec<(Key, Tree)>),
}

impl Tree {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => Tree::List(items.into_iter().map(Tree::from_value).collect()),
            Value::Object(map) => Tree::Map(
                map.into_iter()
                    .map(|(key, val)| (Key::parse(&key), Tree::from_value(val)))
                    .collect(),
            ),
            leaf => Tree::Leaf(leaf),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Tree::Leaf(leaf) => leaf,
            Tree::List(items) => Value::Array(items.into_iter().map(Tree::into_value).collect()),
            Tree::Map(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(key, val)| (key.render(), val.into_value()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }

    /// Entry of a map under `key`.
    pub fn get(&self, key: &Key) -> Option<&Tree> {
        match self {
            Tree::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, val)| val),
            _ => None,
        }
    }

    /// Recover a typed simulation result.
    pub fn into_simulation<S: DeserializeOwned>(self) -> Result<SimulationResult<S>> {
        serde_json::from_value(self.into_value()).context("failed to decode simulation result")
    }
}

pub fn simulation_file<P: AsRef<Path>>(dir: P, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{name}.json"))
}

pub fn write_simulation<P: AsRef<Path>, T: Serialize>(dir: P, name: &str, data: &T) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;

    let file = simulation_file(dir, name);
    let mut writer = BufWriter::new(
        File::create(&file).with_context(|| format!("failed to create {file:?}"))?,
    );
    serde_json::to_writer(&mut writer, data).context("failed to serialize simulation")?;
    writer.flush().context("failed to flush writer stream")?;

    log::info!("saved {file:?}");

    Ok(())
}

pub fn read_simulation<P: AsRef<Path>>(dir: P, name: &str) -> Result<Tree> {
    let file = simulation_file(dir, name);
    let reader =
        BufReader::new(File::open(&file).with_context(|| format!("failed to open {file:?}"))?);
    let value: Value = serde_json::from_reader(reader)
        .with_context(|| format!("failed to deserialize {file:?}"))?;
    Ok(Tree::from_value(value))
}

/// Names of the stored simulations in `dir`, hidden files excluded.
pub fn list_simulations<P: AsRef<Path>>(dir: P) -> Result<Vec<String>> {
    let pattern = dir.as_ref().join("*.json");
    let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
    let mut names: Vec<String> = glob(pattern)
        .context("failed to glob simulation files")?
        .filter_map(Result::ok)
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?;
            (!stem.starts_with('.')).then(|| stem.to_string())
        })
        .collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Timeline;
    use crate::params::Params;
    use serde_json::json;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("methyl-dyn-io-{name}-{}", std::process::id()));
        fs::remove_dir_all(&dir).ok();
        dir
    }

    #[test]
    fn keys_prefer_integers() {
        assert_eq!(Key::parse("10"), Key::Int(10));
        assert_eq!(Key::parse("0.5"), Key::Float(0.5));
        assert_eq!(Key::parse("1e3"), Key::Float(1000.0));
        assert_eq!(Key::parse("data"), Key::Text("data".to_string()));
    }

    #[test]
    fn nested_keys_are_converted() {
        let tree = Tree::from_value(json!({
            "data": {"0": [1, 2], "2.5": [{"7": true}]},
            "model": "m",
        }));
        let data = tree.get(&Key::Text("data".to_string())).unwrap();
        assert!(data.get(&Key::Int(0)).is_some());
        let Some(Tree::List(items)) = data.get(&Key::Float(2.5)) else {
            panic!("expected a list under 2.5");
        };
        assert_eq!(items[0].get(&Key::Int(7)), Some(&Tree::Leaf(json!(true))));
    }

    #[test]
    fn simulation_survives_storage() {
        let dir = test_dir("roundtrip");
        let result = SimulationResult {
            parameters: Params::from([("b", 1.0)]),
            model: "m".to_string(),
            data: Timeline(vec![(0.0, vec![1, 0]), (0.5, vec![2, 1])]),
        };
        write_simulation(&dir, "first", &result).unwrap();

        let tree = read_simulation(&dir, "first").unwrap();
        let data = tree.get(&Key::Text("data".to_string())).unwrap();
        assert!(data.get(&Key::Int(0)).is_some());
        assert!(data.get(&Key::Float(0.5)).is_some());

        let back: SimulationResult<Vec<u64>> = tree.into_simulation().unwrap();
        assert_eq!(back, result);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn hidden_files_are_not_listed() {
        let dir = test_dir("list");
        write_simulation(&dir, "b", &json!({})).unwrap();
        write_simulation(&dir, "a", &json!({})).unwrap();
        write_simulation(&dir, ".draft", &json!({})).unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();

        assert_eq!(list_simulations(&dir).unwrap(), vec!["a", "b"]);

        fs::remove_dir_all(&dir).ok();
    }
}
