use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// A recursive, declarative description of a node to build: its kind,
/// constructor properties, and (for decorators/composites) its children.
/// Loaded from a tree file and turned into a live [`crate::node::Node`] by
/// the tree builder.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TreeDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub children: Vec<TreeDescriptor>,
}

/// Top-level tree file: one or more named, independently loadable trees
/// sharing a single data directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TreeFile {
    pub trees: HashMap<String, TreeDescriptor>,
    #[serde(default)]
    pub main_tree: Option<String>,
}

/// What the runner does when a tick produces `Status::Error` at the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Log and keep ticking on the next interval.
    Continue,
    /// Stop the run loop.
    Halt,
}

/// Runtime tunables for [`crate::tree::TreeManager`], loaded the way the
/// teacher's `Config` loads world/network settings: a file plus environment
/// overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunnerConfig {
    pub tick_rate_hz: f64,
    pub snapshot_interval_secs: u64,
    pub max_snapshots: usize,
    pub error_policy: ErrorPolicy,
    pub data_dir: PathBuf,
    pub implicit_namespaces: bool,
}

impl RunnerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("BT_RUNTIME"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 10.0,
            snapshot_interval_secs: 300,
            max_snapshots: 20,
            error_policy: ErrorPolicy::Continue,
            data_dir: PathBuf::from("./data/bt-runtime"),
            implicit_namespaces: true,
        }
    }
}
