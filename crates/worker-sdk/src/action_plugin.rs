use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The single JSON line a plugin binary receives on stdin.
///
/// `inputs` are the resolved parameters of the plugin action; `args` are the
/// build arguments of the current build, secrets included. A plugin reports
/// its outcome through its exit code: zero is success, anything else failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginRequest {
    /// Name of the plugin action being run.
    pub action: String,

    /// Identifier of the build the plugin runs for.
    pub build_id: i64,

    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl PluginRequest {
    pub fn new(action: impl Into<String>, build_id: i64) -> Self {
        Self {
            action: action.into(),
            build_id,
            ..Self::default()
        }
    }

    /// Get an input value by name (case-insensitive).
    ///
    /// If `required` is true and the input is missing or empty, returns an error.
    pub fn get_input(&self, name: &str, required: bool) -> anyhow::Result<Option<&str>> {
        let value = self
            .inputs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str());

        if required && value.map_or(true, str::is_empty) {
            anyhow::bail!("Input required and not supplied: {name}");
        }

        Ok(value)
    }

    /// Get a build argument by exact name.
    pub fn get_arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }

    /// Serialize to the one-line wire form.
    pub fn to_line(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the one-line wire form.
    pub fn from_line(line: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}
