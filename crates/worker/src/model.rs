// Wire types exchanged with the controller: the action tree, the build that
// schedules it, secrets, results and log lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use worker_common::BuildStatus;

/// Declared type of a parameter. Values are always carried as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Text,
    Number,
    Boolean,
    List,
    Password,
    Key,
}

/// A named, typed value attached to an action or a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParameterType,
    #[serde(default)]
    pub value: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterType::String,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "builtin", alias = "Builtin")]
    Builtin,
    #[serde(rename = "plugin", alias = "Plugin")]
    Plugin,
    #[serde(rename = "group", alias = "Joined", alias = "joined")]
    Group,
}

/// One node of the action tree. Children are owned by their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ActionKind,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Child actions, run in order by the execution engine.
    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Runs even when an earlier sibling failed.
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Action {
    fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parameters: Vec::new(),
            actions: Vec::new(),
            enabled: true,
            is_final: false,
        }
    }

    pub fn builtin(name: impl Into<String>) -> Self {
        Self::new(name, ActionKind::Builtin)
    }

    pub fn plugin(name: impl Into<String>) -> Self {
        Self::new(name, ActionKind::Plugin)
    }

    pub fn group(name: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            actions,
            ..Self::new(name, ActionKind::Group)
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(Parameter::new(name, value));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn final_step(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// Value of the first parameter called `name`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// One scheduled execution of an action tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionBuild {
    pub id: i64,
    #[serde(default)]
    pub pipeline_id: i64,
    #[serde(default)]
    pub pipeline_action_id: i64,
    #[serde(default)]
    pub build_number: i64,
    #[serde(default)]
    pub args: Vec<Parameter>,
}

impl ActionBuild {
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub value: String,
}

impl Secret {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &"***")
            .finish()
    }
}

/// Everything the controller hands over for one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub action: Action,
    pub action_build: ActionBuild,
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

/// Terminal outcome of an action or of a whole tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub build_id: i64,
}

impl BuildResult {
    pub fn new(status: BuildStatus, build_id: i64) -> Self {
        Self { status, build_id }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A line of build output on its way to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub build_id: i64,
    pub step: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn new(build_id: i64, step: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            build_id,
            step: step.into(),
            value: value.into(),
            timestamp: Utc::now(),
        }
    }
}
