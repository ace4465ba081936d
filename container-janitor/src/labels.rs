//! Label predicates used to discover containers on the engine.
use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// The only filter category we ever send to the engine.
pub const LABEL_FILTER_KEY: &str = "label";

/// Value required on the boolean marker labels.
pub const MARKER_VALUE: &str = "True";

/// Identifies this janitor among its peers sharing an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId(String);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LabelError {
    #[error("instance id must not be empty")]
    EmptyInstanceId,
    #[error("label key must not be empty: {0}")]
    EmptyLabelKey(&'static str),
    #[error("self label '{0}' collides with a workload label")]
    OverlappingSelfLabel(String),
    #[error("tooling and instance labels must differ: {0}")]
    DuplicateWorkloadLabel(String),
}

impl InstanceId {
    pub fn new(id: &str) -> Result<Self, LabelError> {
        if id.is_empty() {
            return Err(LabelError::EmptyInstanceId);
        }
        Ok(InstanceId(id.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which set of containers a cleanup pass is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupMode {
    /// Containers left behind by this instance's previous runs.
    Workload,
    /// Containers running this daemon itself.
    SelfInstance,
}

impl CleanupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupMode::Workload => "workload",
            CleanupMode::SelfInstance => "self",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRequirement {
    pub key: String,
    pub value: String,
}

impl LabelRequirement {
    fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_owned(),
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for LabelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// An ordered set of label requirements, all of which must hold for a container to match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelPredicate {
    requirements: Vec<LabelRequirement>,
}

impl LabelPredicate {
    pub fn requirements(&self) -> &[LabelRequirement] {
        &self.requirements
    }

    fn require(mut self, key: &str, value: &str) -> Self {
        let requirement = LabelRequirement::new(key, value);
        if !self.requirements.contains(&requirement) {
            self.requirements.push(requirement);
        }
        self
    }

    /// Renders the predicate as an engine list filter: `{"label": ["k=v", ...]}`.
    /// The engine ANDs every entry of a single filter category.
    pub fn to_filters(&self) -> HashMap<String, Vec<String>> {
        HashMap::from([(
            LABEL_FILTER_KEY.to_owned(),
            self.requirements.iter().map(|r| r.to_string()).collect(),
        )])
    }

    /// Evaluates the predicate against a container's labels.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|r| labels.get(&r.key) == Some(&r.value))
    }

    /// True if both predicates constrain at least one common label key.
    pub fn shares_key_with(&self, other: &LabelPredicate) -> bool {
        self.requirements
            .iter()
            .any(|r| other.requirements.iter().any(|o| o.key == r.key))
    }
}

impl fmt::Display for LabelPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}

/// Label keys of the labelling convention applied to managed containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelConfig {
    tooling: String,
    instance: String,
    daemon: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            tooling: "de.kenbi.dockertools".to_owned(),
            instance: "de.kenbi.dockertools.instance".to_owned(),
            daemon: "de.kenbi.dockertools.valkyrie".to_owned(),
        }
    }
}

impl LabelConfig {
    /// Validates the keys so that the workload and self predicates can never share a requirement.
    pub fn new(tooling: &str, instance: &str, daemon: &str) -> Result<Self, LabelError> {
        if tooling.is_empty() {
            return Err(LabelError::EmptyLabelKey("tooling"));
        }
        if instance.is_empty() {
            return Err(LabelError::EmptyLabelKey("instance"));
        }
        if daemon.is_empty() {
            return Err(LabelError::EmptyLabelKey("self"));
        }
        if tooling == instance {
            return Err(LabelError::DuplicateWorkloadLabel(tooling.to_owned()));
        }
        if daemon == tooling || daemon == instance {
            return Err(LabelError::OverlappingSelfLabel(daemon.to_owned()));
        }

        Ok(Self {
            tooling: tooling.to_owned(),
            instance: instance.to_owned(),
            daemon: daemon.to_owned(),
        })
    }

    pub fn predicate(&self, mode: CleanupMode, instance_id: &InstanceId) -> LabelPredicate {
        match mode {
            CleanupMode::Workload => LabelPredicate::default()
                .require(&self.instance, instance_id.as_str())
                .require(&self.tooling, MARKER_VALUE),
            CleanupMode::SelfInstance => LabelPredicate::default().require(&self.daemon, MARKER_VALUE),
        }
    }
}
