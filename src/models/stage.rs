//! Stage catalogue: the closed set of pipeline stages and the agents that
//! drive them.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::event::ToolInvocation;
use crate::AppError;

/// Prediction task family decided by the feasibility check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Continuous target.
    #[serde(alias = "regression")]
    Regression,
    /// Categorical target.
    #[serde(alias = "classification")]
    Classification,
}

/// Agent backends known to the pipeline.
///
/// The KPI finder is split by task type so that the dispatch happens on a
/// closed enum rather than on whatever string the feasibility agent wrote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Refines the overview and decides whether the task is feasible.
    FeasibilityCheck,
    /// Chooses a regression metric.
    FindRegressionKpi,
    /// Chooses a classification metric.
    FindClassificationKpi,
    /// Refines and classifies a single feature.
    FeatureEngineering,
    /// Detects features that duplicate another feature.
    DropFeatureDups,
}

impl AgentKind {
    /// All agents, in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::FeasibilityCheck,
        Self::FindRegressionKpi,
        Self::FindClassificationKpi,
        Self::FeatureEngineering,
        Self::DropFeatureDups,
    ];

    /// Key used for this agent under `[stages.<key>]` in the configuration.
    #[must_use]
    pub fn config_key(self) -> &'static str {
        match self {
            Self::FeasibilityCheck => "feasibility_check",
            Self::FindRegressionKpi => "find_regression_kpi",
            Self::FindClassificationKpi => "find_classification_kpi",
            Self::FeatureEngineering => "feature_engineering",
            Self::DropFeatureDups => "drop_feature_dups",
        }
    }

    /// Reverse of [`AgentKind::config_key`].
    #[must_use]
    pub fn from_config_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.config_key() == key)
    }
}

/// One concrete unit of pipeline work.
///
/// Feature engineering runs once per feature, so each feature is its own
/// stage and therefore its own unit of resumability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Overview refinement and feasibility decision.
    FeasibilityCheck,
    /// Metric selection for the given task type.
    FindKpi(TaskType),
    /// Refinement and classification of one feature.
    FeatureEngineering {
        /// Feature name as it appears in the document.
        feature: String,
    },
    /// Duplicate-feature detection across all refined features.
    DropFeatureDups,
}

impl StageKind {
    /// Agent that drives this stage.
    #[must_use]
    pub fn agent(&self) -> AgentKind {
        match self {
            Self::FeasibilityCheck => AgentKind::FeasibilityCheck,
            Self::FindKpi(TaskType::Regression) => AgentKind::FindRegressionKpi,
            Self::FindKpi(TaskType::Classification) => AgentKind::FindClassificationKpi,
            Self::FeatureEngineering { .. } => AgentKind::FeatureEngineering,
            Self::DropFeatureDups => AgentKind::DropFeatureDups,
        }
    }

    /// Stable name recorded in the document once the stage has merged.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::FeasibilityCheck => "feasibility_check".into(),
            Self::FindKpi(_) => "find_kpi".into(),
            Self::FeatureEngineering { feature } => format!("feature_engineering:{feature}"),
            Self::DropFeatureDups => "drop_feature_dups".into(),
        }
    }
}

impl Display for StageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Which part of the pipeline a connection asked for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageSelector {
    /// Feasibility check only.
    FeasibilityCheck,
    /// KPI selection only.
    FindKpi,
    /// Every not-yet-refined feature.
    FeatureEngineering,
    /// Duplicate detection only.
    DropFeatureDups,
    /// The whole sequence, resuming after the last completed stage.
    AllAgents,
}

impl StageSelector {
    /// URL path segment for this selector (`/<segment>/ws`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FeasibilityCheck => "feasibility_check",
            Self::FindKpi => "find_kpi",
            Self::FeatureEngineering => "feature_engineering",
            Self::DropFeatureDups => "drop_feature_dups",
            Self::AllAgents => "all_agents",
        }
    }
}

impl FromStr for StageSelector {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feasibility_check" => Ok(Self::FeasibilityCheck),
            "find_kpi" => Ok(Self::FindKpi),
            "feature_engineering" => Ok(Self::FeatureEngineering),
            "drop_feature_dups" => Ok(Self::DropFeatureDups),
            "all_agents" => Ok(Self::AllAgents),
            other => Err(AppError::NotFound(format!("unknown stage selector '{other}'"))),
        }
    }
}

/// Structured output of one stage run, before it is merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResult {
    /// Key/value pairs produced by the agent.
    pub fields: Map<String, Value>,
    /// Tool invocations observed during the run, in call order.
    pub tool_calls: Vec<ToolInvocation>,
}
