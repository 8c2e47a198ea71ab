//! Shared task document and its additive, stage-owned sections.
//!
//! Every section starts as operator text and is replaced by a refined record
//! exactly once. All `with_*` methods are pure: they return a new document
//! and leave `self` untouched, so a failing merge never leaves a half-applied
//! stage behind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::stage::TaskType;
use crate::{AppError, Result};

/// Closed classification set for a feature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FeatureType {
    /// Feature is kept for modelling.
    #[serde(alias = "necessary")]
    Necessary,
    /// Feature carries no signal for the target and is dropped.
    #[serde(alias = "unnecessary")]
    Unnecessary,
    /// Feature duplicates another feature named in `duplicate_of`.
    #[serde(alias = "duplicate")]
    Duplicate,
}

/// Overview once the feasibility check has run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefinedOverview {
    /// Operator-supplied overview.
    pub original: String,
    /// Agent-refined overview.
    pub refined: String,
    /// Whether the task can be solved as a tabular prediction problem.
    pub is_feasible: bool,
    /// Decided task family.
    pub task_type: TaskType,
    /// Agent explanation.
    #[serde(default)]
    pub decision_rationale: String,
    /// Chosen metric, filled in by the KPI stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpi: Option<String>,
}

/// `overview` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Overview {
    /// Refined record.
    Refined(RefinedOverview),
    /// Operator text.
    Raw(String),
}

impl Default for Overview {
    fn default() -> Self {
        Self::Raw(String::new())
    }
}

impl Overview {
    /// Refined record, if the feasibility check has merged.
    #[must_use]
    pub fn refined(&self) -> Option<&RefinedOverview> {
        match self {
            Self::Refined(record) => Some(record),
            Self::Raw(_) => None,
        }
    }

    /// The operator's original text.
    #[must_use]
    pub fn original(&self) -> &str {
        match self {
            Self::Refined(record) => &record.original,
            Self::Raw(text) => text,
        }
    }
}

/// Per-feature record once feature engineering has run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureRecord {
    /// Operator-supplied description.
    pub original: String,
    /// Agent-refined description.
    pub refined: String,
    /// Classification tag.
    pub feature_type: FeatureType,
    /// Suggested engineering transform.
    #[serde(default)]
    pub engineering_type: String,
    /// Agent explanation.
    #[serde(default)]
    pub decision_rationale: String,
    /// Canonical feature this one duplicates (name only, not ownership).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

/// One entry of the `features` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Feature {
    /// Refined record.
    Refined(FeatureRecord),
    /// Operator description.
    Raw(String),
}

impl Feature {
    /// Refined record, if feature engineering has merged for this feature.
    #[must_use]
    pub fn refined(&self) -> Option<&FeatureRecord> {
        match self {
            Self::Refined(record) => Some(record),
            Self::Raw(_) => None,
        }
    }

    /// The operator's original description.
    #[must_use]
    pub fn original(&self) -> &str {
        match self {
            Self::Refined(record) => &record.original,
            Self::Raw(text) => text,
        }
    }
}

/// `target` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Target {
    /// Dataset column holding the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    /// Target description; rewritten by the feasibility check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pipeline bookkeeping stored alongside the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineMeta {
    /// Incremented on every successful save.
    #[serde(default)]
    pub version: u64,
    /// Names of merged stages, in merge order.
    #[serde(default)]
    pub completed_stages: Vec<String>,
}

/// The shared task specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskSpecs {
    /// Project overview.
    #[serde(default)]
    pub overview: Overview,
    /// Prediction target.
    #[serde(default)]
    pub target: Target,
    /// Features keyed by column name.
    #[serde(default)]
    pub features: BTreeMap<String, Feature>,
    /// Pipeline bookkeeping.
    #[serde(default)]
    pub pipeline: PipelineMeta,
    /// Top-level fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields produced by the feasibility agent.
#[derive(Debug, Clone, Deserialize)]
pub struct FeasibilityOutcome {
    /// Refined overview text.
    pub refined_overview: String,
    /// Feasibility decision.
    pub is_feasible: bool,
    /// Task family.
    pub task_type: TaskType,
    /// Refined target description.
    pub target_description: String,
    /// Agent explanation.
    #[serde(default)]
    pub decision_rationale: String,
}

/// Fields produced by a KPI agent.
#[derive(Debug, Clone, Deserialize)]
pub struct KpiOutcome {
    /// Metric name.
    pub chosen_metric: String,
}

/// Fields produced by the feature engineering agent.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureOutcome {
    /// Refined description.
    pub refined_description: String,
    /// Classification.
    pub feature_type: FeatureType,
    /// Suggested transform.
    #[serde(default, alias = "engineering_type")]
    pub feature_engineering_type: String,
    /// Agent explanation.
    #[serde(default)]
    pub decision_rationale: String,
}

impl TaskSpecs {
    /// Parse a document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the text is not a valid document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| AppError::Persistence(format!("malformed task document: {err}")))
    }

    /// Whether a stage with this name has merged.
    #[must_use]
    pub fn is_completed(&self, stage_name: &str) -> bool {
        self.pipeline
            .completed_stages
            .iter()
            .any(|name| name == stage_name)
    }

    /// Features still awaiting feature engineering, in document order.
    pub fn unrefined_features(&self) -> impl Iterator<Item = &str> {
        self.features
            .iter()
            .filter(|(_, feature)| feature.refined().is_none())
            .map(|(name, _)| name.as_str())
    }

    /// Feature names a downstream tabular transform should keep: every
    /// refined feature that is neither unnecessary nor a duplicate, plus any
    /// feature not yet classified.
    #[must_use]
    pub fn retained_features(&self) -> Vec<String> {
        self.features
            .iter()
            .filter(|(_, feature)| {
                feature.refined().map_or(true, |record| {
                    record.feature_type == FeatureType::Necessary
                })
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Merge a feasibility outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the overview is already refined.
    pub fn with_feasibility(&self, stage: &str, outcome: FeasibilityOutcome) -> Result<Self> {
        if self.overview.refined().is_some() {
            return Err(AppError::Conflict("overview is already refined".into()));
        }
        let mut next = self.clone();
        next.overview = Overview::Refined(RefinedOverview {
            original: self.overview.original().to_owned(),
            refined: outcome.refined_overview,
            is_feasible: outcome.is_feasible,
            task_type: outcome.task_type,
            decision_rationale: outcome.decision_rationale,
            kpi: None,
        });
        next.target.description = Some(outcome.target_description);
        next.record(stage);
        Ok(next)
    }

    /// Merge a KPI outcome into the refined overview.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the overview is not refined yet, or
    /// `AppError::Conflict` if a KPI is already set.
    pub fn with_kpi(&self, stage: &str, outcome: KpiOutcome) -> Result<Self> {
        let mut next = self.clone();
        let Overview::Refined(record) = &mut next.overview else {
            return Err(AppError::Persistence(
                "overview must be refined before choosing a KPI".into(),
            ));
        };
        if record.kpi.is_some() {
            return Err(AppError::Conflict("KPI is already chosen".into()));
        }
        record.kpi = Some(outcome.chosen_metric);
        next.record(stage);
        Ok(next)
    }

    /// Merge a feature engineering outcome for one feature.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown feature, or
    /// `AppError::Conflict` if it is already refined.
    pub fn with_feature(&self, stage: &str, name: &str, outcome: FeatureOutcome) -> Result<Self> {
        let Some(current) = self.features.get(name) else {
            return Err(AppError::NotFound(format!("feature '{name}'")));
        };
        if current.refined().is_some() {
            return Err(AppError::Conflict(format!("feature '{name}' is already refined")));
        }
        let mut next = self.clone();
        next.features.insert(
            name.to_owned(),
            Feature::Refined(FeatureRecord {
                original: current.original().to_owned(),
                refined: outcome.refined_description,
                feature_type: outcome.feature_type,
                engineering_type: outcome.feature_engineering_type,
                decision_rationale: outcome.decision_rationale,
                duplicate_of: None,
            }),
        );
        next.record(stage);
        Ok(next)
    }

    /// Mark features as duplicates of their canonical counterpart.
    ///
    /// `duplicates` maps duplicate name to canonical name. Either every entry
    /// applies or none does.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stage` if a name is unknown, unrefined, points at
    /// itself, or points at another duplicate.
    pub fn with_duplicates(&self, stage: &str, duplicates: &BTreeMap<String, String>) -> Result<Self> {
        let mut next = self.clone();
        for (duplicate, canonical) in duplicates {
            if duplicate == canonical {
                return Err(AppError::Stage(format!(
                    "feature '{duplicate}' cannot duplicate itself"
                )));
            }
            if duplicates.contains_key(canonical) {
                return Err(AppError::Stage(format!(
                    "canonical feature '{canonical}' is itself marked duplicate"
                )));
            }
            if !self.features.contains_key(canonical) {
                return Err(AppError::Stage(format!(
                    "unknown canonical feature '{canonical}'"
                )));
            }
            let Some(Feature::Refined(record)) = next.features.get_mut(duplicate) else {
                return Err(AppError::Stage(format!(
                    "unknown or unrefined feature '{duplicate}'"
                )));
            };
            record.feature_type = FeatureType::Duplicate;
            record.duplicate_of = Some(canonical.clone());
        }
        next.record(stage);
        Ok(next)
    }

    fn record(&mut self, stage: &str) {
        self.pipeline.completed_stages.push(stage.to_owned());
    }
}
