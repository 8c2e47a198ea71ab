//! Stage descriptors: sequencing, prompt construction, and result merging.
//!
//! The sequence is resolved one stage at a time against the current
//! document, so later stages see the merged output of earlier ones (the KPI
//! finder, for example, is picked from the task type the feasibility check
//! wrote). Stages whose output is already present are skipped, which is what
//! lets a fresh session resume a partially processed task.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::models::document::{
    FeasibilityOutcome, FeatureOutcome, FeatureType, KpiOutcome, TaskSpecs,
};
use crate::models::stage::{StageKind, StageResult, StageSelector};
use crate::{AppError, Result};

/// Name under which the duplicate-detection stage is recorded.
const DROP_FEATURE_DUPS: &str = "drop_feature_dups";

/// Next stage `selector` still has to run against `doc`, if any.
///
/// # Errors
///
/// Returns `AppError::Persistence` when the selector's precondition is not
/// met by the stored document (e.g. choosing a KPI before the overview was
/// refined).
pub fn next_stage(selector: StageSelector, doc: &TaskSpecs) -> Result<Option<StageKind>> {
    match selector {
        StageSelector::FeasibilityCheck => Ok(feasibility(doc)),
        StageSelector::FindKpi => kpi(doc),
        StageSelector::FeatureEngineering => Ok(feature_engineering(doc)),
        StageSelector::DropFeatureDups => drop_dups(doc),
        StageSelector::AllAgents => {
            if let Some(stage) = feasibility(doc) {
                return Ok(Some(stage));
            }
            if let Some(stage) = kpi(doc)? {
                return Ok(Some(stage));
            }
            if let Some(stage) = feature_engineering(doc) {
                return Ok(Some(stage));
            }
            drop_dups(doc)
        }
    }
}

fn feasibility(doc: &TaskSpecs) -> Option<StageKind> {
    doc.overview
        .refined()
        .is_none()
        .then_some(StageKind::FeasibilityCheck)
}

fn kpi(doc: &TaskSpecs) -> Result<Option<StageKind>> {
    let Some(overview) = doc.overview.refined() else {
        return Err(AppError::Persistence(
            "overview has not been refined; run feasibility_check first".into(),
        ));
    };
    Ok(overview
        .kpi
        .is_none()
        .then_some(StageKind::FindKpi(overview.task_type)))
}

fn feature_engineering(doc: &TaskSpecs) -> Option<StageKind> {
    doc.unrefined_features()
        .next()
        .map(|feature| StageKind::FeatureEngineering {
            feature: feature.to_owned(),
        })
}

fn drop_dups(doc: &TaskSpecs) -> Result<Option<StageKind>> {
    if doc.is_completed(DROP_FEATURE_DUPS) {
        return Ok(None);
    }
    if let Some(feature) = doc.unrefined_features().next() {
        return Err(AppError::Persistence(format!(
            "feature '{feature}' has not been refined; run feature_engineering first"
        )));
    }
    Ok(Some(StageKind::DropFeatureDups))
}

impl StageKind {
    /// Build the agent prompt for this stage from the current document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if the document lacks the input this
    /// stage reads.
    pub fn build_prompt(&self, doc: &TaskSpecs) -> Result<String> {
        match self {
            Self::FeasibilityCheck => Ok(doc.overview.original().to_owned()),
            Self::FindKpi(_) => doc
                .overview
                .refined()
                .map(|overview| overview.refined.clone())
                .ok_or_else(|| AppError::Persistence("overview has not been refined".into())),
            Self::FeatureEngineering { feature } => {
                let entry = doc
                    .features
                    .get(feature)
                    .ok_or_else(|| AppError::Persistence(format!("unknown feature '{feature}'")))?;
                pretty(&json!({
                    "feature_name": feature,
                    "feature_description": entry.original(),
                    "target_description": doc.target.description,
                }))
            }
            Self::DropFeatureDups => {
                let features: BTreeMap<&str, &str> = doc
                    .features
                    .iter()
                    .filter_map(|(name, feature)| {
                        feature
                            .refined()
                            .filter(|record| record.feature_type != FeatureType::Unnecessary)
                            .map(|record| (name.as_str(), record.refined.as_str()))
                    })
                    .collect();
                pretty(&json!({
                    "target_description": doc.target.description,
                    "features": features,
                }))
            }
        }
    }

    /// Merge `result` into `doc`, returning the new document.
    ///
    /// Either every field of the stage is applied or, on error, nothing is.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Stage` if the result lacks required fields, or the
    /// document-level merge error.
    pub fn merge(&self, doc: &TaskSpecs, result: &StageResult) -> Result<TaskSpecs> {
        let name = self.name();
        match self {
            Self::FeasibilityCheck => doc.with_feasibility(&name, outcome(&name, result)?),
            Self::FindKpi(_) => doc.with_kpi(&name, outcome::<KpiOutcome>(&name, result)?),
            Self::FeatureEngineering { feature } => {
                doc.with_feature(&name, feature, outcome::<FeatureOutcome>(&name, result)?)
            }
            Self::DropFeatureDups => {
                let duplicates: BTreeMap<String, String> = outcome(&name, result)?;
                doc.with_duplicates(&name, &duplicates)
            }
        }
    }
}

fn outcome<T: DeserializeOwned>(stage: &str, result: &StageResult) -> Result<T> {
    serde_json::from_value(Value::Object(result.fields.clone()))
        .map_err(|err| AppError::Stage(format!("{stage} produced an unusable result: {err}")))
}

fn pretty(value: &Value) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Stage(format!("failed to build prompt: {err}")))
}
