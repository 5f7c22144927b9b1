//! Built-in scorers for the reference gate set.

use anyhow::{Result, bail};
use serde_json::Value;

use super::Scorer;
use crate::session::{SessionState, StateKey, is_filled, value_kind};

/// Fraction of expected fields that are filled in on an object artifact.
///
/// An absent artifact scores 0.0. A present artifact that is not an object
/// is a scorer failure.
#[derive(Debug, Clone)]
pub struct FieldCoverage {
    key: StateKey,
    fields: Vec<String>,
}

impl FieldCoverage {
    pub fn new(key: StateKey, fields: &[&str]) -> Self {
        Self {
            key,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Scorer for FieldCoverage {
    fn score(&self, state: &SessionState) -> Result<f64> {
        let artifact = match state.get(self.key) {
            None => return Ok(0.0),
            Some(Value::Object(map)) => map,
            Some(other) => bail!("{} holds {}, expected an object", self.key, value_kind(other)),
        };
        if self.fields.is_empty() {
            return Ok(1.0);
        }
        let filled = self
            .fields
            .iter()
            .filter(|field| artifact.get(field.as_str()).is_some_and(is_filled))
            .count();
        Ok(filled as f64 / self.fields.len() as f64)
    }
}

/// Best score among candidates listed under `field` of an object artifact.
///
/// Scores 0.0 when the artifact or the list is absent or empty.
#[derive(Debug, Clone)]
pub struct BestCandidate {
    key: StateKey,
    field: String,
}

impl BestCandidate {
    pub fn new(key: StateKey, field: &str) -> Self {
        Self {
            key,
            field: field.to_string(),
        }
    }
}

impl Scorer for BestCandidate {
    fn score(&self, state: &SessionState) -> Result<f64> {
        let Some(artifact) = state.get(self.key) else {
            return Ok(0.0);
        };
        let scores = match artifact.get(self.field.as_str()) {
            None | Some(Value::Null) => return Ok(0.0),
            Some(Value::Array(items)) => items,
            Some(other) => bail!(
                "{}.{} holds {}, expected a list of scores",
                self.key,
                self.field,
                value_kind(other)
            ),
        };
        let mut best: Option<f64> = None;
        for item in scores {
            let Some(score) = item.as_f64() else {
                bail!("{}.{} contains a non-numeric score", self.key, self.field);
            };
            best = Some(best.map_or(score, |b| b.max(score)));
        }
        Ok(best.unwrap_or(0.0))
    }
}
