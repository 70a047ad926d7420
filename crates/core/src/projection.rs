//! Field projections.
//!
//! A projection is either an allow-list (`{field: 1}`) or a deny-list
//! (`{field: -1}` or `{field: 0}`), never both. Projections work on top-level
//! fields, matching the granularity of [`FieldDiff`](crate::FieldDiff).

use crate::diff::FieldDiff;
use crate::document::{Document, ID_FIELD};
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeSet;

/// A top-level field projection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Projection {
    /// Every field.
    #[default]
    All,
    /// Only the listed fields (plus `_id`).
    Include(BTreeSet<String>),
    /// Every field except the listed ones.
    Exclude(BTreeSet<String>),
}

impl Projection {
    /// Parses a `{field: 1 | 0 | -1}` projection spec.
    ///
    /// `null` and `{}` mean [`Projection::All`]. Mixing inclusion and exclusion
    /// is a contract violation. `_id` may appear in either form and is ignored,
    /// since ids travel separately from published fields.
    pub fn from_spec(spec: &Value) -> Result<Self> {
        let map = match spec {
            Value::Null => return Ok(Projection::All),
            Value::Object(map) => map,
            other => {
                return Err(Error::invalid_selector(format!(
                    "projection must be an object, got {}",
                    other
                )))
            }
        };

        let mut include = BTreeSet::new();
        let mut exclude = BTreeSet::new();
        for (field, flag) in map {
            if field == ID_FIELD {
                continue;
            }
            if field.contains('.') {
                return Err(Error::invalid_selector(format!(
                    "nested projection field {} is not supported",
                    field
                )));
            }
            if projection_flag(flag)? {
                if !exclude.is_empty() {
                    return Err(Error::mixed_projection(field.clone()));
                }
                include.insert(field.clone());
            } else {
                if !include.is_empty() {
                    return Err(Error::mixed_projection(field.clone()));
                }
                exclude.insert(field.clone());
            }
        }

        Ok(if !include.is_empty() {
            Projection::Include(include)
        } else if !exclude.is_empty() {
            Projection::Exclude(exclude)
        } else {
            Projection::All
        })
    }

    /// Creates an allow-list projection.
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Include(fields.into_iter().map(Into::into).collect())
    }

    /// Creates a deny-list projection.
    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// Returns true if the projection keeps `field`.
    pub fn includes(&self, field: &str) -> bool {
        match self {
            Projection::All => true,
            Projection::Include(fields) => field == ID_FIELD || fields.contains(field),
            Projection::Exclude(fields) => !fields.contains(field),
        }
    }

    /// Projects a document. `_id` is kept whenever present.
    pub fn apply(&self, doc: &Document) -> Document {
        match self {
            Projection::All => doc.clone(),
            _ => doc
                .iter()
                .filter(|(k, _)| self.includes(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Projects a field diff.
    pub fn apply_diff(&self, diff: &FieldDiff) -> FieldDiff {
        match self {
            Projection::All => diff.clone(),
            _ => diff
                .iter()
                .filter(|(k, _)| self.includes(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Returns true for [`Projection::All`].
    #[inline]
    pub fn is_all(&self) -> bool {
        matches!(self, Projection::All)
    }
}

fn projection_flag(flag: &Value) -> Result<bool> {
    match flag {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(true),
            Some(0) | Some(-1) => Ok(false),
            _ => Err(Error::invalid_selector(format!(
                "projection flag must be 1, 0 or -1, got {}",
                n
            ))),
        },
        other => Err(Error::invalid_selector(format!(
            "projection flag must be a number or boolean, got {}",
            other
        ))),
    }
}
