// file: src/storage/attributes.rs
// description: static and non-static dataset metadata with propagation rules

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Scalar value of a static attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticAttr {
    pub value: AttrValue,
    /// Protected keys reject overwrites with a conflicting value.
    #[serde(default)]
    pub protected: bool,
}

/// All metadata attached to one dataset. Static attributes describe the
/// dataset as a whole; non-static attributes carry one value per frame and
/// must stay aligned with the leading axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    #[serde(default, rename = "static")]
    pub static_attrs: BTreeMap<String, StaticAttr>,
    #[serde(default)]
    pub non_static: BTreeMap<String, Vec<f64>>,
}

impl AttributeSet {
    pub fn is_empty(&self) -> bool {
        self.static_attrs.is_empty() && self.non_static.is_empty()
    }

    pub fn get_static(&self, key: &str) -> Option<&AttrValue> {
        self.static_attrs.get(key).map(|attr| &attr.value)
    }

    /// Set a static attribute. Later writes overwrite silently unless the
    /// existing key is protected and the new value differs; overwriting a
    /// protected key with the identical value is a no-op success.
    pub fn set_static(
        &mut self,
        tag: &str,
        key: &str,
        value: AttrValue,
        protected: bool,
    ) -> Result<()> {
        if let Some(existing) = self.static_attrs.get(key) {
            if existing.protected && existing.value != value {
                return Err(PipelineError::AttributeConflict {
                    tag: tag.to_string(),
                    key: key.to_string(),
                });
            }
        }

        self.static_attrs.insert(
            key.to_string(),
            StaticAttr {
                value,
                protected,
            },
        );

        Ok(())
    }

    pub fn get_non_static(&self, key: &str) -> Option<&Vec<f64>> {
        self.non_static.get(key)
    }

    pub fn set_non_static(&mut self, key: &str, values: Vec<f64>) {
        self.non_static.insert(key.to_string(), values);
    }

    /// Subset every non-static attribute by the given frame indices. Used by
    /// modules that change the frame count so attribute/frame alignment is
    /// preserved.
    pub fn restrict(&mut self, tag: &str, indices: &[usize]) -> Result<()> {
        for (key, values) in self.non_static.iter_mut() {
            if let Some(&bad) = indices.iter().find(|&&i| i >= values.len()) {
                return Err(PipelineError::Storage(format!(
                    "Restriction index {} out of bounds for attribute '{}' on '{}' (length {})",
                    bad,
                    key,
                    tag,
                    values.len()
                )));
            }

            *values = indices.iter().map(|&i| values[i]).collect();
        }

        Ok(())
    }

    /// Copy only the keys this set does not already carry. Existing values
    /// stay untouched, so a module's own attributes survive the default
    /// propagation.
    pub fn merge_missing(&mut self, source: &AttributeSet) {
        for (key, attr) in &source.static_attrs {
            self.static_attrs
                .entry(key.clone())
                .or_insert_with(|| attr.clone());
        }

        for (key, values) in &source.non_static {
            self.non_static
                .entry(key.clone())
                .or_insert_with(|| values.clone());
        }
    }

    /// Copy every attribute of `source` onto this set. Protected keys on the
    /// destination still guard against conflicting values.
    pub fn copy_from(&mut self, tag: &str, source: &AttributeSet) -> Result<()> {
        for (key, attr) in &source.static_attrs {
            self.set_static(tag, key, attr.value.clone(), attr.protected)?;
        }

        for (key, values) in &source.non_static {
            self.non_static.insert(key.clone(), values.clone());
        }

        Ok(())
    }
}
