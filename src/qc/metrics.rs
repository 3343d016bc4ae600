//! Mask statistics and the per-slide metric set.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

use crate::error::QcError;

use super::mask::Mask;

// =============================================================================
// MaskStatistic
// =============================================================================

/// How a refined mask is summarised against the mask it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskStatistic {
    /// Fraction of the reference foreground removed: `1 - |after| / |before|`
    #[default]
    #[serde(rename = "relative2mask")]
    RelativeToMask,
    /// Remaining foreground over the whole image: `|after| / (w * h)`
    #[serde(rename = "relative2image")]
    RelativeToImage,
    /// Remaining foreground pixel count
    Absolute,
}

impl MaskStatistic {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MaskStatistic::RelativeToMask => "relative2mask",
            MaskStatistic::RelativeToImage => "relative2image",
            MaskStatistic::Absolute => "absolute",
        }
    }

    /// Evaluate the statistic for a `before` -> `after` refinement.
    ///
    /// For `relative2mask` an empty `before` yields 0.0, so the value stays
    /// within [0, 1].
    pub fn compute(&self, before: &Mask, after: &Mask) -> Result<f64, QcError> {
        before.ensure_same_dimensions(after)?;
        let kept = after.count() as f64;

        Ok(match self {
            MaskStatistic::RelativeToMask => {
                let reference = before.count();
                if reference == 0 {
                    warn!("Reference mask is empty; relative2mask statistic is 0");
                    0.0
                } else {
                    (1.0 - kept / reference as f64).clamp(0.0, 1.0)
                }
            }
            MaskStatistic::RelativeToImage => {
                if after.area() == 0 {
                    0.0
                } else {
                    kept / after.area() as f64
                }
            }
            MaskStatistic::Absolute => kept,
        })
    }
}

impl fmt::Display for MaskStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaskStatistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relative2mask" => Ok(MaskStatistic::RelativeToMask),
            "relative2image" => Ok(MaskStatistic::RelativeToImage),
            "absolute" => Ok(MaskStatistic::Absolute),
            other => Err(format!(
                "unknown mask statistic '{}' (expected relative2mask, relative2image or absolute)",
                other
            )),
        }
    }
}

// =============================================================================
// MetricSet
// =============================================================================

/// A recorded metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::Number(value as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

/// Append-only, insertion-ordered metrics of one slide.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    entries: Vec<(String, MetricValue)>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metric. An existing name is rejected and keeps its first value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
    ) -> Result<(), QcError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(QcError::MetricExists(name));
        }
        self.entries.push((name, value.into()));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for MetricSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
