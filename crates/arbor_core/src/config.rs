//! Loader configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "yieldIntervalMs": 16, "childTraversal": "concurrent", "conversionFactor": 0.001 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::convert::{ChildTraversal, ConvertError, ConvertResult, ModelGeometryConverter};
use crate::geometry::DEFAULT_MERGE_TOLERANCE;
use crate::schedule::DEFAULT_YIELD_INTERVAL;

/// Errors from reading or validating options.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid options: {0}")]
    Invalid(#[from] ConvertError),
}

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Tunables for loading one resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderOptions {
    /// Time budget between two cooperative yields, in milliseconds
    pub yield_interval_ms: u64,

    /// Scheduling of child subtrees during traversal
    pub child_traversal: ChildTraversal,

    /// Uniform unit conversion applied to extracted geometry
    pub conversion_factor: f32,

    /// Distance under which vertices are merged
    pub merge_tolerance: f32,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            yield_interval_ms: DEFAULT_YIELD_INTERVAL.as_millis() as u64,
            child_traversal: ChildTraversal::default(),
            conversion_factor: 1.0,
            merge_tolerance: DEFAULT_MERGE_TOLERANCE,
        }
    }
}

impl LoaderOptions {
    /// Read and validate options from a JSON document.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Check that the conversion factor and merge tolerance are usable.
    pub fn validate(&self) -> ConfigResult<()> {
        self.geometry_converter()?;
        Ok(())
    }

    pub fn yield_interval(&self) -> Duration {
        Duration::from_millis(self.yield_interval_ms)
    }

    /// Geometry converter configured from these options.
    pub fn geometry_converter(&self) -> ConvertResult<ModelGeometryConverter> {
        ModelGeometryConverter::new(self.conversion_factor)?.with_merge_tolerance(self.merge_tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LoaderOptions::default();

        assert_eq!(options.yield_interval(), Duration::from_millis(100));
        assert_eq!(options.child_traversal, ChildTraversal::Sequential);
        assert_eq!(options.conversion_factor, 1.0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options =
            LoaderOptions::from_json_str(r#"{ "childTraversal": "concurrent", "conversionFactor": 0.001 }"#)
                .unwrap();

        assert_eq!(options.child_traversal, ChildTraversal::Concurrent);
        assert_eq!(options.conversion_factor, 0.001);
        assert_eq!(options.yield_interval_ms, 100);
        assert_eq!(options.geometry_converter().unwrap().conversion_factor(), 0.001);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        assert!(matches!(
            LoaderOptions::from_json_str(r#"{ "childTraversal": "parallel" }"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_degenerate_conversion_factor_is_rejected() {
        for json in [r#"{ "conversionFactor": 0 }"#, r#"{ "conversionFactor": -2.5 }"#] {
            assert!(matches!(
                LoaderOptions::from_json_str(json),
                Err(ConfigError::Invalid(ConvertError::InvalidConversionFactor(_)))
            ));
        }
        assert!(matches!(
            LoaderOptions::from_json_str(r#"{ "mergeTolerance": 0 }"#),
            Err(ConfigError::Invalid(ConvertError::InvalidMergeTolerance(_)))
        ));

        let options = LoaderOptions {
            conversion_factor: f32::NAN,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }
}
