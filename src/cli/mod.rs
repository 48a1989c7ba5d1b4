//! Shared CLI utilities for the strata-viz binaries.

use std::path::Path;

use tracing::warn;

use crate::error::VizError;
use crate::model::ModelShape;

/// Environment variable overriding the default seconds per phase.
pub const STEP_DURATION_ENV: &str = "STRATA_STEP_DURATION";

/// Initialize tracing/logging to stderr.
///
/// If `disable` is true, no output is produced.
/// Otherwise respects `RUST_LOG` env var, defaulting to WARN.
pub fn init_logging(disable: bool) {
    use tracing_subscriber::EnvFilter;

    if disable {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse token ids separated by commas and/or whitespace.
pub fn parse_token_ids(input: &str) -> Result<Vec<u32>, String> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|_| format!("Invalid token ID: '{}'", s))
        })
        .collect()
}

/// Read prompt token ids from either an inline list or a file.
pub fn read_token_ids(ids: Option<&str>, file: Option<&Path>) -> Result<Vec<u32>, String> {
    if let Some(ids) = ids {
        return parse_token_ids(ids);
    }

    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read file '{}': {}", path.display(), e))?;
        return parse_token_ids(&text);
    }

    Err("No input provided. Use --token-ids or --token-file".to_string())
}

/// Model dimensions from a config JSON file, or the nano shape.
pub fn load_shape(config: Option<&Path>) -> Result<ModelShape, VizError> {
    match config {
        Some(path) => ModelShape::from_file(path),
        None => Ok(ModelShape::nano()),
    }
}

/// Parse a positive, finite step duration in seconds.
pub fn parse_step_duration(value: &str) -> Option<f32> {
    value
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Step duration from [`STEP_DURATION_ENV`], if set and valid.
pub fn step_duration_from_env() -> Option<f32> {
    let value = std::env::var(STEP_DURATION_ENV).ok()?;
    let parsed = parse_step_duration(&value);
    if parsed.is_none() {
        warn!(value = %value, "Ignoring invalid {}", STEP_DURATION_ENV);
    }
    parsed
}
