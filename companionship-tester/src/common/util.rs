use anyhow::{Context, Result};
use std::path::Path;

use companionship_engine::TrackerConfig;

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// Parse comma separated seeds, accepting decimal or `0x` hex.
pub fn parse_seeds(s: &str) -> Result<Vec<u64>> {
    split_csv(s)
        .iter()
        .map(|token| {
            let parsed = token.strip_prefix("0x").map_or_else(
                || token.parse::<u64>(),
                |hex| u64::from_str_radix(hex, 16),
            );
            parsed.with_context(|| format!("invalid seed '{token}'"))
        })
        .collect()
}

/// Base tracker configuration, from a JSON file when one is given.
pub fn load_base_config(path: Option<&Path>) -> Result<TrackerConfig> {
    let Some(path) = path else {
        return Ok(TrackerConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    TrackerConfig::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
}
