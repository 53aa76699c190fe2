use crate::types::Config;
use anyhow::Result;
use std::fs;
use std::path::Path;

impl Config {
    /// Load from YAML; a missing file yields the documented defaults so
    /// the pipeline can run unconfigured.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load("definitely/not/a/config.yaml").unwrap();
        assert_eq!(config.video.target_width, 640);
        assert_eq!(config.segmenter.roi_width, 120);
        assert!((config.calibration.fallback_px_to_cm - 0.052).abs() < 1e-9);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("flow:\n  smooth_window: 30\n").unwrap();
        assert_eq!(config.flow.smooth_window, 30);
        // untouched sections keep their documented defaults
        assert!((config.flow.raw_clamp_ml_s - 100.0).abs() < 1e-9);
        assert!((config.ensemble.post_clamp_ml_s - 80.0).abs() < 1e-9);
    }
}
