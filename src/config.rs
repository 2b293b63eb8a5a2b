//! Engine configuration: closed enums instead of the string-typed runtime
//! configuration the original implementation used for backend/pan-law
//! selection, loadable from TOML via serde.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 384_000;
pub const MIN_BLOCK_LEN: usize = 1;
pub const MAX_BLOCK_LEN: usize = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBackendKind {
    Cpal,
    Dummy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiBackendKind {
    Midir,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanLaw {
    Linear,
    /// -3 dB at center.
    SquareRoot,
    /// -4.5 dB at center.
    Sine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaderCurve {
    Linear,
    Logarithmic,
    Cubic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub block_len: usize,
    pub worker_count: usize,
    pub audio_backend: AudioBackendKind,
    pub midi_backend: MidiBackendKind,
    pub pan_law: PanLaw,
    pub fader_curve: FaderCurve,
    /// Soft xrun budget, expressed as a fraction of the block period. A
    /// cycle that takes longer than `block_len / sample_rate * xrun_budget`
    /// reports `EngineError::Xrun` without tearing down the transport.
    pub xrun_budget_fraction: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_len: 512,
            worker_count: default_worker_count(),
            audio_backend: AudioBackendKind::Cpal,
            midi_backend: MidiBackendKind::Midir,
            pan_law: PanLaw::SquareRoot,
            fader_curve: FaderCurve::Cubic,
            xrun_budget_fraction: 0.9,
        }
    }
}

fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(EngineError::config(format!(
                "sample_rate {} out of range [{MIN_SAMPLE_RATE}, {MAX_SAMPLE_RATE}]",
                self.sample_rate
            )));
        }
        if !(MIN_BLOCK_LEN..=MAX_BLOCK_LEN).contains(&self.block_len) {
            return Err(EngineError::config(format!(
                "block_len {} out of range [{MIN_BLOCK_LEN}, {MAX_BLOCK_LEN}]",
                self.block_len
            )));
        }
        if self.worker_count == 0 {
            return Err(EngineError::config("worker_count must be >= 1"));
        }
        if !(self.xrun_budget_fraction > 0.0 && self.xrun_budget_fraction <= 1.0) {
            return Err(EngineError::config("xrun_budget_fraction must be in (0, 1]"));
        }
        Ok(())
    }

    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        let cfg: EngineConfig =
            toml::from_str(s).map_err(|e| EngineError::config(format!("toml parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn block_period_secs(&self) -> f64 {
        self.block_len as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_sample_rate() {
        let mut cfg = EngineConfig::default();
        cfg.sample_rate = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = EngineConfig::default();
        let s = toml::to_string(&cfg).unwrap();
        let back = EngineConfig::from_toml_str(&s).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn loads_from_a_toml_file_on_disk() {
        use std::io::Write;

        let mut cfg = EngineConfig::default();
        cfg.block_len = 256;
        let s = toml::to_string(&cfg).unwrap();

        let mut file = tempfile::NamedTempFile::new().expect("should create temp config file");
        file.write_all(s.as_bytes()).expect("should write config file");

        let contents = std::fs::read_to_string(file.path()).expect("should read config file back");
        let loaded = EngineConfig::from_toml_str(&contents).unwrap();
        assert_eq!(loaded, cfg);
    }
}
