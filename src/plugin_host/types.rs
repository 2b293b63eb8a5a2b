//! Core types for plugin hosting
//!
//! Defines the fundamental types used throughout the plugin host system:
//! - Plugin identification and formats
//! - Plugin metadata (info, parameters, presets)
//! - Error types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported plugin formats
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginFormat {
    /// Legacy Steinberg VST2 format (deprecated but widely used)
    Vst2,
    /// Steinberg VST3 format
    Vst3,
    /// Apple Audio Unit (macOS/iOS)
    AudioUnit,
    /// CLAP (CLever Audio Plugin)
    Clap,
    /// Linux Audio Plugins (LV2)
    Lv2,
}

impl fmt::Display for PluginFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginFormat::Vst2 => write!(f, "VST2"),
            PluginFormat::Vst3 => write!(f, "VST3"),
            PluginFormat::AudioUnit => write!(f, "AU"),
            PluginFormat::Clap => write!(f, "CLAP"),
            PluginFormat::Lv2 => write!(f, "LV2"),
        }
    }
}

/// Unique plugin identifier
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginId {
    /// Plugin format (VST3, AU, etc.)
    pub format: PluginFormat,
    /// Unique identifier (bundle ID for AU, path for VST3)
    pub identifier: String,
    /// Human-readable name
    pub name: String,
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.format)
    }
}

/// Plugin category
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginCategory {
    /// Synthesizer (generates audio from MIDI)
    Instrument,
    /// Audio effect (processes audio)
    Effect,
    /// MIDI effect (processes MIDI)
    MidiEffect,
    /// Audio analyzer (metering, spectrum, etc.)
    Analyzer,
    /// Unknown/uncategorized
    Unknown,
}

/// Plugin metadata from scanning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Unique plugin identifier
    pub id: PluginId,
    /// Plugin vendor/manufacturer
    pub vendor: String,
    /// Plugin version string
    pub version: String,
    /// Plugin category
    pub category: PluginCategory,
    /// Number of audio inputs
    pub num_inputs: usize,
    /// Number of audio outputs
    pub num_outputs: usize,
    /// Parameter metadata
    pub parameters: Vec<ParameterInfo>,
    /// Factory preset names
    pub factory_presets: Vec<String>,
    /// Whether the plugin has a GUI
    pub has_gui: bool,
    /// File path or bundle path
    pub path: String,
}

/// Parameter metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter index
    pub index: usize,
    /// Full parameter name
    pub name: String,
    /// Short name (for display)
    pub short_name: String,
    /// Default value (normalized 0.0-1.0)
    pub default_value: f32,
    /// Minimum value (normalized)
    pub min_value: f32,
    /// Maximum value (normalized)
    pub max_value: f32,
    /// Unit label (Hz, dB, %, etc.)
    pub unit: String,
    /// Number of steps (0 = continuous)
    pub step_count: u32,
    /// Whether this is an automatable parameter
    pub automatable: bool,
}

impl ParameterInfo {
    /// Create a simple continuous parameter
    pub fn new(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            short_name: name.to_string(),
            default_value: 0.0,
            min_value: 0.0,
            max_value: 1.0,
            unit: String::new(),
            step_count: 0,
            automatable: true,
        }
    }
}
