//! Plugin hosting boundary.
//!
//! A `PLUGIN` graph node owns a `Box<dyn HostedPlugin>` and calls it once per
//! cycle with the node's already-gathered input buffers. Faults raised here
//! convert to `EngineError::PluginFault` at the node boundary and never
//! unwind into the scheduler.

pub mod types;

pub use types::{ParameterInfo, PluginCategory, PluginFormat, PluginId, PluginInfo};

use crate::error::PluginResult;

/// A plugin instance wired into the graph. Implementors own their own
/// sample-rate/block-size state; `prepare` is called whenever either
/// changes (including once before the first cycle).
pub trait HostedPlugin: Send {
    fn info(&self) -> &PluginInfo;

    fn prepare(&mut self, sample_rate: f64, block_len: usize) -> PluginResult<()>;

    /// Process one block. `inputs`/`outputs` are parallel per-channel audio
    /// slices of exactly `block_len` samples each, already allocated by the
    /// owning node from the shared buffer pool.
    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> PluginResult<()>;

    fn set_parameter(&mut self, index: usize, normalized_value: f32) -> PluginResult<()>;

    fn get_parameter(&self, index: usize) -> PluginResult<f32>;

    fn latency_samples(&self) -> u32 {
        0
    }
}

/// A bypass-safe pass-through plugin used by tests and as a placeholder
/// before a real format loader is wired in.
pub struct PassthroughPlugin {
    info: PluginInfo,
    gain: f32,
}

impl PassthroughPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            info: PluginInfo {
                id: PluginId {
                    format: PluginFormat::Clap,
                    identifier: name.clone(),
                    name: name.clone(),
                },
                vendor: "builtin".to_string(),
                version: "1.0".to_string(),
                category: PluginCategory::Effect,
                num_inputs: 2,
                num_outputs: 2,
                parameters: vec![ParameterInfo::new(0, "gain")],
                factory_presets: vec![],
                has_gui: false,
                path: String::new(),
            },
            gain: 1.0,
        }
    }
}

impl HostedPlugin for PassthroughPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn prepare(&mut self, _sample_rate: f64, _block_len: usize) -> PluginResult<()> {
        Ok(())
    }

    fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> PluginResult<()> {
        for (out, inp) in outputs.iter_mut().zip(inputs.iter()) {
            let n = out.len().min(inp.len());
            for i in 0..n {
                out[i] = inp[i] * self.gain;
            }
        }
        Ok(())
    }

    fn set_parameter(&mut self, index: usize, normalized_value: f32) -> PluginResult<()> {
        if index == 0 {
            self.gain = normalized_value;
            Ok(())
        } else {
            Err(crate::error::PluginError::ParameterError(format!(
                "no such parameter {index}"
            )))
        }
    }

    fn get_parameter(&self, index: usize) -> PluginResult<f32> {
        if index == 0 {
            Ok(self.gain)
        } else {
            Err(crate::error::PluginError::ParameterError(format!(
                "no such parameter {index}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_copies_scaled_input() {
        let mut p = PassthroughPlugin::new("test");
        p.prepare(48_000.0, 4).unwrap();
        p.set_parameter(0, 0.5).unwrap();
        let input = vec![1.0, 1.0, 1.0, 1.0];
        let mut out = vec![0.0; 4];
        p.process(&[&input], &mut [&mut out]).unwrap();
        assert_eq!(out, vec![0.5, 0.5, 0.5, 0.5]);
    }
}
