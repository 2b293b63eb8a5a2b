//! Audio backend boundary: the realtime callback source. A `cpal`-backed
//! implementation drives a real output device; a `DummyBackend` drives the
//! same callback synchronously for headless/offline-bounce runs and tests,
//! matching the original system's notion of an "offline export" mode that
//! needs no real device. `MidiInputBackend` is the analogous boundary for
//! the EVENT port's MIDI source.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use crate::error::{EngineError, EngineResult};

/// Invoked once per hardware callback with the number of frames the
/// backend wants filled; `fill` must write exactly that many interleaved
/// stereo samples into the provided output slice.
pub trait AudioBackend: Send {
    fn start(&mut self, fill: Box<dyn FnMut(&mut [f32], usize) + Send>) -> EngineResult<()>;
    fn stop(&mut self);
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
}

pub struct CpalBackend {
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    channels: u16,
}

impl CpalBackend {
    pub fn new() -> EngineResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::BackendLost("no default output device".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::BackendLost(e.to_string()))?;
        info!(sample_rate = config.sample_rate().0, channels = config.channels(), "cpal output device selected");
        Ok(Self {
            stream: None,
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
        })
    }
}

impl AudioBackend for CpalBackend {
    fn start(&mut self, fill: Box<dyn FnMut(&mut [f32], usize) + Send>) -> EngineResult<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::BackendLost("no default output device".to_string()))?;
        let config = device
            .default_output_config()
            .map_err(|e| EngineError::BackendLost(e.to_string()))?;

        let fill = Arc::new(Mutex::new(fill));
        let channels = self.channels as usize;

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels.max(1);
                    let mut fill = fill.lock().expect("audio callback closure poisoned");
                    (fill)(data, frames);
                },
                move |err| error!(%err, "cpal stream error"),
                None,
            )
            .map_err(|e| EngineError::BackendLost(e.to_string()))?;

        stream.play().map_err(|e| EngineError::BackendLost(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// Drives callbacks synchronously from whatever thread calls `pump`,
/// without any real device. Used for offline bounce and tests.
pub struct DummyBackend {
    sample_rate: u32,
    channels: u16,
    fill: Option<Box<dyn FnMut(&mut [f32], usize) + Send>>,
}

impl DummyBackend {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            fill: None,
        }
    }

    /// Synchronously render `nframes` frames by invoking the registered
    /// callback once.
    pub fn pump(&mut self, nframes: usize) -> Vec<f32> {
        let mut buf = vec![0.0f32; nframes * self.channels as usize];
        if let Some(fill) = self.fill.as_mut() {
            (fill)(&mut buf, nframes);
        }
        buf
    }
}

impl AudioBackend for DummyBackend {
    fn start(&mut self, fill: Box<dyn FnMut(&mut [f32], usize) + Send>) -> EngineResult<()> {
        self.fill = Some(fill);
        Ok(())
    }

    fn stop(&mut self) {
        self.fill = None;
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

/// EVENT-port ingestion: captures MIDI input on its own thread (midir's
/// connection callback) and hands events to the cycle-kickoff thread
/// through a lock-free SPSC ring, mirroring the same "no allocator, no lock
/// on the realtime side" discipline as the rest of the engine's hot paths.
///
/// Scoped narrowly: this captures raw MIDI into [`crate::port::MidiEvent`]s
/// for a caller to route into an `Event`-kind graph input; routing captured
/// events onto a specific port is left to the caller (the demo CLI has no
/// MIDI track, so nothing drives this yet).
pub struct MidiInputBackend {
    _connection: midir::MidiInputConnection<()>,
    consumer: ringbuf::HeapCons<crate::port::MidiEvent>,
}

impl MidiInputBackend {
    /// Opens the first input port whose name contains `port_substring`, or
    /// the first available port if `None`.
    pub fn open(port_substring: Option<&str>) -> EngineResult<Self> {
        use ringbuf::traits::Split;

        let mut midi_in = midir::MidiInput::new("signalpath")
            .map_err(|e| EngineError::BackendLost(e.to_string()))?;
        midi_in.ignore(midir::Ignore::None);

        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| match port_substring {
                Some(needle) => midi_in
                    .port_name(p)
                    .map(|name| name.contains(needle))
                    .unwrap_or(false),
                None => true,
            })
            .cloned()
            .ok_or_else(|| EngineError::BackendLost("no MIDI input port available".to_string()))?;

        let ring = ringbuf::HeapRb::<crate::port::MidiEvent>::new(1024);
        let (mut producer, consumer) = ring.split();

        let connection = midi_in
            .connect(
                &port,
                "signalpath-input",
                move |_stamp_us, message, _| {
                    use ringbuf::traits::Producer;
                    let _ = producer.try_push(crate::port::MidiEvent {
                        frame_offset: 0,
                        bytes: message.to_vec(),
                    });
                },
                (),
            )
            .map_err(|e| EngineError::BackendLost(e.to_string()))?;

        Ok(Self {
            _connection: connection,
            consumer,
        })
    }

    /// Drains every MIDI event captured since the last call into `out`, in
    /// arrival order.
    pub fn drain_into(&mut self, out: &mut Vec<crate::port::MidiEvent>) {
        use ringbuf::traits::Consumer;
        while let Some(event) = self.consumer.try_pop() {
            out.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_backend_pumps_registered_callback() {
        let mut backend = DummyBackend::new(48_000, 2);
        backend
            .start(Box::new(|data, _frames| {
                for s in data.iter_mut() {
                    *s = 1.0;
                }
            }))
            .unwrap();
        let out = backend.pump(4);
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|&s| s == 1.0));
    }
}
