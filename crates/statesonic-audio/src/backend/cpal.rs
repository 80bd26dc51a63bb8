//! Real-time audio output via cpal.
//!
//! The cpal stream is owned by a dedicated thread, since streams cannot move
//! between threads on every platform. The backend talks to that thread over
//! a crossbeam channel and shares the node graph with the audio callback.
//! The context clock counts rendered frames, so it stands still while the
//! stream is paused.

use super::{AudioBackend, ContextState};
use crate::errors::{AudioError, Result};
use crate::graph::{Automation, NodeGraph, NodeId};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use statesonic_core::Waveform;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// State shared with the audio callback.
struct Mixer {
    graph: NodeGraph,
    frames: u64,
    sample_rate: u32,
}

impl Mixer {
    fn now(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

#[derive(Debug)]
enum StreamCommand {
    Play,
    Pause,
    Close,
}

type Reply = std::result::Result<(), String>;

/// Audio context on the default output device.
pub struct CpalBackend {
    mixer: Arc<Mutex<Mixer>>,
    commands: Sender<(StreamCommand, Sender<Reply>)>,
    state: ContextState,
    device_name: String,
    thread: Option<JoinHandle<()>>,
}

impl CpalBackend {
    /// Open the default output device. The context starts suspended.
    pub fn open_default() -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer {
            graph: NodeGraph::new(),
            frames: 0,
            sample_rate: 48_000,
        }));
        let (commands, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let thread_mixer = mixer.clone();
        let thread = std::thread::Builder::new()
            .name("statesonic-audio".to_string())
            .spawn(move || stream_thread(thread_mixer, command_rx, ready_tx))
            .map_err(|e| AudioError::Device(format!("failed to spawn audio thread: {}", e)))?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| AudioError::Device("audio thread exited during setup".to_string()))??;
        log::info!("[AUDIO] Opened output device '{}'", device_name);

        Ok(Self {
            mixer,
            commands,
            state: ContextState::Suspended,
            device_name,
            thread: Some(thread),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn lock(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().expect("Mixer lock poisoned")
    }

    fn open_graph(&self) -> Result<MutexGuard<'_, Mixer>> {
        if self.state == ContextState::Closed {
            return Err(AudioError::Closed);
        }
        Ok(self.lock())
    }

    fn send(&self, command: StreamCommand) -> Reply {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send((command, reply_tx))
            .map_err(|_| "audio thread is gone".to_string())?;
        reply_rx.recv().map_err(|_| "audio thread is gone".to_string())?
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn stream_thread(
    mixer: Arc<Mutex<Mixer>>,
    commands: Receiver<(StreamCommand, Sender<Reply>)>,
    ready: Sender<Result<String>>,
) {
    let (stream, device_name) = match build_stream(mixer) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(device_name)).is_err() {
        return;
    }

    while let Ok((command, reply)) = commands.recv() {
        let result = match command {
            StreamCommand::Play => stream.play().map_err(|e| e.to_string()),
            StreamCommand::Pause => stream.pause().map_err(|e| e.to_string()),
            StreamCommand::Close => {
                let _ = reply.send(Ok(()));
                break;
            }
        };
        let _ = reply.send(result);
    }
    log::debug!("[AUDIO] Stream thread exiting");
}

fn build_stream(mixer: Arc<Mutex<Mixer>>) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Unsupported("no default output device".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(AudioError::Device(format!(
            "unsupported sample format {:?} on '{}'",
            supported.sample_format(),
            device_name
        )));
    }
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate;
    mixer.lock().expect("Mixer lock poisoned").sample_rate = sample_rate;

    let mut mono: Vec<f32> = Vec::new();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let frames = data.len() / channels.max(1);
                mono.clear();
                mono.resize(frames, 0.0);

                // never block the audio thread; a contended buffer plays silence
                if let Ok(mut mixer) = mixer.try_lock() {
                    let start = mixer.now();
                    mixer.graph.mix_live_into(&mut mono, start, mixer.sample_rate);
                    mixer.frames += frames as u64;
                    let now = mixer.now();
                    mixer.graph.fire_ended(now);
                }

                for (frame, sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                    frame.fill(*sample);
                }
            },
            |err| log::error!("[AUDIO] Stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::Device(e.to_string()))?;

    Ok((stream, device_name))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn current_time(&self) -> f64 {
        self.lock().now()
    }

    fn resume(&mut self) -> Result<()> {
        match self.state {
            ContextState::Closed => Err(AudioError::Closed),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                self.send(StreamCommand::Play).map_err(AudioError::ResumeFailed)?;
                self.state = ContextState::Running;
                Ok(())
            }
        }
    }

    fn suspend(&mut self) -> Result<()> {
        match self.state {
            ContextState::Closed => Err(AudioError::Closed),
            ContextState::Suspended => Ok(()),
            ContextState::Running => {
                self.send(StreamCommand::Pause).map_err(AudioError::Device)?;
                self.state = ContextState::Suspended;
                Ok(())
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.state == ContextState::Closed {
            return Ok(());
        }
        self.state = ContextState::Closed;
        self.lock().graph.clear();
        let result = self.send(StreamCommand::Close);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result.map_err(AudioError::Device)
    }

    fn create_oscillator(&mut self, waveform: Waveform, frequency: f64, detune: f64) -> Result<NodeId> {
        self.open_graph()?.graph.add_oscillator(waveform, frequency, detune)
    }

    fn create_gain(&mut self, initial: f64) -> Result<NodeId> {
        Ok(self.open_graph()?.graph.add_gain(initial))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.open_graph()?.graph.connect(from, to)
    }

    fn connect_to_destination(&mut self, node: NodeId) -> Result<()> {
        self.open_graph()?.graph.connect_to_destination(node)
    }

    fn schedule(&mut self, node: NodeId, automation: Automation) -> Result<()> {
        self.open_graph()?.graph.schedule(node, automation)
    }

    fn start(&mut self, node: NodeId, at: f64) -> Result<()> {
        self.open_graph()?.graph.start(node, at)
    }

    fn stop(&mut self, node: NodeId, at: f64) -> Result<()> {
        self.open_graph()?.graph.stop(node, at)
    }

    fn ended(&mut self, node: NodeId) -> Option<oneshot::Receiver<()>> {
        self.open_graph().ok()?.graph.ended(node)
    }

    fn disconnect(&mut self, node: NodeId) -> Result<()> {
        if self.state == ContextState::Closed {
            return Ok(());
        }
        self.lock().graph.disconnect(node)
    }
}
