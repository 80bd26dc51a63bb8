//! Audio node graph shared by all backends.
//!
//! The graph mirrors the small subset of a browser-style audio graph the
//! playback scheduler needs:
//!
//! - [`NodeId`] - Opaque handle to a node
//! - [`Automation`] - Scheduled parameter change (set / linear / exponential)
//! - [`ParamTimeline`] - An automatable parameter and its scheduled events
//! - [`NodeGraph`] - Oscillators, gains, their connections and end notifications
//! - [`Voice`] - A started oscillator routed through a gain to the destination
//!
//! Times are seconds on the owning backend's clock.

use crate::errors::{AudioError, Result};
use crate::synth;
use statesonic_core::Waveform;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Opaque handle to an audio node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A scheduled change of an automatable parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Automation {
    /// Jump to `value` at time `at`.
    SetValue { value: f64, at: f64 },
    /// Ramp linearly from the previous event to `value`, arriving at `end`.
    LinearRamp { value: f64, end: f64 },
    /// Ramp exponentially from the previous event to `value`, arriving at `end`.
    /// Both endpoints must be positive.
    ExponentialRamp { value: f64, end: f64 },
}

impl Automation {
    /// Time at which the event takes full effect.
    pub fn time(&self) -> f64 {
        match *self {
            Automation::SetValue { at, .. } => at,
            Automation::LinearRamp { end, .. } | Automation::ExponentialRamp { end, .. } => end,
        }
    }

    pub fn value(&self) -> f64 {
        match *self {
            Automation::SetValue { value, .. }
            | Automation::LinearRamp { value, .. }
            | Automation::ExponentialRamp { value, .. } => value,
        }
    }
}

/// An automatable parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamTimeline {
    initial: f64,
    events: Vec<Automation>,
}

impl ParamTimeline {
    pub fn new(initial: f64) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    /// Insert an event, keeping events ordered by time (insertion order on ties).
    pub fn push(&mut self, automation: Automation) {
        let at = automation.time();
        let index = self.events.partition_point(|e| e.time() <= at);
        self.events.insert(index, automation);
    }

    pub fn events(&self) -> &[Automation] {
        &self.events
    }

    /// Parameter value at time `t`.
    pub fn value_at(&self, t: f64) -> f64 {
        let mut value = self.initial;
        let mut time = f64::NEG_INFINITY;

        for event in &self.events {
            match *event {
                Automation::SetValue { value: target, at } => {
                    if t < at {
                        return value;
                    }
                    value = target;
                    time = at;
                }
                Automation::LinearRamp { value: target, end } => {
                    if t < end {
                        if t <= time || !time.is_finite() {
                            return value;
                        }
                        let progress = (t - time) / (end - time);
                        return value + (target - value) * progress;
                    }
                    value = target;
                    time = end;
                }
                Automation::ExponentialRamp { value: target, end } => {
                    if t < end {
                        if t <= time || !time.is_finite() || value <= 0.0 || target <= 0.0 {
                            return value;
                        }
                        let progress = (t - time) / (end - time);
                        return value * (target / value).powf(progress);
                    }
                    value = target;
                    time = end;
                }
            }
        }
        value
    }
}

/// Where a node's output goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Output {
    None,
    Node(NodeId),
    Destination,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Oscillator {
        waveform: Waveform,
        frequency: f64,
        /// Cents.
        detune: f64,
        start: Option<f64>,
        stop: Option<f64>,
    },
    Gain {
        gain: ParamTimeline,
    },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub output: Output,
}

/// A started oscillator routed through a gain node to the destination.
#[derive(Clone, Debug, PartialEq)]
pub struct Voice {
    pub oscillator: NodeId,
    pub waveform: Waveform,
    /// Effective frequency in Hz (detune applied).
    pub frequency: f64,
    pub start: f64,
    /// `f64::INFINITY` when no stop is scheduled.
    pub stop: f64,
    pub gain: ParamTimeline,
}

/// Apply a detune in cents to a frequency.
pub fn detuned(frequency: f64, cents: f64) -> f64 {
    frequency * 2f64.powf(cents / 1200.0)
}

/// Node storage for one audio context.
#[derive(Debug, Default)]
pub struct NodeGraph {
    nodes: HashMap<NodeId, Node>,
    next_id: u64,
    ended: HashMap<NodeId, Vec<oneshot::Sender<()>>>,
    oscillators_created: usize,
    // only kept when recording
    disconnected: Vec<NodeId>,
    history: Vec<Voice>,
    record: bool,
}

/// Borrowed view of a routed oscillator.
struct VoiceView<'a> {
    waveform: Waveform,
    frequency: f64,
    start: f64,
    stop: f64,
    gain: &'a ParamTimeline,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A graph that keeps every disconnected voice for offline rendering.
    pub fn recording() -> Self {
        Self {
            record: true,
            ..Self::default()
        }
    }

    fn insert(&mut self, kind: NodeKind) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(
            id,
            Node {
                kind,
                output: Output::None,
            },
        );
        id
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(AudioError::UnknownNode(id))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn add_oscillator(&mut self, waveform: Waveform, frequency: f64, detune: f64) -> Result<NodeId> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(AudioError::NodeCreation {
                kind: "oscillator",
                reason: format!("invalid frequency {}", frequency),
            });
        }
        self.oscillators_created += 1;
        Ok(self.insert(NodeKind::Oscillator {
            waveform,
            frequency,
            detune: if detune.is_finite() { detune } else { 0.0 },
            start: None,
            stop: None,
        }))
    }

    pub fn add_gain(&mut self, initial: f64) -> NodeId {
        self.insert(NodeKind::Gain {
            gain: ParamTimeline::new(initial),
        })
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&to) {
            return Err(AudioError::UnknownNode(to));
        }
        self.node_mut(from)?.output = Output::Node(to);
        Ok(())
    }

    pub fn connect_to_destination(&mut self, node: NodeId) -> Result<()> {
        self.node_mut(node)?.output = Output::Destination;
        Ok(())
    }

    pub fn schedule(&mut self, node: NodeId, automation: Automation) -> Result<()> {
        match &mut self.node_mut(node)?.kind {
            NodeKind::Gain { gain } => {
                gain.push(automation);
                Ok(())
            }
            NodeKind::Oscillator { .. } => Err(AudioError::InvalidTarget(node)),
        }
    }

    pub fn start(&mut self, node: NodeId, at: f64) -> Result<()> {
        match &mut self.node_mut(node)?.kind {
            NodeKind::Oscillator { start, .. } => {
                *start = Some(at);
                Ok(())
            }
            NodeKind::Gain { .. } => Err(AudioError::InvalidTarget(node)),
        }
    }

    pub fn stop(&mut self, node: NodeId, at: f64) -> Result<()> {
        match &mut self.node_mut(node)?.kind {
            NodeKind::Oscillator { stop, .. } => {
                *stop = Some(at);
                Ok(())
            }
            NodeKind::Gain { .. } => Err(AudioError::InvalidTarget(node)),
        }
    }

    /// Register for the oscillator's end-of-playback notification.
    pub fn ended(&mut self, node: NodeId) -> Option<oneshot::Receiver<()>> {
        match self.nodes.get(&node)?.kind {
            NodeKind::Oscillator { .. } => {
                let (tx, rx) = oneshot::channel();
                self.ended.entry(node).or_default().push(tx);
                Some(rx)
            }
            NodeKind::Gain { .. } => None,
        }
    }

    /// Remove a node. A recording graph keeps oscillators that were routed
    /// to the destination in its voice history.
    pub fn disconnect(&mut self, node: NodeId) -> Result<()> {
        if self.record {
            if let Some(voice) = self.voice(node) {
                self.history.push(voice);
            }
        }
        self.nodes.remove(&node).ok_or(AudioError::UnknownNode(node))?;
        self.ended.remove(&node);
        for other in self.nodes.values_mut() {
            if other.output == Output::Node(node) {
                other.output = Output::None;
            }
        }
        if self.record {
            self.disconnected.push(node);
        }
        Ok(())
    }

    /// Resolve the voice an oscillator produces, if it is audible.
    pub fn voice(&self, oscillator: NodeId) -> Option<Voice> {
        self.view(oscillator).map(|v| Voice {
            oscillator,
            waveform: v.waveform,
            frequency: v.frequency,
            start: v.start,
            stop: v.stop,
            gain: v.gain.clone(),
        })
    }

    fn view(&self, oscillator: NodeId) -> Option<VoiceView<'_>> {
        let node = self.nodes.get(&oscillator)?;
        let NodeKind::Oscillator {
            waveform,
            frequency,
            detune,
            start: Some(start),
            stop,
        } = &node.kind
        else {
            return None;
        };
        let Output::Node(gain_id) = node.output else {
            return None;
        };
        let gain_node = self.nodes.get(&gain_id)?;
        let NodeKind::Gain { gain } = &gain_node.kind else {
            return None;
        };
        if gain_node.output != Output::Destination {
            return None;
        }

        Some(VoiceView {
            waveform: *waveform,
            frequency: detuned(*frequency, *detune),
            start: *start,
            stop: stop.unwrap_or(f64::INFINITY),
            gain,
        })
    }

    /// Mix every live voice into `buffer`, whose first frame is at
    /// `start_time`. Allocation free, for the real-time callback.
    pub fn mix_live_into(&self, buffer: &mut [f32], start_time: f64, sample_rate: u32) {
        let step = 1.0 / sample_rate as f64;
        let end = start_time + buffer.len() as f64 * step;
        for id in self.nodes.keys() {
            let Some(v) = self.view(*id) else {
                continue;
            };
            if v.stop <= start_time || v.start >= end {
                continue;
            }
            for (i, out) in buffer.iter_mut().enumerate() {
                let t = start_time + i as f64 * step;
                *out += synth::voice_sample(v.waveform, v.frequency, v.start, v.stop, v.gain, t) as f32;
            }
        }
        for out in buffer.iter_mut() {
            *out = out.clamp(-1.0, 1.0);
        }
    }

    /// Voices of all live oscillators.
    pub fn live_voices(&self) -> Vec<Voice> {
        let mut voices: Vec<Voice> = self.nodes.keys().filter_map(|id| self.voice(*id)).collect();
        voices.sort_by_key(|v| v.oscillator);
        voices
    }

    /// Disconnected voices followed by live ones. Only a recording graph
    /// remembers disconnected voices.
    pub fn recorded_voices(&self) -> Vec<Voice> {
        let mut voices = self.history.clone();
        voices.extend(self.live_voices());
        voices
    }

    /// Fire end notifications for oscillators whose stop time has passed.
    pub fn fire_ended(&mut self, now: f64) -> usize {
        let due: Vec<NodeId> = self
            .ended
            .keys()
            .copied()
            .filter(|id| {
                matches!(
                    self.nodes.get(id).map(|n| &n.kind),
                    Some(NodeKind::Oscillator { stop: Some(stop), .. }) if *stop <= now
                )
            })
            .collect();
        self.notify(&due)
    }

    /// Fire every pending end notification.
    pub fn fire_all_ended(&mut self) -> usize {
        let all: Vec<NodeId> = self.ended.keys().copied().collect();
        self.notify(&all)
    }

    /// Fire the end notifications of one oscillator.
    pub fn fire_node(&mut self, node: NodeId) -> usize {
        self.notify(&[node])
    }

    fn notify(&mut self, ids: &[NodeId]) -> usize {
        let mut fired = 0;
        for id in ids {
            for tx in self.ended.remove(id).unwrap_or_default() {
                if tx.send(()).is_ok() {
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Drop every node and pending notification.
    pub fn clear(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        for id in ids {
            let _ = self.disconnect(id);
        }
        self.ended.clear();
    }

    pub fn oscillators_created(&self) -> usize {
        self.oscillators_created
    }

    pub fn live_node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn disconnected(&self) -> &[NodeId] {
        &self.disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routed_voice(graph: &mut NodeGraph) -> (NodeId, NodeId) {
        let osc = graph.add_oscillator(Waveform::Sine, 440.0, 0.0).unwrap();
        let gain = graph.add_gain(0.0);
        graph.connect(osc, gain).unwrap();
        graph.connect_to_destination(gain).unwrap();
        graph.start(osc, 1.0).unwrap();
        graph.stop(osc, 2.0).unwrap();
        (osc, gain)
    }

    #[test]
    fn test_timeline_linear_and_exponential() {
        let mut gain = ParamTimeline::new(0.0);
        gain.push(Automation::SetValue { value: 0.0, at: 0.0 });
        gain.push(Automation::LinearRamp { value: 1.0, end: 1.0 });
        gain.push(Automation::ExponentialRamp { value: 0.25, end: 3.0 });

        assert_eq!(gain.value_at(-1.0), 0.0);
        assert!((gain.value_at(0.5) - 0.5).abs() < 1e-9);
        assert_eq!(gain.value_at(1.0), 1.0);
        // halfway through an exponential ramp from 1.0 to 0.25
        assert!((gain.value_at(2.0) - 0.5).abs() < 1e-9);
        assert_eq!(gain.value_at(10.0), 0.25);
    }

    #[test]
    fn test_timeline_orders_events() {
        let mut gain = ParamTimeline::new(1.0);
        gain.push(Automation::SetValue { value: 0.2, at: 2.0 });
        gain.push(Automation::SetValue { value: 0.5, at: 1.0 });
        assert_eq!(gain.events()[0].time(), 1.0);
        assert_eq!(gain.value_at(1.5), 0.5);
        assert_eq!(gain.value_at(2.5), 0.2);
    }

    #[test]
    fn test_voice_requires_routing() {
        let mut graph = NodeGraph::new();
        let osc = graph.add_oscillator(Waveform::Square, 220.0, 1200.0).unwrap();
        graph.start(osc, 0.0).unwrap();
        assert!(graph.voice(osc).is_none());

        let gain = graph.add_gain(0.5);
        graph.connect(osc, gain).unwrap();
        assert!(graph.voice(osc).is_none());
        graph.connect_to_destination(gain).unwrap();

        let voice = graph.voice(osc).unwrap();
        assert!((voice.frequency - 440.0).abs() < 1e-9);
        assert_eq!(voice.stop, f64::INFINITY);
    }

    #[test]
    fn test_invalid_targets() {
        let mut graph = NodeGraph::new();
        let (osc, gain) = routed_voice(&mut graph);
        assert!(matches!(
            graph.schedule(osc, Automation::SetValue { value: 1.0, at: 0.0 }),
            Err(AudioError::InvalidTarget(_))
        ));
        assert!(matches!(graph.start(gain, 0.0), Err(AudioError::InvalidTarget(_))));
        assert!(matches!(graph.connect(osc, NodeId(999)), Err(AudioError::UnknownNode(_))));
        assert!(graph.add_oscillator(Waveform::Sine, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_ended_fires_after_stop() {
        let mut graph = NodeGraph::new();
        let (osc, _gain) = routed_voice(&mut graph);
        let mut rx = graph.ended(osc).unwrap();

        assert_eq!(graph.fire_ended(1.5), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(graph.fire_ended(2.0), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_disconnect_keeps_history() {
        let mut graph = NodeGraph::recording();
        let (osc, gain) = routed_voice(&mut graph);
        graph.disconnect(osc).unwrap();
        graph.disconnect(gain).unwrap();

        assert_eq!(graph.live_node_count(), 0);
        assert_eq!(graph.disconnected(), &[osc, gain]);
        assert_eq!(graph.recorded_voices().len(), 1);
        assert!(matches!(graph.disconnect(osc), Err(AudioError::UnknownNode(_))));
    }

    #[test]
    fn test_live_graph_keeps_no_history() {
        let mut graph = NodeGraph::new();
        for _ in 0..100 {
            let (osc, gain) = routed_voice(&mut graph);
            graph.disconnect(osc).unwrap();
            graph.disconnect(gain).unwrap();
        }
        assert_eq!(graph.live_node_count(), 0);
        assert!(graph.disconnected().is_empty());
        assert!(graph.recorded_voices().is_empty());
    }

    #[test]
    fn test_mix_live_matches_voice_rendering() {
        let mut graph = NodeGraph::new();
        let (osc, gain) = routed_voice(&mut graph);
        graph.schedule(gain, Automation::SetValue { value: 0.5, at: 1.0 }).unwrap();

        let mut live = vec![0.0_f32; 64];
        graph.mix_live_into(&mut live, 1.0, 1000);
        let mut expected = vec![0.0_f32; 64];
        synth::mix_into(&[graph.voice(osc).unwrap()], &mut expected, 1.0, 1000);

        assert!(live.iter().any(|s| *s != 0.0));
        for (a, b) in live.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6);
        }

        let mut silent = vec![0.0_f32; 64];
        graph.mix_live_into(&mut silent, 2.5, 1000);
        assert!(silent.iter().all(|s| *s == 0.0));
    }
}
