//! Software synthesis graph.
//!
//! A flat arena of nodes (oscillators, noise generators, panners) rendered
//! to interleaved stereo f32 frames against a running sample clock. Every
//! mutable parameter is an automation lane that resolves immediate sets,
//! linear ramps, scheduled sets and scheduled envelopes sample-accurately.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Result, SonifierError};

use super::{Destination, NodeHandle, NoiseKind, OscillatorKind, PanStrategy, Param};

const TAU: f32 = std::f32::consts::TAU;

#[derive(Debug, Clone)]
struct Ramp {
    start: u64,
    end: u64,
    from: f32,
    to: f32,
}

#[derive(Debug, Clone)]
enum EventKind {
    Set(f32),
    Envelope { duration: u64, values: Vec<f32> },
}

#[derive(Debug, Clone)]
struct AutomationEvent {
    start: u64,
    kind: EventKind,
}

#[derive(Debug, Clone)]
struct ActiveEnvelope {
    start: u64,
    duration: u64,
    values: Vec<f32>,
}

/// One automatable parameter. Direct sets and ramps cancel everything that
/// was previously queued (matching the convention that writing a parameter
/// value clears its automators); scheduled sets and envelopes coexist.
#[derive(Debug, Clone)]
struct ParamLane {
    current: f32,
    ramp: Option<Ramp>,
    active: Option<ActiveEnvelope>,
    events: Vec<AutomationEvent>,
}

impl ParamLane {
    fn new(value: f32) -> Self {
        Self {
            current: value,
            ramp: None,
            active: None,
            events: Vec::new(),
        }
    }

    fn set(&mut self, value: f32) {
        self.current = value;
        self.ramp = None;
        self.active = None;
        self.events.clear();
    }

    fn ramp_to(&mut self, now: u64, duration: u64, target: f32) {
        let from = self.tick(now);
        self.active = None;
        self.events.clear();
        if duration == 0 {
            self.current = target;
            self.ramp = None;
        } else {
            self.ramp = Some(Ramp {
                start: now,
                end: now + duration,
                from,
                to: target,
            });
        }
    }

    fn push_event(&mut self, event: AutomationEvent) {
        let at = self
            .events
            .partition_point(|queued| queued.start <= event.start);
        self.events.insert(at, event);
    }

    /// Resolves the lane at sample time `now`, consuming any automation that
    /// has become due. `now` must not move backwards.
    fn tick(&mut self, now: u64) -> f32 {
        while let Some(next) = self.events.first() {
            if next.start > now {
                break;
            }
            let event = self.events.remove(0);
            self.ramp = None;
            match event.kind {
                EventKind::Set(value) => {
                    self.current = value;
                    self.active = None;
                }
                EventKind::Envelope { duration, values } => {
                    if duration == 0 {
                        self.current = *values.last().expect("validated non-empty");
                        self.active = None;
                    } else {
                        self.active = Some(ActiveEnvelope {
                            start: event.start,
                            duration,
                            values,
                        });
                    }
                }
            }
        }

        if let Some(envelope) = &self.active {
            let end = envelope.start + envelope.duration;
            if now >= end {
                self.current = *envelope.values.last().expect("validated non-empty");
                self.active = None;
            } else if now >= envelope.start {
                let pos = (now - envelope.start) as f32 / envelope.duration as f32;
                self.current = interpolate(&envelope.values, pos);
            }
        } else if let Some(ramp) = &self.ramp {
            if now >= ramp.end {
                self.current = ramp.to;
                self.ramp = None;
            } else if now >= ramp.start {
                let t = (now - ramp.start) as f32 / (ramp.end - ramp.start) as f32;
                self.current = ramp.from + (ramp.to - ramp.from) * t;
            }
        }

        self.current
    }
}

/// Piecewise-linear lookup into `values` at normalised position `pos`.
fn interpolate(values: &[f32], pos: f32) -> f32 {
    if values.len() == 1 {
        return values[0];
    }
    let scaled = pos.clamp(0.0, 1.0) * (values.len() - 1) as f32;
    let index = (scaled as usize).min(values.len() - 2);
    let frac = scaled - index as f32;
    values[index] + (values[index + 1] - values[index]) * frac
}

#[derive(Debug)]
enum NodeKind {
    Oscillator { kind: OscillatorKind, phase: f64 },
    Noise {
        kind: NoiseKind,
        rng: StdRng,
        integrator: f32,
    },
    Panner {
        #[allow(dead_code)]
        strategy: PanStrategy,
    },
}

#[derive(Debug)]
struct NodeState {
    kind: NodeKind,
    gain: ParamLane,
    frequency: ParamLane,
    azimuth: ParamLane,
    harmonics: ParamLane,
    inputs: Vec<usize>,
    to_output: bool,
}

impl NodeState {
    fn new(kind: NodeKind, frequency: f32) -> Self {
        Self {
            kind,
            gain: ParamLane::new(1.0),
            frequency: ParamLane::new(frequency),
            azimuth: ParamLane::new(0.0),
            harmonics: ParamLane::new(1.0),
            inputs: Vec::new(),
            to_output: false,
        }
    }
}

/// The software renderer behind [`super::SoftwareBackend`].
#[derive(Debug)]
pub struct GraphEngine {
    sample_rate: u32,
    clock: u64,
    nodes: Vec<NodeState>,
    scratch: Vec<f32>,
}

impl GraphEngine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            clock: 0,
            nodes: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Adopts the output device's native rate. Called once when the device
    /// opens, before any parameter automation is scheduled.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }

    /// Samples rendered since construction.
    pub fn clock_samples(&self) -> u64 {
        self.clock
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_oscillator(&mut self, kind: OscillatorKind, frequency: f32) -> NodeHandle {
        self.push_node(NodeState::new(
            NodeKind::Oscillator { kind, phase: 0.0 },
            frequency,
        ))
    }

    pub fn add_panner(&mut self, strategy: PanStrategy) -> NodeHandle {
        self.push_node(NodeState::new(NodeKind::Panner { strategy }, 0.0))
    }

    pub fn add_noise(&mut self, kind: NoiseKind) -> NodeHandle {
        self.push_node(NodeState::new(
            NodeKind::Noise {
                kind,
                rng: StdRng::from_entropy(),
                integrator: 0.0,
            },
            0.0,
        ))
    }

    fn push_node(&mut self, node: NodeState) -> NodeHandle {
        self.nodes.push(node);
        NodeHandle(self.nodes.len() - 1)
    }

    pub fn connect(&mut self, src: NodeHandle, dst: Destination) -> Result<()> {
        match dst {
            Destination::Output => {
                let node = self
                    .nodes
                    .get_mut(src.0)
                    .ok_or(SonifierError::UnknownNode(src.0))?;
                node.to_output = true;
                Ok(())
            }
            Destination::Node(dst) => {
                if src.0 >= self.nodes.len() {
                    return Err(SonifierError::UnknownNode(src.0));
                }
                let target = self
                    .nodes
                    .get_mut(dst.0)
                    .ok_or(SonifierError::UnknownNode(dst.0))?;
                if !matches!(target.kind, NodeKind::Panner { .. }) {
                    return Err(SonifierError::msg("only panner nodes accept inputs"));
                }
                target.inputs.push(src.0);
                Ok(())
            }
        }
    }

    fn samples(&self, seconds: f32) -> u64 {
        (seconds.max(0.0) as f64 * self.sample_rate as f64).round() as u64
    }

    fn lane_mut(&mut self, node: NodeHandle, param: Param) -> Option<&mut ParamLane> {
        let node = match self.nodes.get_mut(node.0) {
            Some(node) => node,
            None => {
                tracing::warn!(node = node.0, "parameter change for unknown node dropped");
                return None;
            }
        };
        Some(match param {
            Param::Gain => &mut node.gain,
            Param::Frequency => &mut node.frequency,
            Param::Azimuth => &mut node.azimuth,
            Param::Harmonics => &mut node.harmonics,
        })
    }

    pub fn set_param(&mut self, node: NodeHandle, param: Param, value: f32) {
        if let Some(lane) = self.lane_mut(node, param) {
            lane.set(value);
        }
    }

    pub fn ramp_param(&mut self, node: NodeHandle, param: Param, duration: f32, target: f32) {
        let now = self.clock;
        let duration = self.samples(duration);
        if let Some(lane) = self.lane_mut(node, param) {
            lane.ramp_to(now, duration, target);
        }
    }

    pub fn schedule_set(&mut self, node: NodeHandle, param: Param, at: f32, value: f32) {
        let start = self.clock + self.samples(at);
        if let Some(lane) = self.lane_mut(node, param) {
            lane.push_event(AutomationEvent {
                start,
                kind: EventKind::Set(value),
            });
        }
    }

    pub fn schedule_envelope(
        &mut self,
        node: NodeHandle,
        param: Param,
        start: f32,
        duration: f32,
        values: &[f32],
    ) {
        if values.is_empty() {
            tracing::warn!("empty envelope dropped");
            return;
        }
        let start = self.clock + self.samples(start);
        let duration = self.samples(duration);
        if let Some(lane) = self.lane_mut(node, param) {
            lane.push_event(AutomationEvent {
                start,
                kind: EventKind::Envelope {
                    duration,
                    values: values.to_vec(),
                },
            });
        }
    }

    /// Last resolved value of a parameter; does not advance automation.
    pub fn param_value(&self, node: NodeHandle, param: Param) -> f32 {
        let Some(node) = self.nodes.get(node.0) else {
            return 0.0;
        };
        match param {
            Param::Gain => node.gain.current,
            Param::Frequency => node.frequency.current,
            Param::Azimuth => node.azimuth.current,
            Param::Harmonics => node.harmonics.current,
        }
    }

    /// Renders interleaved stereo frames, advancing the sample clock.
    pub fn render(&mut self, interleaved: &mut [f32]) {
        let frames = interleaved.len() / 2;
        if self.scratch.len() != self.nodes.len() {
            self.scratch.resize(self.nodes.len(), 0.0);
        }
        let sample_rate = self.sample_rate as f64;

        for frame in 0..frames {
            let now = self.clock;

            // Source pass: oscillators and noise generators.
            for index in 0..self.nodes.len() {
                let node = &mut self.nodes[index];
                let sample = match &mut node.kind {
                    NodeKind::Oscillator { kind, phase } => {
                        let frequency = node.frequency.tick(now);
                        let gain = node.gain.tick(now);
                        *phase += frequency as f64 / sample_rate;
                        *phase -= phase.floor();
                        let wave = match kind {
                            OscillatorKind::Sine => (TAU * *phase as f32).sin(),
                            OscillatorKind::AdditiveSaw => {
                                let harmonics =
                                    node.harmonics.tick(now).round().max(1.0) as usize;
                                additive_saw(*phase as f32, harmonics)
                            }
                        };
                        wave * gain
                    }
                    NodeKind::Noise {
                        kind,
                        rng,
                        integrator,
                    } => {
                        let gain = node.gain.tick(now);
                        let white = rng.gen::<f32>() * 2.0 - 1.0;
                        let sample = match kind {
                            NoiseKind::White => white,
                            NoiseKind::Brown => {
                                *integrator = (*integrator + 0.02 * white) / 1.02;
                                *integrator * 3.5
                            }
                        };
                        sample * gain
                    }
                    NodeKind::Panner { .. } => 0.0,
                };
                self.scratch[index] = sample;
            }

            // Mix pass: panners and direct output routes.
            let mut left = 0.0;
            let mut right = 0.0;
            for index in 0..self.nodes.len() {
                let node = &mut self.nodes[index];
                match node.kind {
                    NodeKind::Panner { .. } => {
                        let mut mix = 0.0;
                        for &input in &node.inputs {
                            mix += self.scratch[input];
                        }
                        let gain = node.gain.tick(now);
                        let azimuth = node.azimuth.tick(now).clamp(-90.0, 90.0);
                        if node.to_output {
                            let angle =
                                (azimuth / 90.0 + 1.0) * std::f32::consts::FRAC_PI_4;
                            left += mix * gain * angle.cos();
                            right += mix * gain * angle.sin();
                        }
                    }
                    _ => {
                        if node.to_output {
                            let sample = self.scratch[index] * std::f32::consts::FRAC_1_SQRT_2;
                            left += sample;
                            right += sample;
                        }
                    }
                }
            }

            interleaved[frame * 2] = left;
            interleaved[frame * 2 + 1] = right;
            self.clock += 1;
        }
    }
}

/// Band-limited sawtooth from `harmonics` partials.
fn additive_saw(phase: f32, harmonics: usize) -> f32 {
    let mut sum = 0.0;
    for k in 1..=harmonics {
        sum += (TAU * k as f32 * phase).sin() / k as f32;
    }
    sum * std::f32::consts::FRAC_2_PI
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_frames(engine: &mut GraphEngine, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0; frames * 2];
        engine.render(&mut buffer);
        buffer
    }

    #[test]
    fn ramp_reaches_target_after_its_duration() {
        let mut engine = GraphEngine::new(1_000);
        let osc = engine.add_oscillator(OscillatorKind::Sine, 440.0);
        engine.set_param(osc, Param::Gain, 0.0);
        engine.ramp_param(osc, Param::Gain, 0.05, 0.8);

        render_frames(&mut engine, 25);
        let midway = engine.param_value(osc, Param::Gain);
        assert!(midway > 0.0 && midway < 0.8, "midway gain was {midway}");

        render_frames(&mut engine, 100);
        assert!((engine.param_value(osc, Param::Gain) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn envelope_waits_for_its_start_time() {
        let mut engine = GraphEngine::new(1_000);
        let osc = engine.add_oscillator(OscillatorKind::Sine, 440.0);
        engine.set_param(osc, Param::Gain, 0.0);
        engine.schedule_envelope(osc, Param::Gain, 0.1, 0.1, &[1.0, 1.0]);

        render_frames(&mut engine, 50);
        assert_eq!(engine.param_value(osc, Param::Gain), 0.0);

        render_frames(&mut engine, 100);
        assert!(engine.param_value(osc, Param::Gain) > 0.99);
    }

    #[test]
    fn scheduled_set_holds_until_due() {
        let mut engine = GraphEngine::new(1_000);
        let osc = engine.add_oscillator(OscillatorKind::Sine, 440.0);
        engine.set_param(osc, Param::Gain, 0.3);
        engine.schedule_set(osc, Param::Gain, 0.2, 0.0);

        render_frames(&mut engine, 100);
        assert!((engine.param_value(osc, Param::Gain) - 0.3).abs() < 1e-6);

        render_frames(&mut engine, 150);
        assert_eq!(engine.param_value(osc, Param::Gain), 0.0);
    }

    #[test]
    fn direct_set_cancels_scheduled_automation() {
        let mut engine = GraphEngine::new(1_000);
        let osc = engine.add_oscillator(OscillatorKind::Sine, 440.0);
        engine.schedule_envelope(osc, Param::Gain, 0.05, 0.1, &[1.0, 1.0]);
        engine.set_param(osc, Param::Gain, 0.2);

        render_frames(&mut engine, 400);
        assert!((engine.param_value(osc, Param::Gain) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn oscillator_routed_to_output_produces_signal() {
        let mut engine = GraphEngine::new(8_000);
        let osc = engine.add_oscillator(OscillatorKind::Sine, 500.0);
        engine.connect(osc, Destination::Output).unwrap();
        engine.set_param(osc, Param::Gain, 1.0);

        let buffer = render_frames(&mut engine, 64);
        let energy: f32 = buffer.iter().map(|s| s.abs()).sum();
        assert!(energy > 0.0);
    }

    #[test]
    fn panner_distributes_between_channels() {
        let mut engine = GraphEngine::new(8_000);
        let osc = engine.add_oscillator(OscillatorKind::Sine, 500.0);
        let panner = engine.add_panner(PanStrategy::Amplitude);
        engine.connect(osc, Destination::Node(panner)).unwrap();
        engine.connect(panner, Destination::Output).unwrap();
        engine.set_param(osc, Param::Gain, 1.0);
        engine.set_param(panner, Param::Gain, 1.0);
        engine.set_param(panner, Param::Azimuth, -90.0);

        let buffer = render_frames(&mut engine, 64);
        let left: f32 = buffer.iter().step_by(2).map(|s| s.abs()).sum();
        let right: f32 = buffer.iter().skip(1).step_by(2).map(|s| s.abs()).sum();
        assert!(left > 0.0);
        assert!(right < 1e-4, "hard-left pan leaked {right} into the right channel");
    }

    #[test]
    fn only_panners_accept_inputs() {
        let mut engine = GraphEngine::new(8_000);
        let a = engine.add_oscillator(OscillatorKind::Sine, 100.0);
        let b = engine.add_oscillator(OscillatorKind::Sine, 200.0);
        assert!(engine.connect(a, Destination::Node(b)).is_err());
    }

    #[test]
    fn interpolate_is_piecewise_linear() {
        let values = [0.0, 1.0, 0.0];
        assert_eq!(interpolate(&values, 0.0), 0.0);
        assert!((interpolate(&values, 0.25) - 0.5).abs() < 1e-6);
        assert_eq!(interpolate(&values, 0.5), 1.0);
        assert!((interpolate(&values, 0.75) - 0.5).abs() < 1e-6);
        assert_eq!(interpolate(&values, 1.0), 0.0);
    }
}
