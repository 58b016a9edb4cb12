//! Synthesis backend boundary.
//!
//! The sonifiers drive audio through the [`SynthBackend`] trait: node
//! creation, immediate and ramped parameter changes, sample-scheduled
//! envelopes, and output-device lifecycle. Parameter mutations issued inside
//! a [`BatchScope`] are queued and applied atomically at the next
//! render-block boundary, so the render thread never observes a half-updated
//! node graph.
//!
//! [`SoftwareBackend`] is the shipped implementation: a software node graph
//! ([`graph::GraphEngine`]) rendered on a cpal stream owned by the device
//! module.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Result, SonifierError};

#[cfg(test)]
pub(crate) mod capture;
pub(crate) mod device;
pub mod graph;

pub use device::DEFAULT_DEVICE;
use graph::GraphEngine;

/// Opaque identifier of a node owned by a backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub(crate) usize);

impl NodeHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Waveform family of an oscillator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscillatorKind {
    Sine,
    /// Band-limited sawtooth built from a run-time controllable number of
    /// harmonics (see [`Param::Harmonics`]).
    AdditiveSaw,
}

/// Spectral colour of a noise node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseKind {
    White,
    Brown,
}

/// Spatialisation strategy of a panner node.
///
/// The software renderer treats both strategies as constant-power amplitude
/// panning; the distinction is preserved at the trait boundary for backends
/// with a real HRTF path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanStrategy {
    Amplitude,
    Hrtf,
}

/// Mutable parameter of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Output amplitude multiplier, [0, 1] in normal use.
    Gain,
    /// Oscillator frequency in Hz.
    Frequency,
    /// Panner azimuth in degrees, -90 (hard left) to +90 (hard right).
    Azimuth,
    /// Harmonic count of an additive sawtooth, rounded and clamped to >= 1.
    Harmonics,
}

/// Where a node's output is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Node(NodeHandle),
    /// The backend's stereo output bus.
    Output,
}

/// Contract between the sonifiers and the audio graph.
pub trait SynthBackend {
    fn create_oscillator(&mut self, kind: OscillatorKind, frequency: f32) -> Result<NodeHandle>;
    fn create_panner(&mut self, strategy: PanStrategy) -> Result<NodeHandle>;
    fn create_noise(&mut self, kind: NoiseKind) -> Result<NodeHandle>;

    /// Routes `src`'s output to a panner input or the output bus. The
    /// software graph is single-channel per node, so the index arguments
    /// exist only for backends with multi-channel nodes.
    fn connect(
        &mut self,
        src: NodeHandle,
        output_index: usize,
        dst: Destination,
        input_index: usize,
    ) -> Result<()>;

    /// Sets a parameter now, cancelling any ramp or scheduled automation on
    /// that parameter.
    fn set_param(&mut self, node: NodeHandle, param: Param, value: f32) -> Result<()>;

    /// Linearly interpolates a parameter from its current value to `target`
    /// over `duration` seconds, starting now.
    fn ramp_param(
        &mut self,
        node: NodeHandle,
        param: Param,
        duration: f32,
        target: f32,
    ) -> Result<()>;

    /// Sets a parameter to `value` exactly `at` seconds in the future,
    /// leaving other scheduled automation untouched.
    fn schedule_set(&mut self, node: NodeHandle, param: Param, at: f32, value: f32) -> Result<()>;

    /// Plays `values` as a piecewise-linear curve over `duration` seconds
    /// beginning `start` seconds in the future, sample-accurate. An empty
    /// value list is rejected with [`SonifierError::InvalidEnvelope`] and
    /// nothing is applied.
    fn schedule_envelope(
        &mut self,
        node: NodeHandle,
        param: Param,
        start: f32,
        duration: f32,
        values: &[f32],
    ) -> Result<()>;

    fn begin_batch(&mut self);
    fn commit_batch(&mut self);

    fn open_output_device(&mut self, name: &str) -> Result<()>;
    /// Idempotent; closing a device that is not open is a no-op.
    fn close_output_device(&mut self);

    /// Enters a batch scope that commits on every exit path, including early
    /// returns through `?`.
    fn batch(&mut self) -> BatchScope<'_, Self>
    where
        Self: Sized,
    {
        self.begin_batch();
        BatchScope { backend: self }
    }
}

/// RAII guard around a backend batch. Dereferences to the backend so
/// parameter calls can be issued through it; the batch is committed when the
/// guard drops.
pub struct BatchScope<'a, B: SynthBackend> {
    backend: &'a mut B,
}

impl<B: SynthBackend> Deref for BatchScope<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        self.backend
    }
}

impl<B: SynthBackend> DerefMut for BatchScope<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        self.backend
    }
}

impl<B: SynthBackend> Drop for BatchScope<'_, B> {
    fn drop(&mut self) {
        self.backend.commit_batch();
    }
}

/// Parameter change queued inside a batch scope.
#[derive(Debug, Clone)]
enum QueuedChange {
    Set {
        node: NodeHandle,
        param: Param,
        value: f32,
    },
    Ramp {
        node: NodeHandle,
        param: Param,
        duration: f32,
        target: f32,
    },
    ScheduledSet {
        node: NodeHandle,
        param: Param,
        at: f32,
        value: f32,
    },
    Envelope {
        node: NodeHandle,
        param: Param,
        start: f32,
        duration: f32,
        values: Vec<f32>,
    },
}

/// Software implementation of [`SynthBackend`].
///
/// Node topology changes go straight to the shared [`GraphEngine`];
/// parameter mutations respect the batch contract. The engine mutex is the
/// atomicity boundary: the render callback locks it per block, so changes
/// applied under one lock acquisition land on one block edge.
pub struct SoftwareBackend {
    engine: Arc<Mutex<GraphEngine>>,
    output: Option<device::OutputDevice>,
    node_count: usize,
    batch_depth: usize,
    queued: Vec<QueuedChange>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::with_sample_rate(48_000)
    }

    /// The sample rate is provisional; opening the output device adopts the
    /// device's native rate before any audio is rendered.
    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            engine: Arc::new(Mutex::new(GraphEngine::new(sample_rate))),
            output: None,
            node_count: 0,
            batch_depth: 0,
            queued: Vec::new(),
        }
    }

    /// Shared handle to the underlying graph, used by the output device and
    /// by offline rendering.
    pub fn engine(&self) -> Arc<Mutex<GraphEngine>> {
        Arc::clone(&self.engine)
    }

    fn lock_engine(&self) -> Result<MutexGuard<'_, GraphEngine>> {
        self.engine
            .lock()
            .map_err(|_| SonifierError::msg("synthesis graph has been poisoned"))
    }

    fn check_node(&self, node: NodeHandle) -> Result<()> {
        if node.0 < self.node_count {
            Ok(())
        } else {
            Err(SonifierError::UnknownNode(node.0))
        }
    }

    fn apply(engine: &mut GraphEngine, change: QueuedChange) {
        match change {
            QueuedChange::Set { node, param, value } => engine.set_param(node, param, value),
            QueuedChange::Ramp {
                node,
                param,
                duration,
                target,
            } => engine.ramp_param(node, param, duration, target),
            QueuedChange::ScheduledSet {
                node,
                param,
                at,
                value,
            } => engine.schedule_set(node, param, at, value),
            QueuedChange::Envelope {
                node,
                param,
                start,
                duration,
                values,
            } => engine.schedule_envelope(node, param, start, duration, &values),
        }
    }

    fn submit(&mut self, change: QueuedChange) -> Result<()> {
        if self.batch_depth > 0 {
            self.queued.push(change);
            return Ok(());
        }
        let mut engine = self.lock_engine()?;
        Self::apply(&mut engine, change);
        Ok(())
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthBackend for SoftwareBackend {
    fn create_oscillator(&mut self, kind: OscillatorKind, frequency: f32) -> Result<NodeHandle> {
        let handle = self.lock_engine()?.add_oscillator(kind, frequency);
        self.node_count += 1;
        Ok(handle)
    }

    fn create_panner(&mut self, strategy: PanStrategy) -> Result<NodeHandle> {
        let handle = self.lock_engine()?.add_panner(strategy);
        self.node_count += 1;
        Ok(handle)
    }

    fn create_noise(&mut self, kind: NoiseKind) -> Result<NodeHandle> {
        let handle = self.lock_engine()?.add_noise(kind);
        self.node_count += 1;
        Ok(handle)
    }

    fn connect(
        &mut self,
        src: NodeHandle,
        _output_index: usize,
        dst: Destination,
        _input_index: usize,
    ) -> Result<()> {
        self.check_node(src)?;
        if let Destination::Node(dst) = dst {
            self.check_node(dst)?;
        }
        self.lock_engine()?.connect(src, dst)
    }

    fn set_param(&mut self, node: NodeHandle, param: Param, value: f32) -> Result<()> {
        self.check_node(node)?;
        self.submit(QueuedChange::Set { node, param, value })
    }

    fn ramp_param(
        &mut self,
        node: NodeHandle,
        param: Param,
        duration: f32,
        target: f32,
    ) -> Result<()> {
        self.check_node(node)?;
        self.submit(QueuedChange::Ramp {
            node,
            param,
            duration,
            target,
        })
    }

    fn schedule_set(&mut self, node: NodeHandle, param: Param, at: f32, value: f32) -> Result<()> {
        self.check_node(node)?;
        self.submit(QueuedChange::ScheduledSet {
            node,
            param,
            at,
            value,
        })
    }

    fn schedule_envelope(
        &mut self,
        node: NodeHandle,
        param: Param,
        start: f32,
        duration: f32,
        values: &[f32],
    ) -> Result<()> {
        self.check_node(node)?;
        if values.is_empty() {
            return Err(SonifierError::InvalidEnvelope(
                "envelope requires at least one value",
            ));
        }
        self.submit(QueuedChange::Envelope {
            node,
            param,
            start,
            duration,
            values: values.to_vec(),
        })
    }

    fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    fn commit_batch(&mut self) {
        if self.batch_depth == 0 {
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return;
        }
        let changes = std::mem::take(&mut self.queued);
        match self.lock_engine() {
            Ok(mut engine) => {
                for change in changes {
                    Self::apply(&mut engine, change);
                }
            }
            Err(_) => {
                // Discarding is the only safe option once the graph lock is
                // poisoned; the render thread keeps the previous state.
                tracing::warn!("discarding batched parameter changes: graph poisoned");
            }
        }
    }

    fn open_output_device(&mut self, name: &str) -> Result<()> {
        if self.output.is_some() {
            return Ok(());
        }
        let output = device::OutputDevice::open(name, Arc::clone(&self.engine))?;
        tracing::info!(device = name, sample_rate = output.sample_rate(), "output device open");
        self.output = Some(output);
        Ok(())
    }

    fn close_output_device(&mut self) {
        if let Some(output) = self.output.take() {
            output.close();
            tracing::info!("output device closed");
        }
    }
}
