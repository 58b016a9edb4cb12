//! Call-capturing backend used by unit tests.

use std::sync::{Arc, Mutex};

use crate::{Result, SonifierError};

use super::{Destination, NodeHandle, NoiseKind, OscillatorKind, PanStrategy, Param, SynthBackend};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BackendCall {
    CreateOscillator {
        kind: OscillatorKind,
        frequency: f32,
    },
    CreatePanner {
        strategy: PanStrategy,
    },
    CreateNoise {
        kind: NoiseKind,
    },
    Connect {
        src: NodeHandle,
        dst: Destination,
    },
    SetParam {
        node: NodeHandle,
        param: Param,
        value: f32,
    },
    RampParam {
        node: NodeHandle,
        param: Param,
        duration: f32,
        target: f32,
    },
    ScheduleSet {
        node: NodeHandle,
        param: Param,
        at: f32,
        value: f32,
    },
    ScheduleEnvelope {
        node: NodeHandle,
        param: Param,
        start: f32,
        duration: f32,
        values: Vec<f32>,
    },
    BeginBatch,
    CommitBatch,
    OpenDevice(String),
    CloseDevice,
}

/// Shared view over the calls a [`CaptureBackend`] has recorded.
#[derive(Clone, Default)]
pub(crate) struct CaptureLog(Arc<Mutex<Vec<BackendCall>>>);

impl CaptureLog {
    pub(crate) fn calls(&self) -> Vec<BackendCall> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn push(&self, call: BackendCall) {
        self.0.lock().unwrap().push(call);
    }

    pub(crate) fn created_nodes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    BackendCall::CreateOscillator { .. }
                        | BackendCall::CreatePanner { .. }
                        | BackendCall::CreateNoise { .. }
                )
            })
            .count()
    }

    /// Target of the most recent ramp on a parameter, if any.
    pub(crate) fn last_ramp_target(&self, node: NodeHandle, param: Param) -> Option<f32> {
        self.calls().iter().rev().find_map(|call| match call {
            BackendCall::RampParam {
                node: n,
                param: p,
                target,
                ..
            } if *n == node && *p == param => Some(*target),
            _ => None,
        })
    }

    /// Most recent immediate set on a parameter, if any.
    pub(crate) fn last_set(&self, node: NodeHandle, param: Param) -> Option<f32> {
        self.calls().iter().rev().find_map(|call| match call {
            BackendCall::SetParam {
                node: n,
                param: p,
                value,
            } if *n == node && *p == param => Some(*value),
            _ => None,
        })
    }

    pub(crate) fn envelopes_for(&self, node: NodeHandle, param: Param) -> Vec<Vec<f32>> {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                BackendCall::ScheduleEnvelope {
                    node: n,
                    param: p,
                    values,
                    ..
                } if *n == node && *p == param => Some(values.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn device_open(&self) -> bool {
        self.calls().iter().fold(false, |open, call| match call {
            BackendCall::OpenDevice(_) => true,
            BackendCall::CloseDevice => false,
            _ => open,
        })
    }
}

/// Backend that records every call and never makes sound.
pub(crate) struct CaptureBackend {
    log: CaptureLog,
    next_node: usize,
    fail_device: bool,
}

impl CaptureBackend {
    pub(crate) fn new() -> (Self, CaptureLog) {
        let log = CaptureLog::default();
        (
            Self {
                log: log.clone(),
                next_node: 0,
                fail_device: false,
            },
            log,
        )
    }

    /// Variant whose device open always fails, for construction-failure
    /// tests.
    pub(crate) fn failing_device() -> (Self, CaptureLog) {
        let (mut backend, log) = Self::new();
        backend.fail_device = true;
        (backend, log)
    }

    fn create(&mut self, call: BackendCall) -> NodeHandle {
        self.log.push(call);
        let handle = NodeHandle(self.next_node);
        self.next_node += 1;
        handle
    }
}

impl SynthBackend for CaptureBackend {
    fn create_oscillator(&mut self, kind: OscillatorKind, frequency: f32) -> Result<NodeHandle> {
        Ok(self.create(BackendCall::CreateOscillator { kind, frequency }))
    }

    fn create_panner(&mut self, strategy: PanStrategy) -> Result<NodeHandle> {
        Ok(self.create(BackendCall::CreatePanner { strategy }))
    }

    fn create_noise(&mut self, kind: NoiseKind) -> Result<NodeHandle> {
        Ok(self.create(BackendCall::CreateNoise { kind }))
    }

    fn connect(
        &mut self,
        src: NodeHandle,
        _output_index: usize,
        dst: Destination,
        _input_index: usize,
    ) -> Result<()> {
        self.log.push(BackendCall::Connect { src, dst });
        Ok(())
    }

    fn set_param(&mut self, node: NodeHandle, param: Param, value: f32) -> Result<()> {
        self.log.push(BackendCall::SetParam { node, param, value });
        Ok(())
    }

    fn ramp_param(
        &mut self,
        node: NodeHandle,
        param: Param,
        duration: f32,
        target: f32,
    ) -> Result<()> {
        self.log.push(BackendCall::RampParam {
            node,
            param,
            duration,
            target,
        });
        Ok(())
    }

    fn schedule_set(&mut self, node: NodeHandle, param: Param, at: f32, value: f32) -> Result<()> {
        self.log.push(BackendCall::ScheduleSet {
            node,
            param,
            at,
            value,
        });
        Ok(())
    }

    fn schedule_envelope(
        &mut self,
        node: NodeHandle,
        param: Param,
        start: f32,
        duration: f32,
        values: &[f32],
    ) -> Result<()> {
        if values.is_empty() {
            return Err(SonifierError::InvalidEnvelope(
                "envelope requires at least one value",
            ));
        }
        self.log.push(BackendCall::ScheduleEnvelope {
            node,
            param,
            start,
            duration,
            values: values.to_vec(),
        });
        Ok(())
    }

    fn begin_batch(&mut self) {
        self.log.push(BackendCall::BeginBatch);
    }

    fn commit_batch(&mut self) {
        self.log.push(BackendCall::CommitBatch);
    }

    fn open_output_device(&mut self, name: &str) -> Result<()> {
        if self.fail_device {
            return Err(SonifierError::DeviceUnavailable(
                "capture backend configured to fail".into(),
            ));
        }
        self.log.push(BackendCall::OpenDevice(name.to_string()));
        Ok(())
    }

    fn close_output_device(&mut self) {
        self.log.push(BackendCall::CloseDevice);
    }
}
