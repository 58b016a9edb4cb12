//! Row-oscillator sonification ("pitch-stereo-grey").
//!
//! Every image row is bound to a persistent sine voice whose frequency is
//! log-spaced across the configured band (bottom row lowest). An incoming
//! grid is first mixed instantaneously: each voice's gain follows its row's
//! brightest pixel and its panner follows the row's horizontal brightness
//! distribution. After a configurable delay the same snapshot is replayed as
//! a left-to-right sweep, with the master panner tracking the sweep
//! position.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::{
    Destination, NodeHandle, OscillatorKind, PanStrategy, Param, SynthBackend,
};
use crate::config::SonifierConfig;
use crate::image::{PixelGrid, MAX_BRIGHTNESS};
use crate::scheduler::PlaybackScheduler;
use crate::timer::DelayTimer;
use crate::{Result, SonifierError};

use super::{check_dimensions, Sonifier, FADE_LENGTH, REFERENCE_LOUDNESS, SWEEP_GAP};

/// One persistent oscillator/panner pair bound to an image row.
#[derive(Debug, Clone, Copy)]
struct RowVoice {
    oscillator: NodeHandle,
    panner: NodeHandle,
}

/// Instantaneous mix parameters for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RowMix {
    /// Brightest pixel of the row, normalised to [0, 1].
    pub(crate) gain: f32,
    /// Degrees, -90 (all brightness on the left) to +90.
    pub(crate) azimuth: f32,
}

/// Computes per-row mix parameters and the summed row volume for a grid.
pub(crate) fn mix_rows(grid: &PixelGrid, reverse: bool) -> (Vec<RowMix>, f32) {
    let width = grid.width() as f32;
    let mut rows = Vec::with_capacity(grid.height());
    let mut total = 0.0;
    for y in 0..grid.height() {
        let mut left = 0.0;
        let mut right = 0.0;
        let mut brightest: f32 = 0.0;
        for x in 0..grid.width() {
            let right_ratio = x as f32 / width;
            let left_ratio = 1.0 - right_ratio;
            let mut px = grid.pixel(x, y).brightness();
            if reverse {
                px = MAX_BRIGHTNESS - px;
            }
            brightest = brightest.max(px);
            left += px * left_ratio;
            right += px * right_ratio;
        }
        let azimuth = if left > 0.0 || right > 0.0 {
            ((right - left) / left.max(right)) * 90.0
        } else {
            0.0
        };
        let gain = brightest / MAX_BRIGHTNESS;
        total += gain;
        rows.push(RowMix { gain, azimuth });
    }
    (rows, total)
}

/// Gain applied on top of the summed voices so overall loudness never
/// exceeds the reference ceiling, regardless of image size.
pub(crate) fn loudness_ratio(total: f32) -> f32 {
    if total <= 1.0 {
        REFERENCE_LOUDNESS
    } else {
        REFERENCE_LOUDNESS / total
    }
}

/// Envelope segments for one detailed playback pass, copied out of a grid
/// snapshot so the grid itself does not have to outlive the call that
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SweepSchedule {
    /// Per-voice volume-over-x envelopes; index 0 is the bottom image row.
    /// Each envelope carries one extra zero sample at both ends.
    row_envelopes: Vec<Vec<f32>>,
    /// Master gain envelope: per-column total volume, ceiling-normalised.
    master_gains: Vec<f32>,
    duration: f32,
    count: usize,
}

impl SweepSchedule {
    pub(crate) fn from_grid(
        grid: &PixelGrid,
        reverse: bool,
        duration: f32,
        count: usize,
    ) -> Self {
        let height = grid.height();
        let mut row_envelopes = vec![Vec::new(); height];
        let mut column_totals = vec![0.0f32; grid.width()];
        for y in 0..height {
            let mut envelope = Vec::with_capacity(grid.width() + 2);
            envelope.push(0.0);
            for x in 0..grid.width() {
                let mut px = grid.pixel(x, y).brightness();
                if reverse {
                    px = MAX_BRIGHTNESS - px;
                }
                let volume = px / MAX_BRIGHTNESS;
                column_totals[x] += volume;
                envelope.push(volume);
            }
            envelope.push(0.0);
            row_envelopes[height - 1 - y] = envelope;
        }
        let master_gains = column_totals.into_iter().map(loudness_ratio).collect();
        Self {
            row_envelopes,
            master_gains,
            duration,
            count,
        }
    }

    #[cfg(test)]
    pub(crate) fn master_gains(&self) -> &[f32] {
        &self.master_gains
    }

    #[cfg(test)]
    pub(crate) fn row_envelopes(&self) -> &[Vec<f32>] {
        &self.row_envelopes
    }
}

/// One-degree steps from hard left to hard right.
fn azimuth_sweep_values() -> Vec<f32> {
    (-90..=90).map(|degrees| degrees as f32).collect()
}

/// Node arena and playback state shared with the delayed-sweep callback.
struct VoiceBank<B: SynthBackend> {
    backend: B,
    master: NodeHandle,
    voices: Vec<RowVoice>,
    pending_sweep: Option<SweepSchedule>,
    /// Bumped on every image change; a delayed callback whose epoch no
    /// longer matches arrived late and must not play.
    sweep_epoch: u64,
}

impl<B: SynthBackend> VoiceBank<B> {
    fn issue_whole_image(&mut self, rows: &[RowMix], total: f32) -> Result<()> {
        let height = self.voices.len();
        let mut batch = self.backend.batch();
        batch.ramp_param(self.master, Param::Azimuth, FADE_LENGTH, 0.0)?;
        batch.ramp_param(self.master, Param::Gain, FADE_LENGTH, 0.0)?;
        for (y, row) in rows.iter().enumerate() {
            let voice = self.voices[height - 1 - y];
            batch.ramp_param(voice.oscillator, Param::Gain, FADE_LENGTH, row.gain)?;
            batch.ramp_param(voice.panner, Param::Azimuth, FADE_LENGTH, row.azimuth)?;
        }
        let ratio = loudness_ratio(total);
        for voice in &self.voices {
            batch.ramp_param(voice.panner, Param::Gain, FADE_LENGTH, ratio)?;
        }
        Ok(())
    }

    fn issue_sweep(&mut self, schedule: &SweepSchedule) -> Result<()> {
        let mut batch = self.backend.batch();
        for (index, envelope) in schedule.row_envelopes.iter().enumerate() {
            let voice = self.voices[index];
            // Reset to silence before scheduling so no stale mix bleeds
            // into the sweep.
            batch.set_param(voice.panner, Param::Gain, 0.0)?;
            batch.set_param(voice.oscillator, Param::Gain, 0.0)?;
            let mut offset = 0.0;
            for _ in 0..schedule.count {
                batch.schedule_set(voice.oscillator, Param::Gain, offset, 0.0)?;
                offset += SWEEP_GAP;
                batch.schedule_envelope(
                    voice.oscillator,
                    Param::Gain,
                    offset,
                    schedule.duration,
                    envelope,
                )?;
                offset += schedule.duration;
            }
        }

        let azimuth_sweep = azimuth_sweep_values();
        batch.set_param(self.master, Param::Azimuth, -90.0)?;
        batch.set_param(self.master, Param::Gain, 0.0)?;
        let mut offset = 0.0;
        for _ in 0..schedule.count {
            batch.schedule_set(self.master, Param::Azimuth, offset, -90.0)?;
            batch.schedule_set(self.master, Param::Gain, offset, 0.0)?;
            offset += SWEEP_GAP;
            batch.schedule_envelope(
                self.master,
                Param::Azimuth,
                offset,
                schedule.duration,
                &azimuth_sweep,
            )?;
            batch.schedule_envelope(
                self.master,
                Param::Gain,
                offset,
                schedule.duration,
                &schedule.master_gains,
            )?;
            offset += schedule.duration;
        }
        Ok(())
    }

    fn issue_stop(&mut self) -> Result<()> {
        let mut batch = self.backend.batch();
        batch.ramp_param(self.master, Param::Azimuth, FADE_LENGTH, 0.0)?;
        for voice in &self.voices {
            batch.ramp_param(voice.oscillator, Param::Gain, FADE_LENGTH, 0.0)?;
        }
        Ok(())
    }
}

/// Row-oscillator sonifier; see the module documentation.
pub struct PitchStereoSonifier<B: SynthBackend + Send + 'static> {
    bank: Arc<Mutex<VoiceBank<B>>>,
    scheduler: PlaybackScheduler,
    width: usize,
    height: usize,
    sweep_delay: Duration,
    sweep_duration: f32,
    sweep_count: usize,
    reverse_brightness: bool,
}

impl<B: SynthBackend + Send + 'static> std::fmt::Debug for PitchStereoSonifier<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchStereoSonifier")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sweep_delay", &self.sweep_delay)
            .field("sweep_duration", &self.sweep_duration)
            .field("sweep_count", &self.sweep_count)
            .field("reverse_brightness", &self.reverse_brightness)
            .finish_non_exhaustive()
    }
}

impl<B: SynthBackend + Send + 'static> PitchStereoSonifier<B> {
    /// Builds the voice bank and opens the output device. Construction
    /// fails before any node is created when the configured grid is
    /// zero-sized, and propagates device-open failures.
    pub fn new(mut backend: B, timer: Box<dyn DelayTimer>, config: &SonifierConfig) -> Result<Self> {
        config.validate()?;
        let width = config.columns;
        let height = config.rows;

        let master = backend.create_panner(PanStrategy::Hrtf)?;
        backend.set_param(master, Param::Gain, 0.0)?;
        backend.connect(master, 0, Destination::Output, 0)?;

        let octaves = (config.high_freq / config.low_freq).log2();
        let mut voices = Vec::with_capacity(height);
        for row in 0..height {
            let panner = backend.create_panner(PanStrategy::Amplitude)?;
            backend.set_param(panner, Param::Gain, 0.0)?;
            backend.connect(panner, 0, Destination::Output, 0)?;

            let frequency =
                config.low_freq * 2f32.powf(octaves * row as f32 / height as f32);
            let oscillator = backend.create_oscillator(OscillatorKind::Sine, frequency)?;
            backend.set_param(oscillator, Param::Gain, 0.0)?;
            backend.connect(oscillator, 0, Destination::Node(panner), 0)?;
            backend.connect(oscillator, 0, Destination::Node(master), 0)?;

            voices.push(RowVoice { oscillator, panner });
        }

        backend.open_output_device(&config.device)?;
        tracing::debug!(width, height, "row-voice bank ready");

        Ok(Self {
            bank: Arc::new(Mutex::new(VoiceBank {
                backend,
                master,
                voices,
                pending_sweep: None,
                sweep_epoch: 0,
            })),
            scheduler: PlaybackScheduler::new(timer),
            width,
            height,
            sweep_delay: Duration::from_secs_f32(config.sweep.delay_secs.max(0.0)),
            sweep_duration: config.sweep.duration_secs,
            sweep_count: config.sweep.count,
            reverse_brightness: config.sweep.reverse_brightness,
        })
    }

    fn lock_bank(&self) -> Result<MutexGuard<'_, VoiceBank<B>>> {
        self.bank
            .lock()
            .map_err(|_| SonifierError::msg("sonifier state has been poisoned"))
    }

    /// See [`Sonifier::set_new_image`].
    pub fn set_new_image(&mut self, grid: Option<&PixelGrid>, detailed: bool) -> Result<()> {
        self.scheduler.cancel_pending();

        let Some(grid) = grid else {
            let mut bank = self.lock_bank()?;
            bank.pending_sweep = None;
            bank.sweep_epoch += 1;
            return bank.issue_stop();
        };
        check_dimensions(self.width, self.height, grid)?;

        let schedule = SweepSchedule::from_grid(
            grid,
            self.reverse_brightness,
            self.sweep_duration,
            self.sweep_count,
        );

        if detailed {
            let mut bank = self.lock_bank()?;
            bank.pending_sweep = None;
            bank.sweep_epoch += 1;
            return bank.issue_sweep(&schedule);
        }

        let (rows, total) = mix_rows(grid, self.reverse_brightness);
        let epoch = {
            let mut bank = self.lock_bank()?;
            bank.issue_whole_image(&rows, total)?;
            bank.sweep_epoch += 1;
            bank.pending_sweep = Some(schedule);
            bank.sweep_epoch
        };

        let bank = Arc::clone(&self.bank);
        self.scheduler.schedule_once(
            self.sweep_delay,
            Box::new(move || {
                let Ok(mut bank) = bank.lock() else {
                    return;
                };
                if bank.sweep_epoch != epoch {
                    return;
                }
                if let Some(schedule) = bank.pending_sweep.take() {
                    if let Err(err) = bank.issue_sweep(&schedule) {
                        tracing::warn!("delayed sweep failed: {err}");
                    }
                }
            }),
        );
        Ok(())
    }

    /// See [`Sonifier::terminate`].
    pub fn terminate(&mut self) -> Result<()> {
        self.scheduler.cancel_pending();
        let mut bank = self.lock_bank()?;
        bank.pending_sweep = None;
        bank.sweep_epoch += 1;
        bank.issue_stop()?;
        bank.backend.close_output_device();
        Ok(())
    }
}

impl<B: SynthBackend + Send + 'static> Sonifier for PitchStereoSonifier<B> {
    fn set_new_image(&mut self, grid: Option<&PixelGrid>, detailed: bool) -> Result<()> {
        PitchStereoSonifier::set_new_image(self, grid, detailed)
    }

    fn terminate(&mut self) -> Result<()> {
        PitchStereoSonifier::terminate(self)
    }
}

impl<B: SynthBackend + Send + 'static> Drop for PitchStereoSonifier<B> {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}
