//! Global colour-to-timbre sonification.
//!
//! The whole grid is averaged to a single colour whose HSV components drive
//! a continuously-updating ambient mix: hue selects between a sawtooth
//! voice (swept in pitch and harmonic richness) and a high sine, saturation
//! gates the pitched voices against a noise floor, and value scales
//! everything. Updates are immediate rather than ramped; this mode tracks a
//! continuously-changing capture, not discrete events.

use crate::backend::{
    Destination, NodeHandle, NoiseKind, OscillatorKind, Param, SynthBackend,
};
use crate::config::SonifierConfig;
use crate::image::{rgb_to_hsv, PixelGrid};
use crate::Result;

use super::{check_dimensions, Sonifier};

/// Parameter set derived from one averaged colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct HsvMix {
    pub(crate) saw_gain: f32,
    pub(crate) saw_frequency: f32,
    pub(crate) saw_harmonics: f32,
    pub(crate) sine_gain: f32,
    pub(crate) noise_gain: f32,
}

/// Maps an averaged colour (channels in [0, 255]) to the ambient mix.
pub(crate) fn mix_from_rgb(r: f32, g: f32, b: f32, low_freq: f32, high_freq: f32) -> HsvMix {
    let (h, s, v) = rgb_to_hsv(r / 255.0, g / 255.0, b / 255.0);
    // Compress low saturation toward silence, expand high saturation.
    let s = 1.0 - 10f32.powf(1.0 - s) / 10.0;
    let inverted_hue = 1.0 - h;
    // How far past blue toward red the inverted hue sits; drives the
    // exponential pitch sweep of the saw voice and attenuates it.
    let pitch_zone = ((inverted_hue - 0.333) / 0.666).clamp(0.0, 1.0);
    // Crossfade out of the sine voice and into the saw voice.
    let saw_blend = (inverted_hue / 0.333).clamp(0.0, 1.0);

    HsvMix {
        saw_gain: v * s * saw_blend * 0.75 / (1.0 + pitch_zone * 10.0),
        saw_frequency: low_freq * (high_freq / low_freq).powf(2f32.powf(pitch_zone) - 1.0),
        saw_harmonics: (1.0 + ((1.0 - (pitch_zone - 0.5).abs()) * 2.0 - 1.0) * 20.0)
            .round()
            .max(1.0),
        sine_gain: v * s * (1.0 - saw_blend) * 0.075,
        noise_gain: (1.0 - s) * v * 0.4,
    }
}

/// Global HSV sonifier; see the module documentation.
pub struct HsvSonifier<B: SynthBackend> {
    backend: B,
    width: usize,
    height: usize,
    low_freq: f32,
    high_freq: f32,
    saw: NodeHandle,
    sine: NodeHandle,
    noise: NodeHandle,
}

impl<B: SynthBackend> std::fmt::Debug for HsvSonifier<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HsvSonifier")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("low_freq", &self.low_freq)
            .field("high_freq", &self.high_freq)
            .field("saw", &self.saw)
            .field("sine", &self.sine)
            .field("noise", &self.noise)
            .finish_non_exhaustive()
    }
}

impl<B: SynthBackend> HsvSonifier<B> {
    /// Creates the three persistent voices and opens the output device.
    pub fn new(mut backend: B, config: &SonifierConfig) -> Result<Self> {
        config.validate()?;

        let saw = backend.create_oscillator(OscillatorKind::AdditiveSaw, config.low_freq)?;
        backend.set_param(saw, Param::Gain, 0.0)?;
        backend.connect(saw, 0, Destination::Output, 0)?;

        let sine = backend.create_oscillator(OscillatorKind::Sine, config.high_freq)?;
        backend.set_param(sine, Param::Gain, 0.0)?;
        backend.connect(sine, 0, Destination::Output, 0)?;

        let noise = backend.create_noise(NoiseKind::Brown)?;
        backend.set_param(noise, Param::Gain, 0.0)?;
        backend.connect(noise, 0, Destination::Output, 0)?;

        backend.open_output_device(&config.device)?;
        tracing::debug!(
            low_freq = config.low_freq,
            high_freq = config.high_freq,
            "ambient voices ready"
        );

        Ok(Self {
            backend,
            width: config.columns,
            height: config.rows,
            low_freq: config.low_freq,
            high_freq: config.high_freq,
            saw,
            sine,
            noise,
        })
    }

    /// See [`Sonifier::set_new_image`]. `detailed` has no effect for this
    /// strategy.
    pub fn set_new_image(&mut self, grid: Option<&PixelGrid>, _detailed: bool) -> Result<()> {
        if let Some(grid) = grid {
            check_dimensions(self.width, self.height, grid)?;
        }
        let (r, g, b) = grid.map(PixelGrid::average_rgb).unwrap_or((0.0, 0.0, 0.0));
        let mix = mix_from_rgb(r, g, b, self.low_freq, self.high_freq);

        let mut batch = self.backend.batch();
        batch.set_param(self.saw, Param::Gain, mix.saw_gain)?;
        batch.set_param(self.saw, Param::Frequency, mix.saw_frequency)?;
        batch.set_param(self.saw, Param::Harmonics, mix.saw_harmonics)?;
        batch.set_param(self.sine, Param::Gain, mix.sine_gain)?;
        batch.set_param(self.noise, Param::Gain, mix.noise_gain)?;
        Ok(())
    }

    /// See [`Sonifier::terminate`].
    pub fn terminate(&mut self) -> Result<()> {
        {
            let mut batch = self.backend.batch();
            batch.set_param(self.saw, Param::Gain, 0.0)?;
            batch.set_param(self.sine, Param::Gain, 0.0)?;
            batch.set_param(self.noise, Param::Gain, 0.0)?;
        }
        self.backend.close_output_device();
        Ok(())
    }
}

impl<B: SynthBackend> Sonifier for HsvSonifier<B> {
    fn set_new_image(&mut self, grid: Option<&PixelGrid>, detailed: bool) -> Result<()> {
        HsvSonifier::set_new_image(self, grid, detailed)
    }

    fn terminate(&mut self) -> Result<()> {
        HsvSonifier::terminate(self)
    }
}

impl<B: SynthBackend> Drop for HsvSonifier<B> {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::capture::{CaptureBackend, CaptureLog};
    use crate::image::Rgb;
    use crate::SonifierError;

    const LOW: f32 = 90.0;
    const HIGH: f32 = 4000.0;

    fn ambient_config(columns: usize, rows: usize) -> SonifierConfig {
        SonifierConfig {
            columns,
            rows,
            ..SonifierConfig::ambient_defaults()
        }
    }

    fn build(columns: usize, rows: usize) -> (HsvSonifier<CaptureBackend>, CaptureLog) {
        let (backend, log) = CaptureBackend::new();
        let sonifier = HsvSonifier::new(backend, &ambient_config(columns, rows)).unwrap();
        (sonifier, log)
    }

    #[test]
    fn construction_creates_three_voices() {
        let (_sonifier, log) = build(2, 2);
        assert_eq!(log.created_nodes(), 3);
        assert!(log.device_open());
    }

    #[test]
    fn zero_dimensions_fail_before_any_node_exists() {
        let (backend, log) = CaptureBackend::new();
        let err = HsvSonifier::new(backend, &ambient_config(2, 0)).unwrap_err();
        assert!(matches!(err, SonifierError::InvalidDimensions { .. }));
        assert_eq!(log.created_nodes(), 0);
    }

    #[test]
    fn black_image_is_silent() {
        let mix = mix_from_rgb(0.0, 0.0, 0.0, LOW, HIGH);
        assert_eq!(mix.saw_gain, 0.0);
        assert_eq!(mix.sine_gain, 0.0);
        assert_eq!(mix.noise_gain, 0.0);
    }

    #[test]
    fn pure_red_suppresses_the_pitched_saw() {
        let mix = mix_from_rgb(255.0, 0.0, 0.0, LOW, HIGH);
        // Hue 0 inverts to 1: the saw sits at the top of its sweep, divided
        // down by the full attenuation factor.
        assert!((mix.saw_frequency - HIGH).abs() < 0.5);
        assert!(mix.saw_gain < 0.07, "saw gain was {}", mix.saw_gain);
        assert_eq!(mix.sine_gain, 0.0);
        assert!((mix.noise_gain - 0.04).abs() < 1e-3);
        assert_eq!(mix.saw_harmonics, 1.0);
    }

    #[test]
    fn pure_blue_plays_the_saw_at_the_band_floor() {
        let mix = mix_from_rgb(0.0, 0.0, 255.0, LOW, HIGH);
        // pitch_zone sits a hair above zero because the zone boundary is
        // 0.333 rather than exactly one third.
        assert!((mix.saw_frequency - LOW).abs() < 1.0);
        // saw_blend is 1 and the attenuation divisor is close to 1.
        assert!((mix.saw_gain - 0.9 * 0.75).abs() < 0.01);
        assert_eq!(mix.sine_gain, 0.0);
        assert_eq!(mix.saw_harmonics, 1.0);
    }

    #[test]
    fn midband_hue_maximises_harmonic_richness() {
        // Green inverts to 2/3: pitch_zone is 0.5, the harmonic peak.
        let mix = mix_from_rgb(0.0, 255.0, 0.0, LOW, HIGH);
        assert_eq!(mix.saw_harmonics, 21.0);
    }

    #[test]
    fn desaturated_images_turn_into_noise() {
        let mix = mix_from_rgb(128.0, 128.0, 128.0, LOW, HIGH);
        // s = 0 remaps to 0: no pitched voices at all.
        assert_eq!(mix.saw_gain, 0.0);
        assert_eq!(mix.sine_gain, 0.0);
        assert!((mix.noise_gain - (128.0 / 255.0) * 0.4).abs() < 1e-3);
    }

    #[test]
    fn absent_image_takes_the_silence_path() {
        let (mut sonifier, log) = build(2, 2);
        log.clear();
        sonifier.set_new_image(None, false).unwrap();
        assert_eq!(log.last_set(NodeHandle(0), Param::Gain), Some(0.0));
        assert_eq!(log.last_set(NodeHandle(1), Param::Gain), Some(0.0));
        assert_eq!(log.last_set(NodeHandle(2), Param::Gain), Some(0.0));
    }

    #[test]
    fn uniform_colour_sets_the_expected_parameters() {
        let (mut sonifier, log) = build(2, 2);
        let grid = PixelGrid::solid(2, 2, Rgb::new(0, 0, 255)).unwrap();
        log.clear();
        sonifier.set_new_image(Some(&grid), false).unwrap();

        let expected = mix_from_rgb(0.0, 0.0, 255.0, LOW, HIGH);
        assert_eq!(
            log.last_set(NodeHandle(0), Param::Gain),
            Some(expected.saw_gain)
        );
        assert_eq!(
            log.last_set(NodeHandle(0), Param::Frequency),
            Some(expected.saw_frequency)
        );
        assert_eq!(
            log.last_set(NodeHandle(2), Param::Gain),
            Some(expected.noise_gain)
        );
    }

    #[test]
    fn dimension_mismatch_is_rejected_without_state_change() {
        let (mut sonifier, log) = build(2, 2);
        let grid = PixelGrid::solid(4, 4, Rgb::WHITE).unwrap();
        log.clear();
        let err = sonifier.set_new_image(Some(&grid), false).unwrap_err();
        assert!(matches!(err, SonifierError::DimensionMismatch { .. }));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn terminate_is_idempotent_and_closes_the_device() {
        let (mut sonifier, log) = build(2, 2);
        sonifier.terminate().unwrap();
        assert!(!log.device_open());
        sonifier.terminate().unwrap();
        assert!(!log.device_open());
    }
}
