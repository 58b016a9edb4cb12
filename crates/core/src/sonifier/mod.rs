//! Sonification strategies.
//!
//! Two independent strategies share the [`crate::backend::SynthBackend`]
//! boundary: [`PitchStereoSonifier`] voices every image row on its own
//! oscillator, [`HsvSonifier`] folds the whole image into one ambient
//! colour-driven timbre.

pub mod hsv;
pub mod pitch_stereo;

pub use hsv::HsvSonifier;
pub use pitch_stereo::PitchStereoSonifier;

use crate::image::PixelGrid;
use crate::{Result, SonifierError};

/// Seconds over which discrete parameter changes are smoothed to avoid
/// clicks.
pub(crate) const FADE_LENGTH: f32 = 0.05;

/// Seconds of silence between sweep repetitions.
pub(crate) const SWEEP_GAP: f32 = 0.2;

/// Combined loudness ceiling for a full voice bank.
pub(crate) const REFERENCE_LOUDNESS: f32 = 0.075;

/// Common surface of both sonification strategies.
pub trait Sonifier {
    /// Re-sonifies a new grid snapshot, or fades to silence when `grid` is
    /// absent. `detailed` skips the instantaneous mix and plays the
    /// time-multiplexed sweep immediately.
    fn set_new_image(&mut self, grid: Option<&PixelGrid>, detailed: bool) -> Result<()>;

    /// Silences the sonifier and releases the output device. Idempotent.
    fn terminate(&mut self) -> Result<()>;
}

pub(crate) fn check_dimensions(width: usize, height: usize, grid: &PixelGrid) -> Result<()> {
    if grid.width() != width || grid.height() != height {
        return Err(SonifierError::DimensionMismatch {
            expected_width: width,
            expected_height: height,
            actual_width: grid.width(),
            actual_height: grid.height(),
        });
    }
    Ok(())
}
