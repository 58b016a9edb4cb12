//! Core library for the Pixel Sonifier application.
//!
//! The crate turns 2-D pixel grids into a real-time audio signal so that
//! brightness and colour patterns become perceivable as sound. Each module
//! owns a distinct subsystem: the synthesis backend boundary and its
//! software implementation, the pixel-grid data model, cancellable timing,
//! and the two sonification strategies built on top of them.

pub mod backend;
pub mod config;
pub mod error;
pub mod image;
pub mod scheduler;
pub mod sonifier;
pub mod timer;

pub use backend::{
    BatchScope, Destination, NodeHandle, NoiseKind, OscillatorKind, PanStrategy, Param,
    SoftwareBackend, SynthBackend, DEFAULT_DEVICE,
};
pub use config::{SonifierConfig, SweepConfig};
pub use error::{Result, SonifierError};
pub use image::{rgb_to_hsv, PixelGrid, Rgb};
pub use scheduler::PlaybackScheduler;
pub use sonifier::{HsvSonifier, PitchStereoSonifier, Sonifier};
pub use timer::{DelayTimer, ThreadTimer, TimerToken};
