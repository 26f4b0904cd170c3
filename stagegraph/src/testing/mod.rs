//! Testing utilities for stage graphs.
//!
//! Stage doubles that make engine behavior observable: fixed updates,
//! failures, delays, panics and input recording.

mod mocks;

pub use mocks::{
    FailingStage, PanickingStage, RecordedInput, RecordingStage, SlowStage, UpdateStage,
};
