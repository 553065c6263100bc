//! Recorder module for capturing a demonstration as recipe steps
//!
//! This module provides:
//! - The capture recorder that owns the session while recording
//! - Step construction from raw interactions, with secret redaction

pub mod capture;
pub mod event_recorder;

pub use event_recorder::{EventRecorder, RecorderConfig, RecordingHandle, RecordingStatus};
