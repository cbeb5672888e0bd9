//! Testing utilities for CrabCapture
//!
//! Scriptable devices, synthetic frames and audio, a hand-driven clock, an
//! in-memory writer and delegates that collect every callback. Everything
//! here runs without camera hardware so the whole pipeline can be exercised
//! in CI.

mod delegates;
mod devices;
mod synthetic_data;
mod writer;

pub use delegates::{
    CollectingOutputDelegate, CollectingRecorderDelegate, OutputEvent, RecorderEvent,
    RecordingSessionDelegate, SessionCall,
};
pub use devices::{
    Camera, Microphone, SyntheticCamera, SyntheticDevice, SyntheticDeviceBuilder, SyntheticKind,
    SyntheticMicrophone,
};
pub use synthetic_data::{synthetic_audio_buffer, synthetic_video_frame, ManualClock};
pub use writer::{MemoryWriter, MemoryWriterFactory, WriterCall};
