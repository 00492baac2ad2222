pub mod config;
pub mod engine;
pub mod error;
pub mod paths;
pub mod pump;
pub mod render;

pub use config::{Config, ConfigError};
pub use engine::backend::{
    AudioBackend, BackendError, ChainSettings, NullBackend, SharedTestBackend, TestBackend,
    VoiceNodeId,
};
pub use engine::samples::SampleLibrary;
pub use engine::{AudioEngine, VoiceHandle};
pub use error::AudioError;
pub use pump::CompletionPump;
pub use render::CpalBackend;
