pub mod backend;
pub mod engine;
pub mod rodio_backend;

pub use backend::{AudioBackend, BufferId, DecodedBuffer, NullBackend, VoiceId, VoiceSpec};
pub use engine::{AudioEngine, DecodePolicy};
pub use rodio_backend::RodioBackend;
