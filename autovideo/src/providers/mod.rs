//! Concrete capability providers reached over HTTP.

pub mod elevenlabs;
pub mod google_tts;
pub mod openai;
pub mod stability;

pub use elevenlabs::ElevenLabsSynthesizer;
pub use google_tts::GoogleTtsSynthesizer;
pub use openai::OpenAiScriptGenerator;
pub use stability::StabilityAssetProvider;
