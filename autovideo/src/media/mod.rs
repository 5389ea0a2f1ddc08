//! Media tooling: external process runner, ffprobe/ffmpeg wrappers and the
//! placeholder frame renderer.

pub mod assembler;
pub mod command;
pub mod placeholder;
pub mod probe;

pub use assembler::FfmpegAssembler;
pub use command::{CommandOutput, run_command_with_logs};
pub use placeholder::{PlaceholderRenderer, chunk_script};
pub use probe::probe_duration;
