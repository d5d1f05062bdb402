pub mod sink;
pub mod transcode;

pub use sink::MediaSink;
pub use transcode::{FfmpegTranscoder, TranscodeProfile, Transcoder};
