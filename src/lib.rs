mod codec;
pub mod error;
pub mod ffmpeg;
pub mod probe_api;

pub use codec::{
    CodecInfo, CodecValidator, VALID_CODECS, all_codec_info, get_codec_info, is_valid_codec,
};
pub use error::AppError;
pub use ffmpeg::{CancelToken, ProbeOptions, VideoFileDescriptor};
