pub mod demuxer;
pub mod tsio;

pub use demuxer::TsDemuxer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("end of stream")]
    Eof,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Media(#[from] vigil_media_core::MediaError),
}

pub type Result<T> = std::result::Result<T, TsError>;
