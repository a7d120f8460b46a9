pub mod aac;
pub mod error;
pub mod h264;
pub mod h265;
pub mod mjpeg;
pub mod mp3;
pub mod mpeg12;
pub mod rescale;
pub mod types;

pub use error::{MediaError, Result};
pub use rescale::{rescale, rescale_rnd, Rounding};
pub use types::{CodecData, CodecType, Packet};
