pub mod aac;
pub mod demux;
pub mod dynamic;
pub mod h264;
pub mod h265;
pub mod jpeg;
pub mod mp3;
pub mod mpeg12;
pub mod mux;
pub mod pcm;
pub mod rtcp;
pub mod stats;

pub use demux::RtpDemuxContext;
pub use dynamic::{Depacketized, DynamicProtocol};
pub use mux::RtpMuxContext;
pub use rtcp::{RTCP_BYE, RTCP_RR, RTCP_SDES, RTCP_SR, RTCP_EOF_SSRC};
pub use stats::RtpStatistics;

pub const RTP_VERSION: u8 = 2;
pub const RTP_SEQ_MOD: u32 = 1 << 16;
/// 时间戳无效值
pub const RTP_NOTS_VALUE: u32 = u32::MAX;

/// RTP 包携带关键帧
pub const RTP_FLAG_KEY: u32 = 0x1;
/// RTP 头 marker 位
pub const RTP_FLAG_MARKER: u32 = 0x2;

/// 取毫秒级相对时间（用于到达时间与 RTCP 间隔）
pub(crate) fn relative_time_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
