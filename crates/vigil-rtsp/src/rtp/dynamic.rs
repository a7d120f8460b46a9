use crate::error::Result;
use crate::sdp::Media;
use vigil_media_core::{CodecData, CodecType, Packet};

use super::aac::AacProtocol;
use super::h264::H264Protocol;
use super::h265::H265Protocol;
use super::jpeg::JpegProtocol;
use super::mp3::Mp3Protocol;
use super::mpeg12::Mpeg12Protocol;
use super::pcm::PcmProtocol;

/// 一次喂包的产出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depacketized {
    /// 产出一个完整访问单元
    Complete,
    /// 产出一个访问单元，且还有剩余（用空负载继续取）
    CompleteMore,
    /// 尚未凑齐，继续喂包
    Pending,
    /// 该包使用了不支持的特性，丢弃但不中断流
    Skip,
}

impl Depacketized {
    pub fn has_packet(&self) -> bool {
        matches!(self, Depacketized::Complete | Depacketized::CompleteMore)
    }
}

/// 每种编码一个实现的解包/打包协议
///
/// 在 SETUP / SDP 解析时选定一次，之后不再按类型分发。
pub trait DynamicProtocol: Send {
    fn codec_type(&self) -> CodecType;

    /// 从 SDP 媒体段提取编码参数
    fn parse_sdp(&mut self, media: &Media) -> Result<()>;

    /// 解析一个 RTP 负载；`buf` 为 None 表示取上一包剩余的访问单元
    fn parse_packet(
        &mut self,
        pkt: &mut Packet,
        buf: Option<&[u8]>,
        timestamp: u32,
        flags: u32,
    ) -> (u32, Depacketized);

    fn codec_data(&self) -> Option<CodecData>;

    fn default_clock_rate(&self) -> u32;

    fn payload_type(&self) -> u8;

    /// 服务端 DESCRIBE 用的 a= 行
    fn sdp_lines(&self) -> Vec<String>;
}

/// 动态负载类型（96-127 及未分配区）按编码选协议
pub fn protocol_for_codec(t: CodecType) -> Option<Box<dyn DynamicProtocol>> {
    match t {
        CodecType::H264 => Some(Box::new(H264Protocol::new())),
        CodecType::H265 => Some(Box::new(H265Protocol::new())),
        CodecType::Aac => Some(Box::new(AacProtocol::new())),
        CodecType::PcmMulaw => Some(Box::new(PcmProtocol::mulaw())),
        CodecType::PcmAlaw => Some(Box::new(PcmProtocol::alaw())),
        _ => None,
    }
}

/// 静态负载类型按 RFC 3551 编号选协议
pub fn protocol_for_static_payload(id: u8) -> Option<Box<dyn DynamicProtocol>> {
    match id {
        0 => Some(Box::new(PcmProtocol::mulaw())),
        8 => Some(Box::new(PcmProtocol::alaw())),
        14 => Some(Box::new(Mp3Protocol::new())),
        26 => Some(Box::new(JpegProtocol::new())),
        32 => Some(Box::new(Mpeg12Protocol::new())),
        _ => None,
    }
}

/// 发送侧：由已知解码参数构造协议
pub fn protocol_for_codec_data(cd: &CodecData) -> Option<Box<dyn DynamicProtocol>> {
    match cd {
        CodecData::H264 { .. } => Some(Box::new(H264Protocol::with_codec_data(cd.clone()))),
        CodecData::H265 { .. } => Some(Box::new(H265Protocol::with_codec_data(cd.clone()))),
        CodecData::Mjpeg { .. } => Some(Box::new(JpegProtocol::with_codec_data(cd.clone()))),
        CodecData::Aac { .. } => Some(Box::new(AacProtocol::with_codec_data(cd.clone()))),
        CodecData::PcmAlaw { sample_rate } => Some(Box::new(PcmProtocol::alaw_with_rate(*sample_rate))),
        CodecData::PcmMulaw { sample_rate } => Some(Box::new(PcmProtocol::mulaw_with_rate(*sample_rate))),
        _ => {
            tracing::warn!(target: "rtp_mux", "unsupported egress codec: {}", cd.codec_type());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_payload_dispatch() {
        assert_eq!(protocol_for_static_payload(0).unwrap().codec_type(), CodecType::PcmMulaw);
        assert_eq!(protocol_for_static_payload(8).unwrap().codec_type(), CodecType::PcmAlaw);
        assert_eq!(protocol_for_static_payload(14).unwrap().codec_type(), CodecType::Mp3);
        assert_eq!(protocol_for_static_payload(26).unwrap().codec_type(), CodecType::Mjpeg);
        assert!(protocol_for_static_payload(33).is_none());
    }

    #[test]
    fn test_dynamic_codec_dispatch() {
        assert_eq!(protocol_for_codec(CodecType::H264).unwrap().codec_type(), CodecType::H264);
        assert_eq!(protocol_for_codec(CodecType::H265).unwrap().codec_type(), CodecType::H265);
        assert!(protocol_for_codec(CodecType::Mpeg1).is_none());
    }
}
