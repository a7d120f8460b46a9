use bytes::Bytes;
use tracing::error;
use vigil_media_core::{aac, CodecData, CodecType, Packet};

use super::dynamic::{Depacketized, DynamicProtocol};
use crate::error::{Result, RtspError};
use crate::sdp::Media;

/// AAC 的 RTP 解包/打包协议 (RFC 3640, AAC-hbr 单帧不交织)
pub struct AacProtocol {
    codec_data: Option<CodecData>,
}

impl AacProtocol {
    pub fn new() -> Self {
        Self { codec_data: None }
    }

    pub fn with_codec_data(cd: CodecData) -> Self {
        Self { codec_data: Some(cd) }
    }
}

impl Default for AacProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicProtocol for AacProtocol {
    fn codec_type(&self) -> CodecType {
        CodecType::Aac
    }

    fn parse_sdp(&mut self, media: &Media) -> Result<()> {
        if media.config.is_empty() {
            return Err(RtspError::Protocol("aac sdp config missing".into()));
        }
        self.codec_data = Some(aac::codec_data_from_config(&media.config)?);
        Ok(())
    }

    fn parse_packet(
        &mut self,
        pkt: &mut Packet,
        buf: Option<&[u8]>,
        timestamp: u32,
        _flags: u32,
    ) -> (u32, Depacketized) {
        let Some(buf) = buf else {
            return (timestamp, Depacketized::Pending);
        };
        if buf.len() < 4 {
            error!(target: "rtp_aac", "aac packet too short");
            return (timestamp, Depacketized::Pending);
        }

        // AU-headers-length (bits) followed by AU headers, then the AU data
        let au_headers_len = (u16::from_be_bytes([buf[0], buf[1]]) as usize + 7) / 8;
        if 2 + au_headers_len > buf.len() {
            error!(target: "rtp_aac", "aac AU header section truncated");
            return (timestamp, Depacketized::Pending);
        }
        let payload = &buf[2 + au_headers_len..];

        pkt.codec = Some(CodecType::Aac);
        pkt.is_keyframe = true;
        pkt.data = Bytes::copy_from_slice(payload);
        (timestamp, Depacketized::Complete)
    }

    fn codec_data(&self) -> Option<CodecData> {
        self.codec_data.clone()
    }

    fn default_clock_rate(&self) -> u32 {
        48000
    }

    fn payload_type(&self) -> u8 {
        97
    }

    fn sdp_lines(&self) -> Vec<String> {
        let Some(CodecData::Aac { ref config, sample_rate, channels }) = self.codec_data else {
            return Vec::new();
        };
        let rtpmap = format!(
            "a=rtpmap:{} MPEG4-GENERIC/{}/{}",
            self.payload_type(),
            sample_rate,
            channels
        );
        let mut fmtp = format!(
            "a=fmtp:{} profile-level-id=1;mode=AAC-hbr;sizelength=13;indexlength=3;indexdeltalength=3",
            self.payload_type()
        );
        if !config.is_empty() {
            fmtp.push_str(";config=");
            fmtp.push_str(&hex::encode(config));
        }
        vec![rtpmap, fmtp]
    }
}

/// 按 RFC 3640 包一个访问单元（2 字节 AU-headers-length + 1 个 AU 头）
pub fn wrap_access_unit(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&16u16.to_be_bytes()); // AU-headers-length in bits
    let size = (data.len() as u16) << 3; // 13-bit size + 3-bit index
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(data);
    out
}
