use bytes::Bytes;
use vigil_media_core::{CodecData, CodecType, Packet};

use super::dynamic::{Depacketized, DynamicProtocol};
use crate::error::Result;
use crate::sdp::Media;

/// G.711 A 律 / μ 律的 RTP 透传协议 (RFC 3551)
pub struct PcmProtocol {
    codec: CodecType,
    sample_rate: u32,
}

impl PcmProtocol {
    pub fn alaw() -> Self {
        Self { codec: CodecType::PcmAlaw, sample_rate: 0 }
    }

    pub fn mulaw() -> Self {
        Self { codec: CodecType::PcmMulaw, sample_rate: 0 }
    }

    pub fn alaw_with_rate(sample_rate: u32) -> Self {
        Self { codec: CodecType::PcmAlaw, sample_rate }
    }

    pub fn mulaw_with_rate(sample_rate: u32) -> Self {
        Self { codec: CodecType::PcmMulaw, sample_rate }
    }

    fn effective_rate(&self) -> u32 {
        if self.sample_rate > 0 {
            self.sample_rate
        } else {
            self.default_clock_rate()
        }
    }
}

impl DynamicProtocol for PcmProtocol {
    fn codec_type(&self) -> CodecType {
        self.codec
    }

    fn parse_sdp(&mut self, media: &Media) -> Result<()> {
        if media.time_scale > 0 {
            self.sample_rate = media.time_scale;
        }
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
        pkt.codec = Some(self.codec);
        pkt.is_keyframe = true;
        pkt.data = Bytes::copy_from_slice(buf);
        (timestamp, Depacketized::Complete)
    }

    fn codec_data(&self) -> Option<CodecData> {
        Some(match self.codec {
            CodecType::PcmAlaw => CodecData::PcmAlaw { sample_rate: self.effective_rate() },
            _ => CodecData::PcmMulaw { sample_rate: self.effective_rate() },
        })
    }

    fn default_clock_rate(&self) -> u32 {
        8000
    }

    fn payload_type(&self) -> u8 {
        match self.codec {
            CodecType::PcmAlaw => 8,
            _ => 0,
        }
    }

    fn sdp_lines(&self) -> Vec<String> {
        let name = match self.codec {
            CodecType::PcmAlaw => "PCMA",
            _ => "PCMU",
        };
        vec![format!(
            "a=rtpmap:{} {}/{}/1",
            self.payload_type(),
            name,
            self.effective_rate()
        )]
    }
}
