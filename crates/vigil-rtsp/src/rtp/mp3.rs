use bytes::Bytes;
use vigil_media_core::{mp3, CodecData, CodecType, Packet};

use super::dynamic::{Depacketized, DynamicProtocol};
use crate::error::Result;
use crate::sdp::Media;

/// MP3 的 RTP 解包协议 (RFC 2250 MPA)
///
/// 编码参数靠第一帧的帧头嗅探得到。
pub struct Mp3Protocol {
    codec_data: Option<CodecData>,
}

impl Mp3Protocol {
    pub fn new() -> Self {
        Self { codec_data: None }
    }
}

impl Default for Mp3Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicProtocol for Mp3Protocol {
    fn codec_type(&self) -> CodecType {
        CodecType::Mp3
    }

    fn parse_sdp(&mut self, _media: &Media) -> Result<()> {
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
        // 4-byte MBZ/fragmentation-offset header precedes the frame
        if buf.len() <= 4 {
            return (timestamp, Depacketized::Pending);
        }
        let payload = &buf[4..];

        if self.codec_data.is_none() {
            match mp3::parse_frame_header(payload) {
                Ok(info) => {
                    self.codec_data = Some(CodecData::Mp3 {
                        sample_rate: info.sample_rate,
                        channels: info.channels,
                    });
                }
                Err(_) => return (timestamp, Depacketized::Pending),
            }
        }

        pkt.codec = Some(CodecType::Mp3);
        pkt.is_keyframe = true;
        pkt.data = Bytes::copy_from_slice(payload);
        (timestamp, Depacketized::Complete)
    }

    fn codec_data(&self) -> Option<CodecData> {
        self.codec_data.clone()
    }

    fn default_clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        14
    }

    fn sdp_lines(&self) -> Vec<String> {
        Vec::new()
    }
}
