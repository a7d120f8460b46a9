use bytes::Bytes;
use tracing::debug;
use vigil_media_core::{mpeg12, CodecData, CodecType, Packet};

use super::dynamic::{Depacketized, DynamicProtocol};
use crate::error::Result;
use crate::sdp::Media;

/// MPEG1/2 视频的 RTP 解包协议 (RFC 2250)
pub struct Mpeg12Protocol {
    codec_data: Option<CodecData>,
}

impl Mpeg12Protocol {
    pub fn new() -> Self {
        Self { codec_data: None }
    }
}

impl Default for Mpeg12Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicProtocol for Mpeg12Protocol {
    fn codec_type(&self) -> CodecType {
        self.codec_data
            .as_ref()
            .map(|cd| cd.codec_type())
            .unwrap_or(CodecType::Mpeg1)
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
        if buf.len() <= 4 {
            return (timestamp, Depacketized::Pending);
        }

        // MPEG video-specific header: MBZ|T|TR|AN|N|S|B|E|P|FBV|BFC|FFV|FFC
        let t = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let mut buf = &buf[4..];
        if t & (1 << 26) != 0 {
            // MPEG-2 extension header
            if buf.len() <= 4 {
                return (timestamp, Depacketized::Pending);
            }
            buf = &buf[4..];
        }

        if self.codec_data.is_none() {
            if let Some(cd) = mpeg12::codec_data_from_sequence_header(buf) {
                debug!(
                    target: "rtp_mpeg12",
                    "MPEG codec: {} {:?}",
                    cd.codec_type(),
                    cd.dimensions()
                );
                self.codec_data = Some(cd);
            }
        }

        pkt.codec = Some(self.codec_type());
        pkt.data = Bytes::copy_from_slice(buf);
        (timestamp, Depacketized::Complete)
    }

    fn codec_data(&self) -> Option<CodecData> {
        self.codec_data.clone()
    }

    fn default_clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        32
    }

    fn sdp_lines(&self) -> Vec<String> {
        Vec::new()
    }
}
