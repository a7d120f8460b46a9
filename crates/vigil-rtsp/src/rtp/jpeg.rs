use bytes::Bytes;
use tracing::{error, warn};
use vigil_media_core::{mjpeg, CodecData, CodecType, Packet};

use super::dynamic::{Depacketized, DynamicProtocol};
use super::RTP_FLAG_MARKER;
use crate::error::Result;
use crate::sdp::Media;

/// 单帧 JPEG 的尺寸上限
pub const JPEG_MAX_FRAME_SIZE: usize = 5 << 20;

const JPEG_END_MARKER: [u8; 2] = [0xff, 0xd9];

/// MJPEG 的 RTP 解包/打包协议 (RFC 2435)
///
/// 从 RTP/JPEG 主头合成 JFIF/DQT/DHT/SOF0/SOS 文件头，再按 marker
/// 位拼出独立可解码的 JPEG 字节流。
pub struct JpegProtocol {
    codec_data: Option<CodecData>,

    hdr_size: usize,
    /// q=128..254 的内联量化表缓存
    q_tables: Box<[[u8; 128]; 128]>,
    q_table_len: [u16; 128],

    frame: Vec<u8>,
    timestamp: u32,
}

impl JpegProtocol {
    pub fn new() -> Self {
        Self {
            codec_data: None,
            hdr_size: 0,
            q_tables: Box::new([[0; 128]; 128]),
            q_table_len: [0; 128],
            frame: Vec::new(),
            timestamp: 0,
        }
    }

    pub fn with_codec_data(cd: CodecData) -> Self {
        let mut p = Self::new();
        p.codec_data = Some(cd);
        p
    }
}

impl Default for JpegProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicProtocol for JpegProtocol {
    fn codec_type(&self) -> CodecType {
        CodecType::Mjpeg
    }

    fn parse_sdp(&mut self, _media: &Media) -> Result<()> {
        Ok(())
    }

    fn parse_packet(
        &mut self,
        pkt: &mut Packet,
        buf: Option<&[u8]>,
        timestamp: u32,
        flags: u32,
    ) -> (u32, Depacketized) {
        let Some(mut buf) = buf else {
            return (timestamp, Depacketized::Pending);
        };
        if buf.len() < 8 {
            error!(target: "rtp_jpeg", "too short RTP/JPEG packet");
            return (timestamp, Depacketized::Pending);
        }

        // Main JPEG header: type-specific(8) | offset(24) | type(8) | Q(8) | w(8) | h(8)
        let off = u32::from_be_bytes([0, buf[1], buf[2], buf[3]]) as usize;
        let mut ty = buf[4];
        let q = buf[5];
        let width = buf[6] as u32;
        let height = buf[7] as u32;
        buf = &buf[8..];

        let mut dri = 0u16;
        if ty & 0x40 != 0 {
            // Restart Marker header
            if buf.len() < 4 {
                error!(target: "rtp_jpeg", "too short RTP/JPEG packet");
                return (timestamp, Depacketized::Pending);
            }
            dri = u16::from_be_bytes([buf[0], buf[1]]);
            buf = &buf[4..];
            ty &= !0x40;
        }
        if ty > 1 {
            error!(target: "rtp_jpeg", "unsupported RTP/JPEG type {}, size {}x{}", ty, width, height);
            return (timestamp, Depacketized::Skip);
        }

        if off == 0 {
            // Start of JPEG data packet: resolve quantization tables.
            let qtables: Vec<u8>;
            if q > 127 {
                if buf.len() < 4 {
                    error!(target: "rtp_jpeg", "too short RTP/JPEG packet");
                    return (timestamp, Depacketized::Pending);
                }
                let precision = buf[1];
                let q_table_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
                buf = &buf[4..];
                if precision != 0 {
                    warn!(target: "rtp_jpeg", "only 8-bit precision is supported");
                }

                if q_table_len > 0 {
                    if buf.len() < q_table_len {
                        error!(target: "rtp_jpeg", "too short RTP/JPEG packet");
                        return (timestamp, Depacketized::Pending);
                    }
                    qtables = buf[..q_table_len].to_vec();
                    buf = &buf[q_table_len..];
                    if q < 255 {
                        let slot = (q - 128) as usize;
                        let cached_len = self.q_table_len[slot] as usize;
                        if cached_len != 0
                            && (cached_len != q_table_len || self.q_tables[slot][..cached_len] != qtables[..])
                        {
                            warn!(target: "rtp_jpeg", "quantization tables for q={} changed", q);
                        } else if cached_len == 0 && q_table_len <= 128 {
                            self.q_tables[slot][..q_table_len].copy_from_slice(&qtables);
                            self.q_table_len[slot] = q_table_len as u16;
                        }
                    }
                } else {
                    if q == 255 {
                        error!(target: "rtp_jpeg", "invalid RTP/JPEG packet: quantization tables not found");
                        return (timestamp, Depacketized::Pending);
                    }
                    let slot = (q - 128) as usize;
                    if self.q_table_len[slot] == 0 {
                        error!(target: "rtp_jpeg", "no quantization tables known for q={} yet", q);
                        return (timestamp, Depacketized::Pending);
                    }
                    qtables = self.q_tables[slot][..self.q_table_len[slot] as usize].to_vec();
                }
            } else {
                if q == 0 || q > 99 {
                    error!(target: "rtp_jpeg", "reserved q value {}", q);
                    return (timestamp, Depacketized::Pending);
                }
                qtables = mjpeg::create_default_qtables(q).to_vec();
            }

            self.frame.clear();
            self.timestamp = timestamp;
            let hdr = mjpeg::create_jpeg_header(ty, width, height, &qtables, qtables.len() / 64, dri);
            self.hdr_size = hdr.len();
            self.frame.extend_from_slice(&hdr);
            if self.codec_data.is_none() {
                self.codec_data = Some(CodecData::Mjpeg {
                    width: width << 3,
                    height: height << 3,
                });
            }
        }

        if self.frame.is_empty() {
            error!(target: "rtp_jpeg", "received packet without a start chunk; dropping frame");
            return (timestamp, Depacketized::Pending);
        }

        if self.timestamp != timestamp {
            // A start packet was lost somewhere, skip the current frame.
            self.frame.clear();
            error!(target: "rtp_jpeg", "RTP timestamps don't match");
            return (timestamp, Depacketized::Pending);
        }
        if off != self.frame.len() - self.hdr_size {
            self.frame.clear();
            error!(target: "rtp_jpeg", "missing packets; dropping frame");
            return (timestamp, Depacketized::Pending);
        }
        if self.frame.len() + buf.len() > JPEG_MAX_FRAME_SIZE {
            self.frame.clear();
            error!(target: "rtp_jpeg", "frame too large; dropping frame");
            return (timestamp, Depacketized::Pending);
        }

        self.frame.extend_from_slice(buf);
        if flags & RTP_FLAG_MARKER != 0 {
            // End of JPEG data packet.
            self.frame.extend_from_slice(&JPEG_END_MARKER);
            pkt.codec = Some(CodecType::Mjpeg);
            pkt.is_keyframe = true;
            pkt.data = Bytes::from(std::mem::take(&mut self.frame));
            return (timestamp, Depacketized::Complete);
        }
        (timestamp, Depacketized::Pending)
    }

    fn codec_data(&self) -> Option<CodecData> {
        self.codec_data.clone()
    }

    fn default_clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        26
    }

    fn sdp_lines(&self) -> Vec<String> {
        Vec::new()
    }
}
