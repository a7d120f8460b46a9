use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, error, warn};
use vigil_media_core::{h265, CodecData, CodecType, Packet};

use super::dynamic::{Depacketized, DynamicProtocol};
use super::h264::{parse_aggregated_packet, ALLOC_FU_BUFFER_SIZE, MAX_FU_BUFFER_SIZE};
use crate::error::Result;
use crate::sdp::Media;

pub const PAYLOAD_HEADER_SIZE: usize = 2;
pub const FU_HEADER_SIZE: usize = 1;
pub const DONL_FIELD_SIZE: usize = 2;
pub const DOND_FIELD_SIZE: usize = 1;

/// H265 的 RTP 解包/打包协议 (RFC 7798)
pub struct H265Protocol {
    codec_data: Option<CodecData>,
    using_donl_field: bool,

    vps: Vec<u8>,
    sps: Vec<u8>,
    pps: Vec<u8>,
    sei: Vec<u8>,

    fu_started: bool,
    fu_buffer: Vec<u8>,

    last_nal_type: u8,
}

impl H265Protocol {
    pub fn new() -> Self {
        Self {
            codec_data: None,
            using_donl_field: false,
            vps: Vec::new(),
            sps: Vec::new(),
            pps: Vec::new(),
            sei: Vec::new(),
            fu_started: false,
            fu_buffer: Vec::with_capacity(ALLOC_FU_BUFFER_SIZE),
            last_nal_type: 0,
        }
    }

    pub fn with_codec_data(cd: CodecData) -> Self {
        let mut p = Self::new();
        if let CodecData::H265 { ref vps, ref sps, ref pps, .. } = cd {
            p.vps = vps.to_vec();
            p.sps = sps.to_vec();
            p.pps = pps.to_vec();
        }
        p.codec_data = Some(cd);
        p
    }

    fn reset_fu_state(&mut self) {
        self.fu_started = false;
        self.fu_buffer.clear();
    }

    /// VPS+SPS+PPS 齐了才算参数完整
    fn set_codec_data(&mut self) {
        if self.vps.is_empty() || self.sps.is_empty() || self.pps.is_empty() {
            return;
        }
        match h265::parse_sps(&self.sps) {
            Ok(info) => {
                self.codec_data = Some(CodecData::H265 {
                    vps: Bytes::copy_from_slice(&self.vps),
                    sps: Bytes::copy_from_slice(&self.sps),
                    pps: Bytes::copy_from_slice(&self.pps),
                    width: info.width,
                    height: info.height,
                });
            }
            Err(e) => {
                error!(target: "rtp_h265", "bad h265 codec data: {}", e);
            }
        }
    }

    fn handle_parameter_sets(&mut self, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        match h265::nal_type(buf[0]) {
            h265::NALU_VPS => {
                self.vps = buf.to_vec();
                self.set_codec_data();
            }
            h265::NALU_SPS => {
                self.sps = buf.to_vec();
                self.set_codec_data();
            }
            h265::NALU_PPS => {
                self.pps = buf.to_vec();
                self.set_codec_data();
            }
            _ => {}
        }
    }

    fn parse_fu_packet(&mut self, pkt: &mut Packet, buf: &[u8]) -> Depacketized {
        let payload_header = [buf[0], buf[1]];
        let buf = &buf[PAYLOAD_HEADER_SIZE..];
        // FU header: S|E|FuType(6)
        if buf.len() < FU_HEADER_SIZE {
            warn!(target: "rtp_h265", "HEVC FU packet too small");
            return Depacketized::Pending;
        }
        let is_start = buf[0] & 0x80 != 0;
        let is_end = buf[0] & 0x40 != 0;
        let fu_type = buf[0] & 0x3f;
        let mut buf = &buf[FU_HEADER_SIZE..];

        if self.using_donl_field {
            if buf.len() < DONL_FIELD_SIZE {
                warn!(target: "rtp_h265", "HEVC DONL packet too small");
                return Depacketized::Pending;
            }
            buf = &buf[DONL_FIELD_SIZE..];
        }

        debug!(target: "rtp_h265", "FU type {} with {} bytes", fu_type, buf.len());

        if is_start {
            self.fu_started = true;
            // rebuild the 2-byte NAL header with the real type
            let header0 = (payload_header[0] & 0x81) | (fu_type << 1);
            self.fu_buffer.extend_from_slice(&[0, 0, 0, 0, header0, payload_header[1]]);
        }
        if self.fu_started {
            self.fu_buffer.extend_from_slice(buf);
            if is_end {
                if self.fu_buffer.len() > 4 {
                    let nal_type = h265::nal_type(self.fu_buffer[4]);
                    pkt.frame_type = nal_type;
                    pkt.is_keyframe = h265::is_keyframe(nal_type);
                }
                let size = (self.fu_buffer.len() - 4) as u32;
                self.fu_buffer[0..4].copy_from_slice(&size.to_be_bytes());
                let data = Bytes::copy_from_slice(&self.fu_buffer);
                let nalu = data.slice(4..);
                pkt.data = data;
                self.handle_parameter_sets(&nalu);
                self.reset_fu_state();
                return Depacketized::Complete;
            }
        }
        if self.fu_buffer.len() > MAX_FU_BUFFER_SIZE {
            warn!(target: "rtp_h265", "fu buffer too long, len: {}", self.fu_buffer.len());
            self.fu_buffer = Vec::with_capacity(ALLOC_FU_BUFFER_SIZE);
            self.reset_fu_state();
        }

        Depacketized::Pending
    }
}

impl Default for H265Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicProtocol for H265Protocol {
    fn codec_type(&self) -> CodecType {
        CodecType::H265
    }

    fn parse_sdp(&mut self, media: &Media) -> Result<()> {
        if let Some(val) = media.a_line_base64("sprop-vps") {
            self.vps = val;
        }
        if let Some(val) = media.a_line_base64("sprop-sps") {
            self.sps = val;
        }
        if let Some(val) = media.a_line_base64("sprop-pps") {
            self.pps = val;
        }
        if let Some(val) = media.a_line_base64("sprop-sei") {
            self.sei = val;
        }
        if let Some(v) = media.a_lines.get("sprop-max-don-diff") {
            // sprop-max-don-diff > 0 implies DONL/DOND fields on the wire
            if v.parse::<i32>().unwrap_or(0) > 0 {
                self.using_donl_field = true;
                debug!(target: "rtp_h265", "sprop-max-don-diff in SDP, DON fields enabled");
            }
        }

        self.set_codec_data();

        if self.codec_data.is_none() {
            warn!(target: "rtp_h265", "H265 parameter sets not available in SDP");
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
        if buf.len() < PAYLOAD_HEADER_SIZE + 1 {
            error!(target: "rtp_h265", "too short RTP/HEVC packet, got {} bytes", buf.len());
            return (timestamp, Depacketized::Pending);
        }

        // payload header: F|Type(6)|LayerId(6)|TID(3)
        let nal_type = h265::nal_type(buf[0]);
        let lid = ((buf[0] << 5) & 0x20) | ((buf[1] >> 3) & 0x1f);
        let tid = buf[1] & 0x07;

        if nal_type != self.last_nal_type {
            self.reset_fu_state();
        }
        self.last_nal_type = nal_type;

        if lid != 0 {
            warn!(target: "rtp_h265", "missing feature: multi-layer HEVC coding");
            return (timestamp, Depacketized::Skip);
        }
        if tid == 0 {
            warn!(target: "rtp_h265", "illegal temporal ID in RTP/HEVC packet");
            return (timestamp, Depacketized::Pending);
        }
        if nal_type > 50 {
            warn!(target: "rtp_h265", "unsupported HEVC NAL type {}", nal_type);
            return (timestamp, Depacketized::Pending);
        }
        pkt.codec = Some(CodecType::H265);

        let rv = match nal_type {
            // aggregation packet (AP) with two or more NAL units
            48 => {
                let mut rest = &buf[PAYLOAD_HEADER_SIZE..];
                let mut skip = 0;
                if self.using_donl_field {
                    if rest.len() < DONL_FIELD_SIZE {
                        warn!(target: "rtp_h265", "HEVC DONL packet too small");
                        return (timestamp, Depacketized::Pending);
                    }
                    rest = &rest[DONL_FIELD_SIZE..];
                    skip = DOND_FIELD_SIZE;
                }
                parse_aggregated_packet(pkt, rest, skip, |pkt, nalu| {
                    self.handle_parameter_sets(nalu);
                    let t = h265::nal_type(nalu[0]);
                    pkt.frame_type = t;
                    if h265::is_keyframe(t) {
                        pkt.is_keyframe = true;
                    }
                })
            }
            // fragmentation unit (FU)
            49 => self.parse_fu_packet(pkt, buf),
            // PACI: temporal scalability control information
            50 => {
                warn!(target: "rtp_h265", "missing feature: PACI packets for RTP/HEVC");
                Depacketized::Skip
            }
            // VPS/SPS/PPS/SEI and single NAL unit packets
            _ => {
                self.handle_parameter_sets(buf);
                pkt.frame_type = nal_type;
                pkt.is_keyframe = h265::is_keyframe(nal_type);
                let mut data = BytesMut::with_capacity(4 + buf.len());
                data.put_u32(buf.len() as u32);
                data.put_slice(buf);
                pkt.data = data.freeze();
                Depacketized::Complete
            }
        };

        (timestamp, rv)
    }

    fn codec_data(&self) -> Option<CodecData> {
        self.codec_data.clone()
    }

    fn default_clock_rate(&self) -> u32 {
        90000
    }

    fn payload_type(&self) -> u8 {
        96
    }

    fn sdp_lines(&self) -> Vec<String> {
        let Some(CodecData::H265 { ref vps, ref sps, ref pps, .. }) = self.codec_data else {
            return Vec::new();
        };
        let engine = &base64::engine::general_purpose::STANDARD;
        let fmtp = format!(
            "a=fmtp:{} sprop-vps={}; sprop-sps={}; sprop-pps={}",
            self.payload_type(),
            engine.encode(vps),
            engine.encode(sps),
            engine.encode(pps)
        );
        let rtpmap = format!("a=rtpmap:{} H265/{}", self.payload_type(), self.default_clock_rate());
        vec![fmtp, rtpmap]
    }
}
