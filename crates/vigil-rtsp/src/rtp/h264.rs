use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{error, warn};
use vigil_media_core::{h264, CodecData, CodecType, Packet};

use super::dynamic::{Depacketized, DynamicProtocol};
use crate::error::Result;
use crate::sdp::Media;

pub const NAL_MASK: u8 = 0x1f;
/// 分片重组缓冲的初始容量
pub const ALLOC_FU_BUFFER_SIZE: usize = 1024 * 1024;
/// 分片重组缓冲的上限，防止坏流把内存撑爆
pub const MAX_FU_BUFFER_SIZE: usize = 4 * ALLOC_FU_BUFFER_SIZE;

/// H264 的 RTP 解包/打包协议 (RFC 6184)
pub struct H264Protocol {
    pub profile_idc: u8,
    pub profile_iop: u8,
    pub level_idc: u8,
    pub packetization_mode: u32,

    sps: Vec<u8>,
    pps: Vec<u8>,
    codec_data: Option<CodecData>,

    fu_started: bool,
    fu_buffer: Vec<u8>,

    last_nal_type: u8,
}

impl H264Protocol {
    pub fn new() -> Self {
        Self {
            profile_idc: 0,
            profile_iop: 0,
            level_idc: 0,
            packetization_mode: 0,
            sps: Vec::new(),
            pps: Vec::new(),
            codec_data: None,
            fu_started: false,
            fu_buffer: Vec::with_capacity(ALLOC_FU_BUFFER_SIZE),
            last_nal_type: 0,
        }
    }

    /// 发送侧：参数已知
    pub fn with_codec_data(cd: CodecData) -> Self {
        let mut p = Self::new();
        if let CodecData::H264 { ref sps, ref pps, .. } = cd {
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

    fn set_codec_data(&mut self) {
        if self.sps.is_empty() || self.pps.is_empty() {
            return;
        }
        match h264::parse_sps(&self.sps) {
            Ok(info) => {
                self.profile_idc = info.profile_idc;
                self.profile_iop = info.constraint_flags;
                self.level_idc = info.level_idc;
                self.codec_data = Some(CodecData::H264 {
                    sps: Bytes::copy_from_slice(&self.sps),
                    pps: Bytes::copy_from_slice(&self.pps),
                    width: info.width,
                    height: info.height,
                });
            }
            Err(e) => {
                error!(target: "rtp_h264", "bad h264 codec data: {}", e);
            }
        }
    }

    /// 任何路径上看到 SPS/PPS 都同步更新编码参数
    fn handle_sps_pps(&mut self, buf: &[u8]) {
        if buf.is_empty() {
            return;
        }
        match h264::nalu_type(buf[0]) {
            h264::NALU_SPS => {
                // SDP 中的 sprop 可能把 SPS/PPS 连在一起，拆开再收
                let mut raw = vec![0, 0, 0, 1];
                raw.extend_from_slice(buf);
                let (nalus, _) = h264::split_nalus(&raw);
                for nalu in nalus {
                    if nalu.is_empty() {
                        continue;
                    }
                    match h264::nalu_type(nalu[0]) {
                        h264::NALU_SPS => self.sps = nalu.to_vec(),
                        h264::NALU_PPS => self.pps = nalu.to_vec(),
                        _ => {}
                    }
                }
                self.set_codec_data();
            }
            h264::NALU_PPS => {
                self.pps = buf.to_vec();
                self.set_codec_data();
            }
            _ => {}
        }
    }

    fn parse_fu_packet(&mut self, pkt: &mut Packet, buf: &[u8]) -> Depacketized {
        // FU indicator: F|NRI|Type; FU header: S|E|R|Type
        if buf.len() < 3 {
            error!(target: "rtp_h264", "too short data for FU-A/B packet");
            return Depacketized::Pending;
        }

        let fu_indicator = buf[0];
        let fu_header = buf[1];
        let is_start = fu_header & 0x80 != 0;
        let is_end = fu_header & 0x40 != 0;

        let nal_type = fu_header & NAL_MASK;
        let nal = (fu_indicator & 0xe0) | nal_type;

        let is_fu_b = h264::nalu_type(fu_indicator) == 29;
        if is_fu_b && buf.len() < 5 {
            error!(target: "rtp_h264", "too short data for FU-B packet");
            return Depacketized::Pending;
        }

        if is_start {
            self.fu_started = true;
            self.fu_buffer.extend_from_slice(&[0, 0, 0, 0, nal]);
        }
        if self.fu_started {
            // skip FU indicator and header; FU-B carries a 2-byte DON
            let payload_start = if is_fu_b { 4 } else { 2 };
            self.fu_buffer.extend_from_slice(&buf[payload_start..]);
            if is_end {
                if self.fu_buffer.len() > 4 {
                    pkt.is_keyframe = self.fu_buffer[4] & NAL_MASK == h264::NALU_IDR;
                    pkt.frame_type = self.fu_buffer[4] & NAL_MASK;
                }
                let size = (self.fu_buffer.len() - 4) as u32;
                self.fu_buffer[0..4].copy_from_slice(&size.to_be_bytes());
                let data = Bytes::copy_from_slice(&self.fu_buffer);
                let nalu = data.slice(4..);
                pkt.data = data;
                self.handle_sps_pps(&nalu);
                self.reset_fu_state();
                return Depacketized::Complete;
            }
        }
        if self.fu_buffer.len() > MAX_FU_BUFFER_SIZE {
            warn!(target: "rtp_h264", "fu buffer too long, len: {}", self.fu_buffer.len());
            self.fu_buffer = Vec::with_capacity(ALLOC_FU_BUFFER_SIZE);
            self.reset_fu_state();
        }

        Depacketized::Pending
    }
}

impl Default for H264Protocol {
    fn default() -> Self {
        Self::new()
    }
}

/// STAP-A / H265 AP 共用的聚合包解析
///
/// 每个子 NALU 重新封成 4 字节大端长度前缀的形式。
pub(super) fn parse_aggregated_packet(
    pkt: &mut Packet,
    mut buf: &[u8],
    skip_between: usize,
    mut handle: impl FnMut(&mut Packet, &[u8]),
) -> Depacketized {
    let mut count = 0;
    let mut data = BytesMut::new();
    while buf.len() >= 2 {
        let size = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        if size == 0 || size + 2 > buf.len() {
            break;
        }
        let nalu = &buf[2..size + 2];
        data.put_u32(size as u32);
        data.put_slice(nalu);
        handle(pkt, nalu);
        buf = &buf[size + 2..];
        if buf.len() >= skip_between {
            buf = &buf[skip_between..];
        }
        count += 1;
    }
    if count == 0 {
        return Depacketized::Pending;
    }
    pkt.data = data.freeze();
    Depacketized::Complete
}

impl DynamicProtocol for H264Protocol {
    fn codec_type(&self) -> CodecType {
        CodecType::H264
    }

    fn parse_sdp(&mut self, media: &Media) -> Result<()> {
        if let Some(sprop) = media.a_lines.get("sprop-parameter-sets") {
            for field in sprop.split(',') {
                if let Ok(nalu) = base64::engine::general_purpose::STANDARD.decode(field.trim()) {
                    if !nalu.is_empty() {
                        self.handle_sps_pps(&nalu);
                    }
                }
            }
        }
        if let Some(mode) = media.a_lines.get("packetization-mode") {
            self.packetization_mode = mode.parse().unwrap_or(0);
        }

        if (self.sps.is_empty() || self.pps.is_empty()) && !media.config.is_empty() {
            let (nalus, format) = h264::split_nalus(&media.config);
            if format != h264::NaluFormat::Raw {
                for nalu in nalus {
                    if !nalu.is_empty() {
                        self.handle_sps_pps(&nalu);
                    }
                }
            }
        }

        if self.codec_data.is_none() {
            warn!(target: "rtp_h264", "H264 parameter sets not available in SDP");
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
        if buf.is_empty() {
            return (timestamp, Depacketized::Pending);
        }
        let nal_type = h264::nalu_type(buf[0]);

        if nal_type != self.last_nal_type {
            self.reset_fu_state();
        }
        self.last_nal_type = nal_type;
        pkt.codec = Some(CodecType::H264);

        let rv = match nal_type {
            // single NALU, undefined type 0 passed through as well
            0..=23 => {
                self.handle_sps_pps(buf);
                pkt.is_keyframe = nal_type == h264::NALU_IDR;
                pkt.frame_type = buf[0] & NAL_MASK;
                let mut data = BytesMut::with_capacity(4 + buf.len());
                data.put_u32(buf.len() as u32);
                data.put_slice(buf);
                pkt.data = data.freeze();
                Depacketized::Complete
            }
            // STAP-A: one packet, multiple NALUs
            24 => parse_aggregated_packet(pkt, &buf[1..], 0, |pkt, nalu| {
                self.handle_sps_pps(nalu);
                pkt.frame_type = nalu[0] & NAL_MASK;
                if h264::nalu_type(nalu[0]) == h264::NALU_IDR {
                    pkt.is_keyframe = true;
                }
            }),
            // FU-A / FU-B fragmented NALU
            28 | 29 => self.parse_fu_packet(pkt, buf),
            other => {
                warn!(target: "rtp_h264", "unknown nal type: {}", other);
                Depacketized::Pending
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
        let Some(CodecData::H264 { ref sps, ref pps, .. }) = self.codec_data else {
            return Vec::new();
        };
        let profile = match h264::parse_sps(sps) {
            Ok(info) => h264::profile_level_id(&info),
            Err(_) => format!("{:02x}{:02x}{:02x}", self.profile_idc, self.profile_iop, self.level_idc),
        };
        let engine = &base64::engine::general_purpose::STANDARD;
        let fmtp = format!(
            "a=fmtp:{} packetization-mode=1; sprop-parameter-sets={},{}; profile-level-id={}",
            self.payload_type(),
            engine.encode(sps),
            engine.encode(pps),
            profile
        );
        let rtpmap = format!("a=rtpmap:{} H264/{}", self.payload_type(), self.default_clock_rate());
        vec![fmtp, rtpmap]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_nalu(buf: &[u8]) -> (Packet, Depacketized) {
        let mut p = H264Protocol::new();
        let mut pkt = Packet::default();
        let (_, rv) = p.parse_packet(&mut pkt, Some(buf), 1000, 0);
        (pkt, rv)
    }

    #[test]
    fn test_single_nalu_length_prefixed() {
        let (pkt, rv) = single_nalu(&[0x65, 0x01, 0x02, 0x03]);
        assert_eq!(rv, Depacketized::Complete);
        assert!(pkt.is_keyframe);
        assert_eq!(pkt.frame_type, 5);
        assert_eq!(pkt.data.as_ref(), &[0x00, 0x00, 0x00, 0x04, 0x65, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_stap_a_reframes_each_nalu() {
        // STAP-A header + two NALUs with 2-byte sizes
        let buf = [
            0x78, // STAP-A (type 24)
            0x00, 0x02, 0x09, 0xf0, //
            0x00, 0x03, 0x65, 0x11, 0x22,
        ];
        let (pkt, rv) = single_nalu(&buf);
        assert_eq!(rv, Depacketized::Complete);
        assert!(pkt.is_keyframe);
        assert_eq!(
            pkt.data.as_ref(),
            &[0x00, 0x00, 0x00, 0x02, 0x09, 0xf0, 0x00, 0x00, 0x00, 0x03, 0x65, 0x11, 0x22]
        );
    }

    #[test]
    fn test_fu_a_reassembly_byte_identical() {
        let nalu: Vec<u8> = std::iter::once(0x65u8)
            .chain((0..300).map(|i| (i % 251) as u8))
            .collect();

        let mut p = H264Protocol::new();
        let chunks: Vec<&[u8]> = nalu[1..].chunks(100).collect();
        let mut result = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut fu = Vec::new();
            fu.push((nalu[0] & 0xe0) | 28); // FU indicator
            let mut header = nalu[0] & NAL_MASK;
            if i == 0 {
                header |= 0x80;
            }
            if i == chunks.len() - 1 {
                header |= 0x40;
            }
            fu.push(header);
            fu.extend_from_slice(chunk);

            let mut pkt = Packet::default();
            let (_, rv) = p.parse_packet(&mut pkt, Some(&fu), 9000, 0);
            if i < chunks.len() - 1 {
                assert_eq!(rv, Depacketized::Pending);
            } else {
                assert_eq!(rv, Depacketized::Complete);
                result = Some(pkt);
            }
        }

        let pkt = result.unwrap();
        assert!(pkt.is_keyframe);
        // 4 字节大端长度前缀 + 原始 NALU
        assert_eq!(&pkt.data[0..4], &(nalu.len() as u32).to_be_bytes());
        assert_eq!(&pkt.data[4..], &nalu[..]);
    }

    #[test]
    fn test_fu_without_start_is_dropped() {
        let mut p = H264Protocol::new();
        let mut pkt = Packet::default();
        // end bit set but no start fragment seen
        let (_, rv) = p.parse_packet(&mut pkt, Some(&[0x7c, 0x45, 0xaa, 0xbb]), 0, 0);
        assert_eq!(rv, Depacketized::Pending);
        assert!(pkt.data.is_empty());
    }

    #[test]
    fn test_sps_pps_from_sdp() {
        let mut media = Media::default();
        // build a real SPS via the media-core parser test shape: use a
        // baseline SPS followed by a PPS
        let sps: Vec<u8> = {
            let mut v = vec![0x67, 0x42, 0x00, 0x1e];
            // pic params encoded as in media-core tests: reuse canned bytes
            v.extend([0x8c, 0x8d, 0x40, 0xa0, 0xf9, 0x00, 0xf0, 0x88, 0x46, 0xa0]);
            v
        };
        let pps = vec![0x68, 0xce, 0x06, 0xe2];
        let engine = &base64::engine::general_purpose::STANDARD;
        media.a_lines.insert(
            "sprop-parameter-sets".to_string(),
            format!("{},{}", engine.encode(&sps), engine.encode(&pps)),
        );

        let mut p = H264Protocol::new();
        p.parse_sdp(&media).unwrap();
        assert_eq!(p.sps, sps);
        assert_eq!(p.pps, pps);
    }

    #[test]
    fn test_in_band_sps_pps_updates_codec_data() {
        let mut p = H264Protocol::new();
        let mut pkt = Packet::default();

        // 构造可解析的 SPS（baseline, 640x480），走单 NALU 路径
        let sps = test_sps();
        let (_, rv) = p.parse_packet(&mut pkt, Some(&sps), 0, 0);
        assert_eq!(rv, Depacketized::Complete);
        assert!(p.codec_data().is_none()); // PPS 还没来

        let (_, rv) = p.parse_packet(&mut pkt, Some(&[0x68, 0xce, 0x06, 0xe2]), 0, 0);
        assert_eq!(rv, Depacketized::Complete);
        let cd = p.codec_data().unwrap();
        assert_eq!(cd.dimensions(), Some((640, 480)));
    }

    /// baseline 640x480 SPS（与 media-core 的 SPS 测试同构）
    fn test_sps() -> Vec<u8> {
        let mut bits: Vec<bool> = Vec::new();
        let mut put_bits = |bits: &mut Vec<bool>, v: u32, n: u32| {
            for i in (0..n).rev() {
                bits.push((v >> i) & 1 == 1);
            }
        };
        let mut put_ue = |bits: &mut Vec<bool>, v: u32| {
            let cw = v + 1;
            let nbits = 32 - cw.leading_zeros();
            for _ in 0..nbits - 1 {
                bits.push(false);
            }
            for i in (0..nbits).rev() {
                bits.push((cw >> i) & 1 == 1);
            }
        };
        put_bits(&mut bits, 66, 8);
        put_bits(&mut bits, 0, 8);
        put_bits(&mut bits, 30, 8);
        put_ue(&mut bits, 0); // sps id
        put_ue(&mut bits, 0); // log2_max_frame_num_minus4
        put_ue(&mut bits, 0); // pic_order_cnt_type
        put_ue(&mut bits, 0); // log2_max_pic_order_cnt_lsb_minus4
        put_ue(&mut bits, 1); // max_num_ref_frames
        put_bits(&mut bits, 0, 1); // gaps
        put_ue(&mut bits, 39); // width mbs - 1
        put_ue(&mut bits, 29); // height mbs - 1
        put_bits(&mut bits, 1, 1); // frame_mbs_only
        put_bits(&mut bits, 0, 1); // direct_8x8
        put_bits(&mut bits, 0, 1); // cropping
        put_bits(&mut bits, 0, 1); // vui

        let mut out = vec![0x67u8];
        let mut acc = 0u8;
        let mut n = 0;
        for b in bits {
            acc = (acc << 1) | b as u8;
            n += 1;
            if n == 8 {
                out.push(acc);
                acc = 0;
                n = 0;
            }
        }
        if n > 0 {
            out.push(acc << (8 - n));
        }
        out
    }
}
