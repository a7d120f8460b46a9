use crate::error::{MediaError, Result};
use bytes::{BufMut, Bytes, BytesMut};

pub const NALU_NON_IDR: u8 = 1;
pub const NALU_IDR: u8 = 5;
pub const NALU_SEI: u8 = 6;
pub const NALU_SPS: u8 = 7;
pub const NALU_PPS: u8 = 8;

/// NALU 裸流封装格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluFormat {
    /// 单个裸 NALU
    Raw,
    /// 00 00 01 起始码分隔
    AnnexB,
    /// 4 字节大端长度前缀
    Avcc,
}

pub fn nalu_type(header: u8) -> u8 {
    header & 0x1f
}

/// 拆分一段可能是 Annex-B 或 AVCC 封装的 NALU 序列
///
/// 无法识别封装时按单个裸 NALU 返回。
pub fn split_nalus(data: &[u8]) -> (Vec<Bytes>, NaluFormat) {
    if data.len() < 4 {
        return (vec![Bytes::copy_from_slice(data)], NaluFormat::Raw);
    }

    // Annex-B: leading 00 00 01 / 00 00 00 01
    if data[0] == 0 && data[1] == 0 && (data[2] == 1 || (data[2] == 0 && data[3] == 1)) {
        let mut nalus = Vec::new();
        let mut pos = None;
        let mut i = 0;
        while i + 2 < data.len() {
            if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
                if let Some(start) = pos {
                    let mut end = i;
                    // trailing zero of a 4-byte start code belongs to the next code
                    if end > start && data[end - 1] == 0 {
                        end -= 1;
                    }
                    nalus.push(Bytes::copy_from_slice(&data[start..end]));
                }
                pos = Some(i + 3);
                i += 3;
            } else {
                i += 1;
            }
        }
        if let Some(start) = pos {
            nalus.push(Bytes::copy_from_slice(&data[start..]));
        }
        return (nalus, NaluFormat::AnnexB);
    }

    // AVCC: consecutive 4-byte big-endian length prefixes covering the buffer
    let mut nalus = Vec::new();
    let mut rest = data;
    loop {
        if rest.is_empty() {
            return (nalus, NaluFormat::Avcc);
        }
        if rest.len() < 4 {
            break;
        }
        let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if size == 0 || 4 + size > rest.len() {
            break;
        }
        nalus.push(Bytes::copy_from_slice(&rest[4..4 + size]));
        rest = &rest[4 + size..];
    }

    (vec![Bytes::copy_from_slice(data)], NaluFormat::Raw)
}

/// SPS 中解出的序列级参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize, // in bits
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<u32> {
        let byte = self.pos / 8;
        if byte >= self.data.len() {
            return Err(MediaError::Truncated {
                need: byte + 1,
                got: self.data.len(),
            });
        }
        let bit = (self.data[byte] >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit as u32)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32> {
        let mut v = 0;
        for _ in 0..n {
            v = (v << 1) | self.read_bit()?;
        }
        Ok(v)
    }

    /// 无符号指数哥伦布码
    fn read_ue(&mut self) -> Result<u32> {
        let mut zeros = 0;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 31 {
                return Err(MediaError::InvalidData("exp-golomb prefix too long".into()));
            }
        }
        let suffix = self.read_bits(zeros)?;
        Ok((1 << zeros) - 1 + suffix)
    }

    /// 有符号指数哥伦布码
    fn read_se(&mut self) -> Result<i32> {
        let v = self.read_ue()?;
        if v % 2 == 0 {
            Ok(-((v / 2) as i32))
        } else {
            Ok((v / 2 + 1) as i32)
        }
    }
}

/// 去除 00 00 03 防竞争字节
fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

fn skip_scaling_list(r: &mut BitReader, size: u32) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// 解析 SPS，取出 profile/level 与图像宽高
///
/// 输入为裸 SPS NALU（含 NAL 头字节，不含起始码）。
pub fn parse_sps(sps: &[u8]) -> Result<SpsInfo> {
    if sps.len() < 4 {
        return Err(MediaError::Truncated { need: 4, got: sps.len() });
    }
    if nalu_type(sps[0]) != NALU_SPS {
        return Err(MediaError::InvalidData(format!(
            "not an SPS NALU: type {}",
            nalu_type(sps[0])
        )));
    }

    let rbsp = strip_emulation_prevention(&sps[1..]);
    let mut r = BitReader::new(&rbsp);

    let mut info = SpsInfo {
        profile_idc: r.read_bits(8)? as u8,
        constraint_flags: r.read_bits(8)? as u8,
        level_idc: r.read_bits(8)? as u8,
        ..Default::default()
    };
    let _sps_id = r.read_ue()?;

    let mut chroma_format_idc = 1;
    if matches!(
        info.profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
    ) {
        chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            let _separate_colour_plane = r.read_bit()?;
        }
        let _bit_depth_luma = r.read_ue()?;
        let _bit_depth_chroma = r.read_ue()?;
        let _qpprime = r.read_bit()?;
        if r.read_bit()? == 1 {
            // seq_scaling_matrix_present_flag
            let count = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..count {
                if r.read_bit()? == 1 {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num = r.read_ue()?;
    let pic_order_cnt_type = r.read_ue()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_poc_lsb = r.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_pic_order_always_zero = r.read_bit()?;
        let _offset_for_non_ref_pic = r.read_se()?;
        let _offset_for_top_to_bottom = r.read_se()?;
        let num_ref_frames_in_cycle = r.read_ue()?;
        for _ in 0..num_ref_frames_in_cycle {
            let _ = r.read_se()?;
        }
    }
    let _max_num_ref_frames = r.read_ue()?;
    let _gaps_in_frame_num = r.read_bit()?;

    let pic_width_in_mbs = r.read_ue()? + 1;
    let pic_height_in_map_units = r.read_ue()? + 1;
    let frame_mbs_only = r.read_bit()?;
    if frame_mbs_only == 0 {
        let _mb_adaptive = r.read_bit()?;
    }
    let _direct_8x8 = r.read_bit()?;

    let mut width = pic_width_in_mbs * 16;
    let mut height = (2 - frame_mbs_only) * pic_height_in_map_units * 16;

    if r.read_bit()? == 1 {
        // frame_cropping_flag; assume 4:2:0 crop units unless monochrome
        let crop_left = r.read_ue()?;
        let crop_right = r.read_ue()?;
        let crop_top = r.read_ue()?;
        let crop_bottom = r.read_ue()?;
        let (sub_w, sub_h) = if chroma_format_idc == 0 { (1, 1) } else { (2, 2) };
        width = width.saturating_sub((crop_left + crop_right) * sub_w);
        height = height.saturating_sub((crop_top + crop_bottom) * sub_h * (2 - frame_mbs_only));
    }

    info.width = width;
    info.height = height;
    Ok(info)
}

/// a=fmtp 中 profile-level-id 串
pub fn profile_level_id(info: &SpsInfo) -> String {
    format!("{:02x}{:02x}{:02x}", info.profile_idc, info.constraint_flags, info.level_idc)
}

/// 组装一条 SEI NALU（NAL 头 + 类型/长度变长字段 + 负载 + rbsp 结尾）
pub fn marshal_sei(payload_type: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    buf.put_u8(NALU_SEI);
    let mut t = payload_type;
    while t >= 255 {
        buf.put_u8(0xff);
        t -= 255;
    }
    buf.put_u8(t as u8);
    let mut sz = payload.len();
    while sz >= 255 {
        buf.put_u8(0xff);
        sz -= 255;
    }
    buf.put_u8(sz as u8);
    buf.put_slice(payload);
    // rbsp_trailing_bits
    buf.put_u8(0x80);
    buf.freeze()
}

/// 解析一条 SEI NALU，返回 (负载类型, 负载)
pub fn parse_sei(nalu: &[u8]) -> Result<(u32, Bytes)> {
    if nalu.len() < 3 {
        return Err(MediaError::Truncated { need: 3, got: nalu.len() });
    }
    if nalu_type(nalu[0]) != NALU_SEI {
        return Err(MediaError::InvalidData(format!(
            "not a SEI NALU: type {}",
            nalu_type(nalu[0])
        )));
    }
    let mut pos = 1;
    let mut payload_type = 0u32;
    while pos < nalu.len() && nalu[pos] == 0xff {
        payload_type += 255;
        pos += 1;
    }
    if pos >= nalu.len() {
        return Err(MediaError::Truncated { need: pos + 1, got: nalu.len() });
    }
    payload_type += nalu[pos] as u32;
    pos += 1;

    let mut payload_size = 0usize;
    while pos < nalu.len() && nalu[pos] == 0xff {
        payload_size += 255;
        pos += 1;
    }
    if pos >= nalu.len() {
        return Err(MediaError::Truncated { need: pos + 1, got: nalu.len() });
    }
    payload_size += nalu[pos] as usize;
    pos += 1;

    if pos + payload_size > nalu.len() {
        return Err(MediaError::Truncated {
            need: pos + payload_size,
            got: nalu.len(),
        });
    }
    Ok((payload_type, Bytes::copy_from_slice(&nalu[pos..pos + payload_size])))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试用指数哥伦布写入器
    struct BitWriter {
        out: Vec<u8>,
        acc: u8,
        nbits: u8,
    }

    impl BitWriter {
        fn new() -> Self {
            Self { out: Vec::new(), acc: 0, nbits: 0 }
        }

        fn put_bit(&mut self, b: u32) {
            self.acc = (self.acc << 1) | (b as u8 & 1);
            self.nbits += 1;
            if self.nbits == 8 {
                self.out.push(self.acc);
                self.acc = 0;
                self.nbits = 0;
            }
        }

        fn put_bits(&mut self, v: u32, n: u32) {
            for i in (0..n).rev() {
                self.put_bit((v >> i) & 1);
            }
        }

        fn put_ue(&mut self, v: u32) {
            let cw = v + 1;
            let nbits = 32 - cw.leading_zeros();
            for _ in 0..nbits - 1 {
                self.put_bit(0);
            }
            self.put_bits(cw, nbits);
        }

        fn finish(mut self) -> Vec<u8> {
            while self.nbits != 0 {
                self.put_bit(0);
            }
            self.out
        }
    }

    fn build_sps(width_mbs: u32, height_mbs: u32) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bits(66, 8); // profile_idc: baseline
        w.put_bits(0, 8); // constraint flags
        w.put_bits(30, 8); // level_idc
        w.put_ue(0); // sps_id
        w.put_ue(0); // log2_max_frame_num_minus4
        w.put_ue(0); // pic_order_cnt_type
        w.put_ue(0); // log2_max_pic_order_cnt_lsb_minus4
        w.put_ue(1); // max_num_ref_frames
        w.put_bit(0); // gaps_in_frame_num
        w.put_ue(width_mbs - 1);
        w.put_ue(height_mbs - 1);
        w.put_bit(1); // frame_mbs_only
        w.put_bit(0); // direct_8x8
        w.put_bit(0); // frame_cropping
        w.put_bit(0); // vui_parameters_present
        let mut sps = vec![0x67];
        sps.extend(w.finish());
        sps
    }

    #[test]
    fn test_parse_sps_dimensions() {
        let sps = build_sps(40, 30);
        let info = parse_sps(&sps).unwrap();
        assert_eq!(info.profile_idc, 66);
        assert_eq!(info.level_idc, 30);
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 480);
        assert_eq!(profile_level_id(&info), "42001e");
    }

    #[test]
    fn test_parse_sps_rejects_non_sps() {
        assert!(parse_sps(&[0x65, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_split_nalus_annexb() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0xaa, //
            0x00, 0x00, 0x01, 0x68, 0xbb, //
            0x00, 0x00, 0x00, 0x01, 0x65, 0xcc, 0xdd,
        ];
        let (nalus, format) = split_nalus(&data);
        assert_eq!(format, NaluFormat::AnnexB);
        assert_eq!(nalus.len(), 3);
        assert_eq!(nalus[0].as_ref(), &[0x67, 0xaa]);
        assert_eq!(nalus[1].as_ref(), &[0x68, 0xbb]);
        assert_eq!(nalus[2].as_ref(), &[0x65, 0xcc, 0xdd]);
    }

    #[test]
    fn test_split_nalus_avcc() {
        let data = [
            0x00, 0x00, 0x00, 0x02, 0x67, 0xaa, //
            0x00, 0x00, 0x00, 0x03, 0x65, 0xcc, 0xdd,
        ];
        let (nalus, format) = split_nalus(&data);
        assert_eq!(format, NaluFormat::Avcc);
        assert_eq!(nalus.len(), 2);
        assert_eq!(nalus[1].as_ref(), &[0x65, 0xcc, 0xdd]);
    }

    #[test]
    fn test_split_nalus_raw() {
        let data = [0x65, 0x01, 0x02, 0x03, 0x04];
        let (nalus, format) = split_nalus(&data);
        assert_eq!(format, NaluFormat::Raw);
        assert_eq!(nalus.len(), 1);
        assert_eq!(nalus[0].as_ref(), &data[..]);
    }

    #[test]
    fn test_sei_round_trip() {
        let payload = vec![0x42u8; 300];
        let nalu = marshal_sei(5, &payload);
        let (ty, parsed) = parse_sei(&nalu).unwrap();
        assert_eq!(ty, 5);
        assert_eq!(parsed.len(), payload.len());
        assert_eq!(parsed.as_ref(), &payload[..]);
    }

    #[test]
    fn test_sei_round_trip_large_type() {
        let payload = b"overlay".to_vec();
        let nalu = marshal_sei(500, &payload);
        let (ty, parsed) = parse_sei(&nalu).unwrap();
        assert_eq!(ty, 500);
        assert_eq!(parsed.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_emulation_prevention_strip() {
        let data = [0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00];
        assert_eq!(strip_emulation_prevention(&data), vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00]);
    }
}
