use crate::{Result, TsError};
use std::time::Duration;

pub const TS_PACKET_SIZE: usize = 188;

/// PMT 里的流类型
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_ADTS_AAC: u8 = 0x0f;

pub fn is_video_stream_type(t: u8) -> bool {
    t == STREAM_TYPE_H264
}

pub fn is_audio_stream_type(t: u8) -> bool {
    t == STREAM_TYPE_ADTS_AAC
}

/// 一个 188 字节 TS 包的头部字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub pid: u16,
    /// payload_unit_start_indicator
    pub start: bool,
    /// 自适应域 random_access_indicator，作关键帧标记
    pub keyframe: bool,
    pub header_len: usize,
    pub has_payload: bool,
}

/// 解析 TS 包头（含自适应域长度）
pub fn parse_ts_header(packet: &[u8]) -> Result<TsHeader> {
    if packet.len() != TS_PACKET_SIZE {
        return Err(TsError::InvalidData(format!("ts packet size {}", packet.len())));
    }
    if packet[0] != 0x47 {
        return Err(TsError::InvalidData("bad sync byte".into()));
    }

    let start = packet[1] & 0x40 != 0;
    let pid = (((packet[1] & 0x1f) as u16) << 8) | packet[2] as u16;
    let adaptation = packet[3] & 0x20 != 0;
    let has_payload = packet[3] & 0x10 != 0;

    let mut header_len = 4;
    let mut keyframe = false;
    if adaptation {
        let af_len = packet[4] as usize;
        if 5 + af_len > TS_PACKET_SIZE {
            return Err(TsError::InvalidData("bad adaptation field length".into()));
        }
        if af_len > 0 {
            keyframe = packet[5] & 0x40 != 0;
        }
        header_len = 5 + af_len;
    }

    Ok(TsHeader {
        pid,
        start,
        keyframe,
        header_len,
        has_payload,
    })
}

/// 解析 PSI 公共头，返回 (表 id, 数据起点, 数据长度)
///
/// 数据长度不含 5 字节扩展头和 4 字节 CRC。
pub fn parse_psi(payload: &[u8]) -> Result<(u8, usize, usize)> {
    if payload.is_empty() {
        return Err(TsError::InvalidData("empty PSI".into()));
    }
    let pointer = payload[0] as usize;
    let base = 1 + pointer;
    if base + 8 > payload.len() {
        return Err(TsError::InvalidData("short PSI header".into()));
    }
    let table_id = payload[base];
    let section_len = (((payload[base + 1] & 0x0f) as usize) << 8) | payload[base + 2] as usize;
    if section_len < 9 {
        return Err(TsError::InvalidData("short PSI section".into()));
    }
    // section header (3) + extension (5) consumed; trailing CRC32 excluded
    let hdr_len = base + 3 + 5;
    let data_len = section_len - 5 - 4;
    if hdr_len + data_len > payload.len() {
        return Err(TsError::InvalidData("truncated PSI section".into()));
    }
    Ok((table_id, hdr_len, data_len))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub program_map_pid: u16,
}

/// Program Association Table
#[derive(Debug, Clone, Default)]
pub struct Pat {
    pub entries: Vec<PatEntry>,
}

impl Pat {
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = data;
        while rest.len() >= 4 {
            let program_number = u16::from_be_bytes([rest[0], rest[1]]);
            let pid = u16::from_be_bytes([rest[2], rest[3]]) & 0x1fff;
            if program_number != 0 {
                entries.push(PatEntry {
                    program_number,
                    program_map_pid: pid,
                });
            }
            rest = &rest[4..];
        }
        Ok(Self { entries })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
}

/// Program Map Table
#[derive(Debug, Clone, Default)]
pub struct Pmt {
    pub pcr_pid: u16,
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

impl Pmt {
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(TsError::InvalidData("short PMT".into()));
        }
        let pcr_pid = u16::from_be_bytes([data[0], data[1]]) & 0x1fff;
        let program_info_len = ((data[2] & 0x0f) as usize) << 8 | data[3] as usize;
        let mut rest = data
            .get(4 + program_info_len..)
            .ok_or_else(|| TsError::InvalidData("bad program info length".into()))?;

        let mut infos = Vec::new();
        while rest.len() >= 5 {
            let stream_type = rest[0];
            let pid = u16::from_be_bytes([rest[1], rest[2]]) & 0x1fff;
            let es_info_len = ((rest[3] & 0x0f) as usize) << 8 | rest[4] as usize;
            infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid: pid,
            });
            rest = rest
                .get(5 + es_info_len..)
                .ok_or_else(|| TsError::InvalidData("bad ES info length".into()))?;
        }
        Ok(Self {
            pcr_pid,
            elementary_stream_infos: infos,
        })
    }
}

/// PES 头解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    pub header_len: usize,
    /// 0 表示长度未知（视频常见）
    pub data_len: usize,
    pub pts: Option<Duration>,
    pub dts: Option<Duration>,
}

fn parse_pes_time(b: &[u8]) -> Duration {
    // 33-bit timestamp spread over 5 bytes, 90 kHz
    let v = (((b[0] as u64) >> 1) & 0x07) << 30
        | (b[1] as u64) << 22
        | (((b[2] as u64) >> 1) & 0x7f) << 15
        | (b[3] as u64) << 7
        | ((b[4] as u64) >> 1) & 0x7f;
    Duration::from_nanos(v * 1_000_000_000 / 90000)
}

/// 解析 PES 包头，取出 PTS/DTS
pub fn parse_pes_header(payload: &[u8]) -> Result<PesHeader> {
    if payload.len() < 9 {
        return Err(TsError::InvalidData("short PES header".into()));
    }
    if payload[0] != 0 || payload[1] != 0 || payload[2] != 1 {
        return Err(TsError::InvalidData("bad PES start code".into()));
    }
    let stream_id = payload[3];
    let pes_packet_len = u16::from_be_bytes([payload[4], payload[5]]) as usize;
    let pts_dts_flags = (payload[7] >> 6) & 0x03;
    let header_data_len = payload[8] as usize;
    let header_len = 9 + header_data_len;
    if header_len > payload.len() {
        return Err(TsError::InvalidData("truncated PES header".into()));
    }

    let mut pts = None;
    let mut dts = None;
    if pts_dts_flags & 0x02 != 0 && header_data_len >= 5 {
        pts = Some(parse_pes_time(&payload[9..14]));
    }
    if pts_dts_flags == 0x03 && header_data_len >= 10 {
        dts = Some(parse_pes_time(&payload[14..19]));
    }

    // PES_packet_length counts everything after its own field
    let data_len = if pes_packet_len == 0 {
        0
    } else {
        pes_packet_len.saturating_sub(3 + header_data_len)
    };

    Ok(PesHeader {
        stream_id,
        header_len,
        data_len,
        pts,
        dts,
    })
}
