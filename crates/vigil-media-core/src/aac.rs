use crate::error::{MediaError, Result};
use crate::types::CodecData;
use bytes::Bytes;

/// AudioSpecificConfig 采样率索引表
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// channel_configuration 对应的声道数
const CHANNEL_COUNTS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 8];

/// MPEG-4 AudioSpecificConfig
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mpeg4AudioConfig {
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub sample_rate: u32,
    pub channel_config: u8,
    pub channels: u8,
}

/// 解析 AudioSpecificConfig（SDP config= 字节）
pub fn parse_audio_specific_config(data: &[u8]) -> Result<Mpeg4AudioConfig> {
    if data.len() < 2 {
        return Err(MediaError::Truncated { need: 2, got: data.len() });
    }

    // 5 bits object type, 4 bits frequency index, 4 bits channel config
    let mut object_type = data[0] >> 3;
    let mut pos = 5u32;
    if object_type == 31 {
        // escape: 6 more bits, value + 32
        let ext = ((data[0] as u32) << 8 | data[1] as u32) >> (16 - 5 - 6) & 0x3f;
        object_type = ext as u8 + 32;
        pos += 6;
    }

    let read_bits = |start: u32, n: u32| -> Result<u32> {
        let end = (start + n + 7) / 8;
        if end as usize > data.len() {
            return Err(MediaError::Truncated {
                need: end as usize,
                got: data.len(),
            });
        }
        let mut v = 0u32;
        for i in start..start + n {
            let bit = (data[(i / 8) as usize] >> (7 - i % 8)) & 1;
            v = (v << 1) | bit as u32;
        }
        Ok(v)
    };

    let sample_rate_index = read_bits(pos, 4)? as u8;
    pos += 4;
    let sample_rate = if sample_rate_index == 0x0f {
        let v = read_bits(pos, 24)?;
        pos += 24;
        v
    } else if (sample_rate_index as usize) < SAMPLE_RATES.len() {
        SAMPLE_RATES[sample_rate_index as usize]
    } else {
        return Err(MediaError::InvalidData(format!(
            "bad sample rate index {}",
            sample_rate_index
        )));
    };

    let channel_config = read_bits(pos, 4)? as u8;
    let channels = if (channel_config as usize) < CHANNEL_COUNTS.len() {
        CHANNEL_COUNTS[channel_config as usize]
    } else {
        return Err(MediaError::InvalidData(format!(
            "bad channel config {}",
            channel_config
        )));
    };

    Ok(Mpeg4AudioConfig {
        object_type,
        sample_rate_index,
        sample_rate,
        channel_config,
        channels,
    })
}

/// 编码两字节 AudioSpecificConfig
pub fn make_audio_specific_config(object_type: u8, sample_rate_index: u8, channel_config: u8) -> [u8; 2] {
    let v: u16 = ((object_type as u16) << 11)
        | ((sample_rate_index as u16) << 7)
        | ((channel_config as u16) << 3);
    v.to_be_bytes()
}

/// 由 config 字节构造 AAC CodecData
pub fn codec_data_from_config(config: &[u8]) -> Result<CodecData> {
    let parsed = parse_audio_specific_config(config)?;
    Ok(CodecData::Aac {
        config: Bytes::copy_from_slice(config),
        sample_rate: parsed.sample_rate,
        channels: parsed.channels,
    })
}

/// ADTS 帧头解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub config: Mpeg4AudioConfig,
    pub header_len: usize,
    pub frame_len: usize,
    pub samples: u32,
}

/// 解析一个 ADTS 帧头
pub fn parse_adts_header(data: &[u8]) -> Result<AdtsHeader> {
    if data.len() < 7 {
        return Err(MediaError::Truncated { need: 7, got: data.len() });
    }
    if data[0] != 0xff || data[1] & 0xf0 != 0xf0 {
        return Err(MediaError::InvalidData("bad ADTS syncword".into()));
    }

    let protection_absent = data[1] & 0x01 != 0;
    let profile = (data[2] >> 6) & 0x03; // object type - 1
    let sample_rate_index = (data[2] >> 2) & 0x0f;
    let channel_config = ((data[2] & 0x01) << 2) | (data[3] >> 6);
    let frame_len = ((data[3] as usize & 0x03) << 11) | ((data[4] as usize) << 3) | (data[5] as usize >> 5);
    let raw_blocks = data[6] & 0x03;

    if (sample_rate_index as usize) >= SAMPLE_RATES.len() {
        return Err(MediaError::InvalidData(format!(
            "bad ADTS sample rate index {}",
            sample_rate_index
        )));
    }
    let header_len = if protection_absent { 7 } else { 9 };
    if frame_len < header_len {
        return Err(MediaError::InvalidData("ADTS frame length too small".into()));
    }

    Ok(AdtsHeader {
        config: Mpeg4AudioConfig {
            object_type: profile + 1,
            sample_rate_index,
            sample_rate: SAMPLE_RATES[sample_rate_index as usize],
            channel_config,
            channels: CHANNEL_COUNTS[channel_config as usize & 0x07],
        },
        header_len,
        frame_len,
        samples: 1024 * (raw_blocks as u32 + 1),
    })
}
