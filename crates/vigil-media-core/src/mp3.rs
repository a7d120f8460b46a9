use crate::error::{MediaError, Result};

/// MPEG1 Layer III 比特率表 (kbps)
const BITRATES_V1_L3: [u32; 15] =
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
/// MPEG2/2.5 Layer III 比特率表 (kbps)
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATES_V1: [u32; 3] = [44100, 48000, 32000];

/// MPEG 音频帧头嗅探结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp3Info {
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate_kbps: u32,
}

/// 从帧同步字解析 MPEG 音频帧参数
pub fn parse_frame_header(data: &[u8]) -> Result<Mp3Info> {
    if data.len() < 4 {
        return Err(MediaError::Truncated { need: 4, got: data.len() });
    }
    if data[0] != 0xff || data[1] & 0xe0 != 0xe0 {
        return Err(MediaError::InvalidData("bad MPEG audio syncword".into()));
    }

    // B1: sync(3) version(2) layer(2) protection(1)
    let version = (data[1] >> 3) & 0x03; // 3=MPEG1, 2=MPEG2, 0=MPEG2.5
    let layer = (data[1] >> 1) & 0x03; // 1=Layer III
    if version == 1 || layer == 0 {
        return Err(MediaError::InvalidData("reserved MPEG audio version/layer".into()));
    }
    if layer != 1 {
        return Err(MediaError::Unsupported(format!("MPEG audio layer {}", 4 - layer)));
    }

    let bitrate_index = (data[2] >> 4) & 0x0f;
    let sample_rate_index = (data[2] >> 2) & 0x03;
    if bitrate_index == 0x0f || sample_rate_index == 3 {
        return Err(MediaError::InvalidData("bad MPEG audio rate index".into()));
    }

    let bitrate_kbps = match version {
        3 => BITRATES_V1_L3[bitrate_index as usize],
        _ => BITRATES_V2_L3[bitrate_index as usize],
    };
    let sample_rate = match version {
        3 => SAMPLE_RATES_V1[sample_rate_index as usize],
        2 => SAMPLE_RATES_V1[sample_rate_index as usize] / 2,
        _ => SAMPLE_RATES_V1[sample_rate_index as usize] / 4,
    };

    let channel_mode = (data[3] >> 6) & 0x03; // 3 = mono
    let channels = if channel_mode == 3 { 1 } else { 2 };

    Ok(Mp3Info { sample_rate, channels, bitrate_kbps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mpeg1_layer3() {
        // 0xfffb: MPEG1 Layer III no CRC; 0x90: 128kbps, 44100; 0x00: stereo
        let info = parse_frame_header(&[0xff, 0xfb, 0x90, 0x00]).unwrap();
        assert_eq!(info.bitrate_kbps, 128);
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
    }

    #[test]
    fn test_parse_mpeg2_mono() {
        // 0xfff3: MPEG2 Layer III; rate idx 0 -> 22050; channel mode 11 -> mono
        let info = parse_frame_header(&[0xff, 0xf3, 0x90, 0xc0]).unwrap();
        assert_eq!(info.sample_rate, 22050);
        assert_eq!(info.channels, 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_frame_header(&[0x00, 0x00, 0x00, 0x00]).is_err());
        assert!(parse_frame_header(&[0xff]).is_err());
    }
}
