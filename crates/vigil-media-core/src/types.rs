use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// 音视频编码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CodecType {
    H264,
    H265,
    Aac,
    Mjpeg,
    Mpeg1,
    Mpeg2,
    PcmAlaw,
    PcmMulaw,
    Mp3,
}

impl CodecType {
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            CodecType::H264 | CodecType::H265 | CodecType::Mjpeg | CodecType::Mpeg1 | CodecType::Mpeg2
        )
    }

    pub fn is_audio(&self) -> bool {
        !self.is_video()
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecType::H264 => "H264",
            CodecType::H265 => "H265",
            CodecType::Aac => "AAC",
            CodecType::Mjpeg => "MJPEG",
            CodecType::Mpeg1 => "MPEG1",
            CodecType::Mpeg2 => "MPEG2",
            CodecType::PcmAlaw => "PCM_ALAW",
            CodecType::PcmMulaw => "PCM_MULAW",
            CodecType::Mp3 => "MP3",
        };
        write!(f, "{}", name)
    }
}

/// 解码器初始化参数（编码类型 + 编码专有配置）
///
/// 一旦从 SDP 或带内参数集拿到完整参数就创建，之后不再修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecData {
    H264 {
        sps: Bytes,
        pps: Bytes,
        width: u32,
        height: u32,
    },
    H265 {
        vps: Bytes,
        sps: Bytes,
        pps: Bytes,
        width: u32,
        height: u32,
    },
    Aac {
        config: Bytes,
        sample_rate: u32,
        channels: u8,
    },
    Mjpeg {
        width: u32,
        height: u32,
    },
    Mpeg12 {
        codec: CodecType,
        width: u32,
        height: u32,
        extra: Bytes,
    },
    PcmAlaw {
        sample_rate: u32,
    },
    PcmMulaw {
        sample_rate: u32,
    },
    Mp3 {
        sample_rate: u32,
        channels: u8,
    },
}

impl CodecData {
    pub fn codec_type(&self) -> CodecType {
        match self {
            CodecData::H264 { .. } => CodecType::H264,
            CodecData::H265 { .. } => CodecType::H265,
            CodecData::Aac { .. } => CodecType::Aac,
            CodecData::Mjpeg { .. } => CodecType::Mjpeg,
            CodecData::Mpeg12 { codec, .. } => *codec,
            CodecData::PcmAlaw { .. } => CodecType::PcmAlaw,
            CodecData::PcmMulaw { .. } => CodecType::PcmMulaw,
            CodecData::Mp3 { .. } => CodecType::Mp3,
        }
    }

    /// 视频宽高（仅视频编码返回）
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            CodecData::H264 { width, height, .. }
            | CodecData::H265 { width, height, .. }
            | CodecData::Mjpeg { width, height }
            | CodecData::Mpeg12 { width, height, .. } => Some((*width, *height)),
            _ => None,
        }
    }

    /// 音频采样率（仅音频编码返回）
    pub fn sample_rate(&self) -> Option<u32> {
        match self {
            CodecData::Aac { sample_rate, .. }
            | CodecData::PcmAlaw { sample_rate }
            | CodecData::PcmMulaw { sample_rate }
            | CodecData::Mp3 { sample_rate, .. } => Some(*sample_rate),
            _ => None,
        }
    }
}

/// 重组完成的访问单元
#[derive(Debug, Clone, Default)]
pub struct Packet {
    /// 编码类型（重组方填写）
    pub codec: Option<CodecType>,
    /// 关键帧标记
    pub is_keyframe: bool,
    /// NALU 帧类型字节
    pub frame_type: u8,
    /// 所属流序号
    pub stream_idx: i8,
    /// 解码时间（未定时为 None）
    pub time: Option<Duration>,
    /// B 帧重排偏移（pts - dts）
    pub composition_time: Duration,
    /// 负载数据
    pub data: Bytes,
    /// 带外附加数据（如流结束标记）
    pub extra: Option<Bytes>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_type_classes() {
        assert!(CodecType::H264.is_video());
        assert!(CodecType::Mjpeg.is_video());
        assert!(CodecType::Aac.is_audio());
        assert!(CodecType::PcmMulaw.is_audio());
        assert_eq!(CodecType::H265.to_string(), "H265");
    }

    #[test]
    fn test_codec_data_accessors() {
        let cd = CodecData::H264 {
            sps: Bytes::from_static(&[0x67]),
            pps: Bytes::from_static(&[0x68]),
            width: 1920,
            height: 1080,
        };
        assert_eq!(cd.codec_type(), CodecType::H264);
        assert_eq!(cd.dimensions(), Some((1920, 1080)));
        assert_eq!(cd.sample_rate(), None);

        let cd = CodecData::Aac {
            config: Bytes::from_static(&[0x12, 0x10]),
            sample_rate: 44100,
            channels: 2,
        };
        assert_eq!(cd.sample_rate(), Some(44100));
    }
}
