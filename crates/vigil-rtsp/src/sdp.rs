use bytes::Bytes;
use std::collections::HashMap;
use vigil_media_core::{CodecData, CodecType};

/// SDP 中的一个媒体描述（一段 m= 及其后续 a= 行）
#[derive(Debug, Clone, Default)]
pub struct Media {
    /// audio / video / application
    pub av_type: String,
    /// 识别出的编码类型（动态负载按 rtpmap 判断）
    pub codec: Option<CodecType>,
    /// RTP 时钟频率
    pub time_scale: u32,
    /// a=control 相对流地址
    pub control: String,
    pub rtpmap: u32,
    /// fmtp config= 的十六进制解码
    pub config: Bytes,
    pub payload_type: u8,
    pub size_length: u32,
    pub index_length: u32,
    /// 其余 fmtp 子键
    pub a_lines: HashMap<String, String>,
}

/// DESCRIBE 得到的完整会话描述
#[derive(Debug, Clone, Default)]
pub struct SdpInfo {
    /// u= 行
    pub uri: String,
    /// a=range:npt=start-end，点播范围（秒）
    pub range_start: f64,
    pub range_end: f64,
    pub medias: Vec<Media>,
    /// 每路流已发现的解码参数（与 medias 对齐）
    pub codec_datas: Vec<Option<CodecData>>,
    /// 未归入媒体段的其他行，按类型字符分组
    pub extra_lines: HashMap<String, Vec<String>>,
}

/// 解析 SDP 文本
pub fn parse(content: &str) -> SdpInfo {
    let mut sdp = SdpInfo::default();
    let mut medias: Vec<Media> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        let Some((typ, value)) = line.split_once('=') else {
            continue;
        };

        match typ {
            "m" => {
                // m=video 0 RTP/AVP 96
                let mut media = Media::default();
                let mut fields = value.splitn(2, ' ');
                media.av_type = fields.next().unwrap_or_default().to_string();
                if let Some(rest) = fields.next() {
                    let mfields: Vec<&str> = rest.split(' ').collect();
                    if mfields.len() >= 3 {
                        media.payload_type = mfields[2].parse().unwrap_or(0);
                    }
                }
                medias.push(media);
            }
            "u" => {
                sdp.uri = value.to_string();
            }
            "a" => {
                if value == "h264-esid:201" && medias.is_empty() {
                    sdp.extra_lines.entry("a".to_string()).or_default().push(value.to_string());
                    continue;
                }

                // a=range:npt=0-60.120
                if let Some(range) = value.strip_prefix("range:") {
                    if let Some((_, times)) = range.split_once('=') {
                        if let Some((start, end)) = times.split_once('-') {
                            sdp.range_start = start.parse().unwrap_or(0.0);
                            sdp.range_end = end.parse().unwrap_or(0.0);
                        }
                    }
                    continue;
                }

                let Some(media) = medias.last_mut() else {
                    sdp.extra_lines.entry("a".to_string()).or_default().push(value.to_string());
                    continue;
                };

                for field in value.split(' ') {
                    if let Some((key, val)) = field.split_once(':') {
                        match key {
                            "control" => media.control = val.to_string(),
                            "rtpmap" => {
                                let rtpmap: u32 = val.parse().unwrap_or(u32::MAX);
                                if rtpmap == media.payload_type as u32 {
                                    media.rtpmap = rtpmap;
                                }
                            }
                            _ => {}
                        }
                    }

                    // H264/90000 style encoding/clock pairs
                    let keyval: Vec<&str> = field.split('/').collect();
                    if keyval.len() >= 2 {
                        match keyval[0].to_ascii_uppercase().as_str() {
                            "MPEG4-GENERIC" => media.codec = Some(CodecType::Aac),
                            "H264" => media.codec = Some(CodecType::H264),
                            "H265" | "HEVC" => media.codec = Some(CodecType::H265),
                            _ => {}
                        }
                        if let Ok(scale) = keyval[1].parse::<u32>() {
                            media.time_scale = scale;
                        }
                    }

                    // fmtp sub-keys: config=...;sizelength=13;...
                    let parts: Vec<&str> = field.split(';').collect();
                    if parts.len() > 1 {
                        for part in parts {
                            if let Some((key, val)) = part.split_once('=') {
                                let key = key.trim();
                                match key {
                                    "config" => {
                                        media.config =
                                            Bytes::from(hex::decode(val).unwrap_or_default());
                                    }
                                    "sizelength" => {
                                        media.size_length = val.parse().unwrap_or(0);
                                    }
                                    "indexlength" => {
                                        media.index_length = val.parse().unwrap_or(0);
                                    }
                                    _ => {
                                        media.a_lines.insert(key.to_string(), val.to_string());
                                    }
                                }
                            }
                        }
                    }
                }
            }
            _ => {
                if medias.is_empty() {
                    sdp.extra_lines
                        .entry(typ.to_string())
                        .or_default()
                        .push(value.to_string());
                }
            }
        }
    }

    sdp.codec_datas = vec![None; medias.len()];
    sdp.medias = medias;
    sdp
}

impl Media {
    /// 取一个 fmtp 子键的 base64 解码值
    pub fn a_line_base64(&self, key: &str) -> Option<Vec<u8>> {
        use base64::Engine as _;
        let v = self.a_lines.get(key)?;
        base64::engine::general_purpose::STANDARD.decode(v.trim()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_media() {
        let sdp = "v=0\r\n\
                   o=- 0 0 IN IP4 192.168.1.100\r\n\
                   s=RTSP Session\r\n\
                   m=video 0 RTP/AVP 96\r\n\
                   a=rtpmap:96 H264/90000\r\n\
                   a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAHg==,aM4G4g==\r\n\
                   a=control:track1\r\n";
        let info = parse(sdp);
        assert_eq!(info.medias.len(), 1);
        let m = &info.medias[0];
        assert_eq!(m.av_type, "video");
        assert_eq!(m.payload_type, 96);
        assert_eq!(m.codec, Some(CodecType::H264));
        assert_eq!(m.time_scale, 90000);
        assert_eq!(m.control, "track1");
        assert_eq!(m.a_lines.get("packetization-mode").map(String::as_str), Some("1"));
        let sprop = m.a_lines.get("sprop-parameter-sets").unwrap();
        assert!(sprop.starts_with("Z0IAHg=="));
    }

    #[test]
    fn test_parse_aac_config() {
        let sdp = "m=audio 0 RTP/AVP 97\r\n\
                   a=rtpmap:97 MPEG4-GENERIC/44100/2\r\n\
                   a=fmtp:97 profile-level-id=1;mode=AAC-hbr;config=1210;sizelength=13;indexlength=3\r\n";
        let info = parse(sdp);
        let m = &info.medias[0];
        assert_eq!(m.codec, Some(CodecType::Aac));
        assert_eq!(m.time_scale, 44100);
        assert_eq!(m.config.as_ref(), &[0x12, 0x10]);
        assert_eq!(m.size_length, 13);
        assert_eq!(m.index_length, 3);
    }

    #[test]
    fn test_parse_range_and_extra_lines() {
        let sdp = "v=0\r\n\
                   s=Media Presentation\r\n\
                   a=tool:LIVE555 Streaming Media v2016.01.29\r\n\
                   a=range:npt=0-60.120\r\n\
                   m=video 0 RTP/AVP 26\r\n\
                   a=control:track1\r\n";
        let info = parse(sdp);
        assert!((info.range_start - 0.0).abs() < f64::EPSILON);
        assert!((info.range_end - 60.120).abs() < 1e-9);
        assert_eq!(info.extra_lines.get("s").unwrap()[0], "Media Presentation");
        assert!(info.extra_lines.get("a").unwrap()[0].starts_with("tool:LIVE555"));
        assert_eq!(info.medias[0].payload_type, 26);
    }

    #[test]
    fn test_parse_multiple_medias() {
        let sdp = "m=video 0 RTP/AVP 96\r\n\
                   a=control:streamid=0\r\n\
                   a=rtpmap:96 H265/90000\r\n\
                   m=audio 0 RTP/AVP 0\r\n\
                   a=control:streamid=1\r\n";
        let info = parse(sdp);
        assert_eq!(info.medias.len(), 2);
        assert_eq!(info.medias[0].codec, Some(CodecType::H265));
        assert_eq!(info.medias[1].payload_type, 0);
        assert_eq!(info.codec_datas.len(), 2);
    }

    #[test]
    fn test_rtpmap_payload_mismatch_ignored() {
        let sdp = "m=video 0 RTP/AVP 96\r\na=rtpmap:98 H264/90000\r\n";
        let info = parse(sdp);
        // 负载号不匹配时 rtpmap 不生效，但编码名仍被解析
        assert_eq!(info.medias[0].rtpmap, 0);
    }
}
