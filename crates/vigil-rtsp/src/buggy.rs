use crate::sdp::SdpInfo;

/// 已知问题服务器特征
///
/// 某些服务器不按 RTSP 会话超时约定工作，必须用 GET_PARAMETER 保活。
#[derive(Debug, Clone, Copy, Default)]
pub struct BuggyChecker {
    pub must_keepalive_get_parameter: bool,
}

impl BuggyChecker {
    /// 检查 DESCRIBE 返回的 SDP
    pub fn check_sdp(&mut self, sdp: &SdpInfo) {
        let mut onvif_type_media = false;

        if let Some(lines) = sdp.extra_lines.get("a") {
            for line in lines {
                if line.starts_with("tool:LIVE555") {
                    self.must_keepalive_get_parameter = true;
                    return;
                }
                if line.starts_with("h264-esid:201") {
                    onvif_type_media = true;
                }
            }
        }

        if onvif_type_media {
            if let Some(lines) = sdp.extra_lines.get("s") {
                for line in lines {
                    if line.starts_with("Media Presentation") {
                        self.must_keepalive_get_parameter = true;
                        return;
                    }
                }
            }
        }
    }
}
