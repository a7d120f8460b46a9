use bytes::{BufMut, Bytes, BytesMut};
use vigil_media_core::CodecData;

use super::dynamic::{protocol_for_codec_data, DynamicProtocol};
use super::rtcp::{ntp_now_micros, RTCP_BYE, RTCP_EOF_SSRC, RTCP_SDES, RTCP_SR};
use super::RTP_VERSION;

/// 发送侧的每流 RTP 引擎
///
/// 持有序列号/时间戳发生器与 RTCP 发送报告需要的计数，随机初始化。
pub struct RtpMuxContext {
    pub ssrc: u32,
    pub base_timestamp: u32,

    pub seq: u16,
    pub timestamp: u32,
    pub cur_timestamp: u32,
    /// 上次发 SR 的 NTP 时间（微秒）
    pub last_rtcp_ntp_time: i64,
    pub first_rtcp_ntp_time: i64,

    pub first_packet: bool,
    pub packet_count: u32,
    pub octet_count: u32,

    pub time_base: u32,

    pub protocol: Box<dyn DynamicProtocol>,
}

impl RtpMuxContext {
    /// 由已知解码参数构造；不支持的编码返回 None
    pub fn from_codec_data(cd: &CodecData) -> Option<Self> {
        let protocol = protocol_for_codec_data(cd)?;
        let time_base = if cd.codec_type().is_audio() {
            cd.sample_rate().unwrap_or_else(|| protocol.default_clock_rate())
        } else {
            protocol.default_clock_rate()
        };

        let base_timestamp = rand::random::<u32>() >> 1;
        let mut mux = Self {
            ssrc: rand::random::<u32>(),
            base_timestamp,
            seq: rand::random::<u16>(),
            timestamp: base_timestamp,
            cur_timestamp: 0,
            last_rtcp_ntp_time: 0,
            first_rtcp_ntp_time: ntp_now_micros(),
            first_packet: true,
            packet_count: 0,
            octet_count: 0,
            time_base,
            protocol,
        };
        mux.cur_timestamp = mux.base_timestamp;
        Some(mux)
    }

    /// 写一个 12 字节 RTP 头并推进序列号
    pub fn write_rtp_header(&mut self, buf: &mut BytesMut, payload_type: u8, marker: bool) {
        buf.put_u8(RTP_VERSION << 6);
        let m = if marker { 0x80 } else { 0 };
        buf.put_u8((payload_type & 0x7f) | m);
        buf.put_u16(self.seq);
        self.seq = self.seq.wrapping_add(1);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }

    /// 生成 SR（可带 SDES CNAME 与 BYE）
    ///
    /// `eof` 为真时 BYE 的 SSRC 填流结束标记，通知对端干净收尾。
    pub fn make_sender_report(&mut self, ntp_time: i64, cname: &str, bye: bool, eof: bool) -> Bytes {
        self.last_rtcp_ntp_time = ntp_time;
        let rtp_ts = (ntp_time - self.first_rtcp_ntp_time) * self.time_base as i64 / 1_000_000
            + self.base_timestamp as i64;

        let mut w = BytesMut::with_capacity(64);
        w.put_u8(RTP_VERSION << 6);
        w.put_u8(RTCP_SR);
        w.put_u16(6); // length in words - 1
        w.put_u32(self.ssrc);
        // NTP timestamp, 32.32 fixed point
        w.put_u32((ntp_time / 1_000_000) as u32);
        w.put_u32(((((ntp_time % 1_000_000) as u64) << 32) / 1_000_000) as u32);
        w.put_u32(rtp_ts as u32);
        w.put_u32(self.packet_count);
        w.put_u32(self.octet_count);

        if !cname.is_empty() {
            let name_len = cname.len().min(255);
            w.put_u8((RTP_VERSION << 6) + 1);
            w.put_u8(RTCP_SDES);
            w.put_u16(((7 + name_len + 3) / 4) as u16); // length in words - 1
            w.put_u32(self.ssrc);
            w.put_u8(0x01); // CNAME item
            w.put_u8(name_len as u8);
            w.put_slice(&cname.as_bytes()[..name_len]);
            w.put_u8(0); // END
            let mut pad = (7 + name_len) % 4;
            while pad % 4 != 0 {
                w.put_u8(0);
                pad += 1;
            }
        }

        if bye {
            w.put_u8((RTP_VERSION << 6) | 1);
            w.put_u8(RTCP_BYE);
            w.put_u16(1); // length in words - 1
            if eof {
                w.put_u32(RTCP_EOF_SSRC);
            } else {
                w.put_u32(self.ssrc);
            }
        }

        w.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes as B;
    use vigil_media_core::CodecData;

    fn h264_codec_data() -> CodecData {
        CodecData::H264 {
            sps: B::from_static(&[0x67, 0x42, 0x00, 0x1e]),
            pps: B::from_static(&[0x68, 0xce]),
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_from_codec_data_uses_clock_rate() {
        let mux = RtpMuxContext::from_codec_data(&h264_codec_data()).unwrap();
        assert_eq!(mux.time_base, 90000);
        assert!(mux.first_packet);

        let aac = CodecData::Aac {
            config: B::from_static(&[0x12, 0x10]),
            sample_rate: 44100,
            channels: 2,
        };
        let mux = RtpMuxContext::from_codec_data(&aac).unwrap();
        assert_eq!(mux.time_base, 44100);
    }

    #[test]
    fn test_rtp_header_advances_sequence() {
        let mut mux = RtpMuxContext::from_codec_data(&h264_codec_data()).unwrap();
        mux.seq = 41;
        mux.timestamp = 0x01020304;
        let mut buf = BytesMut::new();
        mux.write_rtp_header(&mut buf, 96, true);
        assert_eq!(buf.len(), 12);
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x80 | 96);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 41);
        assert_eq!(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]), 0x01020304);
        assert_eq!(mux.seq, 42);
    }

    #[test]
    fn test_sender_report_with_bye_eof() {
        let mut mux = RtpMuxContext::from_codec_data(&h264_codec_data()).unwrap();
        mux.packet_count = 7;
        mux.octet_count = 7000;
        let sr = mux.make_sender_report(mux.first_rtcp_ntp_time + 1_000_000, "", true, true);

        assert_eq!(sr[1], RTCP_SR);
        // BYE trails the SR with the EOF sentinel SSRC
        let bye_at = 28;
        assert_eq!(sr[bye_at + 1], RTCP_BYE);
        let ssrc = u32::from_be_bytes([sr[bye_at + 4], sr[bye_at + 5], sr[bye_at + 6], sr[bye_at + 7]]);
        assert_eq!(ssrc, RTCP_EOF_SSRC);
        assert!(crate::rtp::rtcp::has_eof_marker(&sr));
    }

    #[test]
    fn test_sender_report_with_cname_padding() {
        let mut mux = RtpMuxContext::from_codec_data(&h264_codec_data()).unwrap();
        let sr = mux.make_sender_report(mux.first_rtcp_ntp_time, "host", false, false);
        assert_eq!(sr[28 + 1], RTCP_SDES);
        // SDES 按 32 位对齐
        assert_eq!((sr.len() - 28) % 4, 0);
    }
}
