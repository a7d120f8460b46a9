use bytes::Buf;
use std::io::Cursor;

pub const RTCP_FIR: u8 = 192;
pub const RTCP_NACK: u8 = 193;
pub const RTCP_SMPTETC: u8 = 194;
pub const RTCP_IJ: u8 = 195;

pub const RTCP_SR: u8 = 200;
pub const RTCP_RR: u8 = 201;
pub const RTCP_SDES: u8 = 202;
pub const RTCP_BYE: u8 = 203;
pub const RTCP_APP: u8 = 204;
pub const RTCP_RTPFB: u8 = 205;
pub const RTCP_PSFB: u8 = 206;
pub const RTCP_XR: u8 = 207;
pub const RTCP_AVB: u8 = 208;
pub const RTCP_RSI: u8 = 209;
pub const RTCP_TOKEN: u8 = 210;

/// BYE 包中借用 SSRC 字段传递的带外流结束标记
pub const RTCP_EOF_SSRC: u32 = 0xFFFF_FFFF;

/// 该负载类型字节是否属于 RTCP
pub fn is_rtcp(b: u8) -> bool {
    (RTCP_FIR..=RTCP_IJ).contains(&b) || (RTCP_SR..=RTCP_TOKEN).contains(&b)
}

/// Sender Report 主体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    /// 64 位 NTP 时间（32.32 定点）
    pub ntp_time: u64,
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bye {
    pub ssrc: u32,
}

/// 解析出的 RTCP 子包
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    Bye(Bye),
    Other(u8),
}

/// 解析一段复合 RTCP 包
///
/// 坏的子包跳过而不是中止整段解析。
pub fn parse_packets(buf: &[u8]) -> Vec<RtcpPacket> {
    let mut packets = Vec::new();
    let mut rest = buf;

    while rest.len() >= 4 {
        let version = rest[0] >> 6;
        if version != 2 {
            break;
        }
        let packet_type = rest[1];
        let length_words = u16::from_be_bytes([rest[2], rest[3]]) as usize;
        let mut packet_len = (length_words + 1) * 4;
        if packet_len > rest.len() {
            packet_len = rest.len();
        }

        match packet_type {
            RTCP_SR if packet_len >= 28 => {
                let mut cur = Cursor::new(&rest[4..packet_len]);
                let ssrc = cur.get_u32();
                let ntp_time = cur.get_u64();
                let rtp_time = cur.get_u32();
                let packet_count = cur.get_u32();
                let octet_count = cur.get_u32();
                packets.push(RtcpPacket::SenderReport(SenderReport {
                    ssrc,
                    ntp_time,
                    rtp_time,
                    packet_count,
                    octet_count,
                }));
            }
            RTCP_BYE if packet_len >= 8 => {
                let ssrc = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]);
                packets.push(RtcpPacket::Bye(Bye { ssrc }));
            }
            t => packets.push(RtcpPacket::Other(t)),
        }

        rest = &rest[packet_len..];
    }

    packets
}

/// 复合包里是否带流结束标记
pub fn has_eof_marker(buf: &[u8]) -> bool {
    parse_packets(buf)
        .iter()
        .any(|p| matches!(p, RtcpPacket::Bye(b) if b.ssrc == RTCP_EOF_SSRC))
}

/// 把微秒级 NTP 时间编码成 32.32 定点
pub fn ntp_to_fixed(ntp_micros: i64) -> u64 {
    let secs = (ntp_micros / 1_000_000) as u64;
    let frac = ((ntp_micros % 1_000_000) as u64) << 32;
    (secs << 32) | (frac / 1_000_000)
}

pub const NTP_OFFSET: i64 = 2_208_988_800;
pub const NTP_OFFSET_US: i64 = NTP_OFFSET * 1_000_000;

/// 当前 NTP 时间（微秒）
pub fn ntp_now_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    micros + NTP_OFFSET_US
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_rtcp_range() {
        assert!(is_rtcp(RTCP_SR));
        assert!(is_rtcp(RTCP_BYE));
        assert!(is_rtcp(RTCP_FIR));
        assert!(!is_rtcp(96));
        assert!(!is_rtcp(0));
    }

    #[test]
    fn test_parse_sender_report() {
        let mut buf = vec![
            0x80, RTCP_SR, 0x00, 0x06, // header, length 6 words
            0x12, 0x34, 0x56, 0x78, // SSRC
        ];
        buf.extend(0x00000001_00000000u64.to_be_bytes()); // NTP
        buf.extend(0x00001000u32.to_be_bytes()); // RTP ts
        buf.extend(100u32.to_be_bytes()); // packets
        buf.extend(10000u32.to_be_bytes()); // octets

        let packets = parse_packets(&buf);
        assert_eq!(packets.len(), 1);
        match packets[0] {
            RtcpPacket::SenderReport(sr) => {
                assert_eq!(sr.ssrc, 0x12345678);
                assert_eq!(sr.ntp_time, 0x00000001_00000000);
                assert_eq!(sr.rtp_time, 0x1000);
                assert_eq!(sr.packet_count, 100);
                assert_eq!(sr.octet_count, 10000);
            }
            _ => panic!("expected SR"),
        }
    }

    #[test]
    fn test_parse_compound_sr_then_bye() {
        let mut buf = vec![0x80, RTCP_SR, 0x00, 0x06];
        buf.extend([0u8; 24]);
        buf.extend([0x81, RTCP_BYE, 0x00, 0x01]);
        buf.extend(RTCP_EOF_SSRC.to_be_bytes());

        let packets = parse_packets(&buf);
        assert_eq!(packets.len(), 2);
        assert!(matches!(packets[1], RtcpPacket::Bye(b) if b.ssrc == RTCP_EOF_SSRC));
        assert!(has_eof_marker(&buf));
    }

    #[test]
    fn test_eof_marker_absent_for_normal_bye() {
        let mut buf = vec![0x81, RTCP_BYE, 0x00, 0x01];
        buf.extend(0x1234u32.to_be_bytes());
        assert!(!has_eof_marker(&buf));
    }

    #[test]
    fn test_ntp_fixed_point() {
        let fixed = ntp_to_fixed(1_500_000); // 1.5s
        assert_eq!(fixed >> 32, 1);
        // fraction approximately half of 2^32
        let frac = fixed & 0xffff_ffff;
        assert!((frac as i64 - (1u64 << 31) as i64).abs() < 8);
    }
}
