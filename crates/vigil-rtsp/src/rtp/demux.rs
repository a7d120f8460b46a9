use bytes::{BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};
use vigil_media_core::{rescale, Packet};

use super::dynamic::{Depacketized, DynamicProtocol};
use super::rtcp::{self, RTCP_BYE, RTCP_RR, RTCP_SR};
use super::stats::RtpStatistics;
use super::{relative_time_millis, RTP_FLAG_MARKER, RTP_NOTS_VALUE, RTP_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseStatus {
    Packet,
    PacketMore,
    None,
}

#[derive(Debug, Clone)]
struct QueuedPacket {
    seq: u16,
    buf: Bytes,
    /// 入队时刻
    recv_time: i64,
}

/// 接收侧的每流 RTP 引擎
///
/// 负责序列号校验、乱序重排、RTCP 锚定时间换算，并把负载交给
/// 选定的编码协议重组访问单元。
pub struct RtpDemuxContext {
    payload_type: u8,
    ssrc: u32,
    seq: u16,
    timestamp: u32,
    base_timestamp: u32,
    unwrapped_timestamp: i64,
    range_start_offset: i64,

    statistics: RtpStatistics,

    /// Sender Report 给出的 NTP/RTP 锚
    last_rtcp_ntp_time: Option<u64>,
    last_rtcp_reception_time: i64,
    first_rtcp_ntp_time: Option<u64>,
    last_rtcp_timestamp: u32,
    rtcp_ts_offset: i64,

    prev_ret: ParseStatus,
    queue: VecDeque<QueuedPacket>,
    queue_cap: usize,

    pub time_scale: u32,
    pub protocol: Box<dyn DynamicProtocol>,
}

impl RtpDemuxContext {
    /// `queue_cap` 为 0 或 1 时不做乱序重排
    pub fn new(payload_type: u8, queue_cap: usize, protocol: Box<dyn DynamicProtocol>) -> Self {
        Self {
            payload_type,
            ssrc: 0,
            seq: 0,
            timestamp: 0,
            base_timestamp: 0,
            unwrapped_timestamp: 0,
            range_start_offset: 0,
            statistics: RtpStatistics::new(0),
            last_rtcp_ntp_time: None,
            last_rtcp_reception_time: 0,
            first_rtcp_ntp_time: None,
            last_rtcp_timestamp: 0,
            rtcp_ts_offset: 0,
            prev_ret: ParseStatus::None,
            queue: VecDeque::with_capacity(queue_cap),
            queue_cap,
            time_scale: 0,
            protocol,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn statistics(&self) -> &RtpStatistics {
        &self.statistics
    }

    /// 设定点播起始偏移（a=range:npt 的起点）
    pub fn set_range_start(&mut self, seconds: f64) {
        if self.time_scale > 0 {
            self.range_start_offset = (seconds * self.time_scale as f64) as i64;
        }
    }

    /// 计算访问单元的呈现时间
    ///
    /// 有 RTCP 锚时从 NTP 时间换算；否则基于首个时间戳做单调展开。
    fn finalize_packet(&mut self, pkt: &mut Packet, timestamp: u32) {
        if pkt.time.is_some() {
            // timestamp already set by the depacketizer
            return;
        }
        if timestamp == RTP_NOTS_VALUE {
            return;
        }

        if let (Some(last_ntp), Some(first_ntp)) = (self.last_rtcp_ntp_time, self.first_rtcp_ntp_time) {
            if self.time_scale > 0 {
                let delta_timestamp = timestamp.wrapping_sub(self.last_rtcp_timestamp) as i32 as i64;
                let addend = rescale(
                    last_ntp.wrapping_sub(first_ntp) as i64,
                    self.time_scale as i64,
                    1i64 << 32,
                );
                let units = self.range_start_offset + self.rtcp_ts_offset + addend + delta_timestamp;
                let nanos = rescale(units, 1_000_000_000, self.time_scale as i64);
                pkt.time = Some(Duration::from_nanos(nanos.max(0) as u64));
                return;
            }
        }

        if self.base_timestamp == 0 {
            self.base_timestamp = timestamp;
        }
        // the delta is assumed to fit in i32; the first timestamp may exceed it
        if self.timestamp == 0 {
            self.unwrapped_timestamp += timestamp as i64;
        } else {
            self.unwrapped_timestamp += timestamp.wrapping_sub(self.timestamp) as i32 as i64;
        }
        self.timestamp = timestamp;
        if self.time_scale > 0 {
            let units = self.unwrapped_timestamp + self.range_start_offset - self.base_timestamp as i64;
            let nanos = rescale(units, 1_000_000_000, self.time_scale as i64);
            pkt.time = Some(Duration::from_nanos(nanos.max(0) as u64));
        } else {
            warn!(target: "rtp_demux", "timescale unavailable, no packet time");
        }
    }

    fn parse_packet_internal(&mut self, pkt: &mut Packet, buf: &[u8]) -> ParseStatus {
        let csrc = (buf[0] & 0x0f) as usize;
        let ext = buf[0] & 0x10 != 0;
        let payload_type = buf[1] & 0x7f;

        let mut flags = 0;
        if buf[1] & 0x80 != 0 {
            flags |= RTP_FLAG_MARKER;
        }
        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        self.ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        // only one payload type per context
        if self.payload_type != payload_type {
            return ParseStatus::None;
        }

        if !self.statistics.valid_packet_in_sequence(seq) {
            warn!(
                target: "rtp_demux",
                "PT={:02x}: bad cseq {:04x} expected={:04x}",
                payload_type,
                seq,
                self.seq.wrapping_add(1)
            );
            return ParseStatus::None;
        }

        let mut len = buf.len();
        if buf[0] & 0x20 != 0 {
            let padding = buf[len - 1] as usize;
            if len >= 12 + padding {
                len -= padding;
            }
        }

        self.seq = seq;
        let mut start = 12 + 4 * csrc;
        if start > len {
            return ParseStatus::None;
        }

        if ext {
            // RFC 3550 section 5.3.1 header extension
            if len - start < 4 {
                return ParseStatus::None;
            }
            let words = u16::from_be_bytes([buf[start + 2], buf[start + 3]]) as usize;
            let ext_len = (words + 1) * 4;
            if len - start < ext_len {
                return ParseStatus::None;
            }
            start += ext_len;
        }

        let (ts, rv) = self
            .protocol
            .parse_packet(pkt, Some(&buf[start..len]), timestamp, flags);
        let status = match rv {
            Depacketized::Complete => ParseStatus::Packet,
            Depacketized::CompleteMore => ParseStatus::PacketMore,
            Depacketized::Pending | Depacketized::Skip => ParseStatus::None,
        };

        self.finalize_packet(pkt, ts);
        status
    }

    fn has_next_packet(&self) -> bool {
        self.queue
            .front()
            .map(|p| p.seq == self.seq.wrapping_add(1))
            .unwrap_or(false)
    }

    /// 队列里下一段连续缺口（调试/统计用），统计不可用或队列为空时跳过
    pub fn find_missing_packets(&self) -> Option<(u16, u16)> {
        let first = self.queue.front()?;
        let next_seq = self.seq.wrapping_add(1);
        if first.seq == next_seq {
            return None;
        }
        Some((next_seq, first.seq.wrapping_sub(1)))
    }

    fn parse_queued_packet(&mut self, pkt: &mut Packet) -> ParseStatus {
        let Some(queued) = self.queue.pop_front() else {
            return ParseStatus::None;
        };
        if queued.seq != self.seq.wrapping_add(1) {
            warn!(
                target: "rtp_demux",
                "missed {} packets, oldest queued {}ms ago",
                queued.seq.wrapping_sub(self.seq).wrapping_sub(1),
                relative_time_millis() - queued.recv_time
            );
        }
        self.parse_packet_internal(pkt, &queued.buf)
    }

    fn queue_packet(&mut self, buf: &[u8]) {
        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        let mut idx = self.queue.len();
        for (i, p) in self.queue.iter().enumerate() {
            if (seq.wrapping_sub(p.seq) as i16) < 0 {
                idx = i;
                break;
            }
        }
        self.queue.insert(
            idx,
            QueuedPacket {
                seq,
                buf: Bytes::copy_from_slice(buf),
                recv_time: relative_time_millis(),
            },
        );
    }

    /// RTCP 子包更新 NTP/RTP 时间锚
    fn parse_rtcp(&mut self, buf: &[u8]) {
        let mut rest = buf;
        while rest.len() >= 4 {
            let words = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            let mut payload_len = (words + 1) * 4;
            if payload_len > rest.len() {
                payload_len = rest.len();
            }

            match rest[1] {
                RTCP_SR => {
                    if payload_len < 20 {
                        warn!(target: "rtp_demux", "invalid RTCP SR packet length");
                        return;
                    }
                    self.last_rtcp_reception_time = relative_time_millis();
                    let ntp = u64::from_be_bytes([
                        rest[8], rest[9], rest[10], rest[11], rest[12], rest[13], rest[14], rest[15],
                    ]);
                    self.last_rtcp_ntp_time = Some(ntp);
                    self.last_rtcp_timestamp =
                        u32::from_be_bytes([rest[16], rest[17], rest[18], rest[19]]);
                    if self.first_rtcp_ntp_time.is_none() {
                        self.first_rtcp_ntp_time = Some(ntp);
                        if self.base_timestamp == 0 {
                            self.base_timestamp = self.last_rtcp_timestamp;
                        }
                        self.rtcp_ts_offset =
                            self.last_rtcp_timestamp.wrapping_sub(self.base_timestamp) as i32 as i64;
                    }
                }
                RTCP_BYE => return,
                _ => {}
            }
            rest = &rest[payload_len..];
        }
    }

    fn parse_one_packet(&mut self, pkt: &mut Packet, buf: Option<&[u8]>) -> ParseStatus {
        let Some(buf) = buf else {
            // nothing more from the previous packet: drain the queue, or pull
            // the next pending access unit out of the depacketizer
            if self.prev_ret == ParseStatus::None || self.prev_ret == ParseStatus::Packet {
                return self.parse_queued_packet(pkt);
            }
            let (ts, rv) = self.protocol.parse_packet(pkt, None, RTP_NOTS_VALUE, 0);
            let status = match rv {
                Depacketized::Complete => ParseStatus::Packet,
                Depacketized::CompleteMore => ParseStatus::PacketMore,
                _ => ParseStatus::None,
            };
            self.finalize_packet(pkt, ts);
            return status;
        };

        if buf.len() < 12 {
            return ParseStatus::None;
        }
        if buf[0] & 0xc0 != RTP_VERSION << 6 {
            return ParseStatus::None;
        }
        if rtcp::is_rtcp(buf[1]) {
            self.parse_rtcp(buf);
            return ParseStatus::None;
        }

        if self.time_scale != 0 {
            let arrival = rescale(relative_time_millis(), self.time_scale as i64, 1000);
            let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
            self.statistics.update_jitter(timestamp, arrival as u32);
        }

        if (self.seq == 0 && self.queue.is_empty()) || self.queue_cap <= 1 {
            // first packet, or no reordering
            return self.parse_packet_internal(pkt, buf);
        }

        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        let diff = seq.wrapping_sub(self.seq) as i16;
        if diff < 0 {
            // packet older than the previously emitted one
            warn!(target: "rtp_demux", "dropping old packet received too late");
            ParseStatus::None
        } else if diff <= 1 {
            self.parse_packet_internal(pkt, buf)
        } else {
            // still missing some packet, enqueue this one
            self.queue_packet(buf);
            if self.queue.len() >= self.queue_cap {
                // return the oldest queued packet even though a gap remains
                debug!(target: "rtp_demux", "jitter buffer full");
                return self.parse_queued_packet(pkt);
            }
            ParseStatus::None
        }
    }

    /// 喂入一个 RTP/RTCP 包；`None` 表示继续取上次剩余的访问单元
    ///
    /// 返回 `Some((packet, more))`；more 为真时应以 `None` 继续取。
    pub fn parse_packet(&mut self, buf: Option<&[u8]>) -> Option<(Packet, bool)> {
        let mut pkt = Packet::default();
        let mut rv = self.parse_one_packet(&mut pkt, buf);
        self.prev_ret = rv;
        while rv == ParseStatus::None && self.has_next_packet() {
            rv = self.parse_queued_packet(&mut pkt);
        }
        match rv {
            ParseStatus::PacketMore => Some((pkt, true)),
            ParseStatus::Packet => {
                let more = self.has_next_packet();
                Some((pkt, more))
            }
            ParseStatus::None => None,
        }
    }

    /// 生成一个 RTCP Receiver Report (RFC 3550 6.4.2)
    pub fn generate_receiver_report(&mut self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8((RTP_VERSION << 6) + 1); // 1 report block
        buf.put_u8(RTCP_RR);
        buf.put_u16(7); // length in words - 1
        // our own SSRC: the server's SSRC + 1 to avoid conflicts
        buf.put_u32(self.ssrc.wrapping_add(1));
        buf.put_u32(self.ssrc);

        let stats = &mut self.statistics;
        let extended_max = stats.cycles.wrapping_add(stats.max_seq as u32);
        let expected = extended_max.wrapping_sub(stats.base_seq);
        let mut lost = expected.wrapping_sub(stats.received);
        // clamp to 24 bits
        if lost > 0xffffff {
            lost = 0xffffff;
        }
        let expected_interval = expected.wrapping_sub(stats.expected_prior);
        stats.expected_prior = expected;
        let received_interval = stats.received.wrapping_sub(stats.received_prior);
        stats.received_prior = stats.received;
        let lost_interval = expected_interval.wrapping_sub(received_interval) as i32;
        let fraction = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval as u32) << 8) / expected_interval
        };

        buf.put_u32((fraction << 24) | lost);
        buf.put_u32(extended_max);
        buf.put_u32(stats.jitter >> 4);

        match self.last_rtcp_ntp_time {
            None => {
                buf.put_u32(0); // last SR timestamp
                buf.put_u32(0); // delay since last SR
            }
            Some(ntp) => {
                let middle_32_bits = (ntp >> 16) as u32;
                let delay = rescale(
                    relative_time_millis() - self.last_rtcp_reception_time,
                    65536,
                    1000,
                );
                buf.put_u32(middle_32_bits);
                buf.put_u32(delay as u32);
            }
        }

        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::dynamic::protocol_for_codec;
    use vigil_media_core::CodecType;

    fn rtp_packet(seq: u16, timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x80, 96];
        buf.extend(seq.to_be_bytes());
        buf.extend(timestamp.to_be_bytes());
        buf.extend(0x11223344u32.to_be_bytes());
        buf.extend(payload);
        buf
    }

    fn new_ctx(queue_cap: usize) -> RtpDemuxContext {
        let mut ctx = RtpDemuxContext::new(
            96,
            queue_cap,
            protocol_for_codec(CodecType::H264).unwrap(),
        );
        ctx.time_scale = 90000;
        ctx
    }

    /// 过掉两包试用期
    fn pass_probation(ctx: &mut RtpDemuxContext, seq: u16) {
        assert!(ctx.parse_packet(Some(&rtp_packet(seq, 0, &[0x41, 0x01]))).is_none());
        assert!(ctx
            .parse_packet(Some(&rtp_packet(seq + 1, 0, &[0x41, 0x01])))
            .is_some());
    }

    #[test]
    fn test_in_order_dispatch() {
        let mut ctx = new_ctx(16);
        pass_probation(&mut ctx, 100);
        let out = ctx.parse_packet(Some(&rtp_packet(102, 3000, &[0x65, 0xaa])));
        let (pkt, more) = out.unwrap();
        assert!(!more);
        assert!(pkt.is_keyframe);
        assert_eq!(&pkt.data[4..], &[0x65, 0xaa]);
    }

    #[test]
    fn test_reorder_within_window() {
        let mut ctx = new_ctx(16);
        pass_probation(&mut ctx, 10);

        // 12 先到：排队
        assert!(ctx.parse_packet(Some(&rtp_packet(13, 0, &[0x41, 0x0d]))).is_none());
        // 12 到：先出 12，且队列里 13 变成连续
        let (pkt, more) = ctx.parse_packet(Some(&rtp_packet(12, 0, &[0x41, 0x0c]))).unwrap();
        assert_eq!(&pkt.data[4..], &[0x41, 0x0c]);
        assert!(more);
        // 用空负载取出 13
        let (pkt, more) = ctx.parse_packet(None).unwrap();
        assert_eq!(&pkt.data[4..], &[0x41, 0x0d]);
        assert!(!more);
    }

    #[test]
    fn test_old_packet_dropped() {
        let mut ctx = new_ctx(16);
        pass_probation(&mut ctx, 50);
        assert!(ctx.parse_packet(Some(&rtp_packet(52, 0, &[0x41, 0x01]))).is_some());
        // 49 比已经吐出的旧：丢弃
        assert!(ctx.parse_packet(Some(&rtp_packet(49, 0, &[0x41, 0x02]))).is_none());
    }

    #[test]
    fn test_queue_full_force_dispatch() {
        let mut ctx = new_ctx(2);
        pass_probation(&mut ctx, 0);

        // 两个不连续的包填满容量为 2 的队列，第二个触发强制出队
        assert!(ctx.parse_packet(Some(&rtp_packet(4, 0, &[0x41, 0x04]))).is_none());
        let out = ctx.parse_packet(Some(&rtp_packet(6, 0, &[0x41, 0x06])));
        let (pkt, _) = out.unwrap();
        assert_eq!(&pkt.data[4..], &[0x41, 0x04]);
    }

    #[test]
    fn test_no_reorder_mode_dispatches_immediately() {
        let mut ctx = new_ctx(0);
        pass_probation(&mut ctx, 100);
        // 跳号也直接分发（TCP 交错传输不做重排）
        let out = ctx.parse_packet(Some(&rtp_packet(110, 0, &[0x41, 0x01])));
        assert!(out.is_some());
    }

    #[test]
    fn test_wrong_payload_type_rejected() {
        let mut ctx = new_ctx(16);
        let mut buf = rtp_packet(1, 0, &[0x41, 0x01]);
        buf[1] = 97;
        assert!(ctx.parse_packet(Some(&buf)).is_none());
    }

    #[test]
    fn test_rtcp_sr_anchors_time() {
        let mut ctx = new_ctx(0);
        pass_probation(&mut ctx, 20);

        // SR: NTP 秒 = 0x10000，RTP ts = 90000
        let mut sr = vec![0x80, RTCP_SR, 0x00, 0x06];
        sr.extend(0x22334455u32.to_be_bytes());
        sr.extend(((0x10000u64) << 32).to_be_bytes());
        sr.extend(90000u32.to_be_bytes());
        sr.extend(10u32.to_be_bytes());
        sr.extend(1000u32.to_be_bytes());
        assert!(ctx.parse_packet(Some(&sr)).is_none());
        assert_eq!(ctx.last_rtcp_ntp_time, Some(0x10000u64 << 32));

        // 一秒后的包：呈现时间 = rtcp_ts_offset + delta = 90000 单位 = 1s
        let out = ctx.parse_packet(Some(&rtp_packet(22, 180000, &[0x65, 0x01])));
        let (pkt, _) = out.unwrap();
        assert_eq!(pkt.time, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_monotonic_time_without_rtcp() {
        let mut ctx = new_ctx(0);
        pass_probation(&mut ctx, 5);

        let (pkt, _) = ctx.parse_packet(Some(&rtp_packet(7, 90000, &[0x65, 0x01]))).unwrap();
        let t0 = pkt.time.unwrap();
        let (pkt, _) = ctx.parse_packet(Some(&rtp_packet(8, 180000, &[0x65, 0x02]))).unwrap();
        let t1 = pkt.time.unwrap();
        assert_eq!(t1 - t0, Duration::from_secs(1));
    }

    #[test]
    fn test_find_missing_packets() {
        let mut ctx = new_ctx(16);
        pass_probation(&mut ctx, 10);
        assert!(ctx.find_missing_packets().is_none());
        assert!(ctx.parse_packet(Some(&rtp_packet(15, 0, &[0x41, 0x01]))).is_none());
        assert_eq!(ctx.find_missing_packets(), Some((12, 14)));
    }

    #[test]
    fn test_receiver_report_layout() {
        let mut ctx = new_ctx(16);
        pass_probation(&mut ctx, 100);
        let rr = ctx.generate_receiver_report();
        assert_eq!(rr.len(), 32);
        assert_eq!(rr[0], (RTP_VERSION << 6) + 1);
        assert_eq!(rr[1], RTCP_RR);
        let reporter = u32::from_be_bytes([rr[4], rr[5], rr[6], rr[7]]);
        let reportee = u32::from_be_bytes([rr[8], rr[9], rr[10], rr[11]]);
        assert_eq!(reporter, reportee.wrapping_add(1));
    }
}
