use bytes::{BufMut, Bytes, BytesMut};
use std::net::IpAddr;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;
use vigil_media_core::{mjpeg, CodecData, CodecType, Packet};

use crate::error::{Result, RtspError};
use crate::rtp::aac::wrap_access_unit;
use crate::rtp::rtcp::{self, RTCP_EOF_SSRC, RTCP_RR};
use crate::rtp::RtpMuxContext;
use crate::transport;

/// 写回路径上的一条消息
pub(crate) enum Outgoing {
    Response {
        lines: Vec<String>,
        body: Option<Bytes>,
    },
    Embedded {
        channel: u8,
        body: Bytes,
    },
}

/// 会话状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Pause = 1,
    Play = 2,
    Teardown = 3,
}

/// 一次 SETUP/PLAY 协商出来的服务端会话
///
/// 按会话号归组若干子会话（每路媒体流一个）；宿主拿到 `Arc<Session>`
/// 后通过 `write_packet` 推数据。
pub struct Session {
    pub uri: Url,
    pub id: String,

    state: AtomicI32,
    event_tx: Mutex<Option<mpsc::Sender<SessionEvent>>>,
    event_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    subs: Mutex<Vec<Option<SubSession>>>,
}

impl Session {
    pub(crate) fn new(uri: Url, id: String, stream_count: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(8);
        let mut subs = Vec::with_capacity(stream_count);
        subs.resize_with(stream_count, || None);
        Self {
            uri,
            id,
            state: AtomicI32::new(SessionEvent::Pause as i32),
            event_tx: Mutex::new(Some(event_tx)),
            event_rx: Mutex::new(Some(event_rx)),
            subs: Mutex::new(subs),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.load(Ordering::Acquire) == SessionEvent::Play as i32
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.load(Ordering::Acquire) == SessionEvent::Teardown as i32
    }

    /// 取走事件接收端（只能取一次）
    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.lock().ok()?.take()
    }

    fn notify(&self, event: SessionEvent) {
        if let Ok(tx) = self.event_tx.lock() {
            if let Some(tx) = tx.as_ref() {
                let _ = tx.try_send(event);
            }
        }
    }

    pub(crate) fn set_playing(&self) {
        self.state.store(SessionEvent::Play as i32, Ordering::Release);
        self.notify(SessionEvent::Play);
    }

    /// 整个会话收尾；事件通道只关一次
    pub(crate) fn teardown(&self) {
        self.state
            .store(SessionEvent::Teardown as i32, Ordering::Release);
        self.notify(SessionEvent::Teardown);
        if let Ok(mut tx) = self.event_tx.lock() {
            tx.take();
        }
        if let Ok(mut subs) = self.subs.lock() {
            for sub in subs.iter_mut() {
                sub.take();
            }
        }
        info!(target: "rtsp_session", "session {} torn down", self.id);
    }

    pub(crate) fn teardown_stream(&self, idx: usize) {
        if let Ok(mut subs) = self.subs.lock() {
            if idx < subs.len() {
                subs[idx].take();
                info!(target: "rtsp_session", "teardown stream {} of session {}", idx, self.id);
            }
        }
    }

    pub(crate) fn active_sub_sessions(&self) -> usize {
        self.subs
            .lock()
            .map(|subs| subs.iter().filter(|s| s.is_some()).count())
            .unwrap_or(0)
    }

    /// SETUP 时装配一路子会话；重复 SETUP 返回 false
    pub(crate) fn install_sub_session(&self, idx: usize, sub: SubSession) -> bool {
        let Ok(mut subs) = self.subs.lock() else {
            return false;
        };
        if idx >= subs.len() || subs[idx].is_some() {
            return false;
        }
        subs[idx] = Some(sub);
        true
    }

    /// 每路流的解码参数
    pub fn streams(&self) -> Vec<Option<CodecData>> {
        self.subs
            .lock()
            .map(|subs| {
                subs.iter()
                    .map(|s| s.as_ref().and_then(|s| s.mux.protocol.codec_data()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 把一个访问单元推给对应的子会话
    ///
    /// 未在播放、流号越界或子会话未 SETUP 时静默丢弃。
    pub fn write_packet(&self, pkt: &Packet) -> Result<()> {
        if !self.is_playing() {
            return Ok(());
        }
        let idx = pkt.stream_idx;
        if idx < 0 {
            return Ok(());
        }
        let Ok(mut subs) = self.subs.lock() else {
            return Ok(());
        };
        let Some(slot) = subs.get_mut(idx as usize) else {
            return Ok(());
        };
        let Some(sub) = slot.as_mut() else {
            return Ok(());
        };
        sub.write_packet(pkt)
    }
}

/// 一路媒体流的发送端
///
/// 持有该流的 RTP 打包上下文和 UDP/TCP 出口。
pub struct SubSession {
    mux: RtpMuxContext,
    is_udp: bool,

    rtp_sock: Option<Arc<UdpSocket>>,
    rtcp_sock: Option<Arc<UdpSocket>>,
    tasks: Vec<JoinHandle<()>>,

    conn_send: mpsc::Sender<Outgoing>,
    max_fragment_size: usize,
}

impl Drop for SubSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl SubSession {
    pub(crate) fn new(
        mux: RtpMuxContext,
        is_udp: bool,
        conn_send: mpsc::Sender<Outgoing>,
        max_fragment_size: usize,
    ) -> Self {
        Self {
            mux,
            is_udp,
            rtp_sock: None,
            rtcp_sock: None,
            tasks: Vec::new(),
            conn_send,
            max_fragment_size: if max_fragment_size == 0 { 65000 } else { max_fragment_size },
        }
    }

    /// 建立到客户端的 UDP 出口并返回本端端口对
    pub(crate) async fn setup_udp(
        &mut self,
        client_ip: IpAddr,
        rtp_port: u16,
        rtcp_port: u16,
        last_time_from_client: Arc<AtomicI64>,
    ) -> Result<(u16, u16)> {
        let (rtp_sock, rtcp_sock) = transport::find_udp_pair(0).await?;
        rtp_sock.connect((client_ip, rtp_port)).await?;
        rtcp_sock.connect((client_ip, rtcp_port)).await?;

        let p1 = rtp_sock.local_addr()?.port();
        let p2 = rtcp_sock.local_addr()?.port();

        let rtp_sock = Arc::new(rtp_sock);
        let rtcp_sock = Arc::new(rtcp_sock);

        for sock in [rtp_sock.clone(), rtcp_sock.clone()] {
            let last_time = last_time_from_client.clone();
            self.tasks.push(tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                loop {
                    match sock.recv(&mut buf).await {
                        Ok(n) => {
                            if n < 8 || buf[0] & 0xc0 != 0x80 {
                                continue;
                            }
                            if buf[1] == RTCP_RR {
                                debug!(target: "rtsp_session", "RTCP RR received");
                                last_time.store(rtcp::ntp_now_micros(), Ordering::Relaxed);
                            }
                        }
                        Err(e) => {
                            debug!(target: "rtsp_session", "udp reader exit: {}", e);
                            break;
                        }
                    }
                }
            }));
        }

        self.rtp_sock = Some(rtp_sock);
        self.rtcp_sock = Some(rtcp_sock);
        Ok((p1, p2))
    }

    /// 发送一个 RTP/RTCP 负载；UDP 即发即弃，TCP 队满丢帧
    fn write_raw(&mut self, channel: u8, body: &[u8]) -> Result<()> {
        if self.is_udp {
            let sock = if channel & 0x01 == 0 {
                self.rtp_sock.as_ref()
            } else {
                self.rtcp_sock.as_ref()
            };
            if let Some(sock) = sock {
                if let Err(e) = sock.try_send(body) {
                    debug!(target: "rtsp_session", "udp write error: {}", e);
                }
            }
        } else {
            let out = Outgoing::Embedded {
                channel,
                body: Bytes::copy_from_slice(body),
            };
            if self.conn_send.try_send(out).is_err() {
                debug!(target: "rtsp_session", "send queue full, dropping frame");
                return Err(RtspError::Protocol("short write".into()));
            }
        }
        if channel & 0x01 == 0 {
            self.mux.packet_count = self.mux.packet_count.wrapping_add(1);
            self.mux.octet_count = self
                .mux
                .octet_count
                .wrapping_add(body.len().saturating_sub(12) as u32);
        }
        Ok(())
    }

    fn write_sr(&mut self, idx: i8, ntp_time: i64, cname: &str, bye: bool, eof: bool) -> Result<()> {
        let body = self.mux.make_sender_report(ntp_time, cname, bye, eof);
        self.write_raw((2 * idx + 1) as u8, &body)
    }

    fn write_h264_packet(&mut self, pkt: &Packet, channel: u8) -> Result<()> {
        let data = &pkt.data;
        if data.is_empty() {
            return Ok(());
        }

        let nal_first = data[0];
        let nal_type = nal_first & 0x1f;
        // only slices and parameter sets go out
        if nal_type > 8 {
            return Ok(());
        }

        let max_fragment_size = self.max_fragment_size;
        let payload_type = self.mux.protocol.payload_type();
        self.mux.timestamp = self.mux.cur_timestamp;

        if data.len() <= max_fragment_size + 1 {
            let mut w = BytesMut::with_capacity(12 + data.len());
            self.mux.write_rtp_header(&mut w, payload_type, true);
            w.put_slice(data);
            return self.write_raw(channel, &w);
        }

        // FU-A: keep the NAL header out, spread the body over fragments
        let mut first = true;
        let mut start = 1;
        while start < data.len() {
            let frag_size = (data.len() - start).min(max_fragment_size);
            let end = start + frag_size == data.len();

            let mut w = BytesMut::with_capacity(14 + frag_size);
            self.mux.write_rtp_header(&mut w, payload_type, end);

            let fu_indicator = (nal_first & 0xe0) | 28;
            let mut fu_header = nal_type;
            if first {
                fu_header |= 0x80;
                first = false;
            }
            if end {
                fu_header |= 0x40;
            }
            w.put_u8(fu_indicator);
            w.put_u8(fu_header);
            w.put_slice(&data[start..start + frag_size]);

            self.write_raw(channel, &w)?;
            start += frag_size;
        }
        Ok(())
    }

    fn write_h265_packet(&mut self, pkt: &Packet, channel: u8) -> Result<()> {
        let data = &pkt.data;
        // H265 NAL header is 2 bytes
        if data.len() < 2 {
            return Ok(());
        }

        let max_fragment_size = self.max_fragment_size;
        let payload_type = self.mux.protocol.payload_type();
        self.mux.timestamp = self.mux.cur_timestamp;

        if data.len() <= max_fragment_size + 1 {
            let mut w = BytesMut::with_capacity(12 + data.len());
            self.mux.write_rtp_header(&mut w, payload_type, true);
            w.put_slice(data);
            return self.write_raw(channel, &w);
        }

        // HEVC FU: payload header type 49, pass the original NAL header
        let nal_type = (data[0] >> 1) & 0x3f;
        let mut first = true;
        let mut start = 2;
        while start < data.len() {
            let frag_size = (data.len() - start).min(max_fragment_size);
            let end = start + frag_size == data.len();

            let mut w = BytesMut::with_capacity(15 + frag_size);
            self.mux.write_rtp_header(&mut w, payload_type, end);

            w.put_u8(49 << 1);
            w.put_u8(1);
            let mut fu_header = nal_type;
            if first {
                fu_header |= 0x80;
                first = false;
            }
            if end {
                fu_header |= 0x40;
            }
            w.put_u8(fu_header);
            w.put_slice(&data[start..start + frag_size]);

            self.write_raw(channel, &w)?;
            start += frag_size;
        }
        Ok(())
    }

    /// RFC 2435：重新扫出量化表和 Huffman 表，剥掉文件头按片发送
    fn write_mjpeg_packet(&mut self, pkt: &Packet, channel: u8) -> Result<()> {
        let data = &pkt.data;
        let mut size = data.len();
        if size < 1 {
            return Ok(());
        }
        let Some(CodecData::Mjpeg { width, height }) = self.mux.protocol.codec_data() else {
            return Ok(());
        };

        let payload_type = self.mux.protocol.payload_type();
        self.mux.timestamp = self.mux.cur_timestamp;

        let header_type: u8 = 1;
        let max_payload_size = 1400usize;
        let mut qtables = [0usize; 4];
        let mut nb_qtables = 0usize;
        let mut default_huffman_tables = 0u32;

        // preparse the marker stream
        let mut i = 0usize;
        while i + 1 < size {
            if data[i] != 0xff {
                i += 1;
                continue;
            }
            match data[i + 1] {
                mjpeg::DQT => {
                    if i + 5 > size {
                        return Ok(());
                    }
                    if data[i + 4] & 0xf0 != 0 {
                        warn!(target: "rtsp_session", "only 8-bit precision is supported");
                    }
                    // a quantization table entry is 65 bytes (id + 64 values)
                    let tables = (u16::from_be_bytes([data[i + 2], data[i + 3]]) / 65) as usize;
                    if i + 5 + tables * 65 > size {
                        warn!(target: "rtsp_session", "truncated DQT segment");
                        return Ok(());
                    }
                    if nb_qtables + tables > 4 {
                        error!(target: "rtsp_session", "invalid number of quantization tables");
                        return Ok(());
                    }
                    for j in 0..tables {
                        qtables[nb_qtables + j] = i + 5 + j * 65;
                    }
                    nb_qtables += tables;
                    i += 2;
                }
                mjpeg::SOF0 => {
                    if i + 17 >= size {
                        return Ok(());
                    }
                    if data[i + 14] != 17 || data[i + 17] != 17 {
                        error!(target: "rtsp_session", "only 1x1 chroma blocks are supported");
                        return Ok(());
                    }
                    i += 2;
                }
                mjpeg::DHT => {
                    if i + 4 > size {
                        return Ok(());
                    }
                    let mut dht_size = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
                    default_huffman_tables |= 1 << 4;
                    i += 3;
                    dht_size = dht_size.saturating_sub(2);
                    if i + dht_size >= size {
                        continue;
                    }
                    while dht_size > 0 {
                        if i + 1 >= size {
                            break;
                        }
                        match data[i + 1] {
                            0x00 if dht_size >= 29
                                && data[i + 2..i + 18] == mjpeg::BITS_DC_LUMINANCE[1..]
                                && data[i + 18..i + 30] == mjpeg::VAL_DC =>
                            {
                                default_huffman_tables |= 1;
                                i += 29;
                                dht_size -= 29;
                            }
                            0x01 if dht_size >= 29
                                && data[i + 2..i + 18] == mjpeg::BITS_DC_CHROMINANCE[1..]
                                && data[i + 18..i + 30] == mjpeg::VAL_DC =>
                            {
                                default_huffman_tables |= 1 << 1;
                                i += 29;
                                dht_size -= 29;
                            }
                            0x10 if dht_size >= 179
                                && data[i + 2..i + 18] == mjpeg::BITS_AC_LUMINANCE[1..]
                                && data[i + 18..i + 180] == mjpeg::VAL_AC_LUMINANCE =>
                            {
                                default_huffman_tables |= 1 << 2;
                                i += 179;
                                dht_size -= 179;
                            }
                            0x11 if dht_size >= 179
                                && data[i + 2..i + 18] == mjpeg::BITS_AC_CHROMINANCE[1..]
                                && data[i + 18..i + 180] == mjpeg::VAL_AC_CHROMINANCE =>
                            {
                                default_huffman_tables |= 1 << 3;
                                i += 179;
                                dht_size -= 179;
                            }
                            _ => {
                                i += dht_size;
                                dht_size = 0;
                            }
                        }
                    }
                }
                mjpeg::SOS => {
                    // SOS is the last marker in the header
                    if i + 3 >= size {
                        return Ok(());
                    }
                    i += u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize + 2;
                    if i > size {
                        error!(target: "rtsp_session", "insufficient data in SOS");
                        return Ok(());
                    }
                    break;
                }
                _ => {
                    i += 1;
                }
            }
        }

        if default_huffman_tables != 0 && default_huffman_tables != 31 {
            error!(target: "rtsp_session", "RFC 2435 requires standard Huffman tables");
            return Ok(());
        }
        if nb_qtables != 0 && nb_qtables != 2 {
            error!(target: "rtsp_session", "RFC 2435 suggests two quantization tables");
        }

        // strip the JPEG file header and the trailing EOI marker
        let skip_pos = i;
        size -= i;
        let mut j = size as isize - 2;
        while j >= 0 {
            let j_us = j as usize;
            if data[skip_pos + j_us] == 0xff && data[skip_pos + j_us + 1] == mjpeg::EOI {
                size = j_us;
                break;
            }
            j -= 1;
        }

        let mut offset = 0usize;
        while size > 0 {
            let mut hdr_size = 8;
            if offset == 0 && nb_qtables != 0 {
                hdr_size += 4 + 64 * nb_qtables;
            }
            let data_len = size.min(max_payload_size - hdr_size);

            let mut w = BytesMut::with_capacity(12 + hdr_size + data_len);
            self.mux.write_rtp_header(&mut w, payload_type, size == data_len);

            // main header
            w.put_u32(offset as u32 & 0xffffff);
            w.put_u8(header_type);
            w.put_u8(255);
            w.put_u8((width >> 3) as u8);
            w.put_u8((height >> 3) as u8);

            if offset == 0 && nb_qtables != 0 {
                // quantization table header
                w.put_u8(0);
                w.put_u8(0);
                w.put_u16(64 * nb_qtables as u16);
                for q in qtables.iter().take(nb_qtables) {
                    w.put_slice(&data[*q..*q + 64]);
                }
            }

            w.put_slice(&data[skip_pos + offset..skip_pos + offset + data_len]);
            self.write_raw(channel, &w)?;
            size -= data_len;
            offset += data_len;
        }
        Ok(())
    }

    fn write_aac_packet(&mut self, pkt: &Packet, channel: u8) -> Result<()> {
        let payload_type = self.mux.protocol.payload_type();
        self.mux.timestamp = self.mux.cur_timestamp;

        let body = wrap_access_unit(&pkt.data);
        let mut w = BytesMut::with_capacity(12 + body.len());
        self.mux.write_rtp_header(&mut w, payload_type, true);
        w.put_slice(&body);
        self.write_raw(channel, &w)
    }

    fn write_pcm_packet(&mut self, pkt: &Packet, channel: u8) -> Result<()> {
        let payload_type = self.mux.protocol.payload_type();
        self.mux.timestamp = self.mux.cur_timestamp;

        let mut w = BytesMut::with_capacity(12 + pkt.data.len());
        self.mux.write_rtp_header(&mut w, payload_type, true);
        w.put_slice(&pkt.data);
        self.write_raw(channel, &w)
    }

    /// 打包发送一个访问单元；首包与每 5 秒补发一次 SR
    pub(crate) fn write_packet(&mut self, pkt: &Packet) -> Result<()> {
        let idx = pkt.stream_idx;
        let channel = (2 * idx) as u8;
        let ntp_time = rtcp::ntp_now_micros();

        if let Some(extra) = pkt.extra.as_ref() {
            if extra.len() == 4 && extra[..] == RTCP_EOF_SSRC.to_be_bytes() {
                // out-of-band end-of-stream marker
                return self.write_sr(idx, ntp_time, "", true, true);
            }
        }

        if self.mux.first_packet || ntp_time - self.mux.last_rtcp_ntp_time > 5_000_000 {
            self.write_sr(idx, ntp_time, "", false, false)?;
            self.mux.first_packet = false;
        }

        let time_base = self.mux.time_base as u128;
        let t = pkt.time.unwrap_or_default();
        self.mux.cur_timestamp = self
            .mux
            .base_timestamp
            .wrapping_add((t.as_nanos() * time_base / 1_000_000_000) as u32);

        match self.mux.protocol.codec_type() {
            CodecType::H264 => self.write_h264_packet(pkt, channel),
            CodecType::H265 => self.write_h265_packet(pkt, channel),
            CodecType::Mjpeg => self.write_mjpeg_packet(pkt, channel),
            CodecType::Aac => self.write_aac_packet(pkt, channel),
            CodecType::PcmAlaw | CodecType::PcmMulaw => self.write_pcm_packet(pkt, channel),
            other => {
                debug!(target: "rtsp_session", "no egress path for {}", other);
                Ok(())
            }
        }
    }
}
