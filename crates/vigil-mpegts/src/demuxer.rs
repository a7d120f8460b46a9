use bytes::{BufMut, Bytes, BytesMut};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};
use vigil_media_core::{aac, h264, CodecData, CodecType, Packet};

use crate::tsio::{self, Pat, Pmt, TS_PACKET_SIZE};
use crate::{Result, TsError};

/// TS 解复用出的一路基本流
struct TsStream {
    idx: usize,
    pid: u16,
    stream_type: u8,
    codec_data: Option<CodecData>,

    pts: Option<Duration>,
    dts: Option<Duration>,
    data: Option<BytesMut>,
    data_len: usize,
    is_keyframe: bool,
}

/// 最小化的 MPEG-TS 解复用器
///
/// PAT → PMT → PES，只消费 H264 与 ADTS-AAC 基本流，产出与 RTP
/// 路径相同形态的访问单元。
pub struct TsDemuxer<R: Read> {
    reader: R,
    packet_buf: [u8; TS_PACKET_SIZE],

    packets: Vec<Packet>,

    pat: Option<Pat>,
    pmt: Option<Pmt>,
    streams: Vec<TsStream>,

    probed: bool,
}

impl<R: Read> TsDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            packet_buf: [0; TS_PACKET_SIZE],
            packets: Vec::new(),
            pat: None,
            pmt: None,
            streams: Vec::new(),
            probed: false,
        }
    }

    /// 读文件头直到每路流的解码参数齐全
    pub fn streams(&mut self) -> Result<Vec<Option<CodecData>>> {
        self.probe()?;
        Ok(self.streams.iter().map(|s| s.codec_data.clone()).collect())
    }

    fn probe(&mut self) -> Result<()> {
        if self.probed {
            return Ok(());
        }
        loop {
            if self.pmt.is_some() {
                let mut ready = 0;
                let mut video_idx = None;
                let mut audio_idx = None;
                for (idx, stream) in self.streams.iter().enumerate() {
                    if stream.codec_data.is_some() {
                        ready += 1;
                    }
                    if tsio::is_video_stream_type(stream.stream_type) {
                        video_idx = Some(idx);
                    }
                    if tsio::is_audio_stream_type(stream.stream_type) {
                        audio_idx = Some(idx);
                    }
                }
                if ready == self.streams.len() {
                    break;
                }

                if let Err(e) = self.poll() {
                    // 有些 HLS 源没有音频数据：丢掉一直没等到参数的音频流
                    if let (Some(v), Some(a)) = (video_idx, audio_idx) {
                        if self.streams[v].codec_data.is_some()
                            && self.streams[a].codec_data.is_none()
                        {
                            debug!(target: "ts_demuxer", "stream {} missing audio codec data, removed", a);
                            self.streams.remove(a);
                            break;
                        }
                    }
                    return Err(e);
                }
            } else if let Err(e) = self.poll() {
                return Err(e);
            }
        }
        self.probed = true;
        Ok(())
    }

    /// 取一个访问单元；流结束返回 `TsError::Eof`
    pub fn read_packet(&mut self) -> Result<Packet> {
        self.probe()?;
        while self.packets.is_empty() {
            self.poll()?;
        }
        Ok(self.packets.remove(0))
    }

    fn poll(&mut self) -> Result<()> {
        match self.read_ts_packet() {
            Ok(()) => Ok(()),
            Err(TsError::Eof) => {
                // flush whatever is buffered
                let n = self.payload_end()?;
                if n == 0 {
                    Err(TsError::Eof)
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e),
        }
    }

    fn payload_end(&mut self) -> Result<usize> {
        let mut n = 0;
        for i in 0..self.streams.len() {
            n += Self::flush_stream(&mut self.streams[i], &mut self.packets)?;
        }
        Ok(n)
    }

    fn read_ts_packet(&mut self) -> Result<()> {
        if let Err(e) = self.reader.read_exact(&mut self.packet_buf) {
            return if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Err(TsError::Eof)
            } else {
                Err(TsError::Io(e))
            };
        }

        let header = tsio::parse_ts_header(&self.packet_buf)?;
        let payload = &self.packet_buf[header.header_len..];

        if self.pat.is_none() {
            if header.pid == 0 {
                let (_, hdr_len, data_len) = tsio::parse_psi(payload)?;
                self.pat = Some(Pat::unmarshal(&payload[hdr_len..hdr_len + data_len])?);
            }
            return Ok(());
        }

        if self.pmt.is_none() {
            let is_pmt_pid = self
                .pat
                .as_ref()
                .map(|pat| pat.entries.iter().any(|e| e.program_map_pid == header.pid))
                .unwrap_or(false);
            if is_pmt_pid {
                let (_, hdr_len, data_len) = tsio::parse_psi(payload)?;
                let pmt = Pmt::unmarshal(&payload[hdr_len..hdr_len + data_len])?;

                self.streams.clear();
                for (i, info) in pmt.elementary_stream_infos.iter().enumerate() {
                    match info.stream_type {
                        tsio::STREAM_TYPE_H264 | tsio::STREAM_TYPE_ADTS_AAC => {
                            self.streams.push(TsStream {
                                idx: i,
                                pid: info.elementary_pid,
                                stream_type: info.stream_type,
                                codec_data: None,
                                pts: None,
                                dts: None,
                                data: None,
                                data_len: 0,
                                is_keyframe: false,
                            });
                        }
                        other => {
                            warn!(target: "ts_demuxer", "ignoring stream type {:#x}", other);
                        }
                    }
                }
                self.pmt = Some(pmt);
            }
            return Ok(());
        }

        if !header.has_payload {
            return Ok(());
        }
        let payload = Bytes::copy_from_slice(payload);
        for i in 0..self.streams.len() {
            if self.streams[i].pid == header.pid {
                let stream = &mut self.streams[i];
                if header.start {
                    Self::flush_stream(stream, &mut self.packets)?;
                    let pes = tsio::parse_pes_header(&payload)?;
                    stream.pts = pes.pts;
                    stream.dts = pes.dts;
                    stream.data_len = pes.data_len;
                    stream.is_keyframe = header.keyframe;
                    let mut buf = BytesMut::with_capacity(pes.data_len.max(4096));
                    buf.put_slice(&payload[pes.header_len..]);
                    stream.data = Some(buf);
                } else if let Some(data) = stream.data.as_mut() {
                    data.put_slice(&payload);
                }
                break;
            }
        }
        Ok(())
    }

    /// 一个 PES 包收完：拆成访问单元
    fn flush_stream(stream: &mut TsStream, packets: &mut Vec<Packet>) -> Result<usize> {
        let Some(payload) = stream.data.take() else {
            return Ok(0);
        };
        let payload = payload.freeze();
        if payload.is_empty() {
            return Ok(0);
        }
        if stream.data_len != 0 && payload.len() != stream.data_len {
            return Err(TsError::InvalidData(format!(
                "pes size mismatch size={} correct={}",
                payload.len(),
                stream.data_len
            )));
        }

        let dts = stream.dts.or(stream.pts);
        let pts = stream.pts.or(dts);
        let mut count = 0;

        match stream.stream_type {
            tsio::STREAM_TYPE_ADTS_AAC => {
                let mut rest = &payload[..];
                let mut delta = Duration::ZERO;
                while !rest.is_empty() {
                    let header = aac::parse_adts_header(rest)?;
                    if stream.codec_data.is_none() {
                        let cfg = aac::make_audio_specific_config(
                            header.config.object_type,
                            header.config.sample_rate_index,
                            header.config.channel_config,
                        );
                        stream.codec_data = Some(aac::codec_data_from_config(&cfg)?);
                    }
                    if header.frame_len > rest.len() {
                        return Err(TsError::InvalidData("truncated ADTS frame".into()));
                    }
                    packets.push(Packet {
                        codec: Some(CodecType::Aac),
                        is_keyframe: true,
                        stream_idx: stream.idx as i8,
                        time: dts.map(|d| d + delta),
                        data: Bytes::copy_from_slice(&rest[header.header_len..header.frame_len]),
                        ..Default::default()
                    });
                    count += 1;
                    delta += Duration::from_nanos(
                        header.samples as u64 * 1_000_000_000 / header.config.sample_rate as u64,
                    );
                    rest = &rest[header.frame_len..];
                }
            }
            tsio::STREAM_TYPE_H264 => {
                let (nalus, _) = h264::split_nalus(&payload);
                let mut sps: Option<Bytes> = None;
                let mut pps: Option<Bytes> = None;
                let mut out = BytesMut::new();
                for nalu in nalus {
                    if nalu.is_empty() {
                        continue;
                    }
                    match h264::nalu_type(nalu[0]) {
                        h264::NALU_SPS => sps = Some(nalu),
                        h264::NALU_PPS => pps = Some(nalu),
                        _ => {
                            // raw nalu to length-prefixed form
                            out.put_u32(nalu.len() as u32);
                            out.put_slice(&nalu);
                            count += 1;
                        }
                    }
                }
                if !out.is_empty() {
                    let composition_time = match (pts, dts) {
                        (Some(p), Some(d)) if p > d => p - d,
                        _ => Duration::ZERO,
                    };
                    packets.push(Packet {
                        codec: Some(CodecType::H264),
                        is_keyframe: stream.is_keyframe,
                        stream_idx: stream.idx as i8,
                        time: dts,
                        composition_time,
                        data: out.freeze(),
                        ..Default::default()
                    });
                }
                if stream.codec_data.is_none() {
                    if let (Some(sps), Some(pps)) = (sps, pps) {
                        if let Ok(info) = h264::parse_sps(&sps) {
                            stream.codec_data = Some(CodecData::H264 {
                                sps,
                                pps,
                                width: info.width,
                                height: info.height,
                            });
                        }
                    }
                }
            }
            _ => {}
        }

        Ok(count)
    }
}
