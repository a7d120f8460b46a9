use anyhow::{anyhow, Result};
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use vigil_media_core::{h264, CodecData, CodecType, Packet};
use vigil_mpegts::{TsDemuxer, TsError};
use vigil_rtsp::rtp::RTCP_EOF_SSRC;
use vigil_rtsp::session::SessionEvent;
use vigil_rtsp::{RtspClient, RtspError, Session};

/// 转发通道容量（慢客户端落后时丢旧帧）
const RELAY_CHANNEL_SIZE: usize = 1024;

/// 中继统计
#[derive(Debug, Default)]
pub struct RelayStats {
    pub packets_in: AtomicU64,
    pub packets_out: AtomicU64,
    pub viewers: AtomicU64,
}

/// 单路源的转发器：一个拉流任务广播给任意多个播放会话
pub struct RelayManager {
    codec_datas: Vec<Option<CodecData>>,
    tx: broadcast::Sender<Packet>,
    pub stats: Arc<RelayStats>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

/// H264 访问单元按 NALU 拆开发（服务端出口期望裸 NALU）
fn split_for_egress(pkt: Packet, out: &mut Vec<Packet>) {
    if pkt.codec != Some(CodecType::H264) {
        out.push(pkt);
        return;
    }
    let (nalus, _) = h264::split_nalus(&pkt.data);
    for nalu in nalus {
        if nalu.is_empty() {
            continue;
        }
        out.push(Packet {
            data: nalu,
            ..pkt.clone()
        });
    }
}

impl RelayManager {
    fn new(codec_datas: Vec<Option<CodecData>>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(RELAY_CHANNEL_SIZE);
        Arc::new(Self {
            codec_datas,
            tx,
            stats: Arc::new(RelayStats::default()),
            start_time: chrono::Utc::now(),
        })
    }

    pub fn codec_datas(&self) -> Vec<Option<CodecData>> {
        self.codec_datas.clone()
    }

    fn broadcast(&self, pkt: Packet) {
        self.stats.packets_in.fetch_add(1, Ordering::Relaxed);
        // no receivers is fine, the stream keeps running
        let _ = self.tx.send(pkt);
    }

    fn broadcast_eof(&self) {
        for idx in 0..self.codec_datas.len() {
            self.broadcast(Packet {
                stream_idx: idx as i8,
                extra: Some(Bytes::copy_from_slice(&RTCP_EOF_SSRC.to_be_bytes())),
                ..Default::default()
            });
        }
    }

    /// 从远端 RTSP 源拉流
    pub async fn start_rtsp(source: &str, use_udp: bool) -> Result<Arc<Self>> {
        let mut client = RtspClient::connect(source).await?;
        client.set_use_udp(use_udp);
        let codec_datas = client.streams().await?;
        info!(target: "relay", "source ready with {} streams", codec_datas.len());

        let manager = Self::new(codec_datas);
        let pump = manager.clone();
        let source = source.to_string();
        tokio::spawn(async move {
            loop {
                match client.read_packet().await {
                    Ok(pkt) => {
                        let mut packets = Vec::with_capacity(1);
                        split_for_egress(pkt, &mut packets);
                        for pkt in packets {
                            pump.broadcast(pkt);
                        }
                    }
                    Err(RtspError::Eof) => {
                        info!(target: "relay", "source {} ended", source);
                        pump.broadcast_eof();
                        break;
                    }
                    Err(e) => {
                        error!(target: "relay", "source {} error: {}", source, e);
                        pump.broadcast_eof();
                        break;
                    }
                }
            }
            let _ = client.teardown().await;
        });
        Ok(manager)
    }

    /// 从本地 TS 文件拉流（HLS 分片等）
    pub async fn start_ts_file(path: &Path) -> Result<Arc<Self>> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow!("open {}: {}", path.display(), e))?;
        let mut demuxer = TsDemuxer::new(std::io::BufReader::new(file));
        let codec_datas = tokio::task::block_in_place(|| demuxer.streams())?;
        info!(target: "relay", "ts source ready with {} streams", codec_datas.len());

        let manager = Self::new(codec_datas);
        let pump = manager.clone();
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            loop {
                let pkt = match tokio::task::block_in_place(|| demuxer.read_packet()) {
                    Ok(pkt) => pkt,
                    Err(TsError::Eof) => {
                        info!(target: "relay", "ts source ended");
                        pump.broadcast_eof();
                        break;
                    }
                    Err(e) => {
                        error!(target: "relay", "ts source error: {}", e);
                        pump.broadcast_eof();
                        break;
                    }
                };
                // 按时间戳配速
                if let Some(t) = pkt.time {
                    tokio::time::sleep_until(started + t).await;
                }
                let mut packets = Vec::with_capacity(1);
                split_for_egress(pkt, &mut packets);
                for pkt in packets {
                    pump.broadcast(pkt);
                }
            }
        });
        Ok(manager)
    }

    /// PLAY 回调：为一个会话起转发任务
    pub fn serve_session(self: &Arc<Self>, session: &Arc<Session>) {
        let mut rx = self.tx.subscribe();
        let mut events = session.take_events();
        let session = session.clone();
        let manager = self.clone();

        manager.stats.viewers.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = recv_event(&mut events) => {
                        if matches!(event, Some(SessionEvent::Teardown) | None) {
                            debug!(target: "relay", "session {} done", session.id);
                            break;
                        }
                    }
                    pkt = rx.recv() => match pkt {
                        Ok(pkt) => {
                            if session.is_torn_down() {
                                break;
                            }
                            if let Err(e) = session.write_packet(&pkt) {
                                debug!(target: "relay", "session {} write: {}", session.id, e);
                            } else {
                                manager.stats.packets_out.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(target: "relay", "session {} lagged {} packets", session.id, n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            manager.stats.viewers.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

async fn recv_event(
    events: &mut Option<tokio::sync::mpsc::Receiver<SessionEvent>>,
) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_for_egress_avcc() {
        let mut data = Vec::new();
        data.extend(2u32.to_be_bytes());
        data.extend([0x67, 0xaa]);
        data.extend(3u32.to_be_bytes());
        data.extend([0x65, 0xbb, 0xcc]);

        let pkt = Packet {
            codec: Some(CodecType::H264),
            data: Bytes::from(data),
            ..Default::default()
        };
        let mut out = Vec::new();
        split_for_egress(pkt, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data.as_ref(), &[0x67, 0xaa]);
        assert_eq!(out[1].data.as_ref(), &[0x65, 0xbb, 0xcc]);
    }

    #[test]
    fn test_split_for_egress_passthrough_audio() {
        let pkt = Packet {
            codec: Some(CodecType::Aac),
            data: Bytes::from_static(&[1, 2, 3]),
            ..Default::default()
        };
        let mut out = Vec::new();
        split_for_egress(pkt, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.as_ref(), &[1, 2, 3]);
    }
}
