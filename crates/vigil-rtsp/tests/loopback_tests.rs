use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use vigil_media_core::{CodecData, CodecType, Packet};
use vigil_rtsp::sdp::SdpInfo;
use vigil_rtsp::{RtspClient, Server, ServerConfig};

const SPS: [u8; 8] = [0x67, 0x42, 0x00, 0x1e, 0xf4, 0x05, 0x01, 0xe8];
const PPS: [u8; 4] = [0x68, 0xce, 0x06, 0xe2];

fn h264_codec_data() -> CodecData {
    CodecData::H264 {
        sps: Bytes::from_static(&SPS),
        pps: Bytes::from_static(&PPS),
        width: 640,
        height: 480,
    }
}

/// 推流端喂的裸 NALU
fn test_nalu(i: u8) -> Vec<u8> {
    let mut nalu = vec![0x65];
    nalu.extend((0..64).map(|j| j ^ i));
    nalu
}

async fn start_server() -> std::net::SocketAddr {
    let mut server = Server::new(ServerConfig::default());

    server.handle_publish = Some(Box::new(|_url| {
        Ok(SdpInfo {
            codec_datas: vec![Some(h264_codec_data())],
            ..Default::default()
        })
    }));

    server.handle_play = Some(Box::new(|session| {
        let session = session.clone();
        tokio::spawn(async move {
            for i in 0..200u8 {
                let pkt = Packet {
                    codec: Some(CodecType::H264),
                    is_keyframe: true,
                    stream_idx: 0,
                    time: Some(Duration::from_millis(i as u64 * 40)),
                    data: Bytes::from(test_nalu(i)),
                    ..Default::default()
                };
                if session.write_packet(&pkt).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        Ok(())
    }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::new(server).serve(listener));
    addr
}

/// 完整回环：推流服务端 → TCP 交错 → 拉流客户端
#[tokio::test]
async fn test_tcp_interleaved_loopback() {
    let addr = start_server().await;

    let result = tokio::time::timeout(Duration::from_secs(15), async {
        let mut client = RtspClient::connect(&format!("rtsp://{}/live", addr))
            .await
            .unwrap();

        let streams = client.streams().await.unwrap();
        assert_eq!(streams.len(), 1);
        let cd = streams[0].as_ref().unwrap();
        assert_eq!(cd.codec_type(), CodecType::H264);
        assert_eq!(cd.dimensions(), Some((640, 480)));

        // 序列号试用期会吃掉最前面的包，后续访问单元按序到达
        let mut packets = Vec::new();
        for _ in 0..5 {
            packets.push(client.read_packet().await.unwrap());
        }
        let _ = client.teardown().await;
        packets
    })
    .await
    .expect("loopback timed out");

    for pkt in &result {
        assert_eq!(pkt.stream_idx, 0);
        assert!(pkt.is_keyframe);
        assert!(pkt.time.is_some());
        // 4 字节大端长度前缀 + 原始 NALU
        let size = u32::from_be_bytes([pkt.data[0], pkt.data[1], pkt.data[2], pkt.data[3]]);
        assert_eq!(size as usize, pkt.data.len() - 4);
        assert_eq!(pkt.data[4], 0x65);
    }
}

/// SDP 协商里带上了 sprop 参数集，客户端应直接拿到解码参数
#[tokio::test]
async fn test_codec_data_from_sdp_alone() {
    let addr = start_server().await;
    let mut client = RtspClient::connect(&format!("rtsp://{}/live", addr))
        .await
        .unwrap();
    let info = tokio::time::timeout(Duration::from_secs(10), client.sdp())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.medias.len(), 1);
    assert_eq!(info.medias[0].codec, Some(CodecType::H264));
    assert!(info.codec_datas[0].is_some());
}
