mod relay;

use clap::Parser;
use relay::RelayManager;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use vigil_rtsp::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "VIGIL RTSP media relay")]
struct Args {
    /// 拉流源：rtsp:// 地址或本地 .ts 文件
    #[arg(long)]
    source: String,

    /// 对外服务地址
    #[arg(long, default_value = "0.0.0.0:8554")]
    bind: String,

    /// 拉流传输方式：tcp 或 udp
    #[arg(long, default_value = "tcp")]
    transport: String,

    /// 状态日志间隔（秒），0 关闭
    #[arg(long, default_value_t = 30)]
    status_interval_secs: u64,

    /// 对外推流的最大分片大小
    #[arg(long, default_value_t = 1450)]
    max_fragment_size: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let manager = if args.source.starts_with("rtsp://") {
        let use_udp = args.transport.eq_ignore_ascii_case("udp");
        RelayManager::start_rtsp(&args.source, use_udp).await?
    } else {
        RelayManager::start_ts_file(&PathBuf::from(&args.source)).await?
    };

    if args.status_interval_secs > 0 {
        let stats = manager.stats.clone();
        let start_time = manager.start_time;
        let interval = Duration::from_secs(args.status_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let status = serde_json::json!({
                    "service": "vigil-rtspd",
                    "start_time": start_time.to_rfc3339(),
                    "packets_in": stats.packets_in.load(Ordering::Relaxed),
                    "packets_out": stats.packets_out.load(Ordering::Relaxed),
                    "viewers": stats.viewers.load(Ordering::Relaxed),
                });
                info!(target: "rtspd", "status: {}", status);
            }
        });
    }

    let mut server = Server::new(ServerConfig {
        addr: args.bind.clone(),
        max_fragment_size: args.max_fragment_size,
        ..Default::default()
    });

    let publish = manager.clone();
    server.handle_publish = Some(Box::new(move |_url| {
        Ok(vigil_rtsp::sdp::SdpInfo {
            codec_datas: publish.codec_datas(),
            ..Default::default()
        })
    }));

    let play = manager.clone();
    server.handle_play = Some(Box::new(move |session| {
        info!(target: "rtspd", "session {} playing", session.id);
        play.serve_session(session);
        Ok(())
    }));

    info!(target: "rtspd", "relaying {} on {}", args.source, args.bind);
    Arc::new(server).listen_and_serve().await?;

    Ok(())
}
