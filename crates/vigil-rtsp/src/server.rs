use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{self, AuthType, DEFAULT_REALM};
use crate::error::{Result, RtspError};
use crate::rtp::{rtcp, RtpMuxContext};
use crate::sdp::SdpInfo;
use crate::session::{Outgoing, Session, SubSession};
use crate::transport::FrameReader;

/// 单个 RTSP 请求的大小上限
const MAX_RTSP_SIZE: usize = 64 * 1024;

/// 服务端认证的三个阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Enable,
    Check,
    Success,
}

/// 回调宿主做认证判定时携带的上下文
pub struct AuthNotify {
    pub url: Option<Url>,
    pub stage: AuthStage,
    pub method: String,
    pub auth_field: String,
}

/// 宿主提供的发布回调：给出该路径的媒体描述，或带重定向地址的错误
pub type PublishHandler = dyn Fn(&Url) -> Result<SdpInfo> + Send + Sync;
/// 宿主提供的播放回调：开始通过 `Session::write_packet` 喂数据
pub type PlayHandler = dyn Fn(&Arc<Session>) -> Result<()> + Send + Sync;
/// 宿主提供的认证回调
pub type AuthHandler = dyn Fn(&AuthNotify) -> Result<()> + Send + Sync;

/// 服务端配置
#[derive(Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub max_fragment_size: usize,
    pub tcp_buffer_channel_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ":554".to_string(),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(65),
            max_fragment_size: 1450,
            // buffer ~2.5 seconds
            tcp_buffer_channel_size: 1024,
        }
    }
}

/// RTSP 推流服务端
///
/// 每个连接一读一写两个任务；会话表只被所属连接的读任务改动。
pub struct Server {
    pub config: ServerConfig,
    pub handle_auth: Option<Box<AuthHandler>>,
    pub handle_publish: Option<Box<PublishHandler>>,
    pub handle_play: Option<Box<PlayHandler>>,

    close_tx: watch::Sender<bool>,
}

/// 读任务里的每连接状态
struct ConnState {
    peer: SocketAddr,
    cseq: u32,
    send_tx: mpsc::Sender<Outgoing>,
    sessions: HashMap<String, Arc<Session>>,
    auth_stage: AuthStage,
    auth_nonce: String,
    last_time_from_client: Arc<AtomicI64>,
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        301 => "Moved Permanently",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            config,
            handle_auth: None,
            handle_publish: None,
            handle_play: None,
            close_tx,
        }
    }

    /// 停止接受新连接
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }

    /// 监听并服务；`close` 之前一直阻塞
    pub async fn listen_and_serve(self: Arc<Self>) -> Result<()> {
        let addr = if self.config.addr.starts_with(':') {
            format!("0.0.0.0{}", self.config.addr)
        } else {
            self.config.addr.clone()
        };
        let listener = TcpListener::bind(&addr).await?;
        info!(target: "rtsp_server", "listening on {}", addr);
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut close_rx = self.close_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (conn, peer) = accepted?;
                    debug!(target: "rtsp_server", "accepted {}", peer);
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_conn(conn, peer).await;
                    });
                }
                _ = close_rx.changed() => {
                    info!(target: "rtsp_server", "accept loop stopped");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_conn(self: Arc<Self>, conn: TcpStream, peer: SocketAddr) {
        info!(target: "rtsp_server", "{} connected", peer);
        let (read_half, write_half) = conn.into_split();

        let (send_tx, send_rx) = mpsc::channel(self.config.tcp_buffer_channel_size);
        let (conn_close_tx, conn_close_rx) = watch::channel(false);

        let write_timeout = self.config.write_timeout;
        let writer = tokio::spawn(write_loop(write_half, send_rx, conn_close_rx, write_timeout));

        let mut state = ConnState {
            peer,
            cseq: 0,
            send_tx,
            sessions: HashMap::new(),
            auth_stage: AuthStage::Enable,
            auth_nonce: String::new(),
            last_time_from_client: Arc::new(AtomicI64::new(rtcp::ntp_now_micros())),
        };

        let err = self.read_loop(read_half, &mut state).await;
        info!(target: "rtsp_server", "{} disconnected: {:?}", peer, err.err());

        // 连接断开：所有会话收尾
        for session in state.sessions.values() {
            session.teardown();
        }
        let _ = conn_close_tx.send(true);
        let _ = writer.await;
    }

    async fn read_loop(&self, read_half: OwnedReadHalf, state: &mut ConnState) -> Result<()> {
        let mut reader = FrameReader::new(read_half);
        let heartbeat = self.config.heartbeat_timeout;

        loop {
            let first = if heartbeat.is_zero() {
                reader.peek(1).await?[0]
            } else {
                loop {
                    match tokio::time::timeout(heartbeat, reader.peek(1)).await {
                        Ok(peeked) => break peeked?[0],
                        Err(_) => {
                            if self.has_heartbeat_timeout(state) {
                                error!(
                                    target: "rtsp_server",
                                    "heartbeat timeout after {:?}", heartbeat
                                );
                                return Err(RtspError::Timeout);
                            }
                        }
                    }
                }
            };

            self.mark_last_time(state);

            if first.is_ascii_uppercase() {
                self.dispatch(&mut reader, state).await?;
            } else if first == b'$' {
                // 客户端过来的交错 RTP/RTCP：校验后丢弃
                let mut head = [0u8; 12];
                head.copy_from_slice(reader.peek(12).await?);
                let size = ((head[2] as usize) << 8) + head[3] as usize;
                if head[4] & 0xc0 != 0x80 {
                    return Err(RtspError::Protocol("invalid embedded RTP packet".into()));
                }
                let _ = reader.read_exact_bytes(4 + size).await?;
            } else {
                return Err(RtspError::Protocol("invalid RTSP packet".into()));
            }
        }
    }

    fn mark_last_time(&self, state: &ConnState) {
        state
            .last_time_from_client
            .store(rtcp::ntp_now_micros(), Ordering::Relaxed);
    }

    fn has_heartbeat_timeout(&self, state: &ConnState) -> bool {
        let heartbeat = self.config.heartbeat_timeout;
        if heartbeat.is_zero() {
            return false;
        }
        let t = state.last_time_from_client.load(Ordering::Relaxed);
        rtcp::ntp_now_micros() - t > heartbeat.as_micros() as i64
    }

    async fn dispatch(&self, reader: &mut FrameReader<OwnedReadHalf>, state: &mut ConnState) -> Result<()> {
        let line = reader.read_line().await?;
        let mut parts = line.split_whitespace();
        let (Some(method), Some(raw), Some(proto)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RtspError::Protocol(format!("bad request: {}", line)));
        };
        if proto != "RTSP/1.0" {
            error!(target: "rtsp_server", "bad request: {}", line);
            return Err(RtspError::Protocol("invalid request".into()));
        }
        let method = method.to_string();

        let url = if method == "OPTIONS" && raw == "*" {
            None
        } else {
            match Url::parse(raw) {
                Ok(u) => Some(u),
                Err(_) => {
                    self.write_status(state, 400).await?;
                    return Ok(());
                }
            }
        };

        let mut headers: Vec<(String, String)> = Vec::new();
        let mut total = line.len();
        loop {
            let line = reader.read_line().await?;
            total += line.len();
            if total > MAX_RTSP_SIZE {
                return Err(RtspError::Protocol("request too large".into()));
            }
            if line.is_empty() {
                break;
            }
            if let Some((k, v)) = line.split_once(':') {
                headers.push((k.trim().to_string(), v.trim().to_string()));
            }
        }
        debug!(target: "rtsp_server", "{} {:?}", line, headers);

        // 请求体（若有）直接消费掉，保持帧边界
        if let Some(len) = get_header(&headers, "Content-Length").and_then(|v| v.parse::<usize>().ok())
        {
            if len > MAX_RTSP_SIZE {
                return Err(RtspError::Protocol("request body too large".into()));
            }
            let _ = reader.read_exact_bytes(len).await?;
        }

        if let Some(cseq) = get_header(&headers, "CSeq") {
            state.cseq = cseq
                .parse()
                .map_err(|_| RtspError::Protocol("bad CSeq".into()))?;
        }

        let result = match method.as_str() {
            "OPTIONS" => self.do_options(state, url.as_ref(), &headers).await,
            "DESCRIBE" => self.do_describe(state, url.as_ref(), &headers).await,
            "SETUP" => self.do_setup(state, url.as_ref(), &headers).await,
            "PLAY" => self.do_play(state, &headers).await,
            "TEARDOWN" => self.do_teardown(state, url.as_ref(), &headers).await,
            _ => self.write_status(state, 501).await,
        };
        if let Err(e) = result {
            warn!(target: "rtsp_server", "rtsp server command error: {}", e);
        }
        Ok(())
    }

    async fn write_response(&self, state: &ConnState, lines: Vec<String>, body: Option<Bytes>) -> Result<()> {
        let out = Outgoing::Response { lines, body };
        if self.config.write_timeout.is_zero() {
            state
                .send_tx
                .send(out)
                .await
                .map_err(|_| RtspError::Eof)?;
            return Ok(());
        }
        tokio::time::timeout(self.config.write_timeout, state.send_tx.send(out))
            .await
            .map_err(|_| RtspError::Timeout)?
            .map_err(|_| RtspError::Eof)
    }

    async fn write_status(&self, state: &ConnState, code: u16) -> Result<()> {
        debug!(target: "rtsp_server", "write status: {}", code);
        let lines = vec![
            format!("RTSP/1.0 {} {}", code, status_text(code)),
            format!("CSeq: {}", state.cseq),
            "Public: OPTIONS, DESCRIBE, SETUP, TEARDOWN, PLAY".to_string(),
        ];
        self.write_response(state, lines, None).await
    }

    async fn write_error(&self, state: &ConnState, err: &RtspError) -> Result<()> {
        match err {
            RtspError::Status { code, .. } => self.write_status(state, *code).await,
            _ => self.write_status(state, 400).await,
        }
    }

    async fn write_unauthorized(&self, state: &mut ConnState) -> Result<()> {
        let nonce = auth::md5_hex(&format!("{}", rtcp::ntp_now_micros()));
        state.auth_nonce = nonce.clone();
        let lines = vec![
            format!("RTSP/1.0 401 {}", status_text(401)),
            format!("CSeq: {}", state.cseq),
            format!(
                "WWW-Authenticate: {} realm=\"{}\", nonce=\"{}\"",
                AuthType::Digest,
                DEFAULT_REALM,
                nonce
            ),
        ];
        self.write_response(state, lines, None).await
    }

    /// 向宿主要这个地址的媒体描述；失败时在这里写好错误响应
    async fn publish(&self, state: &ConnState, url: &Url) -> Result<SdpInfo> {
        let Some(handler) = self.handle_publish.as_ref() else {
            self.write_status(state, 404).await?;
            return Err(RtspError::status(404, "no publish handler"));
        };

        match handler(url) {
            Ok(info) => Ok(info),
            Err(RtspError::Redirect(location)) => {
                let lines = vec![
                    format!("RTSP/1.0 301 {}", status_text(301)),
                    format!("CSeq: {}", state.cseq),
                    format!("Location: {}", location),
                ];
                self.write_response(state, lines, None).await?;
                Err(RtspError::Redirect(location))
            }
            Err(e) => {
                self.write_error(state, &e).await?;
                Err(e)
            }
        }
    }

    /// 三阶段认证门：未启用 → 已发质询 → 已通过
    fn process_auth(&self, state: &mut ConnState, method: &str, url: Option<&Url>, headers: &[(String, String)]) -> u16 {
        let Some(handler) = self.handle_auth.as_ref() else {
            return 200;
        };

        match state.auth_stage {
            AuthStage::Enable => {
                let notify = AuthNotify {
                    url: url.cloned(),
                    stage: AuthStage::Enable,
                    method: method.to_string(),
                    auth_field: String::new(),
                };
                if handler(&notify).is_err() {
                    state.auth_stage = AuthStage::Check;
                    401
                } else {
                    state.auth_stage = AuthStage::Success;
                    200
                }
            }
            AuthStage::Check => {
                let auth_field = get_header(headers, "Authorization").unwrap_or_default();
                let parsed = auth::parse_authorization(auth_field);
                let valid = match parsed {
                    Ok(a) => {
                        a.auth_type == AuthType::Digest
                            && a.realm == DEFAULT_REALM
                            && a.digest.nonce == state.auth_nonce
                    }
                    Err(_) => false,
                };
                if !valid {
                    error!(target: "rtsp_server", "mismatched auth info from {}", state.peer);
                    return 401;
                }
                let notify = AuthNotify {
                    url: url.cloned(),
                    stage: AuthStage::Check,
                    method: method.to_string(),
                    auth_field: auth_field.to_string(),
                };
                if handler(&notify).is_ok() {
                    state.auth_stage = AuthStage::Success;
                    200
                } else {
                    401
                }
            }
            AuthStage::Success => 200,
        }
    }

    async fn do_options(&self, state: &mut ConnState, url: Option<&Url>, _headers: &[(String, String)]) -> Result<()> {
        if let Some(url) = url {
            if self.handle_publish.is_some() {
                // 发布预检：拿不到媒体描述时已经写了错误响应
                if let Err(e) = self.publish(state, url).await {
                    return Err(e);
                }
            }
        }
        self.write_status(state, 200).await
    }

    async fn do_describe(&self, state: &mut ConnState, url: Option<&Url>, headers: &[(String, String)]) -> Result<()> {
        let Some(url) = url else {
            return self.write_status(state, 400).await;
        };

        let code = self.process_auth(state, "DESCRIBE", Some(url), headers);
        if code != 200 {
            if code == 401 {
                self.write_unauthorized(state).await?;
            } else {
                self.write_status(state, code).await?;
            }
            return Ok(());
        }

        let info = self.publish(state, url).await?;

        let mut sdps: Vec<String> = vec!["v=0".to_string()];

        if info.range_end > info.range_start {
            sdps.push(format!("a=range:npt={}-{}", info.range_start, info.range_end));
        }
        for (typ, lines) in &info.extra_lines {
            for line in lines {
                if typ != "v" && !(typ == "a" && line.starts_with("range")) {
                    sdps.push(format!("{}={}", typ, line));
                }
            }
        }

        for (i, cd) in info.codec_datas.iter().enumerate() {
            let Some(cd) = cd else { continue };
            let Some(mux) = RtpMuxContext::from_codec_data(cd) else { continue };
            let pt = mux.protocol.payload_type();
            let av_type = if cd.codec_type().is_video() { "video" } else { "audio" };
            sdps.push(format!("m={} 0 RTP/AVP {}", av_type, pt));
            sdps.push(format!("a=control:streamid={}", i));
            sdps.extend(mux.protocol.sdp_lines());
        }
        sdps.push("\r\n".to_string());
        let body = sdps.join("\r\n");

        let lines = vec![
            "RTSP/1.0 200 OK".to_string(),
            format!("CSeq: {}", state.cseq),
            format!("Content-Base: {}/", url),
            "Content-Type: application/sdp".to_string(),
            format!("Content-Length: {}", body.len()),
        ];
        self.write_response(state, lines, Some(Bytes::from(body))).await
    }

    async fn do_setup(&self, state: &mut ConnState, url: Option<&Url>, headers: &[(String, String)]) -> Result<()> {
        let Some(url) = url else {
            return self.write_status(state, 400).await;
        };
        let idx = parse_control(url);

        let transport_header = get_header(headers, "Transport").unwrap_or_default().to_string();
        let transport_params: Vec<&str> = transport_header.split(';').collect();
        let Some(&proto) = transport_params.first() else {
            return self.write_status(state, 400).await;
        };
        let is_udp = match proto {
            "RTP/AVP/TCP" => false,
            "RTP/AVP/UDP" | "RTP/AVP" => true,
            _ => return self.write_status(state, 501).await,
        };

        let info = self.publish(state, url).await?;
        if idx >= info.codec_datas.len() {
            return self.write_status(state, 404).await;
        }
        let Some(cd) = info.codec_datas[idx].as_ref() else {
            return self.write_status(state, 404).await;
        };
        let Some(mux) = RtpMuxContext::from_codec_data(cd) else {
            return self.write_status(state, 404).await;
        };

        let session_id = get_session_id(headers);
        let session = if session_id.is_empty() {
            let session = Arc::new(Session::new(
                url.clone(),
                new_session_id(&state.sessions),
                info.codec_datas.len(),
            ));
            state.sessions.insert(session.id.clone(), session.clone());
            session
        } else {
            match state.sessions.get(&session_id) {
                Some(s) => s.clone(),
                None => return self.write_status(state, 400).await,
            }
        };

        let mut sub = SubSession::new(
            mux,
            is_udp,
            state.send_tx.clone(),
            self.config.max_fragment_size,
        );

        let mut client_ports = (0u16, 0u16);
        let mut server_ports = (0u16, 0u16);
        if is_udp {
            for param in &transport_params {
                if let Some(ports) = param.trim().strip_prefix("client_port=") {
                    if let Some((a, b)) = ports.split_once('-') {
                        if let (Ok(p1), Ok(p2)) = (a.parse::<u16>(), b.parse::<u16>()) {
                            client_ports = (p1, p2);
                        }
                    }
                }
            }
            if client_ports.0 == 0 || client_ports.1 == 0 {
                return self.write_status(state, 400).await;
            }
            match sub
                .setup_udp(
                    state.peer.ip(),
                    client_ports.0,
                    client_ports.1,
                    state.last_time_from_client.clone(),
                )
                .await
            {
                Ok(ports) => server_ports = ports,
                Err(e) => {
                    error!(target: "rtsp_server", "udp setup failed: {}", e);
                    return self.write_status(state, 500).await;
                }
            }
        }

        if !session.install_sub_session(idx, sub) {
            warn!(
                target: "rtsp_server",
                "session {}, stream {} already setup", session.id, idx
            );
            return self.write_status(state, 400).await;
        }

        let transport = if is_udp {
            format!(
                "Transport: RTP/AVP/UDP;unicast;client_port={}-{};server_port={}-{}",
                client_ports.0, client_ports.1, server_ports.0, server_ports.1
            )
        } else {
            format!(
                "Transport: RTP/AVP/TCP;unicast;interleaved={}-{}",
                idx * 2,
                idx * 2 + 1
            )
        };
        let session_line = if self.config.heartbeat_timeout > Duration::ZERO {
            format!(
                "Session: {};timeout={}",
                session.id,
                self.config.heartbeat_timeout.as_secs()
            )
        } else {
            format!("Session: {}", session.id)
        };

        let lines = vec![
            "RTSP/1.0 200 OK".to_string(),
            format!("CSeq: {}", state.cseq),
            session_line,
            transport,
        ];
        self.write_response(state, lines, None).await
    }

    async fn do_play(&self, state: &mut ConnState, headers: &[(String, String)]) -> Result<()> {
        let Some(session) = find_session(state, headers) else {
            return self.write_status(state, 400).await;
        };
        if let Some(handler) = self.handle_play.as_ref() {
            if let Err(e) = handler(&session) {
                return self.write_error(state, &e).await;
            }
        }
        self.write_status(state, 200).await?;
        session.set_playing();
        Ok(())
    }

    async fn do_teardown(&self, state: &mut ConnState, url: Option<&Url>, headers: &[(String, String)]) -> Result<()> {
        let Some(session) = find_session(state, headers) else {
            return self.write_status(state, 400).await;
        };

        // 指定了单个流：只摘掉对应的子会话
        if let Some(url) = url {
            if session.uri.path() != url.path() {
                let idx = parse_control(url);
                session.teardown_stream(idx);
                if session.active_sub_sessions() > 0 {
                    return Ok(());
                }
            }
        }

        session.teardown();
        state.sessions.remove(&session.id);
        self.write_status(state, 200).await
    }
}

fn get_header<'a>(headers: &'a [(String, String)], key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn get_session_id(headers: &[(String, String)]) -> String {
    get_header(headers, "Session")
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .unwrap_or_default()
}

fn find_session(state: &ConnState, headers: &[(String, String)]) -> Option<Arc<Session>> {
    let id = get_session_id(headers);
    if id.is_empty() {
        return None;
    }
    state.sessions.get(&id).cloned()
}

/// 从请求路径末段解析 streamid=N
fn parse_control(url: &Url) -> usize {
    url.path()
        .rsplit('/')
        .next()
        .and_then(|last| last.strip_prefix("streamid="))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn new_session_id(sessions: &HashMap<String, Arc<Session>>) -> String {
    loop {
        let id = rand::random::<u64>().to_string();
        if !sessions.contains_key(&id) {
            return id;
        }
    }
}

/// 写任务：从发送队列里取响应或 $ 帧写到连接上
async fn write_loop(
    write_half: OwnedWriteHalf,
    mut send_rx: mpsc::Receiver<Outgoing>,
    mut close_rx: watch::Receiver<bool>,
    write_timeout: Duration,
) {
    let mut writer = BufWriter::new(write_half);
    loop {
        let out = tokio::select! {
            _ = close_rx.changed() => break,
            out = send_rx.recv() => match out {
                Some(out) => out,
                None => break,
            },
        };

        let result = async {
            match out {
                Outgoing::Response { lines, body } => {
                    for line in &lines {
                        writer.write_all(line.as_bytes()).await?;
                        writer.write_all(b"\r\n").await?;
                    }
                    writer.write_all(b"\r\n").await?;
                    if let Some(body) = body {
                        writer.write_all(&body).await?;
                    }
                }
                Outgoing::Embedded { channel, body } => {
                    if body.len() > 65535 {
                        return Err(RtspError::Protocol("rtp frame too large".into()));
                    }
                    let header = crate::transport::interleaved_header(channel, body.len() as u16);
                    writer.write_all(&header).await?;
                    writer.write_all(&body).await?;
                }
            }
            writer.flush().await?;
            Ok::<(), RtspError>(())
        };

        let result = if write_timeout.is_zero() {
            result.await
        } else {
            match tokio::time::timeout(write_timeout, result).await {
                Ok(r) => r,
                Err(_) => Err(RtspError::Timeout),
            }
        };

        if let Err(e) = result {
            error!(target: "rtsp_server", "write error: {}", e);
            break;
        }
    }
    debug!(target: "rtsp_server", "write loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control() {
        let url = Url::parse("rtsp://host/live/streamid=2").unwrap();
        assert_eq!(parse_control(&url), 2);
        let url = Url::parse("rtsp://host/live").unwrap();
        assert_eq!(parse_control(&url), 0);
    }

    #[test]
    fn test_get_session_id() {
        let headers = vec![("Session".to_string(), "12345;timeout=60".to_string())];
        assert_eq!(get_session_id(&headers), "12345");
        assert_eq!(get_session_id(&[]), "");
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(401), "Unauthorized");
        assert_eq!(status_text(501), "Not Implemented");
    }

    #[test]
    fn test_new_session_id_unique() {
        let mut sessions = HashMap::new();
        let id = new_session_id(&sessions);
        sessions.insert(
            id.clone(),
            Arc::new(Session::new(Url::parse("rtsp://h/s").unwrap(), id.clone(), 1)),
        );
        let id2 = new_session_id(&sessions);
        assert_ne!(id, id2);
    }
}
