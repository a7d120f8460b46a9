use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use vigil_media_core::CodecData;
use vigil_rtsp::auth;
use vigil_rtsp::sdp::SdpInfo;
use vigil_rtsp::{RtspError, Server, ServerConfig};

const SPS: [u8; 8] = [0x67, 0x42, 0x00, 0x1e, 0xf4, 0x05, 0x01, 0xe8];
const PPS: [u8; 4] = [0x68, 0xce, 0x06, 0xe2];

fn publish_info() -> SdpInfo {
    SdpInfo {
        codec_datas: vec![Some(CodecData::H264 {
            sps: Bytes::from_static(&SPS),
            pps: Bytes::from_static(&PPS),
            width: 640,
            height: 480,
        })],
        ..Default::default()
    }
}

async fn start_server(server: Server) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::new(server).serve(listener));
    addr
}

struct RawClient {
    reader: BufReader<TcpStream>,
    cseq: u32,
}

struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl RawResponse {
    fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl RawClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let conn = TcpStream::connect(addr).await.unwrap();
        Self {
            reader: BufReader::new(conn),
            cseq: 0,
        }
    }

    async fn request(&mut self, method: &str, uri: &str, extra: &[String]) -> RawResponse {
        self.cseq += 1;
        let mut req = format!("{} {} RTSP/1.0\r\nCSeq: {}\r\n", method, uri, self.cseq);
        for h in extra {
            req.push_str(h);
            req.push_str("\r\n");
        }
        req.push_str("\r\n");
        self.reader.get_mut().write_all(req.as_bytes()).await.unwrap();

        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        let status: u16 = line.split(' ').nth(1).unwrap().parse().unwrap();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((k, v)) = line.split_once(':') {
                headers.push((k.trim().to_string(), v.trim().to_string()));
            }
        }

        let mut body = String::new();
        if let Some(len) = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
        {
            let mut buf = vec![0u8; len];
            self.reader.read_exact(&mut buf).await.unwrap();
            body = String::from_utf8_lossy(&buf).to_string();
        }

        RawResponse { status, headers, body }
    }
}

fn basic_server() -> Server {
    let mut server = Server::new(ServerConfig::default());
    server.handle_publish = Some(Box::new(|_url| Ok(publish_info())));
    server
}

#[tokio::test]
async fn test_describe_announces_streams() {
    let addr = start_server(basic_server()).await;
    let mut client = RawClient::connect(addr).await;

    let res = client
        .request("OPTIONS", &format!("rtsp://{}/live", addr), &[])
        .await;
    assert_eq!(res.status, 200);
    assert!(res.header("Public").unwrap().contains("DESCRIBE"));

    let res = client
        .request("DESCRIBE", &format!("rtsp://{}/live", addr), &[])
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.header("Content-Type"), Some("application/sdp"));
    assert!(res.body.contains("m=video 0 RTP/AVP 96"));
    assert!(res.body.contains("a=control:streamid=0"));
    assert!(res.body.contains("sprop-parameter-sets="));
}

#[tokio::test]
async fn test_options_star_accepted() {
    let addr = start_server(basic_server()).await;
    let mut client = RawClient::connect(addr).await;
    let res = client.request("OPTIONS", "*", &[]).await;
    assert_eq!(res.status, 200);
}

#[tokio::test]
async fn test_setup_rejects_duplicate_substream() {
    let addr = start_server(basic_server()).await;
    let mut client = RawClient::connect(addr).await;
    let uri = format!("rtsp://{}/live/streamid=0", addr);
    let transport = "Transport: RTP/AVP/TCP;unicast;interleaved=0-1".to_string();

    let res = client.request("SETUP", &uri, &[transport.clone()]).await;
    assert_eq!(res.status, 200);
    let session = res.header("Session").unwrap().split(';').next().unwrap().to_string();
    assert!(res.header("Transport").unwrap().contains("interleaved=0-1"));

    // 同一子流再次 SETUP 被拒
    let res = client
        .request("SETUP", &uri, &[transport, format!("Session: {}", session)])
        .await;
    assert_eq!(res.status, 400);
}

#[tokio::test]
async fn test_teardown_whole_session() {
    let addr = start_server(basic_server()).await;
    let mut client = RawClient::connect(addr).await;
    let uri = format!("rtsp://{}/live/streamid=0", addr);

    let res = client
        .request(
            "SETUP",
            &uri,
            &["Transport: RTP/AVP/TCP;unicast;interleaved=0-1".to_string()],
        )
        .await;
    let session = res.header("Session").unwrap().split(';').next().unwrap().to_string();

    let res = client
        .request(
            "TEARDOWN",
            &format!("rtsp://{}/live", addr),
            &[format!("Session: {}", session)],
        )
        .await;
    assert_eq!(res.status, 200);

    // 会话没了：PLAY 报 400
    let res = client
        .request(
            "PLAY",
            &format!("rtsp://{}/live", addr),
            &[format!("Session: {}", session)],
        )
        .await;
    assert_eq!(res.status, 400);
}

#[tokio::test]
async fn test_setup_rejects_unknown_transport() {
    let addr = start_server(basic_server()).await;
    let mut client = RawClient::connect(addr).await;
    let res = client
        .request(
            "SETUP",
            &format!("rtsp://{}/live/streamid=0", addr),
            &["Transport: RAW/RAW/UDP".to_string()],
        )
        .await;
    assert_eq!(res.status, 501);
}

#[tokio::test]
async fn test_publish_redirect() {
    let mut server = Server::new(ServerConfig::default());
    server.handle_publish = Some(Box::new(|_url| {
        Err(RtspError::Redirect("rtsp://other/live".to_string()))
    }));
    let addr = start_server(server).await;
    let mut client = RawClient::connect(addr).await;

    let res = client
        .request("DESCRIBE", &format!("rtsp://{}/live", addr), &[])
        .await;
    assert_eq!(res.status, 301);
    assert_eq!(res.header("Location"), Some("rtsp://other/live"));
}

#[tokio::test]
async fn test_digest_auth_gate() {
    let mut server = basic_server();
    // 质询阶段拒绝，核验阶段验证 Digest 响应
    server.handle_auth = Some(Box::new(|notify| {
        use vigil_rtsp::server::AuthStage;
        match notify.stage {
            AuthStage::Enable => Err(RtspError::Unauthorized),
            AuthStage::Check => {
                let parsed = auth::parse_authorization(&notify.auth_field)
                    .map_err(|_| RtspError::Unauthorized)?;
                let expected =
                    auth::compute_digest_response(&notify.method, "viewer", "pw", &parsed)?;
                if parsed.digest.response == expected {
                    Ok(())
                } else {
                    Err(RtspError::Unauthorized)
                }
            }
            AuthStage::Success => Ok(()),
        }
    }));
    let addr = start_server(server).await;
    let mut client = RawClient::connect(addr).await;
    let uri = format!("rtsp://{}/live", addr);

    let res = client.request("DESCRIBE", &uri, &[]).await;
    assert_eq!(res.status, 401);
    let challenge = auth::parse_authorization(res.header("WWW-Authenticate").unwrap()).unwrap();
    assert_eq!(challenge.realm, auth::DEFAULT_REALM);
    assert!(!challenge.digest.nonce.is_empty());

    let mut answer = challenge.clone();
    answer.digest.uri = uri.clone();
    let response = auth::compute_digest_response("DESCRIBE", "viewer", "pw", &answer).unwrap();
    let auth_line = format!(
        "Authorization: Digest username=\"viewer\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
        answer.realm, answer.digest.nonce, uri, response
    );

    let res = client.request("DESCRIBE", &uri, &[auth_line]).await;
    assert_eq!(res.status, 200);
    assert!(res.body.contains("m=video"));
}
