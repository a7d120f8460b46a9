use crate::error::{Result, RtspError};
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::UdpSocket;
use tracing::{debug, error};

use crate::rtp::{RTCP_RR, RTP_VERSION};

/// RTSP 字节流的外层载体
///
/// 默认是 TCP 连接；隧道化传输（例如被另一层帧格式包裹的同一字节流）
/// 只需实现同样的异步读写即可接入客户端。
pub trait Tunnel: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Tunnel for T {}

const MAX_LINE: usize = 64 * 1024;

/// 带前瞻缓冲的帧读取器
///
/// RTSP 连接上交错着文本响应与 $ 开头的二进制帧，需要按首字节分流。
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    async fn fill(&mut self) -> io::Result<()> {
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
        }
        Ok(())
    }

    /// 看 n 字节但不消费
    pub async fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        while self.buf.len() < n {
            self.fill().await?;
        }
        Ok(&self.buf[..n])
    }

    pub fn consume(&mut self, n: usize) {
        let _ = self.buf.split_to(n);
    }

    pub async fn read_u8(&mut self) -> io::Result<u8> {
        let b = self.peek(1).await?[0];
        self.consume(1);
        Ok(b)
    }

    pub async fn read_exact_bytes(&mut self, n: usize) -> io::Result<Bytes> {
        while self.buf.len() < n {
            self.fill().await?;
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// 读一行（去掉 CRLF）
    pub async fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                let mut end = line.len() - 1;
                if end > 0 && line[end - 1] == b'\r' {
                    end -= 1;
                }
                return Ok(String::from_utf8_lossy(&line[..end]).to_string());
            }
            if self.buf.len() > MAX_LINE {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
            }
            self.fill().await?;
        }
    }
}

/// 分配一对相邻的 RTP/RTCP UDP 端口（偶数在前）
///
/// `port` 为 0 时使用系统分配的空闲端口，并重试至多 20 次。
pub async fn find_udp_pair(port: u16) -> Result<(UdpSocket, UdpSocket)> {
    for _ in 0..20 {
        let first = match port {
            0 => UdpSocket::bind("0.0.0.0:0").await,
            p if p % 2 == 0 => UdpSocket::bind(("0.0.0.0", p)).await,
            p => UdpSocket::bind(("0.0.0.0", p - 1)).await,
        };
        let Ok(c1) = first else {
            return Err(RtspError::NoUdpPortPair);
        };

        let p1 = c1.local_addr()?.port();
        let p2 = if p1 % 2 == 0 { p1 + 1 } else { p1 - 1 };

        match UdpSocket::bind(("0.0.0.0", p2)).await {
            Ok(c2) => {
                return if p1 < p2 { Ok((c1, c2)) } else { Ok((c2, c1)) };
            }
            Err(e) => {
                drop(c1);
                if port > 0 {
                    // explicit port pair busy, do not retry
                    error!(target: "rtsp_transport", "udp pair bind failed: {}", e);
                    return Err(RtspError::NoUdpPortPair);
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
    Err(RtspError::NoUdpPortPair)
}

/// 向服务器端口发几个哑包打通 NAT 映射
pub async fn send_punch(sock: &UdpSocket, addr: SocketAddr, rtcp: bool) {
    let dummy: &[u8] = if rtcp {
        // minimal RTCP RR
        &[RTP_VERSION << 6, RTCP_RR, 0, 1, 0, 0, 0, 0]
    } else {
        // minimal RTP
        &[RTP_VERSION << 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    };
    for _ in 0..5 {
        if let Err(e) = sock.send_to(dummy, addr).await {
            debug!(target: "rtsp_transport", "punch send failed to {}: {}", addr, e);
            break;
        }
    }
}

/// 组一个 $ 前缀的交错帧头
pub fn interleaved_header(channel: u8, len: u16) -> [u8; 4] {
    let l = len.to_be_bytes();
    [b'$', channel, l[0], l[1]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_reader_lines_and_frames() {
        let data: Vec<u8> = b"RTSP/1.0 200 OK\r\nCSeq: 2\r\n\r\n$\x00\x00\x03abc".to_vec();
        let mut reader = FrameReader::new(std::io::Cursor::new(data));

        assert_eq!(reader.read_line().await.unwrap(), "RTSP/1.0 200 OK");
        assert_eq!(reader.read_line().await.unwrap(), "CSeq: 2");
        assert_eq!(reader.read_line().await.unwrap(), "");

        assert_eq!(reader.peek(1).await.unwrap(), b"$");
        reader.consume(1);
        let channel = reader.read_u8().await.unwrap();
        assert_eq!(channel, 0);
        let len = reader.read_exact_bytes(2).await.unwrap();
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        let body = reader.read_exact_bytes(len).await.unwrap();
        assert_eq!(body.as_ref(), b"abc");
    }

    #[tokio::test]
    async fn test_frame_reader_eof() {
        let mut reader = FrameReader::new(std::io::Cursor::new(b"ab".to_vec()));
        assert!(reader.peek(3).await.is_err());
    }

    #[tokio::test]
    async fn test_find_udp_pair_parity() {
        let (rtp, rtcp) = find_udp_pair(0).await.unwrap();
        let p1 = rtp.local_addr().unwrap().port();
        let p2 = rtcp.local_addr().unwrap().port();
        assert_eq!(p1 % 2, 0);
        assert_eq!(p2, p1 + 1);
    }

    #[test]
    fn test_interleaved_header() {
        assert_eq!(interleaved_header(3, 0x1234), [b'$', 3, 0x12, 0x34]);
    }
}
