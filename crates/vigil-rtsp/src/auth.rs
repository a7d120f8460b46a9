use crate::error::{Result, RtspError};
use std::fmt;

pub const DEFAULT_REALM: &str = "VIGIL";

/// 认证方案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    #[default]
    None,
    /// RFC 1945 Basic
    Basic,
    /// RFC 2617 Digest
    Digest,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::None => write!(f, ""),
            AuthType::Basic => write!(f, "Basic"),
            AuthType::Digest => write!(f, "Digest"),
        }
    }
}

/// 摘要算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Md5,
    Md5Sess,
}

/// Digest 相关参数
#[derive(Debug, Clone, Default)]
pub struct DigestParams {
    pub response: String,
    pub uri: String,
    /// 客户端 nonce
    pub cnonce: String,
    /// 服务端 nonce
    pub nonce: String,
    pub algorithm: Algorithm,
    /// Quality of protection
    pub qop: String,
    pub opaque: String,
    pub stale: String,
    /// 该 nonce 已被使用的次数
    pub nonce_count: u32,
}

/// 一次认证交换的完整状态
#[derive(Debug, Clone, Default)]
pub struct Authorization {
    pub auth_type: AuthType,
    pub realm: String,
    pub username: String,
    pub digest: DigestParams,
}

pub fn md5_hex(data: &str) -> String {
    format!("{:x}", md5::compute(data.as_bytes()))
}

/// 解析 Authorization / WWW-Authenticate 头的值
pub fn parse_authorization(val: &str) -> Result<Authorization> {
    let val = val.trim_start();
    let Some((scheme, rest)) = val.split_once(' ') else {
        return Err(RtspError::Unauthorized);
    };

    let auth_type = match scheme.trim() {
        "Digest" => AuthType::Digest,
        "Basic" | "BASIC" => AuthType::Basic,
        _ => AuthType::None,
    };

    let mut auth = Authorization {
        auth_type,
        ..Default::default()
    };

    for field in rest.split(',') {
        let field = field.trim_matches(|c| c == ',' || c == ' ');
        let Some((key, val)) = field.split_once('=') else {
            continue;
        };
        let val = val.trim_matches('"');
        match key {
            "username" => auth.username = val.to_string(),
            "realm" => auth.realm = val.to_string(),
            "nonce" => auth.digest.nonce = val.to_string(),
            "cnonce" => auth.digest.cnonce = val.to_string(),
            "nc" => auth.digest.nonce_count = u32::from_str_radix(val, 16).unwrap_or(0),
            "uri" => auth.digest.uri = val.to_string(),
            "response" => auth.digest.response = val.to_string(),
            "qop" => auth.digest.qop = val.to_string(),
            "opaque" => auth.digest.opaque = val.to_string(),
            "stale" => auth.digest.stale = val.to_string(),
            "algorithm" => {
                auth.digest.algorithm = match val {
                    "MD5-sess" => Algorithm::Md5Sess,
                    _ => Algorithm::Md5,
                }
            }
            _ => {}
        }
    }

    Ok(auth)
}

/// 按 RFC 2617 计算 Digest 响应值
pub fn compute_digest_response(method: &str, user: &str, password: &str, auth: &Authorization) -> Result<String> {
    if method.is_empty() {
        return Err(RtspError::Protocol("empty method for digest".into()));
    }

    let p = &auth.digest;
    let mut ha1 = md5_hex(&format!("{}:{}:{}", user, auth.realm, password));
    if auth.digest.algorithm == Algorithm::Md5Sess {
        ha1 = md5_hex(&format!("{}:{}:{}", ha1, p.nonce, p.cnonce));
    }

    let response = match p.qop.as_str() {
        "auth" => {
            let ha2 = md5_hex(&format!("{}:{}", method, p.uri));
            md5_hex(&format!(
                "{}:{}:{:08x}:{}:{}:{}",
                ha1, p.nonce, p.nonce_count, p.cnonce, p.qop, ha2
            ))
        }
        "auth-int" => {
            let ha2 = md5_hex(&format!("{}:{}:{}", method, p.uri, md5_hex("")));
            md5_hex(&format!(
                "{}:{}:{:08x}:{}:{}:{}",
                ha1, p.nonce, p.nonce_count, p.cnonce, p.qop, ha2
            ))
        }
        _ => {
            // RFC 2069 compatibility form
            let ha2 = md5_hex(&format!("{}:{}", method, p.uri));
            md5_hex(&format!("{}:{}:{}", ha1, p.nonce, ha2))
        }
    };

    Ok(response)
}
