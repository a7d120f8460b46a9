use thiserror::Error;

#[derive(Error, Debug)]
pub enum RtspError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rtsp or rtp timeout")]
    Timeout,

    #[error("rtsp max probe reached")]
    MaxProbe,

    #[error("rtsp bad server")]
    BadServer,

    #[error("rtsp no supported stream")]
    NoSupportedStream,

    #[error("rtsp too many redirects")]
    MaxRedirect,

    #[error("rtsp unauthorized")]
    Unauthorized,

    #[error("no available udp port pairs")]
    NoUdpPortPair,

    #[error("RTSP {code}, {message}")]
    Status { code: u16, message: String },

    #[error("redirect to {0}")]
    Redirect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("end of stream")]
    Eof,

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Media(#[from] vigil_media_core::MediaError),
}

impl RtspError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        RtspError::Status { code, message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, RtspError>;
