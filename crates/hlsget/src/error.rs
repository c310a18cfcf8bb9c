use thiserror::Error;

#[derive(Error, Debug)]
pub enum HlsgetError {
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("not an m3u8 document")]
    WrongFileFormat,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
}

pub type HlsgetResult<T> = Result<T, HlsgetError>;
