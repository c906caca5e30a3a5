#[derive(Debug, thiserror::Error)]
pub enum HiveError {
    #[error("ERR {0}")]
    Generic(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR syntax error")]
    SyntaxError,

    #[error("ERR unknown command '{0}', with args beginning with: {1}")]
    UnknownCommand(String, String),

    #[error("ERR device not found")]
    DeviceNotFound,

    #[error("ERR command not found")]
    CommandNotFound,

    #[error("STORAGE {0}")]
    Storage(String),

    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    #[error("ERR invalid notification parameters: {0}")]
    InvalidParameters(String),

    #[error("ERR invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HiveError {
    pub fn to_resp_error(&self) -> String {
        match self {
            HiveError::Io(e) => format!("ERR I/O error: {e}"),
            other => format!("{other}"),
        }
    }
}

pub type HiveResult<T> = Result<T, HiveError>;
