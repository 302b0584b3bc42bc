use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Command failed (code {code}): {message}")]
    Command { code: i32, message: String },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unexpected server response: {0}")]
    Parse(String),
}

/// Server error code for missing privileges on a command or namespace.
pub const UNAUTHORIZED_CODE: i32 = 13;

impl From<mongodb::error::Error> for ProbeError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match *err.kind {
            ErrorKind::Command(ref c) if c.code == UNAUTHORIZED_CODE => {
                ProbeError::Unauthorized(c.message.clone())
            }
            ErrorKind::Command(ref c) => ProbeError::Command {
                code: c.code,
                message: c.message.clone(),
            },
            ErrorKind::InvalidArgument { ref message } => ProbeError::Config(message.clone()),
            ErrorKind::BsonDeserialization(ref e) => ProbeError::Parse(e.to_string()),
            // IO, DNS, TLS, auth and server selection failures all mean the
            // node could not be talked to.
            _ => ProbeError::Connection(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
