use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("mcp error: {0}")]
    Mcp(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("tool loop exceeded maximum of {0} iterations")]
    MaxIterations(usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ended the invoke because the caller asked it to stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The message without the category prefix of the `Display` form.
    pub fn reason(&self) -> String {
        match self {
            Error::Config(msg) | Error::Agent(msg) | Error::Mcp(msg) | Error::Tool(msg) => {
                msg.clone()
            }
            other => other.to_string(),
        }
    }
}
