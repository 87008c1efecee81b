use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("apply stream closed")]
    StreamClosed,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("underlying raft error: {0}")]
    Raft(#[from] raft::RaftError),

    #[error("rpc error: {0}")]
    Rpc(String),
}

pub type Result<T> = std::result::Result<T, KvError>;

impl From<bincode::error::EncodeError> for KvError {
    fn from(e: bincode::error::EncodeError) -> Self {
        KvError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for KvError {
    fn from(e: bincode::error::DecodeError) -> Self {
        KvError::Serialization(e.to_string())
    }
}
