//! 统一错误类型

use crate::store::ConnectionRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// 无法识别或缺少必要字段的链接
    #[error("malformed link: {0}")]
    MalformedLink(String),

    /// 空行或没有主机地址，调用方应静默跳过
    #[error("empty address")]
    EmptyAddress,

    #[error("failed to decode subscription: {0}")]
    DecodeError(String),

    #[error("server does not match the filters")]
    FilterRejected,

    #[error("no servers available")]
    NoCandidates,

    /// 已持久化的连接引用无法定位到服务器（存储已损坏）
    #[error("connection reference {0} does not resolve to a server")]
    ReferenceNotFound(ConnectionRef),

    #[error("store changed concurrently (read revision {expected}, now {actual})")]
    StoreConflict { expected: u64, actual: u64 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("engine: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PoolError {
    /// 引擎调用失败（保留完整错误链）
    pub fn engine(err: anyhow::Error) -> Self {
        PoolError::Engine(format!("{:#}", err))
    }

    pub fn fetch(err: anyhow::Error) -> Self {
        PoolError::Fetch(format!("{:#}", err))
    }
}

pub type PoolResult<T = ()> = Result<T, PoolError>;
