//! 节点、订阅与已连接集合的存储接口
//!
//! 列表读取返回带版本号的快照，按下标写入时必须带上读取时的版本号；
//! 期间列表被修改则返回 [`PoolError::StoreConflict`]，不会对过期下标写入。

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(test)]
pub(crate) use memory::StoreData;

use crate::error::{PoolError, PoolResult};
use crate::proxy::Server;
use crate::subscription::SubscriptionRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 指向主列表或某个订阅列表中的一个节点，`id` 从 1 开始，`sub` 从 0 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionRef {
    Server { id: usize },
    Subscription { sub: usize, id: usize },
}

impl ConnectionRef {
    pub fn server(id: usize) -> Self {
        ConnectionRef::Server { id }
    }

    pub fn subscription(sub: usize, id: usize) -> Self {
        ConnectionRef::Subscription { sub, id }
    }

    pub fn id(&self) -> usize {
        match self {
            ConnectionRef::Server { id } | ConnectionRef::Subscription { id, .. } => *id,
        }
    }

    /// 所属订阅下标，主列表返回 None
    pub fn subscription_index(&self) -> Option<usize> {
        match self {
            ConnectionRef::Server { .. } => None,
            ConnectionRef::Subscription { sub, .. } => Some(*sub),
        }
    }

    /// 换成同一列表中的另一个位置
    pub fn with_id(&self, id: usize) -> Self {
        match self {
            ConnectionRef::Server { .. } => ConnectionRef::Server { id },
            ConnectionRef::Subscription { sub, .. } => ConnectionRef::Subscription { sub: *sub, id },
        }
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRef::Server { id } => write!(f, "server#{}", id),
            ConnectionRef::Subscription { sub, id } => write!(f, "subscription[{}]#{}", sub, id),
        }
    }
}

/// 已连接集合中的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveServer {
    pub which: ConnectionRef,
    /// 非破坏性刷新后已不在新订阅列表中的连接
    #[serde(default)]
    pub stale: bool,
    /// 过期时原节点的规范化链接，`which` 此后可能已指向别的节点
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl ActiveServer {
    pub fn new(which: ConnectionRef) -> Self {
        Self {
            which,
            stale: false,
            link: None,
        }
    }
}

/// 带版本号的读取结果
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub revision: u64,
    pub value: T,
}

/// 一次订阅刷新要写入的全部内容
#[derive(Debug, Clone)]
pub struct SubscriptionCommit {
    pub record: SubscriptionRecord,
    /// 旧引用到新引用的映射
    pub remap: Vec<(ConnectionRef, ConnectionRef)>,
    /// 仍在已连接集合中、但已不在新列表里的引用
    pub stale: Vec<ConnectionRef>,
    /// 同时移除该订阅之前留下的过期项
    pub drop_stale: bool,
    /// 计算 `remap` 时读到的已连接集合版本号
    pub connected_revision: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_servers(&self) -> Versioned<Vec<Server>>;

    async fn append_servers(&self, servers: Vec<Server>) -> PoolResult;

    /// `index` 从 0 开始
    async fn set_server(&self, index: usize, server: Server, revision: u64) -> PoolResult;

    async fn get_subscriptions(&self) -> Versioned<Vec<SubscriptionRecord>>;

    async fn append_subscriptions(&self, subscriptions: Vec<SubscriptionRecord>) -> PoolResult;

    async fn set_subscription(
        &self,
        index: usize,
        record: SubscriptionRecord,
        revision: u64,
    ) -> PoolResult;

    /// 原子地写入订阅快照并重映射已连接集合
    ///
    /// `revision` 校验订阅列表，`commit.connected_revision` 校验已连接集合，
    /// 任一不一致都返回 [`PoolError::StoreConflict`]。
    async fn commit_subscription(
        &self,
        index: usize,
        commit: SubscriptionCommit,
        revision: u64,
    ) -> PoolResult;

    async fn get_connected_set(&self) -> Versioned<Vec<ActiveServer>>;

    /// 已存在时不重复添加
    async fn add_active(&self, which: ConnectionRef) -> PoolResult;

    /// 返回是否确实移除了
    async fn remove_active(&self, which: ConnectionRef) -> PoolResult<bool>;

    async fn locate(&self, which: ConnectionRef) -> PoolResult<Server>;
}

/// 按引用在列表中查找节点
pub(crate) fn locate_in(
    servers: &[Server],
    subscriptions: &[SubscriptionRecord],
    which: ConnectionRef,
) -> PoolResult<Server> {
    let list = match which {
        ConnectionRef::Server { .. } => servers,
        ConnectionRef::Subscription { sub, .. } => subscriptions
            .get(sub)
            .map(|s| s.servers.as_slice())
            .ok_or(PoolError::ReferenceNotFound(which))?,
    };
    which
        .id()
        .checked_sub(1)
        .and_then(|i| list.get(i))
        .cloned()
        .ok_or(PoolError::ReferenceNotFound(which))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ref_serde() {
        let r = ConnectionRef::subscription(2, 5);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"type":"subscription","sub":2,"id":5}"#);
        let back: ConnectionRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
        assert_eq!(r.to_string(), "subscription[2]#5");
        assert_eq!(ConnectionRef::server(3).to_string(), "server#3");
    }

    #[test]
    fn test_with_id_keeps_list() {
        assert_eq!(
            ConnectionRef::subscription(1, 4).with_id(2),
            ConnectionRef::subscription(1, 2)
        );
        assert_eq!(ConnectionRef::server(4).with_id(1), ConnectionRef::server(1));
    }

    #[test]
    fn test_locate_in_rejects_zero_and_out_of_range() {
        assert!(matches!(
            locate_in(&[], &[], ConnectionRef::server(0)),
            Err(PoolError::ReferenceNotFound(_))
        ));
        assert!(matches!(
            locate_in(&[], &[], ConnectionRef::subscription(0, 1)),
            Err(PoolError::ReferenceNotFound(_))
        ));
    }
}
