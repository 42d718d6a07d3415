//! 代理节点池与订阅管理
//!
//! 解析代理链接和订阅内容，按名称过滤，订阅刷新时对账已连接的节点，
//! 并按延迟择优连接。

pub mod check;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod subscription;
pub mod ui;

#[cfg(test)]
mod testing;

pub use check::{Latency, LatencyChecker};
pub use config::Config;
pub use engine::{Engine, LocalEngine};
pub use error::{PoolError, PoolResult};
pub use proxy::{LinkParser, Server};
pub use service::PoolService;
pub use store::{ActiveServer, ConnectionRef, FileStore, MemoryStore, Store};
pub use subscription::{Fetcher, HttpFetcher, SubscriptionRecord};
