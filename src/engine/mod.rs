//! 代理引擎接口
//!
//! 引擎负责真正的连接/断开、延迟探测以及拓扑变化后的配置重新生成。

mod local;

pub use local::LocalEngine;

use crate::store::ConnectionRef;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Engine: Send + Sync {
    /// 可能较慢，失败不重试
    async fn regenerate_config(&self) -> Result<()>;

    async fn connect(&self, which: ConnectionRef) -> Result<()>;

    async fn disconnect(&self, which: ConnectionRef, force: bool) -> Result<()>;

    /// 返回形如 `123ms` 的延迟
    async fn ping(&self, which: ConnectionRef, timeout: Duration) -> Result<String>;
}
