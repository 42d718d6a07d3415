//! 测试替身

use crate::engine::Engine;
use crate::proxy::{LinkParser, Server};
use crate::store::{ConnectionRef, Store};
use crate::subscription::{FetchResponse, Fetcher};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn server(link: &str) -> Server {
    LinkParser::new()
        .parse_link(link)
        .unwrap_or_else(|e| panic!("bad test link {}: {}", link, e))
}

#[derive(Default)]
struct FetcherState {
    body: Vec<u8>,
    headers: HashMap<String, String>,
    error: Option<String>,
    last_timeout: Option<Duration>,
    requests: Vec<String>,
}

/// 返回固定内容的拉取器
#[derive(Default)]
pub struct StaticFetcher {
    state: Mutex<FetcherState>,
}

impl StaticFetcher {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        let fetcher = Self::default();
        fetcher.set_body(body);
        fetcher
    }

    pub fn failing(message: &str) -> Self {
        let fetcher = Self::default();
        fetcher.state.lock().unwrap().error = Some(message.to_string());
        fetcher
    }

    pub fn with_header(self, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn set_body(&self, body: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.body = body.into();
        state.error = None;
    }

    pub fn set_error(&self, message: &str) {
        self.state.lock().unwrap().error = Some(message.to_string());
    }

    pub fn last_timeout(&self) -> Option<Duration> {
        self.state.lock().unwrap().last_timeout
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        let mut state = self.state.lock().unwrap();
        state.last_timeout = Some(timeout);
        state.requests.push(url.to_string());
        if let Some(message) = &state.error {
            return Err(anyhow!("{}", message));
        }
        Ok(FetchResponse {
            body: state.body.clone(),
            headers: state.headers.clone(),
        })
    }
}

#[derive(Default)]
struct EngineState {
    latencies: HashMap<ConnectionRef, String>,
    slow: HashSet<ConnectionRef>,
    fail_connect: HashSet<ConnectionRef>,
    fail_regenerate: bool,
    connect_on_disconnect: Option<ConnectionRef>,
    connected: Vec<ConnectionRef>,
    disconnected: Vec<ConnectionRef>,
    regenerated: usize,
}

/// 可配置延迟和失败的引擎，连接/断开同步写入存储
#[derive(Default)]
pub struct MockEngine {
    store: Option<Arc<dyn Store>>,
    state: Mutex<EngineState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// 未设置延迟的节点 ping 失败
    pub fn set_latency(&self, which: ConnectionRef, latency: &str) {
        self.state
            .lock()
            .unwrap()
            .latencies
            .insert(which, latency.to_string());
    }

    /// ping 永不返回
    pub fn set_slow(&self, which: ConnectionRef) {
        self.state.lock().unwrap().slow.insert(which);
    }

    pub fn fail_connect(&self, which: ConnectionRef) {
        self.state.lock().unwrap().fail_connect.insert(which);
    }

    pub fn fail_regenerate(&self) {
        self.state.lock().unwrap().fail_regenerate = true;
    }

    /// 下一次断开时顺带连接 `which`，模拟并发的连接请求
    pub fn connect_on_disconnect(&self, which: ConnectionRef) {
        self.state.lock().unwrap().connect_on_disconnect = Some(which);
    }

    pub fn connected(&self) -> Vec<ConnectionRef> {
        self.state.lock().unwrap().connected.clone()
    }

    pub fn disconnected(&self) -> Vec<ConnectionRef> {
        self.state.lock().unwrap().disconnected.clone()
    }

    pub fn regenerated(&self) -> usize {
        self.state.lock().unwrap().regenerated
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn regenerate_config(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_regenerate {
            return Err(anyhow!("engine is not running"));
        }
        state.regenerated += 1;
        Ok(())
    }

    async fn connect(&self, which: ConnectionRef) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_connect.contains(&which) {
                return Err(anyhow!("failed to connect {}", which));
            }
            state.connected.push(which);
        }
        if let Some(store) = &self.store {
            store.add_active(which).await?;
        }
        Ok(())
    }

    async fn disconnect(&self, which: ConnectionRef, force: bool) -> Result<()> {
        let extra = {
            let mut state = self.state.lock().unwrap();
            state.disconnected.push(which);
            state.connect_on_disconnect.take()
        };
        if let Some(store) = &self.store {
            let removed = store.remove_active(which).await?;
            if !removed && !force {
                return Err(anyhow!("{} is not connected", which));
            }
            if let Some(extra) = extra {
                store.add_active(extra).await?;
            }
        }
        Ok(())
    }

    async fn ping(&self, which: ConnectionRef, _timeout: Duration) -> Result<String> {
        let (slow, latency) = {
            let state = self.state.lock().unwrap();
            (
                state.slow.contains(&which),
                state.latencies.get(&which).cloned(),
            )
        };
        if slow {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        latency.ok_or_else(|| anyhow!("{} is unreachable", which))
    }
}
