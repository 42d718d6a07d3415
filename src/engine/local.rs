//! 本地引擎：已连接集合保存在存储中，配置输出为 YAML 文件

use super::Engine;
use crate::proxy::codec::{encode_component, format_host_port};
use crate::proxy::{Protocol, Server};
use crate::store::{ConnectionRef, Store};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_yaml::{Mapping, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

pub struct LocalEngine {
    store: Arc<dyn Store>,
    config_path: PathBuf,
    probe_url: String,
}

impl LocalEngine {
    pub fn new(store: Arc<dyn Store>, config_path: impl Into<PathBuf>, probe_url: &str) -> Self {
        Self {
            store,
            config_path: config_path.into(),
            probe_url: probe_url.to_string(),
        }
    }

    /// reqwest 能直接使用的代理地址，其他协议返回 None
    fn proxy_url(server: &Server) -> Option<String> {
        let scheme = match server.protocol() {
            Protocol::HttpProxy => "http",
            Protocol::HttpsProxy => "https",
            Protocol::Socks5 => "socks5h",
            _ => return None,
        };
        let auth = match server.credential() {
            Some((user, Some(password))) => format!(
                "{}:{}@",
                encode_component(user),
                encode_component(password)
            ),
            Some((user, None)) => format!("{}@", encode_component(user)),
            None => String::new(),
        };
        Some(format!(
            "{}://{}{}",
            scheme,
            auth,
            format_host_port(server.host(), server.port())
        ))
    }

    /// 通过代理请求测试地址并计时
    async fn probe_http(&self, proxy_url: &str, timeout: Duration) -> Result<Duration> {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| anyhow!("Failed to create proxy: {}", e))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create proxied HTTP client: {}", e))?;

        let start = Instant::now();
        let response = client.get(&self.probe_url).send().await;
        let elapsed = start.elapsed();

        match response {
            Ok(resp) if resp.status().is_success() => Ok(elapsed),
            Ok(resp) => Err(anyhow!("Test request failed with status: {}", resp.status())),
            Err(e) => Err(anyhow!("Test request failed: {}", e)),
        }
    }

    /// 其他协议只测 TCP 握手时间
    async fn probe_tcp(server: &Server, timeout: Duration) -> Result<Duration> {
        let addr = format_host_port(server.host(), server.port());
        let start = Instant::now();
        tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| anyhow!("connect to {} timed out", addr))??;
        Ok(start.elapsed())
    }

    fn render_config(servers: &[(ConnectionRef, Server)]) -> Result<String> {
        let proxies: Vec<Value> = servers
            .iter()
            .map(|(which, server)| {
                let mut proxy = Mapping::new();
                proxy.insert("name".into(), server.name().into());
                proxy.insert("type".into(), server.protocol().scheme().into());
                proxy.insert("server".into(), server.host().into());
                proxy.insert("port".into(), u64::from(server.port()).into());
                proxy.insert("ref".into(), which.to_string().into());
                proxy.insert("link".into(), server.link().into());
                Value::Mapping(proxy)
            })
            .collect();

        let names: Vec<Value> = servers
            .iter()
            .map(|(_, server)| Value::from(server.name()))
            .collect();
        let mut group = Mapping::new();
        group.insert("name".into(), "auto".into());
        group.insert("type".into(), "url-test".into());
        group.insert("proxies".into(), Value::Sequence(names));

        let mut root = Mapping::new();
        root.insert("proxies".into(), Value::Sequence(proxies));
        root.insert(
            "proxy-groups".into(),
            Value::Sequence(vec![Value::Mapping(group)]),
        );
        Ok(serde_yaml::to_string(&Value::Mapping(root))?)
    }
}

#[async_trait]
impl Engine for LocalEngine {
    async fn regenerate_config(&self) -> Result<()> {
        let connected = self.store.get_connected_set().await.value;
        let mut servers = Vec::with_capacity(connected.len());
        for active in connected {
            if active.stale {
                warn!("skip stale connection {} in engine config", active.which);
                continue;
            }
            let server = self.store.locate(active.which).await?;
            servers.push((active.which, server));
        }

        let yaml = Self::render_config(&servers)?;
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.config_path, yaml).await?;
        info!(
            "engine config regenerated with {} servers: {}",
            servers.len(),
            self.config_path.display()
        );
        Ok(())
    }

    async fn connect(&self, which: ConnectionRef) -> Result<()> {
        self.store.add_active(which).await?;
        self.regenerate_config().await
    }

    async fn disconnect(&self, which: ConnectionRef, force: bool) -> Result<()> {
        let removed = self.store.remove_active(which).await?;
        if !removed {
            if force {
                debug!("{} was not connected", which);
                return Ok(());
            }
            return Err(anyhow!("{} is not connected", which));
        }
        self.regenerate_config().await
    }

    async fn ping(&self, which: ConnectionRef, timeout: Duration) -> Result<String> {
        let server = self.store.locate(which).await?;
        let elapsed = match Self::proxy_url(&server) {
            Some(proxy_url) => self.probe_http(&proxy_url, timeout).await?,
            None => Self::probe_tcp(&server, timeout).await?,
        };
        Ok(format!("{}ms", elapsed.as_millis()))
    }
}
