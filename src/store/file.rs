//! JSON 文件存储：内存存储 + 每次写入后落盘

use super::memory::{MemoryStore, StoreData};
use super::{ActiveServer, ConnectionRef, Store, SubscriptionCommit, Versioned};
use crate::error::PoolResult;
use crate::proxy::{LinkParser, Server};
use crate::subscription::SubscriptionRecord;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// 磁盘上的订阅记录，节点以规范化链接保存
#[derive(Debug, Serialize, Deserialize)]
struct SubscriptionDoc {
    address: String,
    #[serde(default)]
    servers: Vec<String>,
    #[serde(default)]
    info: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    filters: Vec<String>,
    #[serde(default)]
    remarks: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDoc {
    #[serde(default)]
    servers: Vec<String>,
    #[serde(default)]
    subscriptions: Vec<SubscriptionDoc>,
    #[serde(default)]
    connected: Vec<ActiveServer>,
}

fn parse_links(parser: &LinkParser, links: &[String]) -> PoolResult<Vec<Server>> {
    // 下标即身份，任何一条解析失败都不能跳过
    links.iter().map(|link| parser.parse_link(link)).collect()
}

pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    /// 串行化落盘
    write_lock: Mutex<()>,
}

impl FileStore {
    /// 打开存储文件，不存在时以空存储开始
    pub async fn open<P: AsRef<Path>>(path: P, parser: &LinkParser) -> PoolResult<Self> {
        let path = path.as_ref().to_path_buf();
        let doc: StoreDoc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("store file {} not found, starting empty", path.display());
                StoreDoc::default()
            }
            Err(e) => return Err(e.into()),
        };

        let mut subscriptions = Vec::with_capacity(doc.subscriptions.len());
        for sub in doc.subscriptions {
            subscriptions.push(SubscriptionRecord {
                servers: parse_links(parser, &sub.servers)?,
                address: sub.address,
                info: sub.info,
                status: sub.status,
                filters: sub.filters,
                remarks: sub.remarks,
            });
        }
        let data = StoreData {
            servers: parse_links(parser, &doc.servers)?,
            subscriptions,
            connected: doc.connected,
            ..Default::default()
        };
        debug!(
            "loaded store {}: {} servers, {} subscriptions, {} connected",
            path.display(),
            data.servers.len(),
            data.subscriptions.len(),
            data.connected.len()
        );

        Ok(Self {
            path,
            inner: MemoryStore::from_data(data),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 执行一次写入并落盘，落盘失败时内存恢复到写入前的内容
    async fn write<T, F>(&self, apply: F) -> PoolResult<T>
    where
        F: Future<Output = PoolResult<(T, bool)>>,
    {
        let _guard = self.write_lock.lock().await;
        let previous = self.inner.snapshot().await;
        let (value, changed) = apply.await?;
        if !changed {
            return Ok(value);
        }
        if let Err(e) = self.flush().await {
            warn!("failed to persist {}: {}, rolling back", self.path.display(), e);
            self.inner.rollback(previous).await;
            return Err(e);
        }
        Ok(value)
    }

    /// 调用方需持有 `write_lock`
    async fn flush(&self) -> PoolResult {
        let data = self.inner.snapshot().await;
        let doc = StoreDoc {
            servers: data.servers.iter().map(Server::export_to_url).collect(),
            subscriptions: data
                .subscriptions
                .into_iter()
                .map(|s| SubscriptionDoc {
                    address: s.address,
                    servers: s.servers.iter().map(Server::export_to_url).collect(),
                    info: s.info,
                    status: s.status,
                    filters: s.filters,
                    remarks: s.remarks,
                })
                .collect(),
            connected: data.connected,
        };
        let json = serde_json::to_vec_pretty(&doc)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        // 先写临时文件再改名，避免写到一半
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get_servers(&self) -> Versioned<Vec<Server>> {
        self.inner.get_servers().await
    }

    async fn append_servers(&self, servers: Vec<Server>) -> PoolResult {
        self.write(async { self.inner.append_servers(servers).await.map(|()| ((), true)) })
            .await
    }

    async fn set_server(&self, index: usize, server: Server, revision: u64) -> PoolResult {
        self.write(async {
            self.inner
                .set_server(index, server, revision)
                .await
                .map(|()| ((), true))
        })
        .await
    }

    async fn get_subscriptions(&self) -> Versioned<Vec<SubscriptionRecord>> {
        self.inner.get_subscriptions().await
    }

    async fn append_subscriptions(&self, subscriptions: Vec<SubscriptionRecord>) -> PoolResult {
        self.write(async {
            self.inner
                .append_subscriptions(subscriptions)
                .await
                .map(|()| ((), true))
        })
        .await
    }

    async fn set_subscription(
        &self,
        index: usize,
        record: SubscriptionRecord,
        revision: u64,
    ) -> PoolResult {
        self.write(async {
            self.inner
                .set_subscription(index, record, revision)
                .await
                .map(|()| ((), true))
        })
        .await
    }

    async fn commit_subscription(
        &self,
        index: usize,
        commit: SubscriptionCommit,
        revision: u64,
    ) -> PoolResult {
        self.write(async {
            self.inner
                .commit_subscription(index, commit, revision)
                .await
                .map(|()| ((), true))
        })
        .await
    }

    async fn get_connected_set(&self) -> Versioned<Vec<ActiveServer>> {
        self.inner.get_connected_set().await
    }

    async fn add_active(&self, which: ConnectionRef) -> PoolResult {
        self.write(async { self.inner.add_active(which).await.map(|()| ((), true)) })
            .await
    }

    async fn remove_active(&self, which: ConnectionRef) -> PoolResult<bool> {
        self.write(async {
            let removed = self.inner.remove_active(which).await?;
            Ok((removed, removed))
        })
        .await
    }

    async fn locate(&self, which: ConnectionRef) -> PoolResult<Server> {
        self.inner.locate(which).await
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}
