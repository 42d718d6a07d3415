//! 内存存储实现

use super::{ActiveServer, ConnectionRef, Store, SubscriptionCommit, Versioned, locate_in};
use crate::error::{PoolError, PoolResult};
use crate::proxy::Server;
use crate::subscription::SubscriptionRecord;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone)]
pub(crate) struct StoreData {
    pub servers: Vec<Server>,
    pub servers_rev: u64,
    pub subscriptions: Vec<SubscriptionRecord>,
    pub subscriptions_rev: u64,
    pub connected: Vec<ActiveServer>,
    pub connected_rev: u64,
}

fn check_revision(expected: u64, actual: u64) -> PoolResult {
    if expected != actual {
        return Err(PoolError::StoreConflict { expected, actual });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_data(data: StoreData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub(crate) async fn snapshot(&self) -> StoreData {
        self.data.read().await.clone()
    }

    /// 恢复到 `previous` 的内容，版本号仍然前进
    pub(crate) async fn rollback(&self, mut previous: StoreData) {
        let mut data = self.data.write().await;
        previous.servers_rev = data.servers_rev + 1;
        previous.subscriptions_rev = data.subscriptions_rev + 1;
        previous.connected_rev = data.connected_rev + 1;
        *data = previous;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_servers(&self) -> Versioned<Vec<Server>> {
        let data = self.data.read().await;
        Versioned {
            revision: data.servers_rev,
            value: data.servers.clone(),
        }
    }

    async fn append_servers(&self, servers: Vec<Server>) -> PoolResult {
        if servers.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write().await;
        data.servers.extend(servers);
        data.servers_rev += 1;
        Ok(())
    }

    async fn set_server(&self, index: usize, server: Server, revision: u64) -> PoolResult {
        let mut data = self.data.write().await;
        check_revision(revision, data.servers_rev)?;
        let slot = data
            .servers
            .get_mut(index)
            .ok_or(PoolError::ReferenceNotFound(ConnectionRef::server(index + 1)))?;
        *slot = server;
        data.servers_rev += 1;
        Ok(())
    }

    async fn get_subscriptions(&self) -> Versioned<Vec<SubscriptionRecord>> {
        let data = self.data.read().await;
        Versioned {
            revision: data.subscriptions_rev,
            value: data.subscriptions.clone(),
        }
    }

    async fn append_subscriptions(&self, subscriptions: Vec<SubscriptionRecord>) -> PoolResult {
        if subscriptions.is_empty() {
            return Ok(());
        }
        let mut data = self.data.write().await;
        data.subscriptions.extend(subscriptions);
        data.subscriptions_rev += 1;
        Ok(())
    }

    async fn set_subscription(
        &self,
        index: usize,
        record: SubscriptionRecord,
        revision: u64,
    ) -> PoolResult {
        let mut data = self.data.write().await;
        check_revision(revision, data.subscriptions_rev)?;
        let slot = data.subscriptions.get_mut(index).ok_or_else(|| {
            PoolError::BadRequest(format!("subscription {} does not exist", index))
        })?;
        *slot = record;
        data.subscriptions_rev += 1;
        Ok(())
    }

    async fn commit_subscription(
        &self,
        index: usize,
        commit: SubscriptionCommit,
        revision: u64,
    ) -> PoolResult {
        let mut data = self.data.write().await;
        check_revision(revision, data.subscriptions_rev)?;
        check_revision(commit.connected_revision, data.connected_rev)?;
        if index >= data.subscriptions.len() {
            return Err(PoolError::BadRequest(format!(
                "subscription {} does not exist",
                index
            )));
        }

        let before = data.connected.clone();
        if commit.drop_stale {
            data.connected
                .retain(|a| !(a.stale && a.which.subscription_index() == Some(index)));
        }

        let StoreData {
            subscriptions,
            connected,
            ..
        } = &mut *data;
        let old_servers = &subscriptions[index].servers;
        let remap: HashMap<ConnectionRef, ConnectionRef> = commit.remap.into_iter().collect();
        for active in connected.iter_mut() {
            if active.stale || active.which.subscription_index() != Some(index) {
                continue;
            }
            if let Some(new_ref) = remap.get(&active.which) {
                active.which = *new_ref;
            } else if commit.stale.contains(&active.which) {
                active.stale = true;
                active.link = active
                    .which
                    .id()
                    .checked_sub(1)
                    .and_then(|i| old_servers.get(i))
                    .map(Server::export_to_url);
            }
        }
        // 重复节点会映射到同一位置
        let mut seen = HashSet::new();
        connected.retain(|a| a.stale || seen.insert(a.which));
        if data.connected != before {
            data.connected_rev += 1;
        }

        data.subscriptions[index] = commit.record;
        data.subscriptions_rev += 1;
        Ok(())
    }

    async fn get_connected_set(&self) -> Versioned<Vec<ActiveServer>> {
        let data = self.data.read().await;
        Versioned {
            revision: data.connected_rev,
            value: data.connected.clone(),
        }
    }

    async fn add_active(&self, which: ConnectionRef) -> PoolResult {
        let mut data = self.data.write().await;
        // 先确认引用有效
        locate_in(&data.servers, &data.subscriptions, which)?;
        if data.connected.iter().any(|a| !a.stale && a.which == which) {
            return Ok(());
        }
        data.connected.push(ActiveServer::new(which));
        data.connected_rev += 1;
        Ok(())
    }

    async fn remove_active(&self, which: ConnectionRef) -> PoolResult<bool> {
        let mut data = self.data.write().await;
        let before = data.connected.len();
        // 优先移除有效项，没有再移除同引用的过期项
        if let Some(pos) = data
            .connected
            .iter()
            .position(|a| !a.stale && a.which == which)
            .or_else(|| data.connected.iter().position(|a| a.which == which))
        {
            data.connected.remove(pos);
        }
        let removed = data.connected.len() != before;
        if removed {
            data.connected_rev += 1;
        }
        Ok(removed)
    }

    async fn locate(&self, which: ConnectionRef) -> PoolResult<Server> {
        let data = self.data.read().await;
        locate_in(&data.servers, &data.subscriptions, which)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::server;

    fn record(links: &[&str]) -> SubscriptionRecord {
        SubscriptionRecord {
            address: "http://example.com/sub".to_string(),
            servers: links.iter().map(|l| server(l)).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_set_server_detects_conflict() {
        let store = MemoryStore::new();
        store
            .append_servers(vec![server("trojan://a@a.example.com:443#A")])
            .await
            .unwrap();
        let read = store.get_servers().await;

        // 读取之后列表被另一个写入修改
        store
            .append_servers(vec![server("trojan://b@b.example.com:443#B")])
            .await
            .unwrap();

        let err = store
            .set_server(0, server("trojan://c@c.example.com:443#C"), read.revision)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::StoreConflict { .. }));

        let fresh = store.get_servers().await;
        store
            .set_server(0, server("trojan://c@c.example.com:443#C"), fresh.revision)
            .await
            .unwrap();
        assert_eq!(store.get_servers().await.value[0].name(), "C");
    }

    #[tokio::test]
    async fn test_locate_and_active_set() {
        let store = MemoryStore::new();
        store
            .append_subscriptions(vec![record(&[
                "trojan://a@a.example.com:443#A",
                "trojan://b@b.example.com:443#B",
            ])])
            .await
            .unwrap();

        let which = ConnectionRef::subscription(0, 2);
        assert_eq!(store.locate(which).await.unwrap().name(), "B");
        assert!(matches!(
            store.locate(ConnectionRef::subscription(0, 3)).await,
            Err(PoolError::ReferenceNotFound(_))
        ));

        store.add_active(which).await.unwrap();
        store.add_active(which).await.unwrap();
        assert_eq!(store.get_connected_set().await.value.len(), 1);
        assert!(store.add_active(ConnectionRef::server(1)).await.is_err());

        assert!(store.remove_active(which).await.unwrap());
        assert!(!store.remove_active(which).await.unwrap());
    }

    fn commit(links: &[&str], connected_revision: u64) -> SubscriptionCommit {
        SubscriptionCommit {
            record: record(links),
            remap: vec![],
            stale: vec![],
            drop_stale: false,
            connected_revision,
        }
    }

    #[tokio::test]
    async fn test_commit_subscription_remaps_and_marks_stale() {
        let store = MemoryStore::new();
        store
            .append_subscriptions(vec![record(&[
                "trojan://a@a.example.com:443#A",
                "trojan://b@b.example.com:443#B",
                "trojan://c@c.example.com:443#C",
            ])])
            .await
            .unwrap();
        store.add_active(ConnectionRef::subscription(0, 1)).await.unwrap();
        store.add_active(ConnectionRef::subscription(0, 3)).await.unwrap();

        let read = store.get_subscriptions().await;
        let connected = store.get_connected_set().await;
        let update = SubscriptionCommit {
            remap: vec![(ConnectionRef::subscription(0, 3), ConnectionRef::subscription(0, 1))],
            stale: vec![ConnectionRef::subscription(0, 1)],
            ..commit(&["trojan://c@c.example.com:443#C"], connected.revision)
        };
        store.commit_subscription(0, update, read.revision).await.unwrap();

        let connected = store.get_connected_set().await;
        assert_eq!(
            connected.value,
            vec![
                ActiveServer {
                    which: ConnectionRef::subscription(0, 1),
                    stale: true,
                    link: Some("trojan://a@a.example.com:443#A".to_string()),
                },
                ActiveServer::new(ConnectionRef::subscription(0, 1)),
            ]
        );

        // 旧版本号再次提交会被拒绝
        assert!(matches!(
            store
                .commit_subscription(0, commit(&[], connected.revision), read.revision)
                .await,
            Err(PoolError::StoreConflict { .. })
        ));

        // 破坏性提交清掉该订阅的过期项
        let read = store.get_subscriptions().await;
        let update = SubscriptionCommit {
            drop_stale: true,
            ..commit(&["trojan://c@c.example.com:443#C"], connected.revision)
        };
        store.commit_subscription(0, update, read.revision).await.unwrap();
        let after = store.get_connected_set().await;
        assert_eq!(
            after.value,
            vec![ActiveServer::new(ConnectionRef::subscription(0, 1))]
        );
        assert!(after.revision > connected.revision);
    }

    #[tokio::test]
    async fn test_commit_subscription_rejects_changed_connected_set() {
        let store = MemoryStore::new();
        store
            .append_subscriptions(vec![record(&[
                "trojan://a@a.example.com:443#A",
                "trojan://b@b.example.com:443#B",
                "trojan://c@c.example.com:443#C",
            ])])
            .await
            .unwrap();
        let subs = store.get_subscriptions().await;
        let connected = store.get_connected_set().await;

        // 读取之后有人连接了 #3
        store.add_active(ConnectionRef::subscription(0, 3)).await.unwrap();

        let err = store
            .commit_subscription(
                0,
                commit(
                    &[
                        "trojan://x@x.example.com:443#X",
                        "trojan://y@y.example.com:443#Y",
                        "trojan://z@z.example.com:443#Z",
                    ],
                    connected.revision,
                ),
                subs.revision,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::StoreConflict { .. }));

        // 订阅快照和已连接集合都未改动
        let located = store.locate(ConnectionRef::subscription(0, 3)).await.unwrap();
        assert_eq!(located.name(), "C");
        assert_eq!(store.get_subscriptions().await.revision, subs.revision);
        assert_eq!(
            store.get_connected_set().await.value,
            vec![ActiveServer::new(ConnectionRef::subscription(0, 3))]
        );
    }
}
