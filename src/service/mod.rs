//! 导入、订阅更新与备注修改
//!
//! 组合链接解析、订阅解码、过滤、对账和择优连接。自动连接属于尽力而为，
//! 失败只记录日志；影响整个操作的错误（拉取、解码、存储、引用失效）直接返回，
//! 不会写入半成品快照。

use crate::check::LatencyChecker;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{PoolError, PoolResult};
use crate::filter::{dedup_servers, filter_servers, matches_filters};
use crate::proxy::LinkParser;
use crate::reconcile::{PreviousConnection, reconcile};
use crate::store::{ActiveServer, ConnectionRef, Store, SubscriptionCommit, locate_in};
use crate::subscription::{
    Fetcher, SubscriptionRecord, new_update_status, resolve_by_lines, resolve_source_address,
    resolve_subscription,
};
use crate::ui::ProbeProgress;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// 单条链接导入后尝试连接的数量
const SINGLE_IMPORT_TARGET: usize = 1;

pub struct PoolService {
    store: Arc<dyn Store>,
    engine: Arc<dyn Engine>,
    fetcher: Arc<dyn Fetcher>,
    parser: LinkParser,
    config: Config,
}

impl PoolService {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<dyn Engine>,
        fetcher: Arc<dyn Fetcher>,
        config: Config,
    ) -> Self {
        Self {
            store,
            engine,
            fetcher,
            parser: config.link_parser(),
            config,
        }
    }

    pub fn with_parser(mut self, parser: LinkParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn parser(&self) -> &LinkParser {
        &self.parser
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 导入一段批量链接、一条链接或一个订阅地址
    ///
    /// `target` 只对单条链接有效，表示原地替换主列表中的节点。
    pub async fn import(
        &self,
        source: &str,
        target: Option<ConnectionRef>,
        filters: &[String],
    ) -> PoolResult {
        let source = source.trim();
        if source.is_empty() {
            return Err(PoolError::EmptyAddress);
        }

        if source.contains('\n') || source.starts_with('{') {
            self.import_batch(source, filters).await
        } else if self.parser.is_supported(source) {
            self.import_link(source, target, filters).await
        } else {
            self.import_subscription(source, filters).await
        }
    }

    async fn import_batch(&self, source: &str, filters: &[String]) -> PoolResult {
        let decoded = resolve_by_lines(source, &self.parser);
        let servers = filter_servers(decoded.servers, filters);
        info!("importing {} servers from inline batch", servers.len());
        self.store.append_servers(servers).await?;

        self.auto_connect(self.config.auto_connect_target).await;
        Ok(())
    }

    async fn import_link(
        &self,
        link: &str,
        target: Option<ConnectionRef>,
        filters: &[String],
    ) -> PoolResult {
        let server = self.parser.parse_link(link)?;
        if !matches_filters(&server, filters) {
            return Err(PoolError::FilterRejected);
        }

        let Some(which) = target else {
            info!("appending server {}", server);
            self.store.append_servers(vec![server]).await?;
            self.auto_connect(SINGLE_IMPORT_TARGET).await;
            return Ok(());
        };

        let ConnectionRef::Server { id } = which else {
            return Err(PoolError::BadRequest(format!(
                "{} is not in the server list",
                which
            )));
        };
        let servers = self.store.get_servers().await;
        if id == 0 || id > servers.value.len() {
            return Err(PoolError::BadRequest(format!("{} does not exist", which)));
        }

        info!("replacing {} with {}", which, server);
        self.store.set_server(id - 1, server, servers.revision).await?;

        let connected = self.store.get_connected_set().await.value;
        if connected.iter().any(|a| !a.stale && a.which == which) {
            self.engine
                .regenerate_config()
                .await
                .map_err(PoolError::engine)?;
        }
        Ok(())
    }

    async fn import_subscription(&self, source: &str, filters: &[String]) -> PoolResult {
        let address = resolve_source_address(source)?;
        let decoded = resolve_subscription(
            self.fetcher.as_ref(),
            &self.parser,
            &address,
            self.config.get_subscription_fetch_timeout(),
        )
        .await?;

        let total = decoded.servers.len();
        let servers = dedup_servers(filter_servers(decoded.servers, filters));
        info!(
            "subscription {}: {} servers, {} after filtering and dedup",
            address,
            total,
            servers.len()
        );

        let record = SubscriptionRecord {
            address,
            servers,
            info: decoded.status,
            status: new_update_status(),
            filters: filters.to_vec(),
            remarks: String::new(),
        };
        self.store.append_subscriptions(vec![record]).await?;

        self.auto_connect(self.config.auto_connect_target).await;
        Ok(())
    }

    /// 刷新 `index`（从 0 开始）处的订阅
    ///
    /// `filters` 为空时使用订阅保存的过滤词。`disconnect_if_stale` 为 false 时
    /// 已不在新列表中的连接保留，并在已连接集合中标记为过期；为 true 时断开它们，
    /// 同时清掉该订阅之前留下的过期项。
    pub async fn update_subscription(
        &self,
        index: usize,
        disconnect_if_stale: bool,
        filters: &[String],
    ) -> PoolResult {
        let subscriptions = self.store.get_subscriptions().await;
        let record = subscriptions.value.get(index).cloned().ok_or_else(|| {
            PoolError::BadRequest(format!("subscription {} does not exist", index))
        })?;

        let decoded = resolve_subscription(
            self.fetcher.as_ref(),
            &self.parser,
            &record.address,
            self.config.get_fetch_timeout(),
        )
        .await?;

        let filters = if filters.is_empty() {
            record.filters.clone()
        } else {
            filters.to_vec()
        };
        let resolved = decoded.servers.len();
        let servers = filter_servers(decoded.servers, &filters);
        info!(
            "subscription {}: resolved {} servers, {} after filtering",
            index,
            resolved,
            servers.len()
        );

        // 找不到旧引用对应的节点说明存储已损坏，整个更新中止
        let connected = self.store.get_connected_set().await;
        let previous = connected
            .value
            .iter()
            .filter(|a| !a.stale && a.which.subscription_index() == Some(index))
            .map(|a| {
                locate_in(&[], &subscriptions.value, a.which).map(|server| PreviousConnection {
                    which: a.which,
                    server,
                })
            })
            .collect::<PoolResult<Vec<_>>>()?;
        let leftover = connected
            .value
            .iter()
            .filter(|a| a.stale && a.which.subscription_index() == Some(index))
            .count();
        debug!(
            "subscription {} has {} connected servers, {} stale",
            index,
            previous.len(),
            leftover
        );

        let reconciliation = reconcile(&previous, &servers, self.config.auto_connect_target);
        for kept in &reconciliation.kept {
            info!(
                "keeping {} ({} -> {})",
                kept.server, kept.previous, kept.current
            );
        }

        let mut stale = Vec::new();
        for &which in &reconciliation.stale {
            if disconnect_if_stale {
                info!("disconnecting {}: no longer in subscription", which);
                self.engine
                    .disconnect(which, false)
                    .await
                    .map_err(PoolError::engine)?;
            } else {
                info!("{} is no longer in subscription, keeping it as stale", which);
                stale.push(which);
            }
        }
        if disconnect_if_stale && leftover > 0 {
            info!(
                "dropping {} stale connections of subscription {}",
                leftover, index
            );
        }

        // 断开之外的改动说明有并发写入，remap 已不可信
        let current = self.store.get_connected_set().await;
        let live = |set: &[ActiveServer]| -> HashSet<ConnectionRef> {
            set.iter()
                .filter(|a| !a.stale && a.which.subscription_index() == Some(index))
                .map(|a| a.which)
                .collect()
        };
        let expected: HashSet<ConnectionRef> = previous
            .iter()
            .map(|p| p.which)
            .filter(|which| !disconnect_if_stale || !reconciliation.stale.contains(which))
            .collect();
        if live(&current.value) != expected {
            return Err(PoolError::StoreConflict {
                expected: connected.revision,
                actual: current.revision,
            });
        }

        let commit = SubscriptionCommit {
            record: SubscriptionRecord {
                servers: servers.clone(),
                info: decoded.status,
                status: new_update_status(),
                filters,
                ..record
            },
            remap: reconciliation.remap(),
            stale,
            drop_stale: disconnect_if_stale,
            connected_revision: current.revision,
        };
        self.store
            .commit_subscription(index, commit, subscriptions.revision)
            .await?;

        info!(
            "connected servers kept: {}, free slots: {}",
            reconciliation.kept.len(),
            reconciliation.free_slots
        );
        let kept_ids = reconciliation.kept_ids();
        let candidates: Vec<ConnectionRef> = (1..=servers.len())
            .filter(|id| !kept_ids.contains(id))
            .map(|id| ConnectionRef::subscription(index, id))
            .collect();
        if reconciliation.free_slots > 0 && !candidates.is_empty() {
            self.select(&candidates, reconciliation.free_slots).await;
        }

        if !previous.is_empty() {
            self.engine
                .regenerate_config()
                .await
                .map_err(PoolError::engine)?;
        }

        info!(
            "subscription {} updated: {} servers",
            index,
            servers.len()
        );
        Ok(())
    }

    /// 依次刷新全部订阅，单个失败只记录日志，返回成功的数量
    pub async fn update_all_subscriptions(&self, disconnect_if_stale: bool) -> usize {
        let total = self.store.get_subscriptions().await.value.len();
        let mut updated = 0;
        for index in 0..total {
            match self
                .update_subscription(index, disconnect_if_stale, &[])
                .await
            {
                Ok(()) => updated += 1,
                Err(e) => warn!("failed to update subscription {}: {}", index, e),
            }
        }
        info!("updated {}/{} subscriptions", updated, total);
        updated
    }

    /// 修改 `index`（从 0 开始）处订阅的备注和地址，地址为空时保持不变
    pub async fn modify_remark(&self, index: usize, remark: &str, address: &str) -> PoolResult {
        let subscriptions = self.store.get_subscriptions().await;
        let mut record = subscriptions.value.get(index).cloned().ok_or_else(|| {
            PoolError::BadRequest(format!("subscription {} does not exist", index))
        })?;

        record.remarks = remark.to_string();
        let address = address.trim();
        if !address.is_empty() {
            record.address = address.to_string();
        }
        self.store
            .set_subscription(index, record, subscriptions.revision)
            .await
    }

    /// 主列表和所有订阅中尚未连接的节点
    async fn unconnected_candidates(&self) -> Vec<ConnectionRef> {
        let connected: HashSet<ConnectionRef> = self
            .store
            .get_connected_set()
            .await
            .value
            .into_iter()
            .filter(|a| !a.stale)
            .map(|a| a.which)
            .collect();
        let servers = self.store.get_servers().await.value;
        let subscriptions = self.store.get_subscriptions().await.value;

        let main = (1..=servers.len()).map(ConnectionRef::server);
        let subs = subscriptions
            .iter()
            .enumerate()
            .flat_map(|(sub, record)| {
                (1..=record.servers.len()).map(move |id| ConnectionRef::subscription(sub, id))
            });
        main.chain(subs)
            .filter(|which| !connected.contains(which))
            .collect()
    }

    async fn auto_connect(&self, n: usize) {
        let candidates = self.unconnected_candidates().await;
        self.select(&candidates, n).await;
    }

    async fn select(&self, candidates: &[ConnectionRef], n: usize) {
        let mut checker = LatencyChecker::new(
            self.engine.clone(),
            self.config.get_probe_timeout(),
            self.config.probe_concurrent,
        );
        if self.config.print_progress {
            checker = checker.with_progress(ProbeProgress::new(true));
        }

        match checker.select_top_n(candidates, n).await {
            Ok(activated) => {
                info!("auto connected {} of {} requested servers", activated.len(), n);
                checker.log_stats();
            }
            Err(e) => warn!("auto connect failed: {}", e),
        }
    }
}
