//! 订阅刷新时把旧的已连接集合映射到新节点列表
//!
//! 以规范化链接判断节点是否仍然存在，仍存在的引用换成新列表中的位置，
//! 不存在的引用交给调用方决定是否断开。

use crate::proxy::Server;
use crate::store::ConnectionRef;
use std::collections::{HashMap, HashSet};

/// 已定位到节点的旧引用
#[derive(Debug, Clone)]
pub struct PreviousConnection {
    pub which: ConnectionRef,
    pub server: Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeptConnection {
    pub previous: ConnectionRef,
    pub current: ConnectionRef,
    pub server: Server,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// 新列表中链接到 1-based 位置的映射，重复的链接取第一次出现的位置
    pub positions: HashMap<String, usize>,
    pub kept: Vec<KeptConnection>,
    pub stale: Vec<ConnectionRef>,
    pub free_slots: usize,
}

impl Reconciliation {
    /// 已保留连接在新列表中的位置
    pub fn kept_ids(&self) -> HashSet<usize> {
        self.kept.iter().map(|k| k.current.id()).collect()
    }

    pub fn remap(&self) -> Vec<(ConnectionRef, ConnectionRef)> {
        self.kept.iter().map(|k| (k.previous, k.current)).collect()
    }
}

/// `previous` 只应包含指向该订阅的有效引用
pub fn reconcile(previous: &[PreviousConnection], fresh: &[Server], target: usize) -> Reconciliation {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(fresh.len());
    for (i, server) in fresh.iter().enumerate() {
        positions.entry(server.link().to_string()).or_insert(i + 1);
    }

    let mut kept = Vec::new();
    let mut stale = Vec::new();
    for prev in previous {
        match positions.get(prev.server.link()) {
            Some(&id) => kept.push(KeptConnection {
                previous: prev.which,
                current: prev.which.with_id(id),
                server: prev.server.clone(),
            }),
            None => stale.push(prev.which),
        }
    }

    Reconciliation {
        free_slots: target.saturating_sub(kept.len()),
        positions,
        kept,
        stale,
    }
}
