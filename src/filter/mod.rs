//! 按名称过滤节点

use crate::proxy::Server;
use std::collections::HashSet;

/// 所有过滤词（去空白、忽略大小写、空词忽略）都必须出现在名称中
pub fn matches_filters(server: &Server, filters: &[String]) -> bool {
    matches_name(server.name(), filters)
}

pub fn matches_name(name: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let name = name.to_lowercase();
    filters
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .all(|f| name.contains(&f.to_lowercase()))
}

/// 保持原顺序
pub fn filter_servers(servers: Vec<Server>, filters: &[String]) -> Vec<Server> {
    if filters.is_empty() {
        return servers;
    }
    servers
        .into_iter()
        .filter(|s| matches_filters(s, filters))
        .collect()
}

/// 按规范化链接去重，保留第一次出现的节点
pub fn dedup_servers(servers: Vec<Server>) -> Vec<Server> {
    let mut seen = HashSet::with_capacity(servers.len());
    servers
        .into_iter()
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
