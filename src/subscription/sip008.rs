//! SIP008 在线配置格式

use crate::proxy::codec::{encode_component, format_host_port};
use crate::proxy::{Server, Shadowsocks};
use log::warn;
use serde::Deserialize;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Deserialize)]
pub struct Sip008 {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub user_uuid: String,
    #[serde(default)]
    pub bytes_used: u64,
    #[serde(default)]
    pub bytes_remaining: u64,
    pub servers: Vec<Sip008Server>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sip008Server {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub remarks: String,
    pub server: String,
    pub server_port: u16,
    #[serde(default)]
    pub password: String,
    pub method: String,
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub plugin_opts: String,
}

impl Sip008Server {
    /// 按 ss 链接的形式表达
    pub fn to_link(&self) -> String {
        let mut link = format!(
            "ss://{}:{}@{}",
            encode_component(&self.method),
            encode_component(&self.password),
            format_host_port(&self.server, self.server_port)
        );
        if !self.plugin.is_empty() {
            let plugin = if self.plugin_opts.is_empty() {
                self.plugin.clone()
            } else {
                format!("{};{}", self.plugin, self.plugin_opts)
            };
            link.push_str("/?plugin=");
            link.push_str(&encode_component(&plugin));
        }
        if !self.remarks.is_empty() {
            link.push('#');
            link.push_str(&encode_component(&self.remarks));
        }
        link
    }
}

impl Sip008 {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw.trim()).ok()
    }

    /// 转换失败的条目记录日志后跳过
    pub fn servers(&self) -> Vec<Server> {
        self.servers
            .iter()
            .filter_map(|s| {
                let link = s.to_link();
                match Shadowsocks::parse(&link) {
                    Ok(ss) => Some(Server::new(ss)),
                    Err(e) => {
                        warn!("sip008: skip server {}: {}", s.server, e);
                        None
                    }
                }
            })
            .collect()
    }

    pub fn data_usage_status(&self) -> String {
        data_usage_status(self.bytes_used, self.bytes_remaining)
    }
}

/// 已用流量为 0 时返回空字符串
pub fn data_usage_status(bytes_used: u64, bytes_remaining: u64) -> String {
    if bytes_used == 0 {
        return String::new();
    }
    let mut status = format!("Used: {:.2} GiB", bytes_used as f64 / GIB);
    if bytes_remaining != 0 {
        status.push_str(&format!(" | Remaining: {:.2} GiB", bytes_remaining as f64 / GIB));
    }
    status
}
