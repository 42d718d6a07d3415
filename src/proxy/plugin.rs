use super::codec::split_fragment;
use super::{Protocol, ServerObj};
use crate::error::{PoolError, PoolResult};

/// 外部插件对链接的校验
pub trait PluginValidator: Send + Sync {
    fn validate(&self, link: &str) -> bool;
}

/// 按配置的 scheme 接受插件链接
#[derive(Debug, Clone)]
pub struct SchemePluginValidator {
    prefix: String,
}

impl SchemePluginValidator {
    pub fn new(scheme: &str) -> Self {
        Self {
            prefix: format!("{}://", scheme.trim().trim_end_matches("://").to_lowercase()),
        }
    }
}

impl PluginValidator for SchemePluginValidator {
    fn validate(&self, link: &str) -> bool {
        let link = link.trim();
        link.len() > self.prefix.len()
            && link
                .get(..self.prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(&self.prefix))
    }
}

/// 插件提供的节点，原样保存链接
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginServer {
    pub scheme: String,
    pub link: String,
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl PluginServer {
    pub fn parse(link: &str) -> PoolResult<Self> {
        let link = link.trim();
        let (scheme, _) = link
            .split_once("://")
            .ok_or_else(|| PoolError::MalformedLink(format!("missing scheme: {}", link)))?;

        // 主机和端口只用于展示，解析失败不影响接受
        let (host, port) = url::Url::parse(link)
            .ok()
            .map(|u| {
                (
                    u.host_str().unwrap_or_default().to_string(),
                    u.port().unwrap_or(0),
                )
            })
            .unwrap_or_default();
        let (_, name) = split_fragment(link);

        Ok(Self {
            scheme: scheme.to_lowercase(),
            link: link.to_string(),
            name: name.unwrap_or_else(|| {
                if host.is_empty() {
                    scheme.to_string()
                } else {
                    format!("{}:{}", host, port)
                }
            }),
            host,
            port,
        })
    }
}

impl ServerObj for PluginServer {
    fn protocol(&self) -> Protocol {
        Protocol::Plugin
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn export_to_url(&self) -> String {
        self.link.clone()
    }
}
