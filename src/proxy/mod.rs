//! 代理节点模型
//!
//! 每种协议族对应一个实现 [`ServerObj`] 的具体类型，由 [`LinkParser`]
//! 按 scheme 分发构造。[`Server`] 是不可变的共享句柄，以规范化导出链接作为身份。

pub(crate) mod codec;
mod plugin;
mod registry;
mod shadowsocks;
mod ssr;
mod standard;
mod vmess;

pub use plugin::{PluginServer, PluginValidator, SchemePluginValidator};
pub use registry::{LinkParser, supported_prefixes};
pub use shadowsocks::Shadowsocks;
pub use ssr::ShadowsocksR;
pub use standard::UrlServer;
pub use vmess::Vmess;

use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Vmess,
    Vless,
    Shadowsocks,
    ShadowsocksR,
    Trojan,
    TrojanGo,
    HttpProxy,
    HttpsProxy,
    Socks5,
    Http2,
    Juicity,
    Tuic,
    Plugin,
}

impl Protocol {
    /// 内置协议（不含插件）
    pub const BUILTIN: [Protocol; 12] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Shadowsocks,
        Protocol::ShadowsocksR,
        Protocol::Trojan,
        Protocol::TrojanGo,
        Protocol::HttpProxy,
        Protocol::HttpsProxy,
        Protocol::Socks5,
        Protocol::Http2,
        Protocol::Juicity,
        Protocol::Tuic,
    ];

    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Shadowsocks => "ss",
            Protocol::ShadowsocksR => "ssr",
            Protocol::Trojan => "trojan",
            Protocol::TrojanGo => "trojan-go",
            Protocol::HttpProxy => "http-proxy",
            Protocol::HttpsProxy => "https-proxy",
            Protocol::Socks5 => "socks5",
            Protocol::Http2 => "http2",
            Protocol::Juicity => "juicity",
            Protocol::Tuic => "tuic",
            Protocol::Plugin => "plugin",
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<Self> {
        Protocol::BUILTIN
            .iter()
            .copied()
            .find(|p| p.scheme().eq_ignore_ascii_case(scheme))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// 所有协议类型共享的能力
pub trait ServerObj: fmt::Debug + Send + Sync {
    fn protocol(&self) -> Protocol;

    /// 显示名称，过滤器匹配的对象
    fn name(&self) -> &str;

    fn host(&self) -> &str;

    fn port(&self) -> u16;

    /// 认证信息（用户名/密码/UUID），没有则为 None
    fn credential(&self) -> Option<(&str, Option<&str>)> {
        None
    }

    /// 规范化导出，相同输入必须得到相同字符串
    fn export_to_url(&self) -> String;
}

/// 不可变的服务器句柄，相等性由规范化链接决定
#[derive(Clone)]
pub struct Server {
    obj: Arc<dyn ServerObj>,
    link: Arc<str>,
}

impl Server {
    pub fn new<T: ServerObj + 'static>(obj: T) -> Self {
        Self::from_arc(Arc::new(obj))
    }

    pub fn from_arc(obj: Arc<dyn ServerObj>) -> Self {
        let link: Arc<str> = Arc::from(obj.export_to_url());
        Self { obj, link }
    }

    pub fn protocol(&self) -> Protocol {
        self.obj.protocol()
    }

    pub fn name(&self) -> &str {
        self.obj.name()
    }

    pub fn host(&self) -> &str {
        self.obj.host()
    }

    pub fn port(&self) -> u16 {
        self.obj.port()
    }

    pub fn credential(&self) -> Option<(&str, Option<&str>)> {
        self.obj.credential()
    }

    /// 规范化链接（去重与身份比较的键）
    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn export_to_url(&self) -> String {
        self.link.to_string()
    }

    pub fn inner(&self) -> &dyn ServerObj {
        self.obj.as_ref()
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.link == other.link
    }
}

impl Eq for Server {}

impl Hash for Server {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.link.hash(state);
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("protocol", &self.protocol())
            .field("name", &self.name())
            .field("link", &self.link())
            .finish()
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.protocol())
    }
}

impl Serialize for Server {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.link())
    }
}

/// 名称缺失时使用 `host:port`
pub(crate) fn default_name(name: Option<String>, host: &str, port: u16) -> String {
    name.unwrap_or_else(|| codec::format_host_port(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_scheme_roundtrip() {
        for p in Protocol::BUILTIN {
            assert_eq!(Protocol::from_scheme(p.scheme()), Some(p));
        }
        assert_eq!(Protocol::from_scheme("TROJAN"), Some(Protocol::Trojan));
        assert_eq!(Protocol::from_scheme("plugin"), None);
        assert_eq!(Protocol::from_scheme("wireguard"), None);
    }

    #[test]
    fn test_server_identity_by_link() {
        let parser = LinkParser::new();
        let a = parser
            .parse_link("trojan://secret@example.com:443?sni=a.com#HK")
            .unwrap();
        let b = parser
            .parse_link("trojan://secret@example.com:443/?sni=a.com#HK")
            .unwrap();
        let c = parser
            .parse_link("trojan://secret@example.com:443?sni=b.com#HK")
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(serde_json::to_string(&a).unwrap(), format!("\"{}\"", a.link()));
    }
}
