use super::{
    PluginServer, PluginValidator, Protocol, Server, Shadowsocks, ShadowsocksR, UrlServer, Vmess,
};
use crate::error::{PoolError, PoolResult};
use lazy_static::lazy_static;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

type Constructor = fn(&str) -> PoolResult<Server>;

lazy_static! {
    static ref SUPPORTED_PREFIXES: Vec<String> = Protocol::BUILTIN
        .iter()
        .map(|p| format!("{}://", p.scheme()))
        .collect();
}

/// 内置协议的 `scheme://` 前缀
pub fn supported_prefixes() -> &'static [String] {
    &SUPPORTED_PREFIXES
}

fn url_shaped(protocol: Protocol, link: &str) -> PoolResult<Server> {
    UrlServer::parse(protocol, link).map(Server::new)
}

/// 插件协议没有固定 scheme，不进注册表
fn builtin_constructor(protocol: Protocol) -> Option<Constructor> {
    let constructor: Constructor = match protocol {
        Protocol::Shadowsocks => |link| Shadowsocks::parse(link).map(Server::new),
        Protocol::ShadowsocksR => |link| ShadowsocksR::parse(link).map(Server::new),
        Protocol::Vmess => |link| Vmess::parse(link).map(Server::new),
        Protocol::Vless => |link| url_shaped(Protocol::Vless, link),
        Protocol::Trojan => |link| url_shaped(Protocol::Trojan, link),
        Protocol::TrojanGo => |link| url_shaped(Protocol::TrojanGo, link),
        Protocol::HttpProxy => |link| url_shaped(Protocol::HttpProxy, link),
        Protocol::HttpsProxy => |link| url_shaped(Protocol::HttpsProxy, link),
        Protocol::Socks5 => |link| url_shaped(Protocol::Socks5, link),
        Protocol::Http2 => |link| url_shaped(Protocol::Http2, link),
        Protocol::Juicity => |link| url_shaped(Protocol::Juicity, link),
        Protocol::Tuic => |link| url_shaped(Protocol::Tuic, link),
        Protocol::Plugin => return None,
    };
    Some(constructor)
}

/// 链接解析器：scheme 到构造函数的注册表，外加可选的插件校验器
#[derive(Clone)]
pub struct LinkParser {
    constructors: HashMap<String, Constructor>,
    plugin: Option<Arc<dyn PluginValidator>>,
}

impl Default for LinkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkParser {
    pub fn new() -> Self {
        let constructors = Protocol::BUILTIN
            .iter()
            .filter_map(|p| builtin_constructor(*p).map(|c| (p.scheme().to_string(), c)))
            .collect();
        Self {
            constructors,
            plugin: None,
        }
    }

    pub fn with_plugin(mut self, validator: Arc<dyn PluginValidator>) -> Self {
        self.plugin = Some(validator);
        self
    }

    pub fn plugin_accepts(&self, link: &str) -> bool {
        self.plugin
            .as_ref()
            .is_some_and(|validator| validator.validate(link))
    }

    /// 是否为单条可识别链接（内置前缀或插件接受）
    pub fn is_supported(&self, link: &str) -> bool {
        let link = link.trim();
        let known = link
            .split_once("://")
            .is_some_and(|(scheme, _)| self.constructors.contains_key(&scheme.to_lowercase()));
        known || self.plugin_accepts(link)
    }

    /// 解析单条链接
    pub fn parse_link(&self, link: &str) -> PoolResult<Server> {
        let link = link.trim();
        if link.is_empty() {
            return Err(PoolError::EmptyAddress);
        }

        if let Some((scheme, _)) = link.split_once("://") {
            if let Some(constructor) = self.constructors.get(&scheme.to_lowercase()) {
                return constructor(link);
            }
        }

        if self.plugin_accepts(link) {
            debug!("link accepted by plugin validator: {}", link);
            return PluginServer::parse(link).map(Server::new);
        }

        Err(PoolError::MalformedLink(format!("unsupported link: {}", link)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::SchemePluginValidator;

    #[test]
    fn test_supported_prefixes() {
        let prefixes = supported_prefixes();
        assert_eq!(prefixes.len(), 12);
        assert!(prefixes.contains(&"trojan-go://".to_string()));
        assert!(prefixes.contains(&"ss://".to_string()));
    }

    #[test]
    fn test_parse_link_dispatch() {
        let parser = LinkParser::new();
        let s = parser
            .parse_link("  trojan-go://pw@go.example.com:443#Go  ")
            .unwrap();
        assert_eq!(s.protocol(), Protocol::TrojanGo);
        assert_eq!(s.name(), "Go");

        let s = parser
            .parse_link("ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ@example.com:8388#test")
            .unwrap();
        assert_eq!(s.protocol(), Protocol::Shadowsocks);
    }

    #[test]
    fn test_empty_and_unknown() {
        let parser = LinkParser::new();
        assert!(matches!(parser.parse_link("   "), Err(PoolError::EmptyAddress)));
        assert!(matches!(
            parser.parse_link("wireguard://abc@h:1"),
            Err(PoolError::MalformedLink(_))
        ));
        assert!(matches!(
            parser.parse_link("just some text"),
            Err(PoolError::MalformedLink(_))
        ));
    }

    #[test]
    fn test_plugin_scheme() {
        let parser = LinkParser::new().with_plugin(Arc::new(SchemePluginValidator::new("hy2")));
        assert!(parser.is_supported("hy2://pw@h.example.com:443"));
        let s = parser.parse_link("hy2://pw@h.example.com:443#H").unwrap();
        assert_eq!(s.protocol(), Protocol::Plugin);
        assert_eq!(s.link(), "hy2://pw@h.example.com:443#H");

        let plain = LinkParser::new();
        assert!(!plain.is_supported("hy2://pw@h.example.com:443"));
    }

    #[test]
    fn test_export_roundtrip_all_families() {
        let parser = LinkParser::new();
        let links = [
            "ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ@example.com:8388#test",
            "vless://id@v.example.com:443?security=reality&sni=a.com#V",
            "trojan://pw@t.example.com:443#T",
            "tuic://uuid:pw@tu.example.com:443?congestion_control=bbr#TU",
            "juicity://uuid:pw@j.example.com:443#J",
            "http2://u:p@h2.example.com:443#H2",
            "https-proxy://u:p@hp.example.com:443#HP",
            "socks5://s.example.com:1080#S",
        ];
        for link in links {
            let server = parser.parse_link(link).unwrap();
            let exported = server.export_to_url();
            let again = parser.parse_link(&exported).unwrap();
            assert_eq!(again.export_to_url(), exported, "{}", link);
        }
    }
}
