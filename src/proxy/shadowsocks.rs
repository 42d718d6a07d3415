use super::codec::{
    decode_base64_text, decode_component, encode_component, encode_url_safe, format_host_port,
    split_fragment, split_host_port, strip_scheme,
};
use super::{Protocol, ServerObj, default_name};
use crate::error::{PoolError, PoolResult};

/// Shadowsocks 节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadowsocks {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub method: String,
    pub password: String,
    /// `plugin;plugin_opts`，为空表示无插件
    pub plugin: String,
}

impl Shadowsocks {
    /// 支持三种写法：
    /// - SIP002: `ss://base64(method:password)@host:port/?plugin=...#name`
    /// - 明文用户信息: `ss://method:password@host:port#name`
    /// - 旧格式: `ss://base64(method:password@host:port)#name`
    pub fn parse(link: &str) -> PoolResult<Self> {
        let body = strip_scheme(link, "ss")
            .ok_or_else(|| PoolError::MalformedLink(format!("not a ss link: {}", link)))?;
        let (body, name) = split_fragment(body);
        if body.trim().is_empty() {
            return Err(PoolError::EmptyAddress);
        }

        let body = body.replace("/?", "?");
        let (main, query) = match body.split_once('?') {
            Some((main, query)) => (main.to_string(), Some(query.to_string())),
            None => (body.clone(), None),
        };

        let mut plugin = String::new();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                if key == "plugin" {
                    plugin = value.trim().to_string();
                }
            }
        }

        let main = main.trim_end_matches('/');
        let (userinfo, hostport) = match main.rsplit_once('@') {
            Some((userinfo, hostport)) => (Self::decode_userinfo(userinfo)?, hostport.to_string()),
            None => {
                let decoded = decode_base64_text(main).ok_or_else(|| {
                    PoolError::MalformedLink(format!("invalid ss payload: {}", link))
                })?;
                let (userinfo, hostport) = decoded.rsplit_once('@').ok_or_else(|| {
                    PoolError::MalformedLink(format!("missing server in ss payload: {}", link))
                })?;
                (Self::split_method(userinfo)?, hostport.to_string())
            }
        };

        let (host, port) = split_host_port(&hostport)?;
        let (method, password) = userinfo;

        Ok(Self {
            name: default_name(name, &host, port),
            host,
            port,
            method,
            password,
            plugin,
        })
    }

    fn decode_userinfo(userinfo: &str) -> PoolResult<(String, String)> {
        if userinfo.contains(':') {
            let (method, password) = userinfo
                .split_once(':')
                .ok_or_else(|| PoolError::MalformedLink("invalid ss userinfo".to_string()))?;
            return Ok((decode_component(method), decode_component(password)));
        }
        let decoded = decode_base64_text(&decode_component(userinfo))
            .ok_or_else(|| PoolError::MalformedLink("invalid ss userinfo".to_string()))?;
        Self::split_method(&decoded)
    }

    fn split_method(s: &str) -> PoolResult<(String, String)> {
        // 密码中可能含有冒号
        let (method, password) = s
            .split_once(':')
            .ok_or_else(|| PoolError::MalformedLink("missing ss method".to_string()))?;
        if method.is_empty() {
            return Err(PoolError::MalformedLink("missing ss method".to_string()));
        }
        Ok((method.to_string(), password.to_string()))
    }
}

impl ServerObj for Shadowsocks {
    fn protocol(&self) -> Protocol {
        Protocol::Shadowsocks
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

    fn credential(&self) -> Option<(&str, Option<&str>)> {
        Some((&self.method, Some(&self.password)))
    }

    fn export_to_url(&self) -> String {
        let userinfo = encode_url_safe(&format!("{}:{}", self.method, self.password));
        let mut link = format!("ss://{}@{}", userinfo, format_host_port(&self.host, self.port));
        if !self.plugin.is_empty() {
            link.push_str("/?plugin=");
            link.push_str(&encode_component(&self.plugin));
        }
        link.push('#');
        link.push_str(&encode_component(&self.name));
        link
    }
}
