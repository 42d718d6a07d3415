use super::codec::{decode_base64_text, encode_url_safe, strip_scheme};
use super::{Protocol, ServerObj, default_name};
use crate::error::{PoolError, PoolResult};

/// ShadowsocksR 节点
///
/// `ssr://base64(host:port:protocol:method:obfs:base64(password)/?obfsparam=..&protoparam=..&remarks=..&group=..)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowsocksR {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub method: String,
    pub obfs: String,
    pub password: String,
    pub obfs_param: String,
    pub proto_param: String,
    pub group: String,
}

impl ShadowsocksR {
    pub fn parse(link: &str) -> PoolResult<Self> {
        let body = strip_scheme(link, "ssr")
            .ok_or_else(|| PoolError::MalformedLink(format!("not a ssr link: {}", link)))?
            .trim();
        if body.is_empty() {
            return Err(PoolError::EmptyAddress);
        }
        let decoded = decode_base64_text(body)
            .ok_or_else(|| PoolError::MalformedLink(format!("invalid ssr payload: {}", link)))?;

        let (main, query) = match decoded.split_once("/?") {
            Some((main, query)) => (main, query),
            None => match decoded.split_once('?') {
                Some((main, query)) => (main, query),
                None => (decoded.as_str(), ""),
            },
        };

        // 从右往左拆，主机可能是带冒号的 IPv6
        let mut parts = main.rsplitn(6, ':');
        let password = parts.next().unwrap_or_default();
        let obfs = parts.next().unwrap_or_default();
        let method = parts.next().unwrap_or_default();
        let protocol = parts.next().unwrap_or_default();
        let port = parts.next().unwrap_or_default();
        let host = parts
            .next()
            .ok_or_else(|| PoolError::MalformedLink(format!("incomplete ssr link: {}", link)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(PoolError::EmptyAddress);
        }
        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| PoolError::MalformedLink(format!("invalid ssr port: {}", port)))?;
        if method.is_empty() {
            return Err(PoolError::MalformedLink("missing ssr method".to_string()));
        }
        let password = decode_base64_text(password)
            .ok_or_else(|| PoolError::MalformedLink("invalid ssr password".to_string()))?;

        let mut remarks = None;
        let mut obfs_param = String::new();
        let mut proto_param = String::new();
        let mut group = String::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = decode_base64_text(&value).unwrap_or_default();
            match key.as_ref() {
                "remarks" => remarks = Some(value).filter(|v| !v.is_empty()),
                "obfsparam" => obfs_param = value,
                "protoparam" => proto_param = value,
                "group" => group = value,
                _ => {}
            }
        }

        Ok(Self {
            name: default_name(remarks, host, port),
            host: host.to_string(),
            port,
            protocol: protocol.to_string(),
            method: method.to_string(),
            obfs: obfs.to_string(),
            password,
            obfs_param,
            proto_param,
            group,
        })
    }
}

impl ServerObj for ShadowsocksR {
    fn protocol(&self) -> Protocol {
        Protocol::ShadowsocksR
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
        let mut params = Vec::new();
        for (key, value) in [
            ("obfsparam", &self.obfs_param),
            ("protoparam", &self.proto_param),
            ("remarks", &self.name),
            ("group", &self.group),
        ] {
            if !value.is_empty() {
                params.push(format!("{}={}", key, encode_url_safe(value)));
            }
        }
        let raw = format!(
            "{}:{}:{}:{}:{}:{}/?{}",
            self.host,
            self.port,
            self.protocol,
            self.method,
            self.obfs,
            encode_url_safe(&self.password),
            params.join("&")
        );
        format!("ssr://{}", encode_url_safe(&raw))
    }
}
