use super::codec::{decode_base64_text, strip_scheme};
use super::{Protocol, ServerObj, default_name};
use crate::error::{PoolError, PoolResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

/// VMess 节点（v2rayN 分享格式）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vmess {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub id: String,
    pub alter_id: u32,
    pub security: String,
    pub network: String,
    pub header_type: String,
    pub ws_host: String,
    pub path: String,
    pub tls: String,
    pub sni: String,
    pub alpn: String,
}

/// 字符串或数字字段统一转成字符串
fn json_str(obj: &Value, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

impl Vmess {
    pub fn parse(link: &str) -> PoolResult<Self> {
        let body = strip_scheme(link, "vmess")
            .ok_or_else(|| PoolError::MalformedLink(format!("not a vmess link: {}", link)))?
            .trim();
        if body.is_empty() {
            return Err(PoolError::EmptyAddress);
        }

        let decoded = decode_base64_text(body)
            .ok_or_else(|| PoolError::MalformedLink(format!("invalid vmess payload: {}", link)))?;
        let obj: Value = serde_json::from_str(&decoded)
            .map_err(|e| PoolError::MalformedLink(format!("invalid vmess json: {}", e)))?;

        let host = json_str(&obj, "add");
        if host.is_empty() {
            return Err(PoolError::EmptyAddress);
        }
        let port_str = json_str(&obj, "port");
        let port: u16 = port_str
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| PoolError::MalformedLink(format!("invalid vmess port: {}", port_str)))?;
        let id = json_str(&obj, "id");
        if id.is_empty() {
            return Err(PoolError::MalformedLink("missing vmess id".to_string()));
        }
        let alter_id = json_str(&obj, "aid").parse().unwrap_or(0);
        let name = Some(json_str(&obj, "ps")).filter(|s| !s.is_empty());

        let mut network = json_str(&obj, "net");
        if network.is_empty() {
            network = "tcp".to_string();
        }
        let mut security = json_str(&obj, "scy");
        if security.is_empty() {
            security = "auto".to_string();
        }

        Ok(Self {
            name: default_name(name, &host, port),
            host,
            port,
            id,
            alter_id,
            security,
            network,
            header_type: json_str(&obj, "type"),
            ws_host: json_str(&obj, "host"),
            path: json_str(&obj, "path"),
            tls: json_str(&obj, "tls"),
            sni: json_str(&obj, "sni"),
            alpn: json_str(&obj, "alpn"),
        })
    }
}

impl ServerObj for Vmess {
    fn protocol(&self) -> Protocol {
        Protocol::Vmess
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
        Some((&self.id, None))
    }

    fn export_to_url(&self) -> String {
        // 键按字典序输出，同一节点导出结果固定
        let share = json!({
            "v": "2",
            "ps": self.name,
            "add": self.host,
            "port": self.port.to_string(),
            "id": self.id,
            "aid": self.alter_id.to_string(),
            "scy": self.security,
            "net": self.network,
            "type": self.header_type,
            "host": self.ws_host,
            "path": self.path,
            "tls": self.tls,
            "sni": self.sni,
            "alpn": self.alpn,
        });
        let json = share.to_string();
        format!("vmess://{}", STANDARD.encode(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    #[test]
    fn test_parse_vmess_numeric_fields() {
        let v = Vmess::parse(&link(
            r#"{"v":"2","ps":"JP-Tokyo","add":"jp.example.com","port":443,"id":"12345678-1234-1234-1234-123456789012","aid":0,"net":"ws","path":"/ray","tls":"tls"}"#,
        ))
        .unwrap();
        assert_eq!(v.name, "JP-Tokyo");
        assert_eq!(v.host, "jp.example.com");
        assert_eq!(v.port, 443);
        assert_eq!(v.network, "ws");
        assert_eq!(v.security, "auto");
        assert_eq!(v.path, "/ray");
    }

    #[test]
    fn test_parse_vmess_string_port() {
        let v = Vmess::parse(&link(
            r#"{"add":"1.1.1.1","port":"8080","id":"abc","aid":"2"}"#,
        ))
        .unwrap();
        assert_eq!(v.port, 8080);
        assert_eq!(v.alter_id, 2);
        assert_eq!(v.name, "1.1.1.1:8080");
        assert_eq!(v.network, "tcp");
    }

    #[test]
    fn test_vmess_export_roundtrip() {
        let v = Vmess::parse(&link(
            r#"{"ps":"US","add":"us.example.com","port":"443","id":"uuid","aid":"0","net":"grpc","tls":"tls","sni":"cdn.example.com"}"#,
        ))
        .unwrap();
        let exported = v.export_to_url();
        let again = Vmess::parse(&exported).unwrap();
        assert_eq!(again, v);
        assert_eq!(again.export_to_url(), exported);

        let body = strip_scheme(&exported, "vmess").unwrap();
        let json = String::from_utf8(STANDARD.decode(body).unwrap()).unwrap();
        assert!(json.starts_with(r#"{"add":"us.example.com","aid":"0","alpn":"""#));
        assert!(json.contains(r#""type":"""#));
    }

    #[test]
    fn test_vmess_errors() {
        assert!(matches!(Vmess::parse("vmess://"), Err(PoolError::EmptyAddress)));
        assert!(matches!(
            Vmess::parse(&link(r#"{"add":"","port":443,"id":"x"}"#)),
            Err(PoolError::EmptyAddress)
        ));
        assert!(matches!(
            Vmess::parse(&link(r#"{"add":"h","port":443}"#)),
            Err(PoolError::MalformedLink(_))
        ));
        assert!(matches!(
            Vmess::parse("vmess://not-json"),
            Err(PoolError::MalformedLink(_))
        ));
    }
}
