//! 链接编解码辅助函数

use crate::error::{PoolError, PoolResult};
use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

const LENIENT: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_decode_padding_mode(DecodePaddingMode::Indifferent)
    .with_decode_allow_trailing_bits(true);

/// 标准字母表，填充可有可无
const STD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
/// URL 安全字母表，填充可有可无
const URL_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

/// 标准 base64 解码，允许换行与缺失的填充
pub fn base64_std_decode(s: &str) -> Option<Vec<u8>> {
    let cleaned = strip_whitespace(s);
    if cleaned.is_empty() {
        return None;
    }
    STD_LENIENT.decode(cleaned).ok()
}

pub fn base64_url_decode(s: &str) -> Option<Vec<u8>> {
    let cleaned = strip_whitespace(s);
    if cleaned.is_empty() {
        return None;
    }
    URL_LENIENT.decode(cleaned).ok()
}

/// 先标准字母表再 URL 安全字母表，结果必须是 UTF-8
pub fn decode_base64_text(s: &str) -> Option<String> {
    base64_std_decode(s)
        .or_else(|| base64_url_decode(s))
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

pub fn encode_url_safe(s: &str) -> String {
    URL_SAFE_NO_PAD.encode(s)
}

pub fn encode_component(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

pub fn decode_component(s: &str) -> String {
    urlencoding::decode(s)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// 去掉 `scheme://` 前缀，scheme 不区分大小写
pub fn strip_scheme<'a>(link: &'a str, scheme: &str) -> Option<&'a str> {
    let head = link.get(..scheme.len() + 3)?;
    let (name, sep) = head.split_at(scheme.len());
    (name.eq_ignore_ascii_case(scheme) && sep == "://").then(|| &link[head.len()..])
}

/// 拆分 `host:port`，支持 `[ipv6]:port`
pub fn split_host_port(s: &str) -> PoolResult<(String, u16)> {
    let s = s.trim().trim_end_matches('/');
    if s.is_empty() {
        return Err(PoolError::EmptyAddress);
    }

    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| PoolError::MalformedLink(format!("unterminated IPv6 host: {}", s)))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| PoolError::MalformedLink(format!("missing port: {}", s)))?;
        (host, port)
    } else {
        s.rsplit_once(':')
            .ok_or_else(|| PoolError::MalformedLink(format!("missing port: {}", s)))?
    };

    if host.is_empty() {
        return Err(PoolError::EmptyAddress);
    }

    let port: u16 = port
        .parse()
        .map_err(|_| PoolError::MalformedLink(format!("invalid port: {}", port)))?;
    if port == 0 {
        return Err(PoolError::MalformedLink("port must not be 0".to_string()));
    }

    Ok((host.to_string(), port))
}

/// 导出时使用的主机写法，IPv6 地址加方括号
pub fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// 拆出 `#fragment`，返回 (主体, 解码后的名称)
pub fn split_fragment(s: &str) -> (&str, Option<String>) {
    match s.split_once('#') {
        Some((body, frag)) => {
            let name = decode_component(frag);
            let name = name.trim();
            (body, (!name.is_empty()).then(|| name.to_string()))
        }
        None => (s, None),
    }
}
