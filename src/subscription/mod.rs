//! 订阅解码
//!
//! 原始内容依次尝试：去 BOM → 标准 base64 → URL 安全 base64 → 原文；
//! 解码后的文本先按 SIP008 JSON 解析，失败则按行解析链接。

mod fetch;
mod sip008;
mod userinfo;

pub use fetch::{FetchResponse, Fetcher, HttpFetcher, MIN_FETCH_TIMEOUT};
pub use sip008::{Sip008, Sip008Server, data_usage_status};
pub use userinfo::SubscriptionUserInfo;

use crate::error::{PoolError, PoolResult};
use crate::proxy::codec::decode_base64_text;
use crate::proxy::{LinkParser, Server};
use chrono::{SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;

const BOM: &[u8] = b"\xef\xbb\xbf";
const STATUS_PREFIX: &str = "STATUS=";

/// 一个订阅
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionRecord {
    pub address: String,
    /// 最近一次成功解析的节点快照
    pub servers: Vec<Server>,
    /// 流量/到期等信息
    pub info: String,
    /// 最近一次更新时间
    pub status: String,
    pub filters: Vec<String>,
    pub remarks: String,
}

/// 当前时间作为更新标记
pub fn new_update_status() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// 解码结果
#[derive(Debug, Clone, Default)]
pub struct Decoded {
    pub servers: Vec<Server>,
    pub status: String,
}

/// 解码订阅内容
pub fn decode_subscription(bytes: &[u8], parser: &LinkParser) -> PoolResult<Decoded> {
    let bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
    let raw = std::str::from_utf8(bytes)
        .map_err(|e| PoolError::DecodeError(format!("payload is not valid UTF-8: {}", e)))?;

    let text = match decode_base64_text(raw) {
        Some(decoded) => {
            debug!("subscription body is base64 encoded");
            decoded
        }
        None => raw.to_string(),
    };
    // base64 内容里也可能再带一个 BOM
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    Ok(resolve_by_lines(text, parser))
}

/// 先尝试 SIP008，失败再逐行解析
pub fn resolve_by_lines(raw: &str, parser: &LinkParser) -> Decoded {
    if let Some(sip) = Sip008::parse(raw) {
        debug!("subscription body is SIP008 (version {})", sip.version);
        return Decoded {
            servers: sip.servers(),
            status: sip.data_usage_status(),
        };
    }

    let mut decoded = Decoded::default();
    for row in raw.trim().lines() {
        let row = row.trim();
        if let Some(status) = row.strip_prefix(STATUS_PREFIX) {
            decoded.status = status.to_string();
            continue;
        }
        match parser.parse_link(row) {
            Ok(server) => decoded.servers.push(server),
            Err(PoolError::EmptyAddress) => {}
            Err(e) => warn!("resolve_by_lines: {}: {}", e, row),
        }
    }
    decoded
}

/// 还原订阅地址：`sub://` 为 base64 编码的真实地址，无 scheme 时默认 http
pub fn resolve_source_address(source: &str) -> PoolResult<String> {
    let source = source.trim();
    if let Some(encoded) = source.strip_prefix("sub://") {
        let address = decode_base64_text(encoded)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PoolError::DecodeError(format!("invalid sub:// address: {}", source)))?;
        return Ok(address);
    }
    if source.contains("://") {
        Ok(source.to_string())
    } else {
        Ok(format!("http://{}", source))
    }
}

/// 拉取并解码订阅，`Subscription-Userinfo` 头的内容放在状态前面
pub async fn resolve_subscription(
    fetcher: &dyn Fetcher,
    parser: &LinkParser,
    address: &str,
    timeout: Duration,
) -> PoolResult<Decoded> {
    let timeout = timeout.max(MIN_FETCH_TIMEOUT);
    info!("fetching subscription {} (timeout {:?})", address, timeout);

    let response = fetcher
        .get(address, timeout)
        .await
        .map_err(PoolError::fetch)?;
    let mut decoded = decode_subscription(&response.body, parser)?;

    if let Some(header) = response.header("subscription-userinfo") {
        let user_info = SubscriptionUserInfo::parse(header).to_string();
        if !user_info.is_empty() {
            decoded.status = if decoded.status.is_empty() {
                user_info
            } else {
                format!("{}|{}", user_info, decoded.status)
            };
        }
    }

    info!(
        "resolved {} servers from {}",
        decoded.servers.len(),
        address
    );
    Ok(decoded)
}
