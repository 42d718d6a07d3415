use chrono::{DateTime, Utc};
use std::fmt;

const GB: i64 = 1_000_000_000;

/// `Subscription-Userinfo` 响应头
///
/// 形如 `upload=1000;download=2000;total=5000;expire=1700000000`，缺失的字段不输出。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionUserInfo {
    pub upload: Option<i64>,
    pub download: Option<i64>,
    pub total: Option<i64>,
    pub expire: Option<DateTime<Utc>>,
}

impl SubscriptionUserInfo {
    pub fn parse(header: &str) -> Self {
        let mut info = Self::default();
        for field in header.split(';') {
            let Some((key, value)) = field.trim().split_once('=') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<i64>() else {
                continue;
            };
            match key.trim() {
                "upload" => info.upload = Some(value),
                "download" => info.download = Some(value),
                "total" => info.total = Some(value),
                "expire" => info.expire = DateTime::from_timestamp(value, 0),
                _ => {}
            }
        }
        info
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl fmt::Display for SubscriptionUserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut outputs = Vec::new();
        if let Some(upload) = self.upload {
            outputs.push(format!("upload: {} GB", upload / GB));
        }
        if let Some(download) = self.download {
            outputs.push(format!("download: {} GB", download / GB));
        }
        if let Some(total) = self.total {
            outputs.push(format!("total: {} GB", total / GB));
        }
        if let Some(expire) = self.expire {
            outputs.push(format!("expire: {}", expire.format("%Y-%m-%d %H:%M")));
        }
        f.write_str(&outputs.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_header() {
        let info = SubscriptionUserInfo::parse(
            "upload=1000000000;download=2000000000;total=5000000000;expire=1700000000",
        );
        assert_eq!(
            info.to_string(),
            "upload: 1 GB; download: 2 GB; total: 5 GB; expire: 2023-11-14 22:13"
        );
    }

    #[test]
    fn test_partial_and_garbage_fields() {
        let info = SubscriptionUserInfo::parse(" download = 3500000000 ; foo=bar; total=abc;upload");
        assert_eq!(info.download, Some(3_500_000_000));
        assert_eq!(info.total, None);
        assert_eq!(info.to_string(), "download: 3 GB");
    }

    #[test]
    fn test_empty_header() {
        let info = SubscriptionUserInfo::parse("");
        assert!(info.is_empty());
        assert_eq!(info.to_string(), "");
    }
}
