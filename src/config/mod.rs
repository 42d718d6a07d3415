use crate::proxy::{LinkParser, PluginValidator, SchemePluginValidator};
use crate::subscription::MIN_FETCH_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 进度显示
    pub print_progress: bool,

    // 探测参数
    pub probe_timeout: u64,
    pub probe_concurrent: usize,
    pub probe_url: String,
    pub auto_connect_target: usize,

    // 拉取参数
    pub fetch_timeout: u64,
    pub subscription_fetch_timeout: u64,
    pub user_agent: String,

    // 插件协议
    pub plugin_scheme: Option<String>,

    // 存储
    pub store_path: String,
    pub engine_config_path: String,

    // 日志配置
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            print_progress: false,
            probe_timeout: 5000,
            probe_concurrent: 16,
            probe_url: "http://www.gstatic.com/generate_204".to_string(),
            auto_connect_target: 8,
            fetch_timeout: 30000,
            subscription_fetch_timeout: 90000,
            user_agent: concat!("subs-pool/", env!("CARGO_PKG_VERSION")).to_string(),
            plugin_scheme: None,
            store_path: "./data/store.json".to_string(),
            engine_config_path: "./data/engine.yaml".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout)
    }

    /// 不低于 30 秒
    pub fn get_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout).max(MIN_FETCH_TIMEOUT)
    }

    pub fn get_subscription_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_fetch_timeout).max(MIN_FETCH_TIMEOUT)
    }

    pub fn plugin_validator(&self) -> Option<Arc<dyn PluginValidator>> {
        self.plugin_scheme
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Arc::new(SchemePluginValidator::new(s)) as Arc<dyn PluginValidator>)
    }

    /// 内置协议加上配置的插件协议
    pub fn link_parser(&self) -> LinkParser {
        match self.plugin_validator() {
            Some(validator) => LinkParser::new().with_plugin(validator),
            None => LinkParser::new(),
        }
    }
}
