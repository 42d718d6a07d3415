use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use subs_pool::{
    ActiveServer, Config, ConnectionRef, FileStore, HttpFetcher, LocalEngine, PoolService, Store,
};

/// 代理节点池与订阅管理工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short = 'f', long, default_value = "config/config.yaml")]
    config: String,

    /// 日志级别，默认取配置文件中的值
    #[arg(long)]
    log_level: Option<String>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,

    /// 存储文件路径
    #[arg(long)]
    store: Option<String>,

    /// 探测超时时间（毫秒）
    #[arg(long)]
    timeout: Option<u64>,

    /// 是否显示进度条
    #[arg(long)]
    progress: Option<bool>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 导入一条链接、多行链接或订阅地址
    Import {
        source: String,

        /// 名称过滤词，可重复，全部匹配才保留
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// 替换主列表中第 N 个节点（从 1 开始）
        #[arg(long)]
        replace: Option<usize>,

        /// 把 source 当作文件路径，导入文件内容
        #[arg(long)]
        file: bool,
    },

    /// 刷新订阅（下标从 0 开始）
    Update {
        index: usize,

        /// 断开已不在订阅中的节点
        #[arg(long)]
        disconnect: bool,

        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// 刷新全部订阅
    UpdateAll {
        #[arg(long)]
        disconnect: bool,
    },

    /// 修改订阅备注和地址
    Remark {
        index: usize,
        remark: String,

        #[arg(long, default_value = "")]
        address: String,
    },

    /// 列出节点、订阅和连接状态
    List,

    /// 打印当前生效的配置
    Config,
}

fn load_config(path: &str) -> (Config, String) {
    if !Path::new(path).exists() {
        return (
            Config::default(),
            format!("使用默认配置 (配置文件不存在: {})", path),
        );
    }
    match Config::load_from_file(path) {
        Ok(config) => (config, format!("从配置文件加载设置: {}", path)),
        Err(e) => (
            Config::default(),
            format!("配置文件加载失败: {}，使用默认配置", e),
        ),
    }
}

fn connection_mark(connected: &[ActiveServer], which: ConnectionRef) -> &'static str {
    if connected.iter().any(|a| !a.stale && a.which == which) {
        " ✅"
    } else {
        ""
    }
}

async fn print_pool(store: &dyn Store) {
    let servers = store.get_servers().await.value;
    let subscriptions = store.get_subscriptions().await.value;
    let connected = store.get_connected_set().await.value;

    println!("\n📋 节点列表 ({}):", servers.len());
    println!("{:=<80}", "");
    for (i, server) in servers.iter().enumerate() {
        let which = ConnectionRef::server(i + 1);
        println!(
            "{:>4}. {} [{}]{}",
            i + 1,
            server.name(),
            server.protocol(),
            connection_mark(&connected, which)
        );
    }

    for (sub, record) in subscriptions.iter().enumerate() {
        println!("\n📡 订阅 [{}] {}", sub, record.address);
        println!("{:-<80}", "");
        if !record.remarks.is_empty() {
            println!("  备注: {}", record.remarks);
        }
        if !record.info.is_empty() {
            println!("  信息: {}", record.info);
        }
        println!("  更新时间: {}", record.status);
        if !record.filters.is_empty() {
            println!("  过滤词: {}", record.filters.join(", "));
        }
        for (i, server) in record.servers.iter().enumerate() {
            let which = ConnectionRef::subscription(sub, i + 1);
            println!(
                "{:>4}. {} [{}]{}",
                i + 1,
                server.name(),
                server.protocol(),
                connection_mark(&connected, which)
            );
        }
    }

    let stale: Vec<&ActiveServer> = connected.iter().filter(|a| a.stale).collect();
    if !stale.is_empty() {
        println!("\n⚠️ 已过期的连接 ({}):", stale.len());
        println!("{:-<80}", "");
        for active in &stale {
            println!(
                "  {} {}",
                active.which,
                active.link.as_deref().unwrap_or("(未知节点)")
            );
        }
    }
    println!(
        "\n已连接: {}，已过期: {}",
        connected.len() - stale.len(),
        stale.len()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();
    let (mut config, config_note) = load_config(&args.config);

    // 设置日志级别
    let level = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level
            .clone()
            .unwrap_or_else(|| config.log_level.clone())
    };
    env_logger::Builder::new().parse_filters(&level).init();
    info!("{}", config_note);

    // 覆盖命令行参数
    if let Some(store) = args.store {
        config.store_path = store;
    }
    if let Some(timeout) = args.timeout {
        config.probe_timeout = timeout;
    }
    if let Some(progress) = args.progress {
        config.print_progress = progress;
    }
    config.log_level = level;

    if let Command::Config = args.command {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let parser = config.link_parser();
    let store: Arc<dyn Store> = Arc::new(FileStore::open(&config.store_path, &parser).await?);
    let engine = Arc::new(LocalEngine::new(
        store.clone(),
        &config.engine_config_path,
        &config.probe_url,
    ));
    let fetcher = Arc::new(HttpFetcher::new(&config.user_agent)?);
    let service = PoolService::new(store.clone(), engine, fetcher, config);

    match args.command {
        Command::Import {
            source,
            filters,
            replace,
            file,
        } => {
            let source = if file {
                tokio::fs::read_to_string(&source).await?
            } else {
                source
            };
            service
                .import(&source, replace.map(ConnectionRef::server), &filters)
                .await?;
            println!("✅ 导入完成");
        }
        Command::Update {
            index,
            disconnect,
            filters,
        } => {
            service
                .update_subscription(index, disconnect, &filters)
                .await?;
            println!("✅ 订阅 [{}] 已更新", index);
        }
        Command::UpdateAll { disconnect } => {
            let updated = service.update_all_subscriptions(disconnect).await;
            let total = store.get_subscriptions().await.value.len();
            if updated < total {
                warn!("{} 个订阅更新失败", total - updated);
            }
            println!("✅ 已更新 {}/{} 个订阅", updated, total);
        }
        Command::Remark {
            index,
            remark,
            address,
        } => {
            service.modify_remark(index, &remark, &address).await?;
            println!("✅ 订阅 [{}] 已修改", index);
        }
        Command::List => print_pool(store.as_ref()).await,
        Command::Config => {}
    }

    Ok(())
}
