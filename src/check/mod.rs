//! 延迟探测与择优连接
//!
//! 每个候选节点独立探测，失败或超时记为不可达但仍参与排序（排在最后）。
//! 结果按创建任务的顺序收集，排序稳定，延迟相同时保持原顺序。

use crate::engine::Engine;
use crate::error::{PoolError, PoolResult};
use crate::store::ConnectionRef;
use crate::ui::ProbeProgress;
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task;

/// 测得的延迟，不可达排在任何可达结果之后
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Latency {
    Reachable(Duration),
    Unreachable,
}

impl Latency {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Latency::Reachable(_))
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Latency::Reachable(d) => write!(f, "{}ms", d.as_millis()),
            Latency::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// 解析引擎返回的 `123ms` / `1.5s`
pub fn parse_latency(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (value, millis) = match raw.strip_suffix("ms") {
        Some(v) => (v.trim(), true),
        None => (raw.strip_suffix('s')?.trim(), false),
    };
    if let Ok(n) = value.parse::<u64>() {
        return Some(if millis {
            Duration::from_millis(n)
        } else {
            Duration::from_secs(n)
        });
    }
    let value: f64 = value.parse().ok()?;
    Duration::try_from_secs_f64(if millis { value / 1000.0 } else { value }).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub which: ConnectionRef,
    pub latency: Latency,
}

#[derive(Default)]
pub struct Stats {
    pub total: AtomicU64,
    pub reachable: AtomicU64,
    pub unreachable: AtomicU64,
    pub activated: AtomicU64,
    pub failed: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_probe(&self, latency: Latency) {
        if latency.is_reachable() {
            self.reachable.fetch_add(1, Ordering::Relaxed);
        } else {
            self.unreachable.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_success_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        let reachable = self.reachable.load(Ordering::Relaxed);

        if total > 0 {
            (reachable as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

pub struct LatencyChecker {
    engine: Arc<dyn Engine>,
    timeout: Duration,
    concurrent: usize,
    progress: Option<ProbeProgress>,
    stats: Arc<Stats>,
}

impl LatencyChecker {
    pub fn new(engine: Arc<dyn Engine>, timeout: Duration, concurrent: usize) -> Self {
        Self {
            engine,
            timeout,
            concurrent: concurrent.max(1),
            progress: None,
            stats: Arc::new(Stats::new()),
        }
    }

    pub fn with_progress(mut self, progress: ProbeProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// 并发探测，结果与 `candidates` 一一对应
    pub async fn probe(&self, candidates: &[ConnectionRef]) -> Vec<Measurement> {
        self.stats
            .total
            .fetch_add(candidates.len() as u64, Ordering::Relaxed);
        if let Some(progress) = &self.progress {
            progress.set_total(candidates.len() as u64);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrent));
        let mut tasks = Vec::with_capacity(candidates.len());

        for &which in candidates {
            let engine = self.engine.clone();
            let semaphore = semaphore.clone();
            let stats = self.stats.clone();
            let progress = self.progress.clone();
            let timeout = self.timeout;

            tasks.push(task::spawn(async move {
                // 超时从拿到许可之后开始计算
                let _permit = semaphore.acquire_owned().await.ok();
                let latency = probe_single(engine.as_ref(), which, timeout).await;
                stats.record_probe(latency);
                if let Some(progress) = progress {
                    progress.record(latency.is_reachable());
                }
                latency
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (&which, task) in candidates.iter().zip(tasks) {
            let latency = task.await.unwrap_or_else(|e| {
                warn!("probe task for {} failed: {}", which, e);
                Latency::Unreachable
            });
            results.push(Measurement { which, latency });
        }

        if let Some(progress) = &self.progress {
            progress.finish();
        }
        results
    }

    /// 按延迟升序稳定排序
    pub fn rank(mut measurements: Vec<Measurement>) -> Vec<Measurement> {
        measurements.sort_by(|a, b| a.latency.cmp(&b.latency));
        measurements
    }

    /// 探测全部候选并连接延迟最低的 `n` 个，返回连接成功的引用
    ///
    /// 某个节点连接失败只记录日志，不会由排在后面的节点补位。
    pub async fn select_top_n(
        &self,
        candidates: &[ConnectionRef],
        n: usize,
    ) -> PoolResult<Vec<ConnectionRef>> {
        if candidates.is_empty() {
            return Err(PoolError::NoCandidates);
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        info!(
            "probing {} candidates for {} slots (timeout {:?})",
            candidates.len(),
            n,
            self.timeout
        );
        let ranked = Self::rank(self.probe(candidates).await);
        for m in &ranked {
            debug!("{}: {}", m.which, m.latency);
        }

        let mut activated = Vec::new();
        for m in ranked.into_iter().take(n) {
            match self.engine.connect(m.which).await {
                Ok(()) => {
                    info!("connected {} ({})", m.which, m.latency);
                    self.stats.activated.fetch_add(1, Ordering::Relaxed);
                    activated.push(m.which);
                }
                Err(e) => {
                    warn!("failed to connect {}: {:#}", m.which, e);
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(activated)
    }

    pub fn log_stats(&self) {
        let total = self.stats.total.load(Ordering::Relaxed);
        info!("探测统计:");
        info!("  候选节点: {}", total);
        info!("  可达节点: {}", self.stats.reachable.load(Ordering::Relaxed));
        info!("  不可达节点: {}", self.stats.unreachable.load(Ordering::Relaxed));
        info!("  已连接: {}", self.stats.activated.load(Ordering::Relaxed));
        info!("  连接失败: {}", self.stats.failed.load(Ordering::Relaxed));
        if total > 0 {
            info!("  可达率: {:.2}%", self.stats.get_success_rate());
        }
    }

    pub fn get_stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }
}

async fn probe_single(engine: &dyn Engine, which: ConnectionRef, timeout: Duration) -> Latency {
    match tokio::time::timeout(timeout, engine.ping(which, timeout)).await {
        Ok(Ok(raw)) => match parse_latency(&raw) {
            Some(d) => Latency::Reachable(d),
            None => {
                debug!("ping {}: unrecognised latency {:?}", which, raw);
                Latency::Unreachable
            }
        },
        Ok(Err(e)) => {
            debug!("ping {} failed: {:#}", which, e);
            Latency::Unreachable
        }
        Err(_) => {
            debug!("ping {} timed out", which);
            Latency::Unreachable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEngine;
    use std::time::Instant;

    fn refs(n: usize) -> Vec<ConnectionRef> {
        (1..=n).map(ConnectionRef::server).collect()
    }

    #[test]
    fn test_parse_latency() {
        assert_eq!(parse_latency("123ms"), Some(Duration::from_millis(123)));
        assert_eq!(parse_latency(" 1.5s "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_latency("TIMEOUT"), None);
        assert_eq!(parse_latency("-5ms"), None);
        assert_eq!(parse_latency("ms"), None);
    }

    #[test]
    fn test_unreachable_sorts_last() {
        assert!(Latency::Reachable(Duration::from_secs(100)) < Latency::Unreachable);
        assert!(Latency::Reachable(Duration::from_millis(10)) < Latency::Reachable(Duration::from_millis(30)));
        assert_eq!(Latency::Unreachable.to_string(), "unreachable");
    }

    #[tokio::test]
    async fn test_top_two_of_four() {
        let engine = Arc::new(MockEngine::new());
        engine.set_latency(ConnectionRef::server(1), "50ms");
        engine.set_latency(ConnectionRef::server(2), "10ms");
        engine.set_latency(ConnectionRef::server(4), "30ms");

        let checker = LatencyChecker::new(engine.clone(), Duration::from_secs(5), 4);
        let activated = checker.select_top_n(&refs(4), 2).await.unwrap();
        assert_eq!(
            activated,
            vec![ConnectionRef::server(2), ConnectionRef::server(4)]
        );
        assert_eq!(engine.connected(), activated);

        let stats = checker.get_stats();
        assert_eq!(stats.reachable.load(Ordering::Relaxed), 3);
        assert_eq!(stats.unreachable.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_ties_keep_discovery_order() {
        let engine = Arc::new(MockEngine::new());
        for which in refs(5) {
            engine.set_latency(which, "20ms");
        }
        let checker = LatencyChecker::new(engine, Duration::from_secs(5), 2);
        let ranked = LatencyChecker::rank(checker.probe(&refs(5)).await);
        let order: Vec<ConnectionRef> = ranked.iter().map(|m| m.which).collect();
        assert_eq!(order, refs(5));
    }

    #[tokio::test]
    async fn test_unreachable_selected_only_when_needed() {
        let engine = Arc::new(MockEngine::new());
        engine.set_latency(ConnectionRef::server(2), "80ms");
        let checker = LatencyChecker::new(engine, Duration::from_secs(5), 4);
        let activated = checker.select_top_n(&refs(3), 8).await.unwrap();
        assert_eq!(activated[0], ConnectionRef::server(2));
        assert_eq!(activated.len(), 3);
    }

    #[tokio::test]
    async fn test_slow_probe_times_out() {
        let engine = Arc::new(MockEngine::new());
        engine.set_slow(ConnectionRef::server(1));
        engine.set_latency(ConnectionRef::server(2), "40ms");

        let checker = LatencyChecker::new(engine, Duration::from_millis(100), 1);
        let start = Instant::now();
        let measurements = checker.probe(&refs(2)).await;
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(measurements[0].latency, Latency::Unreachable);
        assert_eq!(
            measurements[1].latency,
            Latency::Reachable(Duration::from_millis(40))
        );
    }

    #[tokio::test]
    async fn test_failed_activation_is_not_backfilled() {
        let engine = Arc::new(MockEngine::new());
        engine.set_latency(ConnectionRef::server(1), "10ms");
        engine.set_latency(ConnectionRef::server(2), "20ms");
        engine.set_latency(ConnectionRef::server(3), "30ms");
        engine.fail_connect(ConnectionRef::server(1));

        let checker = LatencyChecker::new(engine, Duration::from_secs(5), 4);
        let activated = checker.select_top_n(&refs(3), 2).await.unwrap();
        assert_eq!(activated, vec![ConnectionRef::server(2)]);
        assert_eq!(checker.get_stats().failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let checker = LatencyChecker::new(Arc::new(MockEngine::new()), Duration::from_secs(1), 4);
        assert!(matches!(
            checker.select_top_n(&[], 8).await,
            Err(PoolError::NoCandidates)
        ));
    }
}
