use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 延迟探测进度
#[derive(Clone)]
pub struct ProbeProgress {
    bar: Option<ProgressBar>,
    total: Arc<AtomicU64>,
    reachable: Arc<AtomicU64>,
    unreachable: Arc<AtomicU64>,
}

impl ProbeProgress {
    pub fn new(enabled: bool) -> Self {
        let bar = enabled.then(|| {
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] 延迟探测: [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            let bar = ProgressBar::new(0);
            bar.set_style(style);
            bar
        });

        Self {
            bar,
            total: Arc::new(AtomicU64::new(0)),
            reachable: Arc::new(AtomicU64::new(0)),
            unreachable: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.reachable.store(0, Ordering::Relaxed);
        self.unreachable.store(0, Ordering::Relaxed);

        if let Some(pb) = &self.bar {
            pb.set_length(total);
            pb.set_position(0);
        }
    }

    pub fn record(&self, reachable: bool) {
        if reachable {
            self.reachable.fetch_add(1, Ordering::Relaxed);
        } else {
            self.unreachable.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(pb) = &self.bar {
            pb.inc(1);
            pb.set_message(if reachable { "✅" } else { "❌" });
        }
    }

    pub fn finish(&self) {
        if let Some(pb) = &self.bar {
            pb.finish_with_message(format!(
                "完成 可用 {} 不可用 {} 共 {}",
                self.reachable.load(Ordering::Relaxed),
                self.unreachable.load(Ordering::Relaxed),
                self.total.load(Ordering::Relaxed)
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let progress = ProbeProgress::new(false);
        assert!(progress.bar.is_none());
        progress.set_total(4);
        progress.record(true);
        progress.record(false);
        progress.record(true);
        assert_eq!(progress.total.load(Ordering::Relaxed), 4);
        assert_eq!(progress.reachable.load(Ordering::Relaxed), 2);
        assert_eq!(progress.unreachable.load(Ordering::Relaxed), 1);

        // 重新设置总数时计数清零
        progress.set_total(2);
        assert_eq!(progress.reachable.load(Ordering::Relaxed), 0);
        progress.finish();
    }
}
