use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use trawl::PipelineStats;

const REFRESH: Duration = Duration::from_millis(250);

/// Spinner showing live import counters.
pub struct ImportProgress {
    bar: ProgressBar,
    stats: Arc<PipelineStats>,
}

impl ImportProgress {
    pub fn new(stats: Arc<PipelineStats>) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar, stats }
    }

    pub fn hidden(stats: Arc<PipelineStats>) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            stats,
        }
    }

    pub fn refresh(&self) {
        self.bar.set_message(format!(
            "{} objects done, {} records extracted, {} loaded",
            self.stats.objects_done(),
            self.stats.records_extracted(),
            self.stats.records_loaded()
        ));
    }

    /// Refresh the message periodically until the handle is aborted.
    pub fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let progress = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH);
            loop {
                interval.tick().await;
                progress.refresh();
            }
        })
    }

    pub fn finish(&self) {
        self.refresh();
        self.bar.finish_and_clear();
    }
}
