//! The batch loop: URLs in, files on disk out.

use crate::account::AccountPool;
use crate::catalog::{Job, Link, Track};
use crate::config::AppConfig;
use crate::dedup::ActiveFiles;
use crate::download::{destination, track_file_stem, transfer, TransferStats};
use crate::error::{Error, Result};
use crate::input;
use crate::pool::{Batch, BatchSummary, WorkerPool};
use crate::progress::Progress;
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Application {
    settings: Arc<AppConfig>,
    accounts: AccountPool,
    active_files: Arc<ActiveFiles>,
    global: WorkerPool,
    downloads: WorkerPool,
    shutdown: Arc<ShutdownCoordinator>,
    cancel: CancellationToken,
    progress: Progress,
    stats: TransferStats,
}

impl Application {
    /// Pool sizes and download preferences come from the first account.
    pub fn new(accounts: AccountPool, shutdown: Arc<ShutdownCoordinator>, progress: Progress) -> Arc<Self> {
        let settings = Arc::clone(&accounts.current().config);
        let global = WorkerPool::new("global", settings.max_global_workers);
        let downloads = WorkerPool::new("download", settings.max_download_workers);
        let cancel = shutdown.token();

        info!(
            "⚙️  {} account(s), {} {} / {} {} workers",
            accounts.len(),
            global.capacity(),
            global.name(),
            downloads.capacity(),
            downloads.name()
        );

        Arc::new(Self {
            settings,
            accounts,
            active_files: ActiveFiles::new(),
            global,
            downloads,
            shutdown,
            cancel,
            progress,
            stats: TransferStats::default(),
        })
    }

    pub fn settings(&self) -> &AppConfig {
        &self.settings
    }

    pub fn accounts(&self) -> &AccountPool {
        &self.accounts
    }

    pub fn active_files(&self) -> &Arc<ActiveFiles> {
        &self.active_files
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Processes batches until input runs out, `quit` is set after the first
    /// batch, or a shutdown has drained.
    pub async fn run<R>(self: &Arc<Self>, initial: Vec<String>, quit: bool, input: &mut R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut urls = initial;
        loop {
            if urls.is_empty() {
                match input::prompt(input).await? {
                    Some(next) if next.is_empty() => continue,
                    Some(next) => urls = next,
                    None => return Ok(()),
                }
            }

            self.run_batch(std::mem::take(&mut urls)).await;

            if self.shutdown.batch_settled() || quit {
                return Ok(());
            }
        }
    }

    /// Dispatches every URL through the global pool and waits for all of
    /// them to settle.
    pub async fn run_batch(self: &Arc<Self>, urls: Vec<String>) -> BatchSummary {
        self.shutdown.set_busy(true);
        info!("🚀 Starting batch of {} URL(s) on the {} pool", urls.len(), self.global.name());

        let batch = Batch::new();
        for url in urls {
            let app = Arc::clone(self);
            self.global.submit(&batch, url.clone(), app.handle_url(url));
        }
        let summary = batch.wait().await;
        self.progress.clear();

        info!(
            "📊 Batch finished: {} succeeded, {} failed, {} cancelled",
            summary.completed, summary.failed, summary.cancelled
        );
        for failure in &summary.failures {
            error!("   {} -> {}", failure.label, failure.error);
        }
        summary
    }

    async fn handle_url(self: Arc<Self>, url: String) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let link = Link::parse(&url)?;
        let link = &link;
        let job = self
            .accounts
            .with_failover(link.store, "lookup", |_, catalog| async move {
                catalog.resolve(link).await
            })
            .await?;

        if job.tracks.is_empty() {
            warn!("⚠️  {} has no downloadable tracks", url);
            return Ok(());
        }
        info!("🔎 {} → {} ({} track(s))", url, job.title, job.tracks.len());

        let job = Arc::new(job);
        let batch = Batch::new();
        for track in &job.tracks {
            let app = Arc::clone(&self);
            let label = format!("{} - {}", track.artist_names(), track.name);
            self.downloads.submit_cancellable(
                &batch,
                &self.cancel,
                label,
                app.download_track(Arc::clone(&job), track.clone()),
            );
        }
        let summary = batch.wait().await;

        if summary.failed > 0 {
            Err(Error::Job {
                failed: summary.failed,
                total: summary.total(),
            })
        } else if summary.cancelled > 0 {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn download_track(self: Arc<Self>, job: Arc<Job>, track: Track) -> Result<()> {
        let dest = destination(&self.settings, &job, &track);
        let Some(_claim) = self.active_files.claim(&dest) else {
            self.stats.record_in_flight();
            info!("⏩ Already downloading {}, skipping", dest.display());
            return Ok(());
        };
        if tokio::fs::try_exists(&dest).await? {
            self.stats.record_existing();
            info!("⏩ {} exists, skipping", dest.display());
            return Ok(());
        }

        let quality = self.settings.quality;
        let track = &track;
        let stream = self
            .accounts
            .with_failover(job.store, "download", |_, catalog| async move {
                catalog.download(track, quality).await
            })
            .await?;

        let name = track_file_stem(&self.settings.track_file_template, track);
        let bar = self.progress.transfer_bar(&name, stream.content_length);
        let result = transfer(stream, &dest, &bar).await;
        bar.finish_and_clear();

        let written = result?;
        self.stats.record_downloaded();
        info!("✅ {} ({} bytes)", dest.display(), written);
        Ok(())
    }
}
