use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use srtflow::cli::{Cli, Commands, OutputFormat};
use srtflow::config::Config;
use srtflow::job::state::TrackingState;
use srtflow::job::{Job, JobId, JobStatus, Speaker};
use srtflow::observer::{StatusObserver, WatchEnd};
use srtflow::output;
use srtflow::store::{JobStore, RestJobStore};
use srtflow::submit::{
    CallerIdentity, HttpTranscriptionService, MediaFile, Submission, Submitter, UploadLimits,
};
use srtflow::utils::format_file_size;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "srtflow=debug"
    } else if cli.quiet {
        "srtflow=warn"
    } else {
        "srtflow=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            cli.log_json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let config = Config::load().await?.apply(cli.connection.into())?;
    let app = App::new(config, cli.quiet)?;

    match cli.command {
        Commands::Submit {
            file,
            program_name,
            teach_txt,
            teach_audio,
            speakers,
            watch,
            download_dir,
        } => {
            let submission =
                build_submission(&file, program_name, teach_txt, teach_audio, speakers).await?;
            app.submit(submission, watch || download_dir.is_some(), download_dir)
                .await?;
        }
        Commands::Status { job_id, format } => {
            let id = JobId::parse(&job_id)?;
            let job = app.store()?.fetch(&id).await?;
            output::print_status(&job, &format.unwrap_or_else(|| app.default_format()))?;
        }
        Commands::Watch {
            job_id,
            download_dir,
        } => {
            let id = JobId::parse(&job_id)?;
            let job = app.watch(&id).await?;
            app.finish(&job, download_dir.as_deref()).await?;
        }
        Commands::Download { job_id, output } => {
            let id = JobId::parse(&job_id)?;
            let job = app.store()?.fetch(&id).await?;
            let path = output::download_subtitles(&job, &output, !app.quiet).await?;
            println!("Subtitles saved to: {}", path.display());
        }
        Commands::Recent { limit, format } => {
            let limit = limit.unwrap_or(app.config.app.recent_limit);
            let jobs = app.store()?.recent(limit).await?;
            output::print_recent(&jobs, &format.unwrap_or_else(|| app.default_format()))?;
        }
        Commands::Config { show } => {
            if show {
                app.config.display();
            } else {
                println!("Configuration file: {}", Config::config_path()?.display());
                println!("Run `srtflow config --show` to see the current values.");
            }
        }
        Commands::Formats => {
            let service = &app.config.service;
            println!("Accepted files:");
            println!("  • Media: {}", service.media_extensions.join(", "));
            println!("  • Sample transcript: {}", service.transcript_extensions.join(", "));
            println!("  • Sample audio: {}", service.audio_extensions.join(", "));
            println!("  • Upload limit: {}", format_file_size(service.max_upload_bytes));
        }
    }

    Ok(())
}

async fn build_submission(
    file: &Path,
    program_name: Option<String>,
    teach_txt: Option<PathBuf>,
    teach_audio: Option<PathBuf>,
    speakers: Vec<Speaker>,
) -> Result<Submission> {
    let mut submission = Submission::new(MediaFile::open(file).await?).with_speakers(speakers);

    if let Some(name) = program_name {
        submission = submission.with_program_name(name);
    }
    if let Some(path) = teach_txt {
        submission = submission.with_teach_transcript(MediaFile::open(&path).await?);
    }
    if let Some(path) = teach_audio {
        submission = submission.with_teach_audio(MediaFile::open(&path).await?);
    }

    Ok(submission)
}

struct App {
    config: Config,
    store: Option<Arc<dyn JobStore>>,
    quiet: bool,
}

impl App {
    fn new(config: Config, quiet: bool) -> Result<Self> {
        let store = match config.store() {
            Some(store_config) => {
                let token = config.access_token().map(str::to_string);
                let store: Arc<dyn JobStore> = Arc::new(RestJobStore::new(store_config, token)?);
                Some(store)
            }
            None => None,
        };

        Ok(Self {
            config,
            store,
            quiet,
        })
    }

    fn store(&self) -> Result<Arc<dyn JobStore>> {
        self.store.clone().context(
            "No job store configured. Set store.url in the config file or SRTFLOW_STORE_URL",
        )
    }

    fn default_format(&self) -> OutputFormat {
        OutputFormat::from_config(&self.config.app.default_output_format)
    }

    fn identity(&self) -> Option<CallerIdentity> {
        let token = self.config.access_token()?;
        Some(CallerIdentity {
            access_token: token.to_string(),
            user_id: self
                .config
                .auth
                .as_ref()
                .and_then(|auth| auth.user_id.clone())
                .filter(|id| !id.is_empty()),
        })
    }

    fn spinner(&self, message: &str) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }

    async fn submit(
        &self,
        submission: Submission,
        follow: bool,
        download_dir: Option<PathBuf>,
    ) -> Result<()> {
        let service = Arc::new(HttpTranscriptionService::new(&self.config.service)?);
        let mut submitter = Submitter::new(service, UploadLimits::from(&self.config.service));
        if let Some(store) = &self.store {
            submitter = submitter.with_store(store.clone());
        }

        let identity = self.identity();
        let spinner = self.spinner("Uploading...");
        let receipt = submitter.submit(submission, identity.as_ref()).await;
        spinner.finish_and_clear();
        let receipt = match receipt {
            Ok(receipt) => receipt,
            Err(e) if e.is_submission_failure() => {
                return Err(anyhow::Error::new(e).context("Upload failed, please try again"))
            }
            Err(e) => return Err(e.into()),
        };

        println!("✅ Job created: {}", receipt.job_id);
        if let Some(minutes) = receipt.estimated_minutes {
            println!("   Estimated time: ~{:.0} min", minutes.ceil());
        }
        if identity.is_some() && !receipt.owner_stamped {
            println!("   (job could not be linked to your account)");
        }

        let mut tracking = TrackingState::default().track(receipt.job_id.clone());
        if !follow {
            println!("Run `srtflow watch {}` to follow it.", receipt.job_id);
            return Ok(());
        }

        let job = self.watch(&receipt.job_id).await?;
        if job.is_terminal() {
            tracking = tracking.finish(job)?;
        }

        if let TrackingState::Finished(job) = &tracking {
            self.finish(job, download_dir.as_deref()).await?;
        }
        Ok(())
    }

    /// Follow a job until it stops changing, then print its board
    async fn watch(&self, id: &JobId) -> Result<Job> {
        let observer = StatusObserver::new(self.store()?);
        let spinner = self.spinner("Waiting for job status...");
        let (latest_tx, latest_rx) = tokio::sync::watch::channel(None::<Job>);

        let update_bar = spinner.clone();
        let complete_bar = spinner.clone();
        let subscription = observer
            .observe(
                id,
                move |job: &Job| {
                    update_bar.set_message(output::progress_message(job));
                    latest_tx.send_replace(Some(job.clone()));
                },
                move |job: &Job| {
                    complete_bar.println(format!("🎉 Subtitles ready for {}", job.subtitle_filename()));
                },
            )
            .await;

        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                spinner.finish_and_clear();
                return Err(e.into());
            }
        };

        let end = tokio::select! {
            end = subscription.finished() => end,
            _ = tokio::signal::ctrl_c() => WatchEnd::Cancelled,
        };
        spinner.finish_and_clear();

        match end {
            WatchEnd::Terminal(status) => tracing::debug!("Job {} ended as {}", id, status),
            WatchEnd::FeedClosed => {
                tracing::warn!("Lost the change feed for job {}, showing last known status", id)
            }
            WatchEnd::Cancelled => tracing::info!("Stopped watching job {}", id),
            WatchEnd::Detached => {
                tracing::warn!("Job store sends no updates, showing the current status only")
            }
        }

        let job = latest_rx
            .borrow()
            .clone()
            .with_context(|| format!("No status received for job {}", id))?;
        output::print_status(&job, &OutputFormat::Text)?;
        Ok(job)
    }

    /// Download completed subtitles or report a failed job
    async fn finish(&self, job: &Job, download_dir: Option<&Path>) -> Result<()> {
        match job.status {
            JobStatus::Completed => {
                if let Some(dir) = download_dir {
                    let path = output::download_subtitles(job, dir, !self.quiet).await?;
                    println!("Subtitles saved to: {}", path.display());
                }
                Ok(())
            }
            JobStatus::Error => anyhow::bail!(
                "Job {} failed: {}",
                job.id,
                job.error_message.as_deref().unwrap_or("unknown error")
            ),
            _ => Ok(()),
        }
    }
}
