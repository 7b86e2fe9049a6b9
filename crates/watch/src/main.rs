//! `ispitch-watch` -- follow a speech analysis job from the terminal.
//!
//! With a file argument the file is submitted for analysis; without one
//! the job recorded in the state file by a previous run is resumed.
//! Progress text is printed until the job completes or fails.
//!
//! # Environment variables
//!
//! See [`ispitch_tracker::TrackerConfig::from_env`]. `RUST_LOG` controls
//! log verbosity.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use ispitch_core::status_message::{MSG_CONNECTING, MSG_RECONNECTING};
use ispitch_core::{Job, JobStatus};
use ispitch_stream::{AnalysisApi, CredentialProvider, SessionNotice, SseTransport, StaticCredential};
use ispitch_tracker::{FileStore, JobTracker, RegistryChange, TrackerConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ispitch_watch=info,ispitch_tracker=info,ispitch_stream=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = TrackerConfig::from_env();
    let upload: Option<PathBuf> = std::env::args_os().nth(1).map(PathBuf::from);

    tracing::info!(
        api_url = %config.api_url,
        state_file = %config.state_file.display(),
        authenticated = config.token.is_some(),
        "Starting ispitch-watch",
    );

    let credentials: Arc<dyn CredentialProvider> = match &config.token {
        Some(token) => Arc::new(StaticCredential::new(token.clone())),
        None => Arc::new(StaticCredential::anonymous()),
    };
    let client = reqwest::Client::new();
    let transport = Arc::new(SseTransport::with_client(client.clone(), &config.api_url));
    let api = AnalysisApi::with_client(client, &config.api_url, Arc::clone(&credentials));
    let store = Arc::new(FileStore::new(&config.state_file));

    let tracker = JobTracker::new(transport, credentials, store, &config);
    let mut changes = tracker.subscribe();
    let mut notices = tracker.subscribe_notices();

    let job = match upload {
        Some(path) => tracker
            .submit(&api, &path)
            .await
            .with_context(|| format!("submitting {}", path.display()))?,
        None => match tracker.resume(&api).await.context("resuming active job")? {
            Some(job) => job,
            None => {
                eprintln!("No analysis in progress. Pass an audio file to start one.");
                return Ok(ExitCode::SUCCESS);
            }
        },
    };

    println!("Job {}: {}", job.id, job.status.message());
    let final_job = if job.is_terminal() {
        job
    } else {
        follow(&tracker, &job.id, &mut changes, &mut notices).await
    };

    tracker.shutdown().await;

    match final_job.status {
        JobStatus::Completed => {
            print_summary(&final_job);
            Ok(ExitCode::SUCCESS)
        }
        JobStatus::Failed => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::from(130)),
    }
}

/// Print progress for `job_id` until it is terminal or the user interrupts.
async fn follow(
    tracker: &JobTracker,
    job_id: &str,
    changes: &mut tokio::sync::broadcast::Receiver<RegistryChange>,
    notices: &mut tokio::sync::broadcast::Receiver<SessionNotice>,
) -> Job {
    let mut last_line = String::new();
    let mut print = |line: &str| {
        if line != last_line {
            println!("{line}");
            last_line = line.to_string();
        }
    };

    loop {
        if let Some(job) = tracker.get(job_id).filter(Job::is_terminal) {
            print(job.status.message());
            return job;
        }

        tokio::select! {
            change = changes.recv() => match change {
                Ok(RegistryChange::Upserted(job)) if job.id == job_id => print(job.status.message()),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Registry feed lagged");
                    print(tracker.progress_message(job_id));
                }
                Err(RecvError::Closed) => return placeholder_or_cached(tracker, job_id),
            },
            notice = notices.recv() => match notice {
                Ok(SessionNotice::Connecting { job_id: id, .. }) if id == job_id => print(MSG_CONNECTING),
                Ok(SessionNotice::Reconnecting { job_id: id, attempt, delay, .. }) if id == job_id => {
                    print(&format!("{MSG_RECONNECTING} (attempt {attempt}, in {:.1}s)", delay.as_secs_f64()));
                }
                Ok(SessionNotice::Open { job_id: id, .. }) if id == job_id => {
                    print(tracker.progress_message(job_id));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return placeholder_or_cached(tracker, job_id),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(job_id, "Interrupted; the job keeps running and can be resumed");
                return placeholder_or_cached(tracker, job_id);
            }
        }
    }
}

fn placeholder_or_cached(tracker: &JobTracker, job_id: &str) -> Job {
    tracker
        .get(job_id)
        .unwrap_or_else(|| Job::placeholder(job_id))
}

fn print_summary(job: &Job) {
    if let Some(metrics) = &job.metrics {
        println!("  score:         {}", metrics.score);
        println!("  speech rate:   {} wpm", metrics.speech_rate);
        println!("  filler words:  {}", metrics.filler_words_count);
        println!("  pauses:        {}", metrics.pauses_count);
    }
    if let Some(text) = job.payload.as_ref().and_then(|p| p.transcription.as_deref()) {
        println!();
        println!("{text}");
    }
}
