use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pipewatch_client::config::resolve_log_stdout;
use pipewatch_client::{
    load_config, BatchAggregator, ConfigOverrides, JobStore, JobTracker, RestJobStore,
};
use pipewatch_core::batch::BatchView;
use pipewatch_core::pipeline::JobView;
use pipewatch_core::{JobId, StageState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pipewatch", about = "Follow call-analysis pipeline progress")]
struct Args {
    #[arg(long, default_value = "")]
    api_url: String,
    #[arg(long, default_value = "")]
    ws_url: String,
    #[arg(long, default_value = "")]
    token: String,
    #[command(subcommand)]
    command: WatchCommand,
}

#[derive(Subcommand, Debug)]
enum WatchCommand {
    /// Stream one job's stages until it finishes.
    Job { job_id: String },
    /// Poll a batch until no job is active.
    Batch { batch_id: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    let config = load_config(ConfigOverrides {
        api_url: args.api_url,
        ws_url: args.ws_url,
        token: args.token,
    })
    .context("loading configuration")?;
    let store: Arc<dyn JobStore> =
        Arc::new(RestJobStore::new(&config).context("building job store client")?);

    match args.command {
        WatchCommand::Job { job_id } => {
            let job_id = JobId::new(job_id);
            info!("watching job {job_id} via {}", config.ws_base_url);
            let tracker = JobTracker::spawn(job_id, &config, store, |view| {
                println!("finished: {} ({}%)", view.job_status, view.percentage);
            });
            let mut updates = tracker.subscribe();
            loop {
                let view = updates.borrow_and_update().clone();
                print_job(&view);
                if view.settled {
                    print_final(&view);
                    break;
                }
                if view.channel_closed {
                    println!("[{}] progress channel gave up; last known state shown", view.job_id);
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
            tracker.stop();
            tracker.join().await;
        }
        WatchCommand::Batch { batch_id } => {
            let watch = BatchAggregator::new(batch_id, store, config.batch_refresh_interval).spawn();
            let mut updates = watch.subscribe();
            loop {
                if updates.changed().await.is_err() {
                    break;
                }
                let Some(view) = updates.borrow_and_update().clone() else {
                    continue;
                };
                print_batch(&view);
                if !view.has_active {
                    break;
                }
            }
            watch.stop();
            watch.join().await;
        }
    }
    Ok(())
}

fn print_job(view: &JobView) {
    if view.is_waiting() {
        println!("[{}] waiting for pipeline...", view.job_id);
        return;
    }
    let link = if view.connected { "live" } else { "offline" };
    let stale = if view.stale { " (stale)" } else { "" };
    println!(
        "[{}] {} {:>3}% {link}{stale}",
        view.job_id, view.job_status, view.percentage
    );
    for stage in &view.stages {
        let marker = match stage.state {
            StageState::Pending => ' ',
            StageState::Running => '>',
            StageState::Completed => 'x',
            StageState::Failed => '!',
        };
        match &stage.error_detail {
            Some(detail) => println!("  [{marker}] {}: {detail}", stage.label()),
            None => println!("  [{marker}] {}", stage.label()),
        }
    }
}

fn print_final(view: &JobView) {
    if let Some(message) = &view.error_message {
        println!("error: {message}");
    }
    match &view.result {
        Some(result) => {
            let label = result
                .score_name
                .as_deref()
                .or(result.score_label.as_deref())
                .unwrap_or("score");
            match result.overall_score {
                Some(score) => println!("{label}: {score:.1}"),
                None => println!("{label}: n/a"),
            }
            if result.fatal_flaw == Some(true) {
                println!("fatal flaw detected");
            }
            if let Some(summary) = &result.summary {
                println!("{summary}");
            }
        }
        None if view.stale => println!("results unavailable; run again to refresh"),
        None => {}
    }
}

fn print_batch(view: &BatchView) {
    println!(
        "[batch {}] {}/{} done ({} failed, {} processing, {} queued) {:>3}%",
        view.batch_id,
        view.finished_count(),
        view.total_count,
        view.failed_count,
        view.processing_count,
        view.queued_count,
        view.progress_pct
    );
    for job in &view.jobs {
        match job.score {
            Some(score) => println!("  {} {} {score:.1}", job.job_id, job.status),
            None => println!("  {} {}", job.job_id, job.status),
        }
    }
    if let Some(average) = view.average_score() {
        println!("  average score {average:.1}");
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if resolve_log_stdout() {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    }
}
