//! jobq CLI: drive a dispatcher with synthetic load and watch it work.

use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use jobq::config::Config;
use jobq::telemetry::{TelemetryConfig, init_telemetry};
use jobq::{Dispatcher, JobHandle, JobId};

#[derive(Parser)]
#[command(name = "jobq", about = "In-process background job dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue synthetic jobs and run them to completion
    Run {
        /// Number of workers (defaults to JOBQ_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        /// Number of jobs to queue
        #[arg(long, default_value_t = 10_000)]
        jobs: u64,
        /// How long each job sleeps
        #[arg(long, default_value_t = 0)]
        job_duration_ms: u64,
        /// Every Nth job fails (0 = none fail)
        #[arg(long, default_value_t = 2)]
        fail_every: u64,
        /// Retention for finished jobs (defaults to JOBQ_JOB_EXPIRY_MS)
        #[arg(long)]
        expiry_ms: Option<u64>,
        /// Periodically print a sampled job's status while jobs run
        #[arg(long)]
        report: bool,
        /// Interval between reports
        #[arg(long, default_value_t = 200)]
        report_interval_ms: u64,
        /// Print every tracked job's status as a JSON array at the end
        #[arg(long)]
        dump: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "jobq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Run {
            workers,
            jobs,
            job_duration_ms,
            fail_every,
            expiry_ms,
            report,
            report_interval_ms,
            dump,
        } => {
            let mut dispatcher_config = config.dispatcher();
            if let Some(workers) = workers {
                dispatcher_config = dispatcher_config.workers(workers);
            }
            if let Some(expiry_ms) = expiry_ms {
                dispatcher_config = dispatcher_config.job_expiry(Duration::from_millis(expiry_ms));
            }
            let load = Load {
                jobs,
                job_duration: Duration::from_millis(job_duration_ms),
                fail_every,
                report: report.then(|| Duration::from_millis(report_interval_ms)),
                dump,
            };
            let began = Instant::now();
            let dispatcher = Dispatcher::new(dispatcher_config)?;
            cmd_run(dispatcher, load, began).await
        }
    }
}

struct Load {
    jobs: u64,
    job_duration: Duration,
    fail_every: u64,
    report: Option<Duration>,
    dump: bool,
}

async fn cmd_run(dispatcher: Dispatcher, load: Load, began: Instant) -> anyhow::Result<()> {
    println!("initialized {:?}", began.elapsed());

    let mut handles: Vec<JobHandle> = Vec::with_capacity(load.jobs as usize);
    for n in 1..=load.jobs {
        let duration = load.job_duration;
        let fails = load.fail_every > 0 && n % load.fail_every == 0;
        let handle = dispatcher
            .submit_fn(move || async move {
                if !duration.is_zero() {
                    tokio::time::sleep(duration).await;
                }
                if fails {
                    anyhow::bail!("job {n} was set up to fail");
                }
                Ok(())
            })
            .await
            .context("queue job")?;
        handles.push(handle);
    }
    println!("queued {:?}", began.elapsed());

    let all_done = async {
        for handle in &handles {
            handle.wait().await;
        }
    };
    tokio::pin!(all_done);

    if let Some(interval) = load.report {
        let mut sample: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut all_done => break,
                _ = tokio::time::sleep(interval) => {
                    sample = (sample + 7919) % handles.len().max(1) as u64;
                    if let Some(handle) = handles.get(sample as usize) {
                        report_job(&dispatcher, handle.id()).await?;
                    }
                }
            }
        }
    } else {
        all_done.await;
    }

    let statuses = dispatcher.list();
    let failed = statuses
        .iter()
        .filter(|status| status.success == Some(false))
        .count();
    println!(
        "done {:?}: {} tracked, {} failed",
        began.elapsed(),
        statuses.len(),
        failed
    );

    if load.dump {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    }

    dispatcher.stop().await;
    Ok(())
}

/// Print one job's status and wait for it to finish.
async fn report_job(dispatcher: &Dispatcher, id: JobId) -> anyhow::Result<()> {
    // The job may already have been purged.
    let Ok(job) = dispatcher.job(id) else {
        return Ok(());
    };
    println!("{}", serde_json::to_string(&job.status())?);
    job.wait().await;
    Ok(())
}
