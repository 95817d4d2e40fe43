use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cli::follow::{follow_until_done, poll_until_done};
use cli::output::{self, print_json, print_status, status_line};
use dedup_core::config::{self, AppConfig};
use dedup_core::{AnalysisRequest, DedupClient, HashAlgorithm, TaskHandle, TaskStatus};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use transport::CancelToken;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling in-flight calls");
            on_interrupt.cancel();
        }
    });

    let client = DedupClient::from_config(&cfg)
        .with_context(|| format!("connecting to {}", cfg.server.base_url))?;
    let mut options = client.options().clone().with_cancel(cancel);
    if let Some(secs) = cli.timeout {
        options = options.with_timeout(Duration::from_secs(secs));
    }
    let client = client.with_options(options);

    match cli.command {
        Commands::Analyze {
            path,
            distance,
            hash,
            hash_size,
            wait,
            follow,
            json,
        } => {
            run_analyze(
                &cfg, &client, path, distance, hash, hash_size, wait, follow, json,
            )
            .await
        }
        Commands::Poll { task_id, json } => {
            let handle = client.tasks().track(&task_id)?;
            let status = client.tasks().poll(&handle).await?;
            print_status(&status, json)
        }
        Commands::Wait { task_id, json } => {
            let handle = client.tasks().track(&task_id)?;
            run_wait(&cfg, &client, &handle, json).await
        }
        Commands::Follow { task_id, json } => {
            let handle = client.tasks().track(&task_id)?;
            run_follow(&client, &handle, json).await
        }
        Commands::Ls { path, json } => {
            let files = client
                .files()
                .list_dir(&path)
                .await
                .with_context(|| format!("listing {}", path.display()))?;
            if json {
                print_json(&files)
            } else {
                print!("{}", output::files_text(&files));
                Ok(())
            }
        }
        Commands::Rm { paths, json } => run_rm(&client, &paths, json).await,
        Commands::Restore { ids, json } => run_restore(&client, &ids, json).await,
        Commands::RestoreAll => {
            client
                .files()
                .restore_all()
                .await
                .context("restoring deleted files; run `dedup deleted` to see what is left")?;
            println!("all deleted files restored");
            Ok(())
        }
        Commands::Deleted { json } => {
            let records = client.files().list_deleted().await?;
            if json {
                print_json(&records)
            } else {
                print!("{}", output::deleted_text(&records));
                Ok(())
            }
        }
    }
}

#[derive(Parser)]
#[command(name = "dedup")]
#[command(about = "Find and clean up similar images through a dedup server", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Upper bound in seconds for every server call
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a folder for similarity analysis
    Analyze {
        /// Folder on the server to analyze
        path: PathBuf,
        /// Maximum hash distance for two images to count as similar
        #[arg(long)]
        distance: Option<u32>,
        /// Hash algorithm: ahash|phash|dhash
        #[arg(long)]
        hash: Option<HashAlgorithm>,
        /// Hash size in bits per side
        #[arg(long)]
        hash_size: Option<u32>,
        /// Poll until the analysis finishes
        #[arg(long, conflicts_with = "follow")]
        wait: bool,
        /// Subscribe to status updates until the analysis finishes
        #[arg(long)]
        follow: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask once for a task's status
    Poll {
        task_id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Poll a task until it finishes
    Wait {
        task_id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Print pushed status updates until a task finishes
    Follow {
        task_id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// List files in a server folder
    Ls {
        path: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Move files to the deleted set
    Rm {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore deleted files by id
    Restore {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore every deleted file
    RestoreAll,
    /// List deleted files
    Deleted {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[allow(clippy::too_many_arguments)]
async fn run_analyze(
    cfg: &AppConfig,
    client: &DedupClient,
    path: PathBuf,
    distance: Option<u32>,
    hash: Option<HashAlgorithm>,
    hash_size: Option<u32>,
    wait: bool,
    follow: bool,
    json: bool,
) -> Result<()> {
    let request = AnalysisRequest::new(
        path,
        distance.unwrap_or(cfg.analysis.distance),
        hash.unwrap_or(cfg.analysis.hash_algorithm),
        hash_size.unwrap_or(cfg.analysis.hash_size),
    )?;
    let handle = client
        .tasks()
        .submit(&request)
        .await
        .with_context(|| format!("submitting {}", request.path().display()))?;

    if wait {
        run_wait(cfg, client, &handle, json).await
    } else if follow {
        run_follow(client, &handle, json).await
    } else if json {
        print_json(&serde_json::json!({ "taskId": handle.task_id() }))
    } else {
        println!("{}", handle);
        Ok(())
    }
}

fn progress(json: bool) -> impl FnMut(&TaskStatus) {
    move |status| {
        if !json && !status.is_terminal() {
            eprintln!("{}", status_line(status));
        }
    }
}

async fn run_wait(cfg: &AppConfig, client: &DedupClient, handle: &TaskHandle, json: bool) -> Result<()> {
    let status = poll_until_done(client.tasks(), handle, cfg.poll.interval(), progress(json))
        .await
        .with_context(|| format!("waiting for {}", handle))?;
    print_status(&status, json)
}

async fn run_follow(client: &DedupClient, handle: &TaskHandle, json: bool) -> Result<()> {
    let status = follow_until_done(client.tasks(), handle, progress(json))
        .await
        .with_context(|| format!("following {}", handle))?;
    print_status(&status, json)
}

async fn run_rm(client: &DedupClient, paths: &[PathBuf], json: bool) -> Result<()> {
    let mut records = Vec::new();
    let mut failed = 0;
    for path in paths {
        match client.files().delete_file(path).await {
            Ok(record) => {
                if !json {
                    println!("{}  {}", record.id, record.original_path.display());
                }
                records.push(record);
            }
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failed += 1;
            }
        }
    }
    if json {
        print_json(&records)?;
    }
    if failed > 0 {
        bail!("{} of {} file(s) could not be deleted", failed, paths.len());
    }
    Ok(())
}

async fn run_restore(client: &DedupClient, ids: &[String], json: bool) -> Result<()> {
    let mut restored = Vec::new();
    let mut failed = 0;
    for id in ids {
        match client.files().restore_file(id).await {
            Ok(file) => {
                if !json {
                    println!("{}  {}", id, file.path.display());
                }
                restored.push(file);
            }
            Err(e) => {
                eprintln!("{}: {}", id, e);
                failed += 1;
            }
        }
    }
    if json {
        print_json(&restored)?;
    }
    if failed > 0 {
        bail!("{} of {} file(s) could not be restored", failed, ids.len());
    }
    Ok(())
}
