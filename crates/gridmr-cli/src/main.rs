use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use gridmr_core::client::SchedulerClient;
use gridmr_core::protocol::{SubmitJobRequest, UploadBlobRequest};
use gridmr_core::scheduler::job::JobPhase;
use gridmr_core::Config;

#[derive(Parser)]
#[command(name = "gridmr")]
#[command(about = "GridMR distributed MapReduce")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,

    #[arg(
        short,
        long,
        global = true,
        env = "GRIDMR_SCHEDULER_URL",
        help = "Scheduler base URL"
    )]
    scheduler_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the scheduler process
    Scheduler,

    /// Start a worker process
    Worker {
        #[arg(short = 'P', long, help = "Port number")]
        port: Option<u16>,

        #[arg(long, help = "Task slots offered by this worker")]
        capacity: Option<usize>,

        #[arg(long, help = "Inject a fixed delay per task (testing only)")]
        simulate_straggler: bool,
    },

    /// Submit a job and print its id
    Submit {
        #[arg(long, help = "Store path of the input blob")]
        input: String,

        #[arg(long, help = "Store directory for the outputs")]
        output: String,

        #[arg(long, help = "Mapper reference")]
        mapper: String,

        #[arg(long, help = "Reducer reference")]
        reducer: String,

        #[arg(long, default_value = "4", help = "Number of map tasks")]
        num_maps: u32,

        #[arg(long, default_value = "2", help = "Number of reduce partitions")]
        num_reduces: u32,

        #[arg(long, help = "Poll until the job finishes")]
        follow: bool,

        #[arg(long, default_value = "600", help = "Give up following after this many seconds")]
        follow_timeout_secs: u64,
    },

    /// Show job status
    Status {
        #[arg(help = "Job ID")]
        job_id: String,
    },

    /// Upload a local file into the blob store
    Upload {
        #[arg(help = "Local file path")]
        local: PathBuf,

        #[arg(help = "Store path")]
        remote: String,
    },

    /// Read committed output lines
    Results {
        #[arg(help = "Output directory in the store")]
        output_path: String,

        #[arg(long, help = "Print at most this many lines")]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(2);
        }
    };

    init_tracing(&cli, &config);

    let exit_code = match run(cli, &mut config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            1
        }
    };

    std::process::exit(exit_code);
}

fn load_config(cli: &Cli) -> Result<Config, gridmr_core::Error> {
    match &cli.config {
        Some(path) => Config::load(&path.display().to_string()),
        None => Config::from_env(),
    }
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn client(cli_url: &Option<String>, config: &Config) -> SchedulerClient {
    let url = cli_url
        .clone()
        .unwrap_or_else(|| config.worker.scheduler_url.clone());
    SchedulerClient::new(url)
}

async fn run(cli: Cli, config: &mut Config) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Scheduler => {
            info!("Starting gridmr scheduler");
            gridmr_api::run_scheduler(config.clone()).await?;
            Ok(0)
        }

        Commands::Worker {
            port,
            capacity,
            simulate_straggler,
        } => {
            if let Some(port) = port {
                config.worker.port = port;
                config.worker.advertise_endpoint = Some(format!(
                    "http://{}:{}",
                    config.worker.host, port
                ));
            }
            if let Some(capacity) = capacity {
                config.worker.capacity = capacity;
            }
            if simulate_straggler {
                config.worker.simulate_straggler = true;
            }
            if let Some(url) = &cli.scheduler_url {
                config.worker.scheduler_url = url.clone();
            }

            info!("Starting gridmr worker");
            gridmr_api::run_worker(config.clone()).await?;
            Ok(0)
        }

        Commands::Submit {
            input,
            output,
            mapper,
            reducer,
            num_maps,
            num_reduces,
            follow,
            follow_timeout_secs,
        } => {
            let client = client(&cli.scheduler_url, config);

            let job_id = client
                .submit_job(&SubmitJobRequest {
                    input_path: input,
                    output_path: output,
                    mapper_ref: mapper,
                    reducer_ref: reducer,
                    num_maps,
                    num_reduces,
                })
                .await?;

            println!("{}", job_id);

            if !follow {
                return Ok(0);
            }

            let deadline =
                tokio::time::Instant::now() + Duration::from_secs(follow_timeout_secs);
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;

                let status = client.job_status(job_id).await?;
                match status.phase {
                    JobPhase::Completed => {
                        println!("{}", "completed".green().bold());
                        return Ok(0);
                    }
                    JobPhase::Failed => {
                        let message = status
                            .error_message
                            .unwrap_or_else(|| "unknown failure".to_string());
                        eprintln!("{} {}", "failed:".red().bold(), message);
                        return Ok(1);
                    }
                    phase => {
                        eprintln!(
                            "{} phase={} maps={}/{} reduces={}/{}",
                            "running:".cyan(),
                            phase,
                            status.map_tasks.committed,
                            status.num_maps,
                            status.reduce_tasks.committed,
                            status.num_reduces,
                        );
                    }
                }

                if tokio::time::Instant::now() > deadline {
                    eprintln!("{} job still running", "timeout:".yellow().bold());
                    return Ok(3);
                }
            }
        }

        Commands::Status { job_id } => {
            let client = client(&cli.scheduler_url, config);
            let status = client.job_status(job_id.parse()?).await?;

            let phase = match status.phase {
                JobPhase::Completed => "completed".green().bold(),
                JobPhase::Failed => "failed".red().bold(),
                JobPhase::MapPhase => "map".cyan().bold(),
                JobPhase::ReducePhase => "reduce".cyan().bold(),
            };

            println!("job:      {}", status.job_id);
            println!("phase:    {}", phase);
            println!(
                "maps:     {} committed / {} running / {} pending (M={})",
                status.map_tasks.committed,
                status.map_tasks.running,
                status.map_tasks.pending,
                status.num_maps,
            );
            println!(
                "reduces:  {} committed / {} running / {} pending (R={})",
                status.reduce_tasks.committed,
                status.reduce_tasks.running,
                status.reduce_tasks.pending,
                status.num_reduces,
            );
            println!("failures: {}", status.failed_attempts);
            if let Some(message) = status.error_message {
                println!("error:    {}", message.red());
            }

            Ok(0)
        }

        Commands::Upload { local, remote } => {
            let client = client(&cli.scheduler_url, config);
            let data = tokio::fs::read(&local).await?;

            client
                .upload_blob(&UploadBlobRequest {
                    remote_path: remote.clone(),
                    data_base64: STANDARD.encode(&data),
                })
                .await?;

            println!(
                "{} {} -> {} ({} bytes)",
                "uploaded".green(),
                local.display(),
                remote,
                data.len()
            );
            Ok(0)
        }

        Commands::Results { output_path, limit } => {
            let client = client(&cli.scheduler_url, config);
            let lines = client.results(&output_path, limit).await?;
            for line in lines {
                println!("{}", line);
            }
            Ok(0)
        }
    }
}
