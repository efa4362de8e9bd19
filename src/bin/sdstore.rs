use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sdstore::config::default_socket_path;
use sdstore::ipc::protocol::Reply;
use sdstore::ipc::DaemonClient;
use sdstore::scheduler::{JobId, JobSubmission};

#[derive(Parser, Debug)]
#[command(name = "sdstore")]
#[command(about = "Submit file transformation jobs to a running sdstored")]
struct Args {
    /// Daemon socket path (defaults to sdstored.sock in the temp dir)
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a job and wait for its outcome
    ProcFile {
        /// Priority; higher runs sooner
        priority: u32,
        input: PathBuf,
        output: PathBuf,
        /// Filters to apply, in pipeline order
        #[arg(required = true)]
        filters: Vec<String>,
    },
    /// Show active jobs and per-filter usage
    Status,
    /// Cancel a pending or running job
    Cancel { job_id: u64 },
    /// Ask the daemon to drain and exit
    Shutdown,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let socket = args.socket.unwrap_or_else(default_socket_path);

    let mut client = match DaemonClient::connect(&socket).await {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Commands::ProcFile { priority, input, output, filters } => {
            proc_file(&mut client, priority, input, output, &filters).await
        }
        Commands::Status => status(&mut client).await,
        Commands::Cancel { job_id } => cancel(&mut client, JobId(job_id)).await,
        Commands::Shutdown => shutdown(&mut client).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Submit, then follow the job's replies until the terminal one. Filter
/// names go over the wire as-is; the daemon rejects unknown ones.
async fn proc_file(
    client: &mut DaemonClient,
    priority: u32,
    input: PathBuf,
    output: PathBuf,
    filters: &[String],
) -> sdstore::Result<ExitCode> {
    client
        .submit(JobSubmission { priority, input, output, filters: filters.to_vec() })
        .await?;

    loop {
        let reply = match client.next_reply().await? {
            Some(reply) => reply,
            None => {
                eprintln!("connection closed before a terminal reply");
                return Ok(ExitCode::FAILURE);
            }
        };
        match reply {
            Reply::Accepted { job_id } => println!("task #{job_id}: pending"),
            Reply::Started { job_id } => println!("task #{job_id}: processing"),
            Reply::Completed { job_id, bytes_in, bytes_out } => {
                println!(
                    "task #{job_id}: concluded (bytes-input: {bytes_in}, bytes-output: {bytes_out})"
                );
                return Ok(ExitCode::SUCCESS);
            }
            Reply::Rejected { reason } => {
                println!("request refused: {reason}");
                return Ok(ExitCode::FAILURE);
            }
            Reply::Failed { job_id, reason } => {
                println!("task #{job_id}: failed ({reason})");
                return Ok(ExitCode::FAILURE);
            }
            Reply::Cancelled { job_id } => {
                println!("task #{job_id}: cancelled");
                return Ok(ExitCode::FAILURE);
            }
            other => {
                eprintln!("unexpected reply: {other:?}");
                return Ok(ExitCode::FAILURE);
            }
        }
    }
}

async fn status(client: &mut DaemonClient) -> sdstore::Result<ExitCode> {
    let snapshot = client.status().await?;
    print!("{}", snapshot.render());
    Ok(ExitCode::SUCCESS)
}

async fn cancel(client: &mut DaemonClient, job_id: JobId) -> sdstore::Result<ExitCode> {
    match client.cancel(job_id).await? {
        Reply::CancelAck { job_id } => {
            println!("task #{job_id}: cancel requested");
            Ok(ExitCode::SUCCESS)
        }
        Reply::NotCancellable { job_id } => {
            println!("task #{job_id}: not cancellable");
            Ok(ExitCode::FAILURE)
        }
        other => {
            eprintln!("unexpected reply: {other:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn shutdown(client: &mut DaemonClient) -> sdstore::Result<ExitCode> {
    client.shutdown().await?;
    println!("shutdown requested");
    Ok(ExitCode::SUCCESS)
}
