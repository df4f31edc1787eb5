use anyhow::Error;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    signal::unix::{signal, SignalKind},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, Instrument};

use fetchq::server::{self, PendingJobs, WorkResponseMessage};
use fetchq::fetch::Fetcher;
use fetchq::{browse, telemetry};
use fetchq::{Dispatcher, EngineConfig, JobContext, JobRequest, JobStore};

#[derive(Parser, Clone, Debug, PartialEq)]
#[command(author, version, about)]
pub struct ConfigContext {
    #[arg(
        short = 'r',
        long = "root",
        env = "FETCHQ_ROOT",
        help = "Directory jobs read from and write into",
        default_value = "./downloads"
    )]
    root: PathBuf,

    #[arg(
        long = "public-prefix",
        env = "FETCHQ_PUBLIC_PREFIX",
        help = "Route prefix under which the root is served",
        default_value = "/raw/"
    )]
    public_prefix: String,

    #[arg(
        long = "ffmpeg",
        env = "FETCHQ_FFMPEG",
        help = "ffmpeg executable",
        default_value = "ffmpeg"
    )]
    ffmpeg: PathBuf,

    #[arg(long = "unrar", env = "FETCHQ_UNRAR", help = "unrar executable", default_value = "unrar")]
    unrar: PathBuf,

    #[arg(
        long = "jaeger-endpoint",
        env = "FETCHQ_JAEGER_ENDPOINT",
        help = "Jaeger collector URL, e.g. http://jaeger:14268/api/traces"
    )]
    jaeger_endpoint: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
enum Command {
    /// Read JSON job requests from stdin, one per line, and report results on stdout
    Serve,
    /// List a directory under the root
    Ls {
        #[arg(default_value = "")]
        dir: String,
    },
    /// Delete a file or directory under the root
    Rm { path: String },
}

impl ConfigContext {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            root: self.root.clone(),
            public_prefix: self.public_prefix.clone(),
            ffmpeg: self.ffmpeg.clone(),
            unrar: self.unrar.clone(),
        }
    }
}

#[instrument(skip(config, cancel_token))]
async fn serve(config: ConfigContext, cancel_token: CancellationToken) -> Result<(), Error> {
    let store = JobStore::new();
    let ctx = JobContext::new(config.engine_config(), Fetcher::default())?;
    info!(root = %ctx.root().display(), "Serving jobs");

    // Channel for sending requests to be processed
    let (send_to_server, recv_from_client) = mpsc::unbounded_channel();

    // Channel for getting responses and job results from server
    let (send_to_client, mut recv_from_server) = mpsc::unbounded_channel();

    let dispatcher = Dispatcher::new(store.clone(), ctx).with_notifications(send_to_client.clone());

    let server_spawn = {
        let cancel_token = cancel_token.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(
            async move {
                let served =
                    server::serve(cancel_token, dispatcher, recv_from_client, send_to_client);
                if let Err(err) = served.await {
                    error!("Error running server: {}", err);
                }
            }
            .instrument(info_span!("server")),
        )
    };

    // Reports how many requests were forwarded once stdin is exhausted
    let (send_input_done, mut recv_input_done) = oneshot::channel::<usize>();

    tokio::spawn(
        async move {
            let mut forwarded = 0usize;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        error!(message = "Failed to read stdin", error = ?err);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JobRequest>(&line) {
                    Ok(request) => {
                        if send_to_server.send(request).is_err() {
                            break;
                        }
                        forwarded += 1;
                    }
                    Err(err) => println!("{}", serde_json::json!({ "error": err.to_string() })),
                }
            }
            let _ = send_input_done.send(forwarded);
        }
        .instrument(info_span!("stdin")),
    );

    let mut forwarded: Option<usize> = None;
    let mut pending = PendingJobs::default();

    loop {
        if forwarded.is_some_and(|n| pending.is_settled(n)) {
            debug!("Input exhausted and all jobs finished");
            break;
        }

        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Serve Cancelled");
                break;
            },
            done = &mut recv_input_done, if forwarded.is_none() => {
                forwarded = Some(done.unwrap_or(pending.answered()));
            },
            server_response = recv_from_server.recv() => {
                let Some(msg) = server_response else {
                    debug!("Server connection closed unexpectedly, exiting");
                    break;
                };
                pending.observe(&msg);
                match msg {
                    WorkResponseMessage::JobAccepted(job_id) => {
                        println!("{}", serde_json::json!({ "job_id": job_id }));
                    },
                    WorkResponseMessage::RequestRejected(err) => {
                        println!("{}", serde_json::json!({ "error": err }));
                    },
                    WorkResponseMessage::JobCompleted(job_id)
                    | WorkResponseMessage::JobFailed(job_id, _) => {
                        if let Some(job) = store.get(job_id).await {
                            println!("{}", serde_json::to_string(&job)?);
                        }
                    },
                }
            }
        }
    }

    cancel_token.cancel();
    server_spawn.await?;

    Ok(())
}

async fn run(config: ConfigContext, cancel_token: CancellationToken) -> Result<(), Error> {
    match config.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(config, cancel_token).await,
        Command::Ls { dir } => {
            let listing = browse::list_dir(&config.root, &dir).await?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
        Command::Rm { path } => {
            browse::remove(&config.root, &path).await?;
            println!("{}", serde_json::json!({ "status": "deleted" }));
            Ok(())
        }
    }
}

async fn wait_for_signal(token: CancellationToken) -> Result<(), Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => {info!("Received SIGTERM"); token.cancel()},
        _ = sigint.recv() => {info!("Received SIGINT"); token.cancel()},
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigContext::parse();

    telemetry::init(config.jaeger_endpoint.as_deref())?;

    let token = CancellationToken::new();

    let cloned_token = token.clone();
    let app = tokio::spawn(run(config, cloned_token));

    tokio::spawn(async move {
        if let Err(err) = wait_for_signal(token).await {
            error!("Failed to install signal handlers: {}", err);
        }
    });
    let result = app.await?;
    telemetry::shutdown();

    result.map_err(Into::into)
}
