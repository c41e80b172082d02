// SPDX-License-Identifier: MIT

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use beacond::config::{Config, Overrides};
use beacond::mail::ImapMailbox;
use beacond::publish::{AmqpPublisher, Publisher};
use beacond::store::HttpObjectStore;
use beacond::watch::{FsWatcher, MailWatcher, WatchError};

#[derive(Parser)]
#[command(
    name = "beacond",
    about = "beacond — change watcher & storage-event publisher",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a TOML config file
    #[arg(long, env = "BEACOND_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "debug", "info,beacond=trace")
    #[arg(long, env = "BEACOND_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "BEACOND_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Broker connection URL
    #[arg(long, env = "BEACOND_AMQP_URL")]
    amqp_url: Option<String>,

    /// Broker exchange name
    #[arg(long, env = "BEACOND_EXCHANGE")]
    exchange: Option<String>,

    /// Broker queue name (also used as the routing key)
    #[arg(long, env = "BEACOND_QUEUE")]
    queue: Option<String>,

    /// Destination bucket for published objects
    #[arg(long, env = "BEACOND_BUCKET")]
    bucket: Option<String>,

    /// Directory tree to watch for file changes
    #[arg(long, env = "BEACOND_DIR")]
    dir: Option<PathBuf>,

    /// Object-store API endpoint, e.g. http://localhost:8080
    #[arg(long, env = "BEACOND_API_ENDPOINT")]
    api_endpoint: Option<String>,

    /// IMAP server hostname
    #[arg(long, env = "BEACOND_IMAP_HOST")]
    imap_host: Option<String>,

    /// IMAP server port
    #[arg(long, env = "BEACOND_IMAP_PORT")]
    imap_port: Option<u16>,

    /// IMAP account username
    #[arg(long, env = "BEACOND_IMAP_USERNAME")]
    imap_username: Option<String>,

    /// IMAP account password
    #[arg(long, env = "BEACOND_IMAP_PASSWORD")]
    imap_password: Option<String>,

    /// Seconds between mailbox polls once the mailbox is empty
    #[arg(long, env = "BEACOND_POLL_INTERVAL")]
    poll_interval: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch a filesystem tree and publish change events.
    Fs,
    /// Poll a mailbox, store attachments, and publish change events.
    Mail,
    /// Run both event sources against one shared publisher (default
    /// when no subcommand is given).
    Start,
}

fn overrides_from(args: &Args) -> Overrides {
    Overrides {
        amqp_url: args.amqp_url.clone(),
        exchange: args.exchange.clone(),
        queue: args.queue.clone(),
        bucket: args.bucket.clone(),
        dir: args.dir.clone(),
        api_endpoint: args.api_endpoint.clone(),
        imap_host: args.imap_host.clone(),
        imap_port: args.imap_port,
        imap_username: args.imap_username.clone(),
        imap_password: args.imap_password.clone(),
        poll_interval: args.poll_interval,
        log: args.log.clone(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref(), overrides_from(&args));
    let _guard = setup_logging(&config.log, args.log_file.as_deref());

    let publisher = Arc::new(
        AmqpPublisher::init(&config.amqp_url, &config.exchange, &config.queue)
            .context("initialize broker publisher")?,
    );
    info!(version = env!("CARGO_PKG_VERSION"), "beacond starting");

    let result = match args.command.unwrap_or(Command::Start) {
        Command::Fs => run_fs(&config, Arc::clone(&publisher)).await,
        Command::Mail => run_mail(&config, Arc::clone(&publisher)).await,
        Command::Start => run_all(&config, Arc::clone(&publisher)).await,
    };

    if let Err(e) = publisher.close().await {
        warn!(err = %e, "publisher close");
    }
    result
}

async fn run_fs(config: &Config, publisher: Arc<AmqpPublisher>) -> Result<()> {
    let watcher = fs_watcher(config, publisher)?;
    tokio::select! {
        res = watcher.run() => res.context("filesystem watcher stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt — shutting down");
            Ok(())
        }
    }
}

async fn run_mail(config: &Config, publisher: Arc<AmqpPublisher>) -> Result<()> {
    let (watcher, session) = mail_watcher(config, publisher).await?;
    tokio::select! {
        res = watcher.run(session) => res.context("mailbox watcher stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt — shutting down");
            Ok(())
        }
    }
}

async fn run_all(config: &Config, publisher: Arc<AmqpPublisher>) -> Result<()> {
    let fs = fs_watcher(config, Arc::clone(&publisher))?;
    let (mail, session) = mail_watcher(config, publisher).await?;

    let mut fs_task = tokio::spawn(fs.run());
    let mut mail_task = tokio::spawn(mail.run(session));

    tokio::select! {
        res = &mut fs_task => flatten(res).context("filesystem watcher stopped"),
        res = &mut mail_task => flatten(res).context("mailbox watcher stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt — shutting down");
            fs_task.abort();
            mail_task.abort();
            Ok(())
        }
    }
}

fn fs_watcher(config: &Config, publisher: Arc<AmqpPublisher>) -> Result<FsWatcher<AmqpPublisher>> {
    let dir = config
        .dir
        .clone()
        .context("--dir is required for the filesystem watcher")?;
    let bucket = config.bucket.clone().context("--bucket is required")?;
    Ok(FsWatcher::new(dir, bucket, publisher))
}

async fn mail_watcher(
    config: &Config,
    publisher: Arc<AmqpPublisher>,
) -> Result<(MailWatcher<HttpObjectStore, AmqpPublisher>, ImapMailbox)> {
    let bucket = config.bucket.clone().context("--bucket is required")?;
    let endpoint = config
        .api_endpoint
        .clone()
        .context("--api-endpoint is required for the mailbox watcher")?;
    let endpoint = endpoint
        .parse()
        .with_context(|| format!("invalid object-store endpoint '{endpoint}'"))?;
    let host = config
        .imap_host
        .clone()
        .context("--imap-host is required for the mailbox watcher")?;
    let user = config
        .imap_username
        .clone()
        .context("--imap-username is required for the mailbox watcher")?;
    let password = config
        .imap_password
        .clone()
        .context("--imap-password is required for the mailbox watcher")?;

    // Session establishment is the one fatal mailbox path: TLS or auth
    // failures terminate the process instead of being retried.
    let session = ImapMailbox::connect(&host, config.imap_port, &user, &password).await?;

    let store = Arc::new(HttpObjectStore::new(endpoint));
    let watcher = MailWatcher::new(
        bucket,
        Duration::from_secs(config.poll_interval),
        store,
        publisher,
    );
    Ok((watcher, session))
}

fn flatten(
    res: std::result::Result<Result<(), WatchError>, tokio::task::JoinError>,
) -> Result<()> {
    match res {
        Ok(inner) => inner.map_err(anyhow::Error::from),
        Err(join) => Err(anyhow::Error::from(join).context("watcher task panicked")),
    }
}

fn setup_logging(
    filter: &str,
    log_file: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("beacond.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only; a bad log path must not panic.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            tracing_subscriber::fmt().with_env_filter(filter).compact().init();
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(EnvFilter::new(filter))
            .with(fmt::layer().compact())
            .with(fmt::layer().with_writer(non_blocking))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
        None
    }
}
