// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of solofed.
//
// solofed is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// solofed is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with solofed.  If not,
// see <http://www.gnu.org/licenses/>.

//! # solofedd
//!
//! Follow relationships for a single-user [ActivityPub] server.
//!
//! [ActivityPub]: https://www.w3.org/TR/activitypub/#server-to-server-interactions
//!
//! solofedd serves two listeners. The public one carries the local user's inbox and followers &
//! following collections. The private one carries the operator's follow & unfollow actions, along
//! with `/healthcheck` & `/metrics`; it should not be reachable from the internet.
//!
//! solofedd always runs in the foreground. `SIGHUP` re-reads the configuration file and restarts
//! both listeners (re-opening the log file, if there is one); `SIGTERM` shuts down.

use std::{
    env,
    fmt::Display,
    fs::OpenOptions,
    future::IntoFuture,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use chrono::Utc;
use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use opentelemetry::{global, KeyValue};
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::{mpsc, Notify},
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    Layer, Registry,
};

use solofed::{
    actor::make_router as make_actor_router,
    admin::make_router as make_admin_router,
    delivery::{Configuration as DeliveryConfiguration, Queue},
    dynamodb::{Credentials as DynamoCredentials, Location as DynamoLocation},
    entities::{LocalUser, Username},
    follows::FollowManager,
    metrics::{check_metric_registrations, Instruments},
    origin::Origin,
    solofed::Solofed,
    storage::Backend as StorageBackend,
};

/// The solofedd application error type
///
/// Debug is implemented by hand (in terms of Display) since `main()` returns this type, and the
/// Rust runtime prints the `Debug` representation of any error so returned.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Failed to create an HTTP client: {source}"))]
    Client { source: reqwest::Error },
    #[snafu(display("Unable to read configuration file {pth:?}: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file {pth:?}: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Couldn't resolve the present working directory: {source}"))]
    CurrentDir { source: std::io::Error },
    #[snafu(display("The metric {name} was registered more than once"))]
    DuplicateMetric { name: &'static str },
    #[snafu(display("Failed to start delivery: {source}"))]
    Delivery { source: solofed::delivery::Error },
    #[snafu(display("Failed to connect to DynamoDB: {source}"))]
    Dynamo { source: solofed::dynamodb::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to form the local user: {source}"))]
    LocalUser { source: solofed::entities::Error },
    #[snafu(display("Failed to open the solofed log file: {source}"))]
    LogFile { source: std::io::Error },
    #[snafu(display("Failed to HUP the logfile: {source}"))]
    LogHup {
        source: tokio::sync::mpsc::error::SendError<PathBuf>,
    },
    #[snafu(display("Failed to set up the local user: {source}"))]
    Setup { source: solofed::storage::Error },
    #[snafu(display("Failed to install a signal handler: {source}"))]
    Signal { source: std::io::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to create the DynamoDB tables: {source}"))]
    Tables { source: solofed::dynamodb::Error },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub to_file: bool,
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            to_file: matches.get_flag("log-to-file"),
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> Result<CliOpts> {
        let here = env::current_dir().context(CurrentDirSnafu)?;
        Ok(CliOpts {
            log_opts: LogOpts::new(&matches),
            cfg: matches
                .get_one::<PathBuf>("config")
                .cloned()
                .map(|p| here.join(p)),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// solofed datastore configuration
// Nb that we can only deserialize (i.e. not serialize) due to the presence of secrets in the
// struct
#[derive(Clone, Debug, Default, Deserialize)]
pub enum StorageConfig {
    /// Keep everything in memory; it's all lost on exit
    #[default]
    Memory,
    /// Use DynamoDB, or anything speaking its API
    Dynamo {
        /// AWS credentials: key ID & secret key
        credentials: Option<DynamoCredentials>,
        /// Either an AWS region, or one or more endpoint URLs
        location: DynamoLocation,
        /// Create any missing tables at startup
        #[serde(rename = "create-tables", default)]
        create_tables: bool,
    },
}

/// The local user, as configured
#[derive(Clone, Debug, Deserialize)]
pub struct LocalUserConfig {
    username: Username,
    #[serde(rename = "display-name")]
    display_name: String,
}

impl Default for LocalUserConfig {
    fn default() -> Self {
        LocalUserConfig {
            username: Username::new("admin").unwrap(/* known good */),
            display_name: "solofed admin".to_owned(),
        }
    }
}

/// solofed configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct ConfigV1 {
    /// The solofed log file; only used when logging to file
    #[serde(rename = "log-file")]
    log_file: PathBuf,
    /// Local address at which to listen for public requests; specify as "address:port"
    #[serde(rename = "public-address")]
    public_address: SocketAddr,
    /// Address at which to listen for private requests; specify as "address:port"
    #[serde(rename = "private-address")]
    private_address: SocketAddr,
    /// The address at which this solofed instance may be reached from the public internet
    #[serde(rename = "public-origin")]
    public_origin: Origin,
    #[serde(rename = "user-agent")]
    user_agent: String,
    #[serde(rename = "local-user")]
    local_user: LocalUserConfig,
    #[serde(rename = "storage-config")]
    storage_config: StorageConfig,
    delivery: DeliveryConfiguration,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            log_file: PathBuf::from_str("/tmp/solofed.log").unwrap(/* known good */),
            public_address: "0.0.0.0:20779".parse::<SocketAddr>().unwrap(/* known good */),
            private_address: "127.0.0.1:20780".parse::<SocketAddr>().unwrap(/* known good */),
            public_origin: "http://localhost:20779".parse::<Origin>().unwrap(/* known good */),
            user_agent: format!("solofed/{}; +sp1ff@pobox.com", crate_version!()),
            local_user: LocalUserConfig::default(),
            storage_config: StorageConfig::default(),
            delivery: DeliveryConfiguration::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the solofed configuration file
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from("/etc/solofed.toml"), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(Configuration::V1(cfg)) => Ok(cfg),
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            logging                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A tracing-compatible, "reopenable" log file
///
/// The file is handed to the formatting [Layer] in toto; to have it close & re-open itself (after
/// `logrotate` has renamed it, say) send the path on the channel returned from [LogFile::open].
struct LogFile {
    fd: Arc<Mutex<std::fs::File>>,
}

impl LogFile {
    /// Open a file at `pth`; return a [LogFile] instance along with the send side of a channel
    /// the caller can use to close & re-open the file.
    pub fn open(pth: &Path) -> StdResult<(LogFile, mpsc::Sender<PathBuf>), std::io::Error> {
        let (tx, rx) = mpsc::channel::<PathBuf>(1);
        let fd = OpenOptions::new()
            .create(true)
            .append(true)
            .open(pth)
            .map(|fd| Arc::new(Mutex::new(fd)))?;
        tokio::spawn(LogFile::rehup(fd.clone(), rx));
        Ok((LogFile { fd }, tx))
    }
    /// Close & re-open the file
    async fn rehup(fd: Arc<Mutex<std::fs::File>>, mut rx: mpsc::Receiver<PathBuf>) {
        while let Some(ref pbuf) = rx.recv().await {
            match OpenOptions::new().create(true).append(true).open(pbuf) {
                Ok(f) => *fd.lock().unwrap_or_else(PoisonError::into_inner) = f,
                Err(err) => error!("Failed to open {:?} ({}).", pbuf, err),
            }
        }
    }
}

pub struct LogFileWriter<'a>(MutexGuard<'a, std::fs::File>);

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileWriter<'a>;
    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter(self.fd.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl io::Write for LogFileWriter<'_> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }

    #[inline]
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }
}

/// Configure solofed logging
///
/// Log JSON (or, with `--plain`, compact text) to stdout, or to the configured log file with
/// `--log-to-file`. In the latter case, also return the sender side of a channel that can be used
/// to have the file close & re-open itself.
///
/// This can only be invoked once (it's result is handed to tracing's
/// [set_global_default](tracing::subscriber::set_global_default)).
#[allow(clippy::type_complexity)]
fn configure_logging(
    logopts: &LogOpts,
    logfile: &Path,
) -> Result<(
    Box<dyn Layer<Registry> + Send + Sync>,
    EnvFilter,
    Option<mpsc::Sender<PathBuf>>,
)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    // `json()` & `with_writer()` produce builders of different types, hence the boxing:
    let mut tx = None;
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.to_file {
        let (log_file, tx_inner) = LogFile::open(logfile).context(LogFileSnafu)?;
        tx = Some(tx_inner);
        if logopts.plain {
            Box::new(
                fmt::Layer::default()
                    .compact()
                    .with_ansi(false)
                    .with_writer(log_file),
            )
        } else {
            Box::new(
                fmt::Layer::default()
                    .json()
                    .with_current_span(true)
                    .with_writer(log_file),
            )
        }
    } else if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout),
        )
    };

    Ok((formatter, filter, tx))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Solofed>>) -> axum::response::Response {
    let mut output = Vec::new();
    match state.exporter.export(&mut output) {
        Ok(_) => String::from_utf8_lossy(&output).into_owned().into_response(),
        Err(err) => {
            error!("Failed to encode Prometheus metrics: {:?}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Make the [Router] that will be accessible to the world
fn make_world_router(state: Arc<Solofed>) -> Router {
    Router::new()
        .merge(make_actor_router(state.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .with_state(state)
}

/// Make the [Router] that will only be locally accessible
fn make_local_router(state: Arc<Solofed>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .merge(make_admin_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn select_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend + Send + Sync>> {
    match config {
        StorageConfig::Memory => {
            warn!("Using in-memory storage; the follow graph will be lost on exit.");
            Ok(Arc::new(solofed::memory::Store::new()))
        }
        StorageConfig::Dynamo {
            credentials,
            location,
            create_tables,
        } => {
            let client = solofed::dynamodb::Client::new(location, credentials)
                .await
                .context(DynamoSnafu)?;
            if *create_tables {
                client.create_tables().await.context(TablesSnafu)?;
            }
            Ok(Arc::new(client))
        }
    }
}

/// Resolve the local user: set it up if this is our first run, else read it back
async fn resolve_local_user(
    cfg: &ConfigV1,
    storage: &(dyn StorageBackend + Send + Sync),
) -> Result<LocalUser> {
    let candidate = LocalUser::new(
        cfg.local_user.username.clone(),
        &cfg.local_user.display_name,
        cfg.public_origin.clone(),
        Utc::now(),
    )
    .context(LocalUserSnafu)?;
    let user = storage
        .setup_local_user(&candidate)
        .await
        .context(SetupSnafu)?;
    if user.username() != candidate.username() || user.origin() != candidate.origin() {
        warn!(
            "The local user is {} at {}; ignoring the configured {} at {}",
            user.username(),
            user.origin(),
            candidate.username(),
            candidate.origin()
        );
    }
    Ok(user)
}

/// Serve solofed requests
async fn serve(
    opts: CliOpts,
    mut cfg: ConfigV1,
    log_file_hup: Option<mpsc::Sender<PathBuf>>,
    exporter: PrometheusExporter,
) -> Result<()> {
    // Produce a future which can be used to signal graceful shutdown, below.
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sighup = signal(SignalKind::hangup()).context(SignalSnafu)?;
    let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;

    let instruments = Arc::new(Instruments::new("solofed"));

    // The datastore (& hence the local user) is chosen once; changing `storage-config` requires a
    // restart.
    let storage = select_storage(&cfg.storage_config).await?;
    let user = resolve_local_user(&cfg, storage.as_ref()).await?;
    info!("Serving follows for {}", user.actor_id());

    // Loop forever, handling SIGHUPs, until asked to terminate:
    loop {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context(ClientSnafu)?;

        let (queue, worker) =
            Queue::new(&cfg.delivery, client, instruments.clone()).context(DeliverySnafu)?;

        let state = Arc::new(Solofed {
            user: user.clone(),
            follows: FollowManager::new(storage.clone()),
            sender: Arc::new(queue),
            exporter: exporter.clone(),
            instruments: instruments.clone(),
        });

        let world_nfy = Arc::new(Notify::new());
        let local_nfy = Arc::new(Notify::new());

        let world_server = axum::serve(
            TcpListener::bind(cfg.public_address)
                .await
                .context(BindSnafu {
                    addr: cfg.public_address,
                })?,
            make_world_router(state.clone()),
        )
        .with_graceful_shutdown(shutdown_signal(world_nfy.clone()));

        let local_server = axum::serve(
            TcpListener::bind(cfg.private_address)
                .await
                .context(BindSnafu {
                    addr: cfg.private_address,
                })?,
            make_local_router(state.clone()),
        )
        .with_graceful_shutdown(shutdown_signal(local_nfy.clone()));

        // The handlers hold clones of `state`; this one's no longer needed.
        drop(state);

        let mut world_server = world_server.into_future();
        let mut local_server = local_server.into_future();

        fn log_on_err<T, E>(x: StdResult<T, E>)
        where
            E: std::error::Error + std::fmt::Debug,
        {
            if let Err(err) = x {
                error!("{:?}", err);
            }
        }

        let done = tokio::select! {
            // The servers should never shutdown on their own; if one does, take the other down
            // with it & exit.
            res = &mut world_server => {
                error!("The public server exited unexpectedly ({:?}); shutting-down.", res);
                local_nfy.notify_one();
                log_on_err(local_server.await);
                true
            }
            res = &mut local_server => {
                error!("The private server exited unexpectedly ({:?}); shutting-down.", res);
                world_nfy.notify_one();
                log_on_err(world_server.await);
                true
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP; re-reading configuration.");
                world_nfy.notify_one();
                local_nfy.notify_one();
                log_on_err(world_server.await);
                log_on_err(local_server.await);
                // Fall back to the last known-good configuration if the new one won't parse
                cfg = match parse_config(&opts.cfg) {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        error!("{:?}; keeping the prior configuration.", err);
                        cfg
                    }
                };
                if let Some(ref lfh) = log_file_hup {
                    lfh.send(cfg.log_file.clone()).await.context(LogHupSnafu)?;
                    info!("Started new log file.");
                }
                false
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM; terminating.");
                world_nfy.notify_one();
                local_nfy.notify_one();
                log_on_err(world_server.await);
                log_on_err(local_server.await);
                true
            }
        }; // End tokio::select!.

        // Both servers are down, so every handle on the delivery queue is gone; the worker will
        // finish (or abandon) whatever is in flight & exit.
        log_on_err(worker.await);
        if done {
            break;
        }
    } // End loop.

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Initialize telemetry
///
/// This must be invoked from inside the Tokio runtime, but before any instruments are built. Return
/// an exporter that can be used to implement a `/metrics` endpoint.
fn init_telemetry() -> Result<PrometheusExporter> {
    if let Some(name) = check_metric_registrations() {
        return DuplicateMetricSnafu { name }.fail();
    }
    let exporter = PrometheusExporter::new();
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_resource(
            opentelemetry_sdk::Resource::builder_empty()
                .with_attribute(KeyValue::new("service.name", "solofed"))
                .build(),
        )
        .with_reader(exporter.clone())
        .build();
    global::set_meter_provider(provider);
    Ok(exporter)
}

/// Configure logging & telemetry, then serve
///
/// Logging is configured *before* calling `serve()` so that everything it does is captured.
/// Failure to parse the configuration at this point is fatal; on `SIGHUP`, `serve()` falls back to
/// the last known-good configuration instead.
async fn go_async(
    opts: CliOpts,
    bootstrap_logging_guard: tracing::dispatcher::DefaultGuard,
) -> Result<()> {
    #[allow(clippy::type_complexity)]
    fn go_async1(
        opts: &CliOpts,
    ) -> Result<(
        ConfigV1,
        Box<dyn Layer<Registry> + Send + Sync>,
        EnvFilter,
        Option<mpsc::Sender<PathBuf>>,
    )> {
        let cfg = parse_config(&opts.cfg)?;
        let (formatter, filter, log_file_hup) = configure_logging(&opts.log_opts, &cfg.log_file)?;
        Ok((cfg, formatter, filter, log_file_hup))
    }

    match go_async1(&opts) {
        Ok((cfg, formatter, filter, log_file_hup)) => {
            // Nb. this can only be invoked once
            tracing::subscriber::set_global_default(
                Registry::default().with(formatter).with(filter),
            )
            .context(SubscriberSnafu)?;
            drop(bootstrap_logging_guard);

            info!("solofed version {} starting.", crate_version!());

            let exporter = init_telemetry()?;
            serve(opts, cfg, log_file_hup, exporter).await
        }
        Err(err) => {
            error!("While configuring logging: {err:?}");
            Err(err)
        }
    }
}

fn main() -> Result<()> {
    // Most of solofedd's configuration is read from file; the few command-line options govern
    // where to find that file & how to log. They all have corresponding environment variables for
    // the sake of running in a container.
    let opts = CliOpts::new(
        Command::new("solofedd")
            .version(crate_version!())
            .author(crate_authors!())
            .about("Follow relationships for a single-user ActivityPub server")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("SOLOFED_CONFIG")
                    .help(
                        "path (absolute or relative to the process' current directory) to a \
                       configuration file",
                    ),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("SOLOFED_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("log-to-file")
                    .short('l')
                    .long("log-to-file")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("SOLOFED_LOG_TO_FILE")
                    .help("log to the configured log file rather than stdout"),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("SOLOFED_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("SOLOFED_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("SOLOFED_VERBOSE")
                    .help("produce prolix output"),
            )
            .get_matches(),
    )?;

    // Things can go wrong before we've parsed our configuration & configured logging; log those to
    // stderr through a temporary subscriber.
    let bootstrap_subscriber = Registry::default()
        .with(fmt::Layer::default().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(opts.log_opts.level.into())
                .from_env()
                .context(EnvFilterSnafu)?,
        );
    let bootstrap_logging_guard = tracing::subscriber::set_default(bootstrap_subscriber);
    debug!("Temporarily logging to stderr while initializing.");

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(opts, bootstrap_logging_guard))
}
