//! geodb CLI - query and subscribe to a geodb server from the shell.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use geodb::api::{
    Bound, DeleteRequest, GetKeysRequest, GetPointRequest, GetPrefixKeysRequest, GetPrefixRequest,
    GetRegexKeysRequest, GetRegexRequest, GetRequest, Object, ObjectTracker, ObjectTracking, Point,
    ScanBoundRequest, ScanPrefixBoundRequest, ScanRegexBoundRequest, SetRequest,
    StreamPrefixRequest, StreamPrefixResponse, StreamRegexRequest, StreamRegexResponse,
    StreamRequest, StreamResponse, TravelMode,
};
use geodb::{CancellationToken, Client, ClientConfig, LogLevel};
use serde::Serialize;
use tracing::{error, info};

/// geodb CLI - query and subscribe to a geodb server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// geodb server address (e.g. localhost:8080)
    #[arg(long, env = "GEODB_HOST")]
    host: Option<String>,

    /// Server password, only needed when basic auth is enabled server side
    #[arg(long, env = "GEODB_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Retry calls that fail with transient errors
    #[arg(long)]
    retry: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write JSON logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check server health
    Ping,

    /// Upsert an object
    #[command(allow_negative_numbers = true)]
    Set {
        /// Unique object key (prefix keys to make them easy to query)
        key: String,
        lat: f64,
        lon: f64,

        /// Object radius in meters, used to detect intersections
        #[arg(long, default_value_t = 100)]
        radius: i64,

        /// Metadata entries as key=value
        #[arg(long = "meta", value_parser = parse_key_val)]
        metadata: Vec<(String, String)>,

        /// Unix expiration timestamp, 0 never expires
        #[arg(long, default_value_t = 0)]
        expires_unix: i64,

        /// Resolve a human readable address for the object
        #[arg(long)]
        address: bool,

        /// Resolve the timezone of the object
        #[arg(long)]
        timezone: bool,

        /// Track distance and ETA to these object keys
        #[arg(long = "track")]
        track: Vec<String>,

        /// Also request directions for tracked objects
        #[arg(long)]
        directions: bool,

        #[arg(long, value_enum, default_value = "driving")]
        travel_mode: Mode,
    },

    /// Get objects by keys (all when none given), prefix or regex
    Get {
        keys: Vec<String>,

        #[command(flatten)]
        filter: KeyFilter,
    },

    /// List keys, optionally filtered by prefix or regex
    Keys {
        #[command(flatten)]
        filter: KeyFilter,
    },

    /// Delete objects by key; `*` deletes everything
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Find objects inside a circular boundary
    #[command(allow_negative_numbers = true)]
    Scan {
        lat: f64,
        lon: f64,

        /// Boundary radius in meters
        radius: i64,

        /// Restrict the scan to these keys
        #[arg(long = "key")]
        keys: Vec<String>,

        #[command(flatten)]
        filter: KeyFilter,
    },

    /// Stream realtime object updates until Ctrl-C
    Stream {
        /// Object keys to follow (all when none given)
        keys: Vec<String>,

        /// Client id reported to the server
        #[arg(long, default_value = "")]
        client_id: String,

        #[command(flatten)]
        filter: KeyFilter,
    },

    /// Look up the coordinates of an address
    Point { address: String },
}

#[derive(Args, Debug, Default)]
#[group(multiple = false)]
struct KeyFilter {
    /// Select keys with this prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Select keys matching this regex
    #[arg(long)]
    regex: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Mode {
    Driving,
    Walking,
    Bicycling,
    Transit,
}

impl From<Mode> for TravelMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Driving => TravelMode::Driving,
            Mode::Walking => TravelMode::Walking,
            Mode::Bicycling => TravelMode::Bicycling,
            Mode::Transit => TravelMode::Transit,
        }
    }
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no `=` found in `{}`", s))?;
    Ok((key.to_string(), value.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ClientConfig::default(),
    };

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    if cli.retry {
        config.retry = true;
    }
    if cli.debug {
        config.log_level = LogLevel::Debug;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    geodb::logging::init_logging(config.log_level.to_tracing_level(), cli.log_file.as_deref())
        .context("Failed to initialize logging")?;

    let client = Client::connect(&config)
        .await
        .with_context(|| format!("Failed to create client for {}", config.host))?;

    run(&client, cli.command).await
}

async fn run(client: &Client, command: Command) -> Result<()> {
    match command {
        Command::Ping => print_json(&client.ping().await?),

        Command::Set {
            key,
            lat,
            lon,
            radius,
            metadata,
            expires_unix,
            address,
            timezone,
            track,
            directions,
            travel_mode,
        } => {
            let tracking = (!track.is_empty()).then(|| ObjectTracking {
                travel_mode: TravelMode::from(travel_mode) as i32,
                trackers: track
                    .into_iter()
                    .map(|target| ObjectTracker {
                        target_object_key: target,
                        track_distance: true,
                        track_eta: true,
                        track_directions: directions,
                    })
                    .collect(),
            });

            let object = Object {
                key,
                point: Some(Point::new(lat, lon)),
                radius,
                tracking,
                metadata: metadata.into_iter().collect::<HashMap<_, _>>(),
                get_address: address,
                get_timezone: timezone,
                expires_unix,
                updated_unix: 0,
            };

            print_json(&client.set(SetRequest { object: Some(object) }).await?)
        }

        Command::Get { keys, filter } => match filter {
            KeyFilter {
                prefix: Some(prefix),
                ..
            } => print_json(&client.get_prefix(GetPrefixRequest { prefix }).await?),
            KeyFilter {
                regex: Some(regex), ..
            } => print_json(&client.get_regex(GetRegexRequest { regex }).await?),
            _ => print_json(&client.get(GetRequest { keys }).await?),
        },

        Command::Keys { filter } => match filter {
            KeyFilter {
                prefix: Some(prefix),
                ..
            } => print_json(&client.get_prefix_keys(GetPrefixKeysRequest { prefix }).await?),
            KeyFilter {
                regex: Some(regex), ..
            } => print_json(&client.get_regex_keys(GetRegexKeysRequest { regex }).await?),
            _ => print_json(&client.get_keys(GetKeysRequest {}).await?),
        },

        Command::Delete { keys } => print_json(&client.delete(DeleteRequest { keys }).await?),

        Command::Scan {
            lat,
            lon,
            radius,
            keys,
            filter,
        } => {
            let bound = Some(Bound::new(Point::new(lat, lon), radius));
            match filter {
                KeyFilter {
                    prefix: Some(prefix),
                    ..
                } => print_json(
                    &client
                        .scan_prefix_bound(ScanPrefixBoundRequest { bound, prefix })
                        .await?,
                ),
                KeyFilter {
                    regex: Some(regex), ..
                } => print_json(
                    &client
                        .scan_regex_bound(ScanRegexBoundRequest { bound, regex })
                        .await?,
                ),
                _ => print_json(&client.scan_bound(ScanBoundRequest { bound, keys }).await?),
            }
        }

        Command::Stream {
            keys,
            client_id,
            filter,
        } => stream(client, keys, client_id, filter).await,

        Command::Point { address } => {
            print_json(&client.get_point(GetPointRequest { address }).await?)
        }
    }
}

async fn stream(
    client: &Client,
    keys: Vec<String>,
    client_id: String,
    filter: KeyFilter,
) -> Result<()> {
    let cancel = CancellationToken::new();

    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, closing subscription");
            on_ctrl_c.cancel();
        }
    });

    fn printer<T: Serialize>(event: geodb::Result<T>) -> ControlFlow<()> {
        match event {
            Ok(message) => {
                if let Err(e) = print_json(&message) {
                    error!("Failed to print update: {}", e);
                    return ControlFlow::Break(());
                }
            }
            Err(e) => error!("Stream error: {}", e),
        }
        ControlFlow::Continue(())
    }

    match filter {
        KeyFilter {
            prefix: Some(prefix),
            ..
        } => {
            let request = StreamPrefixRequest { client_id, prefix };
            client
                .stream_prefix(request, &cancel, printer::<StreamPrefixResponse>)
                .await?
        }
        KeyFilter {
            regex: Some(regex), ..
        } => {
            let request = StreamRegexRequest { client_id, regex };
            client
                .stream_regex(request, &cancel, printer::<StreamRegexResponse>)
                .await?
        }
        _ => {
            let request = StreamRequest { client_id, keys };
            client
                .stream(request, &cancel, printer::<StreamResponse>)
                .await?
        }
    }

    Ok(())
}
