//! CLI interface for the mapper.
//!
//! Each remote command enqueues its job on a fresh [`Mapper`] and ticks it
//! at frame rate until the queue drains. Results print as JSON on stdout;
//! a one-line summary goes to stderr.

mod format;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use nalgebra::{Matrix4, Vector3};
use serde::Serialize;

use crate::backend::HttpBackend;
use crate::config::Config;
use crate::dispatch::{Dispatch, Inline, Threaded};
use crate::engine::NoneEngine;
use crate::geodesy::{self, MapToEcef};
use crate::job::Services;
use crate::location::{self, FixedLocation, GeoFix, LocationProvider, MAX_WAIT_POLLS};
use crate::mapper::{Mapper, Settings};
use crate::model::{DetailLevel, MapId};
use crate::queue::{JobReport, Outcome};
use crate::storage::Storage;
use crate::token::{TOKEN_REQUIRED, resolve_token};

use format::{format_job, format_location, format_report};

/// One host frame.
const FRAME: Duration = Duration::from_millis(16);

/// Mapper: build, load, and manage maps on a remote mapping service.
#[derive(Debug, Parser)]
#[command(name = "mapper", version, after_long_help = USAGE_HELP)]
pub struct Cli {
    /// Mapping service URL. Overrides `server` in the config file.
    #[arg(long, global = true)]
    server: Option<String>,

    /// Developer token. Falls back to `MAPPER_TOKEN`, then `mapper login`.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Run jobs on the calling thread instead of worker threads.
    #[arg(long, global = true)]
    inline: bool,

    /// Image bank to work in.
    #[arg(long, global = true, default_value_t = 0)]
    bank: u32,

    #[command(subcommand)]
    pub command: Command,
}

const USAGE_HELP: &str = r"Workflow: building a map
  1. mapper login <token>
  2. mapper clear                  # start from an empty workspace
     ... capture images ...
  3. mapper status                 # how many images are in the workspace
  4. mapper construct lobby --detail high
  5. mapper jobs                   # wait for the map to reach 'done'
  6. mapper load 1234

Placing a point on Earth:
  mapper locate --map-to-ecef tx,ty,tz,r00,r01,r02,r10,r11,r12,r20,r21,r22,s --point 0,0,0";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List maps. Filtered by location when coordinates are given or
    /// tracking is enabled.
    Jobs {
        /// Latitude to search around.
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude to search around.
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Search radius in meters. Defaults to `job-list-radius`.
        #[arg(long)]
        radius: Option<f64>,
    },

    /// Start constructing a map from the images in the current bank.
    Construct {
        /// Name for the new map.
        name: String,

        #[arg(long, value_enum, default_value_t = DetailArg::Standard)]
        detail: DetailArg,
    },

    /// Download a map and load it into the engine.
    Load { id: u32 },

    /// Delete a map from the service.
    Delete { id: u32 },

    /// Put a map's source images back into the workspace.
    Restore { id: u32 },

    /// Drop captured images from the current bank.
    Clear {
        /// Also delete the anchor image.
        #[arg(long)]
        anchor: bool,
    },

    /// Report how many images the workspace holds.
    Status,

    /// Store a developer token for later commands.
    Login { token: String },

    /// Forget the stored developer token.
    Logout,

    /// Turn location tracking on or off for future sessions.
    Gps {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Transform a map-space point to ECEF and WGS84.
    Locate {
        /// Map-to-ECEF transform: translation (3), row-major rotation (9),
        /// scale (1), comma separated.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        map_to_ecef: Vec<f64>,

        /// Map-space point `x,y,z`.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        point: Vec<f64>,

        /// Map-space view direction `x,y,z`, for a compass bearing.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        forward: Vec<f64>,
    },
}

/// CLI-facing detail level, mapped to the domain `DetailLevel`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DetailArg {
    /// 600 features per image.
    Standard,
    /// 1024 features per image.
    High,
}

impl DetailArg {
    fn to_domain(self) -> DetailLevel {
        match self {
            Self::Standard => DetailLevel::Standard,
            Self::High => DetailLevel::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

/// Run the CLI, returning an error message on failure.
pub fn run(config: &Config, storage: &Storage) -> Result<(), String> {
    let cli = Cli::parse();

    match cli.command {
        Command::Jobs { lat, lon, radius } => {
            let near = lat.zip(lon);
            cmd_jobs(&cli, config, storage, near, radius)
        }
        Command::Construct { ref name, detail } => {
            let mut mapper = open_mapper(&cli, config, storage, None, false)?;
            mapper.construct(name, detail.to_domain());
            finish(&mut mapper, config)?;
            print_json(&mapper.state().last_constructed)
        }
        Command::Load { id } => {
            let id = MapId(id);
            let mut mapper = open_mapper(&cli, config, storage, None, false)?;
            mapper.load_map(id);
            finish(&mut mapper, config)?;
            print_json(&mapper.state().registry.get(id))
        }
        Command::Delete { id } => {
            let mut mapper = open_mapper(&cli, config, storage, None, false)?;
            mapper.delete_map(MapId(id));
            let reports = finish(&mut mapper, config)?;
            print_json(&reports)
        }
        Command::Restore { id } => {
            let mut mapper = open_mapper(&cli, config, storage, None, false)?;
            mapper.restore_map_images(MapId(id));
            let reports = finish(&mut mapper, config)?;
            print_json(&reports)
        }
        Command::Clear { anchor } => {
            let mut mapper = open_mapper(&cli, config, storage, None, false)?;
            mapper.reset_workspace(anchor);
            let reports = finish(&mut mapper, config)?;
            print_json(&reports)
        }
        Command::Status => cmd_status(&cli, config, storage),
        Command::Login { ref token } => {
            storage
                .set_token(token)
                .map_err(|e| format!("failed to store token: {e}"))?;
            eprintln!("Token stored");
            Ok(())
        }
        Command::Logout => {
            storage
                .clear_token()
                .map_err(|e| format!("failed to clear token: {e}"))?;
            eprintln!("Token removed");
            Ok(())
        }
        Command::Gps { state } => cmd_gps(config, storage, state),
        Command::Locate {
            ref map_to_ecef,
            ref point,
            ref forward,
        } => cmd_locate(map_to_ecef, point, forward),
    }
}

/// Build a mapper for one command. Only `status` reads the status poller.
fn open_mapper(
    cli: &Cli,
    config: &Config,
    storage: &Storage,
    location: Option<Box<dyn LocationProvider>>,
    poll_status: bool,
) -> Result<Mapper, String> {
    let server = cli.server.as_deref().unwrap_or(&config.server);
    let token = resolve_token(cli.token.as_deref(), storage).unwrap_or_else(|| {
        log::error!("{TOKEN_REQUIRED}");
        String::new()
    });

    let backend = HttpBackend::new(server, &token, config.request_timeout())
        .map_err(|e| format!("failed to create HTTP client: {e}"))?;
    let services = Services {
        backend: Arc::new(backend),
        engine: Arc::new(NoneEngine::new()),
        checksum: config.checksum,
    };
    let dispatch: Arc<dyn Dispatch> = if cli.inline {
        Arc::new(Inline)
    } else {
        Arc::new(Threaded)
    };
    let location = location.unwrap_or_else(|| location::select(config.location.as_ref()));

    let settings = Settings {
        poll_status,
        ..config.settings()
    };
    let mut mapper = Mapper::new(services, dispatch, settings, location);
    mapper.select_bank(cli.bank)?;
    Ok(mapper)
}

/// Tick until `done` holds or the deadline passes.
fn drive(
    mapper: &mut Mapper,
    timeout: Duration,
    done: impl Fn(&Mapper) -> bool,
) -> Result<Vec<JobReport>, String> {
    let deadline = Instant::now() + timeout;
    let mut reports = Vec::new();
    loop {
        reports.extend(mapper.tick(None));
        if done(mapper) {
            return Ok(reports);
        }
        if Instant::now() >= deadline {
            return Err(format!(
                "timed out after {}s with {} job(s) outstanding",
                timeout.as_secs(),
                mapper.queue_len()
            ));
        }
        thread::sleep(FRAME);
    }
}

/// Drain the queue and fail on the first failed job.
fn finish(mapper: &mut Mapper, config: &Config) -> Result<Vec<JobReport>, String> {
    let timeout = config.request_timeout() * 2;
    let reports = drive(mapper, timeout, |m| m.queue_len() == 0)?;

    for report in &reports {
        eprintln!("{}", format_report(report));
        if let Outcome::Failed { reason } = &report.outcome {
            return Err(format!("{} failed: {reason}", report.kind));
        }
    }
    Ok(reports)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json =
        serde_json::to_string_pretty(value).map_err(|e| format!("failed to serialize: {e}"))?;
    println!("{json}");
    Ok(())
}

fn cmd_jobs(
    cli: &Cli,
    config: &Config,
    storage: &Storage,
    near: Option<(f64, f64)>,
    radius: Option<f64>,
) -> Result<(), String> {
    let config = Config {
        job_list_radius: radius.unwrap_or(config.job_list_radius),
        ..config.clone()
    };

    let use_gps = near.is_some()
        || storage
            .load_prefs()
            .map_err(|e| format!("failed to read preferences: {e}"))?
            .use_gps;

    let location: Option<Box<dyn LocationProvider>> = near.map(|(latitude, longitude)| {
        Box::new(FixedLocation::new(GeoFix {
            latitude,
            longitude,
            altitude: 0.0,
            horizontal_accuracy: 0.0,
            vertical_accuracy: 0.0,
        })) as Box<dyn LocationProvider>
    });

    let mut mapper = open_mapper(cli, &config, storage, location, false)?;
    if use_gps && let Err(e) = mapper.start_gps(|| thread::sleep(Duration::from_secs(1))) {
        eprintln!("{e}; listing without location filter");
    }

    mapper.list_jobs();
    finish(&mut mapper, &config)?;

    let listing = mapper
        .state()
        .listing
        .as_ref()
        .ok_or("no job listing received")?;
    for job in &listing.jobs {
        eprintln!("{}", format_job(job, listing.active.contains(&job.id)));
    }
    print_json(&listing.jobs)
}

fn cmd_status(cli: &Cli, config: &Config, storage: &Storage) -> Result<(), String> {
    let mut mapper = open_mapper(cli, config, storage, None, true)?;
    drive(&mut mapper, config.request_timeout() * 2, |m| {
        m.poller().completed() > 0
    })?;

    let report = mapper
        .poller()
        .last_report()
        .ok_or("status poll failed (run with RUST_LOG=debug for details)")?;
    eprintln!(
        "Bank {}: {} image(s) in workspace",
        mapper.session().bank(),
        report.image_count
    );
    print_json(report)
}

fn cmd_gps(config: &Config, storage: &Storage, state: Toggle) -> Result<(), String> {
    if state == Toggle::Off {
        storage
            .set_use_gps(false)
            .map_err(|e| format!("failed to store preference: {e}"))?;
        eprintln!("Geolocation tracking stopped");
        return Ok(());
    }

    let mut provider = location::select(config.location.as_ref());
    let result = location::enable(provider.as_mut(), MAX_WAIT_POLLS, || {
        thread::sleep(Duration::from_secs(1));
    });
    storage
        .set_use_gps(result.is_ok())
        .map_err(|e| format!("failed to store preference: {e}"))?;
    result.map_err(|e| e.to_string())?;

    eprintln!("Tracking geolocation");
    print_json(&provider.last_fix())
}

fn cmd_locate(map_to_ecef: &[f64], point: &[f64], forward: &[f64]) -> Result<(), String> {
    let values: &[f64; 13] = map_to_ecef
        .try_into()
        .map_err(|_| format!("--map-to-ecef needs 13 values, got {}", map_to_ecef.len()))?;
    let m = MapToEcef::from_array(values);
    let point = vector3("--point", point)?;

    let ecef = geodesy::map_to_ecef(&point, &m);
    let wgs84 = geodesy::ecef_to_wgs84(&ecef);

    let bearing = if forward.is_empty() {
        None
    } else {
        let forward = vector3("--forward", forward)?;
        geodesy::compass_direction(&point, &forward, &Matrix4::identity(), &m)
            .map(|d| geodesy::bearing_degrees(&d))
    };

    eprintln!("{}", format_location(&wgs84, bearing));
    print_json(&serde_json::json!({
        "ecef": [ecef.x, ecef.y, ecef.z],
        "wgs84": wgs84,
        "bearing": bearing,
    }))
}

fn vector3(flag: &str, values: &[f64]) -> Result<Vector3<f64>, String> {
    match values {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        _ => Err(format!("{flag} needs 3 values, got {}", values.len())),
    }
}
