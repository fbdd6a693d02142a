use anyhow::Context;
use clap::Args;
use roadwatch_core::catalog::IncidentTypeCatalog;
use roadwatch_core::notifier::ColdStart;
use roadwatch_sync::ReconnectPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// HTTP server address
    #[arg(long, env = "ROADWATCH_HTTP", default_value = "127.0.0.1:8080")]
    pub http: String,
    /// Incident type catalog (JSON). Built-in types when absent
    #[arg(long, env = "ROADWATCH_TYPES")]
    pub types: Option<PathBuf>,
    /// NDJSON journal, replayed on start. Memory only when absent
    #[arg(long, env = "ROADWATCH_JOURNAL")]
    pub journal: Option<PathBuf>,
    /// Directory photos are stored in
    #[arg(long, env = "ROADWATCH_MEDIA_DIR", default_value = "./media")]
    pub media_dir: PathBuf,
    /// Give up on a photo upload after this long (e.g., "15s")
    #[arg(long, env = "ROADWATCH_MEDIA_TIMEOUT", default_value = "15s")]
    pub media_timeout: String,
    /// Largest accepted photo, in bytes
    #[arg(long, env = "ROADWATCH_MAX_PHOTO_BYTES", default_value_t = 5 * 1024 * 1024)]
    pub max_photo_bytes: usize,
    /// User ids allowed to moderate (comma-separated or repeated)
    #[arg(long = "admin", env = "ROADWATCH_ADMINS", value_delimiter = ',')]
    pub admins: Vec<String>,
    /// Alert on incidents already approved when the server starts
    #[arg(long, env = "ROADWATCH_ALERT_COLD_START")]
    pub alert_cold_start: bool,
    /// First reconnect delay of a live feed
    #[arg(long, env = "ROADWATCH_RECONNECT_INITIAL", default_value = "1s")]
    pub reconnect_initial: String,
    /// Upper bound of the reconnect delay
    #[arg(long, env = "ROADWATCH_RECONNECT_MAX", default_value = "5m")]
    pub reconnect_max: String,
}

/// Resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http: String,
    pub catalog: IncidentTypeCatalog,
    pub journal: Option<PathBuf>,
    pub media_dir: PathBuf,
    pub media_timeout: Duration,
    pub max_photo_bytes: usize,
    pub admins: Vec<String>,
    pub cold_start: ColdStart,
    pub reconnect: ReconnectPolicy,
}

impl ServerConfig {
    pub fn from_args(args: ServeArgs) -> anyhow::Result<Self> {
        let media_timeout = parse_duration(&args.media_timeout)
            .context("Invalid media timeout format (e.g., '15s', '500ms')")?;
        let initial = parse_duration(&args.reconnect_initial)
            .context("Invalid reconnect delay format (e.g., '1s')")?;
        let max = parse_duration(&args.reconnect_max)
            .context("Invalid reconnect delay format (e.g., '5m')")?;

        Ok(Self {
            http: args.http,
            catalog: load_catalog(args.types.as_deref())?,
            journal: args.journal,
            media_dir: args.media_dir,
            media_timeout,
            max_photo_bytes: args.max_photo_bytes,
            admins: args.admins,
            cold_start: if args.alert_cold_start {
                ColdStart::AlertAll
            } else {
                ColdStart::Suppress
            },
            reconnect: ReconnectPolicy::new(initial, max),
        })
    }
}

pub fn load_catalog(path: Option<&Path>) -> anyhow::Result<IncidentTypeCatalog> {
    match path {
        Some(path) => IncidentTypeCatalog::load(path),
        None => Ok(IncidentTypeCatalog::builtin()),
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(ms.trim().parse()?))
    } else if let Some(secs) = s.strip_suffix('s') {
        Ok(Duration::from_secs(secs.trim().parse()?))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.trim().parse()?;
        let secs = mins
            .checked_mul(60)
            .ok_or_else(|| anyhow::anyhow!("{} minutes is out of range", mins))?;
        Ok(Duration::from_secs(secs))
    } else {
        // bare number is seconds
        Ok(Duration::from_secs(s.parse()?))
    }
}
