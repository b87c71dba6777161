use crate::error::MirrorError;
use crate::mirror::paths::MirrorPaths;
use anyhow::{Result, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://sakurazaka46.com";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    pub member_code: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_timeout_secs() -> u64 {
    40
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            member_code: "62".to_string(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    pub request_delay_ms: u64,
    pub image_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 120,
            image_delay_ms: 30,
        }
    }
}

impl PacingConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn image_delay(&self) -> Duration {
        Duration::from_millis(self.image_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub retries: usize,
    pub backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub max_pages: usize,
    #[serde(default)]
    pub known_overlap: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_pages: 100,
            known_overlap: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub max_profile_entries: usize,
    pub max_greeting_entries: usize,
    #[serde(default = "default_reference_timezone")]
    pub reference_timezone: String,
}

fn default_reference_timezone() -> String {
    "Asia/Tokyo".to_string()
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_profile_entries: 64,
            max_greeting_entries: 240,
            reference_timezone: default_reference_timezone(),
        }
    }
}

impl HistoryConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.reference_timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| {
                MirrorError::InvalidConfig(format!(
                    "unknown reference timezone `{}`",
                    self.reference_timezone
                ))
                .into()
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MirrorConfig {
    pub source: SourceConfig,
    pub pacing: PacingConfig,
    pub transport: TransportConfig,
    pub discovery: DiscoveryConfig,
    pub history: HistoryConfig,
    pub era_titles_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialMirrorConfig {
    source: Option<SourceConfig>,
    pacing: Option<PacingConfig>,
    transport: Option<TransportConfig>,
    discovery: Option<DiscoveryConfig>,
    history: Option<HistoryConfig>,
    era_titles_path: Option<PathBuf>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_path(var: &str, fallback: Option<PathBuf>) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => fallback,
    }
}

pub fn validate(cfg: &MirrorConfig) -> Result<()> {
    let base = cfg.source.base_url.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(MirrorError::InvalidConfig(format!(
            "source base url must be http(s): `{base}`"
        ))
        .into());
    }
    if cfg.source.member_code.trim().is_empty() {
        return Err(MirrorError::InvalidConfig("member code cannot be empty".into()).into());
    }
    if cfg.source.timeout_secs == 0 {
        return Err(MirrorError::InvalidConfig("timeout must be >= 1 second".into()).into());
    }
    if cfg.transport.retries == 0 {
        return Err(MirrorError::InvalidConfig("transport retries must be >= 1".into()).into());
    }
    if cfg.discovery.max_pages == 0 {
        return Err(MirrorError::InvalidConfig("discovery max pages must be >= 1".into()).into());
    }
    cfg.history.timezone()?;
    Ok(())
}

fn resolve_config_path(paths: &MirrorPaths) -> Option<PathBuf> {
    if let Ok(custom) = env::var("MIRROR_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let local = paths.root.join("blog-mirror.toml");
    if local.exists() {
        return Some(local);
    }
    let home = dirs::home_dir()?;
    Some(home.join(".blog-mirror").join("config.toml"))
}

fn merge_file_config(base: &mut MirrorConfig, paths: &MirrorPaths) -> Result<()> {
    let Some(path) = resolve_config_path(paths) else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialMirrorConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse mirror config {}: {err}", path.display()))?;
    if let Some(source) = parsed.source {
        base.source = source;
    }
    if let Some(pacing) = parsed.pacing {
        base.pacing = pacing;
    }
    if let Some(transport) = parsed.transport {
        base.transport = transport;
    }
    if let Some(discovery) = parsed.discovery {
        base.discovery = discovery;
    }
    if let Some(history) = parsed.history {
        base.history = history;
    }
    if parsed.era_titles_path.is_some() {
        base.era_titles_path = parsed.era_titles_path;
    }
    Ok(())
}

/// Defaults, then the TOML file, then `MIRROR_*` overrides. CLI flags are
/// applied by the caller before `validate`.
pub fn load_config(paths: &MirrorPaths) -> Result<MirrorConfig> {
    let mut cfg = MirrorConfig::default();
    merge_file_config(&mut cfg, paths)?;

    cfg.source.base_url = env_or_string("MIRROR_BASE_URL", &cfg.source.base_url);
    cfg.source.member_code = env_or_string("MIRROR_MEMBER_CODE", &cfg.source.member_code);
    cfg.source.user_agent = env_or_string("MIRROR_USER_AGENT", &cfg.source.user_agent);
    cfg.source.timeout_secs = env_or_u64("MIRROR_TIMEOUT_SECS", cfg.source.timeout_secs);
    cfg.pacing.request_delay_ms =
        env_or_u64("MIRROR_REQUEST_DELAY_MS", cfg.pacing.request_delay_ms);
    cfg.pacing.image_delay_ms = env_or_u64("MIRROR_IMAGE_DELAY_MS", cfg.pacing.image_delay_ms);
    cfg.transport.retries = env_or_usize("MIRROR_RETRIES", cfg.transport.retries);
    cfg.transport.backoff_ms = env_or_u64("MIRROR_BACKOFF_MS", cfg.transport.backoff_ms);
    cfg.discovery.max_pages = env_or_usize("MIRROR_MAX_PAGES", cfg.discovery.max_pages);
    cfg.discovery.known_overlap =
        env_or_usize("MIRROR_KNOWN_OVERLAP", cfg.discovery.known_overlap);
    cfg.history.max_profile_entries = env_or_usize(
        "MIRROR_MAX_PROFILE_HISTORY",
        cfg.history.max_profile_entries,
    );
    cfg.history.max_greeting_entries = env_or_usize(
        "MIRROR_MAX_GREETING_HISTORY",
        cfg.history.max_greeting_entries,
    );
    cfg.history.reference_timezone =
        env_or_string("MIRROR_REFERENCE_TZ", &cfg.history.reference_timezone);
    cfg.era_titles_path = env_or_path("MIRROR_ERA_TITLES_PATH", cfg.era_titles_path.take());

    Ok(cfg)
}
