//! Configuration loading and root folder resolution
//!
//! Two layers:
//! - the operator's INI file (`config/huganjob_email_config.ini` under the
//!   data root) carrying SMTP/IMAP credentials, content and pacing settings
//! - an optional TOML overlay (`~/.config/huganjob/config.toml`) that only
//!   locates the data root and sets the default log level

use crate::{Error, Result};
use ini::{Ini, Properties};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// INI location relative to the data root
pub const CONFIG_RELATIVE_PATH: &str = "config/huganjob_email_config.ini";

/// Environment variable naming the data root
pub const ROOT_ENV_VAR: &str = "HUGANJOB_ROOT";

/// Environment variable overriding `[SMTP] password`
pub const PASSWORD_ENV_VAR: &str = "HUGANJOB_SMTP_PASSWORD";

// ============================================================================
// TOML overlay and root folder resolution
// ============================================================================

/// Logging section of the TOML overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// `~/.config/huganjob/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load the overlay from the platform config directory.
    ///
    /// A missing or unreadable overlay is not an error: defaults apply.
    pub fn load_default() -> Self {
        let Some(path) = toml_config_path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring invalid TOML overlay");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }
}

/// Platform location of the TOML overlay
pub fn toml_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("huganjob").join("config.toml"))
}

/// Data root resolution, in priority order:
/// 1. Command-line argument
/// 2. `HUGANJOB_ROOT` environment variable
/// 3. `root_folder` in the TOML overlay
/// 4. Current working directory
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    overlay: TomlConfig,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>) -> Self {
        Self::with_overlay(cli_arg, TomlConfig::load_default())
    }

    pub fn with_overlay(cli_arg: Option<PathBuf>, overlay: TomlConfig) -> Self {
        Self { cli_arg, overlay }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }
        if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        if let Some(path) = &self.overlay.root_folder {
            return path.clone();
        }
        PathBuf::from(".")
    }

    pub fn log_level(&self) -> &str {
        &self.overlay.logging.level
    }
}

// ============================================================================
// INI settings
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub sender_name: String,
    pub from_email: String,
    pub reply_to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImapSettings {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub bounce_folder: String,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentSettings {
    pub template_file: PathBuf,
    pub text_template_file: Option<PathBuf>,
    pub subject: String,
    pub tagline: String,
    pub tracking_beacon: bool,
    pub beacon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendingSettings {
    pub interval: Duration,
    pub lock_timeout: Duration,
    pub retry_delays: Vec<Duration>,
    pub connect_timeout: Duration,
    pub transaction_timeout: Duration,
}

impl Default for SendingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(10),
            retry_delays: [10, 15, 20].iter().map(|s| Duration::from_secs(*s)).collect(),
            connect_timeout: Duration::from_secs(15),
            transaction_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverSettings {
    pub harvest_min_confidence: f64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            harvest_min_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardSettings {
    pub cache_clear_url: String,
    pub enabled: bool,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            cache_clear_url: "http://127.0.0.1:5000/api/cache_clear".to_string(),
            enabled: true,
        }
    }
}

/// Absolute locations of every ledger and state file
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerPaths {
    pub prospects: PathBuf,
    pub unsubscribes: PathBuf,
    pub bounces: PathBuf,
    pub send_history: PathBuf,
    pub harvest: PathBuf,
    pub processed_tracking: PathBuf,
    pub lock_file: PathBuf,
}

impl LedgerPaths {
    /// Default layout under `root/data`
    pub fn under(root: &Path) -> Self {
        let data = root.join("data");
        Self {
            prospects: data.join("prospects.csv"),
            unsubscribes: data.join("unsubscribes.csv"),
            bounces: data.join("bounces.csv"),
            send_history: data.join("send_history.csv"),
            harvest: data.join("harvested_emails.csv"),
            processed_tracking: data.join("processed_bounces.json"),
            lock_file: data.join("huganjob_sender.lock"),
        }
    }

    fn from_section(root: &Path, section: Section<'_>) -> Self {
        let defaults = Self::under(root);
        let pick = |key: &str, default: PathBuf| {
            section.get(key).map(|v| root.join(v)).unwrap_or(default)
        };
        Self {
            prospects: pick("prospects", defaults.prospects),
            unsubscribes: pick("unsubscribes", defaults.unsubscribes),
            bounces: pick("bounces", defaults.bounces),
            send_history: pick("send_history", defaults.send_history),
            harvest: pick("harvest", defaults.harvest),
            processed_tracking: pick("processed_tracking", defaults.processed_tracking),
            lock_file: pick("lock_file", defaults.lock_file),
        }
    }

    /// Ledger paths (and resolver policy) for tools that never send.
    ///
    /// The INI file is optional here; without it the default layout applies.
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<(Self, ResolverSettings)> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join(CONFIG_RELATIVE_PATH));
        if !path.exists() {
            return Ok((Self::under(root), ResolverSettings::default()));
        }
        let ini = read_ini(&path)?;
        Ok((
            Self::from_section(root, Section::find(&ini, "PATHS")),
            resolver_settings(Section::find(&ini, "RESOLVER"))?,
        ))
    }
}

/// Complete operator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub root: PathBuf,
    pub smtp: SmtpSettings,
    pub imap: ImapSettings,
    pub content: ContentSettings,
    pub sending: SendingSettings,
    pub paths: LedgerPaths,
    pub resolver: ResolverSettings,
    pub dashboard: DashboardSettings,
}

impl AppConfig {
    /// Load `config_path`, or `<root>/config/huganjob_email_config.ini`
    pub fn load(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join(CONFIG_RELATIVE_PATH));
        let ini = read_ini(&path)?;
        let config = Self::from_ini(root, &ini)?;
        tracing::info!(config = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_ini_str(root: &Path, text: &str) -> Result<Self> {
        let ini = Ini::load_from_str(text.trim_start_matches('\u{FEFF}'))
            .map_err(|e| Error::Config(format!("Parse INI failed: {}", e)))?;
        Self::from_ini(root, &ini)
    }

    fn from_ini(root: &Path, ini: &Ini) -> Result<Self> {
        let smtp = Section::find(ini, "SMTP");
        let from_email = smtp.require("SMTP", "from_email")?.to_string();
        let user = smtp.require("SMTP", "user")?.to_string();
        let password = match std::env::var(PASSWORD_ENV_VAR) {
            Ok(p) if !p.is_empty() => p,
            _ => smtp.require("SMTP", "password")?.to_string(),
        };
        let smtp = SmtpSettings {
            server: smtp.require("SMTP", "server")?.to_string(),
            port: smtp.parse_or("SMTP", "port", 587u16)?,
            user,
            password,
            sender_name: smtp.get("sender_name").unwrap_or("HUGANJOB").to_string(),
            reply_to: smtp.get("reply_to").unwrap_or(&from_email).to_string(),
            from_email,
        };

        let imap = Section::find(ini, "IMAP");
        let imap = ImapSettings {
            server: imap.get("server").unwrap_or(&smtp.server).to_string(),
            port: imap.parse_or("IMAP", "port", 993u16)?,
            user: imap.get("user").unwrap_or(&smtp.user).to_string(),
            password: imap.get("password").unwrap_or(&smtp.password).to_string(),
            bounce_folder: imap.get("bounce_folder").unwrap_or("bounce").to_string(),
            poll_interval: Duration::from_secs(imap.parse_or("IMAP", "poll_interval", 300u64)?),
        };

        let content = Section::find(ini, "EMAIL_CONTENT");
        let content = ContentSettings {
            template_file: root.join(content.require("EMAIL_CONTENT", "template_file")?),
            text_template_file: content.get("text_template_file").map(|p| root.join(p)),
            subject: content.require("EMAIL_CONTENT", "subject")?.to_string(),
            tagline: content.get("tagline").unwrap_or("HUGANJOB").to_string(),
            tracking_beacon: content.flag("EMAIL_CONTENT", "tracking_beacon", false)?,
            beacon_url: content.get("beacon_url").map(String::from),
        };

        let sending_section = Section::find(ini, "SENDING");
        let defaults = SendingSettings::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            Ok(Duration::from_secs(
                sending_section.parse_or("SENDING", key, default.as_secs())?,
            ))
        };
        let sending = SendingSettings {
            interval: secs("interval", defaults.interval)?,
            lock_timeout: secs("lock_timeout", defaults.lock_timeout)?,
            retry_delays: match sending_section.get("retry_delays") {
                Some(raw) => parse_delays(raw)?,
                None => defaults.retry_delays.clone(),
            },
            connect_timeout: secs("connect_timeout", defaults.connect_timeout)?,
            transaction_timeout: secs("transaction_timeout", defaults.transaction_timeout)?,
        };

        let dashboard = Section::find(ini, "DASHBOARD");
        let dashboard_defaults = DashboardSettings::default();
        let dashboard = DashboardSettings {
            cache_clear_url: dashboard
                .get("cache_clear_url")
                .map(String::from)
                .unwrap_or(dashboard_defaults.cache_clear_url),
            enabled: dashboard.flag("DASHBOARD", "enabled", dashboard_defaults.enabled)?,
        };

        Ok(Self {
            root: root.to_path_buf(),
            smtp,
            imap,
            content,
            sending,
            paths: LedgerPaths::from_section(root, Section::find(ini, "PATHS")),
            resolver: resolver_settings(Section::find(ini, "RESOLVER"))?,
            dashboard,
        })
    }

    /// Domain of the From address, used for Message-ID tokens
    pub fn sender_domain(&self) -> &str {
        self.smtp
            .from_email
            .rsplit_once('@')
            .map(|(_, d)| d)
            .unwrap_or("localhost")
    }
}

fn resolver_settings(section: Section<'_>) -> Result<ResolverSettings> {
    let value: f64 = section.parse_or(
        "RESOLVER",
        "harvest_min_confidence",
        ResolverSettings::default().harvest_min_confidence,
    )?;
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Config(format!(
            "[RESOLVER] harvest_min_confidence must be within 0..1, got {}",
            value
        )));
    }
    Ok(ResolverSettings {
        harvest_min_confidence: value,
    })
}

fn read_ini(path: &Path) -> Result<Ini> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
    })?;
    Ini::load_from_str(text.trim_start_matches('\u{FEFF}')).map_err(|e| {
        Error::Config(format!("Parse INI failed for {}: {}", path.display(), e))
    })
}

fn parse_delays(raw: &str) -> Result<Vec<Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
                Error::Config(format!("[SENDING] retry_delays: invalid seconds '{}'", s))
            })
        })
        .collect()
}

/// Case-insensitive view of one INI section (possibly absent)
#[derive(Clone, Copy)]
struct Section<'a>(Option<&'a Properties>);

impl<'a> Section<'a> {
    fn find(ini: &'a Ini, name: &str) -> Self {
        Section(
            ini.iter()
                .find(|(section, _)| section.map_or(false, |s| s.eq_ignore_ascii_case(name)))
                .map(|(_, props)| props),
        )
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        let props = self.0?;
        props
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, section: &str, key: &str) -> Result<&'a str> {
        self.get(key)
            .ok_or_else(|| Error::Config(format!("Missing required key [{}] {}", section, key)))
    }

    fn parse_or<T: std::str::FromStr>(&self, section: &str, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            Some(raw) => raw.parse().map_err(|_| {
                Error::Config(format!("[{}] {}: invalid value '{}'", section, key, raw))
            }),
            None => Ok(default),
        }
    }

    fn flag(&self, section: &str, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(Error::Config(format!(
                "[{}] {}: expected a boolean, got '{}'",
                section, key, other
            ))),
        }
    }
}
