//! Layered configuration.
//!
//! Lowest to highest priority: built-in defaults, the TOML file given with
//! `--config`, `NTG_*` environment variables, command-line flags. The role is
//! resolved once here and never changes afterwards.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;
use crate::error::{GameError, Result};
use crate::export::ExportPolicy;
use crate::protocol::Role;
use crate::tokens::ChatTemplate;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5000";
pub const DEFAULT_CHAR_DELAY_MS: u64 = 8;

/// Shape of the TOML config file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server_url: Option<String>,
    pub loc: Option<String>,
    pub export_dir: Option<PathBuf>,
    pub export_policy: Option<ExportPolicy>,
    pub animate: Option<bool>,
    pub char_delay_ms: Option<u64>,
    pub log_filter: Option<String>,
    pub template: Option<ChatTemplate>,
}

impl FileConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GameError::Config(format!("invalid config file: {e}")))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GameError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        FileConfig::from_toml(&text)
    }
}

/// Fully resolved settings for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server_url: String,
    pub role: Role,
    pub export_dir: PathBuf,
    pub export_policy: ExportPolicy,
    pub animate: bool,
    pub char_delay_ms: u64,
    pub log_filter: Option<String>,
    pub template: ChatTemplate,
}

impl Config {
    /// Resolve from the process environment and the given arguments.
    pub fn load(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        Config::from_layers(file, |key| std::env::var(key).ok(), args)
    }

    /// Merge the layers. `env` looks up an environment variable.
    pub fn from_layers<F>(file: FileConfig, env: F, args: &Args) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let role = resolve_role(&file, &env, args)?;

        let server_url = args
            .server
            .clone()
            .or_else(|| env("NTG_SERVER_URL"))
            .or(file.server_url)
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        if !(server_url.starts_with("ws://") || server_url.starts_with("wss://")) {
            return Err(GameError::Config(format!(
                "server url must start with ws:// or wss://, got {server_url}"
            )));
        }

        let export_dir = args
            .export_dir
            .clone()
            .or_else(|| env("NTG_EXPORT_DIR").map(PathBuf::from))
            .or(file.export_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Config {
            server_url,
            role,
            export_dir,
            export_policy: args.export.or(file.export_policy).unwrap_or_default(),
            animate: !args.no_animate && file.animate.unwrap_or(true),
            char_delay_ms: args
                .char_delay_ms
                .or(file.char_delay_ms)
                .unwrap_or(DEFAULT_CHAR_DELAY_MS),
            log_filter: args.log.clone().or(file.log_filter),
            template: file.template.unwrap_or_default(),
        })
    }

    /// Per-character delay for the renderer, `None` when animation is off.
    pub fn char_delay(&self) -> Option<Duration> {
        (self.animate && self.char_delay_ms > 0).then(|| Duration::from_millis(self.char_delay_ms))
    }
}

fn resolve_role<F>(file: &FileConfig, env: &F, args: &Args) -> Result<Role>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(role) = args.loc {
        return Ok(role);
    }
    if let Some(query) = &args.query {
        return Role::from_query(query)
            .ok_or_else(|| GameError::Config(format!("query `{query}` has no valid loc")));
    }
    let loc = env("NTG_LOC").or_else(|| file.loc.clone()).ok_or_else(|| {
        GameError::Config("no role given; pass --loc outside|inside".to_string())
    })?;
    Role::from_loc(&loc)
        .ok_or_else(|| GameError::Config(format!("unknown loc `{loc}`, expected outside or inside")))
}
