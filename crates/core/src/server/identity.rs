//! Process identity and directory layout, resolved once at startup

use crate::config::ServerSettings;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Minecraft Bedrock release this core targets
pub const GAME_VERSION: &str = "1.21.50";

/// Bedrock network protocol number matching [`GAME_VERSION`]
pub const PROTOCOL_VERSION: u32 = 766;

/// Output of `git describe` at build time
pub const BUILD_DESCRIBE: &str = env!("MIRAI_BUILD_DESCRIBE");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Server,
    Client,
}

/// Whether the console supports colours and cursor control on `os`
///
/// Anything in the Windows family is treated as a plain console.
pub fn console_advanced_for(os: &str) -> bool {
    !os.to_ascii_lowercase().contains("windows")
}

/// Immutable identity facts of this process
#[derive(Debug, Clone, Serialize)]
pub struct ServerIdentity {
    run_mode: RunMode,
    version: semver::Version,
    build: &'static str,
    game_version: &'static str,
    protocol_version: u32,
    console_advanced: bool,
    started_at: DateTime<Utc>,
    #[serde(skip)]
    started: Instant,
}

impl ServerIdentity {
    pub(crate) fn detect() -> Result<Self, CoreError> {
        let identity = Self {
            run_mode: RunMode::Server,
            version: semver::Version::parse(env!("CARGO_PKG_VERSION"))?,
            build: BUILD_DESCRIBE,
            game_version: GAME_VERSION,
            protocol_version: PROTOCOL_VERSION,
            console_advanced: console_advanced_for(std::env::consts::OS),
            started_at: Utc::now(),
            started: Instant::now(),
        };
        debug!(
            "Detected identity: v{} ({}), console advanced: {}",
            identity.version, identity.build, identity.console_advanced
        );
        Ok(identity)
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn is_server(&self) -> bool {
        self.run_mode == RunMode::Server
    }

    pub fn is_client(&self) -> bool {
        self.run_mode == RunMode::Client
    }

    /// Version of this crate, not of the game
    pub fn version(&self) -> &semver::Version {
        &self.version
    }

    /// `git describe` output captured at build time
    pub fn build(&self) -> &'static str {
        self.build
    }

    pub fn game_version(&self) -> &'static str {
        self.game_version
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Derived from the host OS once; never re-evaluated
    pub fn console_advanced(&self) -> bool {
        self.console_advanced
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Monotonic time since [`ServerIdentity::started_at`]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Well-known directories of the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directories {
    pub root: PathBuf,
    pub plugins: PathBuf,
    pub worlds: PathBuf,
}

impl Directories {
    /// Resolve the layout under `root`, or under the configured root, or the
    /// working directory, in that order
    pub fn resolve(settings: &ServerSettings, root: Option<&Path>) -> Result<Self, CoreError> {
        let cwd = std::env::current_dir()?;
        let root = match root.or(settings.root_dir.as_deref()) {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => cwd.join(path),
            None => cwd,
        };

        Ok(Self {
            plugins: root.join(&settings.plugins_dir_name),
            worlds: root.join(&settings.worlds_dir_name),
            root,
        })
    }

    pub fn create_all(&self) -> Result<(), CoreError> {
        for path in [&self.root, &self.plugins, &self.worlds] {
            std::fs::create_dir_all(path).map_err(|source| CoreError::Directory {
                path: path.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
