//! Configuration loading and parsing.
//!
//! Every key is optional; missing values resolve to the defaults below. CLI
//! flags are applied on top by the binary.

use std::{net::SocketAddr, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::{
    core::{
        orchestrator::{RequestOrchestrator, DEFAULT_DECODED_EXTENSION},
        separation::{CommandEngine, DEFAULT_ARGS, DEFAULT_PROGRAM},
        transcode::{TargetFormat, Transcoder, DEFAULT_BITRATE_KBPS},
        url::{PublicEndpoint, UrlSynthesizer, DEFAULT_STATIC_PREFIX},
        workspace::{Isolation, WorkspaceManager},
    },
    error::{Result, SplitError},
    types::StemMode,
};

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_PUBLIC_HOST: &str = "127.0.0.1";
pub const DEFAULT_MAX_UPLOAD_MB: usize = 512;
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Top-level service configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    pub separation: SeparationConfig,
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Host advertised in returned URLs.
    pub public_host: Option<String>,
    /// Port advertised in returned URLs (defaults to the bind port).
    pub public_port: Option<u16>,
    /// URL scheme, `http` unless behind a TLS proxy.
    pub scheme: Option<String>,
    /// Largest accepted request body in MiB.
    pub max_upload_mb: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub uploads_dir: Option<String>,
    pub output_dir: Option<String>,
    pub isolation: Isolation,
    /// Age after which other requests' directories are pruned (per-request mode).
    pub retention_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeparationConfig {
    pub stems: StemMode,
    pub program: String,
    pub args: Vec<String>,
    pub decoded_extension: String,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            stems: StemMode::Four,
            program: DEFAULT_PROGRAM.to_string(),
            args: DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
            decoded_extension: DEFAULT_DECODED_EXTENSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscodeConfig {
    pub format: TargetFormat,
    pub bitrate_kbps: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            format: TargetFormat::Mp3,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<ServiceConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let raw = self.server.bind.as_deref().unwrap_or(DEFAULT_BIND);
        raw.parse()
            .map_err(|e| SplitError::Config(format!("bind `{raw}`: {e}")))
    }

    pub fn public_endpoint(&self) -> Result<PublicEndpoint> {
        let port = match self.server.public_port {
            Some(port) => port,
            None => self.bind_addr()?.port(),
        };
        let scheme = self.server.scheme.as_deref().unwrap_or("http");
        if scheme != "http" && scheme != "https" {
            return Err(SplitError::Config(format!("unsupported scheme `{scheme}`")));
        }
        let host = self
            .server
            .public_host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_PUBLIC_HOST);
        Ok(PublicEndpoint {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
        })
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server
            .max_upload_mb
            .unwrap_or(DEFAULT_MAX_UPLOAD_MB)
            .saturating_mul(1024 * 1024)
    }

    pub fn workspace_manager(&self) -> WorkspaceManager {
        WorkspaceManager::new(
            self.workspace.uploads_dir.as_deref().unwrap_or("uploads"),
            self.workspace.output_dir.as_deref().unwrap_or("output"),
            self.workspace.isolation,
            Duration::from_secs(
                self.workspace
                    .retention_secs
                    .unwrap_or(DEFAULT_RETENTION_SECS),
            ),
        )
    }

    /// Wire the pipeline described by this config around the external command engine.
    pub fn build_orchestrator(&self) -> Result<RequestOrchestrator> {
        if self.separation.program.trim().is_empty() {
            return Err(SplitError::Config("separation.program is empty".into()));
        }
        let workspace = self.workspace_manager();
        let urls = UrlSynthesizer::new(
            self.public_endpoint()?,
            DEFAULT_STATIC_PREFIX,
            workspace.output_root(),
        );
        let engine = CommandEngine::new(&self.separation.program, self.separation.args.clone());

        Ok(RequestOrchestrator::new(
            workspace,
            Box::new(engine),
            Transcoder::new(self.transcode.format, self.transcode.bitrate_kbps),
            urls,
            self.separation.stems,
        )
        .with_decoded_extension(&self.separation.decoded_extension))
    }
}
