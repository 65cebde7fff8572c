use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SplitError};

pub const DEFAULT_STATIC_PREFIX: &str = "/output";

/// Scheme, host and port advertised to clients in returned URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl PublicEndpoint {
    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // IPv6 literal
            format!("{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// Maps files in the results store to absolute URLs under the static prefix.
#[derive(Clone, Debug)]
pub struct UrlSynthesizer {
    endpoint: PublicEndpoint,
    static_prefix: String,
    static_root: PathBuf,
}

impl UrlSynthesizer {
    pub fn new(
        endpoint: PublicEndpoint,
        static_prefix: impl Into<String>,
        static_root: impl Into<PathBuf>,
    ) -> Self {
        let prefix = static_prefix.into();
        let trimmed = prefix.trim_matches('/');
        Self {
            endpoint,
            static_prefix: if trimmed.is_empty() {
                String::new()
            } else {
                format!("/{trimmed}")
            },
            static_root: static_root.into(),
        }
    }

    pub fn static_prefix(&self) -> &str {
        &self.static_prefix
    }

    /// Pure path arithmetic; the file does not need to exist.
    pub fn synthesize(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(&self.static_root).map_err(|_| {
            self.error(path, format!("not under {}", self.static_root.display()))
        })?;

        let mut encoded = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| self.error(path, "path is not valid UTF-8".into()))?;
                    encoded.push(urlencoding::encode(part).into_owned());
                }
                Component::CurDir => {}
                _ => return Err(self.error(path, "path escapes the static root".into())),
            }
        }
        if encoded.is_empty() {
            return Err(self.error(path, "path names the static root itself".into()));
        }

        Ok(format!(
            "{}{}/{}",
            self.endpoint.base_url(),
            self.static_prefix,
            encoded.join("/")
        ))
    }

    fn error(&self, path: &Path, reason: String) -> SplitError {
        SplitError::UrlSynthesis {
            path: path.to_path_buf(),
            reason,
        }
    }
}
