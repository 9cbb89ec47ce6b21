use std::path::Path;

use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use tempfile::TempDir;
use url::Url;

use crate::cache::{ArtifactSet, ContentKey, UrlRegistry};

/// Process-wide navigation state: the per-run artifact directory and the
/// key-to-URL registry. Created at application start; dropping it removes
/// the directory and everything cached in it.
pub struct Session {
    dir: TempDir,
    registry: UrlRegistry,
}

impl Session {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("gemnav-")
            .tempdir()
            .context("session: create artifact directory")?;
        Ok(Session {
            dir,
            registry: UrlRegistry::default(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn registry(&self) -> &UrlRegistry {
        &self.registry
    }

    pub fn artifacts(&self, key: &ContentKey) -> ArtifactSet {
        ArtifactSet::new(self.path(), key)
    }
}

/// Origin information threaded through a navigation so the converter can
/// embed it (security banners, identicon seeds) without re-deriving it.
#[derive(Debug, Clone)]
pub struct SiteIdentity {
    url: Url,
    host: String,
    fingerprint: String,
}

impl SiteIdentity {
    pub fn new(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_string();
        let mut hasher = Sha1::new();
        hasher.update(host.as_bytes());
        let digest = hex::encode(hasher.finalize());
        SiteIdentity {
            url: url.clone(),
            host,
            // short id is plenty for a visual origin marker
            fingerprint: digest[..8].to_string(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}
