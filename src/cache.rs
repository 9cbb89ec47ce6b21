use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use sha1::{Digest, Sha1};

/// Stable content-addressable key for one fully-qualified URL. Artifact
/// files for a page are all named after this key within the session
/// directory. Collision resistance is the requirement, not secrecy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentKey(String);

static ARTIFACT_STEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("regex"));

impl ContentKey {
    pub fn for_url(url: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(url.as_bytes());
        ContentKey(hex::encode(hasher.finalize()))
    }

    /// Recover the key from an artifact path produced by this session,
    /// e.g. `/tmp/gemnav-x/3f786850e387550fdab836ed7e6dc881de23001b.htm`.
    pub fn from_artifact_path(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        ARTIFACT_STEM
            .is_match(stem)
            .then(|| ContentKey(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The three cache files a navigation may produce for one key.
///
/// The raw file deliberately uses `.txt` so a "view source" load renders
/// as inert text rather than being interpreted by the browser control.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    raw: PathBuf,
    gmi: PathBuf,
    html: PathBuf,
}

impl ArtifactSet {
    pub fn new(session_path: &Path, key: &ContentKey) -> Self {
        ArtifactSet {
            raw: session_path.join(format!("{}.txt", key.as_str())),
            gmi: session_path.join(format!("{}.gmi", key.as_str())),
            html: session_path.join(format!("{}.htm", key.as_str())),
        }
    }

    pub fn raw(&self) -> &Path {
        &self.raw
    }

    pub fn gmi(&self) -> &Path {
        &self.gmi
    }

    pub fn html(&self) -> &Path {
        &self.html
    }

    /// Remove any leftover files for this key. The external fetcher may
    /// append to an existing output file rather than truncate it, so this
    /// must run before every fetch.
    pub fn clear_stale(&self) -> io::Result<()> {
        for path in [&self.raw, &self.gmi, &self.html] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Session-scoped mapping from content key back to the URL that produced
/// it. Mutated only by successful renders; read when the UI needs to
/// recover "what did I browse to" from an artifact filename.
#[derive(Default)]
pub struct UrlRegistry {
    inner: RwLock<HashMap<String, String>>,
}

impl UrlRegistry {
    pub fn record(&self, key: &ContentKey, url: &str) {
        self.inner
            .write()
            .insert(key.as_str().to_string(), url.to_string());
    }

    pub fn lookup(&self, key: &ContentKey) -> Option<String> {
        self.inner.read().get(key.as_str()).cloned()
    }

    pub fn lookup_artifact(&self, artifact: &Path) -> Option<String> {
        let key = ContentKey::from_artifact_path(artifact)?;
        self.lookup(&key)
    }
}
