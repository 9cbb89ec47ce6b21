use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use log::debug;
use parking_lot::Mutex;

/// One fetch attempt as handed to the external downloader.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub output: &'a Path,
    /// Skip TLS validation. Only ever set by the one-shot downgrade retry.
    pub insecure: bool,
    pub max_size_mb: u32,
    pub max_time_secs: u32,
    /// Proxy endpoint for non-gemini traffic routed through the gemini
    /// pipeline; never set for plain gemini targets.
    pub proxy: Option<&'a str>,
}

/// Captured outcome of one fetch attempt. Immutable once created.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl FetchResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Seam to the external content fetcher. The engine never touches the
/// network itself; it interprets what the tool reports after the fact.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchResult>;
}

/// Runs a gemget-compatible downloader binary and captures its streams.
pub struct CommandFetcher {
    binary: PathBuf,
}

impl CommandFetcher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        CommandFetcher {
            binary: binary.into(),
        }
    }
}

impl Fetcher for CommandFetcher {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchResult> {
        let mut args: Vec<String> = Vec::new();
        if request.insecure {
            args.push("-i".into());
        }
        args.push("--header".into());
        args.push("--no-progress-bar".into());
        args.push("-m".into());
        args.push(format!("{}Mb", request.max_size_mb));
        args.push("-t".into());
        args.push(request.max_time_secs.to_string());
        args.push("-o".into());
        args.push(request.output.to_string_lossy().into_owned());
        if let Some(proxy) = request.proxy {
            args.push("-p".into());
            args.push(proxy.to_string());
        }
        args.push(request.url.to_string());

        debug!("fetch: {} {:?}", self.binary.display(), args);

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .with_context(|| format!("launch fetcher to retrieve {}", request.url))?;

        Ok(FetchResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// One canned response for [`ScriptedFetcher`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedFetch {
    pub result: FetchResult,
    /// Body written to the request's output path, mimicking a fetcher that
    /// produced a raw file.
    pub body: Option<Vec<u8>>,
}

/// Record of what the engine asked a [`ScriptedFetcher`] to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub url: String,
    pub insecure: bool,
    pub proxy: Option<String>,
}

/// Replays canned fetch results in order. Used by the engine tests and
/// handy for offline demos; once the script runs dry every further fetch
/// reports a transport failure.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<ScriptedFetch>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedFetcher {
    pub fn new(script: impl IntoIterator<Item = ScriptedFetch>) -> Self {
        ScriptedFetcher {
            script: Mutex::new(script.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<FetchResult> {
        self.requests.lock().push(RecordedRequest {
            url: request.url.to_string(),
            insecure: request.insecure,
            proxy: request.proxy.map(str::to_string),
        });

        let Some(step) = self.script.lock().pop_front() else {
            return Ok(FetchResult {
                exit_code: 1,
                stderr: "scripted fetcher exhausted".into(),
                ..FetchResult::default()
            });
        };
        if let Some(body) = &step.body {
            fs::write(request.output, body).context("scripted fetch: write body")?;
        }
        Ok(step.result)
    }
}
