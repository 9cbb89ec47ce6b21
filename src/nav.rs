use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use url::Url;

use crate::cache::{ArtifactSet, ContentKey};
use crate::config::{Config, WebLinkMode};
use crate::convert::{Converter, RenderOptions};
use crate::error::NavError;
use crate::fetch::{FetchRequest, FetchResult, Fetcher};
use crate::media::{self, MediaClass};
use crate::response::{GeminiResponse, StatusClass};
use crate::session::{Session, SiteIdentity};
use crate::uri;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Info,
    Success,
    Warning,
    Error,
}

/// Seam to the UI shell. The engine drives navigation; the shell renders,
/// prompts, and keeps its input surfaces in sync.
pub trait Shell: Send + Sync {
    fn notify(&self, message: &str, style: Notice);
    /// Busy shells disable their input surfaces so a second navigation
    /// cannot start mid-flight.
    fn set_busy(&self, busy: bool);
    fn show_page(&self, url: &str, artifact: &Path);
    fn show_image(&self, url: &str, file: &Path);
    /// Returns the user's answer to a server input request, or None when
    /// cancelled.
    fn prompt_input(&self, prompt: &str) -> Option<String>;
    /// Returns where to save a binary download, or None when cancelled.
    fn prompt_save_path(&self, suggested_name: &str) -> Option<PathBuf>;
    fn set_address(&self, url: &str);
}

/// Security phase of a gemini fetch. A navigation starts Secure and may
/// move to Insecure exactly once, after a qualifying TLS failure; the
/// insecure attempt is terminal whatever its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Secure,
    Insecure,
}

/// Top-level navigation entry point: normalizes the URI, selects the
/// scheme navigator, and brackets the whole run with the shell's busy
/// toggle. One navigation runs to completion (including nested redirect
/// and retry handling) before control returns.
pub struct Dispatcher {
    config: Config,
    session: Arc<Session>,
    fetcher: Arc<dyn Fetcher>,
    converter: Arc<dyn Converter>,
    shell: Arc<dyn Shell>,
}

impl Dispatcher {
    pub fn new(
        config: Config,
        session: Arc<Session>,
        fetcher: Arc<dyn Fetcher>,
        converter: Arc<dyn Converter>,
        shell: Arc<dyn Shell>,
    ) -> Self {
        Dispatcher {
            config,
            session,
            fetcher,
            converter,
            shell,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Recover the browsed URL from a rendered artifact's filename.
    pub fn source_url_for(&self, artifact: &Path) -> Option<String> {
        self.session.registry().lookup_artifact(artifact)
    }

    /// Returns true when the navigation produced content and the UI
    /// should move to it; false means the prior page stays displayed.
    pub fn navigate(&self, input: &str) -> bool {
        let url = match uri::normalize(input) {
            Ok(url) => url,
            Err(err) => return self.report(&err),
        };

        self.shell.set_busy(true);
        let navigated = self.dispatch(&url);
        // always released, success or failure
        self.shell.set_busy(false);
        navigated
    }

    fn dispatch(&self, url: &Url) -> bool {
        debug!("navigate: {}", url);
        let identity = SiteIdentity::new(url);
        match url.scheme() {
            "gemini" => self.navigate_gemini(url, 0),
            "gopher" => self.run(|| self.gopher_flow(url, &identity)),
            "about" => self.run(|| self.about_flow(url, &identity)),
            "http" | "https" => match self.config.web.handle_links {
                WebLinkMode::ExternalBrowser => self.open_external(url),
                WebLinkMode::GeminiProxy => self.navigate_gemini(url, 0),
                WebLinkMode::Internal => self.run(|| self.http_flow(url, &identity)),
            },
            "file" => {
                match url.to_file_path() {
                    Ok(path) => {
                        // already-rendered content, show as-is
                        self.shell.show_page(url.as_str(), &path);
                        true
                    }
                    Err(()) => self.report(&NavError::InvalidUri(url.to_string())),
                }
            }
            // anything else is the system browser's problem
            _ => self.open_external(url),
        }
    }

    fn run(&self, flow: impl FnOnce() -> Result<bool, NavError>) -> bool {
        match flow() {
            Ok(navigated) => navigated,
            Err(err) => self.report(&err),
        }
    }

    /// Every failure ends here: converted into a notification, never a
    /// fault propagating past the navigator boundary.
    fn report(&self, err: &NavError) -> bool {
        let style = if err.is_warning() {
            Notice::Warning
        } else {
            Notice::Error
        };
        self.shell.notify(&err.to_string(), style);
        false
    }

    fn open_external(&self, url: &Url) -> bool {
        if let Err(err) = webbrowser::open(url.as_str()) {
            self.shell.notify(
                &format!("Could not open system browser for {url}: {err}"),
                Notice::Error,
            );
        }
        // the displayed page does not change either way
        false
    }

    // ---- gemini scheme ----

    fn navigate_gemini(&self, url: &Url, hops: u32) -> bool {
        self.run(|| self.gemini_flow(url, hops))
    }

    fn gemini_flow(&self, url: &Url, hops: u32) -> Result<bool, NavError> {
        let full_query = url.as_str().to_string();
        let key = ContentKey::for_url(&full_query);
        let artifacts = self.session.artifacts(&key);
        if let Err(err) = artifacts.clear_stale() {
            warn!("failed to clear stale artifacts for {full_query}: {err}");
        }

        // non-gemini targets (http proxy mode) go out via the proxy
        let proxy = if url.scheme() == "gemini" {
            None
        } else {
            match self.config.web.http_proxy.as_deref() {
                Some(proxy) => Some(proxy),
                None => {
                    return Err(NavError::Transport {
                        code: -1,
                        info: String::new(),
                        errors: format!(
                            "no http proxy configured for {} traffic",
                            url.scheme()
                        ),
                    })
                }
            }
        };

        let (mut result, mut response) =
            self.fetch_once(url, &artifacts, Attempt::Secure, proxy)?;

        // Security downgrade: a qualifying TLS failure earns one warned
        // retry without validation. The retried attempt is never
        // re-examined, so a second downgrade is impossible.
        if !result.succeeded() {
            if let Some(reason) = response.tls_failure() {
                let note = NavError::TlsValidation {
                    reason,
                    authority: authority(url),
                };
                self.shell.notify(&format!("Note: {note}"), Notice::Warning);
                (result, response) = self.fetch_once(url, &artifacts, Attempt::Insecure, proxy)?;
            }
        }

        if response.abandoned() {
            return Err(NavError::AbandonedLimit {
                size_mb: self.config.engine.max_download_size_mb,
                time_secs: self.config.engine.max_download_time_secs,
                url: full_query,
            });
        }

        if artifacts.raw().exists() {
            match media::classify(response.meta()) {
                MediaClass::GeminiText => {
                    fs::copy(artifacts.raw(), artifacts.gmi())
                        .map_err(|err| conversion(&full_query, err))?;
                }
                MediaClass::Html => self
                    .converter
                    .html_to_gmi(artifacts.raw(), artifacts.gmi())
                    .map_err(|err| conversion(&full_query, err))?,
                MediaClass::PlainText => self
                    .converter
                    .text_to_gmi(artifacts.raw(), artifacts.gmi())
                    .map_err(|err| conversion(&full_query, err))?,
                class @ (MediaClass::Image | MediaClass::Binary) => {
                    return self.handle_binary(url, &key, &artifacts, class);
                }
            }

            // the fetcher may have followed a redirect itself; re-key the
            // produced artifact under the resolved URL
            if let Some(target) = response.final_url() {
                return self.rekey_redirect(url, target, &artifacts, hops);
            }

            return self.render(
                url.as_str(),
                &key,
                &artifacts,
                &SiteIdentity::new(url),
                &self.config.theme_base(),
                self.shows_web_banner(url),
            );
        }

        // no body was produced
        match response.status_class() {
            StatusClass::Redirect => match response.final_url() {
                // a fresh call through the same algorithm, one hop deeper
                Some(target) => {
                    let target = self.resolve_redirect(url, target, hops)?;
                    Ok(self.navigate_gemini(&target, hops + 1))
                }
                None => Err(transport(&result, &response)),
            },
            StatusClass::Input => self.input_flow(url, response.meta()),
            StatusClass::NotFound => Err(NavError::ResourceNotFound(format!(
                "Page not found (status {})\n\n{}",
                response.status().unwrap_or(51),
                full_query
            ))),
            _ => Err(transport(&result, &response)),
        }
    }

    fn fetch_once(
        &self,
        url: &Url,
        artifacts: &ArtifactSet,
        attempt: Attempt,
        proxy: Option<&str>,
    ) -> Result<(FetchResult, GeminiResponse), NavError> {
        let request = FetchRequest {
            url: url.as_str(),
            output: artifacts.raw(),
            insecure: attempt == Attempt::Insecure,
            max_size_mb: self.config.engine.max_download_size_mb,
            max_time_secs: self.config.engine.max_download_time_secs,
            proxy,
        };
        let result = self.fetcher.fetch(&request).map_err(|err| NavError::Transport {
            code: -1,
            info: String::new(),
            errors: err.to_string(),
        })?;
        debug!(
            "fetch {} ({:?}) -> exit {}",
            url, attempt, result.exit_code
        );
        let response = GeminiResponse::from_fetch(url.as_str(), &result);
        Ok((result, response))
    }

    /// Validate a redirect target: resolve relative forms, refuse to leave
    /// gemini for another scheme, and bound the chain length.
    fn resolve_redirect(&self, url: &Url, target: &str, hops: u32) -> Result<Url, NavError> {
        let resolved = uri::resolve_redirect(url, target)?;
        if url.scheme() == "gemini" && resolved.scheme() != "gemini" {
            return Err(NavError::UnsupportedRedirect(format!(
                "Cross scheme redirect from Gemini not supported: {resolved}"
            )));
        }
        let limit = self.config.engine.redirect_hop_limit;
        if hops + 1 > limit {
            return Err(NavError::UnsupportedRedirect(format!(
                "Redirect limit of {limit} hops exceeded at: {resolved}"
            )));
        }
        Ok(resolved)
    }

    /// The fetch already produced the final page under the pre-redirect
    /// key; move the gemtext artifact to the resolved URL's key and render
    /// there. The displayed and registered URL becomes the target.
    fn rekey_redirect(
        &self,
        url: &Url,
        target: &str,
        artifacts: &ArtifactSet,
        hops: u32,
    ) -> Result<bool, NavError> {
        let target = self.resolve_redirect(url, target, hops)?;
        let new_key = ContentKey::for_url(target.as_str());
        let new_artifacts = self.session.artifacts(&new_key);
        if new_artifacts.gmi().exists() {
            fs::remove_file(new_artifacts.gmi())
                .map_err(|err| conversion(target.as_str(), err))?;
        }
        fs::rename(artifacts.gmi(), new_artifacts.gmi())
            .map_err(|err| conversion(target.as_str(), err))?;

        self.render(
            target.as_str(),
            &new_key,
            &new_artifacts,
            &SiteIdentity::new(&target),
            &self.config.theme_base(),
            self.shows_web_banner(&target),
        )
    }

    /// Status 10/11: ask the user, percent-encode the answer into the
    /// query, and re-enter navigation. Cancelled or empty input aborts
    /// without rendering.
    fn input_flow(&self, url: &Url, prompt_text: &str) -> Result<bool, NavError> {
        let prompt = format!(
            "Input request from Gemini server\n\n  {}{}\n\n{}",
            url.host_str().unwrap_or_default(),
            url.path(),
            prompt_text
        );
        match self.shell.prompt_input(&prompt) {
            Some(input) if !input.is_empty() => {
                let target = uri::with_user_input(url, &input);
                Ok(self.navigate(target.as_str()))
            }
            _ => Ok(false),
        }
    }

    /// Image and binary handling: re-extend the raw file, then either show
    /// inline or offer a save dialog. Binary saves never change the page.
    fn handle_binary(
        &self,
        url: &Url,
        key: &ContentKey,
        artifacts: &ArtifactSet,
        class: MediaClass,
    ) -> Result<bool, NavError> {
        let mut bin = artifacts.raw().as_os_str().to_owned();
        bin.push(media::binary_extension(url));
        let bin = PathBuf::from(bin);
        fs::copy(artifacts.raw(), &bin).map_err(|err| conversion(url.as_str(), err))?;

        if class == MediaClass::Image {
            self.session.registry().record(key, url.as_str());
            self.shell.show_image(url.as_str(), &bin);
            self.shell.set_address(url.as_str());
            return Ok(true);
        }

        let suggested = Path::new(url.path())
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("download");
        if let Some(dest) = self.shell.prompt_save_path(suggested) {
            match fs::copy(&bin, &dest) {
                Ok(_) => self.shell.notify(
                    &format!("File saved to {}", dest.display()),
                    Notice::Success,
                ),
                Err(err) => self.shell.notify(
                    &format!("Could not save the file due to: {err}"),
                    Notice::Error,
                ),
            }
        }
        Ok(false)
    }

    fn render(
        &self,
        source_url: &str,
        key: &ContentKey,
        artifacts: &ArtifactSet,
        identity: &SiteIdentity,
        theme: &Path,
        web_banner: bool,
    ) -> Result<bool, NavError> {
        let opts = RenderOptions {
            source_url,
            identity,
            theme,
            web_banner,
        };
        self.converter
            .gmi_to_html(artifacts.gmi(), artifacts.html(), &opts)
            .map_err(|err| conversion(source_url, err))?;
        if !artifacts.html().exists() {
            return Err(NavError::Conversion {
                url: source_url.to_string(),
                detail: "converter produced no output".into(),
            });
        }

        self.session.registry().record(key, source_url);
        self.shell.show_page(source_url, artifacts.html());
        self.shell.set_address(source_url);
        Ok(true)
    }

    /// Self-rendered web content gets an origin banner; proxied content is
    /// the proxy's to mark.
    fn shows_web_banner(&self, url: &Url) -> bool {
        url.scheme().starts_with("http")
            && self.config.web.handle_links != WebLinkMode::GeminiProxy
    }

    // ---- gopher scheme ----

    fn gopher_flow(&self, url: &Url, identity: &SiteIdentity) -> Result<bool, NavError> {
        let full_query = url.as_str().to_string();
        let key = ContentKey::for_url(&full_query);
        let artifacts = self.session.artifacts(&key);
        if let Err(err) = artifacts.clear_stale() {
            warn!("failed to clear stale artifacts for {full_query}: {err}");
        }

        let (result, response) = self.fetch_once(url, &artifacts, Attempt::Secure, None)?;

        if response.abandoned() {
            return Err(NavError::AbandonedLimit {
                size_mb: self.config.engine.max_download_size_mb,
                time_secs: self.config.engine.max_download_time_secs,
                url: full_query,
            });
        }

        if !artifacts.raw().exists() {
            return Err(transport(&result, &response));
        }

        self.converter
            .gopher_to_gmi(artifacts.raw(), artifacts.gmi())
            .map_err(|err| conversion(&full_query, err))?;
        self.render(
            url.as_str(),
            &key,
            &artifacts,
            identity,
            &self.config.theme_base(),
            false,
        )
    }

    // ---- http internal mode ----

    fn http_flow(&self, url: &Url, identity: &SiteIdentity) -> Result<bool, NavError> {
        let full_query = url.as_str().to_string();
        let key = ContentKey::for_url(&full_query);
        let artifacts = self.session.artifacts(&key);
        if let Err(err) = artifacts.clear_stale() {
            warn!("failed to clear stale artifacts for {full_query}: {err}");
        }

        let (result, response) = self.fetch_once(url, &artifacts, Attempt::Secure, None)?;

        if response.abandoned() {
            return Err(NavError::AbandonedLimit {
                size_mb: self.config.engine.max_download_size_mb,
                time_secs: self.config.engine.max_download_time_secs,
                url: full_query,
            });
        }

        if !artifacts.raw().exists() {
            return Err(transport(&result, &response));
        }

        // web servers that declare nothing almost certainly sent html
        let declared = if response.meta().is_empty() {
            "text/html"
        } else {
            response.meta()
        };
        match media::classify(declared) {
            MediaClass::GeminiText => {
                fs::copy(artifacts.raw(), artifacts.gmi())
                    .map_err(|err| conversion(&full_query, err))?;
            }
            MediaClass::Html => self
                .converter
                .html_to_gmi(artifacts.raw(), artifacts.gmi())
                .map_err(|err| conversion(&full_query, err))?,
            MediaClass::PlainText => self
                .converter
                .text_to_gmi(artifacts.raw(), artifacts.gmi())
                .map_err(|err| conversion(&full_query, err))?,
            class @ (MediaClass::Image | MediaClass::Binary) => {
                return self.handle_binary(url, &key, &artifacts, class);
            }
        }

        self.render(
            url.as_str(),
            &key,
            &artifacts,
            identity,
            &self.config.theme_base(),
            true,
        )
    }

    // ---- about scheme ----

    /// `about://<host>/<path>` resolves a bundled documentation file and
    /// renders it with the dedicated help theme so it looks distinct from
    /// the user's chosen theme. No network fetch.
    fn about_flow(&self, url: &Url, identity: &SiteIdentity) -> Result<bool, NavError> {
        let full_query = url.as_str().to_string();
        let key = ContentKey::for_url(&full_query);
        let artifacts = self.session.artifacts(&key);
        if let Err(err) = artifacts.clear_stale() {
            warn!("failed to clear stale artifacts for {full_query}: {err}");
        }

        let resource = url.path().trim_start_matches('/');
        // keep doc lookups inside the docs directory
        if resource.is_empty() || resource.split('/').any(|part| part == "..") {
            return Err(NavError::ResourceNotFound(format!(
                "No content was found for: {full_query}"
            )));
        }

        let docs = self.config.docs_dir();
        let source = docs.join(resource);
        if !source.is_file() {
            return Err(NavError::ResourceNotFound(format!(
                "No content was found for: {full_query}"
            )));
        }

        fs::copy(&source, artifacts.gmi()).map_err(|err| conversion(&full_query, err))?;
        self.render(
            url.as_str(),
            &key,
            &artifacts,
            identity,
            &docs.join("help-theme"),
            false,
        )
    }
}

fn authority(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    }
}

fn transport(result: &FetchResult, response: &GeminiResponse) -> NavError {
    NavError::Transport {
        code: result.exit_code,
        info: response.info().join("\n\n"),
        errors: response.errors().join("\n\n"),
    }
}

fn conversion(url: &str, err: impl ToString) -> NavError {
    NavError::Conversion {
        url: url.to_string(),
        detail: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::BuiltinConverter;
    use crate::fetch::{FetchResult, ScriptedFetch, ScriptedFetcher};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingShell {
        notices: Mutex<Vec<(Notice, String)>>,
        pages: Mutex<Vec<(String, PathBuf)>>,
        images: Mutex<Vec<(String, PathBuf)>>,
        addresses: Mutex<Vec<String>>,
        busy_log: Mutex<Vec<bool>>,
        input_reply: Mutex<Option<String>>,
        save_reply: Mutex<Option<PathBuf>>,
    }

    impl RecordingShell {
        fn notices(&self) -> Vec<(Notice, String)> {
            self.notices.lock().clone()
        }

        fn notice_containing(&self, needle: &str) -> Option<(Notice, String)> {
            self.notices()
                .into_iter()
                .find(|(_, text)| text.contains(needle))
        }

        fn pages(&self) -> Vec<(String, PathBuf)> {
            self.pages.lock().clone()
        }
    }

    impl Shell for RecordingShell {
        fn notify(&self, message: &str, style: Notice) {
            self.notices.lock().push((style, message.to_string()));
        }

        fn set_busy(&self, busy: bool) {
            self.busy_log.lock().push(busy);
        }

        fn show_page(&self, url: &str, artifact: &Path) {
            self.pages
                .lock()
                .push((url.to_string(), artifact.to_path_buf()));
        }

        fn show_image(&self, url: &str, file: &Path) {
            self.images
                .lock()
                .push((url.to_string(), file.to_path_buf()));
        }

        fn prompt_input(&self, _prompt: &str) -> Option<String> {
            self.input_reply.lock().clone()
        }

        fn prompt_save_path(&self, _suggested_name: &str) -> Option<PathBuf> {
            self.save_reply.lock().clone()
        }

        fn set_address(&self, url: &str) {
            self.addresses.lock().push(url.to_string());
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        shell: Arc<RecordingShell>,
        fetcher: Arc<ScriptedFetcher>,
        session: Arc<Session>,
    }

    fn harness(config: Config, script: Vec<ScriptedFetch>) -> Harness {
        let session = Arc::new(Session::new().unwrap());
        let shell = Arc::new(RecordingShell::default());
        let fetcher = Arc::new(ScriptedFetcher::new(script));
        let dispatcher = Dispatcher::new(
            config,
            Arc::clone(&session),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            Arc::new(BuiltinConverter),
            Arc::clone(&shell) as Arc<dyn Shell>,
        );
        Harness {
            dispatcher,
            shell,
            fetcher,
            session,
        }
    }

    fn ok_gemini(body: &str) -> ScriptedFetch {
        ScriptedFetch {
            result: FetchResult {
                stdout: "Header: 20 text/gemini".into(),
                ..FetchResult::default()
            },
            body: Some(body.as_bytes().to_vec()),
        }
    }

    fn status_only(line: &str) -> ScriptedFetch {
        ScriptedFetch {
            result: FetchResult {
                stdout: line.into(),
                ..FetchResult::default()
            },
            body: None,
        }
    }

    #[test]
    fn successful_navigation_renders_and_registers() {
        let h = harness(Config::default(), vec![ok_gemini("# Hello\nWelcome.")]);
        let url = "gemini://example.org/";
        assert!(h.dispatcher.navigate(url));

        let pages = h.shell.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].0, url);
        assert!(pages[0].1.exists());
        let html = fs::read_to_string(&pages[0].1).unwrap();
        assert!(html.contains("<h1>Hello</h1>"));

        let key = ContentKey::for_url(url);
        assert_eq!(h.session.registry().lookup(&key).as_deref(), Some(url));
        assert_eq!(h.dispatcher.source_url_for(&pages[0].1).as_deref(), Some(url));
        assert_eq!(*h.shell.addresses.lock(), vec![url.to_string()]);
        assert_eq!(*h.shell.busy_log.lock(), vec![true, false]);
    }

    #[test]
    fn tls_failure_downgrades_exactly_once() {
        let cert_error = ScriptedFetch {
            result: FetchResult {
                exit_code: 1,
                stderr: "server cert is expired".into(),
                ..FetchResult::default()
            },
            body: None,
        };
        let h = harness(
            Config::default(),
            vec![cert_error.clone(), cert_error.clone(), cert_error],
        );
        assert!(!h.dispatcher.navigate("gemini://expired.example/"));

        // secure attempt, then one insecure retry, never a third fetch
        let requests = h.fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].insecure);
        assert!(requests[1].insecure);

        let (style, text) = h
            .shell
            .notice_containing("Server certificate is expired")
            .expect("downgrade warning");
        assert_eq!(style, Notice::Warning);
        assert!(text.contains("expired.example"));
    }

    #[test]
    fn hostname_mismatch_also_qualifies_for_downgrade() {
        let h = harness(
            Config::default(),
            vec![
                ScriptedFetch {
                    result: FetchResult {
                        exit_code: 1,
                        stderr: "remote hostname does not verify".into(),
                        ..FetchResult::default()
                    },
                    body: None,
                },
                ok_gemini("# Reached it anyway"),
            ],
        );
        assert!(h.dispatcher.navigate("gemini://wrongname.example/"));
        let requests = h.fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].insecure);
        assert!(h
            .shell
            .notice_containing("Host name does not verify")
            .is_some());
    }

    #[test]
    fn plain_transport_failure_never_retries() {
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult {
                    exit_code: 1,
                    stderr: "dial tcp: connection refused".into(),
                    ..FetchResult::default()
                },
                body: None,
            }],
        );
        assert!(!h.dispatcher.navigate("gemini://down.example/"));
        assert_eq!(h.fetcher.requests().len(), 1);
        let (style, text) = h
            .shell
            .notice_containing("connection refused")
            .expect("transport error surfaced");
        assert_eq!(style, Notice::Error);
        assert!(text.contains("exit code 1"));
        assert_eq!(*h.shell.busy_log.lock(), vec![true, false]);
    }

    #[test]
    fn bodyless_redirect_refetches_under_new_key() {
        let old = "gemini://example.org/old";
        let new = "gemini://example.org/new";
        let h = harness(
            Config::default(),
            vec![
                status_only("30 gemini://example.org/new"),
                ok_gemini("# Moved here"),
            ],
        );
        assert!(h.dispatcher.navigate(old));

        let requests = h.fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url, new);

        let new_key = ContentKey::for_url(new);
        assert_eq!(h.session.registry().lookup(&new_key).as_deref(), Some(new));
        // nothing rendered or kept under the pre-redirect key
        let old_artifacts = h.session.artifacts(&ContentKey::for_url(old));
        assert!(!old_artifacts.gmi().exists());
        assert!(!old_artifacts.html().exists());
        assert_eq!(h.shell.pages()[0].0, new);
    }

    #[test]
    fn redirect_with_body_moves_artifact_to_new_key() {
        let old = "gemini://example.org/old";
        let new = "gemini://example.org/new";
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult {
                    stdout: format!("Redirected to {new}\nHeader: 20 text/gemini"),
                    ..FetchResult::default()
                },
                body: Some(b"# Final page".to_vec()),
            }],
        );
        assert!(h.dispatcher.navigate(old));
        assert_eq!(h.fetcher.requests().len(), 1);

        let old_artifacts = h.session.artifacts(&ContentKey::for_url(old));
        let new_artifacts = h.session.artifacts(&ContentKey::for_url(new));
        assert!(!old_artifacts.gmi().exists(), "artifact was moved away");
        assert!(new_artifacts.gmi().exists());
        assert!(new_artifacts.html().exists());
        assert_eq!(
            h.session
                .registry()
                .lookup(&ContentKey::for_url(new))
                .as_deref(),
            Some(new)
        );
        assert_eq!(*h.shell.addresses.lock(), vec![new.to_string()]);
    }

    #[test]
    fn cross_scheme_redirect_away_from_gemini_is_rejected() {
        let h = harness(
            Config::default(),
            vec![status_only("30 https://example.org/trap")],
        );
        assert!(!h.dispatcher.navigate("gemini://example.org/"));
        assert_eq!(h.fetcher.requests().len(), 1);
        let (style, _) = h
            .shell
            .notice_containing("Cross scheme redirect from Gemini not supported")
            .expect("rejection warning");
        assert_eq!(style, Notice::Warning);
        assert!(h.shell.pages().is_empty());
    }

    #[test]
    fn redirect_chains_are_bounded() {
        let mut config = Config::default();
        config.engine.redirect_hop_limit = 2;
        let script = (1..=6)
            .map(|n| status_only(&format!("30 gemini://example.org/hop{n}")))
            .collect();
        let h = harness(config, script);
        assert!(!h.dispatcher.navigate("gemini://example.org/hop0"));
        // initial fetch + two allowed hops, then the cap trips
        assert_eq!(h.fetcher.requests().len(), 3);
        assert!(h
            .shell
            .notice_containing("Redirect limit of 2 hops exceeded")
            .is_some());
        assert!(h.shell.pages().is_empty());
    }

    #[test]
    fn abandoned_by_size_reports_ceiling_and_leaves_no_artifact() {
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult {
                    exit_code: 1,
                    stderr: "download stopped: content is larger than what is allowed".into(),
                    ..FetchResult::default()
                },
                body: None,
            }],
        );
        let url = "gemini://big.example/file";
        assert!(!h.dispatcher.navigate(url));

        let (style, text) = h
            .shell
            .notice_containing("abandoned")
            .expect("abandonment warning");
        assert_eq!(style, Notice::Warning);
        assert!(text.contains("10 Mb"), "names the configured ceiling: {text}");
        assert!(text.contains("30 s"));
        let artifacts = h.session.artifacts(&ContentKey::for_url(url));
        assert!(!artifacts.html().exists());
        assert_eq!(h.fetcher.requests().len(), 1, "no retry after abandonment");
    }

    #[test]
    fn input_status_prompts_and_renavigates_with_encoded_query() {
        let h = harness(
            Config::default(),
            vec![
                status_only("10 Enter a search term"),
                ok_gemini("# Results"),
            ],
        );
        *h.shell.input_reply.lock() = Some("rust lang".into());
        assert!(h.dispatcher.navigate("gemini://example.org/search"));

        let requests = h.fetcher.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url, "gemini://example.org/search?rust%20lang");
        assert_eq!(
            h.shell.addresses.lock().last().map(String::as_str),
            Some("gemini://example.org/search?rust%20lang")
        );
    }

    #[test]
    fn cancelled_input_aborts_without_rendering() {
        let h = harness(
            Config::default(),
            vec![status_only("10 Enter a search term")],
        );
        assert!(!h.dispatcher.navigate("gemini://example.org/search"));
        assert_eq!(h.fetcher.requests().len(), 1);
        assert!(h.shell.pages().is_empty());
    }

    #[test]
    fn not_found_status_is_a_warning() {
        let h = harness(Config::default(), vec![status_only("51 Not found")]);
        assert!(!h.dispatcher.navigate("gemini://example.org/missing"));
        let (style, text) = h
            .shell
            .notice_containing("Page not found (status 51)")
            .expect("not-found warning");
        assert_eq!(style, Notice::Warning);
        assert!(text.contains("gemini://example.org/missing"));
    }

    #[test]
    fn image_body_is_shown_inline() {
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult {
                    stdout: "Header: 20 image/png".into(),
                    ..FetchResult::default()
                },
                body: Some(vec![0x89, 0x50, 0x4e, 0x47]),
            }],
        );
        let url = "gemini://example.org/cat.png";
        assert!(h.dispatcher.navigate(url));

        let images = h.shell.images.lock().clone();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].0, url);
        assert!(images[0].1.to_string_lossy().ends_with(".txt.png"));
        assert!(images[0].1.exists());
        assert_eq!(
            h.session
                .registry()
                .lookup(&ContentKey::for_url(url))
                .as_deref(),
            Some(url)
        );
    }

    #[test]
    fn binary_body_offers_save_and_keeps_prior_page() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("archive.zip");
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult {
                    stdout: "Header: 20 application/zip".into(),
                    ..FetchResult::default()
                },
                body: Some(b"PK\x03\x04data".to_vec()),
            }],
        );
        *h.shell.save_reply.lock() = Some(dest.clone());

        assert!(!h.dispatcher.navigate("gemini://example.org/files/archive.zip"));
        assert_eq!(fs::read(&dest).unwrap(), b"PK\x03\x04data");
        let (style, _) = h
            .shell
            .notice_containing("File saved to")
            .expect("save confirmation");
        assert_eq!(style, Notice::Success);
        assert!(h.shell.pages().is_empty());
    }

    #[test]
    fn declined_save_dialog_still_ends_navigation_quietly() {
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult {
                    stdout: "Header: 20 application/octet-stream".into(),
                    ..FetchResult::default()
                },
                body: Some(b"blob".to_vec()),
            }],
        );
        assert!(!h.dispatcher.navigate("gemini://example.org/blob"));
        assert!(h.shell.pages().is_empty());
        assert!(h.shell.notice_containing("File saved").is_none());
    }

    #[test]
    fn html_over_gemini_is_converted_before_rendering() {
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult {
                    stdout: "Header: 20 text/html; charset=utf-8".into(),
                    ..FetchResult::default()
                },
                body: Some(b"<html><body><h1>Served as web</h1></body></html>".to_vec()),
            }],
        );
        assert!(h.dispatcher.navigate("gemini://example.org/page.html"));
        let html = fs::read_to_string(&h.shell.pages()[0].1).unwrap();
        assert!(html.contains("Served as web"));
    }

    #[test]
    fn plain_text_is_wrapped_preformatted() {
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult {
                    stdout: "Header: 20 text/plain".into(),
                    ..FetchResult::default()
                },
                body: Some(b"column aligned\n  ascii art".to_vec()),
            }],
        );
        assert!(h.dispatcher.navigate("gemini://example.org/readme.txt"));
        let html = fs::read_to_string(&h.shell.pages()[0].1).unwrap();
        assert!(html.contains("<pre>"));
        assert!(html.contains("ascii art"));
    }

    #[test]
    fn invalid_uri_fails_before_any_fetch() {
        let h = harness(Config::default(), vec![]);
        assert!(!h.dispatcher.navigate("not a uri at all"));
        assert!(h.fetcher.requests().is_empty());
        let (style, _) = h
            .shell
            .notice_containing("Not a valid URI")
            .expect("invalid uri error");
        assert_eq!(style, Notice::Error);
        assert!(h.shell.busy_log.lock().is_empty(), "rejected before busy toggle");
    }

    #[test]
    fn proxy_mode_routes_web_urls_through_gemini_pipeline() {
        let mut config = Config::default();
        config.web.handle_links = WebLinkMode::GeminiProxy;
        config.web.http_proxy = Some("127.0.0.1:1965".into());
        let h = harness(
            config,
            vec![ScriptedFetch {
                result: FetchResult {
                    stdout: "Header: 20 text/html".into(),
                    ..FetchResult::default()
                },
                body: Some(b"<html><body><p>proxied</p></body></html>".to_vec()),
            }],
        );
        assert!(h.dispatcher.navigate("https://example.org/"));
        let requests = h.fetcher.requests();
        assert_eq!(requests[0].proxy.as_deref(), Some("127.0.0.1:1965"));
        // proxied pages carry no self-rendered web banner
        let html = fs::read_to_string(&h.shell.pages()[0].1).unwrap();
        assert!(!html.contains("web-banner"));
    }

    #[test]
    fn proxy_mode_without_proxy_is_a_reported_failure() {
        let mut config = Config::default();
        config.web.handle_links = WebLinkMode::GeminiProxy;
        let h = harness(config, vec![]);
        assert!(!h.dispatcher.navigate("https://example.org/"));
        assert!(h.fetcher.requests().is_empty());
        assert!(h.shell.notice_containing("no http proxy configured").is_some());
    }

    #[test]
    fn internal_web_mode_renders_with_origin_banner() {
        let mut config = Config::default();
        config.web.handle_links = WebLinkMode::Internal;
        let h = harness(
            config,
            vec![ScriptedFetch {
                // no declared type at all; engine assumes html
                result: FetchResult::default(),
                body: Some(b"<html><body><h1>Web page</h1></body></html>".to_vec()),
            }],
        );
        assert!(h.dispatcher.navigate("http://example.org/"));
        let html = fs::read_to_string(&h.shell.pages()[0].1).unwrap();
        assert!(html.contains("Web page"));
        assert!(html.contains("web-banner"));
    }

    #[test]
    fn gopher_menu_is_converted_and_rendered() {
        let h = harness(
            Config::default(),
            vec![ScriptedFetch {
                result: FetchResult::default(),
                body: Some(
                    b"iWelcome\t\texample.org\t70\r\n0About\t/about.txt\texample.org\t70\r\n"
                        .to_vec(),
                ),
            }],
        );
        assert!(h.dispatcher.navigate("gopher://example.org/"));
        let html = fs::read_to_string(&h.shell.pages()[0].1).unwrap();
        assert!(html.contains("Welcome"));
        assert!(html.contains("gopher://example.org:70/0/about.txt"));
    }

    #[test]
    fn about_pages_render_from_the_docs_directory() {
        let docs = TempDir::new().unwrap();
        fs::write(docs.path().join("help.gmi"), "# Help\nRead me.").unwrap();
        let mut config = Config::default();
        config.ui.docs_dir = Some(docs.path().to_path_buf());

        let h = harness(config, vec![]);
        let url = "about://gemnav/help.gmi";
        assert!(h.dispatcher.navigate(url));
        assert!(h.fetcher.requests().is_empty(), "about never fetches");
        let html = fs::read_to_string(&h.shell.pages()[0].1).unwrap();
        assert!(html.contains("<h1>Help</h1>"));
        assert_eq!(
            h.session
                .registry()
                .lookup(&ContentKey::for_url(url))
                .as_deref(),
            Some(url)
        );
    }

    #[test]
    fn missing_about_resource_warns() {
        let docs = TempDir::new().unwrap();
        let mut config = Config::default();
        config.ui.docs_dir = Some(docs.path().to_path_buf());

        let h = harness(config, vec![]);
        assert!(!h.dispatcher.navigate("about://gemnav/nope.gmi"));
        let (style, _) = h
            .shell
            .notice_containing("No content was found for")
            .expect("not-found warning");
        assert_eq!(style, Notice::Warning);
    }

    #[test]
    fn about_paths_cannot_escape_the_docs_directory() {
        let docs = TempDir::new().unwrap();
        let mut config = Config::default();
        config.ui.docs_dir = Some(docs.path().join("docs"));
        fs::create_dir_all(docs.path().join("docs")).unwrap();
        fs::write(docs.path().join("secret.gmi"), "# secret").unwrap();

        let h = harness(config, vec![]);
        assert!(!h.dispatcher.navigate("about://gemnav/../secret.gmi"));
        assert!(h.shell.pages().is_empty());
    }
}
