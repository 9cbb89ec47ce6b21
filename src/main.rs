use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use gemnav::config::{self, LoadOptions};
use gemnav::convert::{BuiltinConverter, CommandConverter, Converter};
use gemnav::fetch::CommandFetcher;
use gemnav::nav::{Dispatcher, Notice, Shell};
use gemnav::session::Session;

fn main() {
    env_logger::init();

    let mut url = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("gemnav {}", gemnav::VERSION);
                return;
            }
            "--help" | "-h" => {
                println!(
                    "gemnav: navigation engine for Gemini space.\n\nUsage: gemnav [URL]\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n\nWithout a URL the configured home page is fetched."
                );
                return;
            }
            other => url = Some(other.to_string()),
        }
    }

    match run(url) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(1);
        }
    }
}

fn run(url: Option<String>) -> Result<bool> {
    let cfg = config::load(LoadOptions::default())?;
    let target = url.unwrap_or_else(|| cfg.engine.home_url.clone());

    let session = Arc::new(Session::new()?);
    let fetcher = Arc::new(CommandFetcher::new(cfg.tools.fetcher.clone()));
    let converter: Arc<dyn Converter> = match cfg.tools.converter_dir.as_deref() {
        Some(dir) => Arc::new(CommandConverter::from_dir(dir)),
        None => Arc::new(BuiltinConverter),
    };
    let shell = Arc::new(ConsoleShell);

    let dispatcher = Dispatcher::new(cfg, session, fetcher, converter, shell);
    Ok(dispatcher.navigate(&target))
}

/// One-shot shell for driving the engine from a terminal: notifications
/// go to stderr, the rendered artifact path to stdout.
struct ConsoleShell;

impl Shell for ConsoleShell {
    fn notify(&self, message: &str, style: Notice) {
        let tag = match style {
            Notice::Info => "info",
            Notice::Success => "ok",
            Notice::Warning => "warning",
            Notice::Error => "error",
        };
        eprintln!("[{tag}] {message}");
    }

    fn set_busy(&self, _busy: bool) {}

    fn show_page(&self, _url: &str, artifact: &Path) {
        println!("{}", artifact.display());
    }

    fn show_image(&self, _url: &str, file: &Path) {
        println!("{}", file.display());
    }

    fn prompt_input(&self, prompt: &str) -> Option<String> {
        eprintln!("{prompt}");
        eprint!("> ");
        io::stderr().flush().ok();
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        let line = line.trim().to_string();
        (!line.is_empty()).then_some(line)
    }

    fn prompt_save_path(&self, suggested_name: &str) -> Option<PathBuf> {
        // non-interactive: drop downloads next to the caller
        Some(PathBuf::from(suggested_name))
    }

    fn set_address(&self, _url: &str) {}
}
