use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use log::debug;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::gemtext::{self, Line};
use crate::session::SiteIdentity;

/// Inputs for rendering a gemtext artifact into the displayed HTML page.
pub struct RenderOptions<'a> {
    pub source_url: &'a str,
    pub identity: &'a SiteIdentity,
    /// Theme base path; the template is expected at `{theme}.htm`.
    pub theme: &'a Path,
    /// Show the web-origin banner (self-rendered http content only).
    pub web_banner: bool,
}

/// Seam to the converter service. Non-err results mean the destination
/// file was produced.
pub trait Converter: Send + Sync {
    fn gmi_to_html(&self, gmi: &Path, html: &Path, opts: &RenderOptions<'_>) -> Result<()>;
    fn text_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()>;
    fn html_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()>;
    fn gopher_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()>;
}

/// Drives a directory of external converter tools, one executable per
/// transform. A non-zero exit is a conversion failure with no further
/// detail beyond the code.
pub struct CommandConverter {
    gmi_to_html: PathBuf,
    text_to_gmi: PathBuf,
    html_to_gmi: PathBuf,
    gopher_to_gmi: PathBuf,
}

impl CommandConverter {
    pub fn from_dir(dir: &Path) -> Self {
        CommandConverter {
            gmi_to_html: dir.join("gmitohtml"),
            text_to_gmi: dir.join("txttogmi"),
            html_to_gmi: dir.join("htmltogmi"),
            gopher_to_gmi: dir.join("gophertogmi"),
        }
    }

    fn run(binary: &Path, args: &[&str]) -> Result<()> {
        debug!("convert: {} {:?}", binary.display(), args);
        let status = Command::new(binary)
            .args(args)
            .status()
            .with_context(|| format!("launch converter {}", binary.display()))?;
        match status.code() {
            Some(0) => Ok(()),
            code => Err(anyhow!(
                "converter {} failed with exit code {:?}",
                binary.display(),
                code
            )),
        }
    }
}

impl Converter for CommandConverter {
    fn gmi_to_html(&self, gmi: &Path, html: &Path, opts: &RenderOptions<'_>) -> Result<()> {
        let theme = opts.theme.to_string_lossy().into_owned();
        Self::run(
            &self.gmi_to_html,
            &[
                &gmi.to_string_lossy(),
                &html.to_string_lossy(),
                opts.source_url,
                opts.identity.fingerprint(),
                &theme,
                if opts.web_banner { "web" } else { "native" },
            ],
        )
    }

    fn text_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()> {
        Self::run(
            &self.text_to_gmi,
            &[&raw.to_string_lossy(), &gmi.to_string_lossy()],
        )
    }

    fn html_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()> {
        Self::run(
            &self.html_to_gmi,
            &[&raw.to_string_lossy(), &gmi.to_string_lossy()],
        )
    }

    fn gopher_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()> {
        Self::run(
            &self.gopher_to_gmi,
            &[&raw.to_string_lossy(), &gmi.to_string_lossy()],
        )
    }
}

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{title}}</title>
</head>
<body>
{{banner}}
{{content}}
<hr>
<p class="origin">{{host}} &middot; {{fingerprint}}</p>
</body>
</html>
"#;

static BLOCKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, p, li, pre, blockquote").expect("selector"));
static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("selector"));
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("selector"));

/// Pure-Rust converter used when no external converter tools are
/// configured. Covers the same four transforms.
#[derive(Default)]
pub struct BuiltinConverter;

impl Converter for BuiltinConverter {
    fn gmi_to_html(&self, gmi: &Path, html: &Path, opts: &RenderOptions<'_>) -> Result<()> {
        let source = fs::read_to_string(gmi)
            .with_context(|| format!("read gemtext source {}", gmi.display()))?;
        let lines = gemtext::parse(&source);
        let title = gemtext::title(&lines).unwrap_or(opts.source_url);

        let template_file = opts.theme.with_extension("htm");
        let template = match fs::read_to_string(&template_file) {
            Ok(text) => text,
            Err(_) => DEFAULT_TEMPLATE.to_string(),
        };

        let banner = if opts.web_banner {
            format!(
                "<div class=\"web-banner\">Web content rendered by gemnav &mdash; {}</div>",
                escape(opts.identity.host())
            )
        } else {
            String::new()
        };

        let page = template
            .replace("{{title}}", &escape(title))
            .replace("{{url}}", &escape(opts.source_url))
            .replace("{{host}}", &escape(opts.identity.host()))
            .replace("{{fingerprint}}", opts.identity.fingerprint())
            .replace("{{banner}}", &banner)
            .replace("{{content}}", &render_body(&lines));

        fs::write(html, page).with_context(|| format!("write page {}", html.display()))?;
        Ok(())
    }

    fn text_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()> {
        let text =
            fs::read_to_string(raw).with_context(|| format!("read text {}", raw.display()))?;
        let mut out = String::from("```\n");
        for line in text.lines() {
            // keep fence markers in the body from terminating the block
            if line.starts_with("```") {
                out.push(' ');
            }
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("```\n");
        fs::write(gmi, out).with_context(|| format!("write gemtext {}", gmi.display()))?;
        Ok(())
    }

    fn html_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()> {
        let source =
            fs::read_to_string(raw).with_context(|| format!("read html {}", raw.display()))?;
        let out = extract_gemtext(&source);
        fs::write(gmi, out).with_context(|| format!("write gemtext {}", gmi.display()))?;
        Ok(())
    }

    fn gopher_to_gmi(&self, raw: &Path, gmi: &Path) -> Result<()> {
        let source =
            fs::read_to_string(raw).with_context(|| format!("read gopher map {}", raw.display()))?;
        let out = gopher_map_to_gemtext(&source);
        fs::write(gmi, out).with_context(|| format!("write gemtext {}", gmi.display()))?;
        Ok(())
    }
}

fn render_body(lines: &[Line]) -> String {
    let mut out = String::new();
    let mut in_list = false;
    for line in lines {
        if in_list && !matches!(line, Line::Item(_)) {
            out.push_str("</ul>\n");
            in_list = false;
        }
        match line {
            Line::Text(text) => {
                out.push_str(&format!("<p>{}</p>\n", escape(text)));
            }
            Line::Link { url, label } => {
                let label = label.as_deref().unwrap_or(url);
                out.push_str(&format!(
                    "<p class=\"link\"><a href=\"{}\">{}</a></p>\n",
                    escape(url),
                    escape(label)
                ));
            }
            Line::Heading { level, text } => {
                out.push_str(&format!("<h{0}>{1}</h{0}>\n", level, escape(text)));
            }
            Line::Item(text) => {
                if !in_list {
                    out.push_str("<ul>\n");
                    in_list = true;
                }
                out.push_str(&format!("<li>{}</li>\n", escape(text)));
            }
            Line::Quote(text) => {
                out.push_str(&format!("<blockquote>{}</blockquote>\n", escape(text)));
            }
            Line::Pre { body, .. } => {
                out.push_str("<pre>");
                for line in body {
                    out.push_str(&escape(line));
                    out.push('\n');
                }
                out.push_str("</pre>\n");
            }
            Line::Blank => {}
        }
    }
    if in_list {
        out.push_str("</ul>\n");
    }
    out
}

fn extract_gemtext(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();

    if let Some(title) = document.select(&TITLE).next() {
        let text = collapse(&title.text().collect::<String>());
        if !text.is_empty() {
            out.push_str(&format!("# {text}\n\n"));
        }
    }

    for element in document.select(&BLOCKS) {
        let text = collapse(&element.text().collect::<String>());
        match element.value().name() {
            "h1" => out.push_str(&format!("# {text}\n")),
            "h2" => out.push_str(&format!("## {text}\n")),
            "h3" => out.push_str(&format!("### {text}\n")),
            "li" => out.push_str(&format!("* {text}\n")),
            "blockquote" => out.push_str(&format!("> {text}\n")),
            "pre" => {
                out.push_str("```\n");
                for line in element.text().collect::<String>().lines() {
                    out.push_str(line);
                    out.push('\n');
                }
                out.push_str("```\n");
            }
            _ => {
                if !text.is_empty() {
                    out.push_str(&text);
                    out.push('\n');
                }
                for anchor in anchors_of(element) {
                    out.push_str(&anchor);
                }
            }
        }
    }
    out
}

fn anchors_of(element: ElementRef<'_>) -> Vec<String> {
    element
        .select(&ANCHORS)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let label = collapse(&a.text().collect::<String>());
            Some(if label.is_empty() {
                format!("=> {href}\n")
            } else {
                format!("=> {href} {label}\n")
            })
        })
        .collect()
}

/// Convert a Gopher menu into gemtext; lines without the tab-separated
/// menu shape pass through as plain text.
fn gopher_map_to_gemtext(map: &str) -> String {
    let mut out = String::new();
    for raw in map.lines() {
        let raw = raw.trim_end_matches('\r');
        if raw == "." {
            continue;
        }
        let mut fields = raw.split('\t');
        let head = fields.next().unwrap_or_default();
        let (kind, display) = match head.chars().next() {
            Some(c) => (c, &head[c.len_utf8()..]),
            None => {
                out.push('\n');
                continue;
            }
        };
        let selector = fields.next();
        let host = fields.next();
        let port = fields.next();

        match (kind, selector, host, port) {
            ('i', _, _, _) => {
                out.push_str(display);
                out.push('\n');
            }
            (_, Some(selector), Some(host), Some(port)) => {
                // 'h' items often smuggle a web URL in the selector
                let target = if let Some(web) = selector.strip_prefix("URL:") {
                    web.to_string()
                } else {
                    format!("gopher://{host}:{port}/{kind}{selector}")
                };
                out.push_str(&format!("=> {target} {display}\n"));
            }
            _ => {
                out.push_str(raw);
                out.push('\n');
            }
        }
    }
    out
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
