//! Minimal text/gemini line parser backing the built-in converter.

/// One logical line of a gemtext document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// `=> url [label]`
    Link { url: String, label: Option<String> },
    /// `#`..`###`; level is clamped to 1..=3.
    Heading { level: u8, text: String },
    /// `* item`
    Item(String),
    /// `> quoted`
    Quote(String),
    /// Everything between two ``` fences, kept verbatim.
    Pre { alt: String, body: Vec<String> },
    Blank,
}

pub fn parse(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut pre: Option<(String, Vec<String>)> = None;

    for raw in source.lines() {
        if let Some(alt) = raw.strip_prefix("```") {
            match pre.take() {
                Some((alt, body)) => lines.push(Line::Pre { alt, body }),
                None => pre = Some((alt.trim().to_string(), Vec::new())),
            }
            continue;
        }
        if let Some((_, body)) = pre.as_mut() {
            body.push(raw.to_string());
            continue;
        }

        if let Some(rest) = raw.strip_prefix("=>") {
            lines.push(parse_link(rest));
        } else if raw.starts_with('#') {
            let level = raw.chars().take_while(|c| *c == '#').count().min(3) as u8;
            let text = raw[level as usize..].trim().to_string();
            lines.push(Line::Heading { level, text });
        } else if let Some(rest) = raw.strip_prefix("* ") {
            lines.push(Line::Item(rest.to_string()));
        } else if let Some(rest) = raw.strip_prefix('>') {
            lines.push(Line::Quote(rest.trim_start().to_string()));
        } else if raw.trim().is_empty() {
            lines.push(Line::Blank);
        } else {
            lines.push(Line::Text(raw.to_string()));
        }
    }

    // tolerate an unterminated fence
    if let Some((alt, body)) = pre {
        lines.push(Line::Pre { alt, body });
    }
    lines
}

fn parse_link(rest: &str) -> Line {
    let rest = rest.trim_start();
    match rest.split_once(char::is_whitespace) {
        Some((url, label)) => Line::Link {
            url: url.to_string(),
            label: {
                let label = label.trim();
                (!label.is_empty()).then(|| label.to_string())
            },
        },
        None => Line::Link {
            url: rest.to_string(),
            label: None,
        },
    }
}

/// First heading of the document, used as the page title.
pub fn title(lines: &[Line]) -> Option<&str> {
    lines.iter().find_map(|line| match line {
        Line::Heading { text, .. } => Some(text.as_str()),
        _ => None,
    })
}
