// tools/discovery.rs - URL discovery sources for the gather stage
// Purpose: waybackurls, gau and katana argument building and JS URL extraction

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

/// Static asset extensions never treated as JavaScript.
pub const EXCLUDED_EXTENSIONS: &[&str] = &[
    ".css", ".png", ".jpg", ".jpeg", ".svg", ".ico", ".gif", ".woff", ".woff2", ".swf",
];

lazy_static! {
    static ref JS_URL_RE: Regex =
        Regex::new(r#"(?i)https?://[^\s<>"'()]+\.js(?:\?[^\s<>"'()]*)?(?:#[^\s<>"'()]*)?"#)
            .expect("valid JS URL regex");
}

pub trait DiscoverySource: Send + Sync {
    fn tool_id(&self) -> &str;

    fn program(&self) -> &str {
        self.tool_id()
    }

    fn args(&self, target: &str) -> Vec<String>;

    /// Sources that read their seed list from standard input.
    fn stdin(&self, _target: &str) -> Option<String> {
        None
    }

    fn parse(&self, stdout: &str) -> BTreeSet<String> {
        extract_js_urls(stdout)
    }
}

pub struct Waybackurls;

impl DiscoverySource for Waybackurls {
    fn tool_id(&self) -> &str {
        "waybackurls"
    }

    fn args(&self, _target: &str) -> Vec<String> {
        Vec::new()
    }

    fn stdin(&self, target: &str) -> Option<String> {
        Some(format!("{}\n", target))
    }
}

pub struct Gau;

impl DiscoverySource for Gau {
    fn tool_id(&self) -> &str {
        "gau"
    }

    fn args(&self, target: &str) -> Vec<String> {
        vec!["--subs".to_string(), target.to_string()]
    }
}

pub struct Katana {
    pub depth: u32,
}

impl DiscoverySource for Katana {
    fn tool_id(&self) -> &str {
        "katana"
    }

    fn args(&self, target: &str) -> Vec<String> {
        let seed = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("https://{}", target)
        };
        vec![
            "-u".to_string(),
            seed,
            "-jc".to_string(),
            "-d".to_string(),
            self.depth.to_string(),
            "-silent".to_string(),
        ]
    }
}

/// Sources selected by a mode string: `w` waybackurls, `g` gau, `k` katana.
pub fn sources_for_mode(mode: &str, depth: u32) -> Vec<Box<dyn DiscoverySource>> {
    let mut sources: Vec<Box<dyn DiscoverySource>> = Vec::new();
    if mode.contains('w') {
        sources.push(Box::new(Waybackurls));
    }
    if mode.contains('g') {
        sources.push(Box::new(Gau));
    }
    if mode.contains('k') {
        sources.push(Box::new(Katana { depth }));
    }
    sources
}

/// Pull http(s) JavaScript URLs out of free-form tool output.
pub fn extract_js_urls(content: &str) -> BTreeSet<String> {
    let mut urls = BTreeSet::new();

    for m in JS_URL_RE.find_iter(content) {
        // `.js` must end the path segment: reject `.json`, `.jsx` and friends
        let next = content[m.end()..].chars().next();
        if next.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            continue;
        }

        let url = m.as_str();
        let lower = url.to_lowercase();
        if EXCLUDED_EXTENSIONS.iter().any(|ext| lower.contains(ext)) {
            continue;
        }
        if let Ok(parsed) = url::Url::parse(url) {
            if parsed.host_str().is_some() {
                urls.insert(url.to_string());
            }
        }
    }

    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_js_urls() {
        let output = "\
https://example.com/static/app.js
https://example.com/static/app.js?v=3
https://example.com/data.json
https://example.com/style.css
not a url app.js
http://cdn.example.com/lib/vendor.min.js#map
https://example.com/img/logo.png.js
";
        let urls = extract_js_urls(output);
        assert!(urls.contains("https://example.com/static/app.js"));
        assert!(urls.contains("https://example.com/static/app.js?v=3"));
        assert!(urls.contains("http://cdn.example.com/lib/vendor.min.js#map"));
        assert!(!urls.iter().any(|u| u.contains("data.json")));
        assert!(!urls.iter().any(|u| u.contains("logo.png")));
        assert_eq!(urls.len(), 3);
    }

    #[test]
    fn test_sources_for_mode() {
        let ids: Vec<String> = sources_for_mode("wk", 3)
            .iter()
            .map(|s| s.tool_id().to_string())
            .collect();
        assert_eq!(ids, vec!["waybackurls", "katana"]);
    }

    #[test]
    fn test_katana_args() {
        let args = Katana { depth: 2 }.args("example.com");
        assert_eq!(args[1], "https://example.com");
        assert!(args.contains(&"-jc".to_string()));
    }
}
