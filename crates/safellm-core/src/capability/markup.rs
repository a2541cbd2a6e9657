//! Markup allow-list sanitization.

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Tags and attributes a sanitizer may keep.
///
/// Attributes listed under `*` are allowed on every kept tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    pub tags: BTreeSet<String>,
    pub attributes: BTreeMap<String, BTreeSet<String>>,
}

impl Allowlist {
    pub fn new<T, S>(tags: T) -> Self
    where
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(|t| t.into().to_lowercase()).collect(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attributes<A, S>(mut self, tag: impl Into<String>, attributes: A) -> Self
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(tag.into().to_lowercase())
            .or_default()
            .extend(attributes.into_iter().map(|a| a.into().to_lowercase()));
        self
    }

    /// Basic inline formatting, no attributes.
    pub fn strict() -> Self {
        Self::new(["p", "br", "strong", "em"])
    }

    /// Block formatting, links and images with a small attribute set.
    pub fn moderate() -> Self {
        Self::new([
            "p", "br", "strong", "em", "u", "b", "i", "h1", "h2", "h3", "h4", "h5", "h6", "ul",
            "ol", "li", "blockquote", "code", "pre", "a", "img",
        ])
        .with_attributes("*", ["class", "id"])
        .with_attributes("a", ["href", "title"])
        .with_attributes("img", ["src", "alt", "title", "width", "height"])
    }

    pub fn allows_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn allows_attribute(&self, tag: &str, attribute: &str) -> bool {
        [tag, "*"].iter().any(|key| {
            self.attributes
                .get(*key)
                .is_some_and(|set| set.contains(attribute))
        })
    }
}

/// Rewrites markup so only allow-listed tags and attributes remain.
///
/// Implementations must be pure and idempotent:
/// `sanitize(sanitize(x)) == sanitize(x)`.
pub trait MarkupSanitizer: Send + Sync {
    fn sanitize(&self, text: &str, allowlist: &Allowlist) -> String;
}

lazy_static! {
    static ref SCRIPT_BLOCK: Regex = Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap();
    static ref STYLE_BLOCK: Regex = Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap();
    static ref COMMENT: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref TAG: Regex = Regex::new(r"<\s*(/?)\s*([a-zA-Z][a-zA-Z0-9]*)([^<>]*)>").unwrap();
    static ref ATTRIBUTE: Regex = Regex::new(
        r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+)))?"#
    ).unwrap();
}

/// Upper bound on sanitizer passes; removing a tag can splice a new one
/// together out of the surrounding text.
const MAX_PASSES: usize = 8;

/// Regex-based [`MarkupSanitizer`].
///
/// Drops `<script>`/`<style>` blocks with their bodies, comments, tags not in
/// the allow-list, attributes not in the allow-list, `on*` event handlers and
/// `javascript:` URLs. Kept tags are re-serialized in a canonical form.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagStripSanitizer;

impl TagStripSanitizer {
    pub fn new() -> Self {
        Self
    }

    fn pass(&self, text: &str, allowlist: &Allowlist) -> String {
        let text = SCRIPT_BLOCK.replace_all(text, "");
        let text = STYLE_BLOCK.replace_all(&text, "");
        let text = COMMENT.replace_all(&text, "");

        TAG.replace_all(&text, |caps: &Captures| {
            let closing = !caps[1].is_empty();
            let tag = caps[2].to_lowercase();

            if !allowlist.allows_tag(&tag) {
                return String::new();
            }
            if closing {
                return format!("</{}>", tag);
            }

            let mut rebuilt = format!("<{}", tag);
            for attr in ATTRIBUTE.captures_iter(&caps[3]) {
                let name = attr[1].to_lowercase();
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .or_else(|| attr.get(4))
                    .map(|m| m.as_str());

                if name.starts_with("on") || !allowlist.allows_attribute(&tag, &name) {
                    continue;
                }
                match value {
                    Some(v) if is_script_url(v) => continue,
                    Some(v) => {
                        rebuilt.push_str(&format!(" {}=\"{}\"", name, v.replace('"', "&quot;")))
                    }
                    None => rebuilt.push_str(&format!(" {}", name)),
                }
            }
            rebuilt.push('>');
            rebuilt
        })
        .into_owned()
    }
}

fn is_script_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}

impl MarkupSanitizer for TagStripSanitizer {
    fn sanitize(&self, text: &str, allowlist: &Allowlist) -> String {
        let mut current = text.to_string();
        for _ in 0..MAX_PASSES {
            let next = self.pass(&current, allowlist);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}
