use std::fmt;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;

use crate::namespace::NamespaceRegistry;

/// Characters MediaWiki never permits in a page title.
pub const RESERVED_TITLE_CHARS: [char; 8] = ['#', '<', '>', '[', ']', '|', '{', '}'];

static BIDI_MARKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{200E}\u{200F}\u{202A}-\u{202E}]").expect("bidi regex"));
static UNICODE_SPACES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u{00A0}\u{1680}\u{180E}\u{2000}-\u{200A}\u{2028}\u{2029}\u{202F}\u{205F}\u{3000}]+")
        .expect("space regex")
});
static SPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ _]+").expect("run regex"));
static ANCHOR_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.([0-9a-fA-F]{2})").expect("anchor regex"));

pub fn contains_reserved_chars(title: &str) -> bool {
    title.contains(RESERVED_TITLE_CHARS)
}

/// The wiki's `general.case` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasePolicy {
    FirstLetter,
    CaseSensitive,
}

impl CasePolicy {
    /// Reads `general.case` from the `query` object of a siteinfo response.
    pub fn from_siteinfo(siteinfo: &Value) -> Self {
        match siteinfo.pointer("/general/case").and_then(Value::as_str) {
            Some("first-letter") => Self::FirstLetter,
            _ => Self::CaseSensitive,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TitleOptions {
    pub preserve_case: bool,
    pub preserve_colon: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalTitle {
    pub leading_colon: bool,
    /// Localized namespace name, without the trailing colon.
    pub namespace: Option<String>,
    pub name: String,
    pub anchor: Option<String>,
}

impl CanonicalTitle {
    /// An empty title stands for "no such page".
    pub fn is_empty(&self) -> bool {
        !self.leading_colon
            && self.namespace.is_none()
            && self.name.is_empty()
            && self.anchor.is_none()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CanonicalTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.leading_colon {
            f.write_str(":")?;
        }
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}:")?;
        }
        f.write_str(&self.name)?;
        if let Some(anchor) = &self.anchor {
            write!(f, "#{anchor}")?;
        }
        Ok(())
    }
}

/// Normalizes raw titles the way the wiki itself would: Unicode cleanup,
/// percent-decoding, underscore folding, namespace prefixes and first-letter case.
#[derive(Debug, Clone, Copy)]
pub struct TitleCanonicalizer<'a> {
    registry: &'a NamespaceRegistry,
    case: CasePolicy,
}

impl<'a> TitleCanonicalizer<'a> {
    pub fn new(registry: &'a NamespaceRegistry, case: CasePolicy) -> Self {
        Self { registry, case }
    }

    pub fn canonicalize(&self, raw: &str, options: TitleOptions) -> CanonicalTitle {
        let title = BIDI_MARKS.replace_all(raw, "");
        let title = UNICODE_SPACES.replace_all(&title, " ");
        if title.trim().is_empty() {
            return CanonicalTitle::default();
        }

        let (name, anchor) = match title.split_once('#') {
            Some((name, anchor)) => (name, Some(anchor)),
            None => (&title[..], None),
        };

        let mut name = fold_spaces(&percent_decode(name));
        let anchor = anchor.map(|anchor| {
            let escaped = ANCHOR_ESCAPE.replace_all(anchor, "%$1");
            fold_spaces(&percent_decode(&escaped))
        });

        let mut leading_colon = false;
        if let Some(stripped) = name.strip_prefix(':') {
            leading_colon = true;
            name = stripped.trim_start().to_string();
        }
        if !options.preserve_colon {
            leading_colon = false;
        }

        let mut namespace = None;
        if let Some((maybe_namespace, rest)) = name.split_once(':')
            && let Some(id) = self.registry.resolve(maybe_namespace.trim())
            && let Some(local) = self.registry.local_name(id)
        {
            namespace = Some(local.to_string());
            name = rest.trim().to_string();
        }

        if !options.preserve_case && self.case == CasePolicy::FirstLetter {
            name = upcase_first(&name);
        }

        CanonicalTitle {
            leading_colon,
            namespace,
            name,
            anchor,
        }
    }
}

// Resolves `%XX` escapes only; `+` stays literal.
fn percent_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

fn fold_spaces(value: &str) -> String {
    SPACE_RUNS.replace_all(value, " ").trim().to_string()
}

fn upcase_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
