use std::io::Write;

use anyhow::anyhow;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{Error, Result};
use crate::namespace::NamespaceId;
use crate::session::WikiSession;
use crate::title::contains_reserved_chars;
use crate::transport::ApiRequest;

/// Page metadata as returned by `prop=info`. Fields the wiki sends beyond the
/// named ones are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageAttributes {
    #[serde(rename = "pageid")]
    pub page_id: Option<i64>,
    #[serde(rename = "ns")]
    pub namespace: Option<NamespaceId>,
    /// The title as canonicalized by the wiki itself.
    #[serde(rename = "title")]
    pub real_title: Option<String>,
    pub touched: Option<String>,
    #[serde(rename = "lastrevid")]
    pub last_rev_id: Option<i64>,
    pub counter: Option<Value>,
    pub length: Option<u64>,
    #[serde(rename = "starttimestamp")]
    pub start_timestamp: Option<String>,
    #[serde(rename = "edittoken")]
    pub edit_token: Option<String>,
    #[serde(default)]
    pub protection: Vec<Value>,
    missing: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PageAttributes {
    pub fn exists(&self) -> bool {
        !is_flag_set(self.missing.as_ref())
    }
}

/// Outcome of [`Page::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Nothing changed, no request was made.
    Unchanged,
    /// The wiki's response to the edit request, untouched.
    Edited(Value),
}

#[derive(Debug, Clone)]
struct PageText {
    text: String,
    orig_text: String,
}

impl PageText {
    fn new(text: String) -> Self {
        Self {
            orig_text: text.clone(),
            text,
        }
    }
}

/// One wiki page. Text and attributes are each fetched on first access.
pub struct Page<'s> {
    session: &'s WikiSession,
    title: String,
    text: Option<PageText>,
    attrs: Option<PageAttributes>,
}

impl<'s> Page<'s> {
    pub fn new(title: &str, session: &'s WikiSession) -> Result<Self> {
        if contains_reserved_chars(title) {
            return Err(Error::InvalidTitle(title.to_string()));
        }
        Ok(Self {
            session,
            title: session.cleanup_title(title),
            text: None,
            attrs: None,
        })
    }

    /// Marks the text as loaded with `text`, skipping the round trip.
    pub fn with_preloaded_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(PageText::new(text.into()));
        self
    }

    /// Marks the attributes as loaded, skipping the round trip.
    pub fn preload_attrs(&mut self, attrs: PageAttributes) {
        self.attrs = Some(attrs);
    }

    pub fn session(&self) -> &'s WikiSession {
        self.session
    }

    /// The locally canonicalized title.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_text_loaded(&self) -> bool {
        self.text.is_some()
    }

    pub fn is_attrs_loaded(&self) -> bool {
        self.attrs.is_some()
    }

    /// Fetches the current revision's text. A missing page has empty text.
    pub fn load_text(&mut self) -> Result<()> {
        let text = self.fetch_text()?;
        self.text = Some(PageText::new(text));
        Ok(())
    }

    fn fetch_text(&self) -> Result<String> {
        if self.title.is_empty() {
            return Ok(String::new());
        }
        let response = self.session.api(&ApiRequest::params([
            ("action", "query"),
            ("prop", "revisions"),
            ("rvprop", "content"),
            ("titles", self.title.as_str()),
        ]))?;
        let page = first_page(&response)?;
        if is_flag_set(page.get("missing")) {
            return Ok(String::new());
        }
        if is_flag_set(page.get("invalid")) {
            return Err(Error::InvalidTitle(self.title.clone()));
        }
        let content = revision_content(page)
            .ok_or_else(|| anyhow!("no revision content for {}", self.title))?;
        Ok(content.to_string())
    }

    /// Fetches page metadata, edit token and protection included.
    pub fn load_attrs(&mut self) -> Result<()> {
        let attrs = self.fetch_attrs()?;
        self.attrs = Some(attrs);
        Ok(())
    }

    fn fetch_attrs(&self) -> Result<PageAttributes> {
        let response = self.session.api(&ApiRequest::params([
            ("action", "query"),
            ("prop", "info"),
            ("inprop", "protection"),
            ("intoken", "edit"),
            ("titles", self.title.as_str()),
        ]))?;
        let page = first_page(&response)?;
        let attrs = PageAttributes::deserialize(page)
            .map_err(|error| anyhow!("failed to decode page info for {}: {error}", self.title))?;
        Ok(attrs)
    }

    fn loaded_text(&mut self) -> Result<&mut PageText> {
        let loaded = match self.text.take() {
            Some(loaded) => loaded,
            None => PageText::new(self.fetch_text()?),
        };
        Ok(self.text.insert(loaded))
    }

    pub fn text(&mut self) -> Result<&str> {
        Ok(&self.loaded_text()?.text)
    }

    /// The text as it was when loaded.
    pub fn orig_text(&mut self) -> Result<&str> {
        Ok(&self.loaded_text()?.orig_text)
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.loaded_text()?.text = text.into();
        Ok(())
    }

    /// Whether the text differs from what was loaded. Unloaded text is clean.
    pub fn is_dirty(&self) -> bool {
        self.text
            .as_ref()
            .is_some_and(|loaded| loaded.text != loaded.orig_text)
    }

    pub fn attributes(&mut self) -> Result<&PageAttributes> {
        let attrs = match self.attrs.take() {
            Some(attrs) => attrs,
            None => self.fetch_attrs()?,
        };
        Ok(self.attrs.insert(attrs))
    }

    pub fn page_id(&mut self) -> Result<Option<i64>> {
        Ok(self.attributes()?.page_id)
    }

    pub fn namespace(&mut self) -> Result<Option<NamespaceId>> {
        Ok(self.attributes()?.namespace)
    }

    pub fn real_title(&mut self) -> Result<Option<&str>> {
        Ok(self.attributes()?.real_title.as_deref())
    }

    pub fn edit_token(&mut self) -> Result<Option<&str>> {
        Ok(self.attributes()?.edit_token.as_deref())
    }

    pub fn protection(&mut self) -> Result<&[Value]> {
        Ok(&self.attributes()?.protection)
    }

    // Newer wikis ignore `intoken`; their csrf token works for edits.
    fn ensure_edit_token(&mut self) -> Result<String> {
        if let Some(token) = self.attributes()?.edit_token.clone() {
            return Ok(token);
        }
        let response = self.session.api(&ApiRequest::params([
            ("action", "query"),
            ("meta", "tokens"),
        ]))?;
        let token = response
            .pointer("/query/tokens/csrftoken")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("wiki returned no edit token for {}", self.title))?;
        if let Some(attrs) = self.attrs.as_mut() {
            attrs.edit_token = Some(token.clone());
        }
        Ok(token)
    }

    /// Saves under the current title with the session's default summary.
    pub fn save(&mut self) -> Result<SaveOutcome> {
        self.save_with(None, None)
    }

    /// Saves the current text, optionally under another title or summary.
    /// Nothing is sent when neither the text nor the title changed.
    pub fn save_with(&mut self, title: Option<&str>, summary: Option<&str>) -> Result<SaveOutcome> {
        let target = match title {
            Some(title) if contains_reserved_chars(title) => {
                return Err(Error::InvalidTitle(title.to_string()));
            }
            Some(title) => self.session.cleanup_title(title),
            None => self.title.clone(),
        };
        let summary = summary
            .or_else(|| self.session.summary())
            .filter(|summary| !summary.is_empty())
            .ok_or(Error::EmptySummary)?
            .to_string();

        if !self.is_dirty() && target == self.title {
            info!(title = %target, "page not saved, no changes");
            return Ok(SaveOutcome::Unchanged);
        }

        let token = self.ensure_edit_token()?;
        let text = self.text()?.to_string();
        let response = self.session.api(&ApiRequest::params([
            ("action", "edit"),
            ("bot", "1"),
            ("title", target.as_str()),
            ("text", text.as_str()),
            ("summary", summary.as_str()),
            ("token", token.as_str()),
        ]))?;
        Ok(SaveOutcome::Edited(response))
    }

    /// Writes the current text to `writer`.
    pub fn dump_to<W: Write>(&mut self, mut writer: W) -> Result<()> {
        let text = self.text()?;
        writer.write_all(text.as_bytes())?;
        Ok(())
    }

    /// A file name derived from the title, e.g. `Kategoria_Foo_bar.txt`.
    pub fn dump_file_name(&self) -> String {
        let stem: String = self
            .title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{stem}.txt")
    }
}

// formatversion=1 marks flags with an empty string, formatversion=2 with `true`.
fn is_flag_set(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null) | Some(Value::Bool(false)))
}

fn first_page(response: &Value) -> Result<&Value> {
    let page = match response.pointer("/query/pages") {
        Some(Value::Object(pages)) => pages.values().next(),
        Some(Value::Array(pages)) => pages.first(),
        _ => None,
    };
    page.ok_or_else(|| Error::Transport(anyhow!("response has no query.pages entry")))
}

fn revision_content(page: &Value) -> Option<&str> {
    let revision = page.get("revisions")?.get(0)?;
    ["/*", "/content", "/slots/main/*", "/slots/main/content"]
        .iter()
        .find_map(|pointer| revision.pointer(pointer).and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{Page, PageAttributes, SaveOutcome};
    use crate::error::Error;
    use crate::session::WikiSession;
    use crate::test_support::{ScriptedTransport, siteinfo_response};
    use crate::transport::Transport;

    fn open(host: &str, transport: &ScriptedTransport) -> WikiSession {
        transport.push(siteinfo_response());
        let mut session = WikiSession::with_transport(
            host,
            format!("https://{host}/w/api.php"),
            Box::new(transport.clone()),
        )
        .expect("open session");
        session.set_summary(Some("cleanup".to_string()));
        session
    }

    fn revisions(content: &str) -> Value {
        json!({
            "query": { "pages": { "15580374": {
                "pageid": 15580374, "ns": 0, "title": "Foo bar",
                "revisions": [{ "contentformat": "text/x-wiki", "*": content }]
            } } }
        })
    }

    fn info() -> Value {
        json!({
            "query": { "pages": { "15580374": {
                "pageid": 15580374, "ns": 0, "title": "Foo bar",
                "touched": "2026-01-02T03:04:05Z", "lastrevid": 1234, "length": 11,
                "starttimestamp": "2026-10-18T00:00:00Z", "edittoken": "token+\\",
                "protection": [], "contentmodel": "wikitext"
            } } }
        })
    }

    fn edit_requests(transport: &ScriptedTransport) -> Vec<crate::transport::ApiRequest> {
        transport
            .requests()
            .into_iter()
            .filter(|request| request.get("action").as_deref() == Some("edit"))
            .collect()
    }

    #[test]
    fn reserved_characters_are_rejected_before_any_request() {
        let transport = ScriptedTransport::default();
        let session = open("reserved.page.test", &transport);
        let before = transport.request_count();

        let error = Page::new("A[B", &session).err().expect("must fail");
        assert!(matches!(error, Error::InvalidTitle(title) if title == "A[B"));
        assert_eq!(transport.request_count(), before);
    }

    #[test]
    fn title_is_canonicalized_on_construction() {
        let transport = ScriptedTransport::default();
        let session = open("canonical.page.test", &transport);
        let page = session.page("image:sunflower_(plant).jpg").expect("page");
        assert_eq!(page.title(), "Plik:Sunflower (plant).jpg");
        assert!(!page.is_text_loaded());
        assert!(!page.is_attrs_loaded());
    }

    #[test]
    fn text_loads_once_on_first_access() {
        let transport = ScriptedTransport::default();
        let session = open("lazy.page.test", &transport);
        let mut page = session.page("foo_bar").expect("page");
        let before = transport.request_count();

        transport.push(revisions("Hello world"));
        assert_eq!(page.text().expect("text"), "Hello world");
        assert_eq!(page.orig_text().expect("orig"), "Hello world");
        assert_eq!(page.text().expect("text"), "Hello world");
        assert_eq!(transport.request_count(), before + 1);

        let request = transport.last_request().expect("request");
        assert_eq!(request.get("titles").as_deref(), Some("Foo bar"));
        assert_eq!(request.get("prop").as_deref(), Some("revisions"));
    }

    #[test]
    fn failed_load_leaves_the_page_unloaded() {
        let transport = ScriptedTransport::default();
        let session = open("retry.page.test", &transport);
        let mut page = session.page("Foo bar").expect("page");

        assert!(matches!(page.text(), Err(Error::Transport(_))));
        assert!(!page.is_text_loaded());
        assert!(matches!(page.attributes(), Err(Error::Transport(_))));
        assert!(!page.is_attrs_loaded());

        transport.push(revisions("Hello world"));
        transport.push(info());
        assert_eq!(page.text().expect("text"), "Hello world");
        assert_eq!(page.real_title().expect("title"), Some("Foo bar"));
        assert!(page.is_text_loaded());
        assert!(page.is_attrs_loaded());
    }

    #[test]
    fn missing_page_has_empty_text() {
        let transport = ScriptedTransport::default();
        let session = open("missing.page.test", &transport);
        let mut page = session.page("Nonexistent").expect("page");
        transport.push(json!({
            "query": { "pages": { "-1": { "ns": 0, "title": "Nonexistent", "missing": "" } } }
        }));
        assert_eq!(page.text().expect("text"), "");
    }

    #[test]
    fn invalid_title_from_server_is_an_error() {
        let transport = ScriptedTransport::default();
        let session = open("invalid.page.test", &transport);
        let mut page = session.page("Specjalna:").expect("page");
        transport.push(json!({
            "query": { "pages": [{ "title": "Specjalna:", "invalid": true }] }
        }));
        let error = page.load_text().expect_err("must fail");
        assert!(matches!(error, Error::InvalidTitle(_)));
    }

    #[test]
    fn empty_title_loads_without_a_request() {
        let transport = ScriptedTransport::default();
        let session = open("empty.page.test", &transport);
        let mut page = session.page("   ").expect("page");
        let before = transport.request_count();
        assert_eq!(page.text().expect("text"), "");
        assert_eq!(transport.request_count(), before);
    }

    #[test]
    fn attributes_load_lazily_and_keep_server_title() {
        let transport = ScriptedTransport::default();
        let session = open("attrs.page.test", &transport);
        let mut page = session.page("foo_bar").expect("page");
        let before = transport.request_count();

        transport.push(info());
        assert_eq!(page.page_id().expect("page id"), Some(15580374));
        assert_eq!(page.namespace().expect("ns"), Some(0));
        assert_eq!(page.real_title().expect("title"), Some("Foo bar"));
        assert_eq!(page.edit_token().expect("token"), Some("token+\\"));
        assert!(page.protection().expect("protection").is_empty());

        let attrs = page.attributes().expect("attrs").clone();
        assert!(attrs.exists());
        assert_eq!(attrs.last_rev_id, Some(1234));
        assert_eq!(attrs.extra.get("contentmodel"), Some(&json!("wikitext")));
        assert_eq!(transport.request_count(), before + 1);
    }

    #[test]
    fn unchanged_text_saves_nothing() {
        let transport = ScriptedTransport::default();
        let session = open("noop.page.test", &transport);
        let mut page = session.page("Foo bar").expect("page");

        transport.push(revisions("Hello world"));
        page.set_text("Hello world").expect("set text");
        let before = transport.request_count();

        assert_eq!(page.save().expect("save"), SaveOutcome::Unchanged);
        assert_eq!(transport.request_count(), before);
    }

    #[test]
    fn never_loaded_page_saves_nothing() {
        let transport = ScriptedTransport::default();
        let session = open("untouched.page.test", &transport);
        let mut page = session.page("Foo bar").expect("page");
        let before = transport.request_count();
        assert_eq!(page.save().expect("save"), SaveOutcome::Unchanged);
        assert_eq!(transport.request_count(), before);
    }

    #[test]
    fn changed_text_sends_one_edit() {
        let transport = ScriptedTransport::default();
        let session = open("dirty.page.test", &transport);
        let mut page = session.page("Foo bar").expect("page");

        transport.push(revisions("Hello world"));
        page.set_text("Hello world!").expect("set text");
        assert!(page.is_dirty());

        transport.push(info());
        let edit_result = json!({ "edit": { "result": "Success", "newrevid": 1235 } });
        transport.push(edit_result.clone());

        assert_eq!(page.save().expect("save"), SaveOutcome::Edited(edit_result));

        let edits = edit_requests(&transport);
        assert_eq!(edits.len(), 1);
        let edit = &edits[0];
        assert_eq!(edit.get("text").as_deref(), Some("Hello world!"));
        assert_eq!(edit.get("title").as_deref(), Some("Foo bar"));
        assert_eq!(edit.get("summary").as_deref(), Some("cleanup"));
        assert_eq!(edit.get("token").as_deref(), Some("token+\\"));
        assert_eq!(edit.get("bot").as_deref(), Some("1"));
    }

    #[test]
    fn new_title_sends_an_edit_even_without_text_changes() {
        let transport = ScriptedTransport::default();
        let session = open("move.page.test", &transport);
        let mut page = session
            .page("Foo bar")
            .expect("page")
            .with_preloaded_text("Same text");
        page.preload_attrs(PageAttributes {
            edit_token: Some("t".to_string()),
            ..PageAttributes::default()
        });
        let before = transport.request_count();

        transport.push(json!({ "edit": { "result": "Success" } }));
        let outcome = page
            .save_with(Some("foo_bar_(archive)"), Some("archiving"))
            .expect("save");
        assert!(matches!(outcome, SaveOutcome::Edited(_)));
        assert_eq!(transport.request_count(), before + 1);

        let edit = transport.last_request().expect("edit");
        assert_eq!(edit.get("title").as_deref(), Some("Foo bar (archive)"));
        assert_eq!(edit.get("text").as_deref(), Some("Same text"));
        assert_eq!(edit.get("summary").as_deref(), Some("archiving"));
    }

    #[test]
    fn missing_edit_token_falls_back_to_csrf_token() {
        let transport = ScriptedTransport::default();
        let session = open("csrf.page.test", &transport);
        let mut page = session
            .page("Foo bar")
            .expect("page")
            .with_preloaded_text("old");
        page.set_text("new").expect("set text");

        transport.push(json!({ "query": { "pages": [{ "pageid": 1, "ns": 0, "title": "Foo bar" }] } }));
        transport.push(json!({ "batchcomplete": true, "query": { "tokens": { "csrftoken": "csrf+\\" } } }));
        transport.push(json!({ "edit": { "result": "Success" } }));
        page.save().expect("save");

        let edit = transport.last_request().expect("edit");
        assert_eq!(edit.get("token").as_deref(), Some("csrf+\\"));
        assert_eq!(page.edit_token().expect("token"), Some("csrf+\\"));
    }

    #[test]
    fn save_validates_title_and_summary() {
        let transport = ScriptedTransport::default();
        let mut session = open("validate.page.test", &transport);
        session.set_summary(None);
        let mut page = session
            .page("Foo bar")
            .expect("page")
            .with_preloaded_text("old");
        page.set_text("new").expect("set text");
        let before = transport.request_count();

        let error = page.save().expect_err("must fail");
        assert!(matches!(error, Error::EmptySummary));
        let error = page.save_with(None, Some("")).expect_err("must fail");
        assert!(matches!(error, Error::EmptySummary));
        let error = page
            .save_with(Some("Foo|bar"), Some("summary"))
            .expect_err("must fail");
        assert!(matches!(error, Error::InvalidTitle(_)));
        assert_eq!(transport.request_count(), before);
    }

    #[test]
    fn dump_writes_current_text() {
        let transport = ScriptedTransport::default();
        let session = open("dump.page.test", &transport);
        let mut page = session
            .page("kategoria:Foo bar")
            .expect("page")
            .with_preloaded_text("Zażółć");

        let mut buffer = Vec::new();
        page.dump_to(&mut buffer).expect("dump");
        assert_eq!(String::from_utf8(buffer).expect("utf8"), "Zażółć");
        assert_eq!(page.dump_file_name(), "Kategoria_Foo_bar.txt");
    }
}
