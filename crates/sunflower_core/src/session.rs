use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Context, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SunflowerConfig;
use crate::continuation::run_continued;
use crate::error::{Error, Result};
use crate::namespace::{NamespaceId, NamespaceRef, NamespaceRegistry};
use crate::page::Page;
use crate::title::{
    CanonicalTitle, CasePolicy, TitleCanonicalizer, TitleOptions, contains_reserved_chars,
};
use crate::transport::{
    ApiRequest, HttpTransport, HttpTransportConfig, Transport, discover_api_endpoint,
};
use crate::wikimedia::{resolve_endpoint, resolve_wikimedia_id};

pub const SITEINFO_PROPS: &str = "general|namespaces|namespacealiases|specialpagealiases|magicwords|interwikimap|dbrepllag|statistics|usergroups|extensions|fileextensions|rightsinfo|languages|skins|extensiontags|functionhooks|showhooks|variables";

static SITEINFO_CACHE: OnceLock<Mutex<HashMap<String, Arc<SiteInfo>>>> = OnceLock::new();

/// Site metadata for one endpoint together with the tables derived from it.
#[derive(Debug)]
pub struct SiteInfo {
    raw: Value,
    registry: NamespaceRegistry,
    case: CasePolicy,
}

impl SiteInfo {
    /// Builds from the `query` object of a siteinfo response.
    pub fn from_query(raw: Value) -> Result<Self> {
        let registry = NamespaceRegistry::build(&raw)?;
        let case = CasePolicy::from_siteinfo(&raw);
        Ok(Self {
            raw,
            registry,
            case,
        })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    pub fn case_policy(&self) -> CasePolicy {
        self.case
    }
}

/// Returns the endpoint's site metadata, fetching it on first use in the process.
fn cached_siteinfo(api_endpoint: &str, transport: &dyn Transport) -> Result<Arc<SiteInfo>> {
    let cache = SITEINFO_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    {
        let guard = cache.lock().map_err(|_| anyhow!("siteinfo cache poisoned"))?;
        if let Some(found) = guard.get(api_endpoint) {
            return Ok(Arc::clone(found));
        }
    }

    debug!(endpoint = api_endpoint, "fetching siteinfo");
    let request = ApiRequest::params([
        ("action", "query"),
        ("meta", "siteinfo"),
        ("siprop", SITEINFO_PROPS),
    ]);
    let mut response = run_continued(transport, request, "siteinfo", "sicontinue", None)?;
    let query = response
        .get_mut("query")
        .map(Value::take)
        .ok_or_else(|| Error::MalformedSiteInfo("siteinfo response has no query".to_string()))?;
    let siteinfo = Arc::new(SiteInfo::from_query(query)?);

    let mut guard = cache.lock().map_err(|_| anyhow!("siteinfo cache poisoned"))?;
    let entry = guard
        .entry(api_endpoint.to_string())
        .or_insert(siteinfo);
    Ok(Arc::clone(entry))
}

/// A connection to one wiki: its endpoint, namespace configuration and the
/// logged-in user, if any.
pub struct WikiSession {
    wiki_url: String,
    api_endpoint: String,
    transport: Box<dyn Transport>,
    siteinfo: Arc<SiteInfo>,
    username: Option<String>,
    is_bot: bool,
    summary: Option<String>,
    warnings: bool,
    credentials: Option<(String, String)>,
}

impl WikiSession {
    /// Opens an HTTP session using the configured wiki URL (or shorthand).
    pub fn connect(config: &SunflowerConfig) -> Result<Self> {
        let url = config
            .wiki_url()
            .ok_or_else(|| Error::Config("no wiki URL configured".to_string()))?;
        let user_agent = config.user_agent();
        let timeout_ms = config.timeout_ms();
        let api_url = config.api_url();

        let endpoint = resolve_endpoint(&url, api_url.as_deref(), |wiki_url| {
            discover_api_endpoint(wiki_url, &user_agent, timeout_ms)
        })?;
        let transport = HttpTransport::new(HttpTransportConfig {
            api_endpoint: endpoint.api_endpoint.clone(),
            user_agent,
            timeout_ms,
        })?;

        let mut session =
            Self::with_transport(endpoint.wiki_url, endpoint.api_endpoint, Box::new(transport))?;
        session.summary = config.summary();
        session.credentials = config.credentials();
        Ok(session)
    }

    /// Opens a session over any transport. Site metadata is fetched through it
    /// unless another session already loaded it for the same endpoint.
    pub fn with_transport(
        wiki_url: impl Into<String>,
        api_endpoint: impl Into<String>,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        let api_endpoint = api_endpoint.into();
        let siteinfo = cached_siteinfo(&api_endpoint, transport.as_ref())?;
        Ok(Self {
            wiki_url: wiki_url.into(),
            api_endpoint,
            transport,
            siteinfo,
            username: None,
            is_bot: false,
            summary: None,
            warnings: true,
            credentials: None,
        })
    }

    pub fn wiki_url(&self) -> &str {
        &self.wiki_url
    }

    pub fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    /// Raw `query` object of the siteinfo response.
    pub fn siteinfo(&self) -> &Value {
        self.siteinfo.raw()
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        self.siteinfo.registry()
    }

    pub fn request_count(&self) -> usize {
        self.transport.request_count()
    }

    /// One API call, response returned as parsed.
    pub fn api(&self, request: &ApiRequest) -> Result<Value> {
        Ok(self.transport.issue_once(request)?)
    }

    /// A continued query; see [`run_continued`].
    pub fn api_continued(
        &self,
        request: ApiRequest,
        field: &str,
        param: &str,
        call_limit: Option<usize>,
    ) -> Result<Value> {
        run_continued(self.transport.as_ref(), request, field, param, call_limit)
    }

    pub fn canonicalizer(&self) -> TitleCanonicalizer<'_> {
        TitleCanonicalizer::new(self.siteinfo.registry(), self.siteinfo.case_policy())
    }

    pub fn canonicalize(&self, raw: &str, options: TitleOptions) -> CanonicalTitle {
        self.canonicalizer().canonicalize(raw, options)
    }

    /// Canonical form of `raw` with default options, as a string.
    pub fn cleanup_title(&self, raw: &str) -> String {
        self.canonicalize(raw, TitleOptions::default()).render()
    }

    /// Localized name of a namespace given by id, canonical name or alias.
    pub fn ns_local_for<'a>(&self, namespace: impl Into<NamespaceRef<'a>>) -> Option<&str> {
        let id = self.namespace_id(namespace.into())?;
        self.namespaces().local_name(id)
    }

    /// Like [`Self::ns_local_for`], but the canonical (English) name.
    pub fn ns_canon_for<'a>(&self, namespace: impl Into<NamespaceRef<'a>>) -> Option<&str> {
        let id = self.namespace_id(namespace.into())?;
        self.namespaces().canonical_name(id)
    }

    pub fn ns_pattern_for<'a>(&self, namespace: impl Into<NamespaceRef<'a>>) -> Option<regex::Regex> {
        let id = self.namespace_id(namespace.into())?;
        self.namespaces().match_pattern(id)
    }

    // Names are cleaned like titles first, so `category_talk` finds `Category talk`.
    fn namespace_id(&self, namespace: NamespaceRef<'_>) -> Option<NamespaceId> {
        match namespace {
            NamespaceRef::Id(id) => Some(id),
            NamespaceRef::Name(name) => {
                let cleaned = self.cleanup_title(name);
                self.namespaces().resolve(cleaned.as_str())
            }
        }
    }

    pub fn page(&self, title: &str) -> Result<Page<'_>> {
        Page::new(title, self)
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn set_summary(&mut self, summary: Option<String>) {
        self.summary = summary;
    }

    pub fn warnings(&self) -> bool {
        self.warnings
    }

    pub fn set_warnings(&mut self, warnings: bool) {
        self.warnings = warnings;
    }

    /// Credentials `login` falls back to when called with empty values.
    pub fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.credentials = Some((username.into(), password.into()));
    }

    pub fn logged_in(&self) -> bool {
        self.username.is_some()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn require_user(&self) -> Result<&str> {
        self.username.as_deref().ok_or(Error::NotLoggedIn)
    }

    pub fn is_bot(&self) -> bool {
        self.is_bot
    }

    /// Logs in, then checks the login took and whether the user is a bot.
    /// Empty arguments fall back to the configured credentials.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let (username, password) = if username.is_empty() || password.is_empty() {
            let (fallback_user, fallback_password) = self.credentials.clone().ok_or_else(|| {
                Error::AuthenticationFailed(
                    "no user/pass supplied and no credentials configured".to_string(),
                )
            })?;
            (
                if username.is_empty() { fallback_user } else { username.to_string() },
                if password.is_empty() { fallback_password } else { password.to_string() },
            )
        } else {
            (username.to_string(), password.to_string())
        };

        if contains_reserved_chars(&username) {
            return Err(Error::InvalidUsername(username));
        }

        let token_response = self.api(&ApiRequest::params([
            ("action", "query"),
            ("meta", "tokens"),
            ("type", "login"),
        ]))?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| Error::AuthenticationFailed("no login token received".to_string()))?;

        let login_response = self.api(&ApiRequest::params([
            ("action", "login"),
            ("lgname", username.as_str()),
            ("lgpassword", password.as_str()),
            ("lgtoken", login_token.as_str()),
        ]))?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        if login_payload.login.result.as_deref() != Some("Success") {
            let reason = login_payload
                .login
                .reason
                .or(login_payload.login.result)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(Error::AuthenticationFailed(reason));
        }

        // Verification failures leave the session anonymous.
        self.username = None;
        self.is_bot = false;

        let watchlist = self.api(&ApiRequest::params([
            ("action", "query"),
            ("list", "watchlistraw"),
        ]))?;
        if watchlist.pointer("/error/code").and_then(Value::as_str) == Some("wrnotloggedin") {
            return Err(Error::AuthenticationFailed(
                "session not logged in after login".to_string(),
            ));
        }

        let bots = self.api(&ApiRequest::params([
            ("action", "query"),
            ("list", "allusers"),
            ("aulimit", "1"),
            ("augroup", "bot"),
            ("aufrom", username.as_str()),
        ]))?;
        let is_bot = bots.pointer("/query/allusers/0/name").and_then(Value::as_str)
            == Some(username.as_str());

        info!(user = %username, wiki = %self.wiki_url, "logged in");
        if !is_bot && self.warnings {
            warn!(user = %username, "this user does not have bot rights");
        }
        self.username = Some(username);
        self.is_bot = is_bot;

        Ok(())
    }
}

impl fmt::Display for WikiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sunflower {}@{}",
            self.username.as_deref().unwrap_or("[anon]"),
            self.wiki_url
        )?;
        if self.is_bot {
            f.write_str(" [bot]")?;
        }
        Ok(())
    }
}

/// Open sessions keyed by wiki URL, for callers juggling several wikis.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<String, WikiSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session, replacing any earlier one for the same wiki.
    pub fn insert(&mut self, session: WikiSession) -> &mut WikiSession {
        match self.sessions.entry(session.wiki_url().to_string()) {
            Entry::Occupied(mut entry) => {
                entry.insert(session);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(session),
        }
    }

    /// Finds a session by wiki URL or Wikimedia shorthand.
    pub fn get(&self, wiki: &str) -> Result<&WikiSession> {
        let key = registry_key(wiki)?;
        self.sessions
            .get(&key)
            .ok_or(Error::UnknownSession(key))
    }

    /// The only open session; an error when there are none or several.
    pub fn only(&self) -> Result<&WikiSession> {
        let mut sessions = self.sessions.values();
        match (sessions.next(), sessions.next()) {
            (Some(session), None) => Ok(session),
            (None, _) => Err(Error::NoSession),
            (Some(_), Some(_)) => Err(Error::AmbiguousSession),
        }
    }

    pub fn page(&self, title: &str, wiki: Option<&str>) -> Result<Page<'_>> {
        let session = match wiki {
            Some(wiki) => self.get(wiki)?,
            None => self.only()?,
        };
        Page::new(title, session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn registry_key(wiki: &str) -> Result<String> {
    if wiki.contains('.') {
        Ok(wiki.to_string())
    } else {
        resolve_wikimedia_id(wiki)
    }
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}
