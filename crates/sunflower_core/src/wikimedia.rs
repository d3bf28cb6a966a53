//! Endpoint resolution for wiki URLs and Wikimedia project shorthands.

use crate::error::{Error, Result};

const PROJECT_HOSTS: [(&str, &str); 10] = [
    ("b", "XX.wikibooks.org"),
    ("q", "XX.wikiquote.org"),
    ("n", "XX.wikinews.org"),
    ("w", "XX.wikipedia.org"),
    ("wikt", "XX.wiktionary.org"),
    ("species", "XX.wikispecies.org"),
    ("v", "XX.wikiversity.org"),
    ("s", "XX.wikisource.org"),
    ("commons", "commons.wikimedia.org"),
    ("meta", "meta.wikimedia.org"),
];

/// Converts a shorthand such as `b:pl` (or `pl:b`) into a host such as
/// `pl.wikibooks.org`. Either part may be left out; the project defaults to
/// `w` and the language to `en`.
pub fn resolve_wikimedia_id(id: &str) -> Result<String> {
    let keys: Vec<&str> = id.split(':').filter(|key| !key.is_empty()).collect();
    if keys.len() > 2 {
        return Err(Error::Config(format!("invalid wiki shorthand: {id}")));
    }

    let (projects, languages): (Vec<&str>, Vec<&str>) = keys
        .into_iter()
        .partition(|key| PROJECT_HOSTS.iter().any(|(project, _)| project == key));
    let project = projects.first().copied().unwrap_or("w");
    let language = languages.first().copied().unwrap_or("en");

    let template = PROJECT_HOSTS
        .iter()
        .find(|(candidate, _)| *candidate == project)
        .map(|(_, host)| *host)
        .unwrap_or("XX.wikipedia.org");
    Ok(template.replacen("XX", language, 1))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// The wiki as named by the caller (host, URL, or resolved shorthand).
    pub wiki_url: String,
    pub api_endpoint: String,
}

/// Works out the API endpoint for `url`. Anything containing a dot is taken
/// as a wiki URL and, without an explicit `api_url`, handed to `discover`;
/// anything else is a Wikimedia shorthand using the standard `/w/api.php`.
pub fn resolve_endpoint<F>(url: &str, api_url: Option<&str>, discover: F) -> Result<Endpoint>
where
    F: FnOnce(&str) -> anyhow::Result<String>,
{
    let (wiki_url, endpoint) = if url.contains('.') {
        let endpoint = match api_url {
            Some(api_url) => api_url.to_string(),
            None => discover(url)?,
        };
        (url.to_string(), endpoint)
    } else {
        let host = resolve_wikimedia_id(url)?;
        let endpoint = api_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("http://{host}/w/api.php"));
        (host, endpoint)
    };

    let api_endpoint = match endpoint.strip_prefix("//") {
        Some(rest) => {
            let scheme = wiki_url
                .split_once("://")
                .map_or("http", |(scheme, _)| scheme);
            format!("{scheme}://{rest}")
        }
        None => endpoint,
    };

    Ok(Endpoint {
        wiki_url,
        api_endpoint,
    })
}
