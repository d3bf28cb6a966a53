use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

pub type NamespaceId = i32;

pub const NS_MAIN: NamespaceId = 0;
pub const NS_CATEGORY: NamespaceId = 14;

/// A namespace given either by number or by any of its names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceRef<'a> {
    Id(NamespaceId),
    Name(&'a str),
}

impl From<NamespaceId> for NamespaceRef<'_> {
    fn from(id: NamespaceId) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a str> for NamespaceRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

/// Lookup tables between namespace ids, canonical (English) names, localized
/// names and aliases. Content namespaces are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceRegistry {
    name_to_id: BTreeMap<String, NamespaceId>,
    id_to_canonical: BTreeMap<NamespaceId, String>,
    id_to_local: BTreeMap<NamespaceId, String>,
}

impl NamespaceRegistry {
    /// Builds the registry from the `query` object of a siteinfo response
    /// (the object holding `namespaces` and `namespacealiases`).
    pub fn build(siteinfo: &Value) -> Result<Self> {
        let namespaces = siteinfo
            .get("namespaces")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::MalformedSiteInfo("missing namespaces".to_string()))?;
        let aliases = siteinfo
            .get("namespacealiases")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::MalformedSiteInfo("missing namespacealiases".to_string()))?;

        let mut registry = Self::default();
        for (key, entry) in namespaces {
            let raw: RawNamespace = serde_json::from_value(entry.clone()).map_err(|error| {
                Error::MalformedSiteInfo(format!("namespace {key}: {error}"))
            })?;
            if raw.is_content() {
                continue;
            }
            let local = raw
                .local
                .or(raw.name)
                .ok_or_else(|| Error::MalformedSiteInfo(format!("namespace {key}: no name")))?;
            let canonical = raw.canonical.ok_or_else(|| {
                Error::MalformedSiteInfo(format!("namespace {key}: no canonical name"))
            })?;

            registry.name_to_id.insert(canonical.to_lowercase(), raw.id);
            registry.name_to_id.insert(local.to_lowercase(), raw.id);
            registry.id_to_canonical.insert(raw.id, canonical);
            registry.id_to_local.insert(raw.id, local);
        }

        for entry in aliases {
            let raw: RawAlias = serde_json::from_value(entry.clone())
                .map_err(|error| Error::MalformedSiteInfo(format!("namespace alias: {error}")))?;
            let alias = raw
                .text
                .or(raw.alias)
                .ok_or_else(|| Error::MalformedSiteInfo("namespace alias without text".into()))?;
            registry.name_to_id.insert(alias.to_lowercase(), raw.id);
        }

        Ok(registry)
    }

    /// Resolves a namespace number or a case-insensitive name/alias.
    pub fn resolve<'a>(&self, namespace: impl Into<NamespaceRef<'a>>) -> Option<NamespaceId> {
        match namespace.into() {
            NamespaceRef::Id(id) => self.id_to_local.contains_key(&id).then_some(id),
            NamespaceRef::Name(name) => self.name_to_id.get(&name.trim().to_lowercase()).copied(),
        }
    }

    pub fn local_name(&self, id: NamespaceId) -> Option<&str> {
        self.id_to_local.get(&id).map(String::as_str)
    }

    pub fn canonical_name(&self, id: NamespaceId) -> Option<&str> {
        self.id_to_canonical.get(&id).map(String::as_str)
    }

    /// Case-insensitive pattern matching every name and alias of the namespace.
    /// Underscores and percent-encoding are not handled.
    pub fn match_pattern<'a>(&self, namespace: impl Into<NamespaceRef<'a>>) -> Option<Regex> {
        let id = match namespace.into() {
            NamespaceRef::Id(id) => id,
            NamespaceRef::Name(name) => self.resolve(name)?,
        };
        let names: Vec<String> = self
            .name_to_id
            .iter()
            .filter(|(_, candidate)| **candidate == id)
            .map(|(name, _)| regex::escape(name))
            .collect();
        if names.is_empty() {
            return None;
        }
        RegexBuilder::new(&names.join("|"))
            .case_insensitive(true)
            .build()
            .ok()
    }

    pub fn ids(&self) -> impl Iterator<Item = NamespaceId> + '_ {
        self.id_to_local.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.id_to_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_local.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawNamespace {
    id: NamespaceId,
    canonical: Option<String>,
    #[serde(rename = "*")]
    local: Option<String>,
    name: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

impl RawNamespace {
    // formatversion=1 flags with an empty string, formatversion=2 with a bool.
    fn is_content(&self) -> bool {
        !matches!(self.content, None | Some(Value::Bool(false)) | Some(Value::Null))
    }
}

#[derive(Debug, Deserialize)]
struct RawAlias {
    id: NamespaceId,
    #[serde(rename = "*")]
    text: Option<String>,
    alias: Option<String>,
}
