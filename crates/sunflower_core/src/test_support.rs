use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::bail;
use serde_json::{Value, json};

use crate::transport::{ApiRequest, Transport};

/// Replays queued responses in order and records every request it sees.
/// Clones share the same queue and log.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    responses: Rc<RefCell<VecDeque<Value>>>,
    requests: Rc<RefCell<Vec<ApiRequest>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<Value>) -> Self {
        let transport = Self::default();
        transport.responses.borrow_mut().extend(responses);
        transport
    }

    pub(crate) fn push(&self, response: Value) {
        self.responses.borrow_mut().push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.borrow().clone()
    }

    pub(crate) fn last_request(&self) -> Option<ApiRequest> {
        self.requests.borrow().last().cloned()
    }
}

impl Transport for ScriptedTransport {
    fn issue_once(&self, request: &ApiRequest) -> anyhow::Result<Value> {
        self.requests.borrow_mut().push(request.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(response) => Ok(response),
            None => bail!("no scripted response left"),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

/// The `query` object of a siteinfo response for a Polish-language wiki.
pub(crate) fn siteinfo_query() -> Value {
    json!({
        "general": { "sitename": "Wikipedia", "case": "first-letter" },
        "namespaces": {
            "-1": { "id": -1, "case": "first-letter", "canonical": "Special", "*": "Specjalna" },
            "0": { "id": 0, "case": "first-letter", "*": "", "content": "" },
            "1": { "id": 1, "case": "first-letter", "canonical": "Talk", "*": "Dyskusja" },
            "4": { "id": 4, "case": "first-letter", "canonical": "Project", "*": "Wikipedia" },
            "6": { "id": 6, "case": "first-letter", "canonical": "File", "*": "Plik" },
            "10": { "id": 10, "case": "first-letter", "canonical": "Template", "*": "Szablon" },
            "14": { "id": 14, "case": "first-letter", "canonical": "Category", "*": "Kategoria" }
        },
        "namespacealiases": [
            { "id": 6, "*": "Image" },
            { "id": 6, "*": "Grafika" },
            { "id": 4, "*": "WP" }
        ]
    })
}

pub(crate) fn siteinfo_response() -> Value {
    json!({ "query": siteinfo_query() })
}
