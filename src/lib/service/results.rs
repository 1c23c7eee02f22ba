use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    error::Result,
    event::RequestEvent,
    permissions::Identity,
    request::Request,
    request_type::RequestType,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Links(BTreeMap<String, Value>);

impl Links {
    fn insert(&mut self, name: &str, href: impl Into<Value>) {
        self.0.insert(name.to_string(), href.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

/// A request as returned to callers: the stored record plus `is_open` and
/// links to the actions that can run from its current status.
#[derive(Debug, Clone, Serialize)]
pub struct RequestItem {
    #[serde(flatten)]
    pub request: Request,
    pub is_open: bool,
    pub links: Links,
}

impl RequestItem {
    pub(crate) fn new(request: Request, kind: &RequestType, identity: &Identity) -> Result<Self> {
        let is_open = kind.is_open(&request.status)?;
        let base = format!("/requests/{}", request.id);
        let mut actions = serde_json::Map::new();
        for name in kind.action_names() {
            let handler = kind.resolve_action(name, request.clone())?;
            if handler.can_execute(identity) {
                actions.insert(name.to_string(), json!(format!("{base}/actions/{name}")));
            }
        }
        let mut links = Links::default();
        links.insert("self", base.clone());
        links.insert("timeline", format!("{base}/timeline"));
        links.insert("actions", Value::Object(actions));
        Ok(Self {
            request,
            is_open,
            links,
        })
    }

    pub fn revision_id(&self) -> u64 {
        self.request.revision_id
    }
}

/// Search document for a request.
pub(crate) fn request_document(request: &Request, kind: &RequestType) -> Result<Value> {
    let mut document = serde_json::to_value(request)?;
    if let Value::Object(map) = &mut document {
        map.insert("is_open".to_string(), Value::Bool(kind.is_open(&request.status)?));
    }
    Ok(document)
}

#[derive(Debug, Clone, Serialize)]
pub struct EventItem {
    #[serde(flatten)]
    pub event: RequestEvent,
    pub links: Links,
}

impl EventItem {
    pub(crate) fn new(event: RequestEvent) -> Self {
        let mut links = Links::default();
        links.insert(
            "self",
            format!("/requests/{}/timeline/{}", event.request_id, event.id),
        );
        Self { event, links }
    }

    pub fn revision_id(&self) -> u64 {
        self.event.revision_id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HitList<T> {
    pub hits: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultList<T> {
    pub hits: HitList<T>,
    #[serde(rename = "sortBy")]
    pub sort_by: &'static str,
    pub links: Links,
}

impl<T> ResultList<T> {
    pub(crate) fn new(
        hits: Vec<T>,
        total: usize,
        sort_by: &'static str,
        base: &str,
        page: usize,
        size: usize,
    ) -> Self {
        let mut links = Links::default();
        let href = |page: usize| format!("{base}?page={page}&size={size}&sort={sort_by}");
        links.insert("self", href(page));
        if page > 1 {
            links.insert("prev", href(page - 1));
        }
        if page.saturating_mul(size) < total {
            links.insert("next", href(page + 1));
        }
        Self {
            hits: HitList { hits, total },
            sort_by,
            links,
        }
    }

    pub fn empty(sort_by: &'static str, base: &str, size: usize) -> Self {
        Self::new(Vec::new(), 0, sort_by, base, 1, size)
    }

    pub fn total(&self) -> usize {
        self.hits.total
    }

    pub fn items(&self) -> &[T] {
        &self.hits.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_type::generic_request;

    #[test]
    fn request_item_links_executable_actions_only() {
        let kind = generic_request().unwrap();
        let request = Request::new("5".into(), kind.type_id(), "draft");
        let item = RequestItem::new(request, &kind, &Identity::anonymous()).unwrap();
        assert!(item.is_open);
        let actions = item.links.get("actions").unwrap();
        assert_eq!(actions["submit"], "/requests/5/actions/submit");
        assert_eq!(actions["cancel"], "/requests/5/actions/cancel");
        assert!(actions.get("accept").is_none());
    }

    #[test]
    fn request_projection_flattens_the_record() {
        let kind = generic_request().unwrap();
        let request = Request::new("5".into(), kind.type_id(), "accepted");
        let item = RequestItem::new(request, &kind, &Identity::anonymous()).unwrap();
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["id"], "5");
        assert_eq!(value["is_open"], false);
        assert_eq!(value["links"]["self"], "/requests/5");
    }

    #[test]
    fn list_links_page_forward_and_back() {
        let list: ResultList<u8> = ResultList::new(vec![1, 2], 5, "newest", "/requests", 2, 2);
        assert!(list.links.get("prev").is_some());
        assert_eq!(
            list.links.get("next").unwrap(),
            "/requests?page=3&size=2&sort=newest"
        );
        let last: ResultList<u8> = ResultList::new(vec![1], 5, "newest", "/requests", 3, 2);
        assert!(last.links.get("next").is_none());
    }
}
