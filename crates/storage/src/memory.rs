//! In-memory [`ComponentStore`], used by tests and dry runs.
//!
//! Leaves are kept in insertion order, collections as the raw payload last
//! written. Every push is recorded so callers can assert on the exact
//! sequence of writes a migration performed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use conveyor_interchange::{xml, ComponentKind, Version};
use tracing::debug;

use crate::error::StoreError;
use crate::record::{PushRequest, PushResponse};
use crate::traits::ComponentStore;

#[derive(Debug, Default)]
struct State {
    leaves: BTreeMap<ComponentKind, Vec<(String, String)>>,
    collections: HashMap<ComponentKind, String>,
    puts: Vec<PushRequest>,
    rejected: HashSet<(ComponentKind, Option<String>)>,
    unavailable: bool,
    logins: usize,
    session: bool,
}

#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    version: Version,
    state: Mutex<State>,
}

/// Payload of an empty collection of `kind`.
pub fn empty_collection(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::PipelineTag | ComponentKind::InterPipelineDependency => "<set/>",
        ComponentKind::PipelinePruningSetting => "<map/>",
        _ => "<list/>",
    }
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        MemoryStore {
            name: name.into(),
            version,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a payload directly, bypassing the push log.
    pub fn seed(&self, kind: ComponentKind, content: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if kind.is_leaf() {
            let root = xml::parse(content)?;
            let id = root.child_text("id").unwrap_or_default().trim().to_string();
            upsert(state.leaves.entry(kind).or_default(), id, content.to_string());
        } else {
            state.collections.insert(kind, content.to_string());
        }
        Ok(())
    }

    /// Make pushes of this leaf (or, with `id` of `None`, of this
    /// collection) come back rejected.
    pub fn reject(&self, kind: ComponentKind, id: Option<&str>) {
        self.state().rejected.insert((kind, id.map(str::to_string)));
    }

    pub fn set_available(&self, available: bool) {
        self.state().unavailable = !available;
    }

    /// Every push received, in order.
    pub fn puts(&self) -> Vec<PushRequest> {
        self.state().puts.clone()
    }

    pub fn login_count(&self) -> usize {
        self.state().logins
    }

    pub fn leaf_ids(&self, kind: ComponentKind) -> Vec<String> {
        self.state()
            .leaves
            .get(&kind)
            .map(|l| l.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    fn check_available(&self, state: &State) -> Result<(), StoreError> {
        if state.unavailable {
            return Err(StoreError::Unavailable {
                system: self.name.clone(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

fn upsert(entries: &mut Vec<(String, String)>, id: String, content: String) {
    match entries.iter_mut().find(|(existing, _)| *existing == id) {
        Some(slot) => slot.1 = content,
        None => entries.push((id, content)),
    }
}

impl ComponentStore for MemoryStore {
    fn login(&self) -> Result<(), StoreError> {
        let mut state = self.state();
        self.check_available(&state)?;
        state.logins += 1;
        state.session = true;
        Ok(())
    }

    fn logout(&self) -> Result<(), StoreError> {
        self.state().session = false;
        Ok(())
    }

    fn server_version(&self) -> Result<Version, StoreError> {
        self.check_available(&self.state())?;
        Ok(self.version)
    }

    fn fetch(&self, kind: ComponentKind, id: &str) -> Result<String, StoreError> {
        let state = self.state();
        self.check_available(&state)?;
        state
            .leaves
            .get(&kind)
            .and_then(|l| l.iter().find(|(existing, _)| existing == id))
            .map(|(_, content)| content.clone())
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    fn fetch_all(&self, kind: ComponentKind) -> Result<String, StoreError> {
        let state = self.state();
        self.check_available(&state)?;
        if kind.is_leaf() {
            let mut out = String::from("<list>\n");
            for (_, content) in state.leaves.get(&kind).into_iter().flatten() {
                out.push_str(content);
                out.push('\n');
            }
            out.push_str("</list>");
            return Ok(out);
        }
        Ok(state
            .collections
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| empty_collection(kind).to_string()))
    }

    fn put(&self, request: &PushRequest) -> Result<PushResponse, StoreError> {
        let mut state = self.state();
        self.check_available(&state)?;
        state.puts.push(request.clone());

        if state.rejected.contains(&(request.kind, request.id.clone())) {
            debug!(kind = %request.kind, id = ?request.id, "push rejected");
            return Ok(PushResponse::rejected(500, "rejected by test store"));
        }

        let root = match xml::parse(&request.content) {
            Ok(root) => root,
            Err(e) => return Ok(PushResponse::rejected(400, e.to_string())),
        };

        match &request.id {
            Some(id) if request.kind.is_leaf() => {
                if root.name != request.kind.element_name() {
                    return Ok(PushResponse::rejected(
                        400,
                        format!("expected <{}>", request.kind.element_name()),
                    ));
                }
                upsert(
                    state.leaves.entry(request.kind).or_default(),
                    id.clone(),
                    request.content.clone(),
                );
            }
            None if !request.kind.is_leaf() => {
                state
                    .collections
                    .insert(request.kind, request.content.clone());
            }
            _ => {
                return Ok(PushResponse::rejected(400, "id does not match component kind"));
            }
        }
        debug!(kind = %request.kind, id = ?request.id, "push stored");
        Ok(PushResponse::ok(200, "true"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new("dest", Version::new(3, 9, 1))
    }

    #[test]
    fn leaf_push_then_fetch() {
        let s = store();
        let content = "<channel version=\"3.9.1\"><id>c1</id><name>A</name></channel>";
        let resp = s
            .put(&PushRequest::leaf(ComponentKind::Pipeline, "c1", content))
            .unwrap();
        assert!(resp.success);
        assert_eq!(s.fetch(ComponentKind::Pipeline, "c1").unwrap(), content);
        assert_eq!(s.leaf_ids(ComponentKind::Pipeline), vec!["c1"]);
        let all = xml::parse(&s.fetch_all(ComponentKind::Pipeline).unwrap()).unwrap();
        assert_eq!(all.elements().count(), 1);
    }

    #[test]
    fn unknown_leaf_is_not_found() {
        let err = store().fetch(ComponentKind::ScriptTemplate, "nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn collections_default_to_empty_and_are_replaced() {
        let s = store();
        assert_eq!(s.fetch_all(ComponentKind::PipelineTag).unwrap(), "<set/>");
        let tags = "<set><channelTag><id>t</id><name>x</name></channelTag></set>";
        assert!(s
            .put(&PushRequest::collection(ComponentKind::PipelineTag, tags))
            .unwrap()
            .success);
        assert_eq!(s.fetch_all(ComponentKind::PipelineTag).unwrap(), tags);
    }

    #[test]
    fn rejections_and_outages() {
        let s = store();
        s.reject(ComponentKind::Pipeline, Some("bad"));
        let resp = s
            .put(&PushRequest::leaf(ComponentKind::Pipeline, "bad", "<channel><id>bad</id></channel>"))
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.status, 500);
        assert_eq!(s.puts().len(), 1);

        let wrong_root = s
            .put(&PushRequest::leaf(ComponentKind::Pipeline, "x", "<codeTemplate><id>x</id></codeTemplate>"))
            .unwrap();
        assert_eq!(wrong_root.status, 400);

        s.set_available(false);
        assert!(matches!(s.login(), Err(StoreError::Unavailable { .. })));
        s.set_available(true);
        s.login().unwrap();
        assert_eq!(s.login_count(), 1);
    }
}
