use conveyor_interchange::{ComponentKind, Version};

use crate::error::StoreError;
use crate::record::{PushRequest, PushResponse};

/// Access to the components of one remote system.
///
/// Payloads travel as the engine's XML export format:
///
/// - `fetch(kind, id)` returns one leaf component (`<channel>` or
///   `<codeTemplate>`);
/// - `fetch_all(kind)` returns the whole collection of a kind: a `<list>`
///   of leaves, libraries or groups, a `<set>` of tags or dependencies, or
///   the `<map>` of per-pipeline metadata holding pruning settings.
///
/// `put` writes one leaf or replaces one collection. Transport failures
/// are errors; a response from the system, successful or not, is a
/// [`PushResponse`].
///
/// ## Sessions
///
/// Implementations that need a session establish it lazily; `login` may
/// be called explicitly to validate credentials up front, and `logout`
/// ends the session. Both are idempotent.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` so one store can be shared by
/// the engine's per-system handles.
pub trait ComponentStore: Send + Sync {
    fn login(&self) -> Result<(), StoreError>;

    fn logout(&self) -> Result<(), StoreError>;

    /// Schema version the system runs.
    fn server_version(&self) -> Result<Version, StoreError>;

    /// One leaf component. `StoreError::NotFound` when the id is unknown.
    fn fetch(&self, kind: ComponentKind, id: &str) -> Result<String, StoreError>;

    /// The whole collection of a kind.
    fn fetch_all(&self, kind: ComponentKind) -> Result<String, StoreError>;

    fn put(&self, request: &PushRequest) -> Result<PushResponse, StoreError>;
}
