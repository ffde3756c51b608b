use conveyor_core::CoreError;
use conveyor_interchange::{ComponentRef, InterchangeError};
use conveyor_storage::StoreError;

/// Errors returned by the engine service.
///
/// Store and snapshot errors name the system they came from; other
/// systems' snapshots are unaffected by them.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Local setup is unusable (e.g. two systems with the same name).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown system '{0}'")]
    UnknownSystem(String),

    #[error("{component} not found on system '{system}'")]
    NotFound {
        system: String,
        component: ComponentRef,
    },

    #[error("system '{system}': {source}")]
    Store {
        system: String,
        #[source]
        source: StoreError,
    },

    /// The fetched components do not form a consistent snapshot.
    #[error("system '{system}': {source}")]
    Snapshot {
        system: String,
        #[source]
        source: CoreError,
    },

    /// A fetched payload could not be read.
    #[error("system '{system}': {source}")]
    Payload {
        system: String,
        #[source]
        source: InterchangeError,
    },
}
