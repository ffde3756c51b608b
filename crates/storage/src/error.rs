use conveyor_interchange::{ComponentKind, InterchangeError};

/// All errors that can be returned by a ComponentStore implementation.
///
/// A rejected push is not an error: it comes back as an unsuccessful
/// [`PushResponse`](crate::PushResponse) so the caller can record it and
/// carry on with the batch.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The endpoint could not be reached, timed out, or kept refusing the
    /// session after one re-authentication.
    #[error("system '{system}' is unavailable: {message}")]
    Unavailable { system: String, message: String },

    /// Login was rejected.
    #[error("authentication failed for system '{system}': {message}")]
    Authentication { system: String, message: String },

    /// No component with this id exists on the system.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ComponentKind, id: String },

    /// The system answered, but not with something we can use.
    #[error("unexpected response from system '{system}' (HTTP {status}): {message}")]
    Protocol {
        system: String,
        status: u16,
        message: String,
    },

    /// A fetched payload could not be read.
    #[error(transparent)]
    Payload(#[from] InterchangeError),

    /// A backend-specific error that fits none of the above.
    #[error("storage backend error: {0}")]
    Backend(String),
}
