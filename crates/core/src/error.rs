use conveyor_interchange::{ComponentKind, InterchangeError};

/// Errors raised while building a system snapshot.
///
/// Any of these aborts the build; the previously published snapshot, if
/// any, stays visible.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Two components of the same kind share an id.
    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: ComponentKind, id: String },

    /// A template is listed by more than one library.
    #[error("code template '{template_id}' belongs to both library '{first}' and library '{second}'")]
    TemplateInSeveralLibraries {
        template_id: String,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Interchange(#[from] InterchangeError),
}
