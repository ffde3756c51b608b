/// Errors raised while reading component payloads.
///
/// A remote component that lacks a structural element is a configuration
/// problem on the remote side; callers surface it instead of defaulting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterchangeError {
    /// The payload is not well-formed XML.
    #[error("malformed XML at line {line}: {message}")]
    Xml { line: usize, message: String },

    /// A component is missing an element it must carry (e.g. `<id>`).
    #[error("{kind} is missing required element <{element}>")]
    MissingElement { kind: String, element: String },

    /// The payload root is not what the component kind expects.
    #[error("expected <{expected}> root, found <{found}>")]
    UnexpectedRoot { expected: String, found: String },

    /// A version string could not be parsed.
    #[error("invalid version string '{0}'")]
    InvalidVersion(String),

    /// An unrecognised component kind name.
    #[error("unknown component kind '{0}'")]
    UnknownKind(String),
}
