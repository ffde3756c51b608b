use conveyor_interchange::ComponentKind;
use serde::{Deserialize, Serialize};

/// One write to a system.
///
/// Leaf pushes carry the id of the component being created or replaced;
/// satellite pushes replace the whole collection and carry no id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub content: String,
}

impl PushRequest {
    pub fn leaf(kind: ComponentKind, id: impl Into<String>, content: impl Into<String>) -> Self {
        PushRequest {
            kind,
            id: Some(id.into()),
            content: content.into(),
        }
    }

    pub fn collection(kind: ComponentKind, content: impl Into<String>) -> Self {
        PushRequest {
            kind,
            id: None,
            content: content.into(),
        }
    }
}

/// What the system answered to a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: bool,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl PushResponse {
    pub fn ok(status: u16, body: impl Into<String>) -> Self {
        PushResponse {
            success: true,
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        PushResponse {
            success: false,
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}
