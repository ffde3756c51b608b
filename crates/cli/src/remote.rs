//! [`ComponentStore`] over an engine's REST API.
//!
//! Every request carries the `X-Requested-With` header the API insists on
//! and the session cookie obtained by a form login. A session is opened on
//! first use and renewed once it is older than the configured lifespan.
//! When the server answers 401 the store logs in again and retries the
//! request exactly once; a second 401 makes the system unavailable.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use conveyor_interchange::{ComponentKind, Version};
use conveyor_storage::{ComponentStore, PushRequest, PushResponse, StoreError};
use tracing::{debug, info, warn};
use ureq::tls::TlsConfig;
use ureq::Agent;

use crate::config::SystemConfig;

const REQUESTED_WITH: &str = "OpenAPI";
const SESSION_COOKIE: &str = "JSESSIONID";
const MULTIPART_BOUNDARY: &str = "conveyor-boundary-7d3f19a2";
/// Exported channels with attachments can be large.
const MAX_BODY: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

enum Payload {
    Empty,
    Xml(String),
    Form(Vec<(&'static str, String)>),
    Multipart(Vec<u8>),
}

struct Call {
    method: Method,
    path: String,
    payload: Payload,
}

impl Call {
    fn get(path: impl Into<String>) -> Self {
        Call {
            method: Method::Get,
            path: path.into(),
            payload: Payload::Empty,
        }
    }
}

/// What came back from one request.
struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn header<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct Session {
    cookie: String,
    opened: Instant,
}

pub struct HttpComponentStore {
    name: String,
    base_url: String,
    user: String,
    password: String,
    lifespan: Duration,
    agent: Agent,
    session: Mutex<Option<Session>>,
}

impl HttpComponentStore {
    pub fn new(config: &SystemConfig, password: String, lifespan: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_connect(Some(config.connect_timeout()))
            .http_status_as_error(false)
            .tls_config(
                TlsConfig::builder()
                    .disable_verification(config.accept_invalid_certs)
                    .build(),
            )
            .build()
            .into();
        HttpComponentStore {
            name: config.name.clone(),
            base_url: config.base_url(),
            user: config.user.clone(),
            password,
            lifespan,
            agent,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unavailable(&self, message: impl Into<String>) -> StoreError {
        StoreError::Unavailable {
            system: self.name.clone(),
            message: message.into(),
        }
    }

    fn protocol(&self, reply: &Reply, message: impl Into<String>) -> StoreError {
        StoreError::Protocol {
            system: self.name.clone(),
            status: reply.status,
            message: message.into(),
        }
    }

    fn execute(&self, call: &Call, cookie: Option<&str>) -> Result<Reply, StoreError> {
        let url = format!("{}{}", self.base_url, call.path);
        debug!(system = %self.name, method = call.method.as_str(), path = %call.path, "request");

        let result = match call.method {
            Method::Get => {
                let mut request = self
                    .agent
                    .get(&url)
                    .header("X-Requested-With", REQUESTED_WITH)
                    .header("Accept", "application/xml");
                if let Some(cookie) = cookie {
                    request = request.header("Cookie", cookie);
                }
                request.call()
            }
            Method::Put | Method::Post => {
                let mut request = if call.method == Method::Put {
                    self.agent.put(&url)
                } else {
                    self.agent.post(&url)
                };
                request = request
                    .header("X-Requested-With", REQUESTED_WITH)
                    .header("Accept", "application/xml");
                if let Some(cookie) = cookie {
                    request = request.header("Cookie", cookie);
                }
                match &call.payload {
                    Payload::Empty => request.send_empty(),
                    Payload::Xml(body) => request
                        .header("Content-Type", "application/xml")
                        .send(body.as_bytes()),
                    Payload::Form(fields) => {
                        request.send_form(fields.iter().map(|(k, v)| (*k, v.as_str())))
                    }
                    Payload::Multipart(body) => request
                        .header(
                            "Content-Type",
                            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
                        )
                        .send(body.as_slice()),
                }
            }
        };

        let response = result.map_err(|e| self.unavailable(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .into_body()
            .with_config()
            .limit(MAX_BODY)
            .read_to_string()
            .map_err(|e| self.unavailable(format!("could not read response: {}", e)))?;
        Ok(Reply {
            status,
            headers,
            body,
        })
    }

    /// Log in and store the new session cookie.
    fn open_session(&self) -> Result<String, StoreError> {
        let call = Call {
            method: Method::Post,
            path: "/api/users/_login".to_string(),
            payload: Payload::Form(vec![
                ("username", self.user.clone()),
                ("password", self.password.clone()),
            ]),
        };
        let reply = self.execute(&call, None)?;
        if !reply.is_success() {
            return Err(StoreError::Authentication {
                system: self.name.clone(),
                message: format!("login answered HTTP {}", reply.status),
            });
        }
        let cookie = reply
            .header("set-cookie")
            .find_map(session_cookie)
            .ok_or_else(|| self.protocol(&reply, "login set no session cookie"))?;
        info!(system = %self.name, user = %self.user, "logged in");
        *self.session() = Some(Session {
            cookie: cookie.clone(),
            opened: Instant::now(),
        });
        Ok(cookie)
    }

    /// A live session cookie, logging in when there is none or it expired.
    fn cookie(&self) -> Result<String, StoreError> {
        let current = self
            .session()
            .as_ref()
            .filter(|s| s.opened.elapsed() < self.lifespan)
            .map(|s| s.cookie.clone());
        match current {
            Some(cookie) => Ok(cookie),
            None => self.open_session(),
        }
    }

    fn send(&self, call: &Call) -> Result<Reply, StoreError> {
        let reply = self.execute(call, Some(&self.cookie()?))?;
        if reply.status != 401 {
            return Ok(reply);
        }
        warn!(system = %self.name, path = %call.path, "session rejected, logging in again");
        let cookie = self.open_session().map_err(|e| {
            *self.session() = None;
            self.unavailable(format!("re-authentication failed: {}", e))
        })?;
        let retry = self.execute(call, Some(&cookie))?;
        if retry.status == 401 {
            *self.session() = None;
            return Err(self.unavailable("session rejected after re-authentication"));
        }
        Ok(retry)
    }

    fn get_text(&self, path: String) -> Result<String, StoreError> {
        let reply = self.send(&Call::get(path))?;
        if !reply.is_success() {
            return Err(self.protocol(&reply, reply.body.clone()));
        }
        Ok(reply.body)
    }
}

impl ComponentStore for HttpComponentStore {
    fn login(&self) -> Result<(), StoreError> {
        self.open_session().map(|_| ())
    }

    fn logout(&self) -> Result<(), StoreError> {
        let Some(session) = self.session().take() else {
            return Ok(());
        };
        let call = Call {
            method: Method::Post,
            path: "/api/users/_logout".to_string(),
            payload: Payload::Empty,
        };
        let reply = self.execute(&call, Some(&session.cookie))?;
        debug!(system = %self.name, status = reply.status, "logged out");
        Ok(())
    }

    fn server_version(&self) -> Result<Version, StoreError> {
        let body = self.get_text("/api/server/version".to_string())?;
        Ok(Version::from_str(&strip_xml_string(&body))?)
    }

    fn fetch(&self, kind: ComponentKind, id: &str) -> Result<String, StoreError> {
        let path = leaf_path(kind, id)
            .ok_or_else(|| StoreError::Backend(format!("{kind} is not fetched by id")))?;
        let reply = self.send(&Call::get(path))?;
        // the API answers an unknown id with 404 or with an empty body
        if reply.status == 404 || (reply.is_success() && reply.body.trim().is_empty()) {
            return Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        if !reply.is_success() {
            return Err(self.protocol(&reply, reply.body.clone()));
        }
        Ok(reply.body)
    }

    fn fetch_all(&self, kind: ComponentKind) -> Result<String, StoreError> {
        self.get_text(collection_path(kind).to_string())
    }

    fn put(&self, request: &PushRequest) -> Result<PushResponse, StoreError> {
        let call = push_call(request)?;
        let reply = self.send(&call)?;
        let success = accepted(reply.status, &reply.body);
        if success {
            info!(system = %self.name, kind = %request.kind, id = ?request.id, "pushed");
        } else {
            warn!(system = %self.name, kind = %request.kind, id = ?request.id, status = reply.status, "push rejected");
        }
        Ok(PushResponse {
            success,
            status: reply.status,
            headers: reply.headers,
            body: reply.body,
        })
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn leaf_path(kind: ComponentKind, id: &str) -> Option<String> {
    match kind {
        ComponentKind::Pipeline => Some(format!("/api/channels/{}", id)),
        ComponentKind::ScriptTemplate => Some(format!("/api/codeTemplates/{}", id)),
        _ => None,
    }
}

fn collection_path(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::Pipeline => "/api/channels",
        ComponentKind::ScriptTemplate => "/api/codeTemplates",
        ComponentKind::PipelineGroup => "/api/channelgroups",
        ComponentKind::ScriptLibrary => "/api/codeTemplateLibraries?includeCodeTemplates=false",
        ComponentKind::PipelineTag => "/api/server/channelTags",
        ComponentKind::PipelinePruningSetting => "/api/server/channelMetadata",
        ComponentKind::InterPipelineDependency => "/api/server/channelDependencies",
    }
}

fn push_call(request: &PushRequest) -> Result<Call, StoreError> {
    let xml = |path: String| Call {
        method: Method::Put,
        path,
        payload: Payload::Xml(request.content.clone()),
    };
    let call = match (request.kind, request.id.as_deref()) {
        (ComponentKind::Pipeline, Some(id)) => xml(format!("/api/channels/{}?override=true", id)),
        (ComponentKind::ScriptTemplate, Some(id)) => {
            xml(format!("/api/codeTemplates/{}?override=true", id))
        }
        (ComponentKind::Pipeline | ComponentKind::ScriptTemplate, None) => {
            return Err(StoreError::Backend(format!(
                "{} push without an id",
                request.kind
            )))
        }
        (ComponentKind::ScriptLibrary, _) => {
            xml("/api/codeTemplateLibraries?override=true".to_string())
        }
        (ComponentKind::PipelineGroup, _) => Call {
            method: Method::Post,
            path: "/api/channelgroups/_bulkUpdate?override=true".to_string(),
            payload: Payload::Multipart(group_update_body(&request.content)),
        },
        (kind, _) => xml(collection_path(kind).to_string()),
    };
    Ok(call)
}

/// Groups are replaced through a bulk update taking the new group list
/// and the ids of removed groups as two form parts.
fn group_update_body(groups: &str) -> Vec<u8> {
    let mut body = String::new();
    for (name, content) in [("channelGroups", groups), ("removedChannelGroupIds", "<set/>")] {
        body.push_str(&format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\nContent-Type: application/xml\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{MULTIPART_BOUNDARY}--\r\n"));
    body.into_bytes()
}

/// Some endpoints answer 200 with a boolean verdict in the body.
fn accepted(status: u16, body: &str) -> bool {
    (200..300).contains(&status) && strip_xml_string(body) != "false"
}

/// `<boolean>false</boolean>` or `<string>3.9.1</string>` to its text.
fn strip_xml_string(body: &str) -> String {
    let trimmed = body.trim();
    if let (Some(open_end), Some(close_start)) = (trimmed.find('>'), trimmed.rfind("</")) {
        if trimmed.starts_with('<') && open_end < close_start {
            return trimmed[open_end + 1..close_start].trim().to_string();
        }
    }
    trimmed.to_string()
}

/// `JSESSIONID=abc; Path=/; Secure` to `JSESSIONID=abc`.
fn session_cookie(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == SESSION_COOKIE && !value.is_empty()).then(|| pair.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn system(server: &str) -> SystemConfig {
        SystemConfig {
            name: "test".to_string(),
            description: String::new(),
            server: server.to_string(),
            port: 8443,
            user: "admin".to_string(),
            password: Some("admin".to_string()),
            password_env: None,
            environment: None,
            accept_invalid_certs: false,
            connect_timeout_secs: 2,
        }
    }

    // ──────────────────────────────────────────────
    // Request shaping
    // ──────────────────────────────────────────────

    #[test]
    fn leaf_pushes_override_by_id() {
        let call = push_call(&PushRequest::leaf(ComponentKind::Pipeline, "p1", "<channel/>")).unwrap();
        assert_eq!(call.method, Method::Put);
        assert_eq!(call.path, "/api/channels/p1?override=true");

        let missing = push_call(&PushRequest::collection(ComponentKind::ScriptTemplate, "<list/>"));
        assert!(matches!(missing, Err(StoreError::Backend(_))));
    }

    #[test]
    fn collections_replace_their_endpoint() {
        let tags = push_call(&PushRequest::collection(ComponentKind::PipelineTag, "<set/>")).unwrap();
        assert_eq!(tags.path, "/api/server/channelTags");

        let groups =
            push_call(&PushRequest::collection(ComponentKind::PipelineGroup, "<list/>")).unwrap();
        assert_eq!(groups.method, Method::Post);
        let Payload::Multipart(body) = groups.payload else {
            panic!("groups go as multipart");
        };
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("name=\"channelGroups\""));
        assert!(body.contains("name=\"removedChannelGroupIds\""));
        assert!(body.ends_with(&format!("--{MULTIPART_BOUNDARY}--\r\n")));
    }

    #[test]
    fn boolean_false_body_is_a_rejection() {
        assert!(accepted(200, "<boolean>true</boolean>"));
        assert!(accepted(204, ""));
        assert!(!accepted(200, "<boolean>false</boolean>"));
        assert!(!accepted(500, "boom"));
    }

    #[test]
    fn reads_session_cookie_and_plain_version() {
        assert_eq!(
            session_cookie("JSESSIONID=abc123; Path=/api; Secure; HttpOnly").as_deref(),
            Some("JSESSIONID=abc123")
        );
        assert_eq!(session_cookie("other=1; Path=/"), None);
        assert_eq!(strip_xml_string("3.9.1\n"), "3.9.1");
        assert_eq!(strip_xml_string("<string>3.9.1</string>"), "3.9.1");
    }

    // ──────────────────────────────────────────────
    // Sessions against a local server
    // ──────────────────────────────────────────────

    /// Serve `replies` in order, one connection each, and count requests.
    fn serve(replies: Vec<(u16, &'static str, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        thread::spawn(move || {
            for (status, extra_headers, body) in replies {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                    if let Some((k, v)) = line.split_once(':') {
                        if k.eq_ignore_ascii_case("content-length") {
                            length = v.trim().parse().unwrap_or(0);
                        }
                    }
                }
                let mut request_body = vec![0u8; length];
                let _ = reader.read_exact(&mut request_body);
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {status} X\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (format!("http://{}", addr), seen)
    }

    const LOGGED_IN: (u16, &str, &str) = (200, "Set-Cookie: JSESSIONID=s1; Path=/\r\n", "");

    #[test]
    fn stale_session_logs_in_once_and_retries() {
        let (url, seen) = serve(vec![
            LOGGED_IN,
            (401, "", ""),
            LOGGED_IN,
            (200, "", "3.9.1"),
        ]);
        let store = HttpComponentStore::new(&system(&url), "admin".into(), Duration::from_secs(60));
        assert_eq!(store.server_version().unwrap(), Version::new(3, 9, 1));
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn second_rejection_makes_system_unavailable() {
        let (url, _) = serve(vec![LOGGED_IN, (401, "", ""), LOGGED_IN, (401, "", "")]);
        let store = HttpComponentStore::new(&system(&url), "admin".into(), Duration::from_secs(60));
        assert!(matches!(
            store.fetch_all(ComponentKind::Pipeline),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[test]
    fn failed_relogin_makes_system_unavailable() {
        let (url, hits) = serve(vec![LOGGED_IN, (401, "", ""), (401, "", "")]);
        let store = HttpComponentStore::new(&system(&url), "admin".into(), Duration::from_secs(60));
        assert!(matches!(
            store.fetch_all(ComponentKind::Pipeline),
            Err(StoreError::Unavailable { .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(store.session().is_none());
    }

    #[test]
    fn rejected_login_is_an_authentication_error() {
        let (url, _) = serve(vec![(401, "", "")]);
        let store = HttpComponentStore::new(&system(&url), "wrong".into(), Duration::from_secs(60));
        assert!(matches!(store.login(), Err(StoreError::Authentication { .. })));
    }

    #[test]
    fn unreachable_server_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let store = HttpComponentStore::new(&system(&url), "admin".into(), Duration::from_secs(60));
        assert!(matches!(
            store.server_version(),
            Err(StoreError::Unavailable { .. })
        ));
    }
}
