//! Script analysis: a single-pass scanner over script text that finds
//! function definition headers and call sites.
//!
//! The scanner does not tokenize the script language. It walks the text
//! once, eliding spans that cannot contain real calls (comments, string
//! literals, embedded SQL, encoded binaries, XML name/description
//! elements) and records every `identifier(` it sees outside of them.
//! The input may be plain script code or the XML-escaped form found in
//! exported pipelines, so the escaped quote families are elided as well.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

/// Script keywords and reserved words that may precede `(` but are never calls.
const KEYWORDS: &[&str] = &[
    "if", "for", "while", "do", "switch", "catch", "function", "return", "typeof",
    "instanceof", "void", "delete", "with", "in", "of", "new", "throw", "case", "else",
    "try", "finally", "var", "let", "const", "yield", "await", "super", "this",
];

/// Minimum run length treated as an encoded binary block.
const BASE64_MIN_RUN: usize = 64;

const SQL_PREFIXES: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"];

/// XML elements whose content is free text, never script.
const TEXT_ELEMENTS: &[&str] = &["description", "name", "subject"];

/// XML elements holding embedded queries.
const QUERY_ELEMENTS: &[&str] = &["query", "select"];

/// One `function name(` definition and the calls made in its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSpan {
    pub name: String,
    /// Byte offset of the definition header.
    pub start: usize,
    /// Byte offset where the body slice ends (next header or end of text).
    pub end: usize,
    pub calls: BTreeSet<String>,
    /// True when the text had no header and this span stands for the
    /// whole unit, keyed by the container's name.
    pub pseudo: bool,
}

/// Result of analyzing one unit of script text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScriptAnalysis {
    pub functions: Vec<FunctionSpan>,
    /// Calls made before the first definition header.
    pub top_level_calls: BTreeSet<String>,
}

impl ScriptAnalysis {
    /// Names of real (non-pseudo) definitions, in order of appearance.
    pub fn defined_names(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .filter(|f| !f.pseudo)
            .map(|f| f.name.as_str())
    }

    /// Every call in the unit, wherever it appears.
    pub fn all_calls(&self) -> BTreeSet<String> {
        let mut out = self.top_level_calls.clone();
        for f in &self.functions {
            out.extend(f.calls.iter().cloned());
        }
        out
    }
}

/// Extracts function definitions and references from script text.
///
/// Names on the exclusion list (built-ins and platform helpers configured
/// by the user) are never reported as calls.
#[derive(Debug, Clone, Default)]
pub struct ScriptAnalyzer {
    excluded: HashSet<String>,
}

impl ScriptAnalyzer {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptAnalyzer {
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// Analyze `text`; `container` names the pseudo-function used when the
    /// text has no definition header.
    pub fn analyze(&self, text: &str, container: &str) -> ScriptAnalysis {
        let marks = Scanner::new(text).run();

        let headers: Vec<(usize, String)> = marks
            .iter()
            .filter_map(|m| match m {
                Mark::Definition { offset, name } => Some((*offset, name.clone())),
                Mark::Call { .. } => None,
            })
            .collect();

        if headers.is_empty() {
            let calls = marks
                .iter()
                .filter_map(|m| match m {
                    Mark::Call { name, .. } if !self.excluded.contains(name) => Some(name.clone()),
                    _ => None,
                })
                .collect();
            return ScriptAnalysis {
                functions: vec![FunctionSpan {
                    name: container.to_string(),
                    start: 0,
                    end: text.len(),
                    calls,
                    pseudo: true,
                }],
                top_level_calls: BTreeSet::new(),
            };
        }

        let mut analysis = ScriptAnalysis::default();
        for (i, (start, name)) in headers.iter().enumerate() {
            let end = headers.get(i + 1).map(|(o, _)| *o).unwrap_or(text.len());
            analysis.functions.push(FunctionSpan {
                name: name.clone(),
                start: *start,
                end,
                calls: BTreeSet::new(),
                pseudo: false,
            });
        }

        let first_header = headers[0].0;
        for mark in &marks {
            let Mark::Call { offset, name } = mark else {
                continue;
            };
            if self.excluded.contains(name) {
                continue;
            }
            if *offset < first_header {
                analysis.top_level_calls.insert(name.clone());
                continue;
            }
            // last span whose header starts before the call
            let slot = analysis
                .functions
                .iter_mut()
                .rev()
                .find(|f| f.start <= *offset);
            if let Some(f) = slot {
                f.calls.insert(name.clone());
            }
        }
        analysis
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mark {
    Definition { offset: usize, name: String },
    Call { offset: usize, name: String },
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    marks: Vec<Mark>,
    /// Last non-whitespace byte outside elided spans, used to decide
    /// whether a `/` may open a regex literal.
    prev_significant: Option<u8>,
    prev_word: Option<&'a str>,
    /// Open `${` interpolations, innermost last, each with the depth of
    /// plain braces opened inside it.
    templates: Vec<usize>,
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Scanner {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            marks: Vec::new(),
            prev_significant: None,
            prev_word: None,
            templates: Vec::new(),
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        self.bytes[self.pos..].starts_with(s.as_bytes())
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    /// Move past `needle`, or to the end of input when it never occurs.
    fn skip_past(&mut self, needle: &str) {
        match self.src[self.pos..].find(needle) {
            Some(i) => self.pos += i + needle.len(),
            None => self.pos = self.bytes.len(),
        }
    }

    fn run(mut self) -> Vec<Mark> {
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];

            if b.is_ascii_whitespace() {
                self.pos += 1;
                continue;
            }
            if self.try_base64() || self.try_comment() || self.try_string() || self.try_markup() {
                continue;
            }
            if b == b'/' && self.try_regex() {
                continue;
            }
            if is_word_start(b) || b.is_ascii_digit() {
                self.word();
                continue;
            }

            if b == b'}' {
                if let Some(depth) = self.templates.last_mut() {
                    if *depth == 0 {
                        self.templates.pop();
                        self.pos += 1;
                        self.template_text();
                        continue;
                    }
                    *depth -= 1;
                }
            } else if b == b'{' {
                if let Some(depth) = self.templates.last_mut() {
                    *depth += 1;
                }
            }

            self.prev_significant = Some(b);
            self.prev_word = None;
            self.pos += 1;
        }
        self.marks
    }

    fn try_base64(&mut self) -> bool {
        if self.pos > 0 && is_base64_byte(self.bytes[self.pos - 1]) {
            return false;
        }
        let run = self.bytes[self.pos..]
            .iter()
            .take_while(|b| is_base64_byte(**b))
            .count();
        if run < BASE64_MIN_RUN {
            return false;
        }
        self.pos += run;
        true
    }

    fn try_comment(&mut self) -> bool {
        if self.starts_with("//") {
            match self.src[self.pos..].find('\n') {
                Some(i) => self.pos += i,
                None => self.pos = self.bytes.len(),
            }
            true
        } else if self.starts_with("/*") {
            self.pos += 2;
            self.skip_past("*/");
            true
        } else if self.starts_with("<!--") {
            self.pos += 4;
            self.skip_past("-->");
            true
        } else if self.starts_with("&lt;!--") {
            self.pos += 7;
            self.skip_past("--&gt;");
            true
        } else {
            false
        }
    }

    fn try_string(&mut self) -> bool {
        let (open, close) = if self.starts_with("&quot;") {
            ("&quot;", "&quot;")
        } else if self.starts_with("&apos;") {
            ("&apos;", "&apos;")
        } else {
            match self.bytes[self.pos] {
                b'"' => ("\"", "\""),
                b'\'' => ("'", "'"),
                b'`' => {
                    self.pos += 1;
                    self.template_text();
                    return true;
                }
                _ => return false,
            }
        };

        let body_start = self.pos + open.len();
        let mut i = body_start;
        while i < self.bytes.len() {
            let b = self.bytes[i];
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == b'\n' {
                break;
            }
            if self.bytes[i..].starts_with(close.as_bytes()) {
                self.pos = i + close.len();
                self.prev_significant = Some(b'"');
                self.prev_word = None;
                return true;
            }
            i += 1;
        }
        // unterminated: step over the opening quote only
        self.pos = body_start;
        self.prev_significant = Some(b'"');
        true
    }

    /// Elide template literal text from the current position up to the
    /// closing backtick, stopping early at a `${` so the interpolated
    /// expression is scanned as code.
    fn template_text(&mut self) {
        let mut i = self.pos;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\\' => i += 2,
                b'`' => {
                    self.pos = i + 1;
                    self.prev_significant = Some(b'"');
                    self.prev_word = None;
                    return;
                }
                b'$' if self.bytes.get(i + 1) == Some(&b'{') => {
                    self.pos = i + 2;
                    self.templates.push(0);
                    self.prev_significant = Some(b'{');
                    self.prev_word = None;
                    return;
                }
                _ => i += 1,
            }
        }
        // unterminated: the text already passed is literal
        self.prev_significant = Some(b'"');
    }

    fn try_markup(&mut self) -> bool {
        if self.starts_with("<![CDATA[") {
            let body = self.pos + "<![CDATA[".len();
            let content = self.src[body..].trim_start();
            let is_sql = SQL_PREFIXES.iter().any(|kw| {
                content
                    .as_bytes()
                    .get(..kw.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(kw.as_bytes()))
            });
            self.pos = body;
            if is_sql {
                self.skip_past("]]>");
            }
            return true;
        }
        if self.bytes[self.pos] != b'<' {
            return false;
        }
        for name in TEXT_ELEMENTS.iter().chain(QUERY_ELEMENTS) {
            if self.at_open_tag(name) {
                let tag_end = match self.src[self.pos..].find('>') {
                    Some(i) => self.pos + i,
                    None => return false,
                };
                let self_closing = self.bytes[tag_end - 1] == b'/';
                self.pos = tag_end + 1;
                if !self_closing {
                    self.skip_past(&format!("</{name}>"));
                }
                return true;
            }
        }
        false
    }

    fn at_open_tag(&self, name: &str) -> bool {
        let rest = &self.bytes[self.pos + 1..];
        rest.starts_with(name.as_bytes())
            && matches!(
                rest.get(name.len()),
                Some(b'>') | Some(b'/') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')
            )
    }

    /// Skip a regex literal when `/` appears where an expression may begin.
    fn try_regex(&mut self) -> bool {
        let expression_start = match self.prev_significant {
            None => true,
            Some(b) => b"(,=:[!&|?{};+-*%~^".contains(&b),
        } || matches!(self.prev_word, Some("return" | "typeof" | "case"));
        if !expression_start {
            return false;
        }

        let mut i = self.pos + 1;
        let mut in_class = false;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\n' => return false,
                b'\\' => i += 1,
                b'[' => in_class = true,
                b']' => in_class = false,
                b'/' if !in_class => {
                    if i == self.pos + 1 {
                        return false;
                    }
                    i += 1;
                    while i < self.bytes.len() && self.bytes[i].is_ascii_alphabetic() {
                        i += 1;
                    }
                    self.pos = i;
                    self.prev_significant = Some(b'/');
                    self.prev_word = None;
                    return true;
                }
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn read_word(&mut self) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.pos < self.bytes.len() && is_word_byte(self.bytes[self.pos]) {
            self.pos += 1;
        }
        &src[start..self.pos]
    }

    fn skip_inline_space(&mut self) {
        while matches!(self.peek(0), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn word(&mut self) {
        let start = self.pos;
        let after_dot = start > 0 && self.bytes[start - 1] == b'.';
        let word = self.read_word();

        if word.as_bytes()[0].is_ascii_digit() {
            self.prev_significant = Some(b'0');
            self.prev_word = None;
            return;
        }

        match word {
            "new" if !after_dot => self.instantiation(),
            "function" if !after_dot => self.definition(start),
            _ => {
                let resume = self.pos;
                self.skip_inline_space();
                let called = self.peek(0) == Some(b'(');
                self.pos = resume;
                if called && !after_dot && !KEYWORDS.contains(&word) {
                    self.marks.push(Mark::Call {
                        offset: start,
                        name: word.to_string(),
                    });
                }
            }
        }
        self.prev_significant = Some(b'a');
        self.prev_word = Some(word);
    }

    /// `new a.b.C(...)`: the constructor path is not a call.
    fn instantiation(&mut self) {
        let resume = self.pos;
        while matches!(self.peek(0), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        if !matches!(self.peek(0), Some(b) if is_word_start(b)) {
            self.pos = resume;
            return;
        }
        loop {
            self.read_word();
            if self.peek(0) == Some(b'.') && matches!(self.peek(1), Some(b) if is_word_start(b)) {
                self.pos += 1;
                continue;
            }
            break;
        }
    }

    /// `function name(` opens a definition; anonymous functions do not.
    fn definition(&mut self, header: usize) {
        let resume = self.pos;
        while matches!(self.peek(0), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
        if !matches!(self.peek(0), Some(b) if is_word_start(b)) {
            self.pos = resume;
            return;
        }
        let name = self.read_word();
        let after_name = self.pos;
        self.skip_inline_space();
        if self.peek(0) == Some(b'(') {
            self.marks.push(Mark::Definition {
                offset: header,
                name: name.to_string(),
            });
        }
        self.pos = after_name;
    }
}
