//! Invocation configuration and argument normalization

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Invocation errors
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("params must contain at least one token")]
    EmptyParams,

    #[error("invalid invocation config: {0}")]
    InvalidFormat(String),
}

/// One in-memory input destined for the staging directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedBuffer {
    /// File name the buffer is staged under
    pub name: String,

    /// Raw payload
    pub bytes: Vec<u8>,
}

impl NamedBuffer {
    /// Create a named buffer
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// A single argument token: plain text, or a named buffer to stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Buffer(NamedBuffer),
    Text(String),
}

impl Token {
    /// Text content, if this is a plain token
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Token::Text(s) => Some(s),
            Token::Buffer(_) => None,
        }
    }

    /// Whether this token carries a buffer payload
    pub fn is_buffer(&self) -> bool {
        matches!(self, Token::Buffer(_))
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Text(s.to_string())
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Token::Text(s)
    }
}

/// Caller-supplied parameters: a raw command line, or a pre-tokenized list.
///
/// A raw line is split naively on whitespace; tokens containing embedded
/// whitespace (quoted paths and the like) are not supported that way and
/// must be passed pre-tokenized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Params {
    Line(String),
    Argv(Vec<Token>),
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ParamsVisitor;

        impl<'de> Visitor<'de> for ParamsVisitor {
            type Value = Params;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a command line string or an array of argument tokens")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Params, E> {
                Ok(Params::Line(v.to_string()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Params, A::Error> {
                let mut tokens = Vec::new();
                while let Some(token) = seq.next_element::<Token>()? {
                    tokens.push(token);
                }
                Ok(Params::Argv(tokens))
            }
        }

        deserializer.deserialize_any(ParamsVisitor)
    }
}

impl From<&str> for Params {
    fn from(s: &str) -> Self {
        Params::Line(s.to_string())
    }
}

impl From<Vec<Token>> for Params {
    fn from(tokens: Vec<Token>) -> Self {
        Params::Argv(tokens)
    }
}

/// Where the default configuration argument is placed in the argv
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfPlacement {
    #[default]
    Append,
    Prepend,
}

/// One logical request to run the tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationConfig {
    /// Argument tokens, or a raw command line
    pub params: Params,

    /// Working directory inputs are staged into and relative I/O paths are
    /// resolved against
    #[serde(default = "default_work_dir")]
    pub path: PathBuf,

    /// Run the child synchronously on the calling thread
    #[serde(default)]
    pub prefer_sync: bool,

    /// Strip a single CRLF from each captured stream
    #[serde(default = "default_true")]
    pub beautify: bool,

    /// Add the toolchain's default configuration argument
    #[serde(default = "default_true")]
    pub append_conf: bool,

    /// Placement of the default configuration argument
    #[serde(default)]
    pub conf_placement: ConfPlacement,

    /// Run through the platform shell.
    ///
    /// The argv is joined with spaces and handed to `sh -c` / `cmd.exe /C`,
    /// so untrusted argument content is shell-injectable. Disable for
    /// untrusted input.
    #[serde(default = "default_true")]
    pub use_shell: bool,

    /// Verbose diagnostic logging for this invocation
    #[serde(default)]
    pub debug_mode: bool,

    /// Extra environment variables layered over the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Kill the child and fail if it runs longer than this.
    ///
    /// Applies to the awaiting entry point; blocking mode has no portable
    /// bounded wait and ignores it.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_true() -> bool {
    true
}

impl InvocationConfig {
    /// Config with defaults for the given params
    pub fn new(params: impl Into<Params>) -> Self {
        Self {
            params: params.into(),
            path: default_work_dir(),
            prefer_sync: false,
            beautify: true,
            append_conf: true,
            conf_placement: ConfPlacement::default(),
            use_shell: true,
            debug_mode: false,
            env: HashMap::new(),
            timeout_secs: None,
        }
    }

    /// Load from JSON text
    pub fn from_json(json: &str) -> Result<Self, InvocationError> {
        serde_json::from_str(json).map_err(|e| InvocationError::InvalidFormat(e.to_string()))
    }

    /// Load from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self, InvocationError> {
        serde_yaml::from_str(yaml).map_err(|e| InvocationError::InvalidFormat(e.to_string()))
    }
}

/// Normalize params into an ordered token list.
///
/// Splits a raw line on whitespace, rejects an empty list, and drops a
/// leading token equal to the tool's own program name (a defensive
/// convenience for callers that paste full command lines).
pub fn normalize(params: Params, program: &str) -> Result<Vec<Token>, InvocationError> {
    let mut tokens = match params {
        Params::Line(line) => line
            .split_whitespace()
            .map(|s| Token::Text(s.to_string()))
            .collect::<Vec<_>>(),
        Params::Argv(tokens) => tokens,
    };

    if tokens.is_empty() {
        return Err(InvocationError::EmptyParams);
    }

    if tokens
        .first()
        .and_then(Token::as_text)
        .is_some_and(|t| t == program)
    {
        tokens.remove(0);
    }

    Ok(tokens)
}
