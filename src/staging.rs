//! Staging of in-memory inputs and working-directory path rewriting

use crate::invocation::Token;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Staging errors
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("failed to create staging directory {dir}: {source}")]
    StagingDirectory { dir: PathBuf, source: io::Error },

    #[error("failed to write staged input {path}: {source}")]
    ArtifactWrite { path: PathBuf, source: io::Error },

    #[error("failed to create output directory {dir}: {source}")]
    OutputPathCreation { dir: PathBuf, source: io::Error },
}

static DEFAULT_IO_FLAGS: Lazy<IoFlags> = Lazy::new(|| IoFlags {
    all: ["-in", "-out", "-keyout", "-signkey", "-key"]
        .map(String::from)
        .to_vec(),
    output: ["-out", "-keyout", "-signkey"].map(String::from).to_vec(),
});

/// Flags whose following token names a file under the working directory.
///
/// Matching is by substring, so `-key` also covers `-keyout`; the sets are
/// caller-configurable per tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoFlags {
    /// Flags designating any file argument (inputs, outputs, keys)
    pub all: Vec<String>,

    /// Subset designating files the tool writes
    pub output: Vec<String>,
}

impl Default for IoFlags {
    fn default() -> Self {
        DEFAULT_IO_FLAGS.clone()
    }
}

impl IoFlags {
    fn is_io(&self, token: &str) -> bool {
        self.all.iter().any(|flag| token.contains(flag.as_str()))
    }

    fn is_output(&self, token: &str) -> bool {
        self.output.iter().any(|flag| token.contains(flag.as_str()))
    }
}

/// Record of one buffer persisted to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    /// Buffer name, also the file name under the working directory
    pub name: String,

    /// Path the payload was written to
    pub path: PathBuf,
}

/// Outcome of a staging pass
#[derive(Debug)]
pub struct Staged {
    /// Final argument vector, every buffer replaced by its staged path
    pub argv: Vec<String>,

    /// Buffers written during the pass
    pub artifacts: Vec<StagedArtifact>,

    /// Last output-designating path rewritten during the pass
    pub primary_output: Option<PathBuf>,
}

/// Stage buffers and rewrite I/O paths in a single left-to-right scan.
///
/// Buffer tokens are written to `<work_dir>/<name>` (creating `work_dir`
/// non-recursively if absent; existing files are overwritten,
/// last-write-wins) and replaced by the staged path. A plain token that
/// follows an I/O-designating flag is prefixed with the working directory.
/// After the scan, if any output-designating path was rewritten, its parent
/// directory tree is created recursively. Already-staged files are not
/// rolled back when a later step fails.
pub fn stage(tokens: Vec<Token>, work_dir: &Path, flags: &IoFlags) -> Result<Staged, StagingError> {
    let mut tokens = tokens;
    let mut artifacts = Vec::new();
    let mut primary_output: Option<PathBuf> = None;
    let mut saw_io_flag = false;

    let mut i = 0;
    while i < tokens.len() {
        if let Token::Buffer(buffer) = &tokens[i] {
            if !work_dir.exists() {
                debug!("creating staging directory: {}", work_dir.display());
                fs::create_dir(work_dir).map_err(|source| StagingError::StagingDirectory {
                    dir: work_dir.to_path_buf(),
                    source,
                })?;
            }

            let path = work_dir.join(&buffer.name);
            fs::write(&path, &buffer.bytes).map_err(|source| StagingError::ArtifactWrite {
                path: path.clone(),
                source,
            })?;

            debug!("staged {} bytes to {}", buffer.bytes.len(), path.display());

            artifacts.push(StagedArtifact {
                name: buffer.name.clone(),
                path: path.clone(),
            });
            tokens[i] = Token::Text(path.to_string_lossy().into_owned());
        }

        if let Some(text) = tokens[i].as_text() {
            if flags.is_io(text) {
                saw_io_flag = true;
                let is_output = flags.is_output(text);

                if let Some(next) = tokens.get(i + 1).and_then(Token::as_text) {
                    let rewritten = work_dir.join(next);
                    if is_output {
                        primary_output = Some(rewritten.clone());
                    }
                    tokens[i + 1] = Token::Text(rewritten.to_string_lossy().into_owned());
                }
            }
        }

        i += 1;
    }

    if saw_io_flag {
        if let Some(parent) = primary_output.as_ref().and_then(|p| p.parent()) {
            fs::create_dir_all(parent).map_err(|source| StagingError::OutputPathCreation {
                dir: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let argv = tokens
        .into_iter()
        .map(|token| match token {
            Token::Text(s) => s,
            // Every buffer was replaced during the scan
            Token::Buffer(b) => b.name,
        })
        .collect();

    Ok(Staged {
        argv,
        artifacts,
        primary_output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::NamedBuffer;
    use tempfile::tempdir;

    fn text(s: &str) -> Token {
        Token::from(s)
    }

    #[test]
    fn test_buffer_staged_byte_identical() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        let payload = b"-----BEGIN KEY-----\nabc\n-----END KEY-----\n".to_vec();

        let staged = stage(
            vec![
                text("rsa"),
                text("-in"),
                Token::Buffer(NamedBuffer::new("domain.key", payload.clone())),
            ],
            &work,
            &IoFlags::default(),
        )
        .unwrap();

        let expected = work.join("domain.key");
        assert_eq!(staged.argv[2], expected.to_string_lossy());
        assert_eq!(fs::read(&expected).unwrap(), payload);
        assert_eq!(
            staged.artifacts,
            vec![StagedArtifact {
                name: "domain.key".to_string(),
                path: expected,
            }]
        );
    }

    #[test]
    fn test_staging_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let work = dir.path().to_path_buf();
        fs::write(work.join("domain.key"), b"old").unwrap();

        stage(
            vec![Token::Buffer(NamedBuffer::new("domain.key", b"new".to_vec()))],
            &work,
            &IoFlags::default(),
        )
        .unwrap();

        assert_eq!(fs::read(work.join("domain.key")).unwrap(), b"new");
    }

    #[test]
    fn test_io_path_prefixed_with_work_dir() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");

        let staged = stage(
            vec![text("req"), text("-out"), text("certs/req.pem")],
            &work,
            &IoFlags::default(),
        )
        .unwrap();

        let expected = work.join("certs/req.pem");
        assert_eq!(staged.argv[2], expected.to_string_lossy());
        assert_eq!(staged.primary_output, Some(expected.clone()));
        // Parent tree of the output path is created recursively
        assert!(expected.parent().unwrap().is_dir());
    }

    #[test]
    fn test_input_flag_does_not_set_primary_output() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");

        let staged = stage(
            vec![text("x509"), text("-in"), text("cert.pem")],
            &work,
            &IoFlags::default(),
        )
        .unwrap();

        assert_eq!(staged.argv[2], work.join("cert.pem").to_string_lossy());
        assert!(staged.primary_output.is_none());
        // No output path, so nothing to create
        assert!(!work.exists());
    }

    #[test]
    fn test_last_output_path_wins() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");

        let staged = stage(
            vec![
                text("-out"),
                text("first.pem"),
                text("-keyout"),
                text("keys/second.key"),
            ],
            &work,
            &IoFlags::default(),
        )
        .unwrap();

        assert_eq!(staged.primary_output, Some(work.join("keys/second.key")));
    }

    #[test]
    fn test_buffer_following_io_flag_keeps_staged_path() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");

        let staged = stage(
            vec![
                text("-in"),
                Token::Buffer(NamedBuffer::new("domain.key", b"k".to_vec())),
            ],
            &work,
            &IoFlags::default(),
        )
        .unwrap();

        // The staged path is not prefixed a second time
        assert_eq!(staged.argv[1], work.join("domain.key").to_string_lossy());
    }

    #[test]
    fn test_no_flags_no_filesystem_effects() {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");

        let staged = stage(
            vec![text("version"), text("-a")],
            &work,
            &IoFlags::default(),
        )
        .unwrap();

        assert_eq!(staged.argv, vec!["version", "-a"]);
        assert!(staged.artifacts.is_empty());
        assert!(!work.exists());
    }

    #[test]
    fn test_key_substring_also_matches_keyout() {
        let flags = IoFlags::default();
        assert!(flags.is_io("-keyout"));
        assert!(flags.is_io("-key"));
        assert!(flags.is_output("-keyout"));
        assert!(!flags.is_output("-key"));
    }

    #[test]
    fn test_staging_directory_failure_is_fatal() {
        let dir = tempdir().unwrap();
        // Non-recursive create fails when the parent is missing
        let work = dir.path().join("missing").join("work");

        let err = stage(
            vec![Token::Buffer(NamedBuffer::new("a.key", b"k".to_vec()))],
            &work,
            &IoFlags::default(),
        )
        .unwrap_err();

        assert!(matches!(err, StagingError::StagingDirectory { .. }));
    }
}
