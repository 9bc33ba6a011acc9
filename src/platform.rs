//! Platform identification and the executable binding table

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Platform resolution errors
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("platform not supported: {0}")]
    Unsupported(String),

    #[error("executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Platform identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
    Unknown,
}

impl Platform {
    /// Get current platform
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Unknown
        }
    }

    /// Check if platform is Windows
    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::Windows)
    }

    /// Get platform name as string
    pub fn name(&self) -> &str {
        match self {
            Platform::Linux => "linux",
            Platform::MacOS => "macos",
            Platform::Windows => "windows",
            Platform::Unknown => "unknown",
        }
    }

    /// Get default shell for platform
    pub fn default_shell(&self) -> &str {
        match self {
            Platform::Windows => "cmd.exe",
            _ => "/bin/sh",
        }
    }

    /// Flag that makes the shell run a command line and exit
    pub fn shell_arg(&self) -> &str {
        match self {
            Platform::Windows => "/C",
            _ => "-c",
        }
    }
}

/// Location of a tool's executable inside a bundle, relative to its root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolBinding {
    /// Subdirectory under the bundle root (e.g. `bin/win`)
    pub subdir: PathBuf,

    /// Executable file name (e.g. `tool.exe`)
    pub executable: String,
}

impl ToolBinding {
    /// Create a binding
    pub fn new(subdir: impl Into<PathBuf>, executable: impl Into<String>) -> Self {
        Self {
            subdir: subdir.into(),
            executable: executable.into(),
        }
    }
}

/// Data-driven mapping from platform to executable binding.
///
/// A platform without an entry is unsupported; resolution reports it by
/// name instead of branching over a fixed set of identifiers.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entries: HashMap<Platform, ToolBinding>,
}

impl BindingTable {
    /// Create empty table
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The historical bundle layout: a Windows build only, under `bin/win`
    pub fn windows_only(executable: impl Into<String>) -> Self {
        let mut table = Self::new();
        table.insert(Platform::Windows, ToolBinding::new("bin/win", executable));
        table
    }

    /// Install or replace the binding for a platform
    pub fn insert(&mut self, platform: Platform, binding: ToolBinding) {
        self.entries.insert(platform, binding);
    }

    /// Get the binding for a platform
    pub fn get(&self, platform: Platform) -> Option<&ToolBinding> {
        self.entries.get(&platform)
    }

    /// Check whether a platform has a binding
    pub fn supports(&self, platform: Platform) -> bool {
        self.entries.contains_key(&platform)
    }

    /// Resolve the binding for a platform
    pub fn resolve(&self, platform: Platform) -> Result<&ToolBinding, PlatformError> {
        self.entries
            .get(&platform)
            .ok_or_else(|| PlatformError::Unsupported(platform.name().to_string()))
    }
}
