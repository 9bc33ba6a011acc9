//! Bundled tool description and executable resolution

use crate::platform::{BindingTable, Platform, PlatformError, ToolBinding};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file shipped alongside the executable.
///
/// When an invocation asks for it, `flag` and the resolved file path are
/// added to the argument list as two extra tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfFile {
    /// Flag preceding the path (e.g. `-config`)
    pub flag: String,

    /// File name next to the executable (e.g. `tool.cnf`)
    pub file: String,
}

/// The default configuration argument for one resolved platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfArg {
    pub flag: String,
    pub path: PathBuf,
}

/// A bundled command-line tool: name, bundle root and per-platform bindings
#[derive(Debug, Clone)]
pub struct Toolchain {
    name: String,
    root: PathBuf,
    bindings: BindingTable,
    conf: Option<ConfFile>,
}

impl Toolchain {
    /// Describe a bundled tool
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, bindings: BindingTable) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            bindings,
            conf: None,
        }
    }

    /// Bind the current platform to an explicit executable path.
    ///
    /// Useful for tests and for tools resolved outside any bundle.
    pub fn local(name: impl Into<String>, executable: impl AsRef<Path>) -> Self {
        let executable = executable.as_ref();
        let root = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file = executable
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut bindings = BindingTable::new();
        bindings.insert(Platform::current(), ToolBinding::new("", file));

        Self::new(name, root, bindings)
    }

    /// Attach a default configuration file shipped next to the executable
    pub fn with_conf(mut self, flag: impl Into<String>, file: impl Into<String>) -> Self {
        self.conf = Some(ConfFile {
            flag: flag.into(),
            file: file.into(),
        });
        self
    }

    /// Program name; a leading argument token equal to it is dropped
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bundle root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Platform bindings
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    /// Resolve the executable (and conf argument, if any) for a platform.
    ///
    /// Fails with [`PlatformError::Unsupported`] when the table has no
    /// entry for the platform, before any filesystem or process side
    /// effects happen.
    pub fn resolve(&self, platform: Platform) -> Result<ResolvedTool, PlatformError> {
        let binding = self.bindings.resolve(platform)?;
        let dir = self.root.join(&binding.subdir);
        let path = dir.join(&binding.executable);

        debug!("resolved {} to {}", self.name, path.display());

        Ok(ResolvedTool {
            path,
            conf: self.conf.as_ref().map(|c| ConfArg {
                flag: c.flag.clone(),
                path: dir.join(&c.file),
            }),
        })
    }
}

/// A tool executable ready to launch
#[derive(Debug, Clone)]
pub struct ResolvedTool {
    /// Executable path
    pub path: PathBuf,

    /// Default configuration argument, when the bundle ships one
    pub conf: Option<ConfArg>,
}

impl ResolvedTool {
    /// Use an explicit executable path, no bundle involved
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conf: None,
        }
    }

    /// Locate an executable outside any bundle.
    ///
    /// Absolute paths pass through untouched; bare names are looked up on
    /// `PATH`.
    pub fn locate(command: &str) -> Result<Self, PlatformError> {
        if Path::new(command).is_absolute() {
            return Ok(Self::at(command));
        }

        which::which(command)
            .map(Self::at)
            .map_err(|_| PlatformError::ExecutableNotFound(command.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_composes_bundle_paths() {
        let toolchain = Toolchain::new("tool", "/opt/bundle", BindingTable::windows_only("tool.exe"));

        let resolved = toolchain.resolve(Platform::Windows).unwrap();
        assert_eq!(resolved.path, PathBuf::from("/opt/bundle/bin/win/tool.exe"));
        assert!(resolved.conf.is_none());
    }

    #[test]
    fn test_conf_sits_next_to_executable() {
        let toolchain = Toolchain::new("tool", "/opt/bundle", BindingTable::windows_only("tool.exe"))
            .with_conf("-config", "tool.cnf");

        let resolved = toolchain.resolve(Platform::Windows).unwrap();
        let conf = resolved.conf.unwrap();
        assert_eq!(conf.flag, "-config");
        assert_eq!(conf.path, PathBuf::from("/opt/bundle/bin/win/tool.cnf"));
    }

    #[test]
    fn test_resolve_unsupported() {
        let toolchain = Toolchain::new("tool", "/opt/bundle", BindingTable::windows_only("tool.exe"));

        assert!(matches!(
            toolchain.resolve(Platform::MacOS),
            Err(PlatformError::Unsupported(_))
        ));
    }

    #[test]
    fn test_local_binds_current_platform() {
        let toolchain = Toolchain::local("sh", "/bin/sh");

        let resolved = toolchain.resolve(Platform::current()).unwrap();
        assert_eq!(resolved.path, PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_locate_absolute_passthrough() {
        let resolved = ResolvedTool::locate("/bin/sh").unwrap();
        assert_eq!(resolved.path, PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_locate_missing() {
        assert!(matches!(
            ResolvedTool::locate("definitely-not-a-real-tool-name"),
            Err(PlatformError::ExecutableNotFound(_))
        ));
    }
}
