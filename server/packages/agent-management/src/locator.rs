use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::agents::AgentId;

/// How long the health check trusts a previous discovery result.
pub const LIVENESS_TTL: Duration = Duration::from_secs(60);

/// Resolves the executable for one backend.
pub trait LocateBinary: Send + Sync + fmt::Debug {
    fn locate(&self) -> Option<PathBuf>;
}

/// Package-manager install directories that GUI-launched processes usually
/// miss because they never source the user's shell profile.
pub fn package_manager_dirs(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if cfg!(windows) {
        if let Some(home) = home {
            dirs.push(home.join("AppData").join("Roaming").join("npm"));
            dirs.push(home.join(".volta").join("bin"));
        }
        return dirs;
    }

    dirs.push(PathBuf::from("/usr/local/bin"));
    dirs.push(PathBuf::from("/opt/homebrew/bin"));
    if let Some(home) = home {
        dirs.push(home.join(".local").join("bin"));
        dirs.push(home.join(".npm-global").join("bin"));
        dirs.push(home.join(".volta").join("bin"));
        dirs.extend(nvm_bin_dirs(home));
    }
    dirs
}

fn nvm_bin_dirs(home: &Path) -> Vec<PathBuf> {
    let versions = home.join(".nvm").join("versions").join("node");
    let Ok(entries) = fs::read_dir(&versions) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path().join("bin"))
        .collect();
    dirs.sort();
    dirs
}

/// Inherited search path followed by the package-manager directories.
pub fn extended_path(base: Option<&OsStr>, home: Option<&Path>) -> OsString {
    let mut entries: Vec<PathBuf> = base
        .map(|value| std::env::split_paths(value).collect())
        .unwrap_or_default();
    entries.extend(package_manager_dirs(home));
    std::env::join_paths(&entries)
        .unwrap_or_else(|_| base.map(OsStr::to_os_string).unwrap_or_default())
}

/// The extended search path for the current process environment.
pub fn current_extended_path() -> OsString {
    let base = std::env::var_os("PATH");
    let home = dirs::home_dir();
    extended_path(base.as_deref(), home.as_deref())
}

#[derive(Debug, Clone)]
pub struct BinaryLocator {
    tool: String,
    override_env: Option<String>,
    home: Option<PathBuf>,
    base_path: Option<OsString>,
    login_shell_probe: bool,
}

impl BinaryLocator {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            override_env: None,
            home: dirs::home_dir(),
            base_path: std::env::var_os("PATH"),
            login_shell_probe: true,
        }
    }

    pub fn for_agent(agent: AgentId) -> Self {
        Self::new(agent.binary_name()).with_override_env(agent.path_override_env())
    }

    pub fn with_override_env(mut self, name: impl Into<String>) -> Self {
        self.override_env = Some(name.into());
        self
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn with_base_path(mut self, base_path: Option<OsString>) -> Self {
        self.base_path = base_path;
        self
    }

    pub fn with_login_shell_probe(mut self, enabled: bool) -> Self {
        self.login_shell_probe = enabled;
        self
    }

    pub fn search_path(&self) -> OsString {
        extended_path(self.base_path.as_deref(), self.home.as_deref())
    }

    pub fn common_paths(&self) -> Vec<PathBuf> {
        let file_name = if cfg!(windows) {
            format!("{}.cmd", self.tool)
        } else {
            self.tool.clone()
        };
        package_manager_dirs(self.home.as_deref())
            .into_iter()
            .filter(|dir| !cfg!(windows) || dir.ends_with("npm"))
            .map(|dir| dir.join(&file_name))
            .collect()
    }

    fn find_with_lookup_command(&self) -> Option<PathBuf> {
        let program = if cfg!(windows) { "where" } else { "which" };
        let output = Command::new(program)
            .arg(&self.tool)
            .env("PATH", self.search_path())
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        first_existing_line(stdout.lines())
    }

    fn find_with_login_shell(&self) -> Option<PathBuf> {
        for shell in ["bash", "zsh"] {
            let output = Command::new(shell)
                .args(["-l", "-c", &format!("which {}", self.tool)])
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output();
            let Ok(output) = output else { continue };
            if !output.status.success() {
                continue;
            }
            // Profiles may print banners before the path.
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(path) = first_existing_line(stdout.lines().rev()) {
                tracing::debug!(tool = %self.tool, shell, path = %path.display(), "binary found via login shell");
                return Some(path);
            }
        }
        None
    }

    fn find_with_override(&self) -> Option<PathBuf> {
        let name = self.override_env.as_deref()?;
        let value = std::env::var_os(name)?;
        if value.is_empty() {
            return None;
        }
        let path = PathBuf::from(value);
        path.exists().then_some(path)
    }
}

impl LocateBinary for BinaryLocator {
    fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = self.find_with_lookup_command() {
            tracing::debug!(tool = %self.tool, path = %path.display(), "binary found on search path");
            return Some(path);
        }
        if !cfg!(windows) && self.login_shell_probe {
            if let Some(path) = self.find_with_login_shell() {
                return Some(path);
            }
        }
        if let Some(path) = self.common_paths().into_iter().find(|path| path.exists()) {
            tracing::debug!(tool = %self.tool, path = %path.display(), "binary found at common location");
            return Some(path);
        }
        let found = self.find_with_override();
        if found.is_none() {
            tracing::debug!(tool = %self.tool, "binary not found");
        }
        found
    }
}

fn first_existing_line<'a>(lines: impl Iterator<Item = &'a str>) -> Option<PathBuf> {
    lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Per-backend availability memo for the health check.
#[derive(Debug)]
pub struct LivenessCache {
    ttl: Duration,
    entries: Mutex<HashMap<AgentId, (Instant, bool)>>,
}

impl LivenessCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_available(&self, agent: AgentId, locator: &dyn LocateBinary) -> bool {
        if let Ok(entries) = self.entries.lock() {
            if let Some((checked_at, available)) = entries.get(&agent) {
                if checked_at.elapsed() < self.ttl {
                    return *available;
                }
            }
        }

        let available = locator.locate().is_some();
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(agent, (Instant::now(), available));
        }
        available
    }
}

impl Default for LivenessCache {
    fn default() -> Self {
        Self::new(LIVENESS_TTL)
    }
}
