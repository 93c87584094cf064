use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::models::MonitoredTarget;
use crate::services::{ProcessInspector, SystemProcesses};

/// Write side of the OS process table
pub trait ProcessLauncher: Send + Sync {
    /// Start `program` detached from the watchdog, returns the new PID
    fn launch(&self, program: &Path) -> io::Result<u32>;
}

impl ProcessLauncher for SystemProcesses {
    fn launch(&self, program: &Path) -> io::Result<u32> {
        let mut command = Command::new(program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut command);

        let mut child = command.spawn()?;
        let pid = child.id();

        // Reap the child whenever it exits; dropping `Child` never kills it
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(pid)
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
    command.creation_flags(CREATE_NEW_CONSOLE);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

/// Conventional install locations.
///
/// The leading `{root}` placeholder names an [`InstallRoots`] entry,
/// `{name}` is the target name, `{Name}` its capitalised form and `{exe}`
/// the platform executable suffix. Evaluated in order.
pub const INSTALL_TEMPLATES: &[&str] = &[
    "{program_files}/{name}/{name}{exe}",
    "{program_files_x86}/{name}/{name}{exe}",
    "{local_data}/{name}/{name}{exe}",
    "{roaming_data}/{name}/{name}{exe}",
    "{program_files}/{Name}/{Name}{exe}",
    "{program_files_x86}/{Name}/{Name}{exe}",
    "{opt}/{name}/{name}{exe}",
    "{user_bin}/{name}{exe}",
];

/// Directories substituted for the root placeholder of a template
#[derive(Debug, Clone, Default)]
pub struct InstallRoots {
    roots: HashMap<String, PathBuf>,
}

impl InstallRoots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roots of the current platform and user
    pub fn detect() -> Self {
        let mut roots = Self::new();

        for (root, var) in [
            ("program_files", "ProgramFiles"),
            ("program_files_x86", "ProgramFiles(x86)"),
        ] {
            if let Some(dir) = std::env::var_os(var) {
                roots = roots.with(root, dir);
            }
        }
        if let Some(dir) = dirs::data_local_dir() {
            roots = roots.with("local_data", dir);
        }
        if let Some(dir) = dirs::data_dir() {
            roots = roots.with("roaming_data", dir);
        }
        if let Some(dir) = dirs::executable_dir() {
            roots = roots.with("user_bin", dir);
        }
        if cfg!(unix) {
            roots = roots.with("opt", "/opt");
        }

        roots
    }

    pub fn with(mut self, root: &str, dir: impl Into<PathBuf>) -> Self {
        self.roots.insert(root.to_string(), dir.into());
        self
    }

    pub fn get(&self, root: &str) -> Option<&Path> {
        self.roots.get(root).map(PathBuf::as_path)
    }
}

/// First letter upper, the rest lower
fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Expand one template, `None` when its root is unknown on this system
pub fn expand_template(template: &str, name: &str, roots: &InstallRoots) -> Option<PathBuf> {
    let rest = template.strip_prefix('{')?;
    let (root, rest) = rest.split_once('}')?;
    let mut path = roots.get(root)?.to_path_buf();

    let capitalized = capitalize(name);
    let rest = rest
        .replace("{name}", name)
        .replace("{Name}", &capitalized)
        .replace("{exe}", std::env::consts::EXE_SUFFIX);

    for component in rest.split('/').filter(|c| !c.is_empty()) {
        path.push(component);
    }
    Some(path)
}

/// How a relaunch candidate was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchTier {
    StoredPath,
    InstallDirectory,
    ResolvedByName,
    BareName,
}

impl fmt::Display for LaunchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LaunchTier::StoredPath => "executable path",
            LaunchTier::InstallDirectory => "common path",
            LaunchTier::ResolvedByName => "resolved path",
            LaunchTier::BareName => "name (last resort)",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchCandidate {
    pub tier: LaunchTier,
    pub program: PathBuf,
}

/// Locates a launchable executable for a target
#[derive(Debug, Clone)]
pub struct LaunchResolver {
    templates: Vec<String>,
    roots: InstallRoots,
}

impl LaunchResolver {
    pub fn new(roots: InstallRoots) -> Self {
        Self {
            templates: INSTALL_TEMPLATES.iter().map(|t| t.to_string()).collect(),
            roots,
        }
    }

    pub fn with_templates(mut self, templates: &[&str]) -> Self {
        self.templates = templates.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Existing files among the expanded install templates
    pub fn install_candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = Vec::new();
        for template in &self.templates {
            if let Some(path) = expand_template(template, name, &self.roots) {
                if path.is_file() && !found.contains(&path) {
                    found.push(path);
                }
            }
        }
        found
    }

    /// Executable of an already running process named like the target
    pub fn running_executable<P: ProcessInspector + ?Sized>(
        &self,
        inspector: &P,
        name: &str,
    ) -> Option<PathBuf> {
        let needle = name.to_lowercase();
        let processes = match inspector.find_matching_processes(&needle) {
            Ok(processes) => processes,
            Err(e) => {
                log::warn!("Running-process lookup for {} failed: {}", name, e);
                return None;
            }
        };

        processes
            .into_iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .filter_map(|p| p.exe_path)
            .find(|exe| exe.is_file())
    }

    pub fn search_path(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    /// Ordered relaunch candidates, stored path first, bare name last
    pub fn candidates<P: ProcessInspector + ?Sized>(
        &self,
        inspector: &P,
        target: &MonitoredTarget,
    ) -> Vec<LaunchCandidate> {
        let mut candidates = Vec::new();
        let mut push = |tier: LaunchTier, program: PathBuf| {
            if !candidates.iter().any(|c: &LaunchCandidate| c.program == program) {
                candidates.push(LaunchCandidate { tier, program });
            }
        };

        if let Some(stored) = &target.executable_path {
            if stored.exists() {
                push(LaunchTier::StoredPath, stored.clone());
            }
        }

        for path in self.install_candidates(&target.name) {
            push(LaunchTier::InstallDirectory, path);
        }

        if let Some(path) = self
            .running_executable(inspector, &target.name)
            .or_else(|| self.search_path(&target.name))
        {
            push(LaunchTier::ResolvedByName, path);
        }

        push(LaunchTier::BareName, PathBuf::from(&target.name));
        candidates
    }

    /// Best guess of an executable for a target that has none stored
    pub fn discover<P: ProcessInspector + ?Sized>(&self, inspector: &P, name: &str) -> Option<PathBuf> {
        self.search_path(name)
            .or_else(|| self.install_candidates(name).into_iter().next())
            .or_else(|| self.running_executable(inspector, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::FakeProcesses;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn exe(name: &str) -> String {
        format!("{}{}", name, std::env::consts::EXE_SUFFIX)
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("editor"), "Editor");
        assert_eq!(capitalize("vLC"), "Vlc");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_expand_template() {
        let roots = InstallRoots::new().with("program_files", "/apps");
        let path = expand_template("{program_files}/{Name}/{name}{exe}", "editor", &roots).unwrap();
        assert_eq!(path, Path::new("/apps").join("Editor").join(exe("editor")));

        assert!(expand_template("{local_data}/{name}", "editor", &roots).is_none());
        assert!(expand_template("no-root/{name}", "editor", &roots).is_none());
    }

    #[test]
    fn test_install_candidates_in_template_order() {
        let local = TempDir::new().unwrap();
        let roaming = TempDir::new().unwrap();
        let in_local = local.path().join("editor").join(exe("editor"));
        let in_roaming = roaming.path().join("editor").join(exe("editor"));
        touch(&in_roaming);
        touch(&in_local);

        let resolver = LaunchResolver::new(
            InstallRoots::new()
                .with("local_data", local.path())
                .with("roaming_data", roaming.path()),
        );
        assert_eq!(resolver.install_candidates("editor"), vec![in_local, in_roaming]);
        assert!(resolver.install_candidates("viewer").is_empty());
    }

    #[test]
    fn test_candidates_order() {
        let dir = TempDir::new().unwrap();
        let stored = dir.path().join("stored").join(exe("editor"));
        let installed = dir.path().join("editor").join(exe("editor"));
        touch(&stored);
        touch(&installed);

        let fake = FakeProcesses::new();
        let resolver = LaunchResolver::new(InstallRoots::new().with("opt", dir.path()));
        let mut target = MonitoredTarget::new("editor");
        target.executable_path = Some(stored.clone());

        let candidates = resolver.candidates(&fake, &target);
        let tiers: Vec<LaunchTier> = candidates.iter().map(|c| c.tier).collect();
        assert_eq!(tiers.first(), Some(&LaunchTier::StoredPath));
        assert_eq!(tiers.last(), Some(&LaunchTier::BareName));
        assert_eq!(candidates[0].program, stored);
        assert_eq!(candidates[1].program, installed);
        assert_eq!(candidates.last().unwrap().program, PathBuf::from("editor"));
    }

    #[test]
    fn test_missing_stored_path_is_skipped() {
        let fake = FakeProcesses::new();
        let resolver = LaunchResolver::new(InstallRoots::new()).with_templates(&[]);
        let mut target = MonitoredTarget::new("wd-test-no-such-program");
        target.executable_path = Some(PathBuf::from("/definitely/not/here"));

        let candidates = resolver.candidates(&fake, &target);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].tier, LaunchTier::BareName);
    }

    #[test]
    fn test_running_process_resolution() {
        let dir = TempDir::new().unwrap();
        let running = dir.path().join(exe("viewer"));
        touch(&running);

        let fake = FakeProcesses::new();
        fake.spawn_with_exe("viewer", Some(running.as_path()), 1.0);
        let resolver = LaunchResolver::new(InstallRoots::new()).with_templates(&[]);

        assert_eq!(resolver.running_executable(&fake, "Viewer"), Some(running.clone()));
        assert_eq!(resolver.discover(&fake, "wd-test-viewer-xyz"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_discover_via_path() {
        let fake = FakeProcesses::new();
        let resolver = LaunchResolver::new(InstallRoots::new()).with_templates(&[]);
        let found = resolver.discover(&fake, "sh").unwrap();
        assert!(found.is_absolute());
    }
}
