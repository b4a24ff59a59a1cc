/// Shell environment
/// Shell discovery and the extended PATH handed to every spawned session.
/// macOS bundled apps start with a minimal environment, so NVM, Homebrew and
/// local bin directories are added explicitly.

use std::path::{Path, PathBuf};

/// `$SHELL`, or `/bin/bash` when unset
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "/bin/bash".to_string())
}

/// Resolve a program name against `path_var` the way `execvp` would.
///
/// Names containing a separator are checked as paths.
pub fn locate_program(program: &str, path_var: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Get the NVM node bin path, respecting the user's default alias or falling
/// back to the latest installed version
pub fn nvm_node_bin(home: &Path) -> Option<PathBuf> {
    let nvm_dir = home.join(".nvm");
    let versions_dir = nvm_dir.join("versions").join("node");

    let mut versions: Vec<String> = std::fs::read_dir(&versions_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.starts_with('v'))
        .collect();

    if versions.is_empty() {
        return None;
    }

    let default_alias = std::fs::read_to_string(nvm_dir.join("alias").join("default"))
        .ok()
        .map(|s| s.trim().to_string());

    // "22" matches "v22.16.0"
    let aliased = default_alias.and_then(|alias| {
        versions
            .iter()
            .find(|v| v.trim_start_matches('v').starts_with(&alias))
            .cloned()
    });

    let selected = match aliased {
        Some(v) => v,
        None => {
            sort_versions_semver(&mut versions);
            versions.last()?.clone()
        }
    };

    let node_bin = versions_dir.join(selected).join("bin");
    node_bin.is_dir().then_some(node_bin)
}

/// Sort node versions by semver (v18.20.8 < v20.19.5 < v22.16.0)
fn sort_versions_semver(versions: &mut [String]) {
    let parse_version = |v: &str| -> (u32, u32, u32) {
        let nums: Vec<u32> = v
            .trim_start_matches('v')
            .split('.')
            .filter_map(|s| s.parse().ok())
            .collect();
        (
            nums.first().copied().unwrap_or(0),
            nums.get(1).copied().unwrap_or(0),
            nums.get(2).copied().unwrap_or(0),
        )
    };
    versions.sort_by_key(|v| parse_version(v));
}

/// Build PATH with NVM, Homebrew and common locations ahead of `current_path`
pub fn extended_path(home: &Path, current_path: &str) -> String {
    let mut paths: Vec<String> = vec![
        "/opt/homebrew/bin".to_string(),
        "/opt/homebrew/sbin".to_string(),
        "/usr/local/bin".to_string(),
        "/usr/local/sbin".to_string(),
        home.join(".local").join("bin").display().to_string(),
        "/usr/bin".to_string(),
        "/bin".to_string(),
        "/usr/sbin".to_string(),
        "/sbin".to_string(),
    ];

    if let Some(nvm_bin) = nvm_node_bin(home) {
        paths.insert(0, nvm_bin.display().to_string());
    }

    if !current_path.is_empty() {
        paths.push(current_path.to_string());
    }

    paths.join(":")
}

/// `extended_path` for the current process environment
pub fn build_extended_path() -> String {
    let home = dirs::home_dir().unwrap_or_default();
    let current_path = std::env::var("PATH").unwrap_or_default();
    extended_path(&home, &current_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn semver_sort_orders_numerically() {
        let mut versions = vec![
            "v22.16.0".to_string(),
            "v9.1.0".to_string(),
            "v20.19.5".to_string(),
        ];
        sort_versions_semver(&mut versions);
        assert_eq!(versions, vec!["v9.1.0", "v20.19.5", "v22.16.0"]);
    }

    #[test]
    fn nvm_prefers_default_alias() {
        let home = tempfile::tempdir().unwrap();
        let versions = home.path().join(".nvm/versions/node");
        for v in ["v18.20.8", "v22.16.0"] {
            fs::create_dir_all(versions.join(v).join("bin")).unwrap();
        }
        fs::create_dir_all(home.path().join(".nvm/alias")).unwrap();
        fs::write(home.path().join(".nvm/alias/default"), "18\n").unwrap();

        let bin = nvm_node_bin(home.path()).unwrap();
        assert!(bin.ends_with("v18.20.8/bin"));
    }

    #[test]
    fn nvm_falls_back_to_latest() {
        let home = tempfile::tempdir().unwrap();
        let versions = home.path().join(".nvm/versions/node");
        for v in ["v18.20.8", "v22.16.0", "v20.1.0"] {
            fs::create_dir_all(versions.join(v).join("bin")).unwrap();
        }
        let bin = nvm_node_bin(home.path()).unwrap();
        assert!(bin.ends_with("v22.16.0/bin"));
    }

    #[test]
    fn extended_path_keeps_current_path_last() {
        let home = tempfile::tempdir().unwrap();
        let path = extended_path(home.path(), "/custom/bin");
        assert!(path.starts_with("/opt/homebrew/bin"));
        assert!(path.ends_with(":/custom/bin"));
    }

    #[test]
    fn locate_program_checks_paths_and_search_dirs() {
        assert_eq!(locate_program("/bin/sh", ""), Some(PathBuf::from("/bin/sh")));
        assert!(locate_program("/definitely/not/a/shell", "").is_none());
        assert!(locate_program("sh", "/usr/bin:/bin").is_some());
        assert!(locate_program("no-such-shell-xyz", "/usr/bin:/bin").is_none());
    }
}
