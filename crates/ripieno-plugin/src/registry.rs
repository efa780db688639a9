//! Plugin discovery across platform search paths.

use std::path::{Path, PathBuf};

use crate::host::PluginFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCandidate {
    pub path: PathBuf,
    pub format: PluginFormat,
}

/// Is this file a loadable plugin library?
pub fn is_plugin_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("so") | Some("dll") | Some("dylib")
    )
}

/// Scan one directory (non-recursive) for plugin libraries of a format.
pub fn scan_directory(path: &Path, format: PluginFormat) -> Vec<PluginCandidate> {
    let mut candidates = Vec::new();
    let Ok(entries) = std::fs::read_dir(path) else {
        return candidates;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if is_plugin_library(&path) {
            candidates.push(PluginCandidate { path, format });
        }
    }
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates
}

fn env_paths(variable: &str) -> Vec<PathBuf> {
    std::env::var(variable)
        .map(|v| v.split(':').map(PathBuf::from).collect())
        .unwrap_or_default()
}

/// Search paths for a plugin format: the conventional environment
/// override first, then the platform directories.
pub fn search_paths(format: PluginFormat) -> Vec<PathBuf> {
    let (variable, subdir) = match format {
        PluginFormat::Ladspa => ("LADSPA_PATH", "ladspa"),
        PluginFormat::Dssi => ("DSSI_PATH", "dssi"),
        PluginFormat::Lv2 => ("LV2_PATH", "lv2"),
    };
    let mut paths = env_paths(variable);

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from(format!("/usr/lib/{subdir}")));
        paths.push(PathBuf::from(format!("/usr/local/lib/{subdir}")));
        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(format!("{home}/.{subdir}")));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from(format!("/Library/Audio/Plug-Ins/{subdir}")));
        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(format!(
                "{home}/Library/Audio/Plug-Ins/{subdir}"
            )));
        }
    }

    #[cfg(target_os = "windows")]
    {
        let _ = subdir;
        paths.push(PathBuf::from("C:\\Program Files\\Audio\\Plug-Ins"));
    }

    paths
}

/// Scan every search path of every format.
pub fn scan_system() -> Vec<PluginCandidate> {
    let mut candidates = Vec::new();
    for format in [PluginFormat::Ladspa, PluginFormat::Dssi, PluginFormat::Lv2] {
        for path in search_paths(format) {
            if path.is_dir() {
                let found = scan_directory(&path, format);
                tracing::info!(path = %path.display(), count = found.len(), ?format, "scanned plugin directory");
                candidates.extend(found);
            }
        }
    }
    candidates
}
