//! Path matching for protection zones and the built-in file tables.
//!
//! Zone patterns are globs where `*` stays inside one path component and
//! `**` crosses directories. Two conveniences apply on top of plain glob
//! matching: a pattern without `/` also matches the file name alone
//! (`*.pem` protects keys at any depth), and a pattern without wildcards
//! also matches as a directory prefix (`infra` protects `infra/main.tf`).

use glob::{MatchOptions, Pattern};

use vigil_types::{ActionEvent, ProtectionZone};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Normalise a project-relative path: forward slashes, no leading `./`.
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.strip_prefix("./").unwrap_or(&path);
    path.trim_end_matches('/').to_string()
}

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Whether a zone pattern covers `path`. Invalid globs never match.
pub fn zone_matches(pattern: &str, path: &str) -> bool {
    let pattern = normalize(pattern.trim());
    if pattern.is_empty() {
        return false;
    }
    let path = normalize(path);

    if !has_wildcard(&pattern) {
        return path == pattern || path.starts_with(&format!("{pattern}/"));
    }

    let Ok(glob) = Pattern::new(&pattern) else {
        return false;
    };
    if glob.matches_with(&path, MATCH_OPTIONS) {
        return true;
    }
    if let Some(base) = pattern.strip_suffix("/**") {
        if matches_ancestor(base, &path) {
            return true;
        }
    }
    if !pattern.contains('/') {
        let name = path.rsplit('/').next().unwrap_or(&path);
        return glob.matches_with(name, MATCH_OPTIONS);
    }
    false
}

/// Whether some proper ancestor directory of `path` matches `base`.
fn matches_ancestor(base: &str, path: &str) -> bool {
    let base_glob = Pattern::new(base).ok();
    path.match_indices('/').any(|(idx, _)| {
        let dir = &path[..idx];
        match &base_glob {
            Some(glob) => glob.matches_with(dir, MATCH_OPTIONS),
            None => dir == base,
        }
    })
}

/// The strictest zone covering `path`, if any.
///
/// Ties keep the zone listed first.
pub fn strictest_zone<'z>(zones: &'z [ProtectionZone], path: &str) -> Option<&'z ProtectionZone> {
    zones
        .iter()
        .filter(|zone| zone_matches(&zone.path_pattern, path))
        .fold(None, |best: Option<&ProtectionZone>, zone| match best {
            Some(b) if b.level.strictness() >= zone.level.strictness() => Some(b),
            _ => Some(zone),
        })
}

/// Lower-cased view of an event path used by the built-in rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Full normalised path.
    pub path: String,
    /// Final component.
    pub name: String,
    /// Extension of `name` without the dot. Dotfiles such as `.env` have none.
    pub extension: Option<String>,
    /// Parent components, outermost first.
    pub dirs: Vec<String>,
}

impl PathInfo {
    pub fn of(event: &ActionEvent) -> Self {
        Self::from_path(&event.file_path)
    }

    pub fn from_path(path: &str) -> Self {
        let path = normalize(path).to_ascii_lowercase();
        let mut parts: Vec<String> = path
            .split('/')
            .filter(|p| !p.is_empty() && *p != ".")
            .map(str::to_string)
            .collect();
        let name = parts.pop().unwrap_or_default();
        let extension = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_string()),
            _ => None,
        };
        Self {
            path,
            name,
            extension,
            dirs: parts,
        }
    }

    /// Whether any parent directory has one of `names`.
    pub fn in_dir(&self, names: &[&str]) -> bool {
        self.dirs.iter().any(|d| names.contains(&d.as_str()))
    }

    /// Whether the parent directories contain `seq` as consecutive components.
    pub fn under(&self, seq: &[&str]) -> bool {
        !seq.is_empty()
            && self
                .dirs
                .windows(seq.len())
                .any(|w| w.iter().zip(seq).all(|(a, b)| a == b))
    }

    pub fn extension_in(&self, exts: &[&str]) -> bool {
        self.extension
            .as_deref()
            .is_some_and(|ext| exts.contains(&ext))
    }
}

/// A compiled table of file-name globs.
#[derive(Debug, Clone)]
pub struct NameSet {
    patterns: Vec<Pattern>,
}

impl NameSet {
    /// Compile `patterns`. Entries that fail to parse are skipped.
    pub fn new(patterns: &[&str]) -> Self {
        Self {
            patterns: patterns.iter().filter_map(|p| Pattern::new(p).ok()).collect(),
        }
    }

    /// The first pattern matching `name`.
    pub fn matching(&self, name: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches_with(name, MATCH_OPTIONS))
            .map(Pattern::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.matching(name).is_some()
    }
}
