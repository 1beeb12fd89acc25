//! Python dependency manifest (`requirements.txt`) parsing and the resolved
//! package set captured after installation.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ProvisioningError;

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<constraint>[^;]*?)\s*(?:;\s*(?P<marker>.+))?$",
        )
        .expect("static regex")
    })
}

fn constraint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:@\s*\S+|(?:===|==|!=|~=|<=|>=|<|>)\s*[A-Za-z0-9.*+!_-]+(?:\s*,\s*(?:===|==|!=|~=|<=|>=|<|>)\s*[A-Za-z0-9.*+!_-]+)*)$")
            .expect("static regex")
    })
}

/// PEP 503 normalisation: lowercase, runs of `-_.` collapse to `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_sep {
                out.push('-');
            }
            in_sep = true;
        } else {
            out.extend(c.to_lowercase());
            in_sep = false;
        }
    }
    out
}

/// One `name[extras] constraint ; marker` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    /// Version specifier, empty when unpinned.
    pub constraint: String,
    pub marker: Option<String>,
}

impl Requirement {
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Canonical single-line form used for fingerprinting.
    pub fn canonical(&self) -> String {
        let mut s = self.normalized_name();
        if !self.extras.is_empty() {
            let mut extras: Vec<String> = self.extras.iter().map(|e| normalize_name(e)).collect();
            extras.sort();
            s.push('[');
            s.push_str(&extras.join(","));
            s.push(']');
        }
        s.push_str(&self.constraint.replace(' ', ""));
        if let Some(m) = &self.marker {
            s.push_str("; ");
            s.push_str(m);
        }
        s
    }
}

/// Ordered requirements plus any pip option lines, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyManifest {
    pub path: PathBuf,
    pub requirements: Vec<Requirement>,
    pub options: Vec<String>,
}

impl DependencyManifest {
    pub fn load(path: &Path) -> Result<Self, ProvisioningError> {
        if !path.is_file() {
            return Err(ProvisioningError::ManifestMissing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| ProvisioningError::Manifest {
            path: path.to_path_buf(),
            line: 0,
            reason: e.to_string(),
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, ProvisioningError> {
        let mut manifest = Self {
            path: path.to_path_buf(),
            ..Self::default()
        };
        let mut seen = HashSet::new();
        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let err = |reason: String| ProvisioningError::Manifest {
                path: path.to_path_buf(),
                line: line_no,
                reason,
            };
            let line = strip_comment(raw).trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('-') {
                manifest.options.push(line.to_string());
                continue;
            }
            let caps = requirement_re()
                .captures(line)
                .ok_or_else(|| err(format!("cannot parse requirement '{line}'")))?;
            let name = caps["name"].to_string();
            let constraint = caps
                .name("constraint")
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            if !constraint.is_empty() && !constraint_re().is_match(&constraint) {
                return Err(err(format!("invalid version constraint '{constraint}' for {name}")));
            }
            let extras = caps
                .name("extras")
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            let marker = caps.name("marker").map(|m| m.as_str().trim().to_string());
            if !seen.insert(normalize_name(&name)) {
                return Err(err(format!("duplicate requirement '{name}'")));
            }
            manifest.requirements.push(Requirement {
                name,
                extras,
                constraint,
                marker,
            });
        }
        Ok(manifest)
    }

    /// SHA-256 over the canonical requirement lines, in declaration order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for opt in &self.options {
            hasher.update(opt.as_bytes());
            hasher.update(b"\n");
        }
        for req in &self.requirements {
            hasher.update(req.canonical().as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    pub fn names(&self) -> Vec<String> {
        self.requirements.iter().map(Requirement::normalized_name).collect()
    }
}

/// A `#` preceded by whitespace starts a comment; a bare `#` inside a URL
/// fragment does not.
fn strip_comment(raw: &str) -> &str {
    let mut prev_ws = true;
    for (pos, c) in raw.char_indices() {
        if c == '#' && prev_ws {
            return &raw[..pos];
        }
        prev_ws = c.is_whitespace();
    }
    raw
}

/// Installed packages as reported by `pip freeze`, normalised and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSet {
    pub packages: BTreeSet<String>,
}

impl ResolvedSet {
    /// Parse `pip freeze` output. Editable and direct-reference lines keep their name only.
    pub fn from_freeze(output: &str) -> Self {
        let packages = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("-e"))
            .map(|l| {
                if let Some((name, version)) = l.split_once("==") {
                    format!("{}=={}", normalize_name(name.trim()), version.trim())
                } else if let Some((name, _)) = l.split_once(" @ ") {
                    normalize_name(name.trim())
                } else {
                    normalize_name(l)
                }
            })
            .collect();
        Self { packages }
    }

    pub fn contains(&self, normalized: &str) -> bool {
        self.packages.iter().any(|p| {
            p == normalized
                || p.strip_prefix(normalized)
                    .is_some_and(|rest| rest.starts_with("=="))
        })
    }

    /// Declared names absent from this set. Requirements carrying an
    /// environment marker may legitimately be skipped by pip and are not checked.
    pub fn missing(&self, manifest: &DependencyManifest) -> Vec<String> {
        manifest
            .requirements
            .iter()
            .filter(|r| r.marker.is_none())
            .map(Requirement::normalized_name)
            .filter(|n| !self.contains(n))
            .collect()
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for p in &self.packages {
            hasher.update(p.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}
