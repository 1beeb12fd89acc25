//! Artifact assembler: places sources, static assets and the built front-end
//! under the install root.

use std::fs;
use std::path::{Path, PathBuf};

use bootline_core::config::FrontendConfig;
use bootline_core::layout::{ApplicationLayout, EntryPoint};
use bootline_core::AssemblyError;
use walkdir::WalkDir;

use crate::process::{CommandRunner, CommandSpec};

/// Output directories probed when the recipe does not name one.
pub const OUTPUT_CANDIDATES: &[&str] = &["dist", "build", "out"];

fn copy_err(from: &Path, to: &Path, source: std::io::Error) -> AssemblyError {
    AssemblyError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    }
}

/// Copy `from` into `to`, preserving relative paths and skipping directories
/// named in `exclude`. Returns the number of files copied.
///
/// Copying a tree onto itself is a no-op. When `to` lies inside `from` the
/// destination subtree is not walked.
pub fn copy_tree(from: &Path, to: &Path, exclude: &[String]) -> Result<usize, AssemblyError> {
    let src = fs::canonicalize(from).map_err(|_| AssemblyError::MissingSource(from.to_path_buf()))?;
    fs::create_dir_all(to).map_err(|e| copy_err(from, to, e))?;
    let dest = fs::canonicalize(to).map_err(|e| copy_err(from, to, e))?;
    if src == dest {
        tracing::debug!(path = %src.display(), "Source and destination coincide, nothing to copy");
        return Ok(0);
    }

    let walker = WalkDir::new(&src).min_depth(1).into_iter().filter_entry(|e| {
        let is_excluded_dir = e.file_type().is_dir()
            && exclude.iter().any(|x| e.file_name().to_string_lossy() == x.as_str());
        !is_excluded_dir && e.path() != dest
    });

    let mut copied = 0;
    for entry in walker {
        let entry = entry.map_err(|e| copy_err(from, to, e.into()))?;
        let Ok(rel) = entry.path().strip_prefix(&src) else {
            continue;
        };
        let target = dest.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target).map_err(|e| copy_err(entry.path(), &target, e))?;
        } else if ft.is_symlink() && entry.path().is_dir() {
            tracing::warn!(path = %entry.path().display(), "Skipping symlinked directory");
        } else {
            fs::copy(entry.path(), &target).map_err(|e| copy_err(entry.path(), &target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy the application source and static trees into the install root.
/// A missing static tree yields an empty destination directory.
pub fn copy_sources(layout: &ApplicationLayout) -> Result<usize, AssemblyError> {
    if !layout.source_from.is_dir() {
        return Err(AssemblyError::MissingSource(layout.source_from.clone()));
    }
    let mut copied = copy_tree(&layout.source_from, &layout.source_to, &layout.exclude)?;
    tracing::info!(
        from = %layout.source_from.display(),
        to = %layout.source_to.display(),
        files = copied,
        "Copied application source"
    );

    if layout.static_from.is_dir() {
        copied += copy_tree(&layout.static_from, &layout.static_to, &layout.exclude)?;
    } else {
        tracing::info!(path = %layout.static_from.display(), "No static tree, creating empty destination");
        fs::create_dir_all(&layout.static_to)
            .map_err(|e| copy_err(&layout.static_from, &layout.static_to, e))?;
    }
    Ok(copied)
}

/// The entry module must be importable from the install root.
pub fn verify_entry(layout: &ApplicationLayout, entry: &EntryPoint) -> Result<PathBuf, AssemblyError> {
    layout
        .entry_module(entry)
        .ok_or_else(|| AssemblyError::EntryMissing {
            entry: entry.to_string(),
            root: layout.install_root.clone(),
        })
}

fn is_non_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut it| it.next().is_some())
        .unwrap_or(false)
}

/// Configured output directory, else the first non-empty candidate.
pub fn locate_output(frontend_dir: &Path, frontend: &FrontendConfig) -> Result<PathBuf, AssemblyError> {
    let candidates: Vec<PathBuf> = match &frontend.output {
        Some(out) => vec![frontend_dir.join(out)],
        None => OUTPUT_CANDIDATES.iter().map(|c| frontend_dir.join(c)).collect(),
    };
    candidates
        .iter()
        .find(|c| is_non_empty_dir(c))
        .cloned()
        .ok_or_else(|| AssemblyError::MissingOutput {
            candidates: candidates.iter().map(|c| c.display().to_string()).collect(),
        })
}

/// Run `npm run <script>` and publish its output into the static destination.
pub fn build_frontend(
    runner: &dyn CommandRunner,
    layout: &ApplicationLayout,
    frontend: &FrontendConfig,
) -> Result<PathBuf, AssemblyError> {
    let dir = layout.project_root.join(&frontend.dir);
    if !dir.join("package.json").is_file() {
        return Err(AssemblyError::NoPackageJson(dir));
    }

    let spec = CommandSpec::new("npm")
        .args(["run", frontend.script.as_str()])
        .cwd(&dir)
        .env("CI", "1")
        .timeout_secs(frontend.timeout_secs)
        .streaming();
    tracing::info!(command = %spec.display(), dir = %dir.display(), "Building front-end");
    let outcome = runner.run(&spec).map_err(|e| AssemblyError::BuildFailed {
        command: spec.display(),
        code: None,
        stderr: format!("{e:#}"),
    })?;
    if outcome.timed_out {
        return Err(AssemblyError::BuildTimedOut {
            command: spec.display(),
            timeout_secs: frontend.timeout_secs,
        });
    }
    if !outcome.success() {
        return Err(AssemblyError::BuildFailed {
            command: spec.display(),
            code: outcome.code,
            stderr: outcome.stderr_tail(),
        });
    }

    let output = locate_output(&dir, frontend)?;
    let dest = match &frontend.dest_subdir {
        Some(sub) => layout.static_to.join(sub),
        None => layout.static_to.clone(),
    };
    let files = copy_tree(&output, &dest, &[])?;
    tracing::info!(
        output = %output.display(),
        dest = %dest.display(),
        files,
        "Published front-end build"
    );
    Ok(dest)
}
