//! Container recipe rendering.

use std::fmt::Write;

use bootline_core::config::Recipe;

/// Build context location inside the image.
const CONTEXT_DIR: &str = "/src";

/// Dockerfile that builds once (`bootline build`) and launches on every start.
/// The build context is copied to [`CONTEXT_DIR`], where the recipe is
/// rediscovered, so the same file drives both commands.
pub fn containerfile(recipe: &Recipe) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FROM {}", recipe.image.base);
    let _ = writeln!(out, "ENV PYTHONUNBUFFERED=1");
    let _ = writeln!(out, "COPY {} /usr/local/bin/bootline", recipe.image.binary);
    let _ = writeln!(out, "WORKDIR {CONTEXT_DIR}");
    let _ = writeln!(out, "COPY . {CONTEXT_DIR}");
    let _ = writeln!(out, "RUN bootline build");
    let _ = writeln!(out, "EXPOSE {}", recipe.launch.expose);
    let _ = writeln!(out, r#"CMD ["bootline", "launch"]"#);
    out
}
