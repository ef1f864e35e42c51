//! Nix expressions handed to the backend

use std::fmt::Write;
use std::path::Path;

/// Batch evaluation script; takes `{ attr-json, nixpkgs }`.
pub const EVAL_ATTRS_NIX: &str = include_str!("../nix/evalAttrs.nix");

/// Above this many paths the review derivation depends on a single `buildEnv`.
const BUILD_ENV_THRESHOLD: usize = 50;

/// Quote the last component of an attribute path: `a.b.c` -> `a.b."c"`.
pub fn escape_attr(attr: &str) -> String {
    match attr.rfind('.') {
        Some(index) => format!("{}.\"{}\"", &attr[..index], &attr[index + 1..]),
        None => attr.to_string(),
    }
}

/// Quote a string as a Nix string literal.
pub fn nix_string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${");
    format!("\"{}\"", escaped)
}

/// Nix path expression for an absolute filesystem path.
pub fn nix_path(path: &Path) -> String {
    format!("(/. + {})", nix_string(&path.to_string_lossy()))
}

/// Render an expression that evaluates the eval script against a checkout.
pub fn render_eval_expression(script: &Path, attr_json: &Path, nixpkgs: &Path) -> String {
    format!(
        "(import {} {{ attr-json = {}; nixpkgs = {}; }})",
        nix_path(script),
        nix_path(attr_json),
        nix_path(nixpkgs)
    )
}

/// Render a derivation that depends on every selected attribute.
///
/// Building it builds all of them; `nix build --keep-going` carries on past
/// individual failures.
pub fn render_build_expression(nixpkgs: &Path, attrs: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{{ pkgs ? import {} {{}} }}:", nix_path(nixpkgs));
    out.push_str("with pkgs;\nlet\n  paths = [\n");
    for attr in attrs {
        let _ = writeln!(out, "        {}", escape_attr(attr));
    }
    out.push_str("  ];\n");
    out.push_str("  env = buildEnv {\n    name = \"env\";\n    inherit paths;\n    ignoreCollisions = true;\n  };\n");
    out.push_str("in stdenv.mkDerivation rec {\n  name = \"review-shell\";\n");
    let _ = writeln!(
        out,
        "  buildInputs = if builtins.length paths > {} then [ env ] else paths;",
        BUILD_ENV_THRESHOLD
    );
    out.push_str("  unpackPhase = \":\";\n  installPhase = \"touch $out\";\n}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_escape_attr() {
        assert_eq!(escape_attr("hello"), "hello");
        assert_eq!(escape_attr("python3Packages.requests"), "python3Packages.\"requests\"");
        assert_eq!(escape_attr("a.b.c"), "a.b.\"c\"");
    }

    #[test]
    fn test_nix_string_escapes() {
        assert_eq!(nix_string("a\"b"), "\"a\\\"b\"");
        assert_eq!(nix_string("${x}"), "\"\\${x}\"");
    }

    #[test]
    fn test_build_expression_lists_attrs() {
        let expr = render_build_expression(
            &PathBuf::from("/work/nixpkgs"),
            &["hello".to_string(), "python3Packages.requests".to_string()],
        );

        assert!(expr.starts_with("{ pkgs ? import (/. + \"/work/nixpkgs\") {} }:"));
        assert!(expr.contains("        hello\n"));
        assert!(expr.contains("        python3Packages.\"requests\"\n"));
        assert!(expr.contains("builtins.length paths > 50"));
    }

    #[test]
    fn test_eval_expression_imports_script() {
        let expr = render_eval_expression(
            &PathBuf::from("/tmp/evalAttrs.nix"),
            &PathBuf::from("/tmp/attrs.json"),
            &PathBuf::from("/work/nixpkgs"),
        );
        assert_eq!(
            expr,
            "(import (/. + \"/tmp/evalAttrs.nix\") { attr-json = (/. + \"/tmp/attrs.json\"); nixpkgs = (/. + \"/work/nixpkgs\"); })"
        );
    }

    #[test]
    fn test_eval_script_is_bundled() {
        assert!(EVAL_ATTRS_NIX.contains("attr-json"));
        assert!(EVAL_ATTRS_NIX.contains("drvPath"));
    }
}
