//! End-to-end tests for the extension-packager binary.
//!
//! Each test builds a throwaway extension project and runs the real CLI
//! against it.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn packager() -> Command {
    let mut cmd = Command::cargo_bin("extension-packager").unwrap();
    cmd.env_remove("NODE_ENV").env_remove("RUST_LOG");
    cmd
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_build_writes_component_manifest() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "manifest.json",
        r#"{ "id": "ext1", "version": "1.0.0", "name": "Ext", "description": "d", "index": "index.ts" }"#,
    );
    write(
        root,
        "index.ts",
        "export class Button { static manifest = { type: \"button\" }; }\n",
    );

    packager().arg("build").arg(root).assert().success();

    let manifest = read_json(&root.join("dist/manifest.json"));
    assert_eq!(
        manifest,
        json!({
            "id": "ext1",
            "version": "1.0.0",
            "name": "Ext",
            "description": "d",
            "components": [{ "type": "button" }]
        })
    );
    assert!(root.join("dist/index.js").is_file());
}

#[test]
fn test_build_full_project() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "manifest.json",
        r##"{ "id": "ext2", "version": "2.0.0", "name": "Widgets", "index": "src/index.tsx", "styleVariables": { "primary": "#ff0000" } }"##,
    );
    write(
        root,
        "src/index.tsx",
        r#"import React from 'react';
import styles from './panel.less';
import { describe } from 'business/describe';

interface Props { label: string }

export class Panel extends React.Component<Props> {
  manifest = describe('panel', styles.root);
  render() {
    return <div className={styles.root}>{this.props.label}</div>;
  }
}

export const Toolbar = {
  manifest: { type: 'toolbar', onClick: function (event: string) { return event; } },
};

export const VERSION: string = '2.0.0';
"#,
    );
    write(
        root,
        "src/business/describe.ts",
        "export function describe(type: string, className: string) {\n  return { type, className };\n}\n",
    );
    write(root, "src/panel.less", "@primary: blue;\n.root { color: @primary; }\n");

    let assert = packager()
        .args(["build", "--profile", "production"])
        .arg(root)
        .assert()
        .success();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert_eq!(stderr.matches("Export 'VERSION' skipped").count(), 1);

    let manifest = read_json(&root.join("dist/manifest.json"));
    let components = manifest["components"].as_array().unwrap();
    assert_eq!(components.len(), 2);
    assert_eq!(components[0]["type"], "panel");
    assert!(components[0]["className"].as_str().unwrap().starts_with("panel__root__"));
    assert_eq!(components[1]["type"], "toolbar");
    assert!(components[1]["onClick"].as_str().unwrap().starts_with("/Function("));

    let css = fs::read_to_string(root.join("dist/index.css")).unwrap();
    assert!(css.contains("color:red"));
}

#[test]
fn test_unknown_node_env_builds_for_development() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "manifest.json",
        r#"{ "id": "ext1", "version": "1.0.0", "index": "index.js" }"#,
    );
    write(root, "index.js", "export class Button { static manifest = { type: 'button' }; }\n");

    packager().env("NODE_ENV", "test").arg("build").arg(root).assert().success();

    assert!(root.join("dist/manifest.json").is_file());
}

#[test]
fn test_missing_manifest_fails_without_output() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(root, "index.js", "export const a = 1;\n");

    packager()
        .arg("build")
        .arg(root)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("manifest.json"));

    assert!(!root.join("dist").exists());
}

#[test]
fn test_compile_error_fails_without_manifest() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "manifest.json",
        r#"{ "id": "ext1", "version": "1.0.0", "index": "index.js" }"#,
    );
    write(root, "index.js", "export class Broken { static manifest = { ; }\n");

    packager()
        .arg("build")
        .arg(root)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Build failed"));

    assert!(!root.join("dist/manifest.json").exists());
}

#[test]
fn test_unresolved_import_is_reported() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(
        root,
        "manifest.json",
        r#"{ "id": "ext1", "version": "1.0.0", "index": "index.js" }"#,
    );
    write(root, "index.js", "import missing from './missing';\nexport default missing;\n");

    packager()
        .arg("build")
        .arg(root)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Can't resolve './missing'"));
}

#[test]
fn test_usage_errors_print_help() {
    packager()
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Usage:"));

    packager()
        .arg("build")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Usage:"));

    packager()
        .args(["serve", "somewhere"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("build"));

    packager()
        .args(["build", "somewhere", "--bogus"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--bogus"))
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_help_and_version_succeed() {
    packager()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch"));

    packager()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
