//! Hot reload: change detection, identity-preserving patches, failure
//! isolation, and the categorized report.

use canvas_scripting::runtime::{CanvasRuntime, RuntimeConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

fn scratch_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "luacanvas-reload-{}-{}-{}",
        tag,
        std::process::id(),
        DIR_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(root: &PathBuf, name: &str, content: &str) {
    std::fs::write(root.join(name), content).unwrap();
}

fn runtime_at(root: &PathBuf) -> CanvasRuntime {
    CanvasRuntime::new(RuntimeConfig::headless(root.clone())).unwrap()
}

const COUNTER_V1: &str = r##"
local M = { count = 0 }
function M.bump() M.count = M.count + 1 end
function M.value() return 7 end
return M
"##;

const COUNTER_V2: &str = r##"
local M = { count = 0 }
function M.bump() M.count = M.count + 1 end
function M.value() return 42 end
return M
"##;

#[test]
fn reload_patches_functions_but_preserves_table_identity_and_state() {
    let root = scratch_root("patch");
    write(&root, "counter.lua", COUNTER_V1);
    let runtime = runtime_at(&root);

    runtime
        .load_script(
            r##"
            local m = require("counter")
            m.bump()
            assert(m.value() == 7)
            "##,
            "step1.lua",
        )
        .unwrap();

    write(&root, "counter.lua", COUNTER_V2);
    let report = runtime.reload();
    assert!(report.ok());
    assert_eq!(report.reloaded, vec!["counter".to_string()]);

    // The cached module is the *old* table object, patched in place: the
    // new function body is visible and the old non-function state survives.
    runtime
        .load_script(
            r##"
            local m = require("counter")
            assert(m.value() == 42, "expected patched function body")
            assert(m.count == 1, "expected preserved state, got " .. tostring(m.count))
            "##,
            "step2.lua",
        )
        .unwrap();
}

#[test]
fn failed_reload_restores_previous_module() {
    let root = scratch_root("fail");
    write(&root, "counter.lua", COUNTER_V1);
    let runtime = runtime_at(&root);

    runtime
        .load_script(
            r##"
            local m = require("counter")
            m.bump()
            "##,
            "step1.lua",
        )
        .unwrap();

    write(&root, "counter.lua", "this is not ( valid lua");
    let report = runtime.reload();
    assert!(!report.ok());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "counter");

    // Behavior is completely unchanged after the failed reload
    runtime
        .load_script(
            r##"
            local m = require("counter")
            assert(m.value() == 7)
            assert(m.count == 1)
            "##,
            "step2.lua",
        )
        .unwrap();

    // Fixing the file reloads cleanly on the next pass
    write(&root, "counter.lua", COUNTER_V2);
    let report = runtime.reload();
    assert!(report.ok());
    assert_eq!(report.reloaded, vec!["counter".to_string()]);
}

#[test]
fn unchanged_modules_are_reported_separately() {
    let root = scratch_root("unchanged");
    write(&root, "counter.lua", COUNTER_V1);
    write(&root, "other.lua", "return { tag = 'other' }");
    let runtime = runtime_at(&root);

    runtime
        .load_script(
            r##"
            require("counter")
            require("other")
            "##,
            "step1.lua",
        )
        .unwrap();

    write(&root, "counter.lua", COUNTER_V2);
    let report = runtime.reload();
    assert_eq!(report.reloaded, vec!["counter".to_string()]);
    assert_eq!(report.unchanged, vec!["other".to_string()]);
    assert!(report.errors.is_empty());
}

#[test]
fn one_failure_does_not_block_other_reloads() {
    let root = scratch_root("isolation");
    write(&root, "good.lua", "return { function_version = 1, f = function() return 1 end }");
    write(&root, "bad.lua", "return { f = function() return 1 end }");
    let runtime = runtime_at(&root);

    runtime
        .load_script("require('good'); require('bad')", "step1.lua")
        .unwrap();

    write(&root, "good.lua", "return { function_version = 2, f = function() return 2 end }");
    write(&root, "bad.lua", "syntax error here (");
    let report = runtime.reload();
    assert_eq!(report.reloaded, vec!["good".to_string()]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "bad");
}

#[test]
fn oversized_modules_are_skipped_with_a_warning() {
    let root = scratch_root("oversized");
    let mut big = String::from("local M = {}\nfunction M.f() return 1 end\n");
    big.push_str(&"-- padding\n".repeat(40_000));
    big.push_str("return M\n");
    assert!(big.len() > canvas_scripting::reload::MAX_TRACKED_SOURCE_BYTES);
    write(&root, "big.lua", &big);
    let runtime = runtime_at(&root);

    runtime.load_script("require('big')", "step1.lua").unwrap();

    let report = runtime.reload();
    assert_eq!(report.skipped, vec!["big".to_string()]);
    assert!(report.reloaded.is_empty());
}

#[test]
fn builtin_namespaces_never_reload() {
    let root = scratch_root("builtin");
    let runtime = runtime_at(&root);
    // require of the bridge namespaces resolves from the registry
    runtime
        .load_script(
            r##"
            local c = require("canvas")
            assert(rawequal(c, canvas))
            "##,
            "step1.lua",
        )
        .unwrap();
    let report = runtime.reload();
    assert!(report.reloaded.is_empty());
    assert!(report.errors.is_empty());
    assert!(report.skipped.is_empty());
}

#[test]
fn missing_module_is_a_script_error_naming_the_path() {
    let root = scratch_root("missing");
    let runtime = runtime_at(&root);
    runtime
        .load_script(
            r##"
            local ok, err = pcall(require, "ghost")
            assert(not ok)
            assert(string.find(tostring(err), "ghost", 1, true), tostring(err))
            "##,
            "step1.lua",
        )
        .unwrap();
}

#[test]
fn entry_script_participates_in_reload() {
    let root = scratch_root("entry");
    write(&root, "main.lua", "canvas.set_size(100, 100)");
    let runtime = runtime_at(&root);
    runtime.load_script_file(&root.join("main.lua")).unwrap();
    assert_eq!(runtime.shared().controller.borrow().width(), 100);

    write(&root, "main.lua", "canvas.set_size(200, 200)");
    let report = runtime.reload();
    assert_eq!(report.reloaded, vec!["main".to_string()]);
    assert_eq!(runtime.shared().controller.borrow().width(), 200);
}
