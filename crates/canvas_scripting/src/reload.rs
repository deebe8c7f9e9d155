//! Module registry and hot reload.
//!
//! The registry is owned by one runtime instance — never process-global —
//! so multiple runtimes cannot cross-contaminate. Each tracked module keeps
//! a content snapshot; reload compares, re-executes the changed ones
//! through the normal load path, and patches function-valued fields into
//! the old table object so long-lived references observe the new bodies.
//!
//! Executing a chunk can itself call back into `require`, so no registry
//! borrow may be held across chunk execution. The `*_via` helpers own that
//! discipline; `ModuleRegistry` methods only touch data.

use crate::sandbox::build_env;
use anyhow::Result;
use mlua::{Lua, RegistryKey, Table, Value};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Files larger than this are loaded but not tracked for reload; content
/// snapshotting them every pass would not be worth it.
pub const MAX_TRACKED_SOURCE_BYTES: usize = 256 * 1024;

struct LoadedModule {
    name: String,
    filepath: PathBuf,
    /// None means "not tracked" (oversized source), skipped with a warning.
    snapshot: Option<String>,
    builtin: bool,
    value: RegistryKey,
}

#[derive(Debug, Default)]
pub struct ReloadReport {
    pub reloaded: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<(String, String)>,
}

impl ReloadReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// The categorized report printed to the script's output channel.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "reload: {} reloaded, {} unchanged, {} skipped, {} errors\n",
            self.reloaded.len(),
            self.unchanged.len(),
            self.skipped.len(),
            self.errors.len()
        ));
        for name in &self.reloaded {
            out.push_str(&format!("  reloaded: {name}\n"));
        }
        for name in &self.skipped {
            out.push_str(&format!("  skipped (too large): {name}\n"));
        }
        for (name, err) in &self.errors {
            out.push_str(&format!("  error: {name}: {err}\n"));
        }
        out
    }
}

pub struct ModuleRegistry {
    root: PathBuf,
    /// Insertion order preserved so reload reports are stable.
    modules: Vec<LoadedModule>,
    index: HashMap<String, usize>,
    loading: HashSet<String>,
}

impl ModuleRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            modules: Vec::new(),
            index: HashMap::new(),
            loading: HashSet::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name.replace('.', "/")).with_extension("lua")
    }

    /// Register a host-provided module (the canvas API itself, bundled
    /// libraries with internal state). Builtins resolve through `require`
    /// but are never reloaded.
    pub fn register_builtin(&mut self, lua: &Lua, name: &str, value: Table) -> Result<()> {
        let key = lua
            .create_registry_value(Value::Table(value))
            .map_err(|e| anyhow::anyhow!("failed to register builtin '{}': {}", name, e))?;
        self.insert(LoadedModule {
            name: name.to_string(),
            filepath: PathBuf::new(),
            snapshot: None,
            builtin: true,
            value: key,
        });
        Ok(())
    }

    fn insert(&mut self, module: LoadedModule) {
        if let Some(&i) = self.index.get(&module.name) {
            self.modules[i] = module;
        } else {
            self.index.insert(module.name.clone(), self.modules.len());
            self.modules.push(module);
        }
    }

    fn cached(&self, lua: &Lua, name: &str) -> Option<mlua::Result<Value>> {
        self.index
            .get(name)
            .map(|&i| lua.registry_value(&self.modules[i].value))
    }

    /// Current cached value of a module, if loaded.
    pub fn lookup(&self, lua: &Lua, name: &str) -> Option<Value> {
        self.cached(lua, name).and_then(|r| r.ok())
    }

    pub fn tracked_files(&self) -> Vec<PathBuf> {
        self.modules
            .iter()
            .filter(|m| !m.builtin && m.snapshot.is_some())
            .map(|m| m.filepath.clone())
            .collect()
    }

    /// Drop every entry; registry keys are reclaimed on drop. Called at
    /// runtime disposal.
    pub fn clear(&mut self) {
        self.modules.clear();
        self.index.clear();
        self.loading.clear();
    }
}

/// Run a chunk in a fresh sandbox environment and return its value. A
/// module returning nothing yields `true`, per Lua convention.
fn execute_chunk(lua: &Lua, name: &str, path: &Path, content: &str) -> mlua::Result<Value> {
    let env = build_env(lua).map_err(|e| mlua::Error::RuntimeError(e.to_string()))?;
    let chunk_name = path.display().to_string();
    let chunk = lua.load(content).set_name(&chunk_name).set_environment(env);
    let value: Value = chunk.eval()?;
    tracing::debug!("Loaded module '{}' from {}", name, chunk_name);
    Ok(match value {
        Value::Nil => Value::Boolean(true),
        v => v,
    })
}

fn snapshot_of(name: &str, content: &str) -> Option<String> {
    if content.len() > MAX_TRACKED_SOURCE_BYTES {
        tracing::warn!(
            "Module '{}' is {} bytes; too large to track for hot reload",
            name,
            content.len()
        );
        None
    } else {
        Some(content.to_string())
    }
}

/// The normal load path behind the scripts' `require`. Cached values hit in
/// O(1); misses resolve under the script root, execute, and register.
pub fn require_via(lua: &Lua, registry: &Rc<RefCell<ModuleRegistry>>, name: &str) -> mlua::Result<Value> {
    {
        let reg = registry.borrow();
        if let Some(hit) = reg.cached(lua, name) {
            return hit;
        }
        if reg.loading.contains(name) {
            return Err(mlua::Error::RuntimeError(format!("circular require of module '{name}'")));
        }
    }
    let path = registry.borrow().resolve(name);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        mlua::Error::RuntimeError(format!("module '{}' not found at {}: {}", name, path.display(), e))
    })?;

    registry.borrow_mut().loading.insert(name.to_string());
    // No borrow held here: the chunk may itself call require
    let result = execute_chunk(lua, name, &path, &content);
    registry.borrow_mut().loading.remove(name);
    let value = result?;

    let key = lua.create_registry_value(value.clone())?;
    registry.borrow_mut().insert(LoadedModule {
        name: name.to_string(),
        filepath: path,
        snapshot: snapshot_of(name, &content),
        builtin: false,
        value: key,
    });
    Ok(value)
}

/// Track an entry-point script. Same mechanics as `require`, but the caller
/// already has the source in hand.
pub fn load_entry_via(
    lua: &Lua,
    registry: &Rc<RefCell<ModuleRegistry>>,
    name: &str,
    path: &Path,
    content: &str,
) -> mlua::Result<Value> {
    let value = execute_chunk(lua, name, path, content)?;
    let key = lua.create_registry_value(value.clone())?;
    registry.borrow_mut().insert(LoadedModule {
        name: name.to_string(),
        filepath: path.to_path_buf(),
        snapshot: snapshot_of(name, content),
        builtin: false,
        value: key,
    });
    Ok(value)
}

/// Walk every tracked module: unchanged ones are reported as such, changed
/// ones are re-executed and patched. One module's failure never prevents
/// attempting the others, and a failed module keeps its previous value.
pub fn reload_all_via(lua: &Lua, registry: &Rc<RefCell<ModuleRegistry>>) -> ReloadReport {
    let mut report = ReloadReport::default();
    let count = registry.borrow().modules.len();
    for i in 0..count {
        let (name, path, snapshot, builtin) = {
            let reg = registry.borrow();
            let m = &reg.modules[i];
            (m.name.clone(), m.filepath.clone(), m.snapshot.clone(), m.builtin)
        };
        if builtin {
            continue;
        }
        let Some(snapshot) = snapshot else {
            report.skipped.push(name);
            continue;
        };
        let current = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                report.errors.push((name, format!("cannot read {}: {}", path.display(), e)));
                continue;
            }
        };
        if current == snapshot {
            report.unchanged.push(name);
            continue;
        }

        // Execute first, patch after: the old entry stays registered
        // untouched until the new chunk has run cleanly, so failures cannot
        // half-update the registry.
        match execute_chunk(lua, &name, &path, &current) {
            Ok(new_value) => {
                if let Err(e) = patch_module(lua, registry, i, new_value, &name, &current) {
                    report.errors.push((name, e.to_string()));
                } else {
                    report.reloaded.push(name);
                }
            }
            Err(e) => report.errors.push((name, e.to_string())),
        }
    }
    report
}

fn patch_module(
    lua: &Lua,
    registry: &Rc<RefCell<ModuleRegistry>>,
    i: usize,
    new_value: Value,
    name: &str,
    content: &str,
) -> mlua::Result<()> {
    let old_value: Value = {
        let reg = registry.borrow();
        lua.registry_value(&reg.modules[i].value)?
    };
    match (&old_value, &new_value) {
        (Value::Table(old), Value::Table(new)) => {
            // Preserve the old table's identity: copy only function fields
            // so every live alias sees the new bodies while runtime state
            // on the table survives. Removed non-function fields are left
            // alone.
            for pair in new.clone().pairs::<Value, Value>() {
                let (k, v) = pair?;
                if matches!(v, Value::Function(_)) {
                    old.set(k, v)?;
                }
            }
            // The registry keeps pointing at the old (patched) table
        }
        _ => {
            // Non-table modules swap wholesale
            let key = lua.create_registry_value(new_value)?;
            registry.borrow_mut().modules[i].value = key;
        }
    }
    registry.borrow_mut().modules[i].snapshot = snapshot_of(name, content);
    tracing::info!("Reloaded module '{}'", name);
    Ok(())
}
