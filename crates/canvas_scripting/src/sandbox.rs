use anyhow::Result;
use mlua::{Function, Lua, Table, Value};

/// Registry slot holding the whitelisted base environment.
pub const SAFE_BASE: &str = "safe_base";
/// Registry slot holding the environment of the most recently loaded script.
pub const CURRENT_ENV: &str = "current_env";

pub struct LuaSandbox {
    lua: Lua,
}

impl LuaSandbox {
    pub fn new() -> Result<Self> {
        let lua = Lua::new();
        let sandbox = Self { lua };
        sandbox.setup_safe_environment()?;
        Ok(sandbox)
    }

    fn setup_safe_environment(&self) -> Result<()> {
        let globals = self.lua.globals();

        // Build a whitelisted environment (safe_base)
        let safe = self
            .lua
            .create_table()
            .map_err(|e| anyhow::anyhow!("create_table failed: {}", e))?;
        for name in [
            "assert", "error", "pcall", "xpcall", "select", "pairs", "ipairs", "next",
            "tonumber", "tostring", "type", "unpack", "rawget", "rawset", "rawequal", "rawlen",
            "setmetatable", "getmetatable",
        ] {
            if let Ok(v) = globals.get::<Value>(name) {
                safe.set(name, v)
                    .map_err(|e| anyhow::anyhow!("safe.set {} failed: {}", name, e))?;
            }
        }
        for lib in ["math", "table", "string", "utf8"] {
            if let Ok(v) = globals.get::<Value>(lib) {
                safe.set(lib, v)
                    .map_err(|e| anyhow::anyhow!("safe.set {} failed: {}", lib, e))?;
            }
        }
        // Limited debug.traceback for script-side diagnostics
        if let Ok(debug_tbl) = globals.get::<Table>("debug") {
            if let Ok(tb) = debug_tbl.get::<Function>("traceback") {
                let dbg = self
                    .lua
                    .create_table()
                    .map_err(|e| anyhow::anyhow!("create_table failed: {}", e))?;
                dbg.set("traceback", tb)
                    .map_err(|e| anyhow::anyhow!("dbg.set traceback failed: {}", e))?;
                safe.set("debug", dbg)
                    .map_err(|e| anyhow::anyhow!("safe.set debug failed: {}", e))?;
            }
        }

        // Lock package system on globals; the runtime installs its own
        // registry-backed require
        self.lock_package_system(&globals)?;

        self.lua
            .set_named_registry_value(SAFE_BASE, safe)
            .map_err(|e| anyhow::anyhow!("set_named_registry_value failed: {}", e))?;
        Ok(())
    }

    fn lock_package_system(&self, globals: &Table) -> Result<()> {
        // Empty package table prevents access to the stock loader
        let package_table = self
            .lua
            .create_table()
            .map_err(|e| anyhow::anyhow!("Failed to create package table: {}", e))?;
        package_table
            .set("path", "")
            .map_err(|e| anyhow::anyhow!("Failed to set package.path: {}", e))?;
        package_table
            .set("cpath", "")
            .map_err(|e| anyhow::anyhow!("Failed to set package.cpath: {}", e))?;
        globals
            .set("package", package_table)
            .map_err(|e| anyhow::anyhow!("Failed to set package table: {}", e))?;
        Ok(())
    }

    /// Fresh environment whose `__index` points at the safe base, with the
    /// bridge namespaces injected. Every script chunk and every module runs
    /// in one of these.
    pub fn build_env(&self) -> Result<Table> {
        build_env(&self.lua)
    }

    pub fn load_script(&self, script_content: &str, script_name: &str) -> Result<()> {
        let env = self.build_env()?;
        let chunk = self.lua.load(script_content).set_name(script_name);
        let chunk = chunk.set_environment(env.clone());
        chunk
            .exec()
            .map_err(|e| anyhow::anyhow!("Failed to load script {}: {}", script_name, e))?;
        self.lua
            .set_named_registry_value(CURRENT_ENV, env)
            .map_err(|e| anyhow::anyhow!("set current_env failed: {}", e))?;
        Ok(())
    }

    pub fn call_function<A, R>(&self, func_name: &str, args: A) -> Result<R>
    where
        A: mlua::IntoLuaMulti,
        R: mlua::FromLuaMulti,
    {
        let env: Table = self
            .lua
            .named_registry_value(CURRENT_ENV)
            .map_err(|e| anyhow::anyhow!("get current_env failed: {}", e))?;
        let func: Function = env
            .get(func_name)
            .map_err(|e| anyhow::anyhow!("Function '{}' not found: {}", func_name, e))?;
        func.call(args)
            .map_err(|e| anyhow::anyhow!("Error calling function '{}': {}", func_name, e))
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn get_memory_usage(&self) -> f64 {
        // Lua memory usage in MB
        self.lua.used_memory() as f64 / 1024.0 / 1024.0
    }
}

/// Standalone variant of `LuaSandbox::build_env` for callers that only hold
/// the `Lua` handle (the require loader, the reload path).
pub fn build_env(lua: &Lua) -> Result<Table> {
    let safe_base: Table = lua
        .named_registry_value(SAFE_BASE)
        .map_err(|e| anyhow::anyhow!("get safe_base failed: {}", e))?;
    let env = lua
        .create_table()
        .map_err(|e| anyhow::anyhow!("create_table failed: {}", e))?;
    let mt = lua
        .create_table()
        .map_err(|e| anyhow::anyhow!("create_table failed: {}", e))?;
    mt.set("__index", safe_base)
        .map_err(|e| anyhow::anyhow!("set __index failed: {}", e))?;
    env.set_metatable(Some(mt));

    // Inject the bridge namespaces if installed
    for ns in ["canvas", "assets", "print", "require"] {
        if let Ok(v) = lua.globals().get::<Value>(ns) {
            if !matches!(v, Value::Nil) {
                env.set(ns, v)
                    .map_err(|e| anyhow::anyhow!("env.set {} failed: {}", ns, e))?;
            }
        }
    }
    Ok(env)
}
