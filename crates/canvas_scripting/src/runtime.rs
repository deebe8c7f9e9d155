//! The runtime object: owns the sandbox, the controller, assets, audio and
//! the module registry, and drives the per-frame tick with isolated error
//! handling.

use crate::api;
use crate::reload::{self, ModuleRegistry, ReloadReport};
use crate::sandbox::LuaSandbox;
use anyhow::Result;
use canvas_core::assets::{AssetSource, AssetStore};
use canvas_core::audio::{AudioBackend, AudioEngine, DecodePolicy, NullBackend};
use canvas_core::render::{NullTarget, RenderTarget};
use canvas_core::state::{CanvasController, StartError};
use mlua::Function;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The registered per-frame callback plus its definition location, captured
/// at registration so errors thrown deep inside it can still be pinned to
/// the script author's code.
pub struct TickHandler {
    pub func: Function,
    pub origin: String,
}

type SinkFn = Box<dyn Fn(&str)>;

/// State shared between the runtime and the bridge closures.
pub struct RuntimeShared {
    pub controller: RefCell<CanvasController>,
    pub assets: RefCell<AssetStore>,
    pub audio: RefCell<AudioEngine>,
    pub modules: Rc<RefCell<ModuleRegistry>>,
    pub tick: RefCell<Option<TickHandler>>,
    pub print: SinkFn,
    pub on_error: SinkFn,
}

impl RuntimeShared {
    /// Lifecycle start: re-entrancy is an explicit error, and preloading
    /// failures roll the active flag back so a later start can succeed.
    pub fn start(&self) -> std::result::Result<(), StartError> {
        self.controller.borrow_mut().start()?;
        if let Err(e) = self.assets.borrow_mut().preload() {
            self.controller.borrow_mut().stop();
            return Err(StartError::Preload(e));
        }
        Ok(())
    }
}

pub struct RuntimeConfig {
    pub script_root: PathBuf,
    pub target: Box<dyn RenderTarget>,
    pub source: AssetSource,
    pub audio_backend: Box<dyn AudioBackend>,
    pub decode_policy: DecodePolicy,
    pub print: SinkFn,
    pub on_error: SinkFn,
}

impl RuntimeConfig {
    /// Headless defaults rooted at `script_root`: null renderer, directory
    /// asset source, no audio device.
    pub fn headless(script_root: impl Into<PathBuf>) -> Self {
        let root = script_root.into();
        Self {
            source: AssetSource::dir(&root),
            script_root: root,
            target: Box::new(NullTarget),
            audio_backend: Box::new(NullBackend::new()),
            decode_policy: DecodePolicy::Lenient,
            print: Box::new(|msg| tracing::info!("[script] {}", msg)),
            on_error: Box::new(|msg| tracing::error!("[script] {}", msg)),
        }
    }
}

/// What one frame produced.
#[derive(Debug)]
pub struct FrameSummary {
    pub commands: u32,
    pub script_error: Option<String>,
}

pub struct CanvasRuntime {
    sandbox: LuaSandbox,
    shared: Rc<RuntimeShared>,
}

impl CanvasRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let sandbox = LuaSandbox::new()?;
        let shared = Rc::new(RuntimeShared {
            controller: RefCell::new(CanvasController::new(config.target)),
            assets: RefCell::new(AssetStore::new(config.source)),
            audio: RefCell::new(AudioEngine::new(config.audio_backend, config.decode_policy)),
            modules: Rc::new(RefCell::new(ModuleRegistry::new(config.script_root))),
            tick: RefCell::new(None),
            print: config.print,
            on_error: config.on_error,
        });
        api::install(sandbox.lua(), &shared)
            .map_err(|e| anyhow::anyhow!("failed to install bridge: {}", e))?;

        // The bridge namespaces are builtin modules: require()-able, never
        // hot-reloaded.
        {
            let lua = sandbox.lua();
            let globals = lua.globals();
            let mut registry = shared.modules.borrow_mut();
            for name in ["canvas", "assets"] {
                let table: mlua::Table = globals
                    .get(name)
                    .map_err(|e| anyhow::anyhow!("missing namespace {}: {}", name, e))?;
                registry.register_builtin(lua, name, table)?;
            }
        }

        Ok(Self { sandbox, shared })
    }

    pub fn lua(&self) -> &mlua::Lua {
        self.sandbox.lua()
    }

    pub fn sandbox(&self) -> &LuaSandbox {
        &self.sandbox
    }

    pub fn shared(&self) -> &Rc<RuntimeShared> {
        &self.shared
    }

    /// Load an inline chunk (not tracked for hot reload).
    pub fn load_script(&self, content: &str, name: &str) -> Result<()> {
        self.sandbox.load_script(content, name)
    }

    /// Load the entry-point script from disk and track it for hot reload
    /// under the module name "main".
    pub fn load_script_file(&self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read script {}: {}", path.display(), e))?;
        reload::load_entry_via(self.lua(), &self.shared.modules, "main", path, &content)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {}", path.display(), e))?;
        Ok(())
    }

    /// Unlock audio after the first user interaction (autoplay policy) and
    /// decode anything registered before the unlock. Returns availability.
    pub fn notify_interaction(&self) -> bool {
        self.shared.audio.borrow_mut().initialize()
    }

    /// Drive one frame: open the command buffer, invoke the tick callback
    /// under isolated error handling, flush, then let the audio engine
    /// settle fades and voice lifetimes.
    ///
    /// Script errors are reported and the loop continues next frame; only
    /// VM-fatal conditions (out of memory) propagate as `Err`.
    pub fn run_frame(&self, dt: f64) -> Result<FrameSummary> {
        self.shared.controller.borrow_mut().begin_frame(dt);

        let handler = self
            .shared
            .tick
            .borrow()
            .as_ref()
            .map(|h| (h.func.clone(), h.origin.clone()));

        let mut script_error = None;
        if let Some((func, origin)) = handler {
            // Drop the controller borrow before entering the VM: the
            // callback re-borrows through the bridge
            let delta = self.shared.controller.borrow().get_delta();
            if let Err(e) = func.call::<()>(delta) {
                if matches!(e, mlua::Error::MemoryError(_)) {
                    return Err(anyhow::anyhow!("fatal script error: {}", e));
                }
                let msg = annotate_script_error(&e.to_string(), &origin);
                (self.shared.on_error)(&msg);
                tracing::error!("tick callback failed: {}", msg);
                script_error = Some(msg);
            }
        }

        let commands = self.shared.controller.borrow_mut().end_frame()?;
        self.shared.audio.borrow_mut().update();
        Ok(FrameSummary { commands, script_error })
    }

    /// Re-check every tracked module and reload the changed ones. The
    /// categorized report also goes to the script's print channel.
    pub fn reload(&self) -> ReloadReport {
        let report = reload::reload_all_via(self.lua(), &self.shared.modules);
        (self.shared.print)(report.render().trim_end());
        report
    }

    /// Files whose edits should trigger a reload.
    pub fn watched_files(&self) -> Vec<PathBuf> {
        self.shared.modules.borrow().tracked_files()
    }

    /// Tear down: stop the frame driver, dispose audio, clear the module
    /// registry. Safe to call more than once.
    pub fn dispose(&self) {
        self.shared.controller.borrow_mut().stop();
        self.shared.audio.borrow_mut().dispose();
        self.shared.modules.borrow_mut().clear();
        *self.shared.tick.borrow_mut() = None;
    }
}

/// True when the first line of `msg` already carries a `source:line:`
/// location in the scripting language's convention.
pub fn has_source_location(msg: &str) -> bool {
    let first_line = msg.lines().next().unwrap_or("");
    let bytes = first_line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b':' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b':' {
                return true;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    false
}

/// Prefix errors that lack a location with the tick callback's definition
/// site, so failures deep in nested calls still point somewhere actionable.
pub fn annotate_script_error(msg: &str, origin: &str) -> String {
    if has_source_location(msg) {
        msg.to_string()
    } else {
        format!("{origin}: {msg}")
    }
}
