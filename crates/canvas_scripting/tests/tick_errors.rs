//! Tick-callback error isolation and lifecycle guard behavior.

use canvas_core::command::DrawCommand;
use canvas_core::pixels::PixelStore;
use canvas_core::render::RenderTarget;
use canvas_scripting::runtime::{CanvasRuntime, RuntimeConfig};
use std::cell::RefCell;
use std::rc::Rc;

struct CaptureTarget(Rc<RefCell<Vec<DrawCommand>>>);

impl RenderTarget for CaptureTarget {
    fn flush(&mut self, commands: &[DrawCommand], _pixels: &PixelStore) -> anyhow::Result<()> {
        self.0.borrow_mut().extend_from_slice(commands);
        Ok(())
    }
}

fn runtime_with_capture() -> (CanvasRuntime, Rc<RefCell<Vec<DrawCommand>>>) {
    let captured = Rc::new(RefCell::new(Vec::new()));
    let mut config = RuntimeConfig::headless(std::env::temp_dir());
    config.target = Box::new(CaptureTarget(captured.clone()));
    let runtime = CanvasRuntime::new(config).unwrap();
    (runtime, captured)
}

#[test]
fn start_twice_is_a_script_error() {
    let (runtime, _) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.start()
            local ok, err = pcall(canvas.start)
            assert(not ok, "second start must fail")
            assert(string.find(tostring(err), "already running", 1, true), tostring(err))
            "##,
            "restart.lua",
        )
        .unwrap();
}

#[test]
fn stop_allows_a_later_start() {
    let (runtime, _) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.start()
            canvas.stop()
            canvas.start()
            assert(canvas.is_running())
            "##,
            "restart2.lua",
        )
        .unwrap();
}

#[test]
fn errors_without_location_get_the_callback_origin() {
    let (runtime, _) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.tick(function()
                -- level 0 suppresses Lua's own position info
                error("boom with no location", 0)
            end)
            "##,
            "noloc.lua",
        )
        .unwrap();
    let summary = runtime.run_frame(0.016).unwrap();
    let err = summary.script_error.expect("tick should have failed");
    assert!(err.contains("boom with no location"), "{err}");
    // Annotated with the callback's definition site
    assert!(err.contains("noloc"), "expected chunk name in: {err}");
}

#[test]
fn errors_with_location_are_not_double_prefixed() {
    let (runtime, _) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.tick(function()
                error("boom located")
            end)
            "##,
            "located.lua",
        )
        .unwrap();
    let summary = runtime.run_frame(0.016).unwrap();
    let err = summary.script_error.expect("tick should have failed");
    assert!(err.contains("boom located"), "{err}");
    // The raw error already carries source:line, so the origin must not be
    // prefixed again: only one chunk-name occurrence on the first line
    let first_line = err.lines().next().unwrap();
    assert_eq!(first_line.matches("located.lua").count(), 1, "{first_line}");
}

#[test]
fn frame_driver_reports_and_continues() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            local n = 0
            canvas.tick(function()
                n = n + 1
                if n == 1 then
                    error("first frame fails", 0)
                end
                canvas.fill_rect(n, 0, 1, 1)
            end)
            "##,
            "contain.lua",
        )
        .unwrap();

    let first = runtime.run_frame(0.016).unwrap();
    assert!(first.script_error.is_some());

    captured.borrow_mut().clear();
    let second = runtime.run_frame(0.016).unwrap();
    assert!(second.script_error.is_none());
    assert_eq!(
        *captured.borrow(),
        vec![DrawCommand::FillRect { x: 2.0, y: 0.0, width: 1.0, height: 1.0 }]
    );
}

#[test]
fn last_tick_registration_wins() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.tick(function() canvas.fill_rect(1, 1, 1, 1) end)
            canvas.tick(function() canvas.fill_rect(2, 2, 2, 2) end)
            "##,
            "lastwins.lua",
        )
        .unwrap();
    runtime.run_frame(0.016).unwrap();
    assert_eq!(
        *captured.borrow(),
        vec![DrawCommand::FillRect { x: 2.0, y: 2.0, width: 2.0, height: 2.0 }]
    );
}

#[test]
fn engine_state_survives_a_throwing_callback() {
    let (runtime, _captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            local n = 0
            canvas.tick(function()
                n = n + 1
                if n == 1 then
                    canvas.save()
                    error("mid-draw failure", 0)
                end
            end)
            "##,
            "midfail.lua",
        )
        .unwrap();
    runtime.run_frame(0.016).unwrap();
    runtime.run_frame(0.016).unwrap();
    // The save/restore mirror is still balanced enough to keep accepting
    // commands; a fresh frame starts from an empty buffer either way.
    runtime
        .load_script("canvas.restore()", "cleanup.lua")
        .unwrap();
}
