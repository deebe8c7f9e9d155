//! Bridge-level command protocol behavior driven from Lua.

use canvas_core::command::{Color, DrawCommand};
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
fn flushed_commands_match_call_order() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.tick(function()
                canvas.clear()
                canvas.set_color(255, 0, 0)
                canvas.fill_rect(0, 0, 10, 10)
            end)
            "##,
            "order.lua",
        )
        .unwrap();

    let summary = runtime.run_frame(1.0 / 60.0).unwrap();
    assert!(summary.script_error.is_none());
    assert_eq!(
        *captured.borrow(),
        vec![
            DrawCommand::Clear,
            DrawCommand::SetColor { color: Color::rgba(255, 0, 0, 255) },
            DrawCommand::FillRect { x: 0.0, y: 0.0, width: 10.0, height: 10.0 },
        ]
    );

    // No cross-frame leakage: the next frame flushes only its own commands
    captured.borrow_mut().clear();
    runtime.run_frame(1.0 / 60.0).unwrap();
    assert_eq!(captured.borrow().len(), 3);
}

#[test]
fn hex_and_numeric_colors_are_equivalent() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.set_color("#FF0000")
            canvas.set_color(255, 0, 0, 255)
            canvas.set_color("#F00")
            "##,
            "colors.lua",
        )
        .unwrap();
    runtime.run_frame(0.016).unwrap();
    let cmds = captured.borrow();
    assert_eq!(cmds.len(), 3);
    assert_eq!(cmds[0], cmds[1]);
    assert_eq!(cmds[0], cmds[2]);
}

#[test]
fn invalid_hex_raises_instead_of_defaulting() {
    let (runtime, _captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            local ok, err = pcall(function() canvas.set_color("#ZZZ") end)
            assert(not ok, "expected #ZZZ to be rejected")
            assert(string.find(tostring(err), "invalid color", 1, true), tostring(err))
            "##,
            "badcolor.lua",
        )
        .unwrap();
}

#[test]
fn draw_image_dispatches_on_argument_shape() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.draw_image("hero", 1, 2)
            canvas.draw_image("hero", 1, 2, 30, 40)
            canvas.draw_image("hero", 8, 8, 16, 16, 1, 2, 32, 32)
            local ok = pcall(function() canvas.draw_image("hero", 1, 2, 3) end)
            assert(not ok, "3 coordinates must be rejected")
            "##,
            "images.lua",
        )
        .unwrap();
    runtime.run_frame(0.016).unwrap();
    let cmds = captured.borrow();
    assert_eq!(cmds.len(), 3);
    match &cmds[2] {
        DrawCommand::DrawImage { sx, sw, dx, dw, .. } => {
            assert_eq!(*sx, Some(8.0));
            assert_eq!(*sw, Some(16.0));
            assert_eq!(*dx, 1.0);
            assert_eq!(*dw, Some(32.0));
        }
        other => panic!("expected drawImage, got {}", other.op_name()),
    }
}

#[test]
fn pixel_buffers_are_resident_and_poked_per_call() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            local h = canvas.create_image_data(4, 4)
            assert(h > 0)
            local w, ht = canvas.image_data_size(h)
            assert(w == 4 and ht == 4)
            canvas.set_pixel(h, 1, 1, 10, 20, 30)
            local r, g, b, a = canvas.get_pixel(h, 1, 1)
            assert(r == 10 and g == 20 and b == 30 and a == 255)
            -- out of range reads come back zeroed
            local r2 = canvas.get_pixel(h, 9, 9)
            assert(r2 == 0)
            canvas.put_image_data(h, 5, 6)
            "##,
            "pixels.lua",
        )
        .unwrap();
    runtime.run_frame(0.016).unwrap();
    let cmds = captured.borrow();
    assert_eq!(cmds.len(), 1);
    match &cmds[0] {
        DrawCommand::PutImageData { dx, dy, .. } => {
            assert_eq!((*dx, *dy), (5.0, 6.0));
        }
        other => panic!("expected putImageData, got {}", other.op_name()),
    }
}

#[test]
fn region_copy_via_get_image_data() {
    let (runtime, _captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            local h = canvas.create_image_data(2, 2)
            canvas.set_pixel(h, 1, 1, 9, 9, 9, 9)
            local region = canvas.get_image_data(h, 1, 1, 2, 2)
            assert(region ~= nil)
            local r = canvas.get_pixel(region, 0, 0)
            assert(r == 9)
            "##,
            "region.lua",
        )
        .unwrap();
}

#[test]
fn path_hit_tests_answer_synchronously() {
    let (runtime, _captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.begin_path()
            canvas.path_rect(10, 10, 20, 20)
            assert(canvas.is_point_in_path(15, 15))
            assert(not canvas.is_point_in_path(5, 5))

            canvas.set_line_width(6)
            assert(canvas.is_point_in_stroke(10, 12))
            assert(not canvas.is_point_in_stroke(20, 20))

            canvas.begin_path()
            assert(not canvas.is_point_in_path(15, 15))
            "##,
            "paths.lua",
        )
        .unwrap();
}

#[test]
fn composite_operations_are_validated_at_the_bridge() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.set_composite_operation("lighter")
            local ok, err = pcall(function() canvas.set_composite_operation("blend-harder") end)
            assert(not ok)
            assert(string.find(tostring(err), "blend-harder", 1, true), tostring(err))
            "##,
            "composite.lua",
        )
        .unwrap();
    runtime.run_frame(0.016).unwrap();
    let cmds = captured.borrow();
    assert_eq!(cmds.len(), 1);
    assert_eq!(cmds[0], DrawCommand::SetGlobalCompositeOperation { op: "lighter".into() });
}

#[test]
fn gradients_cross_as_data() {
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.set_linear_gradient(0, 0, 100, 0, {
                { offset = 0.0, color = "#FF0000" },
                { offset = 1.0, color = "#0000FF" },
            })
            "##,
            "gradient.lua",
        )
        .unwrap();
    runtime.run_frame(0.016).unwrap();
    let cmds = captured.borrow();
    match &cmds[0] {
        DrawCommand::SetLinearGradient { stops, .. } => {
            assert_eq!(stops.len(), 2);
            assert_eq!(stops[0].color, Color::rgba(255, 0, 0, 255));
            assert_eq!(stops[1].color, Color::rgba(0, 0, 255, 255));
        }
        other => panic!("expected setLinearGradient, got {}", other.op_name()),
    }
}

#[test]
fn wire_and_direct_targets_replay_identically() {
    use canvas_core::render::{replay, RecordingCanvas, WireTarget};

    // Drive the same script against a capture target, then push the
    // captured batch through the wire and compare replays.
    let (runtime, captured) = runtime_with_capture();
    runtime
        .load_script(
            r##"
            canvas.tick(function()
                canvas.clear()
                canvas.set_color("#AABBCC")
                canvas.translate(10, 20)
                canvas.fill_circle(5, 5, 3)
                canvas.draw_text("hi", 1, 2)
            end)
            "##,
            "wire.lua",
        )
        .unwrap();
    runtime.run_frame(0.016).unwrap();
    let commands = captured.borrow().clone();

    let pixels = PixelStore::new();
    let mut direct = RecordingCanvas::new();
    replay(&commands, &pixels, &mut direct);

    let (mut wire, mut receiver) = WireTarget::channel();
    wire.flush(&commands, &pixels).unwrap();
    let mut remote = RecordingCanvas::new();
    receiver.replay_pending(&mut remote).unwrap();

    assert_eq!(direct.calls, remote.calls);
}
