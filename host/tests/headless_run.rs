//! Host-shaped end-to-end run: a script drives frames through the wire
//! renderer exactly as the binary wires it up.

use canvas_core::render::{RecordingCanvas, WireTarget};
use canvas_scripting::runtime::{CanvasRuntime, RuntimeConfig};
use std::path::PathBuf;

fn scratch_root() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("luacanvas-host-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn sixty_frames_through_the_wire() {
    let root = scratch_root();
    std::fs::write(
        root.join("game.lua"),
        r##"
        canvas.set_size(320, 240)
        canvas.start()
        local t = 0
        canvas.tick(function(dt)
            t = t + dt
            canvas.clear()
            canvas.set_color("#112233")
            canvas.fill_rect(0, 0, canvas.get_width(), canvas.get_height())
            canvas.set_color(255, 255, 255, 255)
            canvas.fill_circle(160 + 40 * math.sin(t), 120, 10)
        end)
        "##,
    )
    .unwrap();

    let (wire, mut receiver) = WireTarget::channel();
    let mut config = RuntimeConfig::headless(root.clone());
    config.target = Box::new(wire);
    let runtime = CanvasRuntime::new(config).unwrap();
    runtime.load_script_file(&root.join("game.lua")).unwrap();

    let dt = 1.0 / 60.0;
    for _ in 0..60 {
        let summary = runtime.run_frame(dt).unwrap();
        assert!(summary.script_error.is_none());
        assert_eq!(summary.commands, 5);
    }

    assert!((runtime.shared().controller.borrow().get_time() - 1.0).abs() < 1e-9);

    let mut canvas = RecordingCanvas::new();
    let frames = receiver.replay_pending(&mut canvas).unwrap();
    assert_eq!(frames, 60);
    assert_eq!(canvas.calls.len(), 60 * 5);
    assert_eq!(canvas.calls[0], "clear()");

    runtime.dispose();
    assert!(!runtime.shared().controller.borrow().is_active());
}
