//! The script-facing bridge: the `canvas` and `assets` namespaces.
//!
//! Every drawing call appends exactly one command to the controller's
//! frame buffer; queries answer synchronously from the controller's
//! mirrors. All closures take short borrows only — nothing holds a RefCell
//! borrow across a call back into the VM.

use crate::reload::require_via;
use crate::runtime::{RuntimeShared, TickHandler};
use canvas_core::command::{Color, DrawCommand, GradientStop, Shadow};
use canvas_core::input::{MOUSE_LEFT, MOUSE_MIDDLE, MOUSE_RIGHT};
use canvas_core::keys;
use mlua::{Function, Lua, Table, Value, Variadic};
use std::rc::Rc;

const KEYS_DOWN_CACHE: &str = "canvas_keys_down_cache";
const KEYS_PRESSED_CACHE: &str = "canvas_keys_pressed_cache";

/// The 2D context's compositing modes; anything else is rejected at the
/// bridge rather than silently ignored renderer-side.
const COMPOSITE_OPS: &[&str] = &[
    "source-over",
    "source-in",
    "source-out",
    "source-atop",
    "destination-over",
    "destination-in",
    "destination-out",
    "destination-atop",
    "lighter",
    "copy",
    "xor",
    "multiply",
    "screen",
    "overlay",
    "darken",
    "lighten",
];

pub fn install(lua: &Lua, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    let canvas = lua.create_table()?;

    install_lifecycle(lua, &canvas, shared)?;
    install_drawing(lua, &canvas, shared)?;
    install_paths(lua, &canvas, shared)?;
    install_transforms(lua, &canvas, shared)?;
    install_images_and_pixels(lua, &canvas, shared)?;
    install_input(lua, &canvas, shared)?;
    install_audio(lua, &canvas, shared)?;
    install_reload(lua, &canvas, shared)?;

    // Key constants
    let keys_table = lua.create_table()?;
    for c in b'A'..=b'Z' {
        let ch = c as char;
        keys_table.set(ch.to_string(), format!("Key{ch}"))?;
    }
    for d in 0..=9u8 {
        keys_table.set(format!("D{d}"), format!("Digit{d}"))?;
    }
    for (name, code) in keys::NAMED_KEYS {
        keys_table.set(*name, *code)?;
    }
    canvas.set("keys", keys_table)?;

    // Lock the canvas table metatable
    let metatable = lua.create_table()?;
    metatable.set("__metatable", "locked")?;
    canvas.set_metatable(Some(metatable));

    let globals = lua.globals();
    globals.set("canvas", canvas)?;
    globals.set("assets", build_assets_namespace(lua, shared)?)?;

    // Script stdout goes through the host's print channel
    let print_shared = shared.clone();
    let print_fn = lua.create_function(move |_, args: Variadic<Value>| {
        let line = args.iter().map(lua_display).collect::<Vec<_>>().join("\t");
        (print_shared.print)(&line);
        Ok(())
    })?;
    globals.set("print", print_fn)?;

    // Registry-backed require
    let modules = shared.modules.clone();
    let require_fn =
        lua.create_function(move |lua, name: String| require_via(lua, &modules, &name))?;
    globals.set("require", require_fn)?;

    tracing::info!("Canvas API namespace initialized");
    Ok(())
}

fn install_lifecycle(lua: &Lua, canvas: &Table, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    let s = shared.clone();
    canvas.set(
        "start",
        lua.create_function(move |_, ()| {
            s.start().map_err(|e| mlua::Error::RuntimeError(e.to_string()))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "stop",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().stop();
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_running",
        lua.create_function(move |_, ()| Ok(s.controller.borrow().is_active()))?,
    )?;

    // tick(fn): last registration wins. The callback's definition location
    // is captured here for error annotation.
    let s = shared.clone();
    canvas.set(
        "tick",
        lua.create_function(move |_, func: Function| {
            let info = func.info();
            let origin = match (info.short_src, info.line_defined) {
                (Some(src), Some(line)) => format!("{src}:{line}"),
                (Some(src), None) => src.to_string(),
                _ => "?".to_string(),
            };
            *s.tick.borrow_mut() = Some(TickHandler { func, origin });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_size",
        lua.create_function(move |_, (w, h): (u32, u32)| {
            s.controller.borrow_mut().set_size(w, h);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set("get_width", lua.create_function(move |_, ()| Ok(s.controller.borrow().width()))?)?;
    let s = shared.clone();
    canvas.set("get_height", lua.create_function(move |_, ()| Ok(s.controller.borrow().height()))?)?;
    let s = shared.clone();
    canvas.set("get_delta", lua.create_function(move |_, ()| Ok(s.controller.borrow().get_delta()))?)?;
    let s = shared.clone();
    canvas.set("get_time", lua.create_function(move |_, ()| Ok(s.controller.borrow().get_time()))?)?;
    Ok(())
}

fn install_drawing(lua: &Lua, canvas: &Table, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    let s = shared.clone();
    canvas.set(
        "clear",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::Clear);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "clear_rect",
        lua.create_function(move |_, (x, y, width, height): (f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::ClearRect { x, y, width, height });
            Ok(())
        })?,
    )?;

    // set_color accepts numeric channels or a hex string; invalid hex is an
    // error, never a silent default
    let s = shared.clone();
    canvas.set(
        "set_color",
        lua.create_function(
            move |_, (first, g, b, a): (Value, Option<f64>, Option<f64>, Option<f64>)| {
                let color = color_from_args(first, g, b, a)?;
                s.controller.borrow_mut().push(DrawCommand::SetColor { color });
                Ok(())
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_line_width",
        lua.create_function(move |_, width: f64| {
            s.controller.borrow_mut().push(DrawCommand::SetLineWidth { width });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_font",
        lua.create_function(move |_, (size, family): (f64, Option<String>)| {
            let family = family.unwrap_or_else(|| s.controller.borrow().state().font_family.clone());
            s.controller.borrow_mut().push(DrawCommand::SetFont { size, family });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_global_alpha",
        lua.create_function(move |_, alpha: f64| {
            s.controller.borrow_mut().push(DrawCommand::SetGlobalAlpha { alpha });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_composite_operation",
        lua.create_function(move |_, op: String| {
            if !COMPOSITE_OPS.contains(&op.as_str()) {
                return Err(mlua::Error::RuntimeError(format!(
                    "ARG_ERROR: unknown composite operation '{op}'"
                )));
            }
            s.controller.borrow_mut().push(DrawCommand::SetGlobalCompositeOperation { op });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_shadow",
        lua.create_function(
            move |_, (offset_x, offset_y, blur, color): (f64, f64, f64, String)| {
                let color = parse_hex(&color)?;
                s.controller.borrow_mut().push(DrawCommand::SetShadow {
                    shadow: Shadow { offset_x, offset_y, blur, color },
                });
                Ok(())
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "clear_shadow",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::ClearShadow);
            Ok(())
        })?,
    )?;

    // Gradients are described as data (coordinates + stops) and
    // reconstructed renderer-side
    let s = shared.clone();
    canvas.set(
        "set_linear_gradient",
        lua.create_function(
            move |_, (x0, y0, x1, y1, stops): (f64, f64, f64, f64, Table)| {
                let stops = parse_stops(&stops)?;
                s.controller.borrow_mut().push(DrawCommand::SetLinearGradient { x0, y0, x1, y1, stops });
                Ok(())
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_radial_gradient",
        lua.create_function(
            move |_, (x0, y0, r0, x1, y1, r1, stops): (f64, f64, f64, f64, f64, f64, Table)| {
                let stops = parse_stops(&stops)?;
                s.controller
                    .borrow_mut()
                    .push(DrawCommand::SetRadialGradient { x0, y0, r0, x1, y1, r1, stops });
                Ok(())
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "rect",
        lua.create_function(move |_, (x, y, width, height): (f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::Rect { x, y, width, height });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "fill_rect",
        lua.create_function(move |_, (x, y, width, height): (f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::FillRect { x, y, width, height });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "circle",
        lua.create_function(move |_, (x, y, radius): (f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::Circle { x, y, radius });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "fill_circle",
        lua.create_function(move |_, (x, y, radius): (f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::FillCircle { x, y, radius });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "line",
        lua.create_function(move |_, (x1, y1, x2, y2): (f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::Line { x1, y1, x2, y2 });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "draw_text",
        lua.create_function(
            move |_,
                  (text, x, y, size, family, max_width): (
                String,
                f64,
                f64,
                Option<f64>,
                Option<String>,
                Option<f64>,
            )| {
                s.controller
                    .borrow_mut()
                    .push(DrawCommand::FillText { text, x, y, size, family, max_width });
                Ok(())
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "stroke_text",
        lua.create_function(
            move |_,
                  (text, x, y, size, family, max_width): (
                String,
                f64,
                f64,
                Option<f64>,
                Option<String>,
                Option<f64>,
            )| {
                s.controller
                    .borrow_mut()
                    .push(DrawCommand::StrokeText { text, x, y, size, family, max_width });
                Ok(())
            },
        )?,
    )?;

    Ok(())
}

fn install_paths(lua: &Lua, canvas: &Table, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    let s = shared.clone();
    canvas.set(
        "begin_path",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::BeginPath);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "move_to",
        lua.create_function(move |_, (x, y): (f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::MoveTo { x, y });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "line_to",
        lua.create_function(move |_, (x, y): (f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::LineTo { x, y });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "arc",
        lua.create_function(
            move |_, (x, y, radius, start_angle, end_angle, ccw): (f64, f64, f64, f64, f64, Option<bool>)| {
                s.controller.borrow_mut().push(DrawCommand::Arc {
                    x,
                    y,
                    radius,
                    start_angle,
                    end_angle,
                    counterclockwise: ccw.unwrap_or(false),
                });
                Ok(())
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "arc_to",
        lua.create_function(move |_, (x1, y1, x2, y2, radius): (f64, f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::ArcTo { x1, y1, x2, y2, radius });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "bezier_curve_to",
        lua.create_function(
            move |_, (cp1x, cp1y, cp2x, cp2y, x, y): (f64, f64, f64, f64, f64, f64)| {
                s.controller
                    .borrow_mut()
                    .push(DrawCommand::BezierCurveTo { cp1x, cp1y, cp2x, cp2y, x, y });
                Ok(())
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "quadratic_curve_to",
        lua.create_function(move |_, (cpx, cpy, x, y): (f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::QuadraticCurveTo { cpx, cpy, x, y });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "ellipse",
        lua.create_function(
            move |_,
                  (x, y, radius_x, radius_y, rotation, start_angle, end_angle, ccw): (
                f64,
                f64,
                f64,
                f64,
                Option<f64>,
                Option<f64>,
                Option<f64>,
                Option<bool>,
            )| {
                s.controller.borrow_mut().push(DrawCommand::Ellipse {
                    x,
                    y,
                    radius_x,
                    radius_y,
                    rotation: rotation.unwrap_or(0.0),
                    start_angle: start_angle.unwrap_or(0.0),
                    end_angle: end_angle.unwrap_or(std::f64::consts::TAU),
                    counterclockwise: ccw.unwrap_or(false),
                });
                Ok(())
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "path_rect",
        lua.create_function(move |_, (x, y, width, height): (f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::PathRect { x, y, width, height });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "close_path",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::ClosePath);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "fill",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::Fill);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "stroke",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::Stroke);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "clip",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::Clip);
            Ok(())
        })?,
    )?;

    // Hit tests answer synchronously from the controller's path mirror
    let s = shared.clone();
    canvas.set(
        "is_point_in_path",
        lua.create_function(move |_, (x, y): (f64, f64)| Ok(s.controller.borrow().is_point_in_path(x, y)))?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_point_in_stroke",
        lua.create_function(move |_, (x, y): (f64, f64)| {
            Ok(s.controller.borrow().is_point_in_stroke(x, y))
        })?,
    )?;

    Ok(())
}

fn install_transforms(lua: &Lua, canvas: &Table, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    let s = shared.clone();
    canvas.set(
        "translate",
        lua.create_function(move |_, (x, y): (f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::Translate { x, y });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "rotate",
        lua.create_function(move |_, angle: f64| {
            s.controller.borrow_mut().push(DrawCommand::Rotate { angle });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "scale",
        lua.create_function(move |_, (x, y): (f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::Scale { x, y });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "save",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::Save);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "restore",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::Restore);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "transform",
        lua.create_function(move |_, (a, b, c, d, e, f): (f64, f64, f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::Transform { a, b, c, d, e, f });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_transform",
        lua.create_function(move |_, (a, b, c, d, e, f): (f64, f64, f64, f64, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::SetTransform { a, b, c, d, e, f });
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "reset_transform",
        lua.create_function(move |_, ()| {
            s.controller.borrow_mut().push(DrawCommand::ResetTransform);
            Ok(())
        })?,
    )?;

    Ok(())
}

fn install_images_and_pixels(lua: &Lua, canvas: &Table, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    // draw_image(name, dx, dy)
    // draw_image(name, dx, dy, dw, dh)
    // draw_image(name, sx, sy, sw, sh, dx, dy, dw, dh)  -- 8-argument blit
    let s = shared.clone();
    canvas.set(
        "draw_image",
        lua.create_function(move |_, (name, args): (Value, Variadic<f64>)| {
            let name = asset_name(&name)?;
            let cmd = match args.len() {
                2 => DrawCommand::DrawImage {
                    name,
                    dx: args[0],
                    dy: args[1],
                    dw: None,
                    dh: None,
                    sx: None,
                    sy: None,
                    sw: None,
                    sh: None,
                },
                4 => DrawCommand::DrawImage {
                    name,
                    dx: args[0],
                    dy: args[1],
                    dw: Some(args[2]),
                    dh: Some(args[3]),
                    sx: None,
                    sy: None,
                    sw: None,
                    sh: None,
                },
                8 => DrawCommand::DrawImage {
                    name,
                    sx: Some(args[0]),
                    sy: Some(args[1]),
                    sw: Some(args[2]),
                    sh: Some(args[3]),
                    dx: args[4],
                    dy: args[5],
                    dw: Some(args[6]),
                    dh: Some(args[7]),
                },
                n => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "ARG_ERROR: draw_image expects 2, 4 or 8 coordinates, got {n}"
                    )))
                }
            };
            s.controller.borrow_mut().push(cmd);
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "create_image_data",
        lua.create_function(move |_, (width, height): (u32, u32)| {
            Ok(s.controller.borrow_mut().pixels_mut().create(width, height))
        })?,
    )?;

    // Wrap a decoded image asset's pixels in a buffer for per-pixel access
    let s = shared.clone();
    canvas.set(
        "create_image_data_from_image",
        lua.create_function(move |_, name: Value| {
            let name = asset_name(&name)?;
            let (w, h, pixels) = {
                let assets = s.assets.borrow();
                let img = assets.image(&name).ok_or_else(|| {
                    mlua::Error::RuntimeError(format!("unknown or undecoded image asset '{name}'"))
                })?;
                (img.width, img.height, img.pixels.clone())
            };
            s.controller
                .borrow_mut()
                .pixels_mut()
                .create_from_rgba(w, h, pixels)
                .map_err(|e| mlua::Error::RuntimeError(format!("{e:#}")))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "get_image_data",
        lua.create_function(move |_, (handle, x, y, w, h): (u32, i64, i64, u32, u32)| {
            Ok(s.controller.borrow_mut().pixels_mut().copy_region(handle, x, y, w, h))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "put_image_data",
        lua.create_function(move |_, (handle, dx, dy): (u32, f64, f64)| {
            s.controller.borrow_mut().push(DrawCommand::PutImageData { handle, dx, dy });
            Ok(())
        })?,
    )?;

    // Per-pixel access crosses the bridge call-by-call against the
    // renderer-resident buffer; no whole-buffer marshaling
    let s = shared.clone();
    canvas.set(
        "get_pixel",
        lua.create_function(move |_, (handle, x, y): (u32, u32, u32)| {
            match s.controller.borrow().pixels().get_pixel(handle, x, y) {
                Some([r, g, b, a]) => Ok((r, g, b, a)),
                None => Ok((0, 0, 0, 0)),
            }
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_pixel",
        lua.create_function(
            move |_, (handle, x, y, r, g, b, a): (u32, u32, u32, u8, u8, u8, Option<u8>)| {
                Ok(s.controller
                    .borrow_mut()
                    .pixels_mut()
                    .set_pixel(handle, x, y, [r, g, b, a.unwrap_or(255)]))
            },
        )?,
    )?;

    let s = shared.clone();
    canvas.set(
        "image_data_size",
        lua.create_function(move |_, handle: u32| {
            match s.controller.borrow().pixels().dimensions(handle) {
                Some((w, h)) => Ok((w, h)),
                None => Ok((0, 0)),
            }
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "release_image_data",
        lua.create_function(move |_, handle: u32| {
            Ok(s.controller.borrow_mut().pixels_mut().release(handle))
        })?,
    )?;

    Ok(())
}

fn install_input(lua: &Lua, canvas: &Table, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    let s = shared.clone();
    canvas.set(
        "is_key_down",
        lua.create_function(move |_, key: String| {
            Ok(s.controller.borrow().input().is_key_down(&keys::normalize(&key)))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_key_pressed",
        lua.create_function(move |_, key: String| {
            Ok(s.controller.borrow().input().is_key_pressed(&keys::normalize(&key)))
        })?,
    )?;

    // get_keys_down/get_keys_pressed return a reused container: the same
    // table object is cleared and refilled per call, valid until the next
    // call. Copy it if you need to keep it.
    let s = shared.clone();
    canvas.set(
        "get_keys_down",
        lua.create_function(move |lua, ()| {
            let items: Vec<String> =
                s.controller.borrow().input().keys_down().map(str::to_string).collect();
            cached_list(lua, KEYS_DOWN_CACHE, items)
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "get_keys_pressed",
        lua.create_function(move |lua, ()| {
            let items: Vec<String> =
                s.controller.borrow().input().keys_pressed().map(str::to_string).collect();
            cached_list(lua, KEYS_PRESSED_CACHE, items)
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "get_mouse_pos",
        lua.create_function(move |_, ()| Ok(s.controller.borrow().input().mouse_pos()))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "get_mouse_x",
        lua.create_function(move |_, ()| Ok(s.controller.borrow().input().mouse_pos().0))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "get_mouse_y",
        lua.create_function(move |_, ()| Ok(s.controller.borrow().input().mouse_pos().1))?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_mouse_down",
        lua.create_function(move |_, button: Value| {
            let name = mouse_button_name(&button)?;
            Ok(s.controller.borrow().input().is_mouse_down(name))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_mouse_pressed",
        lua.create_function(move |_, button: Value| {
            let name = mouse_button_name(&button)?;
            Ok(s.controller.borrow().input().is_mouse_pressed(name))
        })?,
    )?;

    // Gamepads are 1-based on the script side, 0-based on the platform
    // side; the translation happens here for every accessor.
    let s = shared.clone();
    canvas.set(
        "get_gamepad_count",
        lua.create_function(move |_, ()| Ok(s.controller.borrow().input().gamepad_count()))?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_gamepad_connected",
        lua.create_function(move |_, pad: usize| {
            let idx = one_based(pad, "gamepad")?;
            Ok(s.controller.borrow().input().gamepad(idx).is_some())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_gamepad_button_down",
        lua.create_function(move |_, (pad, button): (usize, usize)| {
            let pad = one_based(pad, "gamepad")?;
            let button = one_based(button, "button")?;
            Ok(s.controller
                .borrow()
                .input()
                .gamepad(pad)
                .and_then(|p| p.buttons.get(button).copied())
                .unwrap_or(false))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_gamepad_button_pressed",
        lua.create_function(move |_, (pad, button): (usize, usize)| {
            let pad = one_based(pad, "gamepad")?;
            let button = one_based(button, "button")?;
            Ok(s.controller
                .borrow()
                .input()
                .gamepad(pad)
                .and_then(|p| p.buttons_pressed.get(button).copied())
                .unwrap_or(false))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "get_gamepad_axis",
        lua.create_function(move |_, (pad, axis): (usize, usize)| {
            let pad = one_based(pad, "gamepad")?;
            let axis = one_based(axis, "axis")?;
            Ok(s.controller
                .borrow()
                .input()
                .gamepad(pad)
                .and_then(|p| p.axes.get(axis).copied())
                .unwrap_or(0.0))
        })?,
    )?;

    Ok(())
}

fn install_audio(lua: &Lua, canvas: &Table, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    let s = shared.clone();
    canvas.set(
        "play_sound",
        lua.create_function(move |_, (name, volume): (Value, Option<f64>)| {
            let name = asset_name(&name)?;
            s.audio.borrow_mut().play_sound(&name, volume.unwrap_or(1.0));
            Ok(())
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "get_sound_duration",
        lua.create_function(move |_, name: Value| {
            let name = asset_name(&name)?;
            Ok(s.audio.borrow().duration(&name))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "has_audio",
        lua.create_function(move |_, name: Value| {
            let name = asset_name(&name)?;
            Ok(s.audio.borrow().has_audio(&name))
        })?,
    )?;

    let s = shared.clone();
    canvas.set(
        "is_audio_available",
        lua.create_function(move |_, ()| Ok(s.audio.borrow().is_available()))?,
    )?;

    let s = shared.clone();
    canvas.set(
        "play_music",
        lua.create_function(move |_, (name, volume, looping): (Value, Option<f64>, Option<bool>)| {
            let name = asset_name(&name)?;
            Ok(s.audio
                .borrow_mut()
                .play_music(&name, volume.unwrap_or(1.0), looping.unwrap_or(true)))
        })?,
    )?;

    let s = shared.clone();
    canvas.set("stop_music", lua.create_function(move |_, ()| {
        s.audio.borrow_mut().stop_music();
        Ok(())
    })?)?;
    let s = shared.clone();
    canvas.set("pause_music", lua.create_function(move |_, ()| {
        s.audio.borrow_mut().pause_music();
        Ok(())
    })?)?;
    let s = shared.clone();
    canvas.set("resume_music", lua.create_function(move |_, ()| {
        s.audio.borrow_mut().resume_music();
        Ok(())
    })?)?;
    let s = shared.clone();
    canvas.set(
        "set_music_volume",
        lua.create_function(move |_, volume: f64| {
            s.audio.borrow_mut().set_music_volume(volume);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "get_music_volume",
        lua.create_function(move |_, ()| Ok(s.audio.borrow().music_volume()))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "is_music_playing",
        lua.create_function(move |_, ()| Ok(s.audio.borrow().is_music_playing()))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "get_music_time",
        lua.create_function(move |_, ()| Ok(s.audio.borrow().music_time()))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "get_music_duration",
        lua.create_function(move |_, ()| Ok(s.audio.borrow().music_duration()))?,
    )?;

    let s = shared.clone();
    canvas.set(
        "set_master_volume",
        lua.create_function(move |_, volume: f64| {
            s.audio.borrow_mut().set_master_volume(volume);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "get_master_volume",
        lua.create_function(move |_, ()| Ok(s.audio.borrow().master_volume()))?,
    )?;
    let s = shared.clone();
    canvas.set("mute", lua.create_function(move |_, ()| {
        s.audio.borrow_mut().mute();
        Ok(())
    })?)?;
    let s = shared.clone();
    canvas.set("unmute", lua.create_function(move |_, ()| {
        s.audio.borrow_mut().unmute();
        Ok(())
    })?)?;
    let s = shared.clone();
    canvas.set("is_muted", lua.create_function(move |_, ()| Ok(s.audio.borrow().is_muted()))?)?;

    // Channel namespace
    let s = shared.clone();
    canvas.set(
        "channel_create",
        lua.create_function(move |_, name: String| {
            s.audio.borrow_mut().create_channel(&name);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_destroy",
        lua.create_function(move |_, name: String| {
            s.audio.borrow_mut().destroy_channel(&name);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_get_parent",
        lua.create_function(move |_, name: String| Ok(s.audio.borrow().channel_parent(&name)))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_set_parent",
        lua.create_function(move |_, (name, parent): (String, Option<String>)| {
            s.audio.borrow_mut().set_channel_parent(&name, parent.as_deref());
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_get_effective_volume",
        lua.create_function(move |_, name: String| Ok(s.audio.borrow().effective_volume(&name)))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_play",
        lua.create_function(
            move |_, (channel, name, looping, start_time): (String, Value, Option<bool>, Option<f64>)| {
                let name = asset_name(&name)?;
                s.audio.borrow_mut().play_on_channel(
                    &channel,
                    &name,
                    looping.unwrap_or(false),
                    start_time.unwrap_or(0.0),
                );
                Ok(())
            },
        )?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_stop",
        lua.create_function(move |_, name: String| {
            s.audio.borrow_mut().stop_channel(&name);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_pause",
        lua.create_function(move |_, name: String| {
            s.audio.borrow_mut().pause_channel(&name);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_resume",
        lua.create_function(move |_, name: String| {
            s.audio.borrow_mut().resume_channel(&name);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_set_volume",
        lua.create_function(move |_, (name, volume): (String, f64)| {
            s.audio.borrow_mut().set_channel_volume(&name, volume);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_get_volume",
        lua.create_function(move |_, name: String| Ok(s.audio.borrow().channel_volume(&name)))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_fade_to",
        lua.create_function(move |_, (name, target, duration): (String, f64, f64)| {
            s.audio.borrow_mut().fade_channel_to(&name, target, duration);
            Ok(())
        })?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_is_playing",
        lua.create_function(move |_, name: String| Ok(s.audio.borrow().is_channel_playing(&name)))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_is_fading",
        lua.create_function(move |_, name: String| Ok(s.audio.borrow().is_channel_fading(&name)))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_get_time",
        lua.create_function(move |_, name: String| Ok(s.audio.borrow().channel_time(&name)))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_get_duration",
        lua.create_function(move |_, name: String| Ok(s.audio.borrow().channel_duration(&name)))?,
    )?;
    let s = shared.clone();
    canvas.set(
        "channel_get_audio",
        lua.create_function(move |_, name: String| Ok(s.audio.borrow().channel_audio(&name)))?,
    )?;

    Ok(())
}

fn install_reload(lua: &Lua, canvas: &Table, shared: &Rc<RuntimeShared>) -> mlua::Result<()> {
    let s = shared.clone();
    canvas.set(
        "reload",
        lua.create_function(move |lua, ()| {
            let report = crate::reload::reload_all_via(lua, &s.modules);
            (s.print)(report.render().trim_end());
            Ok(report.ok())
        })?,
    )?;
    Ok(())
}

fn build_assets_namespace(lua: &Lua, shared: &Rc<RuntimeShared>) -> mlua::Result<Table> {
    let assets = lua.create_table()?;

    let s = shared.clone();
    assets.set(
        "image",
        lua.create_function(move |lua, (name, path): (String, String)| {
            s.assets
                .borrow_mut()
                .register_image(&name, &path)
                .map_err(|e| mlua::Error::RuntimeError(format!("{e:#}")))?;
            make_handle(lua, &name, "image", &path)
        })?,
    )?;

    let s = shared.clone();
    assets.set(
        "font",
        lua.create_function(move |lua, (name, path): (String, String)| {
            s.assets
                .borrow_mut()
                .register_font(&name, &path)
                .map_err(|e| mlua::Error::RuntimeError(format!("{e:#}")))?;
            make_handle(lua, &name, "font", &path)
        })?,
    )?;

    let s = shared.clone();
    assets.set(
        "load_sound",
        lua.create_function(move |lua, (name, path): (String, String)| {
            register_audio_asset(lua, &s, &name, &path, "sound")
        })?,
    )?;

    let s = shared.clone();
    assets.set(
        "load_music",
        lua.create_function(move |lua, (name, path): (String, String)| {
            register_audio_asset(lua, &s, &name, &path, "music")
        })?,
    )?;

    // Dimension queries are synchronous against decoded metadata; before
    // decode they return the 0 sentinel rather than erroring
    let s = shared.clone();
    assets.set(
        "get_width",
        lua.create_function(move |_, name: Value| {
            let name = asset_name(&name)?;
            Ok(s.assets.borrow().image_size(&name).map(|(w, _)| w).unwrap_or(0))
        })?,
    )?;

    let s = shared.clone();
    assets.set(
        "get_height",
        lua.create_function(move |_, name: Value| {
            let name = asset_name(&name)?;
            Ok(s.assets.borrow().image_size(&name).map(|(_, h)| h).unwrap_or(0))
        })?,
    )?;

    Ok(assets)
}

/// Sound/music registration: bytes are read now (a bad path is a
/// setup-time, script-visible error); decode waits for the autoplay unlock
/// inside the engine. Manifest-backed contexts only accept registration
/// before `start()`.
fn register_audio_asset(
    lua: &Lua,
    shared: &Rc<RuntimeShared>,
    name: &str,
    path: &str,
    kind: &str,
) -> mlua::Result<Table> {
    let active = shared.controller.borrow().is_active();
    if active && shared.assets.borrow().source().is_manifest() {
        return Err(mlua::Error::RuntimeError(format!(
            "{kind} assets must be registered before start() in this context"
        )));
    }
    let bytes = shared
        .assets
        .borrow()
        .load_audio_bytes(path)
        .map_err(|e| mlua::Error::RuntimeError(format!("{e:#}")))?;
    shared
        .audio
        .borrow_mut()
        .decode_audio(name, &bytes)
        .map_err(|e| mlua::Error::RuntimeError(format!("{e:#}")))?;
    make_handle(lua, name, kind, path)
}

fn make_handle(lua: &Lua, name: &str, kind: &str, path: &str) -> mlua::Result<Table> {
    let handle = lua.create_table()?;
    handle.set("name", name)?;
    handle.set("kind", kind)?;
    handle.set("path", path)?;
    Ok(handle)
}

/// Accept a bare name or a handle table with a `name` field.
fn asset_name(value: &Value) -> mlua::Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy().to_string()),
        Value::Table(t) => t.get::<String>("name").map_err(|_| {
            mlua::Error::RuntimeError("ARG_ERROR: handle table has no 'name' field".into())
        }),
        other => Err(mlua::Error::RuntimeError(format!(
            "ARG_ERROR: expected asset name or handle, got {}",
            other.type_name()
        ))),
    }
}

fn parse_hex(hex: &str) -> mlua::Result<Color> {
    Color::from_hex(hex).map_err(|e| mlua::Error::RuntimeError(e.to_string()))
}

fn color_from_args(
    first: Value,
    g: Option<f64>,
    b: Option<f64>,
    a: Option<f64>,
) -> mlua::Result<Color> {
    match first {
        Value::String(s) => parse_hex(&s.to_string_lossy()),
        Value::Integer(_) | Value::Number(_) => {
            let r = number_channel(&first)?;
            let (Some(g), Some(b)) = (g, b) else {
                return Err(mlua::Error::RuntimeError(
                    "ARG_ERROR: set_color expects (r, g, b[, a]) or a hex string".into(),
                ));
            };
            Ok(Color::rgba(r, clamp_channel(g), clamp_channel(b), a.map(clamp_channel).unwrap_or(255)))
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "ARG_ERROR: set_color expects numbers or a hex string, got {}",
            other.type_name()
        ))),
    }
}

fn number_channel(v: &Value) -> mlua::Result<u8> {
    match v {
        Value::Integer(i) => Ok((*i).clamp(0, 255) as u8),
        Value::Number(n) => Ok(clamp_channel(*n)),
        _ => Err(mlua::Error::RuntimeError("ARG_ERROR: expected number".into())),
    }
}

fn clamp_channel(v: f64) -> u8 {
    v.clamp(0.0, 255.0).round() as u8
}

fn parse_stops(stops: &Table) -> mlua::Result<Vec<GradientStop>> {
    let mut out = Vec::new();
    for entry in stops.clone().sequence_values::<Table>() {
        let entry = entry?;
        let offset: f64 = entry.get("offset")?;
        let color: String = entry.get("color")?;
        out.push(GradientStop { offset, color: parse_hex(&color)? });
    }
    if out.is_empty() {
        return Err(mlua::Error::RuntimeError(
            "ARG_ERROR: gradient needs at least one stop".into(),
        ));
    }
    Ok(out)
}

fn mouse_button_name(v: &Value) -> mlua::Result<&'static str> {
    match v {
        Value::String(s) => match s.to_string_lossy().as_str() {
            "left" => Ok(MOUSE_LEFT),
            "middle" => Ok(MOUSE_MIDDLE),
            "right" => Ok(MOUSE_RIGHT),
            other => Err(mlua::Error::RuntimeError(format!(
                "ARG_ERROR: unknown mouse button '{other}'"
            ))),
        },
        Value::Integer(1) => Ok(MOUSE_LEFT),
        Value::Integer(2) => Ok(MOUSE_MIDDLE),
        Value::Integer(3) => Ok(MOUSE_RIGHT),
        _ => Err(mlua::Error::RuntimeError(
            "ARG_ERROR: mouse button must be 1..3 or a name".into(),
        )),
    }
}

/// 1-based script index to 0-based platform index.
fn one_based(i: usize, what: &str) -> mlua::Result<usize> {
    i.checked_sub(1)
        .ok_or_else(|| mlua::Error::RuntimeError(format!("ARG_ERROR: {what} index must be >= 1")))
}

/// Reused per-call list container (see the caching contract on
/// `get_keys_down`): cleared and refilled in place, identity stable.
fn cached_list(lua: &Lua, slot: &str, items: Vec<String>) -> mlua::Result<Table> {
    let cached: Table = match lua.named_registry_value::<Table>(slot) {
        Ok(t) => t,
        Err(_) => {
            let t = lua.create_table()?;
            lua.set_named_registry_value(slot, t.clone())?;
            t
        }
    };
    let old_len = cached.raw_len();
    let new_len = items.len();
    for (i, item) in items.into_iter().enumerate() {
        cached.raw_set(i + 1, item)?;
    }
    for i in (new_len + 1)..=old_len {
        cached.raw_set(i, Value::Nil)?;
    }
    Ok(cached)
}

fn lua_display(v: &Value) -> String {
    match v {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        other => format!("<{}>", other.type_name()),
    }
}
