//! The pluggable renderer seam.
//!
//! `Canvas2d` stands in for the platform 2D context: a stateful surface
//! that the command stream is replayed against. The engine never holds a
//! reference to renderer-side objects; everything it emits is plain data,
//! which is what lets the same frame batch drive an in-process target and a
//! message-passing target identically.

use crate::command::{Color, DrawCommand, Gradient, GradientStop, Shadow};
use crate::pixels::{PixelBuffer, PixelStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;

/// How an image blit resolved after optional-parameter dispatch. Cropping
/// parameters take precedence when both rects are present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageBlit {
    /// Draw at natural size.
    Plain { dx: f64, dy: f64 },
    /// Scale into a destination rect.
    Scaled { dx: f64, dy: f64, dw: f64, dh: f64 },
    /// 8-argument form: source crop into destination rect.
    Cropped { sx: f64, sy: f64, sw: f64, sh: f64, dx: f64, dy: f64, dw: f64, dh: f64 },
}

/// The platform 2D drawing surface, as consumed by the replayer.
///
/// Implementations are expected to be stateful exactly like the real
/// context: state-setting calls apply to every later shape until changed,
/// and `save`/`restore` manage that state as a stack.
pub trait Canvas2d {
    fn clear(&mut self);
    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64);

    fn set_color(&mut self, color: Color);
    fn set_gradient(&mut self, gradient: &Gradient);
    fn set_line_width(&mut self, width: f64);
    fn set_font(&mut self, size: f64, family: &str);
    fn set_global_alpha(&mut self, alpha: f64);
    fn set_global_composite_operation(&mut self, op: &str);
    fn set_shadow(&mut self, shadow: &Shadow);
    fn clear_shadow(&mut self);

    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64);
    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64);
    fn circle(&mut self, x: f64, y: f64, radius: f64);
    fn fill_circle(&mut self, x: f64, y: f64, radius: f64);
    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64);

    #[allow(clippy::too_many_arguments)]
    fn fill_text(&mut self, text: &str, x: f64, y: f64, size: Option<f64>, family: Option<&str>, max_width: Option<f64>);
    #[allow(clippy::too_many_arguments)]
    fn stroke_text(&mut self, text: &str, x: f64, y: f64, size: Option<f64>, family: Option<&str>, max_width: Option<f64>);

    fn begin_path(&mut self);
    fn move_to(&mut self, x: f64, y: f64);
    fn line_to(&mut self, x: f64, y: f64);
    #[allow(clippy::too_many_arguments)]
    fn arc(&mut self, x: f64, y: f64, radius: f64, start_angle: f64, end_angle: f64, counterclockwise: bool);
    fn arc_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, radius: f64);
    #[allow(clippy::too_many_arguments)]
    fn bezier_curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64);
    fn quadratic_curve_to(&mut self, cpx: f64, cpy: f64, x: f64, y: f64);
    #[allow(clippy::too_many_arguments)]
    fn ellipse(&mut self, x: f64, y: f64, radius_x: f64, radius_y: f64, rotation: f64, start_angle: f64, end_angle: f64, counterclockwise: bool);
    fn path_rect(&mut self, x: f64, y: f64, width: f64, height: f64);
    fn close_path(&mut self);
    fn fill(&mut self);
    fn stroke(&mut self);
    fn clip(&mut self);

    fn translate(&mut self, x: f64, y: f64);
    fn rotate(&mut self, angle: f64);
    fn scale(&mut self, x: f64, y: f64);
    fn save(&mut self);
    fn restore(&mut self);
    #[allow(clippy::too_many_arguments)]
    fn transform(&mut self, a: f64, b: f64, c: f64, d: f64, e: f64, f: f64);
    #[allow(clippy::too_many_arguments)]
    fn set_transform(&mut self, a: f64, b: f64, c: f64, d: f64, e: f64, f: f64);
    fn reset_transform(&mut self);

    fn draw_image(&mut self, name: &str, blit: ImageBlit);
    fn put_image_data(&mut self, buffer: &PixelBuffer, dx: f64, dy: f64);
}

/// Replays a frame batch against any `Canvas2d`, in FIFO order, exactly
/// once per command. The match is wildcard-free: a new `DrawCommand`
/// variant fails compilation here until every target learns it.
pub fn replay<C: Canvas2d>(commands: &[DrawCommand], pixels: &PixelStore, canvas: &mut C) {
    for cmd in commands {
        match cmd {
            DrawCommand::Clear => canvas.clear(),
            DrawCommand::ClearRect { x, y, width, height } => canvas.clear_rect(*x, *y, *width, *height),
            DrawCommand::SetColor { color } => canvas.set_color(*color),
            DrawCommand::SetLinearGradient { x0, y0, x1, y1, stops } => {
                canvas.set_gradient(&Gradient::Linear { x0: *x0, y0: *y0, x1: *x1, y1: *y1, stops: stops.clone() })
            }
            DrawCommand::SetRadialGradient { x0, y0, r0, x1, y1, r1, stops } => {
                canvas.set_gradient(&Gradient::Radial { x0: *x0, y0: *y0, r0: *r0, x1: *x1, y1: *y1, r1: *r1, stops: stops.clone() })
            }
            DrawCommand::SetLineWidth { width } => canvas.set_line_width(*width),
            DrawCommand::SetFont { size, family } => canvas.set_font(*size, family),
            DrawCommand::SetGlobalAlpha { alpha } => canvas.set_global_alpha(*alpha),
            DrawCommand::SetGlobalCompositeOperation { op } => canvas.set_global_composite_operation(op),
            DrawCommand::SetShadow { shadow } => canvas.set_shadow(shadow),
            DrawCommand::ClearShadow => canvas.clear_shadow(),
            DrawCommand::Rect { x, y, width, height } => canvas.rect(*x, *y, *width, *height),
            DrawCommand::FillRect { x, y, width, height } => canvas.fill_rect(*x, *y, *width, *height),
            DrawCommand::Circle { x, y, radius } => canvas.circle(*x, *y, *radius),
            DrawCommand::FillCircle { x, y, radius } => canvas.fill_circle(*x, *y, *radius),
            DrawCommand::Line { x1, y1, x2, y2 } => canvas.line(*x1, *y1, *x2, *y2),
            DrawCommand::FillText { text, x, y, size, family, max_width } => {
                canvas.fill_text(text, *x, *y, *size, family.as_deref(), *max_width)
            }
            DrawCommand::StrokeText { text, x, y, size, family, max_width } => {
                canvas.stroke_text(text, *x, *y, *size, family.as_deref(), *max_width)
            }
            DrawCommand::BeginPath => canvas.begin_path(),
            DrawCommand::MoveTo { x, y } => canvas.move_to(*x, *y),
            DrawCommand::LineTo { x, y } => canvas.line_to(*x, *y),
            DrawCommand::Arc { x, y, radius, start_angle, end_angle, counterclockwise } => {
                canvas.arc(*x, *y, *radius, *start_angle, *end_angle, *counterclockwise)
            }
            DrawCommand::ArcTo { x1, y1, x2, y2, radius } => canvas.arc_to(*x1, *y1, *x2, *y2, *radius),
            DrawCommand::BezierCurveTo { cp1x, cp1y, cp2x, cp2y, x, y } => {
                canvas.bezier_curve_to(*cp1x, *cp1y, *cp2x, *cp2y, *x, *y)
            }
            DrawCommand::QuadraticCurveTo { cpx, cpy, x, y } => canvas.quadratic_curve_to(*cpx, *cpy, *x, *y),
            DrawCommand::Ellipse { x, y, radius_x, radius_y, rotation, start_angle, end_angle, counterclockwise } => {
                canvas.ellipse(*x, *y, *radius_x, *radius_y, *rotation, *start_angle, *end_angle, *counterclockwise)
            }
            DrawCommand::PathRect { x, y, width, height } => canvas.path_rect(*x, *y, *width, *height),
            DrawCommand::ClosePath => canvas.close_path(),
            DrawCommand::Fill => canvas.fill(),
            DrawCommand::Stroke => canvas.stroke(),
            DrawCommand::Clip => canvas.clip(),
            DrawCommand::Translate { x, y } => canvas.translate(*x, *y),
            DrawCommand::Rotate { angle } => canvas.rotate(*angle),
            DrawCommand::Scale { x, y } => canvas.scale(*x, *y),
            DrawCommand::Save => canvas.save(),
            DrawCommand::Restore => canvas.restore(),
            DrawCommand::Transform { a, b, c, d, e, f } => canvas.transform(*a, *b, *c, *d, *e, *f),
            DrawCommand::SetTransform { a, b, c, d, e, f } => canvas.set_transform(*a, *b, *c, *d, *e, *f),
            DrawCommand::ResetTransform => canvas.reset_transform(),
            DrawCommand::DrawImage { name, dx, dy, dw, dh, sx, sy, sw, sh } => {
                let blit = resolve_blit(*dx, *dy, *dw, *dh, *sx, *sy, *sw, *sh);
                canvas.draw_image(name, blit);
            }
            DrawCommand::PutImageData { handle, dx, dy } => match pixels.get(*handle) {
                Some(buffer) => canvas.put_image_data(buffer, *dx, *dy),
                None => tracing::warn!("putImageData references unknown pixel buffer {}", handle),
            },
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_blit(
    dx: f64,
    dy: f64,
    dw: Option<f64>,
    dh: Option<f64>,
    sx: Option<f64>,
    sy: Option<f64>,
    sw: Option<f64>,
    sh: Option<f64>,
) -> ImageBlit {
    match (sx, sy, sw, sh) {
        (Some(sx), Some(sy), Some(sw), Some(sh)) => {
            // Source crop requires a destination rect; fall back to source
            // size when the caller omitted it.
            let dw = dw.unwrap_or(sw);
            let dh = dh.unwrap_or(sh);
            ImageBlit::Cropped { sx, sy, sw, sh, dx, dy, dw, dh }
        }
        _ => match (dw, dh) {
            (Some(dw), Some(dh)) => ImageBlit::Scaled { dx, dy, dw, dh },
            _ => ImageBlit::Plain { dx, dy },
        },
    }
}

/// A frame sink: receives each frame's full command batch exactly once.
pub trait RenderTarget {
    fn flush(&mut self, commands: &[DrawCommand], pixels: &PixelStore) -> Result<()>;
}

/// Same-thread target: replays straight onto a `Canvas2d`.
pub struct ReplayTarget<C: Canvas2d> {
    canvas: C,
}

impl<C: Canvas2d> ReplayTarget<C> {
    pub fn new(canvas: C) -> Self {
        Self { canvas }
    }

    pub fn canvas(&self) -> &C {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut C {
        &mut self.canvas
    }
}

impl<C: Canvas2d> RenderTarget for ReplayTarget<C> {
    fn flush(&mut self, commands: &[DrawCommand], pixels: &PixelStore) -> Result<()> {
        replay(commands, pixels, &mut self.canvas);
        Ok(())
    }
}

/// Discards frames. Used for headless runs and controller tests that only
/// assert on buffered state.
#[derive(Debug, Default)]
pub struct NullTarget;

impl RenderTarget for NullTarget {
    fn flush(&mut self, _commands: &[DrawCommand], _pixels: &PixelStore) -> Result<()> {
        Ok(())
    }
}

/// One frame's worth of protocol, as it crosses the wire. Pixel buffers
/// referenced by the batch travel alongside it as values; the receiving
/// side mirrors them under the same handles.
#[derive(Debug, Serialize, Deserialize)]
pub struct FrameBatch {
    pub frame: u64,
    pub buffers: Vec<WireBuffer>,
    pub commands: Vec<DrawCommand>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireBuffer {
    pub handle: u32,
    pub width: u32,
    pub height: u32,
    #[serde(with = "rgba_base64")]
    pub data: Vec<u8>,
}

mod rgba_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Message-passing target: serializes each frame batch to JSON and sends it
/// through a channel, modeling the worker/webview boundary. The batch is a
/// value copy; nothing on this side is shared with the receiver.
pub struct WireTarget {
    sender: mpsc::Sender<String>,
    frame: u64,
}

impl WireTarget {
    pub fn new(sender: mpsc::Sender<String>) -> Self {
        Self { sender, frame: 0 }
    }

    pub fn channel() -> (Self, WireReceiver) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), WireReceiver::new(rx))
    }
}

impl RenderTarget for WireTarget {
    fn flush(&mut self, commands: &[DrawCommand], pixels: &PixelStore) -> Result<()> {
        // Only ship buffers the batch actually references
        let mut referenced: Vec<u32> = commands
            .iter()
            .filter_map(|c| match c {
                DrawCommand::PutImageData { handle, .. } => Some(*handle),
                _ => None,
            })
            .collect();
        referenced.sort_unstable();
        referenced.dedup();

        let buffers = referenced
            .into_iter()
            .filter_map(|h| pixels.get(h).map(|b| WireBuffer { handle: h, width: b.width, height: b.height, data: b.data.clone() }))
            .collect();

        let batch = FrameBatch { frame: self.frame, buffers, commands: commands.to_vec() };
        self.frame += 1;
        let json = serde_json::to_string(&batch)?;
        self.sender
            .send(json)
            .map_err(|_| anyhow::anyhow!("wire renderer disconnected"))?;
        Ok(())
    }
}

/// The far side of the wire: deserializes batches and replays them onto a
/// local `Canvas2d`, maintaining a mirrored pixel store.
pub struct WireReceiver {
    receiver: mpsc::Receiver<String>,
    pixels: PixelStore,
}

impl WireReceiver {
    pub fn new(receiver: mpsc::Receiver<String>) -> Self {
        Self { receiver, pixels: PixelStore::new() }
    }

    /// Replay every batch currently queued. Returns the number of frames
    /// replayed.
    pub fn replay_pending<C: Canvas2d>(&mut self, canvas: &mut C) -> Result<usize> {
        let mut frames = 0;
        while let Ok(json) = self.receiver.try_recv() {
            self.replay_one(&json, canvas)?;
            frames += 1;
        }
        Ok(frames)
    }

    /// Block replaying batches until the sending side disconnects. Returns
    /// the number of frames replayed.
    pub fn run<C: Canvas2d>(&mut self, canvas: &mut C) -> Result<usize> {
        let mut frames = 0;
        while let Ok(json) = self.receiver.recv() {
            self.replay_one(&json, canvas)?;
            frames += 1;
        }
        Ok(frames)
    }

    fn replay_one<C: Canvas2d>(&mut self, json: &str, canvas: &mut C) -> Result<()> {
        let batch: FrameBatch = serde_json::from_str(json)?;
        for buf in &batch.buffers {
            self.pixels.insert_at(buf.handle, buf.width, buf.height, buf.data.clone());
        }
        replay(&batch.commands, &self.pixels, canvas);
        Ok(())
    }
}

/// A `Canvas2d` that records every call as a readable line. Tests use it to
/// assert that two targets replay a batch identically.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    pub calls: Vec<String>,
}

impl RecordingCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&mut self, call: String) {
        self.calls.push(call);
    }
}

fn fmt_stops(stops: &[GradientStop]) -> String {
    stops
        .iter()
        .map(|s| format!("{}@({},{},{},{})", s.offset, s.color.r, s.color.g, s.color.b, s.color.a))
        .collect::<Vec<_>>()
        .join(";")
}

impl Canvas2d for RecordingCanvas {
    fn clear(&mut self) {
        self.log("clear()".into());
    }
    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.log(format!("clearRect({x},{y},{width},{height})"));
    }
    fn set_color(&mut self, c: Color) {
        self.log(format!("setColor({},{},{},{})", c.r, c.g, c.b, c.a));
    }
    fn set_gradient(&mut self, g: &Gradient) {
        match g {
            Gradient::Linear { x0, y0, x1, y1, stops } => {
                self.log(format!("setLinearGradient({x0},{y0},{x1},{y1},[{}])", fmt_stops(stops)))
            }
            Gradient::Radial { x0, y0, r0, x1, y1, r1, stops } => {
                self.log(format!("setRadialGradient({x0},{y0},{r0},{x1},{y1},{r1},[{}])", fmt_stops(stops)))
            }
        }
    }
    fn set_line_width(&mut self, width: f64) {
        self.log(format!("setLineWidth({width})"));
    }
    fn set_font(&mut self, size: f64, family: &str) {
        self.log(format!("setFont({size},{family})"));
    }
    fn set_global_alpha(&mut self, alpha: f64) {
        self.log(format!("setGlobalAlpha({alpha})"));
    }
    fn set_global_composite_operation(&mut self, op: &str) {
        self.log(format!("setGlobalCompositeOperation({op})"));
    }
    fn set_shadow(&mut self, s: &Shadow) {
        self.log(format!(
            "setShadow({},{},{},({},{},{},{}))",
            s.offset_x, s.offset_y, s.blur, s.color.r, s.color.g, s.color.b, s.color.a
        ));
    }
    fn clear_shadow(&mut self) {
        self.log("clearShadow()".into());
    }
    fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.log(format!("rect({x},{y},{width},{height})"));
    }
    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.log(format!("fillRect({x},{y},{width},{height})"));
    }
    fn circle(&mut self, x: f64, y: f64, radius: f64) {
        self.log(format!("circle({x},{y},{radius})"));
    }
    fn fill_circle(&mut self, x: f64, y: f64, radius: f64) {
        self.log(format!("fillCircle({x},{y},{radius})"));
    }
    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        self.log(format!("line({x1},{y1},{x2},{y2})"));
    }
    fn fill_text(&mut self, text: &str, x: f64, y: f64, size: Option<f64>, family: Option<&str>, max_width: Option<f64>) {
        self.log(format!("fillText({text},{x},{y},{size:?},{family:?},{max_width:?})"));
    }
    fn stroke_text(&mut self, text: &str, x: f64, y: f64, size: Option<f64>, family: Option<&str>, max_width: Option<f64>) {
        self.log(format!("strokeText({text},{x},{y},{size:?},{family:?},{max_width:?})"));
    }
    fn begin_path(&mut self) {
        self.log("beginPath()".into());
    }
    fn move_to(&mut self, x: f64, y: f64) {
        self.log(format!("moveTo({x},{y})"));
    }
    fn line_to(&mut self, x: f64, y: f64) {
        self.log(format!("lineTo({x},{y})"));
    }
    fn arc(&mut self, x: f64, y: f64, radius: f64, start_angle: f64, end_angle: f64, counterclockwise: bool) {
        self.log(format!("arc({x},{y},{radius},{start_angle},{end_angle},{counterclockwise})"));
    }
    fn arc_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, radius: f64) {
        self.log(format!("arcTo({x1},{y1},{x2},{y2},{radius})"));
    }
    fn bezier_curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64) {
        self.log(format!("bezierCurveTo({cp1x},{cp1y},{cp2x},{cp2y},{x},{y})"));
    }
    fn quadratic_curve_to(&mut self, cpx: f64, cpy: f64, x: f64, y: f64) {
        self.log(format!("quadraticCurveTo({cpx},{cpy},{x},{y})"));
    }
    fn ellipse(&mut self, x: f64, y: f64, radius_x: f64, radius_y: f64, rotation: f64, start_angle: f64, end_angle: f64, counterclockwise: bool) {
        self.log(format!("ellipse({x},{y},{radius_x},{radius_y},{rotation},{start_angle},{end_angle},{counterclockwise})"));
    }
    fn path_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.log(format!("pathRect({x},{y},{width},{height})"));
    }
    fn close_path(&mut self) {
        self.log("closePath()".into());
    }
    fn fill(&mut self) {
        self.log("fill()".into());
    }
    fn stroke(&mut self) {
        self.log("stroke()".into());
    }
    fn clip(&mut self) {
        self.log("clip()".into());
    }
    fn translate(&mut self, x: f64, y: f64) {
        self.log(format!("translate({x},{y})"));
    }
    fn rotate(&mut self, angle: f64) {
        self.log(format!("rotate({angle})"));
    }
    fn scale(&mut self, x: f64, y: f64) {
        self.log(format!("scale({x},{y})"));
    }
    fn save(&mut self) {
        self.log("save()".into());
    }
    fn restore(&mut self) {
        self.log("restore()".into());
    }
    fn transform(&mut self, a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) {
        self.log(format!("transform({a},{b},{c},{d},{e},{f})"));
    }
    fn set_transform(&mut self, a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) {
        self.log(format!("setTransform({a},{b},{c},{d},{e},{f})"));
    }
    fn reset_transform(&mut self) {
        self.log("resetTransform()".into());
    }
    fn draw_image(&mut self, name: &str, blit: ImageBlit) {
        self.log(format!("drawImage({name},{blit:?})"));
    }
    fn put_image_data(&mut self, buffer: &PixelBuffer, dx: f64, dy: f64) {
        // Record dimensions plus a tiny content fingerprint so equivalence
        // tests notice buffer divergence, not just call shape.
        let sum: u32 = buffer.data.iter().map(|b| *b as u32).sum();
        self.log(format!("putImageData({}x{}#{sum},{dx},{dy})", buffer.width, buffer.height));
    }
}
