use crate::command::{Color, DrawCommand, Gradient, Shadow};
use crate::input::InputState;
use crate::path::PathMirror;
use crate::pixels::PixelStore;
use crate::render::RenderTarget;
use anyhow::Result;

const DEFAULT_FONT_SIZE: f64 = 16.0;
const DEFAULT_FONT_FAMILY: &str = "sans-serif";

/// Current fill/stroke source.
#[derive(Debug, Clone, PartialEq)]
pub enum Paint {
    Color(Color),
    Gradient(Gradient),
}

/// Drawing state the controller mirrors alongside the command stream.
/// Mutated only by bridge calls; reset only by the explicit `clear` and
/// reset commands.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasState {
    pub paint: Paint,
    pub line_width: f64,
    pub font_size: f64,
    pub font_family: String,
    pub global_alpha: f64,
    pub composite_op: String,
    pub shadow: Option<Shadow>,
    pub save_depth: u32,
}

impl Default for CanvasState {
    fn default() -> Self {
        Self {
            paint: Paint::Color(Color::BLACK),
            line_width: 1.0,
            font_size: DEFAULT_FONT_SIZE,
            font_family: DEFAULT_FONT_FAMILY.to_string(),
            global_alpha: 1.0,
            composite_op: "source-over".to_string(),
            shadow: None,
            save_depth: 0,
        }
    }
}

/// Outcome of `start()`. Re-entrancy is a first-class status, not an
/// exception; the bridge converts it to a script error.
#[derive(Debug)]
pub enum StartError {
    AlreadyActive,
    Preload(anyhow::Error),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::AlreadyActive => write!(f, "canvas is already running"),
            StartError::Preload(e) => write!(f, "asset preload failed: {e:#}"),
        }
    }
}

impl std::error::Error for StartError {}

/// The stateful frame driver: batches commands per frame, owns the drawing
/// state mirror, the path mirror for synchronous hit tests, the pixel
/// store, and the input edge model.
pub struct CanvasController {
    width: u32,
    height: u32,
    state: CanvasState,
    frame: Vec<DrawCommand>,
    path: PathMirror,
    pixels: PixelStore,
    input: InputState,
    target: Box<dyn RenderTarget>,
    active: bool,
    elapsed: f64,
    delta: f64,
    frames_flushed: u64,
}

impl CanvasController {
    pub fn new(target: Box<dyn RenderTarget>) -> Self {
        Self {
            width: 800,
            height: 600,
            state: CanvasState::default(),
            frame: Vec::with_capacity(256),
            path: PathMirror::new(),
            pixels: PixelStore::new(),
            input: InputState::new(),
            target,
            active: false,
            elapsed: 0.0,
            delta: 0.0,
            frames_flushed: 0,
        }
    }

    // --- Lifecycle ---

    /// Calling while already active is a script-level error, never a
    /// silent no-op.
    pub fn start(&mut self) -> Result<(), StartError> {
        if self.active {
            return Err(StartError::AlreadyActive);
        }
        self.active = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    // --- Frame driving ---

    /// Opens a frame: the command buffer starts empty and the clock
    /// advances. `get_delta`/`get_time` derive from these same ticks.
    pub fn begin_frame(&mut self, dt: f64) {
        self.frame.clear();
        self.delta = dt;
        self.elapsed += dt;
    }

    /// Flushes the buffered commands to the render target in FIFO order,
    /// exactly once, then clears the buffer and the input edge state.
    /// Returns how many commands were flushed.
    pub fn end_frame(&mut self) -> Result<u32> {
        let count = self.frame.len() as u32;
        self.target.flush(&self.frame, &self.pixels)?;
        self.frame.clear();
        self.frames_flushed += 1;
        self.input.end_frame();
        Ok(count)
    }

    pub fn get_delta(&self) -> f64 {
        self.delta
    }

    pub fn get_time(&self) -> f64 {
        self.elapsed
    }

    pub fn frames_flushed(&self) -> u64 {
        self.frames_flushed
    }

    /// The commands buffered so far this frame.
    pub fn buffered(&self) -> &[DrawCommand] {
        &self.frame
    }

    // --- Command recording ---

    /// Append a command to the current frame and fold its effect into the
    /// state and path mirrors.
    pub fn push(&mut self, cmd: DrawCommand) {
        self.apply_to_mirrors(&cmd);
        self.frame.push(cmd);
    }

    fn apply_to_mirrors(&mut self, cmd: &DrawCommand) {
        match cmd {
            DrawCommand::Clear => {
                // Full clear resets drawing state along with the surface
                self.state = CanvasState::default();
                self.path = PathMirror::new();
            }
            DrawCommand::SetColor { color } => self.state.paint = Paint::Color(*color),
            DrawCommand::SetLinearGradient { x0, y0, x1, y1, stops } => {
                self.state.paint = Paint::Gradient(Gradient::Linear {
                    x0: *x0,
                    y0: *y0,
                    x1: *x1,
                    y1: *y1,
                    stops: stops.clone(),
                })
            }
            DrawCommand::SetRadialGradient { x0, y0, r0, x1, y1, r1, stops } => {
                self.state.paint = Paint::Gradient(Gradient::Radial {
                    x0: *x0,
                    y0: *y0,
                    r0: *r0,
                    x1: *x1,
                    y1: *y1,
                    r1: *r1,
                    stops: stops.clone(),
                })
            }
            DrawCommand::SetLineWidth { width } => self.state.line_width = *width,
            DrawCommand::SetFont { size, family } => {
                self.state.font_size = *size;
                self.state.font_family = family.clone();
            }
            DrawCommand::SetGlobalAlpha { alpha } => self.state.global_alpha = *alpha,
            DrawCommand::SetGlobalCompositeOperation { op } => {
                self.state.composite_op = op.clone()
            }
            DrawCommand::SetShadow { shadow } => self.state.shadow = Some(*shadow),
            DrawCommand::ClearShadow => self.state.shadow = None,
            DrawCommand::Save => self.state.save_depth += 1,
            DrawCommand::Restore => {
                self.state.save_depth = self.state.save_depth.saturating_sub(1)
            }
            DrawCommand::BeginPath => self.path.begin(),
            DrawCommand::MoveTo { x, y } => self.path.move_to(*x, *y),
            DrawCommand::LineTo { x, y } => self.path.line_to(*x, *y),
            DrawCommand::Arc { x, y, radius, start_angle, end_angle, counterclockwise } => {
                self.path.arc(*x, *y, *radius, *start_angle, *end_angle, *counterclockwise)
            }
            DrawCommand::ArcTo { x1, y1, x2, y2, radius } => {
                self.path.arc_to(*x1, *y1, *x2, *y2, *radius)
            }
            DrawCommand::BezierCurveTo { cp1x, cp1y, cp2x, cp2y, x, y } => {
                self.path.bezier_curve_to(*cp1x, *cp1y, *cp2x, *cp2y, *x, *y)
            }
            DrawCommand::QuadraticCurveTo { cpx, cpy, x, y } => {
                self.path.quadratic_curve_to(*cpx, *cpy, *x, *y)
            }
            DrawCommand::Ellipse { x, y, radius_x, radius_y, rotation, start_angle, end_angle, counterclockwise } => {
                self.path.ellipse(*x, *y, *radius_x, *radius_y, *rotation, *start_angle, *end_angle, *counterclockwise)
            }
            DrawCommand::PathRect { x, y, width, height } => {
                self.path.rect(*x, *y, *width, *height)
            }
            DrawCommand::ClosePath => self.path.close(),
            // Everything else affects the surface, not the mirrors
            DrawCommand::ClearRect { .. }
            | DrawCommand::Rect { .. }
            | DrawCommand::FillRect { .. }
            | DrawCommand::Circle { .. }
            | DrawCommand::FillCircle { .. }
            | DrawCommand::Line { .. }
            | DrawCommand::FillText { .. }
            | DrawCommand::StrokeText { .. }
            | DrawCommand::Fill
            | DrawCommand::Stroke
            | DrawCommand::Clip
            | DrawCommand::Translate { .. }
            | DrawCommand::Rotate { .. }
            | DrawCommand::Scale { .. }
            | DrawCommand::Transform { .. }
            | DrawCommand::SetTransform { .. }
            | DrawCommand::ResetTransform
            | DrawCommand::DrawImage { .. }
            | DrawCommand::PutImageData { .. } => {}
        }
    }

    // --- Synchronous queries ---

    pub fn state(&self) -> &CanvasState {
        &self.state
    }

    pub fn is_point_in_path(&self, x: f64, y: f64) -> bool {
        self.path.contains(x, y)
    }

    pub fn is_point_in_stroke(&self, x: f64, y: f64) -> bool {
        self.path.hits_stroke(x, y, self.state.line_width)
    }

    // --- Pixels / input accessors ---

    pub fn pixels(&self) -> &PixelStore {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut PixelStore {
        &mut self.pixels
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::NullTarget;

    fn controller() -> CanvasController {
        CanvasController::new(Box::new(NullTarget))
    }

    #[test]
    fn start_twice_is_an_error() {
        let mut c = controller();
        assert!(c.start().is_ok());
        assert!(matches!(c.start(), Err(StartError::AlreadyActive)));
        c.stop();
        assert!(c.start().is_ok());
    }

    #[test]
    fn commands_buffer_in_call_order_and_flush_clears() {
        let mut c = controller();
        c.begin_frame(1.0 / 60.0);
        c.push(DrawCommand::Clear);
        c.push(DrawCommand::SetColor { color: Color::rgba(255, 0, 0, 255) });
        c.push(DrawCommand::FillRect { x: 0.0, y: 0.0, width: 10.0, height: 10.0 });
        assert_eq!(
            c.buffered().iter().map(|c| c.op_name()).collect::<Vec<_>>(),
            vec!["clear", "setColor", "fillRect"]
        );
        assert_eq!(c.end_frame().unwrap(), 3);
        assert!(c.buffered().is_empty());
        // Next frame starts empty as well
        c.begin_frame(1.0 / 60.0);
        assert!(c.buffered().is_empty());
    }

    #[test]
    fn state_mirror_tracks_color_equivalence() {
        let mut c = controller();
        c.push(DrawCommand::SetColor { color: Color::from_hex("#FF0000").unwrap() });
        let hex_state = c.state().clone();
        c.push(DrawCommand::SetColor { color: Color::rgba(255, 0, 0, 255) });
        assert_eq!(c.state().paint, hex_state.paint);
    }

    #[test]
    fn clear_resets_state() {
        let mut c = controller();
        c.push(DrawCommand::SetLineWidth { width: 4.0 });
        c.push(DrawCommand::Clear);
        assert_eq!(c.state().line_width, 1.0);
    }

    #[test]
    fn clock_accumulates_frame_deltas() {
        let mut c = controller();
        c.begin_frame(0.016);
        assert!((c.get_delta() - 0.016).abs() < 1e-12);
        c.end_frame().unwrap();
        c.begin_frame(0.016);
        assert!((c.get_time() - 0.032).abs() < 1e-12);
    }

    #[test]
    fn restore_below_zero_saturates() {
        let mut c = controller();
        c.push(DrawCommand::Restore);
        assert_eq!(c.state().save_depth, 0);
        c.push(DrawCommand::Save);
        c.push(DrawCommand::Save);
        c.push(DrawCommand::Restore);
        assert_eq!(c.state().save_depth, 1);
    }
}
