use serde::{Deserialize, Serialize};

/// RGBA color, 0-255 per channel (alpha included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };

    pub fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse a `#RGB`, `#RGBA`, `#RRGGBB` or `#RRGGBBAA` hex string.
    /// Invalid strings are an error, never a silent default.
    pub fn from_hex(s: &str) -> Result<Self, ColorParseError> {
        let hex = s
            .strip_prefix('#')
            .ok_or_else(|| ColorParseError::new(s, "missing '#' prefix"))?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorParseError::new(s, "non-hex digit"));
        }
        let nib = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).unwrap();
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap();
        match hex.len() {
            // Short forms expand each nibble: #F00 == #FF0000
            3 => Ok(Self::rgba(nib(0) * 17, nib(1) * 17, nib(2) * 17, 255)),
            4 => Ok(Self::rgba(nib(0) * 17, nib(1) * 17, nib(2) * 17, nib(3) * 17)),
            6 => Ok(Self::rgba(byte(0), byte(2), byte(4), 255)),
            8 => Ok(Self::rgba(byte(0), byte(2), byte(4), byte(6))),
            _ => Err(ColorParseError::new(s, "expected 3, 4, 6 or 8 hex digits")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorParseError {
    pub input: String,
    pub reason: &'static str,
}

impl ColorParseError {
    fn new(input: &str, reason: &'static str) -> Self {
        Self { input: input.to_string(), reason }
    }
}

impl std::fmt::Display for ColorParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid color '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ColorParseError {}

/// One stop of a gradient ramp. `offset` is in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub offset: f64,
    pub color: Color,
}

/// Gradients cross the renderer boundary as data (coordinates + stops) and
/// are reconstructed on the far side, never passed as live handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Gradient {
    Linear {
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
        stops: Vec<GradientStop>,
    },
    Radial {
        x0: f64,
        y0: f64,
        r0: f64,
        x1: f64,
        y1: f64,
        r1: f64,
        stops: Vec<GradientStop>,
    },
}

/// Shadow state as one record; `ClearShadow` resets it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shadow {
    pub offset_x: f64,
    pub offset_y: f64,
    pub blur: f64,
    pub color: Color,
}

/// A single serializable drawing instruction.
///
/// The set is closed: the replayer matches every variant without a wildcard
/// arm, so adding a variant without teaching every consumer is a compile
/// error. Commands carry no live object references (pixel buffers are
/// referenced by opaque numeric handle) so a frame batch can cross a
/// message-passing boundary unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DrawCommand {
    Clear,
    ClearRect { x: f64, y: f64, width: f64, height: f64 },

    // State
    SetColor { color: Color },
    SetLinearGradient { x0: f64, y0: f64, x1: f64, y1: f64, stops: Vec<GradientStop> },
    SetRadialGradient { x0: f64, y0: f64, r0: f64, x1: f64, y1: f64, r1: f64, stops: Vec<GradientStop> },
    SetLineWidth { width: f64 },
    SetFont { size: f64, family: String },
    SetGlobalAlpha { alpha: f64 },
    SetGlobalCompositeOperation {
        #[serde(rename = "value")]
        op: String,
    },
    SetShadow { shadow: Shadow },
    ClearShadow,

    // Shapes
    Rect { x: f64, y: f64, width: f64, height: f64 },
    FillRect { x: f64, y: f64, width: f64, height: f64 },
    Circle { x: f64, y: f64, radius: f64 },
    FillCircle { x: f64, y: f64, radius: f64 },
    Line { x1: f64, y1: f64, x2: f64, y2: f64 },

    // Text
    FillText {
        text: String,
        x: f64,
        y: f64,
        size: Option<f64>,
        family: Option<String>,
        max_width: Option<f64>,
    },
    StrokeText {
        text: String,
        x: f64,
        y: f64,
        size: Option<f64>,
        family: Option<String>,
        max_width: Option<f64>,
    },

    // Path building; the accumulated path is consumed by Fill/Stroke/Clip
    BeginPath,
    MoveTo { x: f64, y: f64 },
    LineTo { x: f64, y: f64 },
    Arc { x: f64, y: f64, radius: f64, start_angle: f64, end_angle: f64, counterclockwise: bool },
    ArcTo { x1: f64, y1: f64, x2: f64, y2: f64, radius: f64 },
    BezierCurveTo { cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64 },
    QuadraticCurveTo { cpx: f64, cpy: f64, x: f64, y: f64 },
    Ellipse { x: f64, y: f64, radius_x: f64, radius_y: f64, rotation: f64, start_angle: f64, end_angle: f64, counterclockwise: bool },
    PathRect { x: f64, y: f64, width: f64, height: f64 },
    ClosePath,
    Fill,
    Stroke,
    Clip,

    // Transforms
    Translate { x: f64, y: f64 },
    Rotate { angle: f64 },
    Scale { x: f64, y: f64 },
    Save,
    Restore,
    Transform { a: f64, b: f64, c: f64, d: f64, e: f64, f: f64 },
    SetTransform { a: f64, b: f64, c: f64, d: f64, e: f64, f: f64 },
    ResetTransform,

    // Images. Dispatch is on which optional parameters are present; when
    // both source and destination rects are given, cropping wins.
    DrawImage {
        name: String,
        dx: f64,
        dy: f64,
        dw: Option<f64>,
        dh: Option<f64>,
        sx: Option<f64>,
        sy: Option<f64>,
        sw: Option<f64>,
        sh: Option<f64>,
    },

    // Pixels. The buffer lives renderer-side; the handle is opaque.
    PutImageData { handle: u32, dx: f64, dy: f64 },
}

impl DrawCommand {
    /// Wire tag of this command, for diagnostics and wire-format tests.
    pub fn op_name(&self) -> &'static str {
        match self {
            DrawCommand::Clear => "clear",
            DrawCommand::ClearRect { .. } => "clearRect",
            DrawCommand::SetColor { .. } => "setColor",
            DrawCommand::SetLinearGradient { .. } => "setLinearGradient",
            DrawCommand::SetRadialGradient { .. } => "setRadialGradient",
            DrawCommand::SetLineWidth { .. } => "setLineWidth",
            DrawCommand::SetFont { .. } => "setFont",
            DrawCommand::SetGlobalAlpha { .. } => "setGlobalAlpha",
            DrawCommand::SetGlobalCompositeOperation { .. } => "setGlobalCompositeOperation",
            DrawCommand::SetShadow { .. } => "setShadow",
            DrawCommand::ClearShadow => "clearShadow",
            DrawCommand::Rect { .. } => "rect",
            DrawCommand::FillRect { .. } => "fillRect",
            DrawCommand::Circle { .. } => "circle",
            DrawCommand::FillCircle { .. } => "fillCircle",
            DrawCommand::Line { .. } => "line",
            DrawCommand::FillText { .. } => "fillText",
            DrawCommand::StrokeText { .. } => "strokeText",
            DrawCommand::BeginPath => "beginPath",
            DrawCommand::MoveTo { .. } => "moveTo",
            DrawCommand::LineTo { .. } => "lineTo",
            DrawCommand::Arc { .. } => "arc",
            DrawCommand::ArcTo { .. } => "arcTo",
            DrawCommand::BezierCurveTo { .. } => "bezierCurveTo",
            DrawCommand::QuadraticCurveTo { .. } => "quadraticCurveTo",
            DrawCommand::Ellipse { .. } => "ellipse",
            DrawCommand::PathRect { .. } => "pathRect",
            DrawCommand::ClosePath => "closePath",
            DrawCommand::Fill => "fill",
            DrawCommand::Stroke => "stroke",
            DrawCommand::Clip => "clip",
            DrawCommand::Translate { .. } => "translate",
            DrawCommand::Rotate { .. } => "rotate",
            DrawCommand::Scale { .. } => "scale",
            DrawCommand::Save => "save",
            DrawCommand::Restore => "restore",
            DrawCommand::Transform { .. } => "transform",
            DrawCommand::SetTransform { .. } => "setTransform",
            DrawCommand::ResetTransform => "resetTransform",
            DrawCommand::DrawImage { .. } => "drawImage",
            DrawCommand::PutImageData { .. } => "putImageData",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_long_form() {
        assert_eq!(Color::from_hex("#FF0000").unwrap(), Color::rgba(255, 0, 0, 255));
        assert_eq!(Color::from_hex("#00ff00").unwrap(), Color::rgba(0, 255, 0, 255));
        assert_eq!(Color::from_hex("#12345678").unwrap(), Color::rgba(0x12, 0x34, 0x56, 0x78));
    }

    #[test]
    fn hex_short_form_expands() {
        assert_eq!(Color::from_hex("#F00").unwrap(), Color::from_hex("#FF0000").unwrap());
        assert_eq!(Color::from_hex("#abc").unwrap(), Color::rgba(0xaa, 0xbb, 0xcc, 255));
        assert_eq!(Color::from_hex("#abcd").unwrap(), Color::rgba(0xaa, 0xbb, 0xcc, 0xdd));
    }

    #[test]
    fn hex_rejects_garbage() {
        assert!(Color::from_hex("#ZZZ").is_err());
        assert!(Color::from_hex("FF0000").is_err());
        assert!(Color::from_hex("#FF00").is_ok()); // 4-digit form is valid
        assert!(Color::from_hex("#FF000").is_err());
        assert!(Color::from_hex("#").is_err());
    }

    #[test]
    fn commands_round_trip_as_tagged_json() {
        let cmd = DrawCommand::FillRect { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"op\":\"fillRect\""));
        let back: DrawCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }
}
