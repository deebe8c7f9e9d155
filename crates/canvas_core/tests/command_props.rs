//! Property tests for the color parser and the command protocol.

use canvas_core::command::{Color, DrawCommand};
use canvas_core::pixels::PixelStore;
use canvas_core::render::{replay, RecordingCanvas};
use proptest::prelude::*;

proptest! {
    #[test]
    fn hex_round_trips_for_every_color(r in 0u8..=255, g in 0u8..=255, b in 0u8..=255) {
        let hex = format!("#{r:02X}{g:02X}{b:02X}");
        prop_assert_eq!(Color::from_hex(&hex).unwrap(), Color::rgba(r, g, b, 255));

        let hex_alpha = format!("#{r:02x}{g:02x}{b:02x}80");
        prop_assert_eq!(Color::from_hex(&hex_alpha).unwrap(), Color::rgba(r, g, b, 0x80));
    }

    #[test]
    fn short_hex_expands_like_doubled_digits(r in 0u8..=15, g in 0u8..=15, b in 0u8..=15) {
        let short = format!("#{r:01X}{g:01X}{b:01X}");
        let long = format!("#{r:01X}{r:01X}{g:01X}{g:01X}{b:01X}{b:01X}");
        prop_assert_eq!(Color::from_hex(&short).unwrap(), Color::from_hex(&long).unwrap());
    }

    #[test]
    fn non_hex_strings_never_parse(s in "[^#]{0,12}") {
        prop_assert!(Color::from_hex(&s).is_err());
    }

    #[test]
    fn wire_round_trip_preserves_any_rect_batch(
        rects in prop::collection::vec((0.0f64..500.0, 0.0f64..500.0, 1.0f64..64.0, 1.0f64..64.0), 0..32)
    ) {
        let commands: Vec<DrawCommand> = rects
            .iter()
            .map(|&(x, y, width, height)| DrawCommand::FillRect { x, y, width, height })
            .collect();

        let json = serde_json::to_string(&commands).unwrap();
        let back: Vec<DrawCommand> = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(&back, &commands);

        // Replay order equals batch order
        let pixels = PixelStore::new();
        let mut canvas = RecordingCanvas::new();
        replay(&back, &pixels, &mut canvas);
        prop_assert_eq!(canvas.calls.len(), commands.len());
    }
}

#[test]
fn every_variant_has_a_stable_wire_tag() {
    // A spot check that serde tags match op_name: the two must stay in sync
    // for wire diagnostics to be trustworthy.
    let samples = vec![
        DrawCommand::Clear,
        DrawCommand::SetLineWidth { width: 2.0 },
        DrawCommand::BeginPath,
        DrawCommand::ArcTo { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0, radius: 4.0 },
        DrawCommand::ResetTransform,
        DrawCommand::PutImageData { handle: 1, dx: 0.0, dy: 0.0 },
        DrawCommand::DrawImage {
            name: "x".into(),
            dx: 0.0,
            dy: 0.0,
            dw: None,
            dh: None,
            sx: None,
            sy: None,
            sw: None,
            sh: None,
        },
    ];
    for cmd in samples {
        let json = serde_json::to_string(&cmd).unwrap();
        let expected = format!("\"op\":\"{}\"", cmd.op_name());
        assert!(json.contains(&expected), "{json} missing {expected}");
    }
}
