//! Key-name normalization.
//!
//! Scripts address keys by friendly names; the engine stores W3C code
//! strings. Single letters map to `KeyX`, digits to `DigitN`, and a table
//! of named constants covers the rest. Strings already in code form pass
//! through unchanged.

/// Normalize a script-facing key name to its W3C code string.
pub fn normalize(name: &str) -> String {
    let trimmed = name.trim();

    // Single letter: "a" / "A" -> "KeyA"
    if trimmed.len() == 1 {
        let c = trimmed.chars().next().unwrap();
        if c.is_ascii_alphabetic() {
            return format!("Key{}", c.to_ascii_uppercase());
        }
        if c.is_ascii_digit() {
            return format!("Digit{c}");
        }
    }

    match trimmed.to_ascii_uppercase().as_str() {
        "UP" => "ArrowUp".into(),
        "DOWN" => "ArrowDown".into(),
        "LEFT" => "ArrowLeft".into(),
        "RIGHT" => "ArrowRight".into(),
        "SPACE" => "Space".into(),
        "ENTER" | "RETURN" => "Enter".into(),
        "ESC" | "ESCAPE" => "Escape".into(),
        "TAB" => "Tab".into(),
        "BACKSPACE" => "Backspace".into(),
        "DELETE" => "Delete".into(),
        "SHIFT" => "ShiftLeft".into(),
        "CTRL" | "CONTROL" => "ControlLeft".into(),
        "ALT" => "AltLeft".into(),
        "HOME" => "Home".into(),
        "END" => "End".into(),
        "PAGEUP" => "PageUp".into(),
        "PAGEDOWN" => "PageDown".into(),
        _ => trimmed.to_string(),
    }
}

/// The constants exposed on the bridge's `canvas.keys` table:
/// (script name, code string).
pub const NAMED_KEYS: &[(&str, &str)] = &[
    ("UP", "ArrowUp"),
    ("DOWN", "ArrowDown"),
    ("LEFT", "ArrowLeft"),
    ("RIGHT", "ArrowRight"),
    ("SPACE", "Space"),
    ("ENTER", "Enter"),
    ("ESCAPE", "Escape"),
    ("TAB", "Tab"),
    ("BACKSPACE", "Backspace"),
    ("DELETE", "Delete"),
    ("SHIFT", "ShiftLeft"),
    ("CTRL", "ControlLeft"),
    ("ALT", "AltLeft"),
    ("HOME", "Home"),
    ("END", "End"),
    ("PAGEUP", "PageUp"),
    ("PAGEDOWN", "PageDown"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_digits() {
        assert_eq!(normalize("a"), "KeyA");
        assert_eq!(normalize("Z"), "KeyZ");
        assert_eq!(normalize("7"), "Digit7");
    }

    #[test]
    fn named_constants() {
        assert_eq!(normalize("UP"), "ArrowUp");
        assert_eq!(normalize("space"), "Space");
        assert_eq!(normalize("Esc"), "Escape");
    }

    #[test]
    fn code_strings_pass_through() {
        assert_eq!(normalize("KeyA"), "KeyA");
        assert_eq!(normalize("ArrowLeft"), "ArrowLeft");
        assert_eq!(normalize("F5"), "F5");
    }
}
