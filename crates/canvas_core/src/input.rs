//! Input snapshot model.
//!
//! The host feeds platform events in; the controller owns edge detection.
//! "down" is level-triggered (true every frame while held), "pressed" is
//! edge-triggered and cleared by the controller exactly once per frame
//! boundary, so scripts see exactly-once-per-press semantics no matter how
//! often they query within a frame.

use std::collections::BTreeSet;

pub const MOUSE_LEFT: &str = "left";
pub const MOUSE_MIDDLE: &str = "middle";
pub const MOUSE_RIGHT: &str = "right";

#[derive(Debug, Clone, Default)]
pub struct GamepadState {
    pub connected: bool,
    /// Level state per button, platform 0-based. The bridge translates to
    /// 1-based indices for scripts.
    pub buttons: Vec<bool>,
    pub buttons_pressed: Vec<bool>,
    pub axes: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct InputState {
    keys_down: BTreeSet<String>,
    keys_pressed: BTreeSet<String>,
    mouse_x: f64,
    mouse_y: f64,
    mouse_down: BTreeSet<String>,
    mouse_pressed: BTreeSet<String>,
    gamepads: Vec<GamepadState>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Host-fed events ---

    /// `repeat` marks OS key-repeat events, which never retrigger "pressed".
    pub fn key_event(&mut self, code: &str, down: bool, repeat: bool) {
        if down {
            if !repeat && self.keys_down.insert(code.to_string()) {
                self.keys_pressed.insert(code.to_string());
            }
        } else {
            self.keys_down.remove(code);
        }
    }

    pub fn mouse_move(&mut self, x: f64, y: f64) {
        self.mouse_x = x;
        self.mouse_y = y;
    }

    pub fn mouse_button_event(&mut self, button: &str, down: bool) {
        if down {
            if self.mouse_down.insert(button.to_string()) {
                self.mouse_pressed.insert(button.to_string());
            }
        } else {
            self.mouse_down.remove(button);
        }
    }

    /// Replace the snapshot for gamepad `index` (platform 0-based),
    /// deriving button edges from the previous snapshot.
    pub fn gamepad_snapshot(&mut self, index: usize, connected: bool, buttons: Vec<bool>, axes: Vec<f64>) {
        if self.gamepads.len() <= index {
            self.gamepads.resize_with(index + 1, GamepadState::default);
        }
        let pad = &mut self.gamepads[index];
        let mut pressed = vec![false; buttons.len()];
        for (i, now) in buttons.iter().enumerate() {
            let was = pad.buttons.get(i).copied().unwrap_or(false);
            // A new edge stays visible until the frame-boundary clear
            pressed[i] = (*now && !was) || pad.buttons_pressed.get(i).copied().unwrap_or(false);
        }
        pad.connected = connected;
        pad.buttons = buttons;
        pad.buttons_pressed = pressed;
        pad.axes = axes;
    }

    // --- Script-facing queries ---

    pub fn is_key_down(&self, code: &str) -> bool {
        self.keys_down.contains(code)
    }

    pub fn is_key_pressed(&self, code: &str) -> bool {
        self.keys_pressed.contains(code)
    }

    pub fn keys_down(&self) -> impl Iterator<Item = &str> {
        self.keys_down.iter().map(|s| s.as_str())
    }

    pub fn keys_pressed(&self) -> impl Iterator<Item = &str> {
        self.keys_pressed.iter().map(|s| s.as_str())
    }

    pub fn mouse_pos(&self) -> (f64, f64) {
        (self.mouse_x, self.mouse_y)
    }

    pub fn is_mouse_down(&self, button: &str) -> bool {
        self.mouse_down.contains(button)
    }

    pub fn is_mouse_pressed(&self, button: &str) -> bool {
        self.mouse_pressed.contains(button)
    }

    pub fn gamepad(&self, index: usize) -> Option<&GamepadState> {
        self.gamepads.get(index).filter(|p| p.connected)
    }

    pub fn gamepad_count(&self) -> usize {
        self.gamepads.iter().filter(|p| p.connected).count()
    }

    /// Frame-boundary clear of all edge state. Called by the controller,
    /// never by scripts.
    pub fn end_frame(&mut self) {
        self.keys_pressed.clear();
        self.mouse_pressed.clear();
        for pad in &mut self.gamepads {
            for b in &mut pad.buttons_pressed {
                *b = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressed_is_edge_triggered_across_frames() {
        let mut input = InputState::new();
        input.key_event("KeyA", true, false);

        // Frame 1: both true
        assert!(input.is_key_down("KeyA"));
        assert!(input.is_key_pressed("KeyA"));
        input.end_frame();

        // Frames 2-3: held, pressed gone
        assert!(input.is_key_down("KeyA"));
        assert!(!input.is_key_pressed("KeyA"));
        input.end_frame();
        assert!(input.is_key_down("KeyA"));
        assert!(!input.is_key_pressed("KeyA"));
        input.end_frame();

        // Frame 4: release + re-press within the frame
        input.key_event("KeyA", false, false);
        input.key_event("KeyA", true, false);
        assert!(input.is_key_pressed("KeyA"));
    }

    #[test]
    fn repeat_events_do_not_retrigger() {
        let mut input = InputState::new();
        input.key_event("KeyA", true, false);
        input.end_frame();
        input.key_event("KeyA", true, true);
        assert!(!input.is_key_pressed("KeyA"));
    }

    #[test]
    fn pressed_stable_within_one_frame() {
        let mut input = InputState::new();
        input.key_event("Space", true, false);
        // Query any number of times before the boundary: same answer
        assert!(input.is_key_pressed("Space"));
        assert!(input.is_key_pressed("Space"));
        input.end_frame();
        assert!(!input.is_key_pressed("Space"));
    }

    #[test]
    fn gamepad_edges_follow_snapshots() {
        let mut input = InputState::new();
        input.gamepad_snapshot(0, true, vec![false, true], vec![0.0, 0.5]);
        let pad = input.gamepad(0).unwrap();
        assert!(pad.buttons_pressed[1]);
        input.end_frame();
        input.gamepad_snapshot(0, true, vec![false, true], vec![0.0, 0.5]);
        assert!(!input.gamepad(0).unwrap().buttons_pressed[1]);
    }

    #[test]
    fn mouse_edges_mirror_keyboard_model() {
        let mut input = InputState::new();
        input.mouse_button_event(MOUSE_LEFT, true);
        assert!(input.is_mouse_down(MOUSE_LEFT));
        assert!(input.is_mouse_pressed(MOUSE_LEFT));
        input.end_frame();
        assert!(input.is_mouse_down(MOUSE_LEFT));
        assert!(!input.is_mouse_pressed(MOUSE_LEFT));
    }
}
