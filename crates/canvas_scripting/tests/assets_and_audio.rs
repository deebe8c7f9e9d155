//! Asset registration semantics and the audio bridge, including the
//! autoplay-unlock deferral and the manifest-mode restriction.

use anyhow::Result;
use canvas_core::assets::{AssetSource, ManifestEntry};
use canvas_core::audio::{AudioBackend, DecodedBuffer, VoiceId, VoiceSpec};
use canvas_scripting::runtime::{CanvasRuntime, RuntimeConfig};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

static DIR_SEQ: AtomicU32 = AtomicU32::new(0);

fn scratch_root(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "luacanvas-assets-{}-{}-{}",
        tag,
        std::process::id(),
        DIR_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Minimal working backend: decodes anything, first byte is the duration.
#[derive(Clone, Default)]
struct Probe {
    started: Rc<RefCell<Vec<VoiceSpec>>>,
    decoded: Rc<RefCell<Vec<f64>>>,
}

struct FakeBackend {
    probe: Probe,
    next_buffer: u32,
    next_voice: VoiceId,
    clock: std::time::Instant,
}

impl FakeBackend {
    fn new(probe: Probe) -> Self {
        Self { probe, next_buffer: 1, next_voice: 1, clock: std::time::Instant::now() }
    }
}

impl AudioBackend for FakeBackend {
    fn activate(&mut self) -> Result<()> {
        Ok(())
    }
    fn decode(&mut self, bytes: &[u8]) -> Result<DecodedBuffer> {
        let duration = bytes.first().copied().unwrap_or(0) as f64;
        self.probe.decoded.borrow_mut().push(duration);
        let id = self.next_buffer;
        self.next_buffer += 1;
        Ok(DecodedBuffer { id, duration })
    }
    fn start_voice(&mut self, spec: VoiceSpec) -> Result<VoiceId> {
        self.probe.started.borrow_mut().push(spec);
        let id = self.next_voice;
        self.next_voice += 1;
        Ok(id)
    }
    fn stop_voice(&mut self, _voice: VoiceId) {}
    fn set_voice_gain(&mut self, _voice: VoiceId, _gain: f64) {}
    fn now(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }
    fn close(&mut self) {}
}

fn runtime_with_audio(root: &PathBuf) -> (CanvasRuntime, Probe) {
    let probe = Probe::default();
    let mut config = RuntimeConfig::headless(root.clone());
    config.audio_backend = Box::new(FakeBackend::new(probe.clone()));
    (CanvasRuntime::new(config).unwrap(), probe)
}

#[test]
fn missing_image_fails_start_and_width_is_a_sentinel() {
    let root = scratch_root("missing-image");
    let runtime = CanvasRuntime::new(RuntimeConfig::headless(root)).unwrap();
    runtime
        .load_script(
            r##"
            assets.image("hero", "art/hero.png")
            local ok, err = pcall(canvas.start)
            assert(not ok, "start must fail on a missing asset")
            assert(string.find(tostring(err), "hero.png", 1, true), tostring(err))
            -- A defined sentinel, not an unrelated error
            assert(assets.get_width("hero") == 0)
            assert(assets.get_height("hero") == 0)
            -- The failed start rolled back, so a later start can succeed
            assert(not canvas.is_running())
            "##,
            "missing.lua",
        )
        .unwrap();
}

#[test]
fn post_start_image_registration_fails_at_the_call_site() {
    let root = scratch_root("post-start");
    let runtime = CanvasRuntime::new(RuntimeConfig::headless(root)).unwrap();
    runtime
        .load_script(
            r##"
            canvas.start()
            local ok, err = pcall(function() return assets.image("hero", "nope.png") end)
            assert(not ok)
            assert(string.find(tostring(err), "nope.png", 1, true), tostring(err))
            "##,
            "poststart.lua",
        )
        .unwrap();
}

#[test]
fn sound_bytes_decode_after_unlock_in_registration_order() {
    let root = scratch_root("unlock");
    std::fs::write(root.join("one.ogg"), [3u8, 0, 0]).unwrap();
    std::fs::write(root.join("two.ogg"), [5u8, 0, 0]).unwrap();
    let (runtime, probe) = runtime_with_audio(&root);

    runtime
        .load_script(
            r##"
            assets.load_sound("one", "one.ogg")
            assets.load_music("two", "two.ogg")
            -- Not decoded yet: the autoplay gate is still closed
            assert(not canvas.has_audio("one"))
            assert(canvas.get_sound_duration("one") == 0)
            "##,
            "register.lua",
        )
        .unwrap();
    assert!(probe.decoded.borrow().is_empty());

    assert!(runtime.notify_interaction());

    runtime
        .load_script(
            r##"
            assert(canvas.is_audio_available())
            assert(canvas.has_audio("one"))
            assert(canvas.has_audio("two"))
            assert(canvas.get_sound_duration("one") == 3)
            assert(canvas.get_sound_duration("two") == 5)
            "##,
            "after.lua",
        )
        .unwrap();
    assert_eq!(*probe.decoded.borrow(), vec![3.0, 5.0]);
}

#[test]
fn missing_sound_path_is_a_registration_error() {
    let root = scratch_root("missing-sound");
    let (runtime, _probe) = runtime_with_audio(&root);
    runtime
        .load_script(
            r##"
            local ok, err = pcall(function() return assets.load_sound("blip", "blip.ogg") end)
            assert(not ok)
            assert(string.find(tostring(err), "blip.ogg", 1, true), tostring(err))
            "##,
            "missing.lua",
        )
        .unwrap();
}

#[test]
fn channel_volume_hierarchy_from_lua() {
    let root = scratch_root("channels");
    std::fs::write(root.join("pad.ogg"), [10u8]).unwrap();
    let (runtime, probe) = runtime_with_audio(&root);
    runtime.notify_interaction();

    runtime
        .load_script(
            r##"
            assets.load_sound("pad", "pad.ogg")
            canvas.set_master_volume(0.8)
            canvas.channel_create("parent")
            canvas.channel_create("child")
            canvas.channel_set_parent("child", "parent")
            canvas.channel_set_volume("parent", 0.5)
            canvas.channel_set_volume("child", 0.5)
            local v = canvas.channel_get_effective_volume("child")
            assert(math.abs(v - 0.2) < 1e-9, "effective volume was " .. v)
            assert(canvas.channel_get_parent("child") == "parent")

            canvas.mute()
            assert(canvas.is_muted())
            assert(canvas.channel_get_effective_volume("child") == 0)
            canvas.unmute()
            assert(math.abs(canvas.channel_get_effective_volume("child") - 0.2) < 1e-9)

            canvas.channel_play("child", "pad", true, 0)
            assert(canvas.channel_is_playing("child"))
            assert(canvas.channel_get_audio("child") == "pad")
            assert(canvas.channel_get_duration("child") == 10)
            "##,
            "channels.lua",
        )
        .unwrap();

    let started = probe.started.borrow();
    assert_eq!(started.len(), 1);
    assert!((started[0].gain - 0.2).abs() < 1e-9);
    assert!(started[0].looping);
}

#[test]
fn queued_channel_ops_replay_after_unlock() {
    let root = scratch_root("queued");
    let (runtime, _probe) = runtime_with_audio(&root);

    runtime
        .load_script(
            r##"
            canvas.channel_create("sfx")
            canvas.channel_set_volume("sfx", 0.25)
            "##,
            "queued.lua",
        )
        .unwrap();

    runtime.notify_interaction();

    runtime
        .load_script(
            r##"
            local v = canvas.channel_get_volume("sfx")
            assert(math.abs(v - 0.25) < 1e-9, "queued volume not applied: " .. v)
            "##,
            "after.lua",
        )
        .unwrap();
}

#[test]
fn manifest_mode_rejects_audio_registration_after_start() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let mut entries = HashMap::new();
    entries.insert(
        "blip.ogg".to_string(),
        ManifestEntry { path: "blip.ogg".into(), data: Some(STANDARD.encode([2u8, 0])) },
    );
    entries.insert(
        "late.ogg".to_string(),
        ManifestEntry { path: "late.ogg".into(), data: Some(STANDARD.encode([2u8, 0])) },
    );

    let probe = Probe::default();
    let mut config = RuntimeConfig::headless(std::env::temp_dir());
    config.source = AssetSource::Manifest(entries);
    config.audio_backend = Box::new(FakeBackend::new(probe.clone()));
    let runtime = CanvasRuntime::new(config).unwrap();

    runtime
        .load_script(
            r##"
            -- Before start: accepted, bytes come from the embedded payload
            assets.load_sound("blip", "blip.ogg")
            canvas.start()
            local ok, err = pcall(function() return assets.load_sound("late", "late.ogg") end)
            assert(not ok, "late registration must be rejected in manifest mode")
            assert(string.find(tostring(err), "before start", 1, true), tostring(err))
            "##,
            "manifest.lua",
        )
        .unwrap();

    runtime.notify_interaction();
    assert_eq!(*probe.decoded.borrow(), vec![2.0]);
}

#[test]
fn sound_playback_flows_through_master_volume() {
    let root = scratch_root("master");
    std::fs::write(root.join("hit.ogg"), [1u8]).unwrap();
    let (runtime, probe) = runtime_with_audio(&root);
    runtime.notify_interaction();

    runtime
        .load_script(
            r##"
            assets.load_sound("hit", "hit.ogg")
            canvas.set_master_volume(0.5)
            canvas.play_sound("hit", 0.5)
            -- Unknown names are a quiet no-op
            canvas.play_sound("ghost")
            "##,
            "master.lua",
        )
        .unwrap();

    let started = probe.started.borrow();
    assert_eq!(started.len(), 1);
    assert!((started[0].gain - 0.25).abs() < 1e-9);
}
