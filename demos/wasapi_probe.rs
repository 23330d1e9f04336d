//! Lists WASAPI playback/capture endpoints and round-trips a short playback
//! session against the default render endpoint. A client of the library,
//! same as the out-of-scope HRTF/3D demo (spec.md §1) — not part of the
//! backend itself.

#[cfg(target_os = "windows")]
fn main() {
    simple_logger::SimpleLogger::new().init().unwrap();

    aural_wasapi::wasapi::init();

    let playback_list = aural_wasapi::wasapi::probe(aural_wasapi::Flow::Render).unwrap_or_default();
    println!("playback devices:");
    for name in playback_list.split('\0').filter(|n| !n.is_empty()) {
        println!("  {name}");
    }

    let capture_list = aural_wasapi::wasapi::probe(aural_wasapi::Flow::Capture).unwrap_or_default();
    println!("capture devices:");
    for name in capture_list.split('\0').filter(|n| !n.is_empty()) {
        println!("  {name}");
    }

    let mixer = std::sync::Arc::new(SineMixer::new(440.0, 0.1));
    let mut playback = aural_wasapi::wasapi::create_playback_backend(
        mixer,
        aural_wasapi::ChannelConfig::Stereo,
        aural_wasapi::SampleType::Float32,
        48_000,
    );

    {
        use aural_wasapi::Backend;
        if playback.open(None).is_ok() {
            let status = playback.reset();
            if status.is_ok() && playback.start() {
                println!("playing a 440 Hz tone for one second...");
                std::thread::sleep(std::time::Duration::from_secs(1));
            } else {
                println!("could not start the default render endpoint: {status:?}");
            }
            playback.stop();
            playback.destroy();
        } else {
            println!("could not open the default render endpoint");
        }
    }

    aural_wasapi::wasapi::deinit();
}

#[cfg(not(target_os = "windows"))]
fn main() {
    eprintln!("wasapi_probe only runs on Windows");
}

/// `lock`/`unlock` take explicit turns rather than returning a guard, so a
/// plain spinning flag stands in for the device lock here (the real mixer
/// this backend drives in production owns a proper mutex).
#[cfg(target_os = "windows")]
struct SineMixer {
    phase: std::sync::atomic::AtomicU32,
    step_bits: u32,
    gain: f32,
    locked: std::sync::atomic::AtomicBool,
}

#[cfg(target_os = "windows")]
impl SineMixer {
    fn new(pitch_hz: f32, gain: f32) -> Self {
        let step = std::f32::consts::PI * 2.0 * pitch_hz / 48_000.0;
        SineMixer {
            phase: std::sync::atomic::AtomicU32::new(0),
            step_bits: step.to_bits(),
            gain,
            locked: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[cfg(target_os = "windows")]
impl aural_wasapi::Mixer for SineMixer {
    unsafe fn mix(&self, out_ptr: *mut u8, frames: u32) {
        let step = f32::from_bits(self.step_bits);
        let mut phase = f32::from_bits(self.phase.load(std::sync::atomic::Ordering::Relaxed));
        let out = std::slice::from_raw_parts_mut(out_ptr as *mut f32, frames as usize * 2);
        for frame in 0..frames as usize {
            let sample = phase.sin() * self.gain;
            out[frame * 2] = sample;
            out[frame * 2 + 1] = sample;
            phase += step;
            if phase >= std::f32::consts::PI * 2.0 {
                phase -= std::f32::consts::PI * 2.0;
            }
        }
        self.phase.store(phase.to_bits(), std::sync::atomic::Ordering::Relaxed);
    }

    fn handle_disconnect(&self, reason: aural_wasapi::DisconnectReason) {
        eprintln!("render endpoint disconnected: {reason}");
    }

    fn device_clock_ns(&self) -> u64 {
        0
    }

    fn lock(&self) {
        while self.locked.swap(true, std::sync::atomic::Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.locked.store(false, std::sync::atomic::Ordering::Release);
    }
}
