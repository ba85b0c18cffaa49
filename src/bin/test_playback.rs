use daybell::playback::{AudioOutput, RodioOutput, TrackRef};
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    // Quick hardware check - no async, no scheduler, just the output seam
    println!("🔊 Playback Test Utility");
    println!("========================");

    let Some(file) = std::env::args().nth(1).map(PathBuf::from) else {
        println!("Usage: cargo run --bin test_playback <audio_file>");
        return Ok(());
    };

    if !file.exists() {
        println!("❌ File not found: {}", file.display());
        return Ok(());
    }

    let name = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_string());

    let track = TrackRef {
        id: 0,
        name,
        path: file,
        duration_seconds: 0.0,
    };

    let mut output = RodioOutput::new()?;

    println!("🎵 Playing '{}' at 20% volume", track.name);
    output.open(&track, 0.2, 1.0)?;
    sleep(Duration::from_secs(2));

    println!("🔊 Ramping volume up to 80%");
    for step in 1..=6 {
        output.set_volume(0.2 + 0.1 * step as f32);
        sleep(Duration::from_millis(300));
    }
    sleep(Duration::from_secs(2));

    println!("⏸️  Pausing for a second");
    output.pause();
    sleep(Duration::from_secs(1));

    println!("▶️  Resuming at 1.5x speed");
    output.resume();
    output.set_speed(1.5);
    sleep(Duration::from_secs(3));

    println!("⏹️  Stopping");
    output.stop();

    println!("✅ Done - if you heard audio, the device works");
    Ok(())
}
