// Audio output seam - the engine drives this trait, rodio sits behind it

use tracing::debug;

use super::TrackRef;
use crate::error::PlaybackError;

/// Assumed length when a track's stored duration is missing or garbage.
const FALLBACK_TRACK_SECONDS: f64 = 180.0;

/// What the engine needs from an audio backend. One track at a time;
/// `open` replaces whatever was playing.
pub trait AudioOutput: Send {
    /// Load a track and start it at the given volume and speed.
    fn open(&mut self, track: &TrackRef, volume: f32, speed: f32) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn set_speed(&mut self, speed: f32);
    /// True once the opened track has played out.
    fn is_finished(&self) -> bool;
}

#[cfg(feature = "audio")]
pub use rodio_output::RodioOutput;

#[cfg(feature = "audio")]
mod rodio_output {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};

    use super::{AudioOutput, PlaybackError, TrackRef};

    enum Command {
        Open {
            path: PathBuf,
            volume: f32,
            speed: f32,
            done: mpsc::Sender<Result<(), String>>,
        },
        Pause,
        Resume,
        Stop,
        SetVolume(f32),
        SetSpeed(f32),
        Shutdown,
    }

    /// Speaker-backed output. rodio's `OutputStream` is not `Send`, so a
    /// dedicated thread owns the device and we talk to it over a channel.
    pub struct RodioOutput {
        commands: mpsc::Sender<Command>,
        finished: Arc<AtomicBool>,
    }

    impl RodioOutput {
        pub fn new() -> Result<Self, PlaybackError> {
            let (commands, command_rx) = mpsc::channel();
            let (ready_tx, ready_rx) = mpsc::channel();
            let finished = Arc::new(AtomicBool::new(false));
            let worker_finished = finished.clone();

            thread::Builder::new()
                .name("daybell-audio".into())
                .spawn(move || worker(command_rx, ready_tx, worker_finished))
                .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => Ok(Self { commands, finished }),
                Ok(Err(e)) => Err(PlaybackError::OutputUnavailable(e)),
                Err(_) => Err(PlaybackError::OutputUnavailable(
                    "audio thread died during startup".into(),
                )),
            }
        }
    }

    impl AudioOutput for RodioOutput {
        fn open(&mut self, track: &TrackRef, volume: f32, speed: f32) -> Result<(), PlaybackError> {
            let (done, done_rx) = mpsc::channel();
            self.commands
                .send(Command::Open {
                    path: track.path.clone(),
                    volume,
                    speed,
                    done,
                })
                .map_err(|_| PlaybackError::OutputUnavailable("audio thread gone".into()))?;

            match done_rx.recv() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(PlaybackError::TrackOpen {
                    name: track.name.clone(),
                    reason,
                }),
                Err(_) => Err(PlaybackError::OutputUnavailable("audio thread gone".into())),
            }
        }

        fn pause(&mut self) {
            let _ = self.commands.send(Command::Pause);
        }

        fn resume(&mut self) {
            let _ = self.commands.send(Command::Resume);
        }

        fn stop(&mut self) {
            let _ = self.commands.send(Command::Stop);
        }

        fn set_volume(&mut self, volume: f32) {
            let _ = self.commands.send(Command::SetVolume(volume));
        }

        fn set_speed(&mut self, speed: f32) {
            let _ = self.commands.send(Command::SetSpeed(speed));
        }

        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::Relaxed)
        }
    }

    impl Drop for RodioOutput {
        fn drop(&mut self) {
            let _ = self.commands.send(Command::Shutdown);
        }
    }

    fn worker(
        commands: mpsc::Receiver<Command>,
        ready: mpsc::Sender<Result<(), String>>,
        finished: Arc<AtomicBool>,
    ) {
        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };
        // the stream must stay alive as long as anything plays
        let _stream = stream;
        let _ = ready.send(Ok(()));

        let mut sink: Option<Sink> = None;
        loop {
            match commands.recv_timeout(Duration::from_millis(100)) {
                Ok(Command::Open {
                    path,
                    volume,
                    speed,
                    done,
                }) => {
                    if let Some(old) = sink.take() {
                        old.stop();
                    }
                    match open_sink(&handle, &path, volume, speed) {
                        Ok(new_sink) => {
                            sink = Some(new_sink);
                            finished.store(false, Ordering::Relaxed);
                            let _ = done.send(Ok(()));
                        }
                        Err(reason) => {
                            finished.store(false, Ordering::Relaxed);
                            let _ = done.send(Err(reason));
                        }
                    }
                }
                Ok(Command::Pause) => {
                    if let Some(s) = sink.as_ref() {
                        s.pause();
                    }
                }
                Ok(Command::Resume) => {
                    if let Some(s) = sink.as_ref() {
                        s.play();
                    }
                }
                Ok(Command::Stop) => {
                    if let Some(s) = sink.take() {
                        s.stop();
                    }
                    finished.store(false, Ordering::Relaxed);
                }
                Ok(Command::SetVolume(v)) => {
                    if let Some(s) = sink.as_ref() {
                        s.set_volume(v);
                    }
                }
                Ok(Command::SetSpeed(v)) => {
                    if let Some(s) = sink.as_ref() {
                        s.set_speed(v);
                    }
                }
                Ok(Command::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    let done = sink.as_ref().map(|s| s.empty()).unwrap_or(false);
                    finished.store(done, Ordering::Relaxed);
                }
            }
        }
    }

    fn open_sink(
        handle: &OutputStreamHandle,
        path: &Path,
        volume: f32,
        speed: f32,
    ) -> Result<Sink, String> {
        let file = std::fs::File::open(path).map_err(|e| format!("failed to open file: {e}"))?;
        let source = Decoder::new(std::io::BufReader::new(file))
            .map_err(|e| format!("unsupported audio format or corrupted file: {e}"))?;
        let sink = Sink::try_new(handle).map_err(|e| e.to_string())?;
        sink.set_volume(volume);
        sink.set_speed(speed);
        sink.append(source);
        Ok(sink)
    }
}

/// No-speaker output for headless builds and dry runs. Pretends each track
/// plays for its stored duration on the wall clock.
#[derive(Debug, Default)]
pub struct SilentOutput {
    deadline: Option<std::time::Instant>,
    remaining: Option<std::time::Duration>,
}

impl SilentOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for SilentOutput {
    fn open(&mut self, track: &TrackRef, _volume: f32, _speed: f32) -> Result<(), PlaybackError> {
        let secs = track.duration_seconds;
        let secs = if secs.is_finite() && secs > 0.0 {
            secs
        } else {
            FALLBACK_TRACK_SECONDS
        };
        let length = std::time::Duration::try_from_secs_f64(secs)
            .unwrap_or_else(|_| std::time::Duration::from_secs_f64(FALLBACK_TRACK_SECONDS));
        self.deadline = Some(std::time::Instant::now() + length);
        self.remaining = None;
        debug!("Silent output pretending to play '{}' for {:.0}s", track.name, secs);
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            self.remaining = Some(deadline.saturating_duration_since(std::time::Instant::now()));
        }
    }

    fn resume(&mut self) {
        if let Some(remaining) = self.remaining.take() {
            self.deadline = Some(std::time::Instant::now() + remaining);
        }
    }

    fn stop(&mut self) {
        self.deadline = None;
        self.remaining = None;
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn set_speed(&mut self, _speed: f32) {}

    fn is_finished(&self) -> bool {
        self.deadline
            .map(|d| std::time::Instant::now() >= d)
            .unwrap_or(false)
    }
}
