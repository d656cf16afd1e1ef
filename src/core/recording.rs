use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::core::turn::{Attachment, AttachmentKind};

pub const RECORDING_MIME_TYPE: &str = "audio/mp3";

#[derive(Debug)]
pub enum RecorderError {
    /// Microphone access was denied; surfaced to the user as a blocking
    /// notice, the transcript is untouched.
    PermissionDenied(String),
    /// No capture in progress, or the device went away mid-recording.
    Unavailable(String),
}

impl std::fmt::Display for RecorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderError::PermissionDenied(detail) => {
                write!(f, "microphone access denied: {detail}")
            }
            RecorderError::Unavailable(detail) => write!(f, "recording unavailable: {detail}"),
        }
    }
}

impl std::error::Error for RecorderError {}

/// Seam for the platform audio capture device.
#[async_trait]
pub trait MicSource: Send {
    /// Acquire the device and begin capturing.
    async fn acquire(&mut self) -> Result<(), RecorderError>;

    /// Stop capturing and hand back the recorded bytes.
    async fn finish(&mut self) -> Result<Vec<u8>, RecorderError>;
}

/// Drives one audio recording: acquires the mic, runs a 1 Hz duration
/// clock while capture is live, and packages the result as an audio
/// attachment. The clock task is aborted on every exit path, including
/// capture failure and drop.
pub struct Recorder<S: MicSource> {
    source: S,
    elapsed_secs: Arc<AtomicU64>,
    clock: Option<JoinHandle<()>>,
    recording: bool,
}

impl<S: MicSource> Recorder<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            elapsed_secs: Arc::new(AtomicU64::new(0)),
            clock: None,
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs.load(Ordering::Relaxed)
    }

    pub async fn start(&mut self) -> Result<(), RecorderError> {
        if self.recording {
            return Err(RecorderError::Unavailable(
                "a recording is already in progress".to_string(),
            ));
        }

        self.source.acquire().await?;

        self.elapsed_secs.store(0, Ordering::Relaxed);
        let elapsed = Arc::clone(&self.elapsed_secs);
        self.clock = Some(tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                interval.tick().await;
                elapsed.fetch_add(1, Ordering::Relaxed);
            }
        }));
        self.recording = true;
        Ok(())
    }

    /// Stop the capture and return the recording as an attachment whose
    /// preview names the elapsed duration.
    pub async fn stop(&mut self) -> Result<Attachment, RecorderError> {
        if !self.recording {
            return Err(RecorderError::Unavailable(
                "no recording in progress".to_string(),
            ));
        }

        // Clock first: it must not keep ticking even if finish() fails.
        self.stop_clock();
        self.recording = false;

        let bytes = self.source.finish().await?;
        let preview = format!("recording {}", format_duration(self.elapsed_secs()));
        Ok(Attachment::from_bytes(
            AttachmentKind::Audio,
            preview,
            &bytes,
            RECORDING_MIME_TYPE,
        ))
    }

    fn stop_clock(&mut self) {
        if let Some(handle) = self.clock.take() {
            handle.abort();
        }
    }
}

impl<S: MicSource> Drop for Recorder<S> {
    fn drop(&mut self) {
        self.stop_clock();
    }
}

/// `m:ss`, the way the recording indicator displays it.
pub fn format_duration(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMic {
        deny: bool,
        bytes: Vec<u8>,
    }

    impl FakeMic {
        fn granting(bytes: &[u8]) -> Self {
            Self {
                deny: false,
                bytes: bytes.to_vec(),
            }
        }

        fn denying() -> Self {
            Self {
                deny: true,
                bytes: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl MicSource for FakeMic {
        async fn acquire(&mut self) -> Result<(), RecorderError> {
            if self.deny {
                Err(RecorderError::PermissionDenied("not allowed".to_string()))
            } else {
                Ok(())
            }
        }

        async fn finish(&mut self) -> Result<Vec<u8>, RecorderError> {
            Ok(std::mem::take(&mut self.bytes))
        }
    }

    #[test]
    fn format_duration_pads_seconds() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(9), "0:09");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(659), "10:59");
    }

    #[tokio::test]
    async fn denied_permission_aborts_the_attempt() {
        let mut recorder = Recorder::new(FakeMic::denying());
        let result = recorder.start().await;
        assert!(matches!(result, Err(RecorderError::PermissionDenied(_))));
        assert!(!recorder.is_recording());
        assert!(recorder.clock.is_none(), "no clock without a capture");
    }

    #[tokio::test]
    async fn stop_yields_an_audio_attachment_and_kills_the_clock() {
        let mut recorder = Recorder::new(FakeMic::granting(b"waveform"));
        recorder.start().await.unwrap();
        assert!(recorder.is_recording());

        let attachment = recorder.stop().await.unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Audio);
        assert_eq!(attachment.mime_type, RECORDING_MIME_TYPE);
        assert!(attachment.data_uri.starts_with("data:audio/mp3;base64,"));
        assert!(attachment.preview.starts_with("recording "));
        assert!(!recorder.is_recording());
        assert!(recorder.clock.is_none(), "clock aborted on stop");
    }

    #[tokio::test]
    async fn stop_without_start_is_an_error() {
        let mut recorder = Recorder::new(FakeMic::granting(b""));
        assert!(matches!(
            recorder.stop().await,
            Err(RecorderError::Unavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn clock_counts_whole_seconds() {
        let mut recorder = Recorder::new(FakeMic::granting(b"waveform"));
        recorder.start().await.unwrap();
        assert_eq!(recorder.elapsed_secs(), 0);

        // Let the clock task register its interval under the paused clock
        // before advancing time.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(recorder.elapsed_secs(), 3);

        let attachment = recorder.stop().await.unwrap();
        assert_eq!(attachment.preview, "recording 0:03");
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut recorder = Recorder::new(FakeMic::granting(b""));
        recorder.start().await.unwrap();
        assert!(matches!(
            recorder.start().await,
            Err(RecorderError::Unavailable(_))
        ));
    }
}
