//! External mux capability: combine a video-only and an audio-only file.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, ScrapeError};

/// Video codec used for the combined output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// Copy the video stream without re-encoding.
    Copy,
    /// Re-encode with libx264.
    #[default]
    H264,
    Custom(String),
}

impl VideoCodec {
    fn as_ffmpeg_args(&self) -> [String; 2] {
        let codec = match self {
            Self::Copy => "copy",
            Self::H264 => "libx264",
            Self::Custom(codec) => codec.as_str(),
        };
        ["-c:v".to_string(), codec.to_string()]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Copy,
    #[default]
    Aac,
    Custom(String),
}

impl AudioCodec {
    fn as_ffmpeg_args(&self) -> [String; 2] {
        let codec = match self {
            Self::Copy => "copy",
            Self::Aac => "aac",
            Self::Custom(codec) => codec.as_str(),
        };
        ["-c:a".to_string(), codec.to_string()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxConfig {
    /// ffmpeg binary. Defaults to `$FFMPEG_PATH`, then `ffmpeg` on `PATH`.
    pub ffmpeg_path: PathBuf,
    #[serde(default)]
    pub video_codec: VideoCodec,
    #[serde(default)]
    pub audio_codec: AudioCodec,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: std::env::var_os("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            video_codec: VideoCodec::default(),
            audio_codec: AudioCodec::default(),
        }
    }
}

/// Combines separate video and audio files into `output`.
///
/// Only success or failure is observable; the output must exist on success.
#[async_trait]
pub trait Muxer: Send + Sync {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegMuxer {
    config: MuxConfig,
}

impl FfmpegMuxer {
    pub fn new(config: MuxConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
        ];
        args.extend(self.config.video_codec.as_ffmpeg_args());
        args.extend(self.config.audio_codec.as_ffmpeg_args());
        args.push(output.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let start = Instant::now();
        let args = self.build_args(video, audio, output);
        debug!(ffmpeg = %self.config.ffmpeg_path.display(), ?args, "Running ffmpeg");

        let result = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ScrapeError::mux_failed(format!(
                    "failed to spawn {}: {e}",
                    self.config.ffmpeg_path.display()
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last_line = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("unknown ffmpeg error");
            return Err(ScrapeError::mux_failed(format!(
                "ffmpeg exited with code {}: {last_line}",
                result.status.code().unwrap_or(-1)
            )));
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(ScrapeError::mux_failed(format!(
                "ffmpeg reported success but {} is missing",
                output.display()
            )));
        }

        info!(
            output = %output.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Muxed video and audio"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_codecs_reencode() {
        let muxer = FfmpegMuxer::new(MuxConfig {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ..Default::default()
        });
        let args = muxer.build_args(
            Path::new("/tmp/v.mp4"),
            Path::new("/tmp/a.mp4"),
            Path::new("/tmp/out.mp4"),
        );
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-i /tmp/v.mp4 -i /tmp/a.mp4"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
    }

    #[test]
    fn copy_codecs() {
        let muxer = FfmpegMuxer::new(MuxConfig {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            video_codec: VideoCodec::Copy,
            audio_codec: AudioCodec::Copy,
        });
        let joined = muxer
            .build_args(Path::new("v"), Path::new("a"), Path::new("o"))
            .join(" ");
        assert!(joined.contains("-c:v copy -c:a copy"));
    }

    #[tokio::test]
    async fn missing_binary_is_mux_failure() {
        let muxer = FfmpegMuxer::new(MuxConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg-for-tests"),
            ..Default::default()
        });
        let err = muxer
            .mux(Path::new("v.mp4"), Path::new("a.mp4"), Path::new("o.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::MuxFailed { .. }));
    }
}
