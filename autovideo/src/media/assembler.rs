//! ffmpeg-backed assembler.
//!
//! The narration track is the timing authority: its duration is probed first,
//! every visual gets an equal slice of it, and the output is capped at exactly
//! that duration.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use super::command::run_command_with_logs;
use super::probe::probe_duration;
use crate::config::{Orientation, VideoSettings};
use crate::pipeline::traits::Assembler;
use crate::{Error, Result};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm", "mkv", "avi", "gif"];

fn is_video_asset(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Equal share of the audio per visual, rounded up to whole milliseconds so
/// the concatenated video never ends before the audio.
pub fn slice_duration(audio_secs: f64, asset_count: usize) -> f64 {
    let n = asset_count.max(1) as f64;
    (audio_secs / n * 1000.0).ceil() / 1000.0
}

/// Muxes visuals and narration with an external ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    ffmpeg_path: String,
    ffprobe_path: String,
    fps: u32,
    audio_codec: String,
}

impl FfmpegAssembler {
    pub fn new(settings: &VideoSettings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            ffprobe_path: settings.ffprobe_path.clone(),
            fps: settings.fps,
            audio_codec: settings.audio_codec.clone(),
        }
    }

    /// Full ffmpeg argument list for one mux.
    pub fn build_args(
        &self,
        assets: &[PathBuf],
        audio: &Path,
        audio_secs: f64,
        orientation: Orientation,
        output: &Path,
    ) -> Vec<OsString> {
        let (width, height) = orientation.resolution();
        let slice = format!("{:.3}", slice_duration(audio_secs, assets.len()));
        let fps = self.fps.to_string();

        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error"]
            .into_iter()
            .map(OsString::from)
            .collect();

        for asset in assets {
            if is_video_asset(asset) {
                args.extend(["-stream_loop", "-1"].map(OsString::from));
            } else {
                args.extend(["-loop", "1", "-framerate", fps.as_str()].map(OsString::from));
            }
            args.extend(["-t", slice.as_str(), "-i"].map(OsString::from));
            args.push(asset.as_os_str().to_owned());
        }
        args.push("-i".into());
        args.push(audio.as_os_str().to_owned());

        let mut filter = String::new();
        for i in 0..assets.len() {
            filter.push_str(&format!(
                "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
                 pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,\
                 fps={fps},format=yuv420p,trim=duration={slice},setpts=PTS-STARTPTS[v{i}];"
            ));
        }
        for i in 0..assets.len() {
            filter.push_str(&format!("[v{i}]"));
        }
        filter.push_str(&format!("concat=n={}:v=1:a=0[vout]", assets.len()));

        let audio_map = format!("{}:a:0", assets.len());
        let total = format!("{:.3}", audio_secs);

        args.extend(
            [
                "-filter_complex",
                filter.as_str(),
                "-map",
                "[vout]",
                "-map",
                audio_map.as_str(),
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p",
                "-r",
                fps.as_str(),
                "-c:a",
                self.audio_codec.as_str(),
                "-t",
                total.as_str(),
                "-movflags",
                "+faststart",
            ]
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Assembler for FfmpegAssembler {
    async fn mux(
        &self,
        assets: &[PathBuf],
        audio: &Path,
        orientation: Orientation,
        output: &Path,
    ) -> Result<PathBuf> {
        if assets.is_empty() {
            return Err(Error::Assembly("no visual assets to assemble".to_string()));
        }

        let audio_secs = probe_duration(&self.ffprobe_path, audio)
            .await
            .map_err(|e| Error::Assembly(format!("cannot measure narration: {}", e)))?;

        debug!(
            assets = assets.len(),
            audio_secs,
            slice_secs = slice_duration(audio_secs, assets.len()),
            "Assembling video"
        );

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(self.build_args(assets, audio, audio_secs, orientation, output));

        let result = run_command_with_logs(&mut cmd)
            .await
            .map_err(|e| Error::Assembly(e.to_string()))?;

        if !result.status.success() {
            return Err(Error::Assembly(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                result.stderr_tail(10)
            )));
        }

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(Error::Assembly(format!(
                "ffmpeg produced no output at {}",
                output.display()
            )));
        }

        info!(
            output = %output.display(),
            duration_secs = result.duration,
            "Video assembled"
        );
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> FfmpegAssembler {
        FfmpegAssembler::new(&VideoSettings::default())
    }

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn test_slice_duration_uses_audio_not_target() {
        assert_eq!(slice_duration(40.0, 8), 5.0);
        assert_eq!(slice_duration(10.0, 3), 3.334);
        assert!(slice_duration(10.0, 3) * 3.0 >= 10.0);
        assert_eq!(slice_duration(12.0, 0), 12.0);
    }

    #[test]
    fn test_args_cap_output_at_audio_duration() {
        let assets = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        let args = args_as_strings(&assembler().build_args(
            &assets,
            Path::new("voice.mp3"),
            37.25,
            Orientation::Landscape,
            Path::new("out.mp4"),
        ));

        // Per-input slices then the output cap.
        assert_eq!(value_after(&args, "-t"), vec!["18.625", "18.625", "37.250"]);
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert!(value_after(&args, "-map").contains(&"2:a:0"));
        assert_eq!(value_after(&args, "-c:a"), vec!["aac"]);
        assert_eq!(value_after(&args, "-r"), vec!["24"]);
    }

    #[test]
    fn test_filter_scales_to_orientation_preset() {
        let assets = vec![PathBuf::from("a.png")];
        let args = args_as_strings(&assembler().build_args(
            &assets,
            Path::new("voice.mp3"),
            10.0,
            Orientation::Portrait,
            Path::new("out.mp4"),
        ));
        let filter = value_after(&args, "-filter_complex")[0];

        assert!(filter.contains("scale=720:1280"));
        assert!(filter.contains("pad=720:1280"));
        assert!(filter.ends_with("[v0]concat=n=1:v=1:a=0[vout]"));
    }

    #[test]
    fn test_video_assets_are_looped_as_streams() {
        let assets = vec![PathBuf::from("clip.MP4"), PathBuf::from("still.png")];
        let args = args_as_strings(&assembler().build_args(
            &assets,
            Path::new("voice.mp3"),
            8.0,
            Orientation::Landscape,
            Path::new("out.mp4"),
        ));

        assert_eq!(value_after(&args, "-stream_loop"), vec!["-1"]);
        assert_eq!(value_after(&args, "-loop"), vec!["1"]);
    }

    #[tokio::test]
    async fn test_empty_assets_is_assembly_error() {
        let err = assembler()
            .mux(
                &[],
                Path::new("voice.mp3"),
                Orientation::Landscape,
                Path::new("out.mp4"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Assembly(_)));
    }

    /// Output duration matches the narration within one frame.
    #[tokio::test]
    #[ignore = "requires ffmpeg and ffprobe on PATH"]
    async fn test_output_duration_follows_audio() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("tone.m4a");
        let frame = dir.path().join("frame.png");

        let status = Command::new("ffmpeg")
            .args(["-y", "-f", "lavfi", "-i", "sine=frequency=440:duration=7.3"])
            .arg(&audio)
            .status()
            .await
            .unwrap();
        assert!(status.success());
        image::RgbImage::from_pixel(64, 64, image::Rgb([10, 20, 30]))
            .save(&frame)
            .unwrap();

        let assets = vec![frame.clone(), frame.clone(), frame];
        let output = dir.path().join("out.mp4");
        assembler()
            .mux(&assets, &audio, Orientation::Landscape, &output)
            .await
            .unwrap();

        let audio_secs = probe_duration("ffprobe", &audio).await.unwrap();
        let video_secs = probe_duration("ffprobe", &output).await.unwrap();
        assert!((video_secs - audio_secs).abs() <= 1.0 / 24.0 + 0.05);
    }
}
