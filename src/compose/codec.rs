use std::path::{Path, PathBuf};

use crate::foundation::{
    core::{Canvas, Fps, OutputFormat},
    error::CompositionError,
};

/// Video codec of every file handed to [`Codec::concat`].
pub const SEGMENT_CODEC: &str = "h264";
/// Pixel format of every file handed to [`Codec::concat`].
pub const SEGMENT_PIX_FMT: &str = "yuv420p";

/// Stream facts the composer needs to decide whether a source must be normalized.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct MediaInfo {
    pub canvas: Canvas,
    pub fps: Fps,
    pub duration_secs: Option<f64>,
    /// Codec name of the video stream as ffprobe reports it.
    pub codec: Option<String>,
    pub pix_fmt: Option<String>,
    pub has_audio: bool,
}

impl MediaInfo {
    /// `true` when the file can be joined as-is: right geometry and rate, the segment codec and
    /// pixel format, and no audio stream.
    pub fn is_segment_ready(&self, format: &OutputFormat) -> bool {
        format.conforms(self.canvas, self.fps)
            && self.codec.as_deref() == Some(SEGMENT_CODEC)
            && self.pix_fmt.as_deref() == Some(SEGMENT_PIX_FMT)
            && !self.has_audio
    }
}

/// Decode/encode backend used by the composer.
///
/// Calls block; the composer is driven from a blocking thread.
pub trait Codec: Send + Sync {
    /// Read the stream facts of the first video stream.
    fn probe(&self, path: &Path) -> Result<MediaInfo, CompositionError>;

    /// Re-encode `src` into a segment-ready `dst` at exactly `format`, keeping the aspect ratio
    /// (letterboxed).
    fn normalize(&self, src: &Path, dst: &Path, format: &OutputFormat)
    -> Result<(), CompositionError>;

    /// Decode `path` end to end. An error means the file cannot be joined.
    fn verify(&self, path: &Path) -> Result<(), CompositionError>;

    /// Concatenate `inputs` in order into a single video at `dst`.
    fn concat(
        &self,
        inputs: &[PathBuf],
        dst: &Path,
        format: &OutputFormat,
    ) -> Result<(), CompositionError>;
}

/// [`Codec`] backed by the system `ffmpeg` and `ffprobe` executables.
#[derive(Clone, Debug)]
pub struct FfmpegCodec {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegCodec {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegCodec {
    fn run_ffmpeg(&self, args: &[std::ffi::OsString], what: &str) -> Result<(), String> {
        let out = std::process::Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-nostdin", "-y", "-v", "error"])
            .args(args)
            .output()
            .map_err(|e| format!("failed to run ffmpeg for {what}: {e}"))?;
        if !out.status.success() {
            return Err(format!(
                "ffmpeg {what} exited with status {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(())
    }
}

impl Codec for FfmpegCodec {
    fn probe(&self, path: &Path) -> Result<MediaInfo, CompositionError> {
        let out = std::process::Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
            ])
            .arg(path)
            .output()
            .map_err(|e| CompositionError::decode_failure(format!("failed to run ffprobe: {e}")))?;
        if !out.status.success() {
            return Err(CompositionError::decode_failure(format!(
                "ffprobe failed for '{}': {}",
                path.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        parse_probe_json(&out.stdout)
    }

    fn normalize(
        &self,
        src: &Path,
        dst: &Path,
        format: &OutputFormat,
    ) -> Result<(), CompositionError> {
        // Lossless, so the final encode in `concat` is the only lossy pass.
        let args: Vec<std::ffi::OsString> = vec![
            "-i".into(),
            src.into(),
            "-an".into(),
            "-vf".into(),
            normalize_filter(format).into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "ultrafast".into(),
            "-qp".into(),
            "0".into(),
            "-pix_fmt".into(),
            SEGMENT_PIX_FMT.into(),
            "-f".into(),
            "mp4".into(),
            dst.into(),
        ];
        self.run_ffmpeg(&args, "normalize")
            .map_err(CompositionError::decode_failure)
    }

    fn verify(&self, path: &Path) -> Result<(), CompositionError> {
        let args: Vec<std::ffi::OsString> = vec![
            "-xerror".into(),
            "-i".into(),
            path.into(),
            "-map".into(),
            "0:v:0".into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ];
        self.run_ffmpeg(&args, "verify")
            .map_err(CompositionError::decode_failure)
    }

    fn concat(
        &self,
        inputs: &[PathBuf],
        dst: &Path,
        format: &OutputFormat,
    ) -> Result<(), CompositionError> {
        if inputs.is_empty() {
            return Err(CompositionError::no_input("nothing to concatenate"));
        }
        let list = dst.with_extension("concat.txt");
        std::fs::write(&list, concat_list(inputs)).map_err(|e| {
            CompositionError::write_failure(format!(
                "write concat list '{}': {e}",
                list.display()
            ))
        })?;

        let args: Vec<std::ffi::OsString> = vec![
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            list.clone().into(),
            "-an".into(),
            "-vf".into(),
            normalize_filter(format).into(),
            "-c:v".into(),
            "libx264".into(),
            "-pix_fmt".into(),
            SEGMENT_PIX_FMT.into(),
            "-movflags".into(),
            "+faststart".into(),
            "-f".into(),
            "mp4".into(),
            dst.into(),
        ];
        let res = self.run_ffmpeg(&args, "concat");
        let _ = std::fs::remove_file(&list);
        res.map_err(CompositionError::write_failure)
    }
}

/// `scale` + `pad` + `fps` chain producing exactly `format`, aspect ratio preserved.
pub fn normalize_filter(format: &OutputFormat) -> String {
    let Canvas { width, height } = format.canvas;
    format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={}",
        format.fps
    )
}

/// Concat-demuxer list file body. Single quotes in paths are escaped the way ffmpeg expects.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    let mut s = String::new();
    for p in inputs {
        let escaped = p.to_string_lossy().replace('\'', r"'\''");
        s.push_str(&format!("file '{escaped}'\n"));
    }
    s
}

/// Parse `ffprobe -print_format json -show_streams -show_format` output.
pub fn parse_probe_json(bytes: &[u8]) -> Result<MediaInfo, CompositionError> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        codec_name: Option<String>,
        pix_fmt: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        avg_frame_rate: Option<String>,
        r_frame_rate: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        #[serde(default)]
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let parsed: ProbeOut = serde_json::from_slice(bytes).map_err(|e| {
        CompositionError::decode_failure(format!("ffprobe json parse failed: {e}"))
    })?;
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| CompositionError::decode_failure("no video stream found"))?;
    let (Some(width), Some(height)) = (video.width, video.height) else {
        return Err(CompositionError::decode_failure(
            "missing video dimensions from ffprobe",
        ));
    };
    // `avg_frame_rate` is `0/0` for some containers; fall back to `r_frame_rate`.
    let fps = [video.avg_frame_rate.as_deref(), video.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|r| Fps::parse_ratio(r).ok())
        .ok_or_else(|| CompositionError::decode_failure("missing video frame rate from ffprobe"))?;
    let duration_secs = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok());

    Ok(MediaInfo {
        canvas: Canvas { width, height },
        fps,
        duration_secs,
        codec: video.codec_name.clone(),
        pix_fmt: video.pix_fmt.clone(),
        has_audio,
    })
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "../../tests/unit/compose/codec.rs"]
mod tests;
