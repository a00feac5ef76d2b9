//! FFmpeg/FFprobe-backed decoder and encoder.
//!
//! Frames cross the process boundary as raw `rgb24` buffers: the decoder
//! reads them from ffmpeg's stdout and the encoder writes them to
//! ffmpeg's stdin. Both spawn with `kill_on_drop(true)` so abandoning a
//! reader or writer never leaves an ffmpeg process behind.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::media::{Frame, FrameReader, FrameWriter, MediaError, VideoDecoder, VideoEncoder, VideoInfo};

/// Cap on captured ffmpeg stderr (1 MiB).
const MAX_STDERR_BYTES: u64 = 1024 * 1024;

/// Bytes per pixel for `rgb24`.
const RGB_CHANNELS: usize = 3;

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub async fn probe_video(path: &Path) -> Result<FfprobeOutput, MediaError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(MediaError::VideoNotFound(path.to_path_buf()));
    }

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(MediaError::BinaryNotFound)?;

    if !output.status.success() {
        return Err(MediaError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| MediaError::ParseError(format!("{e}: {stdout}")))
}

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Parse the video duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    // Try format-level duration first.
    if let Some(secs) = probe.format.duration.as_deref().and_then(|d| d.parse::<f64>().ok()) {
        return secs;
    }
    first_video_stream(probe)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse the video framerate from ffprobe output.
///
/// The `r_frame_rate` field is a fraction like `"30/1"` or `"24000/1001"`.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    first_video_stream(probe)
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 {
        let num = parts[0].parse::<f64>().unwrap_or(0.0);
        let den = parts[1].parse::<f64>().unwrap_or(1.0);
        if den > 0.0 {
            return num / den;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Total frame count: `nb_frames` if present, else estimated from
/// duration × framerate. `None` when neither is available.
pub fn parse_total_frames(probe: &FfprobeOutput) -> Option<u64> {
    if let Some(n) = first_video_stream(probe)
        .and_then(|s| s.nb_frames.as_deref())
        .and_then(|nb| nb.parse::<u64>().ok())
        .filter(|n| *n > 0)
    {
        return Some(n);
    }
    let duration = parse_duration(probe);
    let fps = parse_framerate(probe);
    if duration > 0.0 && fps > 0.0 {
        return Some((duration * fps).round() as u64);
    }
    None
}

/// Find the first video stream's resolution.
pub fn parse_resolution(probe: &FfprobeOutput) -> (u32, u32) {
    first_video_stream(probe)
        .map(|s| (s.width.unwrap_or(0), s.height.unwrap_or(0)))
        .unwrap_or((0, 0))
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// `ffmpeg` reading `path` as input, with output options still to add.
///
/// Autorotation is disabled: frames are sized from the stream's coded
/// width and height, which rotation metadata would otherwise swap.
fn decode_command(path: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-v", "error", "-noautorotate", "-i"])
        .arg(path);
    cmd
}

/// [`VideoDecoder`] that shells out to `ffprobe`/`ffmpeg`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegDecoder;

impl FfmpegDecoder {
    pub fn new() -> Self {
        Self
    }

    async fn dimensions(&self, path: &Path) -> Result<(u32, u32), MediaError> {
        let info = self.probe(path).await?;
        if info.width == 0 || info.height == 0 {
            return Err(MediaError::ParseError(format!(
                "no video stream dimensions in {}",
                path.display()
            )));
        }
        Ok((info.width, info.height))
    }
}

#[async_trait]
impl VideoDecoder for FfmpegDecoder {
    async fn probe(&self, path: &Path) -> Result<VideoInfo, MediaError> {
        let probe = probe_video(path).await?;
        let (width, height) = parse_resolution(&probe);
        Ok(VideoInfo {
            width,
            height,
            fps: parse_framerate(&probe),
            frame_count: parse_total_frames(&probe),
        })
    }

    async fn frame_at(&self, path: &Path, index: u64) -> Result<Option<Frame>, MediaError> {
        let (width, height) = self.dimensions(path).await?;

        let output = decode_command(path)
            .args([
                "-vf",
                &format!("select=eq(n\\,{index})"),
                "-vsync",
                "0",
                "-frames:v",
                "1",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(MediaError::BinaryNotFound)?;

        if !output.status.success() {
            return Err(MediaError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let frame_size = frame_size(width, height)?;
        if output.stdout.len() < frame_size {
            return Ok(None);
        }
        let mut raw = output.stdout;
        raw.truncate(frame_size);
        Ok(Frame::from_raw(width, height, raw))
    }

    async fn frames(&self, path: &Path) -> Result<Box<dyn FrameReader>, MediaError> {
        let (width, height) = self.dimensions(path).await?;

        let mut child = decode_command(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MediaError::BinaryNotFound)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Io(std::io::Error::other("failed to capture ffmpeg stdout")))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move { read_capped(stderr).await });

        Ok(Box::new(FfmpegFrameReader {
            child,
            stdout,
            stderr_task: Some(stderr_task),
            width,
            height,
            frame_size: frame_size(width, height)?,
            frames_read: 0,
            done: false,
        }))
    }
}

/// Sequential raw-frame reader over an ffmpeg child process.
struct FfmpegFrameReader {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    width: u32,
    height: u32,
    frame_size: usize,
    frames_read: u64,
    done: bool,
}

impl FfmpegFrameReader {
    /// Reap the child once stdout is exhausted.
    async fn finish_process(&mut self) -> Result<(), MediaError> {
        let status = self.child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let stderr = match self.stderr_task.take() {
            Some(task) => String::from_utf8_lossy(&task.await.unwrap_or_default()).into_owned(),
            None => String::new(),
        };
        if self.frames_read == 0 {
            return Err(MediaError::ExecutionFailed {
                exit_code: status.code(),
                stderr,
            });
        }
        // Truncated streams still yield their decodable prefix.
        tracing::warn!(
            exit_code = ?status.code(),
            frames_read = self.frames_read,
            stderr = %stderr,
            "ffmpeg exited with an error after decoding some frames",
        );
        Ok(())
    }
}

#[async_trait]
impl FrameReader for FfmpegFrameReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        if self.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_size];
        let filled = read_full(&mut self.stdout, &mut buf).await?;
        if filled < self.frame_size {
            self.done = true;
            self.finish_process().await?;
            return Ok(None);
        }

        self.frames_read += 1;
        Frame::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| MediaError::ParseError("raw frame buffer has the wrong size".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// [`VideoEncoder`] that pipes raw frames into `ffmpeg` and encodes
/// H.264/yuv420p without audio.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    pub preset: String,
    pub crf: u8,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self {
            preset: "medium".to_string(),
            crf: 18,
        }
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn create(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Box<dyn FrameWriter>, MediaError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s:v", &format!("{width}x{height}")])
            .args(["-r", &format!("{fps}")])
            .args(["-i", "-", "-an"])
            // yuv420p needs even dimensions.
            .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
            .args(["-c:v", "libx264", "-preset", &self.preset])
            .args(["-crf", &self.crf.to_string()])
            .args(["-pix_fmt", "yuv420p", "-movflags", "+faststart"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MediaError::BinaryNotFound)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Io(std::io::Error::other("failed to capture ffmpeg stdin")))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move { read_capped(stderr).await });

        Ok(Box::new(FfmpegFrameWriter {
            child,
            stdin: Some(stdin),
            stderr_task,
            width,
            height,
        }))
    }
}

struct FfmpegFrameWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: JoinHandle<Vec<u8>>,
    width: u32,
    height: u32,
}

#[async_trait]
impl FrameWriter for FfmpegFrameWriter {
    async fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        if frame.dimensions() != (self.width, self.height) {
            let (w, h) = frame.dimensions();
            return Err(MediaError::InvalidInput(format!(
                "frame is {w}x{h}, encoder expects {}x{}",
                self.width, self.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::Io(std::io::Error::other("ffmpeg stdin already closed")))?;
        stdin.write_all(frame.as_raw()).await?;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), MediaError> {
        let mut this = *self;
        if let Some(mut stdin) = this.stdin.take() {
            stdin.flush().await?;
            drop(stdin);
        }

        let status = this.child.wait().await?;
        if !status.success() {
            let stderr = this.stderr_task.await.unwrap_or_default();
            return Err(MediaError::ExecutionFailed {
                exit_code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

fn frame_size(width: u32, height: u32) -> Result<usize, MediaError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| MediaError::InvalidInput(format!("frame size overflow for {width}x{height}")))
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize, MediaError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read an entire stream into a byte buffer, capped at [`MAX_STDERR_BYTES`].
async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h).take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}
