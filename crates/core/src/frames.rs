//! Last-frame extraction and aspect-ratio normalisation.
//!
//! The last frame of a rendered segment becomes the source image of the
//! next one. Container-reported frame counts are unreliable for some
//! outputs, so a direct seek to the final index is only an optimisation.
//! It is trusted only when the index after it is empty; otherwise the
//! whole stream is decoded sequentially and the last frame seen wins.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};

use crate::media::{Frame, MediaError, VideoDecoder};
use crate::resolution::{select_target_size, TargetSize};

/// Decode the last frame of `video`.
pub async fn read_last_frame(decoder: &dyn VideoDecoder, video: &Path) -> Result<Frame, MediaError> {
    let info = decoder.probe(video).await?;

    if let Some(count) = info.frame_count.filter(|n| *n > 0) {
        match decoder.frame_at(video, count - 1).await {
            Ok(Some(frame)) => match decoder.frame_at(video, count).await {
                Ok(None) => return Ok(frame),
                Ok(Some(_)) => {
                    tracing::debug!(
                        video = %video.display(),
                        reported_frames = count,
                        "Frames continue past the reported count, decoding sequentially",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        video = %video.display(),
                        error = %e,
                        "Could not confirm final frame, decoding sequentially",
                    );
                }
            },
            Ok(None) => {
                tracing::debug!(
                    video = %video.display(),
                    reported_frames = count,
                    "Direct seek yielded no frame, decoding sequentially",
                );
            }
            Err(e) => {
                tracing::warn!(
                    video = %video.display(),
                    error = %e,
                    "Direct seek failed, decoding sequentially",
                );
            }
        }
    }

    let mut reader = decoder.frames(video).await?;
    let mut last = None;
    while let Some(frame) = reader.next_frame().await? {
        last = Some(frame);
    }
    last.ok_or_else(|| MediaError::NoFrame(video.to_path_buf()))
}

/// Write the last frame of `video` to `output` (format from extension).
pub async fn extract_last_frame(
    decoder: &dyn VideoDecoder,
    video: &Path,
    output: &Path,
) -> Result<PathBuf, MediaError> {
    let frame = read_last_frame(decoder, video).await?;
    save_frame(frame, output).await
}

/// Like [`extract_last_frame`], but crop and resize the frame to the
/// render size matching the video's own orientation.
pub async fn extract_last_frame_fitted(
    decoder: &dyn VideoDecoder,
    video: &Path,
    output: &Path,
) -> Result<(PathBuf, TargetSize), MediaError> {
    let frame = read_last_frame(decoder, video).await?;
    let (width, height) = frame.dimensions();
    let target = select_target_size(width, height);
    let fitted = fit_to_aspect(&frame, target);
    let path = save_frame(fitted, output).await?;
    Ok((path, target))
}

/// Center-crop the longer axis to `target`'s aspect ratio, then resize.
/// The image is never stretched.
pub fn fit_to_aspect(frame: &Frame, target: TargetSize) -> Frame {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 || target.width == 0 || target.height == 0 {
        return frame.clone();
    }

    let target_aspect = target.aspect_ratio();
    let aspect = w as f64 / h as f64;

    let (x, y, crop_w, crop_h) = if aspect > target_aspect {
        // Wider than target: trim the sides.
        let new_w = ((h as f64 * target_aspect) as u32).clamp(1, w);
        ((w - new_w) / 2, 0, new_w, h)
    } else {
        // Taller than target: trim top and bottom.
        let new_h = ((w as f64 / target_aspect) as u32).clamp(1, h);
        (0, (h - new_h) / 2, w, new_h)
    };

    let cropped = imageops::crop_imm(frame, x, y, crop_w, crop_h).to_image();
    if cropped.dimensions() == (target.width, target.height) {
        return cropped;
    }
    imageops::resize(&cropped, target.width, target.height, FilterType::Triangle)
}

/// Encode `frame` to `output`, creating the parent directory if needed.
pub async fn save_frame(frame: Frame, output: &Path) -> Result<PathBuf, MediaError> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let path = output.to_path_buf();
    let target = path.clone();
    tokio::task::spawn_blocking(move || frame.save(&target))
        .await
        .map_err(|e| MediaError::Io(std::io::Error::other(e)))??;
    Ok(path)
}

/// Read an image's pixel dimensions from its header.
pub async fn image_dimensions(path: &Path) -> Result<(u32, u32), MediaError> {
    let target = path.to_path_buf();
    let dims = tokio::task::spawn_blocking(move || image::image_dimensions(&target))
        .await
        .map_err(|e| MediaError::Io(std::io::Error::other(e)))??;
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::media::test_helpers::{solid, FakeDecoder, FakeVideo, SeekBehavior};
    use crate::resolution::{DEFAULT_HORIZONTAL_SIZE, DEFAULT_VERTICAL_SIZE};

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    /// Ten grey frames followed by the last three tagged red, green, blue.
    fn tagged_video() -> FakeVideo {
        let mut frames: Vec<Frame> = (0..10).map(|_| solid(8, 4, [128, 128, 128])).collect();
        frames.push(solid(8, 4, RED));
        frames.push(solid(8, 4, GREEN));
        frames.push(solid(8, 4, BLUE));
        FakeVideo::new(frames)
    }

    fn colour_of(frame: &Frame) -> [u8; 3] {
        frame.get_pixel(0, 0).0
    }

    #[tokio::test]
    async fn direct_seek_returns_final_frame() {
        let decoder = FakeDecoder::new(SeekBehavior::Exact).with_video("/v.mp4", tagged_video());
        let frame = read_last_frame(&decoder, Path::new("/v.mp4")).await.unwrap();
        assert_eq!(colour_of(&frame), BLUE);
        // One seek to the final index, one past it to confirm the end.
        assert_eq!(decoder.seeks(), 2);
        assert_eq!(decoder.opens(), 0);
    }

    #[tokio::test]
    async fn empty_seek_falls_back_to_sequential_decode() {
        let decoder = FakeDecoder::new(SeekBehavior::NoFrame).with_video("/v.mp4", tagged_video());
        let frame = read_last_frame(&decoder, Path::new("/v.mp4")).await.unwrap();
        assert_eq!(colour_of(&frame), BLUE);
        assert_eq!(decoder.seeks(), 1);
        assert_eq!(decoder.opens(), 1);
    }

    #[tokio::test]
    async fn failing_seek_falls_back_to_sequential_decode() {
        let decoder = FakeDecoder::new(SeekBehavior::Fails).with_video("/v.mp4", tagged_video());
        let frame = read_last_frame(&decoder, Path::new("/v.mp4")).await.unwrap();
        assert_eq!(colour_of(&frame), BLUE);
        assert_eq!(decoder.opens(), 1);
    }

    #[tokio::test]
    async fn unknown_frame_count_skips_seek() {
        let mut video = tagged_video();
        video.reported_count = None;
        let decoder = FakeDecoder::new(SeekBehavior::Exact).with_video("/v.mp4", video);
        let frame = read_last_frame(&decoder, Path::new("/v.mp4")).await.unwrap();
        assert_eq!(colour_of(&frame), BLUE);
        assert_eq!(decoder.seeks(), 0);
    }

    #[tokio::test]
    async fn overstated_frame_count_still_finds_last_frame() {
        let mut video = tagged_video();
        video.reported_count = Some(500);
        let decoder = FakeDecoder::new(SeekBehavior::Exact).with_video("/v.mp4", video);
        let frame = read_last_frame(&decoder, Path::new("/v.mp4")).await.unwrap();
        assert_eq!(colour_of(&frame), BLUE);
    }

    #[tokio::test]
    async fn understated_frame_count_still_finds_last_frame() {
        let mut video = tagged_video();
        video.reported_count = Some(12);
        let decoder = FakeDecoder::new(SeekBehavior::Exact).with_video("/v.mp4", video);
        let frame = read_last_frame(&decoder, Path::new("/v.mp4")).await.unwrap();
        assert_eq!(colour_of(&frame), BLUE);
        assert_eq!(decoder.opens(), 1);
    }

    #[tokio::test]
    async fn no_frames_is_no_frame_error() {
        let decoder =
            FakeDecoder::new(SeekBehavior::NoFrame).with_video("/empty.mp4", FakeVideo::new(vec![]));
        assert_matches!(
            read_last_frame(&decoder, Path::new("/empty.mp4")).await,
            Err(MediaError::NoFrame(_))
        );
    }

    #[tokio::test]
    async fn extract_writes_png_to_output() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let output = dir.path().join("nested").join("last.png");
        let decoder = FakeDecoder::new(SeekBehavior::NoFrame).with_video("/v.mp4", tagged_video());

        let written = extract_last_frame(&decoder, Path::new("/v.mp4"), &output)
            .await
            .unwrap();

        assert_eq!(written, output);
        let decoded = image::open(&output).expect("open written frame").to_rgb8();
        assert_eq!(decoded.dimensions(), (8, 4));
        assert_eq!(decoded.get_pixel(0, 0).0, BLUE);
        assert_eq!(image_dimensions(&output).await.unwrap(), (8, 4));
    }

    #[tokio::test]
    async fn fitted_extract_uses_video_orientation() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let output = dir.path().join("fit.png");
        let decoder = FakeDecoder::new(SeekBehavior::Exact)
            .with_video("/tall.mp4", FakeVideo::new(vec![solid(90, 200, GREEN)]));

        let (path, target) = extract_last_frame_fitted(&decoder, Path::new("/tall.mp4"), &output)
            .await
            .unwrap();

        assert_eq!(target, DEFAULT_VERTICAL_SIZE);
        assert_eq!(image_dimensions(&path).await.unwrap(), (720, 1280));
    }

    #[test]
    fn fit_crops_wide_frame_horizontally_without_stretching() {
        // 400x100 is wider than 16:9; the sides are trimmed to 177x100.
        let mut frame = solid(400, 100, RED);
        for y in 0..100 {
            for x in 100..300 {
                frame.put_pixel(x, y, image::Rgb(BLUE));
            }
        }
        let fitted = fit_to_aspect(&frame, TargetSize::new(16, 9));
        assert_eq!(fitted.dimensions(), (16, 9));
        // The centre survived, the red edges were cropped away.
        assert_eq!(fitted.get_pixel(8, 4).0, BLUE);
        assert_eq!(fitted.get_pixel(1, 4).0, BLUE);
    }

    #[test]
    fn fit_crops_tall_frame_vertically() {
        let mut frame = solid(100, 400, RED);
        for y in 150..250 {
            for x in 0..100 {
                frame.put_pixel(x, y, image::Rgb(GREEN));
            }
        }
        // Square target keeps the middle 100x100.
        let fitted = fit_to_aspect(&frame, TargetSize::new(10, 10));
        assert_eq!(fitted.dimensions(), (10, 10));
        assert_eq!(fitted.get_pixel(5, 5).0, GREEN);
        assert_eq!(fitted.get_pixel(5, 0).0, GREEN);
    }

    #[test]
    fn fit_matching_aspect_only_resizes() {
        let frame = solid(1920, 1080, RED);
        let fitted = fit_to_aspect(&frame, DEFAULT_HORIZONTAL_SIZE);
        assert_eq!(fitted.dimensions(), (1280, 720));
    }
}
