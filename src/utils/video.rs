use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use opencv::core::{Mat, Size, Vector};
use opencv::imgcodecs::imwrite;
use opencv::prelude::*;
use opencv::videoio::VideoWriter;
use tracing::info;

use crate::error::Error as PipelineError;
use crate::utils::image::encode_image;

fn frame_size(frames: &[Mat]) -> Result<Size, Error> {
    let first = frames.first().ok_or(PipelineError::EmptyFrames)?;
    let expected = Size::new(first.cols(), first.rows());
    for (index, frame) in frames.iter().enumerate() {
        if frame.cols() != expected.width || frame.rows() != expected.height {
            return Err(PipelineError::FrameSizeMismatch {
                index,
                width: frame.cols(),
                height: frame.rows(),
                expected_width: expected.width,
                expected_height: expected.height,
            }.into());
        }
    }
    Ok(expected)
}

/// save_frames writes every frame as `frame_00000.<extension>` under `dir`.
///
/// # Arguments
/// * `frames` - frames in playback order
/// * `dir` - output directory, created when missing
/// * `extension` - image format, e.g. `png`
///
/// # Returns
/// * `Vec<PathBuf>` - written files, in frame order
pub fn save_frames<P: AsRef<Path>>(frames: &[Mat], dir: P, extension: &str) -> Result<Vec<PathBuf>, Error> {
    if frames.is_empty() {
        return Err(PipelineError::EmptyFrames.into());
    }
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("video - cannot create {}", dir.display()))?;

    let mut paths: Vec<PathBuf> = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("frame_{index:05}.{extension}"));
        let path_str = path.to_string_lossy();
        if !imwrite(&path_str, frame, &Vector::new())? {
            return Err(PipelineError::Unwritable(path_str.into_owned()).into());
        }
        paths.push(path);
    }
    info!(frames = paths.len(), dir = %dir.display(), "video - saved frames");
    Ok(paths)
}

/// to_video muxes the frames into one container at `frame_rate`.
///
/// # Arguments
/// * `frames` - equally sized BGR frames in playback order
/// * `frame_rate` - frames per second
/// * `path` - output file; its extension picks the container
/// * `fourcc` - four character codec code, e.g. `mp4v` or `MJPG`
///
/// # Returns
/// * `PathBuf` - the written file
pub fn to_video<P: AsRef<Path>>(frames: &[Mat], frame_rate: f64, path: P, fourcc: &str) -> Result<PathBuf, Error> {
    let size = frame_size(frames)?;
    if !(frame_rate > 0.0) {
        return Err(Error::msg(format!("video - invalid frame rate {frame_rate}")));
    }
    let codec: Vec<char> = fourcc.chars().collect();
    if codec.len() != 4 {
        return Err(Error::msg(format!("video - fourcc must be four characters, got {fourcc:?}")));
    }

    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("video - cannot create {}", parent.display()))?;
    }

    let path_str = path.to_string_lossy();
    let code = VideoWriter::fourcc(codec[0], codec[1], codec[2], codec[3])?;
    let mut writer = VideoWriter::new(&path_str, code, frame_rate, size, true)?;
    if !writer.is_opened()? {
        return Err(PipelineError::Unwritable(path_str.into_owned()).into());
    }
    for frame in frames {
        writer.write(frame)?;
    }
    writer.release()?;

    info!(frames = frames.len(), path = %path.display(), "video - wrote video");
    Ok(path.to_path_buf())
}

/// encode_frames encodes every frame in memory, e.g. for an HTTP response.
pub fn encode_frames(frames: &[Mat], extension: &str) -> Result<Vec<Vec<u8>>, Error> {
    if frames.is_empty() {
        return Err(PipelineError::EmptyFrames.into());
    }
    let ext = format!(".{}", extension.trim_start_matches('.'));
    frames.iter().map(|frame| encode_image(frame, &ext)).collect()
}
