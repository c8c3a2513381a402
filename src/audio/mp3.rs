//! MPEG audio frame walking and concatenation.
//!
//! Inputs are joined at the frame level: ID3 tags are dropped and a leading
//! Xing/Info/VBRI frame (which describes the whole original file and would
//! confuse players about the merged length) is skipped on every input.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const BITRATES_V1_L1: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const BITRATES_V1_L2: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L1: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATES_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Version {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    I,
    II,
    III,
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    version: Version,
    layer: Layer,
    mono: bool,
    length: usize,
}

impl FrameHeader {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return None;
        }
        let version = match (bytes[1] >> 3) & 0x03 {
            0b00 => Version::Mpeg25,
            0b10 => Version::Mpeg2,
            0b11 => Version::Mpeg1,
            _ => return None,
        };
        let layer = match (bytes[1] >> 1) & 0x03 {
            0b01 => Layer::III,
            0b10 => Layer::II,
            0b11 => Layer::I,
            _ => return None,
        };
        let bitrate_index = usize::from(bytes[2] >> 4);
        let rate_index = usize::from((bytes[2] >> 2) & 0x03);
        // Free-format (0) and bad (15) bitrates cannot be walked.
        if bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
            return None;
        }
        let padding = u32::from((bytes[2] >> 1) & 0x01);
        let mono = (bytes[3] >> 6) == 0b11;

        let bitrate = 1000
            * match (version, layer) {
                (Version::Mpeg1, Layer::I) => BITRATES_V1_L1[bitrate_index],
                (Version::Mpeg1, Layer::II) => BITRATES_V1_L2[bitrate_index],
                (Version::Mpeg1, Layer::III) => BITRATES_V1_L3[bitrate_index],
                (_, Layer::I) => BITRATES_V2_L1[bitrate_index],
                (_, _) => BITRATES_V2_L23[bitrate_index],
            };
        let sample_rate = match version {
            Version::Mpeg1 => [44100, 48000, 32000][rate_index],
            Version::Mpeg2 => [22050, 24000, 16000][rate_index],
            Version::Mpeg25 => [11025, 12000, 8000][rate_index],
        };

        let length = match layer {
            Layer::I => (12 * bitrate / sample_rate + padding) * 4,
            Layer::II => 144 * bitrate / sample_rate + padding,
            Layer::III if version == Version::Mpeg1 => 144 * bitrate / sample_rate + padding,
            Layer::III => 72 * bitrate / sample_rate + padding,
        } as usize;
        if length < 4 {
            return None;
        }

        Some(Self {
            version,
            layer,
            mono,
            length,
        })
    }

    /// Offset of a Xing/Info tag inside a Layer III frame.
    fn xing_offset(&self) -> usize {
        4 + match (self.version, self.mono) {
            (Version::Mpeg1, false) => 32,
            (Version::Mpeg1, true) => 17,
            (_, false) => 17,
            (_, true) => 9,
        }
    }
}

fn is_info_frame(header: &FrameHeader, frame: &[u8]) -> bool {
    header.layer == Layer::III
        && (tag_at(frame, header.xing_offset(), &[b"Xing", b"Info"]) || tag_at(frame, 36, &[b"VBRI"]))
}

fn tag_at(frame: &[u8], offset: usize, tags: &[&[u8; 4]]) -> bool {
    frame
        .get(offset..offset + 4)
        .map(|found| tags.iter().any(|tag| &tag[..] == found))
        .unwrap_or(false)
}

/// Byte length of a leading ID3v2 tag, footer included.
fn id3v2_len(data: &[u8]) -> usize {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return 0;
    }
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7F));
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    (10 + size + footer).min(data.len())
}

/// Audio frames of one MP3 buffer, without tags or a leading info frame.
pub fn audio_frames(data: &[u8]) -> Vec<&[u8]> {
    let mut end = data.len();
    if end >= 128 && &data[end - 128..end - 125] == b"TAG" {
        end -= 128;
    }

    let mut frames = Vec::new();
    let mut pos = id3v2_len(data);
    while pos + 4 <= end {
        match FrameHeader::parse(&data[pos..end]) {
            Some(header) if pos + header.length <= end => {
                let frame = &data[pos..pos + header.length];
                if !(frames.is_empty() && is_info_frame(&header, frame)) {
                    frames.push(frame);
                }
                pos += header.length;
            }
            _ => pos += 1,
        }
    }
    frames
}

/// Concatenate the frames of `inputs` into `out`. Returns bytes written.
pub fn merge_files(out: &Path, inputs: &[PathBuf]) -> Result<u64> {
    if inputs.is_empty() {
        return Err(AppError::Audio("nothing to merge".into()));
    }
    let out_canonical = fs::canonicalize(out).ok();
    for input in inputs {
        let same = input == out
            || out_canonical
                .as_ref()
                .map(|o| fs::canonicalize(input).ok().as_ref() == Some(o))
                .unwrap_or(false);
        if same {
            return Err(AppError::Audio(format!(
                "output {} is also an input",
                out.display()
            )));
        }
    }

    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(fs::File::create(out)?);
    let mut written = 0u64;
    for input in inputs {
        let data = fs::read(input)?;
        let frames = audio_frames(&data);
        if frames.is_empty() {
            return Err(AppError::Audio(format!(
                "no MPEG audio frames in {}",
                input.display()
            )));
        }
        for frame in frames {
            writer.write_all(frame)?;
            written += frame.len() as u64;
        }
    }
    writer.flush()?;
    Ok(written)
}

/// Async wrapper running [`merge_files`] on the blocking pool.
pub async fn merge_mp3(out: &Path, inputs: &[PathBuf]) -> Result<u64> {
    let out = out.to_path_buf();
    let inputs = inputs.to_vec();
    tokio::task::spawn_blocking(move || merge_files(&out, &inputs))
        .await
        .map_err(|e| AppError::Audio(format!("merge task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    // MPEG-1 Layer III, 128 kbps, 44.1 kHz, stereo, no padding: 417 bytes.
    const HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
    const FRAME_LEN: usize = 417;

    fn frame(fill: u8) -> Vec<u8> {
        let mut f = HEADER.to_vec();
        f.resize(FRAME_LEN, fill);
        f
    }

    fn xing_frame() -> Vec<u8> {
        let mut f = HEADER.to_vec();
        f.resize(FRAME_LEN, 0);
        f[36..40].copy_from_slice(b"Xing");
        f
    }

    fn id3v2(payload: usize) -> Vec<u8> {
        let mut tag = b"ID3\x04\x00\x00".to_vec();
        tag.extend_from_slice(&[0, 0, (payload >> 7) as u8 & 0x7F, payload as u8 & 0x7F]);
        tag.resize(10 + payload, 0);
        tag
    }

    #[test]
    fn parses_layer3_frame_length() {
        let header = FrameHeader::parse(&HEADER).unwrap();
        assert_eq!(header.length, FRAME_LEN);
        assert_eq!(header.layer, Layer::III);
        assert!(!header.mono);
    }

    #[test]
    fn skips_tags_and_info_frame() {
        let mut data = id3v2(200);
        data.extend(xing_frame());
        data.extend(frame(1));
        data.extend(frame(2));
        let mut v1 = b"TAG".to_vec();
        v1.resize(128, b' ');
        data.extend(v1);

        let frames = audio_frames(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][4], 1);
        assert_eq!(frames[1][4], 2);
    }

    #[test]
    fn resyncs_over_garbage() {
        let mut data = vec![0x00, 0x13, 0x37];
        data.extend(frame(7));
        assert_eq!(audio_frames(&data).len(), 1);
    }

    #[test]
    fn merges_inputs_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.mp3");
        let mut first = xing_frame();
        first.extend(frame(1));
        fs::write(&a, first).unwrap();
        let mut second = id3v2(20);
        second.extend(frame(2));
        second.extend(frame(3));
        fs::write(&b, second).unwrap();

        let out = dir.path().join("out").join("merged.mp3");
        let written = merge_files(&out, &[a, b]).unwrap();
        assert_eq!(written, 3 * FRAME_LEN as u64);

        let merged = fs::read(&out).unwrap();
        let frames = audio_frames(&merged);
        let fills: Vec<u8> = frames.iter().map(|f| f[4]).collect();
        assert_eq!(fills, vec![1, 2, 3]);
    }

    #[test]
    fn refuses_output_among_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        fs::write(&a, frame(1)).unwrap();
        let err = merge_files(&a, &[a.clone()]).unwrap_err();
        assert!(matches!(err, AppError::Audio(_)));
        assert_eq!(fs::read(&a).unwrap().len(), FRAME_LEN);
    }

    #[test]
    fn rejects_input_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp3");
        fs::write(&a, b"not audio at all").unwrap();
        let out = dir.path().join("out.mp3");
        assert!(merge_files(&out, &[a]).is_err());
    }
}
