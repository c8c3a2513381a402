use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{AppError, Result};

/// `atempo` filter for a speaking rate; ffmpeg accepts 0.5..=2.0 per stage.
pub fn tempo_filter(rate: f64) -> String {
    format!("atempo={:.2}", rate.clamp(0.5, 2.0))
}

/// Encode raw s16le mono PCM to MP3, applying the speaking rate.
pub async fn pcm_to_mp3(pcm: Vec<u8>, sample_rate: u32, rate: f64) -> Result<Vec<u8>> {
    let sample_rate = sample_rate.to_string();
    let filter = tempo_filter(rate);
    run(
        &[
            "-f", "s16le", "-ar", &sample_rate, "-ac", "1", "-i", "pipe:0", "-filter:a", &filter,
            "-f", "mp3", "pipe:1",
        ],
        pcm,
    )
    .await
}

pub async fn wav_to_mp3(wav: Vec<u8>) -> Result<Vec<u8>> {
    run(&["-f", "wav", "-i", "pipe:0", "-f", "mp3", "pipe:1"], wav).await
}

async fn run(args: &[&str], input: Vec<u8>) -> Result<Vec<u8>> {
    let mut child = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error"])
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::Audio(format!("failed to start ffmpeg: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Audio("ffmpeg stdin unavailable".into()))?;
    // Feed stdin concurrently so a full stdout pipe cannot deadlock us.
    let writer = tokio::spawn(async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    });

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(AppError::Audio(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    writer
        .await
        .map_err(|e| AppError::Audio(format!("ffmpeg writer failed: {e}")))??;

    if output.stdout.is_empty() {
        return Err(AppError::Audio("ffmpeg produced no output".into()));
    }
    Ok(output.stdout)
}
