//! The local audio device, shared by the whole process.

use std::sync::OnceLock;

use tokio::sync::Mutex;

use crate::error::{AppError, Result};

static SPEAKER: OnceLock<Speaker> = OnceLock::new();

/// One playback at a time. The output backend is created on first use.
pub struct Speaker {
    output: Mutex<Option<backend::Output>>,
}

impl Speaker {
    pub fn global() -> &'static Speaker {
        SPEAKER.get_or_init(|| Speaker {
            output: Mutex::new(None),
        })
    }

    /// Play MP3 bytes, returning when playback has finished.
    pub async fn play(&self, mp3: Vec<u8>) -> Result<()> {
        if mp3.is_empty() {
            return Err(AppError::Audio("nothing to play".into()));
        }
        let mut output = self.output.lock().await;
        if output.is_none() {
            *output = Some(backend::Output::open()?);
            tracing::debug!("speaker initialized");
        }
        match output.as_ref() {
            Some(out) => out.play(mp3).await,
            None => Err(AppError::Audio("speaker unavailable".into())),
        }
    }
}

#[cfg(feature = "speaker")]
mod backend {
    use std::io::Cursor;
    use std::sync::mpsc;

    use rodio::{Decoder, OutputStream, Sink};
    use tokio::sync::oneshot;

    use crate::error::{AppError, Result};

    type Request = (Vec<u8>, oneshot::Sender<Result<()>>);

    /// A rodio stream lives on its own thread because it is not `Send`.
    pub(super) struct Output {
        requests: mpsc::Sender<Request>,
    }

    impl Output {
        pub(super) fn open() -> Result<Self> {
            let (requests, incoming) = mpsc::channel::<Request>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

            std::thread::Builder::new()
                .name("quicknews-speaker".into())
                .spawn(move || {
                    let (_stream, handle) = match OutputStream::try_default() {
                        Ok(pair) => pair,
                        Err(e) => {
                            let _ = ready_tx.send(Err(AppError::Audio(format!(
                                "no audio output device: {e}"
                            ))));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    while let Ok((mp3, done)) = incoming.recv() {
                        let result = (|| {
                            let sink = Sink::try_new(&handle)
                                .map_err(|e| AppError::Audio(e.to_string()))?;
                            let source = Decoder::new(Cursor::new(mp3))
                                .map_err(|e| AppError::Audio(e.to_string()))?;
                            sink.append(source);
                            sink.sleep_until_end();
                            Ok(())
                        })();
                        let _ = done.send(result);
                    }
                })?;

            ready_rx
                .recv()
                .map_err(|_| AppError::Audio("speaker thread exited".into()))??;
            Ok(Self { requests })
        }

        pub(super) async fn play(&self, mp3: Vec<u8>) -> Result<()> {
            let (done, finished) = oneshot::channel();
            self.requests
                .send((mp3, done))
                .map_err(|_| AppError::Audio("speaker thread exited".into()))?;
            finished
                .await
                .map_err(|_| AppError::Audio("speaker thread exited".into()))?
        }
    }
}

#[cfg(not(feature = "speaker"))]
mod backend {
    use std::process::Stdio;

    use tokio::io::AsyncWriteExt;
    use tokio::process::Command;

    use crate::error::{AppError, Result};

    /// Playback through `ffplay` when built without the `speaker` feature.
    pub(super) struct Output;

    impl Output {
        pub(super) fn open() -> Result<Self> {
            Ok(Self)
        }

        pub(super) async fn play(&self, mp3: Vec<u8>) -> Result<()> {
            let mut child = Command::new("ffplay")
                .args(["-nodisp", "-autoexit", "-loglevel", "error", "-i", "pipe:0"])
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AppError::Audio(format!("failed to start ffplay: {e}")))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&mp3).await?;
                stdin.shutdown().await?;
            }
            let output = child.wait_with_output().await?;
            if !output.status.success() {
                return Err(AppError::Audio(format!(
                    "ffplay exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_is_a_single_instance() {
        assert!(std::ptr::eq(Speaker::global(), Speaker::global()));
    }

    #[tokio::test]
    async fn empty_buffer_is_rejected() {
        assert!(Speaker::global().play(Vec::new()).await.is_err());
    }
}
