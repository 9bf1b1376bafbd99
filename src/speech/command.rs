//! Speech through external helper programs
//!
//! The capture command records and transcribes, printing the transcript on
//! stdout when it exits. Stopping sends it SIGINT so it can finish the
//! recording it has. The player command receives the audio file path as its
//! last argument.

use super::{SpeechError, SpeechIo};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// How long a stopped capture may take to transcribe before it is killed
const STOP_GRACE: Duration = Duration::from_secs(20);

pub struct CommandSpeech {
    capture_command: Option<String>,
    player_command: Option<String>,
    /// Stop signal for the capture in progress
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl CommandSpeech {
    /// Commands whose program cannot be found are treated as not configured
    pub fn new(capture_command: Option<String>, player_command: Option<String>) -> Self {
        Self {
            capture_command: resolve(capture_command, "capture"),
            player_command: resolve(player_command, "player"),
            active: Arc::new(Mutex::new(None)),
        }
    }

    fn shell(command: &str) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command).stdin(Stdio::null());

        // Own process group so a stop reaches the whole pipeline
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)).ok();
                Ok(())
            });
        }
        cmd
    }

    #[cfg(unix)]
    fn signal_group(pid: Option<u32>, signal: Signal) {
        let Some(pid) = pid else { return };
        let Ok(raw) = i32::try_from(pid) else { return };
        tracing::debug!(pgid = pid, ?signal, "Signalling capture process group");
        let _ = killpg(Pid::from_raw(raw), signal);
    }
}

fn resolve(command: Option<String>, role: &str) -> Option<String> {
    let command = command.filter(|c| !c.trim().is_empty())?;
    let program = command.split_whitespace().next()?;
    match which::which(program) {
        Ok(_) => Some(command),
        Err(e) => {
            tracing::warn!(role, program, error = %e, "Speech helper not found; disabling");
            None
        }
    }
}

#[async_trait]
impl SpeechIo for CommandSpeech {
    async fn start_capture(&self) -> Result<mpsc::Receiver<String>, SpeechError> {
        let command = self
            .capture_command
            .as_deref()
            .ok_or_else(|| SpeechError::Unavailable("Voice capture".to_string()))?;

        let cancel = {
            let mut active = self.active.lock().unwrap();
            if active.is_some() {
                return Err(SpeechError::Capture("a capture is already running".to_string()));
            }
            let token = CancellationToken::new();
            *active = Some(token.clone());
            token
        };

        let mut cmd = Self::shell(command);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.active.lock().unwrap().take();
                return Err(SpeechError::Capture(format!("failed to start recorder: {e}")));
            }
        };
        let pid = child.id();

        let (tx, rx) = mpsc::channel(1);
        let active = self.active.clone();
        tokio::spawn(async move {
            let output = child.wait_with_output();
            tokio::pin!(output);

            let result = tokio::select! {
                biased;

                result = &mut output => Some(result),

                () = cancel.cancelled() => {
                    #[cfg(unix)]
                    Self::signal_group(pid, Signal::SIGINT);
                    match tokio::time::timeout(STOP_GRACE, &mut output).await {
                        Ok(result) => Some(result),
                        Err(_) => {
                            #[cfg(unix)]
                            Self::signal_group(pid, Signal::SIGKILL);
                            tracing::warn!("Capture did not finish after stop; killed");
                            None
                        }
                    }
                }
            };
            active.lock().unwrap().take();

            match result {
                Some(Ok(output)) if output.status.success() => {
                    let transcript = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if transcript.is_empty() {
                        tracing::info!("Capture produced no transcript");
                    } else {
                        let _ = tx.send(transcript).await;
                    }
                }
                Some(Ok(output)) => {
                    tracing::warn!(
                        exit_code = output.status.code().unwrap_or(-1),
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "Capture command failed"
                    );
                }
                Some(Err(e)) => tracing::warn!(error = %e, "Capture command failed"),
                None => {}
            }
        });

        Ok(rx)
    }

    async fn stop_capture(&self) -> Result<(), SpeechError> {
        if self.capture_command.is_none() {
            return Err(SpeechError::Unavailable("Voice capture".to_string()));
        }
        if let Some(token) = self.active.lock().unwrap().as_ref() {
            token.cancel();
        }
        Ok(())
    }

    async fn speak(&self, audio: &[u8], mime: &str) -> Result<(), SpeechError> {
        let player = self
            .player_command
            .as_deref()
            .ok_or_else(|| SpeechError::Unavailable("Audio playback".to_string()))?;

        let extension = mime_guess::get_mime_extensions_str(mime)
            .and_then(|exts| exts.first())
            .copied()
            .unwrap_or("bin");
        let path = std::env::temp_dir().join(format!(
            "relaychat-reply-{}.{extension}",
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&path, audio)
            .await
            .map_err(|e| SpeechError::Playback(format!("cannot write audio file: {e}")))?;

        // "$1" keeps the path a single argument whatever it contains
        let status = Self::shell(&format!("{player} \"$1\""))
            .arg("relaychat")
            .arg(&path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        let _ = tokio::fs::remove_file(&path).await;

        match status {
            Ok(s) if s.success() => Ok(()),
            Ok(s) => Err(SpeechError::Playback(format!(
                "player exited with code {}",
                s.code().unwrap_or(-1)
            ))),
            Err(e) => Err(SpeechError::Playback(format!("failed to start player: {e}"))),
        }
    }
}
