//! Launching the transcription worker and pumping its output.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    config::WorkerCfg,
    error::SessionError,
    protocol::{Diagnostics, LineDecoder, Message},
};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    tts_flag: String,
    env: BTreeMap<String, String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            tts_flag: "--tts".to_string(),
            env: BTreeMap::new(),
        }
    }

    pub fn from_config(cfg: &WorkerCfg) -> Self {
        let cmd = cfg.args.iter().fold(Self::new(&cfg.program), |c, a| c.arg(a));
        let mut cmd = cfg.env.iter().fold(cmd, |c, (k, v)| c.env(k, v));
        cmd.working_dir = cfg.working_dir.clone();
        cmd.tts_flag = cfg.tts_flag.clone();
        cmd
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn build(&self, source: &Path, synthesize_voice: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(source);
        if synthesize_voice && !self.tts_flag.is_empty() {
            cmd.arg(&self.tts_flag);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[derive(Debug)]
pub enum WorkerEvent {
    Message(Message),
    /// Last event of a run that was not cancelled.
    Exited(Result<(), SessionError>),
}

/// A running worker. Dropping the handle cancels it.
#[derive(Debug)]
pub struct WorkerHandle {
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
    _task: JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn recv(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Kills the process. No further events are delivered.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }
}

/// Starts the worker on `source`. Must be called within a tokio runtime.
pub fn spawn(command: &WorkerCommand, source: &Path, synthesize_voice: bool) -> WorkerHandle {
    let (tx, events) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let cmd = command.build(source, synthesize_voice);
    let program = command.program.clone();
    let task = tokio::spawn(run(cmd, program, tx, cancel.clone()));

    WorkerHandle {
        events,
        _guard: cancel.clone().drop_guard(),
        cancel,
        _task: task,
    }
}

async fn run(
    mut cmd: Command,
    program: String,
    tx: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) {
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(source) => {
            tracing::warn!(program = program.as_str(), error = %source, "worker launch failed");
            let _ = tx.send(WorkerEvent::Exited(Err(SessionError::Launch {
                program,
                source,
            })));
            return;
        }
    };
    tracing::info!(program = program.as_str(), pid = child.id(), "worker started");

    let stderr_task = child.stderr.take().map(|s| tokio::spawn(collect_diagnostics(s)));

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        r = pump_stdout(&mut child, &tx) => Some(r),
    };

    let Some(pumped) = outcome else {
        kill(&mut child).await;
        tracing::info!("worker cancelled");
        return;
    };

    let result = match pumped {
        Err(source) => {
            kill(&mut child).await;
            Err(SessionError::Read {
                source,
                diagnostics: stderr_text(stderr_task).await,
            })
        }
        Ok(()) => {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    kill(&mut child).await;
                    tracing::info!("worker cancelled");
                    return;
                }
                s = child.wait() => s,
            };
            let diagnostics = stderr_text(stderr_task).await;
            match status {
                Ok(s) if s.success() => Ok(()),
                Ok(s) => Err(SessionError::Exited {
                    code: s.code(),
                    diagnostics,
                }),
                Err(source) => Err(SessionError::Read {
                    source,
                    diagnostics,
                }),
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    match &result {
        Ok(()) => tracing::info!("worker exited cleanly"),
        Err(e) => tracing::warn!(error = %e, "worker failed"),
    }
    let _ = tx.send(WorkerEvent::Exited(result));
}

async fn pump_stdout(
    child: &mut Child,
    tx: &mpsc::UnboundedSender<WorkerEvent>,
) -> std::io::Result<()> {
    let Some(mut stdout) = child.stdout.take() else {
        return Ok(());
    };
    let mut decoder = LineDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = stdout.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for msg in decoder.feed(&chunk[..n]) {
            if tx.send(WorkerEvent::Message(msg)).is_err() {
                return Ok(());
            }
        }
    }

    if let Some(msg) = decoder.finish() {
        let _ = tx.send(WorkerEvent::Message(msg));
    }
    Ok(())
}

async fn collect_diagnostics(mut stderr: impl AsyncRead + Unpin) -> Diagnostics {
    let mut diag = Diagnostics::default();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                tracing::trace!(bytes = n, "worker stderr");
                diag.push(&chunk[..n]);
            }
            Err(e) => {
                tracing::debug!(error = %e, "stopped reading worker stderr");
                break;
            }
        }
    }
    diag
}

async fn stderr_text(task: Option<JoinHandle<Diagnostics>>) -> String {
    match task {
        Some(t) => match t.await {
            Ok(diag) if !diag.is_empty() => diag.into_text(),
            Ok(_) => String::new(),
            Err(e) => {
                tracing::debug!(error = %e, "stderr collector failed");
                String::new()
            }
        },
        None => String::new(),
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "worker kill failed");
    }
}
