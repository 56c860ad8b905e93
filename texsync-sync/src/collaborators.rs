//! Seams to the outside world: prompt extraction, text generation and
//! compilation.
//!
//! Each seam is a trait with one default implementation. The generator and
//! compiler defaults are external commands; the extractor only understands
//! the `%parameters:` line and its surrounding block.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use texsync_core::config::{CompileConfig, GeneratorConfig};
use texsync_core::marker::{find_markers, live_marker};
use texsync_core::{CancellationToken, DocumentMarker, MarkerId, MarkerStatus};

use crate::error::SyncError;

// ---------------------------------------------------------------------------
// Prompt extraction
// ---------------------------------------------------------------------------

/// A live marker plus the text it asks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub marker: DocumentMarker,
    pub body: String,
}

pub trait PromptExtractor: Send + Sync {
    /// The first marker asking for generation, with its prompt body.
    fn extract(&self, document: &str) -> Option<Prompt>;

    /// Put `response` into the document for generation `tag`, anchored on the
    /// marker currently carrying `anchor`. Re-splicing the same tag replaces
    /// the earlier block. `None` if neither block nor anchor is present.
    fn splice(
        &self,
        document: &str,
        anchor: &MarkerStatus,
        tag: &MarkerId,
        response: &str,
    ) -> Option<String>;
}

/// Default extractor for LaTeX documents.
///
/// The prompt body is the run of lines directly above the marker, stopping
/// at a blank line or a `\begin{`/`\end{` line. Responses go right after the
/// marker, or after the `\end{...}` that closes the marker's block.
#[derive(Debug, Clone)]
pub struct ParameterLineExtractor {
    open_line: String,
    close_line: String,
}

impl Default for ParameterLineExtractor {
    fn default() -> Self {
        Self::new("\\begin{answer}", "\\end{answer}")
    }
}

impl ParameterLineExtractor {
    pub fn new(open_line: impl Into<String>, close_line: impl Into<String>) -> Self {
        Self {
            open_line: open_line.into(),
            close_line: close_line.into(),
        }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(config.open_line.clone(), config.close_line.clone())
    }

    fn tagged_open(&self, tag: &MarkerId) -> String {
        format!("{} % texsync:{tag}", self.open_line)
    }

    fn block(&self, tag: &MarkerId, response: &str, newline: &str) -> String {
        let mut block = self.tagged_open(tag);
        block.push_str(newline);
        for line in response.lines() {
            block.push_str(line);
            block.push_str(newline);
        }
        block.push_str(&self.close_line);
        block.push_str(newline);
        block
    }
}

fn is_boundary(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with("\\begin{") || t.starts_with("\\end{")
}

impl PromptExtractor for ParameterLineExtractor {
    fn extract(&self, document: &str) -> Option<Prompt> {
        let marker = live_marker(document)?;
        let lines: Vec<&str> = document.lines().collect();
        let mut body: Vec<&str> = lines[..marker.line.min(lines.len())]
            .iter()
            .rev()
            .take_while(|l| !is_boundary(l) && DocumentMarker::parse_line(0, l).is_none())
            .copied()
            .collect();
        body.reverse();
        Some(Prompt {
            marker,
            body: body.join("\n"),
        })
    }

    fn splice(
        &self,
        document: &str,
        anchor: &MarkerStatus,
        tag: &MarkerId,
        response: &str,
    ) -> Option<String> {
        let lines: Vec<&str> = document.split_inclusive('\n').collect();
        let newline = if document.contains("\r\n") { "\r\n" } else { "\n" };
        let block = self.block(tag, response, newline);
        let open = self.tagged_open(tag);

        let (start, end) = match lines.iter().position(|l| l.trim_end() == open) {
            Some(start) => {
                let end = lines[start + 1..]
                    .iter()
                    .position(|l| l.trim() == self.close_line)
                    .map(|off| start + 1 + off + 1)
                    .unwrap_or(lines.len());
                (start, end)
            }
            None => {
                let marker = find_markers(document)
                    .into_iter()
                    .find(|m| &m.status == anchor)?;
                let mut at = marker.line + 1;
                if lines
                    .get(at)
                    .is_some_and(|l| l.trim_start().starts_with("\\end{"))
                {
                    at += 1;
                }
                (at, at)
            }
        };

        let mut out = String::with_capacity(document.len() + block.len() + 2);
        for line in &lines[..start] {
            out.push_str(line);
        }
        if !out.is_empty() && !out.ends_with('\n') {
            out.push_str(newline);
        }
        out.push_str(&block);
        for line in &lines[end..] {
            out.push_str(line);
        }
        Some(out)
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// What a generator is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub id: MarkerId,
    pub prompt: String,
    /// Opaque marker parameters, in document order.
    pub options: Vec<(String, String)>,
}

impl GenerationRequest {
    pub fn from_prompt(prompt: &Prompt, id: MarkerId) -> Self {
        Self {
            id,
            prompt: prompt.body.clone(),
            options: prompt
                .marker
                .options()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Streaming text producer. `on_chunk` sees text as it arrives; an error from
/// it aborts the generation.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(&str) -> Result<(), SyncError>,
    ) -> Result<(), SyncError>;
}

/// Runs an external command. The request goes to stdin as one JSON object
/// (`{"id", "prompt", "parameters"}`); stdout is the streamed response.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(config.command.clone(), Duration::from_secs(config.timeout_secs))
    }
}

/// How long to wait for a finished generator's stderr.
const PIPE_GRACE: Duration = Duration::from_secs(2);

enum Stream {
    Chunk(String),
    Done,
}

impl Generator for CommandGenerator {
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        on_chunk: &mut dyn FnMut(&str) -> Result<(), SyncError>,
    ) -> Result<(), SyncError> {
        let mut child = spawn(&self.command, None, true)
            .map_err(|e| SyncError::Generation(format!("cannot start generator: {e}")))?;

        let parameters: serde_json::Map<String, serde_json::Value> = request
            .options
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let payload = serde_json::json!({
            "id": request.id,
            "prompt": request.prompt,
            "parameters": parameters,
        });

        // Readers start before the request is written: a generator may fill
        // stdout before it has read all of stdin.
        let (tx, rx) = mpsc::channel();
        let stdout = child.stdout.take();
        thread::spawn(move || {
            if let Some(mut stdout) = stdout {
                stream_utf8(&mut stdout, |s| {
                    let _ = tx.send(Stream::Chunk(s));
                });
            }
            let _ = tx.send(Stream::Done);
        });
        let (err_tx, err_rx) = mpsc::channel();
        let stderr = child.stderr.take();
        thread::spawn(move || {
            let _ = err_tx.send(drain(stderr));
        });
        if let Some(mut stdin) = child.stdin.take() {
            let payload = payload.to_string();
            // Dropping stdin at the end closes it so the generator sees EOF.
            thread::spawn(move || {
                if let Err(e) = stdin.write_all(payload.as_bytes()) {
                    tracing::debug!("generator stopped reading its request: {e}");
                }
            });
        }

        let started = Instant::now();
        let outcome = loop {
            if cancel.is_cancelled() {
                break Err(SyncError::Generation("cancelled".into()));
            }
            if started.elapsed() >= self.timeout {
                break Err(SyncError::Generation(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Stream::Chunk(text)) => {
                    if let Err(e) = on_chunk(&text) {
                        break Err(e);
                    }
                }
                Ok(Stream::Done) | Err(mpsc::RecvTimeoutError::Disconnected) => break Ok(()),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
        };

        let status = if outcome.is_err() {
            let _ = child.kill();
            child.wait().ok()
        } else {
            let status = wait_until(&mut child, self.timeout.saturating_sub(started.elapsed()));
            if status.is_none() {
                let _ = child.kill();
                let _ = child.wait();
            }
            status
        };
        // Pipe readers are never joined: a killed generator's own children
        // may hold stdout and stderr open indefinitely.
        outcome?;

        match status {
            Some(status) if status.success() => Ok(()),
            Some(status) => {
                let stderr = err_rx.recv_timeout(PIPE_GRACE).unwrap_or_default();
                Err(SyncError::Generation(format!(
                    "generator exited with {status}: {}",
                    stderr.trim()
                )))
            }
            None => Err(SyncError::Generation("generator did not exit".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

pub trait Compiler: Send + Sync {
    fn compile(&self, document: &Path) -> Result<(), SyncError>;
}

/// Runs `<command...> <document>` in the document's directory.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandCompiler {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &CompileConfig) -> Self {
        Self::new(config.command.clone(), Duration::from_secs(config.timeout_secs))
    }
}

impl Compiler for CommandCompiler {
    fn compile(&self, document: &Path) -> Result<(), SyncError> {
        let mut command = self.command.clone();
        command.push(document.to_string_lossy().to_string());
        let cwd = document.parent().filter(|p| !p.as_os_str().is_empty());
        let mut child = spawn(&command, cwd, false)
            .map_err(|e| SyncError::Compile(format!("cannot start compiler: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_reader = thread::spawn(move || drain(stdout));
        let err_reader = thread::spawn(move || drain(stderr));

        let status = wait_until(&mut child, self.timeout);
        if status.is_none() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = out_reader.join();
        let stderr = err_reader.join().unwrap_or_default();

        match status {
            Some(s) if s.success() => {
                tracing::info!("compiled {}", document.display());
                Ok(())
            }
            Some(s) => Err(SyncError::Compile(format!("exit {s}: {}", stderr.trim()))),
            None => Err(SyncError::Compile(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

fn spawn(command: &[String], cwd: Option<&Path>, with_stdin: bool) -> std::io::Result<Child> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if with_stdin { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.spawn()
}

/// Poll until exit or `timeout`; `None` on timeout.
fn wait_until(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if started.elapsed() >= timeout => return None,
            Ok(None) => thread::sleep(Duration::from_millis(20)),
            Err(_) => return None,
        }
    }
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Read `src` to EOF, handing out text without splitting UTF-8 sequences.
fn stream_utf8(src: &mut impl Read, mut emit: impl FnMut(String)) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);
        let valid = match std::str::from_utf8(&pending) {
            Ok(s) => s.len(),
            Err(e) if e.error_len().is_some() => pending.len(),
            Err(e) => e.valid_up_to(),
        };
        if valid > 0 {
            let rest = pending.split_off(valid);
            emit(String::from_utf8_lossy(&pending).into_owned());
            pending = rest;
        }
    }
    if !pending.is_empty() {
        emit(String::from_utf8_lossy(&pending).into_owned());
    }
}
