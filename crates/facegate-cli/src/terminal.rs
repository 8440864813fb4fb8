//! Line-oriented terminal front end: prompts are printed, burst images are
//! saved as PNG for review, and selection commands are read from stdin.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use facegate_core::capture::write_image;
use facegate_core::prompt::{Prompt, Prompter};
use facegate_core::selection::{SelectionEvent, SelectionInput};
use facegate_core::session::CapturedImage;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info, warn};

use crate::cli::OutputMode;
use crate::errors::AppResult;

/// Capture ids and where each image was saved, shared between the prompter
/// that writes the files and the input that lists them.
#[derive(Debug, Clone, Default)]
pub struct CaptureIndex(Arc<Mutex<Vec<(String, Option<PathBuf>)>>>);

impl CaptureIndex {
    pub fn entries(&self) -> Vec<(String, Option<PathBuf>)> {
        self.lock().clone()
    }

    fn record(&self, id: &str, path: Option<PathBuf>) {
        self.lock().push((id.to_string(), path));
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, Option<PathBuf>)>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Human mode writes guidance to stdout. JSON mode keeps stdout for the
/// artifact and sends guidance to stderr.
fn emit(mode: OutputMode, line: &str) {
    match mode {
        OutputMode::Human => println!("{line}"),
        OutputMode::Json => eprintln!("{line}"),
    }
}

pub struct TerminalPrompter {
    mode: OutputMode,
    capture_dir: PathBuf,
    saved: HashSet<String>,
    index: CaptureIndex,
}

impl TerminalPrompter {
    pub fn new(mode: OutputMode, capture_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            capture_dir: capture_dir.into(),
            saved: HashSet::new(),
            index: CaptureIndex::default(),
        }
    }

    pub fn index(&self) -> CaptureIndex {
        self.index.clone()
    }

    pub fn capture_path(&self, id: &str) -> PathBuf {
        self.capture_dir.join(format!("{id}.png"))
    }
}

impl Prompter for TerminalPrompter {
    fn show(&mut self, prompt: &Prompt) {
        debug!(?prompt, "prompt");
        emit(self.mode, &prompt.to_string());
    }

    fn present_captures(&mut self, captures: &[CapturedImage]) {
        for image in captures {
            if !self.saved.insert(image.id().to_string()) {
                continue;
            }
            let path = self.capture_path(image.id());
            match write_image(image.image(), &path) {
                Ok(()) => {
                    info!(image_id = image.id(), path = %path.display(), "saved capture");
                    emit(self.mode, &format!("  {} -> {}", image.id(), path.display()));
                    self.index.record(image.id(), Some(path));
                }
                Err(err) => {
                    // The image stays selectable; only the preview is lost.
                    warn!(image_id = image.id(), error = %err, "failed to save capture");
                    emit(self.mode, &format!("  {} (preview unavailable)", image.id()));
                    self.index.record(image.id(), None);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionCommand {
    Event(SelectionEvent),
    List,
    Help,
    Blank,
}

pub const SELECTION_HELP: &str =
    "commands: toggle <id> (or just <id>), confirm, list, help";

/// Parses one line of selection input. A bare image id is shorthand for
/// `toggle <id>`.
pub fn parse_selection_command(line: &str) -> Result<SelectionCommand, String> {
    let trimmed = line.trim();
    match trimmed {
        "" => Ok(SelectionCommand::Blank),
        "list" | "ls" => Ok(SelectionCommand::List),
        "help" | "?" => Ok(SelectionCommand::Help),
        _ => match trimmed.parse::<SelectionEvent>() {
            Ok(event) => Ok(SelectionCommand::Event(event)),
            Err(_) if trimmed != "toggle" && !trimmed.contains(char::is_whitespace) => {
                Ok(SelectionCommand::Event(SelectionEvent::toggle(trimmed)))
            }
            Err(message) => Err(message),
        },
    }
}

/// Reads selection commands line by line. End of input closes the selection.
pub struct LineSelectionInput<R> {
    lines: Lines<R>,
    mode: OutputMode,
    index: CaptureIndex,
}

impl LineSelectionInput<BufReader<Stdin>> {
    pub fn stdin(mode: OutputMode, index: CaptureIndex) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), mode, index)
    }
}

impl<R> LineSelectionInput<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, mode: OutputMode, index: CaptureIndex) -> Self {
        Self {
            lines: reader.lines(),
            mode,
            index,
        }
    }

    fn print_index(&self) {
        let entries = self.index.entries();
        if entries.is_empty() {
            emit(self.mode, "no captures yet");
        }
        for (id, path) in entries {
            let line = match path {
                Some(path) => format!("  {id} -> {}", path.display()),
                None => format!("  {id}"),
            };
            emit(self.mode, &line);
        }
    }
}

#[async_trait]
impl<R> SelectionInput for LineSelectionInput<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_event(&mut self) -> AppResult<Option<SelectionEvent>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            match parse_selection_command(&line) {
                Ok(SelectionCommand::Event(event)) => return Ok(Some(event)),
                Ok(SelectionCommand::List) => self.print_index(),
                Ok(SelectionCommand::Help) => emit(self.mode, SELECTION_HELP),
                Ok(SelectionCommand::Blank) => {}
                Err(message) => emit(self.mode, &format!("{message}; {SELECTION_HELP}")),
            }
        }
    }
}
