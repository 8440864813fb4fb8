use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::guard::StageGuard;
use crate::prompt::{Prompt, Prompter};
use crate::session::{CapturedImage, SessionState, SELECTION_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    Toggle(String),
    Confirm,
}

impl SelectionEvent {
    pub fn toggle(id: impl Into<String>) -> Self {
        SelectionEvent::Toggle(id.into())
    }
}

impl fmt::Display for SelectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionEvent::Toggle(id) => write!(f, "toggle {id}"),
            SelectionEvent::Confirm => f.write_str("confirm"),
        }
    }
}

impl FromStr for SelectionEvent {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("confirm"), None, _) => Ok(SelectionEvent::Confirm),
            (Some("toggle"), Some(id), None) => Ok(SelectionEvent::toggle(id)),
            (Some("toggle"), None, _) => Err("toggle needs an image id".into()),
            _ => Err(format!("unrecognised selection command '{}'", line.trim())),
        }
    }
}

/// Source of user selection events. `Ok(None)` means the input has closed.
#[async_trait]
pub trait SelectionInput: Send {
    async fn next_event(&mut self) -> AppResult<Option<SelectionEvent>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Selected,
    Deselected,
    /// A third image was clicked while two were already selected.
    Ignored,
}

/// The confirmed pair in capture order.
#[derive(Debug, Clone)]
pub struct SelectedPair([CapturedImage; 2]);

impl SelectedPair {
    pub fn images(&self) -> &[CapturedImage; 2] {
        &self.0
    }

    pub fn ids(&self) -> [String; 2] {
        [self.0[0].id().to_string(), self.0[1].id().to_string()]
    }
}

/// Flips the selection of `id`, refusing to grow past two.
pub fn toggle(session: &mut SessionState, id: &str) -> AppResult<ToggleOutcome> {
    let selected = session.selected_count();
    let image = session
        .captures_mut()
        .iter_mut()
        .find(|image| image.id() == id)
        .ok_or_else(|| AppError::UnknownImage(id.to_string()))?;

    if image.is_selected() {
        image.set_selected(false);
        Ok(ToggleOutcome::Deselected)
    } else if selected < SELECTION_SIZE {
        image.set_selected(true);
        Ok(ToggleOutcome::Selected)
    } else {
        Ok(ToggleOutcome::Ignored)
    }
}

/// Hands out the selected pair. Reads only, so a rejected confirm cannot
/// disturb captures or selection.
pub fn confirm(session: &SessionState) -> AppResult<SelectedPair> {
    let selected: Vec<&CapturedImage> = session
        .captures()
        .iter()
        .filter(|image| image.is_selected())
        .collect();
    match selected.as_slice() {
        [first, second] => Ok(SelectedPair([(*first).clone(), (*second).clone()])),
        other => Err(AppError::SelectionCount {
            selected: other.len(),
        }),
    }
}

/// Interactive selection over the capture list.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionStage;

impl SelectionStage {
    pub async fn run(
        &self,
        session: &mut SessionState,
        input: &mut dyn SelectionInput,
        prompter: &mut dyn Prompter,
        guard: &StageGuard,
    ) -> AppResult<SelectedPair> {
        let ids = session
            .captures()
            .iter()
            .map(|image| image.id().to_string())
            .collect();
        prompter.show(&Prompt::SelectImages { ids });

        loop {
            let event = guard
                .run(input.next_event())
                .await??
                .ok_or(AppError::SelectionInputClosed)?;
            debug!(%event, "selection event");

            match event {
                SelectionEvent::Toggle(id) => match toggle(session, &id) {
                    Ok(ToggleOutcome::Ignored) => prompter.show(&Prompt::SelectionFull { id }),
                    Ok(_) => prompter.show(&Prompt::SelectionChanged {
                        selected: owned_ids(session),
                    }),
                    Err(err) if !err.is_fatal() => {
                        warn!(image_id = %id, "toggle for unknown image");
                        prompter.show(&Prompt::UnknownImage { id });
                    }
                    Err(err) => return Err(err),
                },
                SelectionEvent::Confirm => match confirm(session) {
                    Ok(pair) => {
                        let ids = pair.ids();
                        info!(first = %ids[0], second = %ids[1], "selection confirmed");
                        prompter.show(&Prompt::SelectionConfirmed { ids: ids.to_vec() });
                        return Ok(pair);
                    }
                    Err(AppError::SelectionCount { selected }) => {
                        warn!(selected, "confirm rejected");
                        prompter.show(&Prompt::SelectionRejected { selected });
                    }
                    Err(err) => return Err(err),
                },
            }
        }
    }
}

fn owned_ids(session: &SessionState) -> Vec<String> {
    session
        .selected_ids()
        .into_iter()
        .map(str::to_string)
        .collect()
}
