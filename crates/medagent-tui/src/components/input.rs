use crossterm::event::{Event, KeyCode, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    widgets::Paragraph,
};
use tokio::sync::watch;
use tui_textarea::{Input, TextArea};

use crate::component::Component;

pub struct PromptModel {
    pub needs_redraw: watch::Sender<bool>,
    pub needs_update: watch::Sender<bool>,
}

/// Multiline prompt input backed by [`tui_textarea`]. Enter submits, ctrl+j
/// inserts a newline, ctrl+l clears.
pub struct Prompt {
    model: PromptModel,
    textarea: TextArea<'static>,
    submitted_tx: watch::Sender<String>,
    submitted_rx: watch::Receiver<String>,
}

impl Prompt {
    pub fn new(model: PromptModel) -> Self {
        let (submitted_tx, submitted_rx) = watch::channel(String::new());
        Self {
            model,
            textarea: Self::new_textarea(),
            submitted_tx,
            submitted_rx,
        }
    }

    fn new_textarea() -> TextArea<'static> {
        let mut textarea = TextArea::default();
        textarea.set_cursor_line_style(Style::default());
        textarea
    }

    pub fn submitted_prompt_rx(&self) -> watch::Receiver<String> {
        self.submitted_rx.clone()
    }

    /// Replace the input contents, e.g. to hand a failed message back for
    /// another try.
    pub fn set_prompt(&mut self, text: String) {
        self.textarea = Self::new_textarea();
        self.textarea.insert_str(text);
        let _ = self.model.needs_redraw.send(true);
    }

    pub fn height(&self) -> u16 {
        self.textarea.lines().len().max(1) as u16
    }
}

impl Component for Prompt {
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Key(key) => match (key.code, key.modifiers) {
                (KeyCode::Char('j'), KeyModifiers::CONTROL) => {
                    self.textarea.insert_newline();
                    let _ = self.model.needs_redraw.send(true);
                }
                (KeyCode::Char('l'), KeyModifiers::CONTROL) => {
                    self.textarea = Self::new_textarea();
                    let _ = self.model.needs_redraw.send(true);
                }
                (KeyCode::Enter, KeyModifiers::NONE) => {
                    let text = self.textarea.lines().join("\n");
                    let trimmed = text.trim().to_string();
                    self.textarea = Self::new_textarea();
                    let _ = self.model.needs_redraw.send(true);
                    if !trimmed.is_empty() {
                        let _ = self.submitted_tx.send(trimmed);
                        let _ = self.model.needs_update.send(true);
                    }
                }
                _ => {
                    if self.textarea.input(Input::from(key)) {
                        let _ = self.model.needs_redraw.send(true);
                    }
                }
            },
            Event::Paste(data) => {
                self.textarea.insert_str(&data);
                let _ = self.model.needs_redraw.send(true);
            }
            _ => {}
        }
    }

    fn render(&mut self, frame: &mut Frame, rect: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(2), Constraint::Min(0)].as_ref())
            .split(rect);

        frame.render_widget(Paragraph::new("> "), chunks[0]);
        frame.render_widget(&self.textarea, chunks[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEvent, KeyEventKind, KeyEventState};

    fn prompt() -> Prompt {
        let (needs_redraw, _) = watch::channel(false);
        let (needs_update, _) = watch::channel(false);
        Prompt::new(PromptModel {
            needs_redraw,
            needs_update,
        })
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    #[test]
    fn enter_submits_trimmed_text() {
        let mut prompt = prompt();
        for c in "  hello ".chars() {
            prompt.handle_event(key(KeyCode::Char(c), KeyModifiers::NONE));
        }
        prompt.handle_event(key(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(*prompt.submitted_prompt_rx().borrow(), "hello");
        assert_eq!(prompt.height(), 1);
    }

    #[test]
    fn blank_submit_is_ignored() {
        let mut prompt = prompt();
        prompt.handle_event(key(KeyCode::Char(' '), KeyModifiers::NONE));
        prompt.handle_event(key(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(*prompt.submitted_prompt_rx().borrow(), "");
    }

    #[test]
    fn ctrl_j_adds_a_line() {
        let mut prompt = prompt();
        prompt.handle_event(key(KeyCode::Char('a'), KeyModifiers::NONE));
        prompt.handle_event(key(KeyCode::Char('j'), KeyModifiers::CONTROL));
        prompt.handle_event(key(KeyCode::Char('b'), KeyModifiers::NONE));
        assert_eq!(prompt.height(), 2);
        prompt.handle_event(key(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(*prompt.submitted_prompt_rx().borrow(), "a\nb");
    }
}
