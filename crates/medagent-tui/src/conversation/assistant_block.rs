use ratatui::{
    Frame,
    layout::Rect,
    text::{Line, Span},
    widgets::Paragraph,
};
use std::time::Instant;
use textwrap::wrap;
use tui_realm_stdlib::states::SpinnerStates;

use super::{ThoughtStep, node::ConvNode};

/// One assistant reply: a collapsible summary header, the reasoning steps
/// that streamed in, then the response text.
pub struct AssistantBlock {
    pub(crate) working_collapsed: bool,
    pub(crate) steps: Vec<ThoughtStep>,
    pub(crate) response: String,
    pub(crate) done: bool,
    cache_width: u16,
    cache_rev: u64,
    pub(crate) content_rev: u64,
    response_lines: Vec<Line<'static>>,
    started: Option<Instant>,
    last_update: Option<Instant>,
    spinner: SpinnerStates,
}

impl AssistantBlock {
    pub fn new(
        working_collapsed: bool,
        steps: Vec<ThoughtStep>,
        response: String,
        done: bool,
    ) -> Self {
        let mut spinner = SpinnerStates::default();
        spinner.reset("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        Self {
            working_collapsed,
            steps,
            response,
            done,
            cache_width: 0,
            cache_rev: 0,
            content_rev: 0,
            response_lines: Vec::new(),
            started: None,
            last_update: None,
            spinner,
        }
    }

    pub(crate) fn record_activity(&mut self) {
        let now = Instant::now();
        if self.started.is_none() {
            self.started = Some(now);
        }
        self.last_update = Some(now);
    }

    fn summary(&mut self) -> String {
        if self.response.is_empty() && !self.done {
            let mut parts = vec!["Thinking".to_string()];
            if let Some(step) = self.steps.last() {
                parts.push(step.display_name.clone());
            }
            let mut summary = parts.join(", ");
            summary.push(' ');
            summary.push(self.spinner.step());
            summary
        } else {
            let mut parts = Vec::new();
            if let (Some(start), Some(end)) = (self.started, self.last_update) {
                let secs = end.duration_since(start).as_secs();
                parts.push(format!("Thought for {secs}s"));
            } else {
                parts.push("Thought".to_string());
            }
            if !self.steps.is_empty() {
                let n = self.steps.len();
                parts.push(format!("{n} step{}", if n == 1 { "" } else { "s" }));
            }
            parts.join(", ")
        }
    }

    fn ensure_cache(&mut self, width: u16) {
        if self.cache_width == width && self.cache_rev == self.content_rev {
            return;
        }
        self.cache_width = width;
        self.cache_rev = self.content_rev;
        self.response_lines = wrap(&self.response, width.max(1) as usize)
            .into_iter()
            .map(|w| Line::from(w.into_owned()))
            .collect();
        self.response_lines.push(Line::default());
    }
}

impl ConvNode for AssistantBlock {
    fn height(&mut self, width: u16) -> u16 {
        self.ensure_cache(width);
        let mut h = 1;
        if !self.working_collapsed {
            for step in &mut self.steps {
                h += step.height(width);
            }
        }
        h += self.response_lines.len() as u16;
        h
    }

    fn render(
        &mut self,
        frame: &mut Frame,
        area: Rect,
        _selected: bool,
        start: u16,
        max_height: u16,
    ) {
        self.ensure_cache(area.width);
        let arrow = if self.working_collapsed { "›" } else { "⌄" };

        let mut y = area.y;
        let mut remaining = max_height;
        let mut line_idx = 0u16;

        if start == 0 && remaining > 0 {
            let header = Paragraph::new(Line::from(Span::raw(format!(
                "{} {arrow}",
                self.summary()
            ))));
            frame.render_widget(header, Rect { height: 1, ..area });
            y += 1;
            remaining -= 1;
        }
        line_idx += 1;
        if remaining == 0 {
            return;
        }

        if !self.working_collapsed {
            for step in self.steps.iter_mut() {
                let h = step.height(area.width);
                if line_idx + h <= start {
                    line_idx += h;
                    continue;
                }
                let offset = if start > line_idx {
                    start - line_idx
                } else {
                    0
                };
                let avail = remaining.min(h - offset);
                let rect = Rect {
                    x: area.x,
                    y,
                    width: area.width,
                    height: avail,
                };
                step.render(frame, rect, false, offset, avail);
                y += avail;
                remaining -= avail;
                line_idx += h;
                if remaining == 0 {
                    return;
                }
            }
        }

        if remaining > 0 {
            let resp_total = self.response_lines.len() as u16;
            if line_idx + resp_total <= start {
                return;
            }
            let offset = if start > line_idx {
                start - line_idx
            } else {
                0
            };
            let visible = remaining.min(resp_total - offset);
            let start_idx = offset as usize;
            let end_idx = (start_idx + visible as usize).min(self.response_lines.len());
            let lines: Vec<Line> = self.response_lines[start_idx..end_idx].to_vec();
            let rect = Rect {
                x: area.x,
                y,
                width: area.width,
                height: visible,
            };
            let para = Paragraph::new(lines);
            frame.render_widget(para, rect);
        }
    }

    fn activate(&mut self) {
        self.working_collapsed = !self.working_collapsed;
        self.content_rev += 1;
    }

    fn click(&mut self, line: u16) {
        if line == 0 {
            self.activate();
        }
    }
}
