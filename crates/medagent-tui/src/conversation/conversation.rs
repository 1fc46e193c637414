use crossterm::event::{Event, MouseButton, MouseEventKind};
use medagent::{Role, Transcript};
use ratatui::{Frame, layout::Rect};

use crate::component::Component;

use super::node::ConvNode;
use super::{Node, ThoughtStep, UserBubble, assistant_block::AssistantBlock};

pub struct Conversation {
    items: Vec<Node>,
    scroll: u16,
    layout: Vec<(u16, u16)>,
    width: u16,
    viewport: u16,
    needs_layout: bool,
    area: Rect,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            scroll: 0,
            layout: Vec::new(),
            width: 0,
            viewport: 0,
            needs_layout: true,
            area: Rect::default(),
        }
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub(crate) fn ensure_layout(&mut self, width: u16) {
        if self.width != width || self.needs_layout {
            self.width = width;
            self.layout.clear();
            let mut pos = 0;
            for item in self.items.iter_mut() {
                let h = item.height(width);
                self.layout.push((pos, h));
                pos += h;
            }
            self.needs_layout = false;
            let max = self.total_height().saturating_sub(self.viewport);
            if self.scroll > max {
                self.scroll = max;
            }
        }
    }

    pub(crate) fn total_height(&self) -> u16 {
        self.layout.last().map(|(s, h)| s + h).unwrap_or(0)
    }

    pub(crate) fn is_at_bottom(&self) -> bool {
        let max = self.total_height().saturating_sub(self.viewport);
        self.scroll >= max
    }

    pub(crate) fn scroll_to_bottom(&mut self) {
        let max = self.total_height().saturating_sub(self.viewport);
        self.scroll = max;
    }

    fn adjust_layout_after_change(&mut self, idx: usize, start: u16, prev_height: u16) {
        self.needs_layout = true;
        self.ensure_layout(self.width);
        let new_height = self.layout[idx].1;
        if start < self.scroll {
            if new_height < prev_height {
                self.scroll = self.scroll.saturating_sub(prev_height - new_height);
            } else {
                self.scroll = self.scroll.saturating_add(new_height - prev_height);
            }
        }
        let max = self.total_height().saturating_sub(self.viewport);
        if self.scroll > max {
            self.scroll = max;
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.scroll = 0;
        self.layout.clear();
        self.needs_layout = true;
    }
}

impl Component for Conversation {
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Mouse(mouse_event) => match mouse_event.kind {
                MouseEventKind::ScrollUp => {
                    self.scroll = self.scroll.saturating_sub(1);
                    let max = self.total_height().saturating_sub(self.viewport);
                    if self.scroll > max {
                        self.scroll = max;
                    }
                }
                MouseEventKind::ScrollDown => {
                    let max = self.total_height().saturating_sub(self.viewport);
                    self.scroll = (self.scroll + 1).min(max);
                }
                MouseEventKind::Down(MouseButton::Left) => {
                    let snap = self.viewport.saturating_sub(self.total_height());
                    if mouse_event.row >= self.area.y + snap {
                        let line = self.scroll + (mouse_event.row - self.area.y - snap) as u16;
                        let mut target: Option<(usize, u16)> = None;
                        for (i, (start, h)) in self.layout.iter().enumerate() {
                            if line >= *start && line < *start + *h {
                                target = Some((i, *start));
                                break;
                            }
                        }
                        if let Some((idx, start)) = target {
                            let rel = line - start;
                            let prev_height = self.layout[idx].1;
                            self.items[idx].click(rel);
                            self.adjust_layout_after_change(idx, start, prev_height);
                        }
                    }
                }
                _ => (),
            },
            _ => (),
        }
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        self.viewport = area.height;
        self.area = area;
        self.ensure_layout(area.width);
        let total = self.total_height();
        let snap = self.viewport.saturating_sub(total);

        for (idx, item) in self.items.iter_mut().enumerate() {
            let (start, h) = self.layout[idx];
            if start + h <= self.scroll {
                continue;
            }
            if start >= self.scroll + self.viewport {
                break;
            }
            let offset = self.scroll.saturating_sub(start);
            let y = area.y + snap + start.saturating_sub(self.scroll);
            let remaining = (area.y + self.viewport).saturating_sub(y);
            let max_height = remaining.min(h - offset);
            let rect = Rect {
                x: area.x,
                y,
                width: area.width,
                height: max_height,
            };
            item.render(frame, rect, false, offset, max_height);
        }
    }
}

impl Conversation {
    fn ensure_last_assistant(&mut self) -> &mut AssistantBlock {
        if !matches!(self.items.last(), Some(Node::Assistant(block)) if !block.done) {
            self.items.push(Node::Assistant(AssistantBlock::new(
                false,
                Vec::new(),
                String::new(),
                false,
            )));
            self.needs_layout = true;
        }
        match self.items.last_mut() {
            Some(Node::Assistant(block)) => block,
            _ => unreachable!(),
        }
    }

    pub fn push_user(&mut self, text: String, timestamp: String) {
        self.items.push(Node::User(UserBubble::new(text, timestamp)));
        self.needs_layout = true;
        self.ensure_layout(self.width);
        self.scroll_to_bottom();
    }

    pub fn begin_step(&mut self, node: String, display_name: String) {
        let at_bottom = self.is_at_bottom();
        let block = self.ensure_last_assistant();
        block.record_activity();
        block
            .steps
            .push(ThoughtStep::new(node, display_name, String::new()));
        block.content_rev += 1;
        self.needs_layout = true;
        self.ensure_layout(self.width);
        if at_bottom {
            self.scroll_to_bottom();
        }
    }

    /// Append streamed reasoning text to the open step. Chunks for a node
    /// other than the open one are dropped.
    pub fn append_thinking(&mut self, node: &str, text: &str) {
        let at_bottom = self.is_at_bottom();
        let block = self.ensure_last_assistant();
        block.record_activity();
        match block.steps.last_mut() {
            Some(step) if step.node == node => {
                step.text.push_str(text);
                step.content_rev += 1;
            }
            _ => return,
        }
        block.content_rev += 1;
        self.needs_layout = true;
        self.ensure_layout(self.width);
        if at_bottom {
            self.scroll_to_bottom();
        }
    }

    /// A step that arrived whole, without chunked content.
    pub fn push_step(&mut self, node: String, display_name: String, content: String) {
        let at_bottom = self.is_at_bottom();
        let block = self.ensure_last_assistant();
        block.record_activity();
        block.steps.push(ThoughtStep::new(node, display_name, content));
        block.content_rev += 1;
        self.needs_layout = true;
        self.ensure_layout(self.width);
        if at_bottom {
            self.scroll_to_bottom();
        }
    }

    pub fn append_response(&mut self, text: &str) {
        let at_bottom = self.is_at_bottom();
        let block = self.ensure_last_assistant();
        block.record_activity();
        block.response.push_str(text);
        block.content_rev += 1;
        self.needs_layout = true;
        self.ensure_layout(self.width);
        if at_bottom {
            self.scroll_to_bottom();
        }
    }

    /// Close the streaming block. An empty streamed response falls back to
    /// the final text from the terminal record.
    pub fn finish_turn(&mut self, final_response: &str) {
        let at_bottom = self.is_at_bottom();
        let block = self.ensure_last_assistant();
        block.record_activity();
        if block.response.is_empty() && !final_response.is_empty() {
            block.response = final_response.to_string();
        }
        block.done = true;
        block.content_rev += 1;
        self.needs_layout = true;
        self.ensure_layout(self.width);
        if at_bottom {
            self.scroll_to_bottom();
        }
    }

    /// Rebuild the whole view from a transcript. Finished replies start with
    /// their reasoning collapsed.
    pub fn set_transcript(&mut self, transcript: &Transcript, time_format: &str) {
        self.clear();
        for message in transcript.messages() {
            match message.role {
                Role::User => {
                    let stamp = message.timestamp.format(time_format).to_string();
                    self.items
                        .push(Node::User(UserBubble::new(message.content.clone(), stamp)));
                }
                Role::Assistant => {
                    let steps = message
                        .thinking_steps
                        .iter()
                        .map(|s| {
                            ThoughtStep::new(
                                s.node.clone(),
                                s.display_name.clone(),
                                s.content.clone(),
                            )
                        })
                        .collect();
                    let done = !message.streaming;
                    self.items.push(Node::Assistant(AssistantBlock::new(
                        done,
                        steps,
                        message.content.clone(),
                        done,
                    )));
                }
            }
        }
        self.needs_layout = true;
        self.ensure_layout(self.width);
        self.scroll_to_bottom();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use ratatui::{Terminal, backend::TestBackend, buffer::Buffer, layout::Rect};

    fn render_conv(conv: &mut Conversation, width: u16, height: u16) -> Buffer {
        let backend = TestBackend::new(width, height);
        let mut terminal = Terminal::new(backend).unwrap();
        terminal
            .draw(|f| {
                conv.render(f, Rect::new(0, 0, width, height));
            })
            .unwrap();
        terminal.backend().buffer().clone()
    }

    fn buffer_to_debug_string(buf: &Buffer) -> String {
        let mut out = String::new();
        for y in buf.area.top()..buf.area.bottom() {
            let mut prev_fg = None;
            let mut prev_bg = None;
            for x in buf.area.left()..buf.area.right() {
                let c = buf.cell((x, y)).unwrap();
                let fg = c.style().fg;
                let bg = c.style().bg;
                if prev_fg != fg || prev_bg != bg {
                    let fg_str = fg.map(|c| format!("{:?}", c)).unwrap_or_else(|| "_".into());
                    let bg_str = bg.map(|c| format!("{:?}", c)).unwrap_or_else(|| "_".into());
                    out.push_str(&format!("[{},{}]", fg_str, bg_str));
                    prev_fg = fg;
                    prev_bg = bg;
                }
                out.push_str(c.symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn finished_turn_renders_bubble_steps_and_response() {
        let mut conv = Conversation::new();
        conv.items
            .push(Node::User(UserBubble::new("hi".into(), "10:30".into())));
        conv.items.push(Node::Assistant(AssistantBlock::new(
            false,
            vec![ThoughtStep::new("triage", "Triage", "fever and cough noted")],
            "ok".into(),
            true,
        )));
        conv.needs_layout = true;

        let buffer = render_conv(&mut conv, 24, 8);
        let dbg = buffer_to_debug_string(&buffer)
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n");
        assert_snapshot!(dbg, @r"[Reset,Reset]                    ╭──╮
[Reset,Reset]                    │hi│
[Reset,Reset]                    ╰──╯
[DarkGray,Reset]                   10:30
[Reset,Reset]Thought, 1 step ⌄
[Reset,Reset]· Triage
[Reset,Reset]│ fever and cough noted
[Reset,Reset]ok");
    }

    #[test]
    fn fold_builds_one_block_per_turn() {
        let mut conv = Conversation::new();
        conv.push_user("你好".into(), "09:15".into());
        conv.begin_step("triage".into(), "🏥 分诊评估".into());
        conv.append_thinking("triage", "分析");
        conv.append_thinking("triage", "中");
        conv.append_thinking("other", "dropped");
        conv.push_step("summary".into(), "总结".into(), "完成".into());
        conv.append_response("建议");
        conv.append_response("就诊");
        conv.finish_turn("");
        assert_eq!(conv.items.len(), 2);
        match &conv.items[1] {
            Node::Assistant(block) => {
                assert_eq!(block.steps.len(), 2);
                assert_eq!(block.steps[0].text, "分析中");
                assert_eq!(block.steps[1].text, "完成");
                assert_eq!(block.response, "建议就诊");
                assert!(block.done);
            }
            _ => panic!("expected assistant block"),
        }
    }

    #[test]
    fn finish_turn_fills_an_empty_response_from_the_final_text() {
        let mut conv = Conversation::new();
        conv.push_user("hi".into(), String::new());
        conv.begin_step("t".into(), "T".into());
        conv.finish_turn("final text");
        match &conv.items[1] {
            Node::Assistant(block) => {
                assert_eq!(block.response, "final text");
                assert!(block.done);
            }
            _ => panic!("expected assistant block"),
        }
    }

    #[test]
    fn a_new_turn_starts_a_fresh_block() {
        let mut conv = Conversation::new();
        conv.append_response("first");
        conv.finish_turn("");
        conv.push_user("again".into(), String::new());
        conv.append_response("second");
        assert_eq!(conv.items.len(), 3);
        match &conv.items[2] {
            Node::Assistant(block) => assert_eq!(block.response, "second"),
            _ => panic!("expected assistant block"),
        }
    }

    #[test]
    fn set_transcript_rebuilds_and_collapses_finished_replies() {
        let mut transcript = Transcript::new();
        transcript.push_user("头痛两天");
        transcript.begin_assistant();
        transcript.begin_step("triage", "分诊评估");
        transcript.append_thinking("triage", "评估中");
        transcript.append_response("建议神经内科就诊");
        transcript.finish("建议神经内科就诊");

        let mut conv = Conversation::new();
        conv.set_transcript(&transcript, "%H:%M");
        assert_eq!(conv.items.len(), 2);
        match &conv.items[1] {
            Node::Assistant(block) => {
                assert!(block.working_collapsed);
                assert!(block.done);
                assert_eq!(block.steps.len(), 1);
                assert_eq!(block.steps[0].display_name, "分诊评估");
                assert_eq!(block.response, "建议神经内科就诊");
            }
            _ => panic!("expected assistant block"),
        }
    }

    #[test]
    fn collapsing_block_adjusts_scroll() {
        let mut conv = Conversation::new();
        conv.items.push(Node::Assistant(AssistantBlock::new(
            false,
            vec![ThoughtStep::new(
                "n",
                "Node",
                "word1 word2 word3 word4 word5 word6 word7 word8 word9 word10 word11",
            )],
            String::new(),
            false,
        )));
        conv.items.push(Node::Assistant(AssistantBlock::new(
            false,
            vec![ThoughtStep::new(
                "n",
                "Node",
                "word1 word2 word3 word4 word5 word6 word7 word8 word9 word10 word11",
            )],
            String::new(),
            false,
        )));
        conv.items.push(Node::Assistant(AssistantBlock::new(
            false,
            Vec::new(),
            "hi".into(),
            true,
        )));
        conv.needs_layout = true;
        conv.viewport = 5;
        conv.ensure_layout(20);
        conv.scroll = 12;

        let _ = render_conv(&mut conv, 20, 5);

        let prev_scroll = conv.scroll;
        let (start, prev_height) = conv.layout[0];
        conv.items[0].click(0);
        conv.adjust_layout_after_change(0, start, prev_height);
        let new_height = conv.layout[0].1;
        let new_max = conv.total_height().saturating_sub(conv.viewport);
        let mut expected = prev_scroll;
        if start < expected {
            expected = expected.saturating_sub(prev_height - new_height);
        }
        assert_eq!(conv.scroll, expected.min(new_max));
        assert!(new_height < prev_height);
    }
}
