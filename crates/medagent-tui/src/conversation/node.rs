use ratatui::{Frame, layout::Rect};

use super::{assistant_block::AssistantBlock, user_bubble::UserBubble};

pub trait ConvNode {
    fn height(&mut self, width: u16) -> u16;
    fn render(
        &mut self,
        frame: &mut Frame,
        area: Rect,
        selected: bool,
        start: u16,
        max_height: u16,
    );
    fn activate(&mut self) {}
    fn click(&mut self, _line: u16) {
        self.activate();
    }
}

pub enum Node {
    User(UserBubble),
    Assistant(AssistantBlock),
}

impl ConvNode for Node {
    fn height(&mut self, width: u16) -> u16 {
        match self {
            Node::User(n) => n.height(width),
            Node::Assistant(n) => n.height(width),
        }
    }

    fn render(
        &mut self,
        frame: &mut Frame,
        area: Rect,
        selected: bool,
        start: u16,
        max_height: u16,
    ) {
        match self {
            Node::User(n) => n.render(frame, area, selected, start, max_height),
            Node::Assistant(n) => n.render(frame, area, selected, start, max_height),
        }
    }

    fn activate(&mut self) {
        match self {
            Node::User(n) => n.activate(),
            Node::Assistant(n) => n.activate(),
        }
    }

    fn click(&mut self, line: u16) {
        match self {
            Node::User(n) => n.click(line),
            Node::Assistant(n) => n.click(line),
        }
    }
}
