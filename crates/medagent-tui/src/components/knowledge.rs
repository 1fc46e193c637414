use std::path::PathBuf;

use crossterm::event::{Event, KeyCode, KeyEvent};
use medagent::{DocumentDetail, DocumentSummary, GraphView};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
};
use tokio::sync::{mpsc::UnboundedSender, watch};
use tui_textarea::{Input, TextArea};

use crate::app::Update;
use crate::component::Component;

use super::popup_rect;

#[derive(Clone, Copy, PartialEq)]
enum Focus {
    Documents,
    Entities,
    Relationships,
}

struct DocumentState {
    name: String,
    view: GraphView,
    has_graph: bool,
    entity_cursor: usize,
    relation_cursor: usize,
}

/// Document list plus an entity graph editor for the opened document.
/// Removing nodes or edges only touches the local view until `b` pushes
/// the edited graph to the backend.
pub struct KnowledgePane {
    update_tx: UnboundedSender<Update>,
    needs_redraw: watch::Sender<bool>,
    documents: Vec<DocumentSummary>,
    selected: usize,
    detail: Option<DocumentState>,
    upload: Option<TextArea<'static>>,
    confirm_delete: Option<String>,
    notice: Option<String>,
    busy: Option<&'static str>,
    focus: Focus,
}

impl KnowledgePane {
    pub fn new(update_tx: UnboundedSender<Update>, needs_redraw: watch::Sender<bool>) -> Self {
        Self {
            update_tx,
            needs_redraw,
            documents: Vec::new(),
            selected: 0,
            detail: None,
            upload: None,
            confirm_delete: None,
            notice: None,
            busy: None,
            focus: Focus::Documents,
        }
    }

    pub fn set_documents(&mut self, documents: Vec<DocumentSummary>) {
        self.documents = documents;
        if self.selected >= self.documents.len() {
            self.selected = self.documents.len().saturating_sub(1);
        }
        let _ = self.needs_redraw.send(true);
    }

    pub fn set_detail(&mut self, detail: DocumentDetail) {
        self.detail = Some(DocumentState {
            name: detail.document_name,
            view: GraphView::build(&detail.entities, &detail.relationships),
            has_graph: detail.has_knowledge_graph,
            entity_cursor: 0,
            relation_cursor: 0,
        });
        self.busy = None;
        let _ = self.needs_redraw.send(true);
    }

    /// Replace the opened document's graph with a fresh extraction.
    pub fn set_extraction(
        &mut self,
        entities: &[medagent::Entity],
        relationships: &[medagent::Relationship],
        message: String,
    ) {
        if let Some(detail) = self.detail.as_mut() {
            detail.view = GraphView::build(entities, relationships);
            detail.entity_cursor = 0;
            detail.relation_cursor = 0;
        }
        self.notice = Some(message);
        self.busy = None;
        let _ = self.needs_redraw.send(true);
    }

    pub fn mark_graph_built(&mut self) {
        if let Some(detail) = self.detail.as_mut() {
            detail.has_graph = true;
        }
    }

    pub fn remove_document(&mut self, name: &str, message: String) {
        self.documents.retain(|d| d.name != name);
        if self.selected >= self.documents.len() {
            self.selected = self.documents.len().saturating_sub(1);
        }
        if self.detail.as_ref().is_some_and(|d| d.name == name) {
            self.detail = None;
        }
        self.notice = Some(message);
        self.busy = None;
        let _ = self.needs_redraw.send(true);
    }

    pub fn set_notice(&mut self, message: String) {
        self.notice = Some(message);
        self.busy = None;
        let _ = self.needs_redraw.send(true);
    }

    pub fn clear_busy(&mut self) {
        self.busy = None;
    }

    pub fn capturing(&self) -> bool {
        self.upload.is_some() || self.confirm_delete.is_some()
    }

    fn send(&self, update: Update) {
        self.update_tx.send(update).ok();
        let _ = self.needs_redraw.send(true);
    }

    fn selected_document(&self) -> Option<&DocumentSummary> {
        self.documents.get(self.selected)
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if let Some(upload) = self.upload.as_mut() {
            match key.code {
                KeyCode::Esc => self.upload = None,
                KeyCode::Enter => {
                    let path = upload.lines().join(" ").trim().to_string();
                    self.upload = None;
                    if !path.is_empty() {
                        self.busy = Some("uploading");
                        self.send(Update::UploadDocument(PathBuf::from(path)));
                    }
                }
                _ => {
                    upload.input(Input::from(key));
                }
            }
            let _ = self.needs_redraw.send(true);
            return;
        }
        if let Some(name) = self.confirm_delete.clone() {
            match key.code {
                KeyCode::Char('y') => {
                    self.confirm_delete = None;
                    self.busy = Some("deleting");
                    self.send(Update::DeleteDocument(name));
                }
                KeyCode::Char('n') | KeyCode::Esc => {
                    self.confirm_delete = None;
                    let _ = self.needs_redraw.send(true);
                }
                _ => (),
            }
            return;
        }

        match key.code {
            KeyCode::Left => {
                self.focus = match self.focus {
                    Focus::Documents => Focus::Relationships,
                    Focus::Entities => Focus::Documents,
                    Focus::Relationships => Focus::Entities,
                };
                let _ = self.needs_redraw.send(true);
            }
            KeyCode::Right => {
                self.focus = match self.focus {
                    Focus::Documents => Focus::Entities,
                    Focus::Entities => Focus::Relationships,
                    Focus::Relationships => Focus::Documents,
                };
                let _ = self.needs_redraw.send(true);
            }
            KeyCode::Char('j') | KeyCode::Down => {
                self.move_cursor(1);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.move_cursor(-1);
            }
            KeyCode::Enter => {
                if self.focus == Focus::Documents {
                    if let Some(name) = self.selected_document().map(|d| d.name.clone()) {
                        self.busy = Some("loading");
                        self.send(Update::OpenDocument(name));
                    }
                }
            }
            KeyCode::Char('u') => {
                self.upload = Some(TextArea::default());
                let _ = self.needs_redraw.send(true);
            }
            KeyCode::Char('r') => {
                self.send(Update::LoadDocuments);
            }
            KeyCode::Char('x') => match self.focus {
                Focus::Documents => {
                    if let Some(name) = self.selected_document().map(|d| d.name.clone()) {
                        self.busy = Some("extracting");
                        self.send(Update::ExtractDocument(name));
                    }
                }
                Focus::Entities => self.remove_entity(),
                Focus::Relationships => self.remove_relationship(),
            },
            KeyCode::Char('b') => {
                if let Some(detail) = &self.detail {
                    if detail.view.is_empty() {
                        self.notice = Some("nothing to build, extract entities first".into());
                    } else {
                        self.busy = Some("building");
                        self.send(Update::BuildGraph(
                            detail.name.clone(),
                            detail.view.entities(),
                            detail.view.relationships(),
                        ));
                    }
                    let _ = self.needs_redraw.send(true);
                }
            }
            KeyCode::Char('d') => {
                if let Some(name) = self.selected_document().map(|d| d.name.clone()) {
                    self.confirm_delete = Some(name);
                    let _ = self.needs_redraw.send(true);
                }
            }
            KeyCode::Char('e') => {
                if let Some((name, has_graph)) = self
                    .selected_document()
                    .map(|d| (d.name.clone(), d.has_graph))
                {
                    if has_graph {
                        self.busy = Some("exporting");
                        self.send(Update::ExportDocument(name));
                    } else {
                        self.notice = Some("no graph to export yet".into());
                        let _ = self.needs_redraw.send(true);
                    }
                }
            }
            _ => (),
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let step = |cursor: usize, len: usize| -> usize {
            if len == 0 {
                return 0;
            }
            if delta > 0 {
                (cursor + 1) % len
            } else if cursor == 0 {
                len - 1
            } else {
                cursor - 1
            }
        };
        match self.focus {
            Focus::Documents => self.selected = step(self.selected, self.documents.len()),
            Focus::Entities => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.entity_cursor = step(detail.entity_cursor, detail.view.nodes.len());
                }
            }
            Focus::Relationships => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.relation_cursor = step(detail.relation_cursor, detail.view.edges.len());
                }
            }
        }
        let _ = self.needs_redraw.send(true);
    }

    /// Drop the entity under the cursor. Rebuilding the view also drops
    /// every relationship that referenced it.
    fn remove_entity(&mut self) {
        if let Some(detail) = self.detail.as_mut() {
            let mut entities = detail.view.entities();
            if detail.entity_cursor >= entities.len() {
                return;
            }
            entities.remove(detail.entity_cursor);
            detail.view = GraphView::build(&entities, &detail.view.relationships());
            detail.entity_cursor = detail.entity_cursor.min(entities.len().saturating_sub(1));
            detail.relation_cursor = detail
                .relation_cursor
                .min(detail.view.edges.len().saturating_sub(1));
            let _ = self.needs_redraw.send(true);
        }
    }

    fn remove_relationship(&mut self) {
        if let Some(detail) = self.detail.as_mut() {
            let mut relationships = detail.view.relationships();
            if detail.relation_cursor >= relationships.len() {
                return;
            }
            relationships.remove(detail.relation_cursor);
            detail.view = GraphView::build(&detail.view.entities(), &relationships);
            detail.relation_cursor = detail
                .relation_cursor
                .min(detail.view.edges.len().saturating_sub(1));
            let _ = self.needs_redraw.send(true);
        }
    }

    fn render_documents(&self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = self
            .documents
            .iter()
            .map(|doc| {
                if doc.has_graph {
                    ListItem::new(Line::from(vec![
                        Span::raw(doc.name.clone()),
                        Span::styled(" ✓", Style::default().fg(Color::Green)),
                    ]))
                } else {
                    ListItem::new(doc.name.clone())
                }
            })
            .collect();
        let border = if self.focus == Focus::Documents {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(border)
                    .title("Documents"),
            )
            .highlight_style(Style::default().bg(Color::Blue));
        let mut state = ListState::default();
        if !self.documents.is_empty() {
            state.select(Some(self.selected));
        }
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn meta_lines(&self) -> Vec<Line<'static>> {
        let dim = Style::default().fg(Color::DarkGray);
        let mut lines = Vec::new();
        match &self.detail {
            Some(detail) => {
                let flag = if detail.has_graph {
                    Span::styled(" graph built", Style::default().fg(Color::Green))
                } else {
                    Span::styled(" no graph yet", dim)
                };
                lines.push(Line::from(vec![Span::raw(detail.name.clone()), flag]));
                let mut counts = format!(
                    "{} entities, {} relationships",
                    detail.view.nodes.len(),
                    detail.view.edges.len()
                );
                if detail.view.dropped_relationships > 0 {
                    counts.push_str(&format!(
                        ", {} dropped",
                        detail.view.dropped_relationships
                    ));
                }
                lines.push(Line::from(counts));
                let types = detail
                    .view
                    .type_counts()
                    .into_iter()
                    .map(|(name, count)| format!("{name} {count}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                if !types.is_empty() {
                    lines.push(Line::from(Span::styled(types, dim)));
                }
            }
            None => {
                lines.push(Line::from(Span::styled(
                    "Enter opens a document, u uploads a PDF.",
                    dim,
                )));
            }
        }
        if let Some(busy) = self.busy {
            lines.push(Line::from(Span::styled(
                format!("{busy}…"),
                Style::default().fg(Color::Yellow),
            )));
        } else if let Some(notice) = &self.notice {
            lines.push(Line::from(notice.clone()));
        }
        lines
    }

    fn render_graph(&self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(5), Constraint::Min(1)].as_ref())
            .split(area);
        let meta = Paragraph::new(self.meta_lines())
            .block(Block::default().borders(Borders::ALL).title("Graph"));
        frame.render_widget(meta, chunks[0]);

        let halves = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
            .split(chunks[1]);

        let (entities, relationships, entity_cursor, relation_cursor) = match &self.detail {
            Some(detail) => {
                let entities: Vec<ListItem> = detail
                    .view
                    .nodes
                    .iter()
                    .map(|node| {
                        ListItem::new(Line::from(vec![
                            Span::raw(node.name.clone()),
                            Span::styled(
                                format!(" [{}] {}", node.entity_type, node.degree),
                                Style::default().fg(Color::DarkGray),
                            ),
                        ]))
                    })
                    .collect();
                let relationships: Vec<ListItem> = detail
                    .view
                    .edges
                    .iter()
                    .map(|edge| {
                        ListItem::new(Line::from(vec![
                            Span::raw(edge.source.clone()),
                            Span::styled(
                                format!(" {} ", edge.relation_type),
                                Style::default().fg(Color::DarkGray),
                            ),
                            Span::raw(edge.target.clone()),
                        ]))
                    })
                    .collect();
                (
                    entities,
                    relationships,
                    detail.entity_cursor,
                    detail.relation_cursor,
                )
            }
            None => (Vec::new(), Vec::new(), 0, 0),
        };

        let entity_border = if self.focus == Focus::Entities {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let entity_count = entities.len();
        let list = List::new(entities)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(entity_border)
                    .title("Entities"),
            )
            .highlight_style(Style::default().bg(Color::Blue));
        let mut state = ListState::default();
        if entity_count > 0 {
            state.select(Some(entity_cursor));
        }
        frame.render_stateful_widget(list, halves[0], &mut state);

        let relation_border = if self.focus == Focus::Relationships {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let relation_count = relationships.len();
        let list = List::new(relationships)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(relation_border)
                    .title("Relationships"),
            )
            .highlight_style(Style::default().bg(Color::Blue));
        let mut state = ListState::default();
        if relation_count > 0 {
            state.select(Some(relation_cursor));
        }
        frame.render_stateful_widget(list, halves[1], &mut state);
    }

    fn render_upload(&self, frame: &mut Frame, area: Rect) {
        if let Some(upload) = &self.upload {
            let popup = popup_rect(area, 60, 3);
            frame.render_widget(Clear, popup);
            let block = Block::default()
                .borders(Borders::ALL)
                .title("Path to PDF");
            let inner = block.inner(popup);
            frame.render_widget(block, popup);
            frame.render_widget(upload, inner);
        }
    }

    fn render_confirm(&self, frame: &mut Frame, area: Rect) {
        if let Some(name) = &self.confirm_delete {
            let message = format!("Delete {name} and its stored graph? y/n");
            let popup = popup_rect(area, message.chars().count() as u16 + 4, 3);
            frame.render_widget(Clear, popup);
            let paragraph = Paragraph::new(message).block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Red)),
            );
            frame.render_widget(paragraph, popup);
        }
    }
}

impl Component for KnowledgePane {
    fn handle_event(&mut self, event: Event) {
        if let Event::Key(key) = event {
            self.handle_key(key);
        }
    }

    fn render(&mut self, frame: &mut Frame, rect: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(30), Constraint::Percentage(70)].as_ref())
            .split(rect);
        self.render_documents(frame, chunks[0]);
        self.render_graph(frame, chunks[1]);
        self.render_upload(frame, rect);
        self.render_confirm(frame, rect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState, KeyModifiers};
    use serde_json::json;
    use tokio::sync::mpsc::unbounded_channel;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn pane() -> (
        KnowledgePane,
        tokio::sync::mpsc::UnboundedReceiver<Update>,
    ) {
        let (tx, rx) = unbounded_channel();
        let (redraw_tx, _redraw_rx) = watch::channel(false);
        (KnowledgePane::new(tx, redraw_tx), rx)
    }

    fn detail() -> DocumentDetail {
        serde_json::from_value(json!({
            "document_name": "指南",
            "entities": [
                {"name": "发热", "entity_type": "症状"},
                {"name": "肺炎", "entity_type": "疾病"}
            ],
            "relationships": [
                {"source": "发热", "target": "肺炎", "relation_type": "提示"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn removing_an_entity_drops_its_relationships() {
        let (mut pane, _rx) = pane();
        pane.set_detail(detail());
        pane.handle_key(key(KeyCode::Right));
        pane.handle_key(key(KeyCode::Char('x')));
        let state = pane.detail.as_ref().unwrap();
        assert_eq!(state.view.nodes.len(), 1);
        assert_eq!(state.view.nodes[0].name, "肺炎");
        assert!(state.view.edges.is_empty());
    }

    #[test]
    fn removing_a_relationship_keeps_the_entities() {
        let (mut pane, _rx) = pane();
        pane.set_detail(detail());
        pane.handle_key(key(KeyCode::Left));
        pane.handle_key(key(KeyCode::Char('x')));
        let state = pane.detail.as_ref().unwrap();
        assert_eq!(state.view.nodes.len(), 2);
        assert!(state.view.edges.is_empty());
    }

    #[test]
    fn upload_prompt_sends_the_trimmed_path() {
        let (mut pane, mut rx) = pane();
        pane.handle_key(key(KeyCode::Char('u')));
        assert!(pane.capturing());
        pane.upload.as_mut().unwrap().insert_str("  guide.pdf ");
        pane.handle_key(key(KeyCode::Enter));
        assert!(!pane.capturing());
        match rx.try_recv() {
            Ok(Update::UploadDocument(path)) => {
                assert_eq!(path, PathBuf::from("guide.pdf"));
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn building_an_empty_graph_is_rejected_locally() {
        let (mut pane, mut rx) = pane();
        pane.set_detail(
            serde_json::from_value(json!({"document_name": "空白"})).unwrap(),
        );
        pane.handle_key(key(KeyCode::Char('b')));
        assert!(rx.try_recv().is_err());
        assert!(pane.notice.is_some());
    }
}
