use crossterm::event::{Event, KeyCode, KeyEvent};
use medagent::{
    NewPatient, PatientRecord, PatientSummary, PatientUpdate, RecommendedTest, SubmittedTest,
};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use tokio::sync::{mpsc::UnboundedSender, watch};
use tui_textarea::{Input, TextArea};
use unicode_width::UnicodeWidthStr;

use crate::app::Update;
use crate::component::Component;

use super::popup_rect;

const RECORD_FIELDS: [&str; 5] = ["Name", "Age", "Gender", "Symptoms", "History"];

/// Patient roster on the left, the opened record on the right. Editing
/// happens in popup forms layered over both.
pub struct PatientsPane {
    update_tx: UnboundedSender<Update>,
    needs_redraw: watch::Sender<bool>,
    patients: Vec<PatientSummary>,
    selected: usize,
    record: Option<PatientRecord>,
    form: Option<RecordForm>,
    tests: Option<TestsForm>,
    confirm_delete: Option<String>,
    loading: bool,
    detail_scroll: u16,
}

impl PatientsPane {
    pub fn new(update_tx: UnboundedSender<Update>, needs_redraw: watch::Sender<bool>) -> Self {
        Self {
            update_tx,
            needs_redraw,
            patients: Vec::new(),
            selected: 0,
            record: None,
            form: None,
            tests: None,
            confirm_delete: None,
            loading: false,
            detail_scroll: 0,
        }
    }

    pub fn set_patients(&mut self, patients: Vec<PatientSummary>) {
        self.patients = patients;
        if self.selected >= self.patients.len() {
            self.selected = self.patients.len().saturating_sub(1);
        }
        self.loading = false;
        let _ = self.needs_redraw.send(true);
    }

    pub fn set_record(&mut self, record: PatientRecord) {
        self.record = Some(record);
        self.loading = false;
        self.detail_scroll = 0;
        let _ = self.needs_redraw.send(true);
    }

    pub fn record(&self) -> Option<&PatientRecord> {
        self.record.as_ref()
    }

    pub fn clear_loading(&mut self) {
        self.loading = false;
        let _ = self.needs_redraw.send(true);
    }

    /// Drop the opened record if it belongs to the given patient.
    pub fn close_record(&mut self, patient_id: &str) {
        if self
            .record
            .as_ref()
            .is_some_and(|r| r.patient_id == patient_id)
        {
            self.record = None;
            let _ = self.needs_redraw.send(true);
        }
    }

    /// Whether a popup is consuming keystrokes, so the app must not treat
    /// them as global bindings.
    pub fn capturing(&self) -> bool {
        self.form.is_some() || self.tests.is_some() || self.confirm_delete.is_some()
    }

    fn send(&self, update: Update) {
        self.update_tx.send(update).ok();
        let _ = self.needs_redraw.send(true);
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if let Some(patient_id) = self.confirm_delete.clone() {
            match key.code {
                KeyCode::Char('y') => {
                    self.confirm_delete = None;
                    self.send(Update::DeletePatient(patient_id));
                }
                KeyCode::Char('n') | KeyCode::Esc => {
                    self.confirm_delete = None;
                    let _ = self.needs_redraw.send(true);
                }
                _ => (),
            }
            return;
        }
        if let Some(form) = self.form.as_mut() {
            match form.handle_key(key) {
                FormAction::None => (),
                FormAction::Close => self.form = None,
                FormAction::Create(patient) => {
                    self.form = None;
                    self.send(Update::CreatePatient(patient));
                }
                FormAction::Save(patient_id, update) => {
                    self.form = None;
                    self.send(Update::SavePatient(patient_id, update));
                }
            }
            let _ = self.needs_redraw.send(true);
            return;
        }
        if let Some(tests) = self.tests.as_mut() {
            match tests.handle_key(key) {
                TestsAction::None => (),
                TestsAction::Close => self.tests = None,
                TestsAction::Submit(patient_id, results) => {
                    self.tests = None;
                    self.send(Update::SubmitTests(patient_id, results));
                }
            }
            let _ = self.needs_redraw.send(true);
            return;
        }

        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                if !self.patients.is_empty() {
                    self.selected = (self.selected + 1) % self.patients.len();
                    let _ = self.needs_redraw.send(true);
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                if !self.patients.is_empty() {
                    self.selected = if self.selected == 0 {
                        self.patients.len() - 1
                    } else {
                        self.selected - 1
                    };
                    let _ = self.needs_redraw.send(true);
                }
            }
            KeyCode::Enter => {
                if let Some(patient) = self.patients.get(self.selected) {
                    self.loading = true;
                    self.send(Update::OpenPatient(patient.patient_id.clone()));
                }
            }
            KeyCode::Char('r') => {
                self.loading = true;
                self.send(Update::LoadPatients);
            }
            KeyCode::Char('n') => {
                self.form = Some(RecordForm::blank());
                let _ = self.needs_redraw.send(true);
            }
            KeyCode::Char('e') => {
                if let Some(record) = &self.record {
                    self.form = Some(RecordForm::editing(record));
                    let _ = self.needs_redraw.send(true);
                }
            }
            KeyCode::Char('d') => {
                if let Some(patient) = self.patients.get(self.selected) {
                    self.confirm_delete = Some(patient.patient_id.clone());
                    let _ = self.needs_redraw.send(true);
                }
            }
            KeyCode::Char('t') => {
                if let Some(record) = &self.record {
                    if let Some(diagnosis) = &record.diagnosis_info {
                        if !diagnosis.recommended_tests.is_empty() {
                            self.tests = Some(TestsForm::new(
                                record.patient_id.clone(),
                                &diagnosis.recommended_tests,
                            ));
                            let _ = self.needs_redraw.send(true);
                        }
                    }
                }
            }
            KeyCode::PageDown => {
                self.detail_scroll = self.detail_scroll.saturating_add(5);
                let _ = self.needs_redraw.send(true);
            }
            KeyCode::PageUp => {
                self.detail_scroll = self.detail_scroll.saturating_sub(5);
                let _ = self.needs_redraw.send(true);
            }
            _ => (),
        }
    }

    fn render_list(&mut self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = self
            .patients
            .iter()
            .map(|patient| {
                let name = patient.patient_name.as_deref().unwrap_or("未命名患者");
                let mut details = Vec::new();
                if let Some(age) = patient.patient_age {
                    details.push(age.to_string());
                }
                if let Some(gender) = &patient.patient_gender {
                    details.push(gender.clone());
                }
                let line = if details.is_empty() {
                    Line::from(name.to_string())
                } else {
                    Line::from(vec![
                        Span::raw(name.to_string()),
                        Span::styled(
                            format!("  {}", details.join(" ")),
                            Style::default().fg(Color::DarkGray),
                        ),
                    ])
                };
                ListItem::new(line)
            })
            .collect();
        let title = if self.loading {
            "Patients (loading)"
        } else {
            "Patients"
        };
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().bg(Color::Blue));
        let mut state = ListState::default();
        if !self.patients.is_empty() {
            state.select(Some(self.selected));
        }
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn detail_lines(&self) -> Vec<Line<'static>> {
        let Some(record) = &self.record else {
            return vec![Line::from(Span::styled(
                "Press Enter on a patient to open its record.",
                Style::default().fg(Color::DarkGray),
            ))];
        };
        let heading = Style::default().add_modifier(Modifier::BOLD);
        let dim = Style::default().fg(Color::DarkGray);
        let mut lines = Vec::new();
        lines.push(Line::from(Span::styled(
            record.display_name().to_string(),
            heading,
        )));
        push_field(&mut lines, "ID", Some(record.patient_id.clone()));
        push_field(&mut lines, "Age", record.patient_age.map(|a| a.to_string()));
        push_field(&mut lines, "Gender", record.patient_gender.clone());
        push_field(&mut lines, "Symptoms", record.initial_symptoms.clone());
        push_field(&mut lines, "History", record.patient_history.clone());
        push_field(&mut lines, "Test results", record.test_results.clone());

        if let Some(triage) = &record.triage_info {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled("Triage", heading)));
            push_field(&mut lines, "Level", triage.triage_level.clone());
            push_field(
                &mut lines,
                "Department",
                triage.recommended_department.clone(),
            );
            push_field(&mut lines, "Basis", triage.triage_basis.clone());
            push_field(&mut lines, "Questions", triage.triage_questions.clone());
            push_field(&mut lines, "Time", triage.triage_time.clone());
        }

        if let Some(diagnosis) = &record.diagnosis_info {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled("Diagnosis", heading)));
            push_field(
                &mut lines,
                "Most likely",
                diagnosis.most_likely_disease.clone(),
            );
            push_field(
                &mut lines,
                "Confidence",
                diagnosis.confidence.map(|c| format!("{c}%")),
            );
            push_field(&mut lines, "Time", diagnosis.diagnosis_time.clone());
            if !diagnosis.recommended_tests.is_empty() {
                lines.push(Line::from(Span::styled("Recommended tests", dim)));
                for test in &diagnosis.recommended_tests {
                    let mark = if test.selected { "[x]" } else { "[ ]" };
                    lines.push(Line::from(format!("{mark} {}", test.test_name)));
                    if !test.test_description.is_empty() {
                        lines.push(Line::from(Span::styled(
                            format!("    {}", test.test_description),
                            dim,
                        )));
                    }
                    if let Some(result) = &test.result {
                        if !result.is_empty() {
                            lines.push(Line::from(format!("    result: {result}")));
                        }
                    }
                }
            }
            if !diagnosis.submitted_tests.is_empty() {
                lines.push(Line::from(Span::styled("Submitted tests", dim)));
                for test in &diagnosis.submitted_tests {
                    lines.push(Line::from(format!("{}: {}", test.test_name, test.result)));
                }
            }
        }

        if let Some(expert) = &record.expert_consultation {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled("Expert consultation", heading)));
            push_field(&mut lines, "Date", expert.consultation_date.clone());
            push_field(
                &mut lines,
                "Diagnostics",
                expert.diagnostic_expert_opinion.clone(),
            );
            push_field(&mut lines, "Imaging", expert.imaging_expert_opinion.clone());
            push_field(
                &mut lines,
                "Treatment",
                expert.treatment_expert_opinion.clone(),
            );
            push_field(&mut lines, "Final diagnosis", expert.final_diagnosis.clone());
            push_field(&mut lines, "Plan", expert.treatment_plan.clone());
            push_field(&mut lines, "Prognosis", expert.prognosis.clone());
        }
        lines
    }

    fn render_detail(&mut self, frame: &mut Frame, area: Rect) {
        let paragraph = Paragraph::new(self.detail_lines())
            .block(Block::default().borders(Borders::ALL).title("Record"))
            .wrap(Wrap { trim: false })
            .scroll((self.detail_scroll, 0));
        frame.render_widget(paragraph, area);
    }

    fn render_confirm(&self, frame: &mut Frame, area: Rect) {
        let message = "Delete this patient? y/n";
        let popup = popup_rect(area, message.width() as u16 + 4, 3);
        frame.render_widget(Clear, popup);
        let paragraph = Paragraph::new(message).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red)),
        );
        frame.render_widget(paragraph, popup);
    }
}

impl Component for PatientsPane {
    fn handle_event(&mut self, event: Event) {
        if let Event::Key(key) = event {
            self.handle_key(key);
        }
    }

    fn render(&mut self, frame: &mut Frame, rect: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
            .split(rect);
        self.render_list(frame, chunks[0]);
        self.render_detail(frame, chunks[1]);
        if let Some(form) = &mut self.form {
            form.render(frame, rect);
        }
        if let Some(tests) = &mut self.tests {
            tests.render(frame, rect);
        }
        if self.confirm_delete.is_some() {
            self.render_confirm(frame, rect);
        }
    }
}

fn push_field(lines: &mut Vec<Line<'static>>, label: &str, value: Option<String>) {
    if let Some(value) = value {
        if value.is_empty() {
            return;
        }
        lines.push(Line::from(vec![
            Span::styled(format!("{label}: "), Style::default().fg(Color::DarkGray)),
            Span::raw(value),
        ]));
    }
}

#[derive(Debug)]
enum FormAction {
    None,
    Close,
    Create(NewPatient),
    Save(String, PatientUpdate),
}

/// Create or edit form. Creation only covers the intake fields, editing
/// exposes the history as well.
struct RecordForm {
    patient_id: Option<String>,
    fields: Vec<TextArea<'static>>,
    focus: usize,
    error: Option<String>,
}

impl RecordForm {
    fn blank() -> Self {
        Self {
            patient_id: None,
            fields: (0..4).map(|_| TextArea::default()).collect(),
            focus: 0,
            error: None,
        }
    }

    fn editing(record: &PatientRecord) -> Self {
        let mut form = Self {
            patient_id: Some(record.patient_id.clone()),
            fields: (0..5).map(|_| TextArea::default()).collect(),
            focus: 0,
            error: None,
        };
        form.prefill(0, record.patient_name.as_deref());
        form.prefill(1, record.patient_age.map(|a| a.to_string()).as_deref());
        form.prefill(2, record.patient_gender.as_deref());
        form.prefill(3, record.initial_symptoms.as_deref());
        form.prefill(4, record.patient_history.as_deref());
        form
    }

    fn prefill(&mut self, idx: usize, value: Option<&str>) {
        if let Some(value) = value {
            self.fields[idx].insert_str(value);
        }
    }

    fn labels(&self) -> &'static [&'static str] {
        if self.patient_id.is_some() {
            &RECORD_FIELDS
        } else {
            &RECORD_FIELDS[..4]
        }
    }

    fn value(&self, idx: usize) -> String {
        self.fields[idx].lines().join(" ").trim().to_string()
    }

    fn handle_key(&mut self, key: KeyEvent) -> FormAction {
        match key.code {
            KeyCode::Esc => return FormAction::Close,
            KeyCode::Tab | KeyCode::Down => {
                self.focus = (self.focus + 1) % self.fields.len();
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.focus = if self.focus == 0 {
                    self.fields.len() - 1
                } else {
                    self.focus - 1
                };
            }
            KeyCode::Enter => match self.submit_payload() {
                Ok(action) => return action,
                Err(message) => self.error = Some(message),
            },
            _ => {
                self.fields[self.focus].input(Input::from(key));
            }
        }
        FormAction::None
    }

    fn submit_payload(&self) -> Result<FormAction, String> {
        let name = self.value(0);
        if name.is_empty() {
            return Err("Name is required".into());
        }
        let age: u32 = self
            .value(1)
            .parse()
            .map_err(|_| "Age must be a whole number".to_string())?;
        let gender = self.value(2);
        let symptoms = self.value(3);
        let action = match &self.patient_id {
            None => FormAction::Create(NewPatient {
                patient_name: name,
                patient_age: age,
                patient_gender: (!gender.is_empty()).then_some(gender),
                initial_symptoms: (!symptoms.is_empty()).then_some(symptoms),
            }),
            Some(patient_id) => {
                let history = self.value(4);
                FormAction::Save(
                    patient_id.clone(),
                    PatientUpdate {
                        patient_name: Some(name),
                        patient_age: Some(age),
                        patient_gender: (!gender.is_empty()).then_some(gender),
                        initial_symptoms: (!symptoms.is_empty()).then_some(symptoms),
                        patient_history: (!history.is_empty()).then_some(history),
                        test_results: None,
                    },
                )
            }
        };
        Ok(action)
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let labels = self.labels();
        let error_rows = u16::from(self.error.is_some());
        let popup = popup_rect(area, 48, labels.len() as u16 + 2 + error_rows);
        frame.render_widget(Clear, popup);
        let title = if self.patient_id.is_some() {
            "Edit patient"
        } else {
            "New patient"
        };
        let block = Block::default().borders(Borders::ALL).title(title);
        let inner = block.inner(popup);
        frame.render_widget(block, popup);
        let mut rows = vec![Constraint::Length(1); labels.len()];
        if error_rows > 0 {
            rows.push(Constraint::Length(1));
        }
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(rows)
            .split(inner);
        for (idx, label) in labels.iter().enumerate() {
            let row = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Length(10), Constraint::Min(1)].as_ref())
                .split(chunks[idx]);
            let label_style = if idx == self.focus {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            frame.render_widget(
                Paragraph::new(format!("{label}:")).style(label_style),
                row[0],
            );
            if idx == self.focus {
                frame.render_widget(&self.fields[idx], row[1]);
            } else {
                frame.render_widget(Paragraph::new(self.fields[idx].lines().join(" ")), row[1]);
            }
        }
        if let Some(error) = &self.error {
            frame.render_widget(
                Paragraph::new(error.as_str()).style(Style::default().fg(Color::Red)),
                chunks[labels.len()],
            );
        }
    }
}

enum TestsAction {
    None,
    Close,
    Submit(String, Vec<SubmittedTest>),
}

/// Checklist over the recommended tests, with an inline result editor for
/// the selected row.
struct TestsForm {
    patient_id: String,
    rows: Vec<TestRow>,
    selected_row: usize,
    editing: bool,
    error: Option<String>,
}

struct TestRow {
    test_name: String,
    test_description: String,
    selected: bool,
    result: TextArea<'static>,
}

impl TestsForm {
    fn new(patient_id: String, tests: &[RecommendedTest]) -> Self {
        let rows = tests
            .iter()
            .map(|test| {
                let mut result = TextArea::default();
                if let Some(existing) = &test.result {
                    result.insert_str(existing);
                }
                TestRow {
                    test_name: test.test_name.clone(),
                    test_description: test.test_description.clone(),
                    selected: test.selected,
                    result,
                }
            })
            .collect();
        Self {
            patient_id,
            rows,
            selected_row: 0,
            editing: false,
            error: None,
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> TestsAction {
        if self.editing {
            match key.code {
                KeyCode::Enter | KeyCode::Esc => self.editing = false,
                _ => {
                    self.rows[self.selected_row].result.input(Input::from(key));
                }
            }
            return TestsAction::None;
        }
        match key.code {
            KeyCode::Esc => return TestsAction::Close,
            KeyCode::Char('j') | KeyCode::Down => {
                self.selected_row = (self.selected_row + 1) % self.rows.len();
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected_row = if self.selected_row == 0 {
                    self.rows.len() - 1
                } else {
                    self.selected_row - 1
                };
            }
            KeyCode::Char(' ') => {
                let row = &mut self.rows[self.selected_row];
                row.selected = !row.selected;
            }
            KeyCode::Enter => {
                self.rows[self.selected_row].selected = true;
                self.editing = true;
            }
            KeyCode::Char('s') => match self.submit_payload() {
                Ok((patient_id, results)) => return TestsAction::Submit(patient_id, results),
                Err(message) => self.error = Some(message),
            },
            _ => (),
        }
        TestsAction::None
    }

    fn submit_payload(&self) -> Result<(String, Vec<SubmittedTest>), String> {
        let mut results = Vec::new();
        for row in &self.rows {
            if !row.selected {
                continue;
            }
            let result = row.result.lines().join(" ").trim().to_string();
            if result.is_empty() {
                return Err(format!("{} needs a result", row.test_name));
            }
            results.push(SubmittedTest {
                test_name: row.test_name.clone(),
                test_description: row.test_description.clone(),
                result,
            });
        }
        if results.is_empty() {
            return Err("Select at least one test".into());
        }
        Ok((self.patient_id.clone(), results))
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let popup = popup_rect(area, 56, self.rows.len() as u16 + 3);
        frame.render_widget(Clear, popup);
        let block = Block::default().borders(Borders::ALL).title("Test results");
        let inner = block.inner(popup);
        frame.render_widget(block, popup);
        let mut constraints = vec![Constraint::Length(1); self.rows.len()];
        constraints.push(Constraint::Length(1));
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(inner);
        for (idx, row) in self.rows.iter().enumerate() {
            let mark = if row.selected { "[x]" } else { "[ ]" };
            let style = if idx == self.selected_row {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            let label = format!("{mark} {}: ", row.test_name);
            if idx == self.selected_row && self.editing {
                let split = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints(
                        [
                            Constraint::Length(label.width() as u16),
                            Constraint::Min(1),
                        ]
                        .as_ref(),
                    )
                    .split(chunks[idx]);
                frame.render_widget(Paragraph::new(label).style(style), split[0]);
                frame.render_widget(&row.result, split[1]);
            } else {
                let text = format!("{label}{}", row.result.lines().join(" "));
                frame.render_widget(Paragraph::new(text).style(style), chunks[idx]);
            }
        }
        let footer = match &self.error {
            Some(error) => Span::styled(error.clone(), Style::default().fg(Color::Red)),
            None => Span::styled(
                "space select, enter edit, s submit",
                Style::default().fg(Color::DarkGray),
            ),
        };
        frame.render_widget(Paragraph::new(Line::from(footer)), chunks[self.rows.len()]);
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

    fn record() -> PatientRecord {
        serde_json::from_value(json!({
            "patient_id": "p1",
            "created_at": "2025-03-01T09:00:00",
            "updated_at": "2025-03-01T09:00:00",
            "patient_name": "张三",
            "patient_age": 45,
            "patient_gender": "男",
            "initial_symptoms": "发热三天"
        }))
        .unwrap()
    }

    #[test]
    fn record_form_requires_a_name() {
        let mut form = RecordForm::blank();
        form.fields[1].insert_str("40");
        assert_eq!(form.submit_payload().err(), Some("Name is required".into()));
    }

    #[test]
    fn record_form_rejects_a_bad_age() {
        let mut form = RecordForm::blank();
        form.fields[0].insert_str("张三");
        form.fields[1].insert_str("forty");
        assert_eq!(
            form.submit_payload().err(),
            Some("Age must be a whole number".into())
        );
    }

    #[test]
    fn record_form_builds_a_create_payload() {
        let mut form = RecordForm::blank();
        form.fields[0].insert_str("张三");
        form.fields[1].insert_str("45");
        form.fields[3].insert_str("发热三天");
        match form.submit_payload() {
            Ok(FormAction::Create(patient)) => {
                assert_eq!(patient.patient_name, "张三");
                assert_eq!(patient.patient_age, 45);
                assert_eq!(patient.patient_gender, None);
                assert_eq!(patient.initial_symptoms.as_deref(), Some("发热三天"));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn record_form_builds_an_update_payload() {
        let form = RecordForm::editing(&record());
        match form.submit_payload() {
            Ok(FormAction::Save(patient_id, update)) => {
                assert_eq!(patient_id, "p1");
                assert_eq!(update.patient_name.as_deref(), Some("张三"));
                assert_eq!(update.patient_age, Some(45));
                assert_eq!(update.patient_gender.as_deref(), Some("男"));
                assert_eq!(update.patient_history, None);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn tests_form_requires_results_for_selected_rows() {
        let tests: Vec<RecommendedTest> = serde_json::from_value(json!([
            {"test_name": "血常规", "test_description": "CBC"},
            {"test_name": "胸部CT", "test_description": ""}
        ]))
        .unwrap();
        let mut form = TestsForm::new("p1".into(), &tests);
        assert_eq!(
            form.submit_payload().err(),
            Some("Select at least one test".into())
        );
        form.rows[0].selected = true;
        assert_eq!(
            form.submit_payload().err(),
            Some("血常规 needs a result".into())
        );
        form.rows[0].result.insert_str("白细胞偏高");
        let (patient_id, results) = form.submit_payload().unwrap();
        assert_eq!(patient_id, "p1");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].test_name, "血常规");
        assert_eq!(results[0].result, "白细胞偏高");
    }

    #[test]
    fn delete_needs_a_confirmation() {
        let (tx, mut rx) = unbounded_channel();
        let (redraw_tx, _redraw_rx) = watch::channel(false);
        let mut pane = PatientsPane::new(tx, redraw_tx);
        pane.set_patients(vec![
            serde_json::from_value(json!({"patient_id": "p1", "patient_name": "张三"})).unwrap(),
        ]);
        pane.handle_key(key(KeyCode::Char('d')));
        assert!(pane.capturing());
        pane.handle_key(key(KeyCode::Char('y')));
        assert!(!pane.capturing());
        match rx.try_recv() {
            Ok(Update::DeletePatient(patient_id)) => assert_eq!(patient_id, "p1"),
            other => panic!("unexpected update: {other:?}"),
        }
    }
}
