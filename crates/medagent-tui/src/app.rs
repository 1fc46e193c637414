use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    component::Component,
    components::{ErrorPopup, KnowledgePane, PatientsPane, Prompt, input::PromptModel},
    config::Config,
    conversation::Conversation,
};
use chrono::Local;
use crossterm::event::{Event, KeyCode, KeyModifiers};
use medagent::{
    ApiClient, BuildOutcome, ChatBackend, ChatSession, DeleteOptions, DeleteOutcome,
    DocumentDetail, DocumentSummary, Entity, ExtractOutcome, NewPatient, PatientRecord,
    PatientSummary, PatientUpdate, Relationship, StreamEvent, SubmittedTest, TurnUpdate,
    UploadOutcome, chat_event_stream,
};
use ratatui::{prelude::*, widgets::Paragraph};
use tokio::{
    sync::{
        mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
        watch,
    },
    task::JoinSet,
};
use tokio_stream::{StreamExt, wrappers::WatchStream};
use tracing::warn;
use tui_realm_stdlib::states::SpinnerStates;
use unicode_width::UnicodeWidthStr;

#[derive(Clone, Copy, PartialEq)]
enum Screen {
    Patients,
    Chat,
    Knowledge,
}

impl Screen {
    fn label(self) -> &'static str {
        match self {
            Screen::Patients => "patients",
            Screen::Chat => "chat",
            Screen::Knowledge => "knowledge",
        }
    }

    fn next(self) -> Self {
        match self {
            Screen::Patients => Screen::Chat,
            Screen::Chat => Screen::Knowledge,
            Screen::Knowledge => Screen::Patients,
        }
    }
}

enum ConversationState {
    Idle,
    Waiting,
    Thinking,
    Responding,
}

pub struct App {
    pub model: AppModel,
    screen: Screen,
    conversation: Conversation,
    prompt: Prompt,
    patients: PatientsPane,
    knowledge: KnowledgePane,

    client: Arc<ApiClient>,
    session: Option<ChatSession>,
    state: ConversationState,
    spinner: SpinnerStates,
    config: Config,
    last_sent: Option<String>,

    tasks: JoinSet<()>,
    request_tasks: JoinSet<()>,
    update_tx: UnboundedSender<Update>,
    update_rx: UnboundedReceiver<Update>,
    ignore_responses: bool,
    error: ErrorPopup,
}

pub struct AppModel {
    pub needs_update: watch::Sender<bool>,
    pub needs_redraw: watch::Sender<bool>,
    pub should_quit: watch::Sender<bool>,
}

#[derive(Debug)]
pub(crate) enum Update {
    Prompt(String),
    AbortTurn,
    LoadPatients,
    OpenPatient(String),
    CreatePatient(NewPatient),
    SavePatient(String, PatientUpdate),
    DeletePatient(String),
    SubmitTests(String, Vec<SubmittedTest>),
    RefreshPatient(String),
    LoadDocuments,
    OpenDocument(String),
    UploadDocument(PathBuf),
    ExtractDocument(String),
    BuildGraph(String, Vec<Entity>, Vec<Relationship>),
    DeleteDocument(String),
    ExportDocument(String),

    Patients(Vec<PatientSummary>),
    PatientOpened(Box<PatientRecord>),
    PatientSaved(Box<PatientRecord>),
    PatientRefreshed(Box<PatientRecord>),
    PatientDeleted(String),
    TestsSubmitted(Box<PatientRecord>),
    Turn(StreamEvent),
    TurnComplete,
    TurnFailed(String),
    Documents(Vec<DocumentSummary>),
    DocumentLoaded(Box<DocumentDetail>),
    Uploaded(UploadOutcome),
    Extracted(Box<ExtractOutcome>),
    Built(BuildOutcome),
    DocumentDeleted(String, DeleteOutcome),
    Exported(PathBuf),
    Error(String),
}

impl App {
    pub fn new(model: AppModel, config: Config) -> Self {
        let (update_tx, update_rx) = unbounded_channel();
        let client = Arc::new(ApiClient::new(config.server.base_url.clone()));
        let mut spinner = SpinnerStates::default();
        spinner.reset("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        let needs_redraw = model.needs_redraw.clone();
        App {
            screen: Screen::Patients,
            conversation: Conversation::default(),
            prompt: Prompt::new(PromptModel {
                needs_redraw: model.needs_redraw.clone(),
                needs_update: model.needs_update.clone(),
            }),
            patients: PatientsPane::new(update_tx.clone(), model.needs_redraw.clone()),
            knowledge: KnowledgePane::new(update_tx.clone(), model.needs_redraw.clone()),
            model,
            client,
            session: None,
            state: ConversationState::Idle,
            spinner,
            config,
            last_sent: None,
            tasks: JoinSet::new(),
            request_tasks: JoinSet::new(),
            update_tx,
            update_rx,
            ignore_responses: false,
            error: ErrorPopup::new(needs_redraw),
        }
    }

    fn time_format(&self) -> &str {
        &self.config.display.time_format
    }

    fn pane_capturing(&self) -> bool {
        match self.screen {
            Screen::Patients => self.patients.capturing(),
            Screen::Chat => false,
            Screen::Knowledge => self.knowledge.capturing(),
        }
    }

    fn in_flight(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.in_flight())
    }

    /// Spawn one API call and post its outcome back onto the update channel.
    fn spawn_api<F, T, W>(&mut self, fut: F, wrap: W)
    where
        F: Future<Output = medagent::Result<T>> + Send + 'static,
        T: Send + 'static,
        W: FnOnce(T) -> Update + Send + 'static,
    {
        let update_tx = self.update_tx.clone();
        let needs_update = self.model.needs_update.clone();
        self.tasks.spawn(async move {
            match fut.await {
                Ok(value) => {
                    let _ = update_tx.send(wrap(value));
                }
                Err(err) => {
                    let _ = update_tx.send(Update::Error(err.to_string()));
                }
            }
            let _ = needs_update.send(true);
        });
    }

    fn send_chat(&mut self, text: String) {
        let Some(session) = self.session.as_mut() else {
            self.error.set("open a patient before chatting".to_string());
            let _ = self.model.needs_redraw.send(true);
            return;
        };
        let request = match session.begin_turn(&text) {
            Ok(request) => request,
            Err(err) => {
                self.error.set(err.to_string());
                let _ = self.model.needs_redraw.send(true);
                return;
            }
        };
        let stamp = Local::now().format(self.time_format()).to_string();
        self.last_sent = Some(text.clone());
        self.conversation.push_user(text, stamp);
        self.state = ConversationState::Waiting;
        let _ = self.model.needs_redraw.send(true);

        self.ignore_responses = false;
        let update_tx = self.update_tx.clone();
        let needs_update = self.model.needs_update.clone();
        let client = self.client.clone() as Arc<dyn ChatBackend>;
        self.request_tasks.spawn(async move {
            let (mut stream, handle) = chat_event_stream(client, request);
            while let Some(event) = stream.next().await {
                let _ = update_tx.send(Update::Turn(event));
                let _ = needs_update.send(true);
            }
            match handle.await {
                Ok(Ok(())) => {
                    let _ = update_tx.send(Update::TurnComplete);
                }
                Ok(Err(err)) => {
                    let _ = update_tx.send(Update::TurnFailed(err.to_string()));
                }
                Err(err) => {
                    let _ = update_tx.send(Update::TurnFailed(err.to_string()));
                }
            }
            let _ = needs_update.send(true);
        });
    }

    fn apply_turn(&mut self, event: StreamEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.apply(&event) {
            TurnUpdate::Progress => {
                match &event {
                    StreamEvent::Start | StreamEvent::ThinkingStart => {
                        self.state = ConversationState::Thinking;
                    }
                    StreamEvent::ThinkingStepStart { node, display_name } => {
                        self.state = ConversationState::Thinking;
                        self.conversation
                            .begin_step(node.clone(), display_name.clone());
                    }
                    StreamEvent::ThinkingChunk { node, content } => {
                        self.state = ConversationState::Thinking;
                        self.conversation.append_thinking(node, content);
                    }
                    StreamEvent::ThinkingStep {
                        node,
                        display_name,
                        content,
                    } => {
                        self.conversation.push_step(
                            node.clone(),
                            display_name.clone(),
                            content.clone(),
                        );
                    }
                    StreamEvent::ResponseStart => {
                        self.state = ConversationState::Responding;
                    }
                    StreamEvent::ResponseChunk { content } => {
                        self.state = ConversationState::Responding;
                        self.conversation.append_response(content);
                    }
                    _ => (),
                }
                let _ = self.model.needs_redraw.send(true);
            }
            TurnUpdate::Finished => {
                let final_response = session
                    .transcript()
                    .messages()
                    .last()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                let patient_id = session.patient_id().to_string();
                self.conversation.finish_turn(&final_response);
                self.state = ConversationState::Idle;
                self.last_sent = None;
                // The reply may have updated triage or diagnosis data.
                let _ = self.update_tx.send(Update::RefreshPatient(patient_id));
                let _ = self.update_tx.send(Update::LoadPatients);
                let _ = self.model.needs_redraw.send(true);
            }
            TurnUpdate::Failed(message) => {
                let time_format = self.config.display.time_format.clone();
                self.conversation
                    .set_transcript(session.transcript(), &time_format);
                self.error.set(message);
                self.state = ConversationState::Idle;
                let _ = self.model.needs_redraw.send(true);
                self.restore_prompt();
            }
            TurnUpdate::Ignored => (),
        }
    }

    /// Put the message of a rolled-back turn back into the input.
    fn restore_prompt(&mut self) {
        if let Some(text) = self.last_sent.take() {
            self.prompt.set_prompt(text);
        }
    }

    fn abort_requests(&mut self) {
        self.request_tasks.abort_all();
        self.request_tasks = JoinSet::new();
        self.ignore_responses = true;
    }

    /// Make `patient` the chat target, seeding the transcript from the
    /// stored conversation history. Any running turn is dropped first.
    fn open_session(&mut self, record: &PatientRecord) {
        self.abort_requests();
        if let Some(session) = self.session.as_mut() {
            session.cancel();
        }
        let session = ChatSession::with_history(
            record.patient_id.clone(),
            &record.conversation_history,
        );
        let time_format = self.config.display.time_format.clone();
        self.conversation
            .set_transcript(session.transcript(), &time_format);
        self.session = Some(session);
        self.state = ConversationState::Idle;
        self.last_sent = None;
    }
}

impl Component for App {
    fn init(&mut self) {
        let needs_update = self.model.needs_update.clone();
        let update_tx = self.update_tx.clone();
        let mut new_prompts = WatchStream::new(self.prompt.submitted_prompt_rx());
        self.tasks.spawn(async move {
            loop {
                if let Some(prompt) = new_prompts.next().await {
                    let _ = update_tx.send(Update::Prompt(prompt));
                    let _ = needs_update.send(true);
                } else {
                    break;
                }
            }
        });
        let _ = self.update_tx.send(Update::LoadPatients);
        let _ = self.update_tx.send(Update::LoadDocuments);
        let _ = self.model.needs_update.send(true);
    }

    fn handle_event(&mut self, event: Event) {
        self.error.handle_event(event.clone());
        match event {
            Event::Key(key) => {
                if key.code == KeyCode::Tab
                    && key.modifiers == KeyModifiers::NONE
                    && !self.pane_capturing()
                {
                    self.screen = self.screen.next();
                    let _ = self.model.needs_redraw.send(true);
                    return;
                }
                match self.screen {
                    Screen::Chat => {
                        if key.code == KeyCode::Esc && self.in_flight() {
                            let _ = self.update_tx.send(Update::AbortTurn);
                            let _ = self.model.needs_update.send(true);
                            return;
                        }
                        self.prompt.handle_event(Event::Key(key));
                    }
                    Screen::Patients => {
                        if key.code == KeyCode::Char('q') && !self.patients.capturing() {
                            let _ = self.model.should_quit.send(true);
                            return;
                        }
                        self.patients.handle_event(Event::Key(key));
                    }
                    Screen::Knowledge => {
                        if key.code == KeyCode::Char('q') && !self.knowledge.capturing() {
                            let _ = self.model.should_quit.send(true);
                            return;
                        }
                        self.knowledge.handle_event(Event::Key(key));
                    }
                }
            }
            Event::Mouse(_) => {
                if self.screen == Screen::Chat {
                    self.conversation.handle_event(event);
                    let _ = self.model.needs_redraw.send(true);
                }
            }
            Event::Paste(_) => {
                if self.screen == Screen::Chat {
                    self.prompt.handle_event(event);
                }
            }
            _ => (),
        }
    }

    fn update(&mut self) {
        self.conversation.update();
        self.prompt.update();
        self.error.update();

        loop {
            match self.update_rx.try_recv() {
                Ok(Update::Prompt(prompt)) => {
                    if !prompt.is_empty() {
                        self.send_chat(prompt);
                    }
                }
                Ok(Update::AbortTurn) => {
                    self.abort_requests();
                    if let Some(session) = self.session.as_mut() {
                        session.cancel();
                        let time_format = self.config.display.time_format.clone();
                        self.conversation
                            .set_transcript(session.transcript(), &time_format);
                    }
                    self.state = ConversationState::Idle;
                    let _ = self.model.needs_redraw.send(true);
                    self.restore_prompt();
                }
                Ok(Update::Turn(event)) => {
                    if !self.ignore_responses {
                        self.apply_turn(event);
                    }
                }
                Ok(Update::TurnComplete) => {
                    // Stream closed without a terminal record.
                    if self.in_flight() {
                        if let Some(session) = self.session.as_mut() {
                            session.fail("reply stream ended early");
                            let time_format = self.config.display.time_format.clone();
                            self.conversation
                                .set_transcript(session.transcript(), &time_format);
                        }
                        self.error.set("reply stream ended early".to_string());
                        self.restore_prompt();
                    }
                    self.state = ConversationState::Idle;
                    let _ = self.model.needs_redraw.send(true);
                }
                Ok(Update::TurnFailed(message)) => {
                    warn!("turn failed: {message}");
                    if let Some(session) = self.session.as_mut() {
                        if let TurnUpdate::Failed(message) = session.fail(message) {
                            let time_format = self.config.display.time_format.clone();
                            self.conversation
                                .set_transcript(session.transcript(), &time_format);
                            self.error.set(message);
                            self.restore_prompt();
                        }
                    }
                    self.state = ConversationState::Idle;
                    let _ = self.model.needs_redraw.send(true);
                }
                Ok(Update::LoadPatients) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.list_patients().await },
                        Update::Patients,
                    );
                }
                Ok(Update::Patients(patients)) => {
                    self.patients.set_patients(patients);
                }
                Ok(Update::OpenPatient(patient_id)) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.get_patient(&patient_id).await },
                        |record| Update::PatientOpened(Box::new(record)),
                    );
                }
                Ok(Update::PatientOpened(record)) => {
                    let record = *record;
                    self.open_session(&record);
                    self.patients.set_record(record);
                    self.screen = Screen::Chat;
                    let _ = self.model.needs_redraw.send(true);
                }
                Ok(Update::CreatePatient(patient)) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.create_patient(&patient).await },
                        |record| Update::PatientSaved(Box::new(record)),
                    );
                }
                Ok(Update::SavePatient(patient_id, update)) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.update_patient(&patient_id, &update).await },
                        |record| Update::PatientSaved(Box::new(record)),
                    );
                }
                Ok(Update::PatientSaved(record)) => {
                    let record = *record;
                    if !self.in_flight() {
                        self.open_session(&record);
                    }
                    self.patients.set_record(record);
                    let _ = self.update_tx.send(Update::LoadPatients);
                    let _ = self.model.needs_redraw.send(true);
                }
                Ok(Update::DeletePatient(patient_id)) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.delete_patient(&patient_id).await },
                        |confirmation| Update::PatientDeleted(confirmation.patient_id),
                    );
                }
                Ok(Update::PatientDeleted(patient_id)) => {
                    if self
                        .session
                        .as_ref()
                        .is_some_and(|s| s.patient_id() == patient_id)
                    {
                        self.abort_requests();
                        self.session = None;
                        self.conversation.clear();
                        self.state = ConversationState::Idle;
                        if self.screen == Screen::Chat {
                            self.screen = Screen::Patients;
                        }
                    }
                    self.patients.close_record(&patient_id);
                    let _ = self.update_tx.send(Update::LoadPatients);
                    let _ = self.model.needs_redraw.send(true);
                }
                Ok(Update::SubmitTests(patient_id, results)) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.submit_test_results(&patient_id, &results).await },
                        |record| Update::TestsSubmitted(Box::new(record)),
                    );
                }
                Ok(Update::TestsSubmitted(record)) => {
                    self.patients.set_record(*record);
                    let _ = self.model.needs_redraw.send(true);
                }
                Ok(Update::RefreshPatient(patient_id)) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.get_patient(&patient_id).await },
                        |record| Update::PatientRefreshed(Box::new(record)),
                    );
                }
                Ok(Update::PatientRefreshed(record)) => {
                    // Keep the live transcript, only the record data changed.
                    self.patients.set_record(*record);
                    let _ = self.model.needs_redraw.send(true);
                }
                Ok(Update::LoadDocuments) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.list_documents().await },
                        Update::Documents,
                    );
                }
                Ok(Update::Documents(documents)) => {
                    self.knowledge.set_documents(documents);
                }
                Ok(Update::OpenDocument(name)) => {
                    let client = self.client.clone();
                    self.spawn_api(async move { client.load_document(&name).await }, |detail| {
                        Update::DocumentLoaded(Box::new(detail))
                    });
                }
                Ok(Update::DocumentLoaded(detail)) => {
                    self.knowledge.set_detail(*detail);
                }
                Ok(Update::UploadDocument(path)) => match std::fs::read(&path) {
                    Ok(bytes) => {
                        let name = path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| "document.pdf".to_string());
                        let client = self.client.clone();
                        self.spawn_api(
                            async move { client.upload_document(&name, bytes).await },
                            Update::Uploaded,
                        );
                    }
                    Err(err) => {
                        self.knowledge.clear_busy();
                        self.error
                            .set(format!("failed to read {}: {}", path.display(), err));
                        let _ = self.model.needs_redraw.send(true);
                    }
                },
                Ok(Update::Uploaded(outcome)) => {
                    self.knowledge.set_notice(outcome.message);
                    let _ = self
                        .update_tx
                        .send(Update::OpenDocument(outcome.document_name));
                    let _ = self.update_tx.send(Update::LoadDocuments);
                }
                Ok(Update::ExtractDocument(name)) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.extract_entities(&name).await },
                        |outcome| Update::Extracted(Box::new(outcome)),
                    );
                }
                Ok(Update::Extracted(outcome)) => {
                    let outcome = *outcome;
                    self.knowledge.set_extraction(
                        &outcome.entities,
                        &outcome.relationships,
                        outcome.message,
                    );
                }
                Ok(Update::BuildGraph(name, entities, relationships)) => {
                    let client = self.client.clone();
                    self.spawn_api(
                        async move { client.build_graph(&name, &entities, &relationships).await },
                        Update::Built,
                    );
                }
                Ok(Update::Built(outcome)) => {
                    self.knowledge.mark_graph_built();
                    self.knowledge.set_notice(outcome.message);
                    let _ = self.update_tx.send(Update::LoadDocuments);
                }
                Ok(Update::DeleteDocument(name)) => {
                    let client = self.client.clone();
                    let doc = name.clone();
                    self.spawn_api(
                        async move { client.delete_document(&doc, DeleteOptions::default()).await },
                        move |outcome| Update::DocumentDeleted(name, outcome),
                    );
                }
                Ok(Update::DocumentDeleted(name, outcome)) => {
                    if outcome.success {
                        self.knowledge.remove_document(&name, outcome.message);
                    } else {
                        self.knowledge.clear_busy();
                        self.error.set(outcome.message);
                        let _ = self.model.needs_redraw.send(true);
                    }
                }
                Ok(Update::ExportDocument(name)) => {
                    let client = self.client.clone();
                    let update_tx = self.update_tx.clone();
                    let needs_update = self.model.needs_update.clone();
                    let path = PathBuf::from(format!("{name}.json"));
                    self.tasks.spawn(async move {
                        match client.export_graph(&name).await {
                            Ok(bytes) => match std::fs::write(&path, bytes) {
                                Ok(()) => {
                                    let _ = update_tx.send(Update::Exported(path));
                                }
                                Err(err) => {
                                    let _ = update_tx.send(Update::Error(format!(
                                        "failed to write {}: {}",
                                        path.display(),
                                        err
                                    )));
                                }
                            },
                            Err(err) => {
                                let _ = update_tx.send(Update::Error(err.to_string()));
                            }
                        }
                        let _ = needs_update.send(true);
                    });
                }
                Ok(Update::Exported(path)) => {
                    self.knowledge
                        .set_notice(format!("exported to {}", path.display()));
                }
                Ok(Update::Error(message)) => {
                    warn!("request failed: {message}");
                    self.error.set(message);
                    self.state = ConversationState::Idle;
                    self.knowledge.clear_busy();
                    self.patients.clear_loading();
                    let _ = self.model.needs_redraw.send(true);
                }
                Err(_) => break,
            }
        }
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let prompt_height = if self.screen == Screen::Chat {
            self.prompt.height()
        } else {
            0
        };
        let inner_width = area.width.saturating_sub(2);
        let error_height = self.error.height(inner_width);
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints(
                [
                    Constraint::Min(1),
                    Constraint::Length(error_height),
                    Constraint::Length(prompt_height),
                    Constraint::Length(1),
                ]
                .as_ref(),
            )
            .split(area);

        match self.screen {
            Screen::Patients => self.patients.render(frame, chunks[0]),
            Screen::Chat => self.conversation.render(frame, chunks[0]),
            Screen::Knowledge => self.knowledge.render(frame, chunks[0]),
        }
        self.error.render(frame, chunks[1]);
        if self.screen == Screen::Chat {
            self.prompt.render(frame, chunks[2]);
        }

        let status_right = self.client.base_url().to_string();
        let right_width = status_right.width() as u16;
        let status_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(0), Constraint::Length(right_width)].as_ref())
            .split(chunks[3]);
        let state_text = match &self.state {
            ConversationState::Idle => String::new(),
            ConversationState::Waiting => format!("waiting… {}", self.spinner.step()),
            ConversationState::Thinking => format!("thinking… {}", self.spinner.step()),
            ConversationState::Responding => format!("responding… {}", self.spinner.step()),
        };
        let status_left = {
            let mut parts = vec![self.screen.label().to_string()];
            if let Some(record) = self.patients.record() {
                parts.push(record.display_name().to_string());
            }
            if !state_text.is_empty() {
                parts.push(state_text);
            }
            parts.join(" ")
        };
        frame.render_widget(Paragraph::new(status_left), status_chunks[0]);
        frame.render_widget(
            Paragraph::new(status_right).alignment(Alignment::Right),
            status_chunks[1],
        );
    }
}
