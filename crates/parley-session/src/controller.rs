//! Session controller: the state machine owning one subprocess session
//!
//! States: `Idle → Starting → Live(turn) → Ended | Errored`. The controller
//! folds inbound envelopes into the transcript through the content assembler,
//! tool ledger, side-channel broker, and speaker parser, and builds the
//! outbound commands for the caller to put on the command channel. Envelope
//! processing must be sequential per session; see [`crate::worker`].

use std::collections::HashMap;

use tokio::sync::broadcast;

use parley_protocol::{
    Command, ContentUnit, Conversation, Delta, Event, ImageAttachment, PermissionMode,
    TranscriptMessage,
};

use crate::assembler::{StreamingState, TurnOutput};
use crate::broker::{
    self, Decision, ResultClass, SideChannelBroker, SideChannelRequest, classify_tool_result,
};
use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::ledger::{LedgerOutcome, ToolLedger};
use crate::speakers::SpeakerRoster;

/// Turn progression inside a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Ready for the next outbound message
    Idle,
    /// Content is streaming in
    Streaming,
    /// Paused on a side-channel request
    AwaitingDecision,
}

/// Lifecycle state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Live(TurnState),
    Ended,
    Errored,
}

impl SessionState {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Live(_) | SessionState::Starting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Errored)
    }
}

/// Launch parameters for `startSession`, drawn from per-project configuration
#[derive(Debug, Clone)]
pub struct SessionLaunch {
    pub model: String,
    pub permission_mode: PermissionMode,
    pub working_directory: String,
    pub system_prompt: Option<String>,
    pub tool_server_config_path: Option<String>,
    /// Resume the conversation's prior history in the subprocess
    pub resume: bool,
}

/// The state machine owning one assistant subprocess session
pub struct SessionController {
    session_id: String,
    conversation: Conversation,
    state: SessionState,
    streaming: StreamingState,
    ledger: ToolLedger,
    broker: SideChannelBroker,
    speakers: SpeakerRoster,
    transcript: Vec<TranscriptMessage>,
    /// invocation id -> transcript index, for in-place completion
    invocation_entries: HashMap<String, usize>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Create a controller for a conversation. A fresh session id is minted;
    /// at most one controller may be live per conversation at a time.
    pub fn new(conversation: Conversation, speakers: SpeakerRoster) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            conversation,
            state: SessionState::Idle,
            streaming: StreamingState::default(),
            ledger: ToolLedger::new(),
            broker: SideChannelBroker::new(),
            speakers,
            transcript: Vec::new(),
            invocation_entries: HashMap::new(),
            event_tx,
        }
    }

    /// Seed the transcript with previously persisted history
    pub fn with_history(mut self, messages: Vec<TranscriptMessage>) -> Self {
        self.transcript = messages;
        self
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &[TranscriptMessage] {
        &self.transcript
    }

    pub fn streaming(&self) -> &StreamingState {
        &self.streaming
    }

    /// Whether a turn is currently awaiting the subprocess
    pub fn is_turn_active(&self) -> bool {
        self.streaming.turn_active
            || matches!(
                self.state,
                SessionState::Starting
                    | SessionState::Live(TurnState::Streaming)
                    | SessionState::Live(TurnState::AwaitingDecision)
            )
    }

    /// The side-channel request awaiting a decision, if any
    pub fn outstanding_request(&self) -> Option<&SideChannelRequest> {
        self.broker.outstanding()
    }

    /// Build the `startSession` command and optimistically append the first
    /// user message. The side-channel contract is always injected into the
    /// session's initial configuration.
    pub fn start(
        &mut self,
        prompt: &str,
        images: Vec<ImageAttachment>,
        launch: &SessionLaunch,
    ) -> (Command, Vec<SessionEvent>) {
        let mut out = Vec::new();
        self.append(
            TranscriptMessage::user_text(prompt).with_images(images.clone()),
            &mut out,
        );
        self.state = SessionState::Starting;

        let command = Command::StartSession {
            session_id: self.session_id.clone(),
            prompt: prompt.to_string(),
            images,
            resume: launch.resume.then(|| self.conversation.id.clone()),
            working_directory: launch.working_directory.clone(),
            model: launch.model.clone(),
            permission_mode: launch.permission_mode,
            append_system_prompt: Some(broker::append_contract(
                launch.system_prompt.as_deref(),
            )),
            tool_server_config_path: launch.tool_server_config_path.clone(),
        };
        self.emit(&out);
        (command, out)
    }

    /// Build the next-turn `sendMessage` command and optimistically append
    /// the user message.
    pub fn send_message(
        &mut self,
        text: &str,
        images: Vec<ImageAttachment>,
    ) -> Result<(Command, Vec<SessionEvent>)> {
        if !matches!(self.state, SessionState::Live(TurnState::Idle)) {
            return Err(Error::NotLive);
        }
        let mut out = Vec::new();
        self.append(
            TranscriptMessage::user_text(text).with_images(images.clone()),
            &mut out,
        );
        self.streaming.begin_turn();
        self.state = SessionState::Live(TurnState::Streaming);

        let command = Command::SendMessage {
            session_id: self.session_id.clone(),
            text: text.to_string(),
            images,
        };
        self.emit(&out);
        Ok((command, out))
    }

    /// Answer the outstanding side-channel request. The subprocess resumes;
    /// the original tool call is never resent.
    pub fn respond(&mut self, decision: Decision) -> Result<(Command, Vec<SessionEvent>)> {
        let command = self.broker.respond(decision)?;
        if matches!(self.state, SessionState::Live(TurnState::AwaitingDecision)) {
            self.state = SessionState::Live(TurnState::Streaming);
        }
        let out = vec![SessionEvent::DecisionResolved];
        self.emit(&out);
        Ok((command, out))
    }

    /// Tear the session down. Fire-and-forget: a later `session:ended` or
    /// `session:error` for this session is dropped gracefully. Any
    /// outstanding side-channel request is dropped without a decision.
    pub fn abort(&mut self) -> (Command, Vec<SessionEvent>) {
        let mut out = Vec::new();
        if self.broker.cancel() {
            out.push(SessionEvent::DecisionResolved);
        }
        self.streaming.clear();
        self.state = SessionState::Ended;
        out.push(SessionEvent::Ended);

        let command = Command::Abort {
            session_id: self.session_id.clone(),
        };
        self.emit(&out);
        (command, out)
    }

    /// Fill in the asynchronously assigned persistence identifier. Never
    /// reorders the transcript.
    pub fn assign_persisted_id(&mut self, index: usize, id: u64) -> Option<SessionEvent> {
        let message = self.transcript.get_mut(index)?;
        message.persisted_id = Some(id);
        let event = SessionEvent::MessageUpdated {
            index,
            message: message.clone(),
        };
        let _ = self.event_tx.send(event.clone());
        Some(event)
    }

    /// Fold one inbound envelope event into the session.
    ///
    /// Envelopes for an ended session are dropped, not queued. Processing is
    /// infallible: malformed or unexpected events never desynchronize state.
    pub fn handle_event(&mut self, event: Event) -> Vec<SessionEvent> {
        if self.state.is_terminal() {
            tracing::debug!(
                session_id = %self.session_id,
                "dropping envelope for ended session"
            );
            return vec![];
        }

        let mut out = Vec::new();
        match event {
            Event::SessionStarted => {
                self.streaming.begin_turn();
                self.ledger.clear();
                self.invocation_entries.clear();
                self.state = SessionState::Live(TurnState::Idle);
                out.push(SessionEvent::Started);
            }

            Event::ContentBlockStart {
                index,
                content_block,
            } => {
                self.mark_streaming();
                self.streaming.block_start(index, content_block);
            }

            Event::ContentBlockDelta { index, delta } => {
                self.mark_streaming();
                match &delta {
                    Delta::TextDelta { text } => out.push(SessionEvent::StreamText {
                        delta: text.clone(),
                    }),
                    Delta::ThinkingDelta { thinking } => {
                        out.push(SessionEvent::StreamThinking {
                            delta: thinking.clone(),
                        })
                    }
                    Delta::InputJsonDelta { .. } => {}
                }
                self.streaming.apply_delta(index, delta);
                if let Some(name) = self.speakers.scan_tail(&self.streaming.text) {
                    self.streaming.current_persona = Some(name);
                }
            }

            Event::ContentBlockStop { index } => {
                if let Some(unit) = self.streaming.block_stop(index) {
                    self.surface_tool_unit(unit, &mut out);
                }
            }

            Event::Assistant { message } => {
                self.mark_streaming();
                for unit in self.streaming.reconcile(&message) {
                    self.surface_tool_unit(unit, &mut out);
                }
            }

            Event::User { message } => {
                for unit in message.content {
                    if let ContentUnit::ToolResult { content, .. } = &unit {
                        let text = ContentUnit::result_text(content);
                        if classify_tool_result(&text) == ResultClass::PermissionDenial {
                            // Already represented by the permission flow
                            tracing::debug!(
                                session_id = %self.session_id,
                                "suppressing permission-denial tool result"
                            );
                            continue;
                        }
                    }
                    if unit.is_tool_unit() {
                        self.surface_tool_unit(unit, &mut out);
                    }
                }
            }

            Event::Result { is_error, subtype } => {
                if is_error {
                    tracing::warn!(
                        session_id = %self.session_id,
                        subtype = subtype.as_deref().unwrap_or(""),
                        "turn finished with an error result"
                    );
                }
                let output = self.streaming.finish_turn();
                self.flush_turn_output(output, &mut out);
                self.state = SessionState::Live(TurnState::Idle);
                out.push(SessionEvent::TurnCompleted);
            }

            Event::PermissionRequest {
                tool_name,
                tool_input,
            } => {
                let request = SideChannelRequest::Permission {
                    session_id: self.session_id.clone(),
                    tool_name,
                    tool_input,
                };
                self.open_side_channel(request, &mut out);
            }

            Event::AskQuestion {
                tool_use_id,
                questions,
            } => {
                let request = SideChannelRequest::Question {
                    session_id: self.session_id.clone(),
                    tool_use_id,
                    questions,
                };
                self.open_side_channel(request, &mut out);
            }

            Event::PlanReview { tool_use_id, plan } => {
                let request = SideChannelRequest::PlanReview {
                    session_id: self.session_id.clone(),
                    tool_use_id,
                    plan,
                };
                self.open_side_channel(request, &mut out);
            }

            Event::SessionEnded => {
                self.teardown(&mut out);
                self.state = SessionState::Ended;
                out.push(SessionEvent::Ended);
            }

            Event::SessionError { message } => {
                self.teardown(&mut out);
                let text = if message.is_empty() {
                    "The assistant session failed.".to_string()
                } else {
                    format!("The assistant session failed: {}", message)
                };
                self.append(TranscriptMessage::assistant_text(text), &mut out);
                self.state = SessionState::Errored;
                out.push(SessionEvent::Errored { message });
            }
        }

        self.emit(&out);
        out
    }

    // ---- internals ----

    fn mark_streaming(&mut self) {
        self.streaming.turn_active = true;
        if matches!(
            self.state,
            SessionState::Starting | SessionState::Live(TurnState::Idle)
        ) {
            self.state = SessionState::Live(TurnState::Streaming);
        }
    }

    fn open_side_channel(&mut self, request: SideChannelRequest, out: &mut Vec<SessionEvent>) {
        self.broker.open(request.clone());
        self.state = SessionState::Live(TurnState::AwaitingDecision);
        out.push(SessionEvent::DecisionRequested { request });
    }

    fn teardown(&mut self, out: &mut Vec<SessionEvent>) {
        if self.broker.cancel() {
            out.push(SessionEvent::DecisionResolved);
        }
        self.streaming.clear();
    }

    /// Surface a tool unit through the ledger: append on first sighting,
    /// complete in place when parsed input arrives late, drop duplicates.
    fn surface_tool_unit(&mut self, unit: ContentUnit, out: &mut Vec<SessionEvent>) {
        match self.ledger.record(&unit) {
            LedgerOutcome::New => {
                let index = self.transcript.len();
                if let ContentUnit::ToolInvocation { id, .. } = &unit {
                    self.invocation_entries.insert(id.clone(), index);
                }
                self.append(TranscriptMessage::tool_unit(unit), out);
            }
            LedgerOutcome::Completed => {
                let Some(id) = unit.invocation_id() else { return };
                let Some(&index) = self.invocation_entries.get(id) else {
                    return;
                };
                if let Some(message) = self.transcript.get_mut(index) {
                    message.payload = parley_protocol::MessagePayload::Unit { unit };
                    out.push(SessionEvent::MessageUpdated {
                        index,
                        message: message.clone(),
                    });
                }
            }
            LedgerOutcome::Duplicate => {}
        }
    }

    /// Flush a finished turn's accumulated output into the transcript,
    /// performing persona segmentation when a roster is configured.
    fn flush_turn_output(&mut self, output: TurnOutput, out: &mut Vec<SessionEvent>) {
        if self.speakers.is_empty() {
            let text = output.text.trim();
            let thinking = output.thinking.trim();
            if text.is_empty() && thinking.is_empty() {
                return;
            }
            let message = if thinking.is_empty() {
                TranscriptMessage::assistant_text(text)
            } else {
                let mut units = vec![ContentUnit::thinking(thinking)];
                if !text.is_empty() {
                    units.push(ContentUnit::text(text));
                }
                TranscriptMessage::assistant_turn(units)
            };
            self.append(message, out);
            return;
        }

        for (speaker, segment) in self.speakers.segment(&output.text) {
            let mut message = TranscriptMessage::assistant_text(segment);
            if let Some(name) = speaker {
                message = message.with_persona(self.speakers.resolve(&name));
            }
            self.append(message, out);
        }
    }

    fn append(&mut self, message: TranscriptMessage, out: &mut Vec<SessionEvent>) {
        self.transcript.push(message.clone());
        out.push(SessionEvent::MessageAppended {
            index: self.transcript.len() - 1,
            message,
        });
    }

    fn emit(&self, events: &[SessionEvent]) {
        for event in events {
            let _ = self.event_tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{BlockStart, MessagePayload, Persona, Role, TurnSnapshot};

    fn launch() -> SessionLaunch {
        SessionLaunch {
            model: "default".to_string(),
            permission_mode: PermissionMode::Prompt,
            working_directory: "/tmp/proj".to_string(),
            system_prompt: None,
            tool_server_config_path: None,
            resume: false,
        }
    }

    fn conversation() -> Conversation {
        Conversation::new("/tmp/proj", "/tmp/proj")
    }

    fn started_controller(speakers: SpeakerRoster) -> SessionController {
        let mut ctrl = SessionController::new(conversation(), speakers);
        let (_, _) = ctrl.start("hello", vec![], &launch());
        ctrl.handle_event(Event::SessionStarted);
        ctrl
    }

    fn text_delta(index: usize, text: &str) -> Event {
        Event::ContentBlockDelta {
            index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        }
    }

    #[test]
    fn test_start_appends_user_message_and_injects_contract() {
        let mut ctrl = SessionController::new(conversation(), SpeakerRoster::default());
        let (command, events) = ctrl.start("first prompt", vec![], &launch());

        assert_eq!(ctrl.state(), SessionState::Starting);
        assert_eq!(ctrl.transcript().len(), 1);
        assert_eq!(ctrl.transcript()[0].role, Role::User);
        assert!(matches!(events[0], SessionEvent::MessageAppended { .. }));

        match command {
            Command::StartSession {
                append_system_prompt,
                resume,
                ..
            } => {
                let prompt = append_system_prompt.unwrap();
                for tool in broker::INTERCEPTED_TOOLS {
                    assert!(prompt.contains(tool));
                }
                assert!(resume.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_streamed_text_flushes_on_result() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        ctrl.handle_event(Event::ContentBlockStart {
            index: 0,
            content_block: BlockStart::Text,
        });
        for piece in ["ans", "wer ", "here"] {
            ctrl.handle_event(text_delta(0, piece));
        }
        assert_eq!(ctrl.state(), SessionState::Live(TurnState::Streaming));
        assert_eq!(ctrl.streaming().text, "answer here");

        let events = ctrl.handle_event(Event::Result {
            is_error: false,
            subtype: None,
        });

        assert_eq!(ctrl.state(), SessionState::Live(TurnState::Idle));
        assert!(!ctrl.is_turn_active());
        assert!(events.iter().any(|e| matches!(e, SessionEvent::TurnCompleted)));
        let last = ctrl.transcript().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.text(), "answer here");
        assert_eq!(ctrl.streaming(), &StreamingState::default());
    }

    #[test]
    fn test_tool_invocation_streams_to_parsed_input() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        ctrl.handle_event(Event::ContentBlockStart {
            index: 0,
            content_block: BlockStart::ToolUse {
                id: "t1".to_string(),
                name: "bash".to_string(),
            },
        });
        ctrl.handle_event(Event::ContentBlockDelta {
            index: 0,
            delta: Delta::InputJsonDelta {
                partial_json: r#"{"x":1"#.to_string(),
            },
        });
        ctrl.handle_event(Event::ContentBlockDelta {
            index: 0,
            delta: Delta::InputJsonDelta {
                partial_json: "}".to_string(),
            },
        });
        ctrl.handle_event(Event::ContentBlockStop { index: 0 });

        let tool_messages: Vec<_> = ctrl
            .transcript()
            .iter()
            .filter(|m| matches!(m.payload, MessagePayload::Unit { .. }))
            .collect();
        assert_eq!(tool_messages.len(), 1);
        match &tool_messages[0].payload {
            MessagePayload::Unit {
                unit: ContentUnit::ToolInvocation { id, input, .. },
            } => {
                assert_eq!(id, "t1");
                assert_eq!(input, &Some(serde_json::json!({"x": 1})));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_redelivery_never_duplicates_tool_entries() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        ctrl.handle_event(Event::ContentBlockStart {
            index: 0,
            content_block: BlockStart::ToolUse {
                id: "t1".to_string(),
                name: "bash".to_string(),
            },
        });
        ctrl.handle_event(Event::ContentBlockStop { index: 0 });
        let before = ctrl.transcript().len();

        // The consolidated snapshot re-delivers the same invocation, now with
        // parsed input; the existing entry is completed in place.
        let events = ctrl.handle_event(Event::Assistant {
            message: TurnSnapshot {
                content: vec![ContentUnit::tool_invocation(
                    "t1",
                    "bash",
                    Some(serde_json::json!({"command": "ls"})),
                )],
            },
        });

        assert_eq!(ctrl.transcript().len(), before);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::MessageUpdated { .. })));

        // And a third delivery is a silent no-op
        let events = ctrl.handle_event(Event::Assistant {
            message: TurnSnapshot {
                content: vec![ContentUnit::tool_invocation(
                    "t1",
                    "bash",
                    Some(serde_json::json!({"command": "ls"})),
                )],
            },
        });
        assert_eq!(ctrl.transcript().len(), before);
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::MessageUpdated { .. })));
    }

    #[test]
    fn test_permission_flow_denial() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        ctrl.handle_event(text_delta(0, "about to run"));

        let events = ctrl.handle_event(Event::PermissionRequest {
            tool_name: "bash".to_string(),
            tool_input: serde_json::json!({"command": "rm x"}),
        });
        assert_eq!(
            ctrl.state(),
            SessionState::Live(TurnState::AwaitingDecision)
        );
        assert!(events.iter().any(|e| matches!(e, SessionEvent::DecisionRequested { .. })));
        assert!(ctrl.outstanding_request().is_some());

        let (command, _) = ctrl
            .respond(Decision::Permission {
                allowed: false,
                always: false,
            })
            .unwrap();
        assert!(matches!(
            command,
            Command::RespondPermission { allowed: false, .. }
        ));
        assert!(ctrl.outstanding_request().is_none());
        assert_eq!(ctrl.state(), SessionState::Live(TurnState::Streaming));
    }

    #[test]
    fn test_denial_shaped_tool_result_suppressed() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        let before = ctrl.transcript().len();

        ctrl.handle_event(Event::User {
            message: TurnSnapshot {
                content: vec![ContentUnit::tool_result(
                    "t1",
                    serde_json::json!("The user denied permission to run this tool"),
                    true,
                )],
            },
        });
        assert_eq!(ctrl.transcript().len(), before);

        // An ordinary result for the same turn is surfaced
        ctrl.handle_event(Event::User {
            message: TurnSnapshot {
                content: vec![ContentUnit::tool_result(
                    "t2",
                    serde_json::json!("exit 0"),
                    false,
                )],
            },
        });
        assert_eq!(ctrl.transcript().len(), before + 1);
    }

    #[test]
    fn test_session_error_appends_synthetic_entry_and_drops_later_envelopes() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        let events = ctrl.handle_event(Event::SessionError {
            message: "subprocess crashed".to_string(),
        });
        assert_eq!(ctrl.state(), SessionState::Errored);
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Errored { .. })));
        let last = ctrl.transcript().last().unwrap();
        assert!(last.text().contains("subprocess crashed"));

        // Anything after the terminal state is dropped
        let before = ctrl.transcript().len();
        assert!(ctrl.handle_event(text_delta(0, "late")).is_empty());
        assert_eq!(ctrl.transcript().len(), before);
    }

    #[test]
    fn test_abort_drops_outstanding_request() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        ctrl.handle_event(Event::AskQuestion {
            tool_use_id: "t1".to_string(),
            questions: vec![],
        });
        assert!(ctrl.outstanding_request().is_some());

        let (command, _) = ctrl.abort();
        assert!(matches!(command, Command::Abort { .. }));
        assert!(ctrl.outstanding_request().is_none());
        assert_eq!(ctrl.state(), SessionState::Ended);

        // The abort is fire-and-forget; a later session:ended is dropped
        assert!(ctrl.handle_event(Event::SessionEnded).is_empty());
    }

    #[test]
    fn test_persona_segmentation_on_turn_completion() {
        let roster = SpeakerRoster::new(vec![
            Persona::named("Architect"),
            Persona {
                name: "Dev".to_string(),
                icon: Some("wrench".to_string()),
                color: Some("#00aa55".to_string()),
            },
        ]);
        let mut ctrl = started_controller(roster);
        ctrl.handle_event(Event::ContentBlockStart {
            index: 0,
            content_block: BlockStart::Text,
        });
        ctrl.handle_event(text_delta(0, "[Architect]\nPlan A\n"));
        assert_eq!(
            ctrl.streaming().current_persona.as_deref(),
            Some("Architect")
        );
        ctrl.handle_event(text_delta(0, "[Dev]\nImplementing now"));
        assert_eq!(ctrl.streaming().current_persona.as_deref(), Some("Dev"));

        let before = ctrl.transcript().len();
        ctrl.handle_event(Event::Result {
            is_error: false,
            subtype: None,
        });

        let appended = &ctrl.transcript()[before..];
        assert_eq!(appended.len(), 2);
        assert_eq!(appended[0].persona.as_ref().unwrap().name, "Architect");
        assert_eq!(appended[0].text(), "Plan A");
        assert_eq!(appended[1].persona.as_ref().unwrap().name, "Dev");
        assert_eq!(appended[1].text(), "Implementing now");
        // Roster metadata rides along
        assert_eq!(appended[1].persona.as_ref().unwrap().icon.as_deref(), Some("wrench"));
    }

    #[test]
    fn test_send_message_requires_idle_turn() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        ctrl.handle_event(text_delta(0, "streaming..."));
        assert!(matches!(
            ctrl.send_message("too soon", vec![]),
            Err(Error::NotLive)
        ));

        ctrl.handle_event(Event::Result {
            is_error: false,
            subtype: None,
        });
        let (command, _) = ctrl.send_message("next turn", vec![]).unwrap();
        assert!(matches!(command, Command::SendMessage { .. }));
        assert!(ctrl.is_turn_active());
    }

    #[test]
    fn test_persisted_id_assignment_keeps_order() {
        let mut ctrl = started_controller(SpeakerRoster::default());
        ctrl.handle_event(text_delta(0, "hi"));
        ctrl.handle_event(Event::Result {
            is_error: false,
            subtype: None,
        });
        let texts: Vec<String> = ctrl.transcript().iter().map(|m| m.text()).collect();

        let event = ctrl.assign_persisted_id(0, 41).unwrap();
        assert!(matches!(event, SessionEvent::MessageUpdated { index: 0, .. }));
        ctrl.assign_persisted_id(1, 42).unwrap();

        let after: Vec<String> = ctrl.transcript().iter().map(|m| m.text()).collect();
        assert_eq!(texts, after);
        assert_eq!(ctrl.transcript()[0].persisted_id, Some(41));
        assert!(ctrl.assign_persisted_id(99, 43).is_none());
    }
}
