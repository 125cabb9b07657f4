//! Multi-project session multiplexer
//!
//! Owns the open project tabs, the routing tables, and every live session.
//! All inbound envelopes flow through [`Multiplexer::route_envelope`]; all
//! outbound commands leave through the shared subprocess link. Sessions keep
//! running when their project loses focus, with delivery demoted to the
//! project's activity record.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use parley_protocol::{Conversation, Envelope, ImageAttachment};
use parley_session::{
    ConversationStore, Decision, SessionController, SessionEvent, SessionHandle, SessionLaunch,
    SessionSink, SessionState, SharedSink, SpeakerRoster, SubprocessLink, TurnState,
    persist_message, shared_sink, spawn_session,
};

use crate::error::{Error, Result};
use crate::routes::SessionRoutes;
use crate::sink::{HeadlessSink, LiveSink, UiEvent};
use crate::tabs::{ActivityEntry, ProjectConfig, ProjectTab, WorkingState, display_name_for};

/// Conversation titles derived from the first message are capped here
const TITLE_MAX_CHARS: usize = 80;

struct SessionEntry {
    session_id: String,
    controller: Arc<Mutex<SessionController>>,
    handle: SessionHandle,
    sink: SharedSink,
}

pub struct Multiplexer {
    tabs: Vec<ProjectTab>,
    active: Option<usize>,
    routes: SessionRoutes,
    /// conversation id -> live session
    sessions: HashMap<String, SessionEntry>,
    store: Arc<dyn ConversationStore>,
    link: Arc<dyn SubprocessLink>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
}

impl Multiplexer {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        link: Arc<dyn SubprocessLink>,
        ui_tx: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            tabs: Vec::new(),
            active: None,
            routes: SessionRoutes::default(),
            sessions: HashMap::new(),
            store,
            link,
            ui_tx,
        }
    }

    pub fn tabs(&self) -> &[ProjectTab] {
        &self.tabs
    }

    pub fn active_project(&self) -> Option<&ProjectTab> {
        self.active.map(|i| &self.tabs[i])
    }

    /// Open a project tab and give it focus
    pub fn open_project(&mut self, path: &str, config: ProjectConfig) -> Result<()> {
        if self.tabs.iter().any(|t| t.path == path) {
            return Err(Error::AlreadyOpen(path.to_string()));
        }
        let taken: Vec<&str> = self.tabs.iter().map(|t| t.display_name.as_str()).collect();
        let display_name = display_name_for(path, &taken);
        let _ = self.ui_tx.send(UiEvent::ProjectOpened {
            project: path.to_string(),
            display_name: display_name.clone(),
        });
        self.tabs.push(ProjectTab::new(path, display_name, config));
        self.switch_active(path)
    }

    /// Move focus to an open project. Outgoing sessions stay live but drop
    /// to headless delivery; the incoming project's sessions go live.
    pub fn switch_active(&mut self, path: &str) -> Result<()> {
        let idx = self.tab_index(path)?;
        if self.active == Some(idx) {
            return Ok(());
        }
        self.active = Some(idx);
        self.refocus_sinks();
        let _ = self.ui_tx.send(UiEvent::ActiveChanged {
            project: path.to_string(),
        });
        Ok(())
    }

    /// Close a project tab, aborting every session it owns
    pub async fn close_project(&mut self, path: &str) -> Result<()> {
        let idx = self.tab_index(path)?;

        let owned: Vec<String> = self
            .sessions
            .iter()
            .filter(|(conv, _)| self.routes.project_for_conversation(conv) == Some(path))
            .map(|(conv, _)| conv.clone())
            .collect();
        for conv_id in owned {
            if let Some(entry) = self.sessions.remove(&conv_id) {
                if !entry.controller.lock().state().is_terminal() {
                    let (command, _) = entry.controller.lock().abort();
                    self.link.send(command).await?;
                }
                entry.handle.shutdown();
            }
        }
        self.routes.unbind_project(path);

        let active_path = self.active_project().map(|t| t.path.clone());
        self.tabs.remove(idx);
        let _ = self.ui_tx.send(UiEvent::ProjectClosed {
            project: path.to_string(),
        });

        // Closing the active tab promotes the most recently opened one;
        // closing a background tab leaves focus where it was
        self.active = None;
        let next = active_path
            .filter(|p| p != path)
            .or_else(|| self.tabs.last().map(|t| t.path.clone()));
        if let Some(next) = next {
            self.switch_active(&next)?;
        }
        Ok(())
    }

    pub async fn list_conversations(&self, path: &str) -> Result<Vec<Conversation>> {
        self.tab_index(path)?;
        Ok(self.store.list_conversations(path).await?)
    }

    /// Select a stored conversation in a project, loading its transcript
    pub async fn select_conversation(&mut self, path: &str, conversation_id: &str) -> Result<()> {
        let idx = self.tab_index(path)?;
        let conversation = self
            .store
            .list_conversations(path)
            .await?
            .into_iter()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| Error::UnknownConversation(conversation_id.to_string()))?;
        let transcript = self.store.get_messages(conversation_id).await?;
        self.routes.bind_conversation(conversation_id, path);
        let tab = &mut self.tabs[idx];
        tab.conversation = Some(conversation);
        tab.loaded_transcript = transcript;
        Ok(())
    }

    /// Send the next user message in a project's selected conversation,
    /// launching or relaunching the session as needed. Returns the session
    /// id that will carry the turn.
    ///
    /// A conversation has at most one live session. If the existing session
    /// cannot take another message, it is aborted exactly once and a fresh
    /// session resumes the conversation.
    pub async fn start_turn(
        &mut self,
        path: &str,
        text: &str,
        images: Vec<ImageAttachment>,
    ) -> Result<String> {
        let idx = self.tab_index(path)?;

        if self.tabs[idx].conversation.is_none() {
            let mut conversation = Conversation::new(path, path);
            conversation.title = Some(derive_title(text));
            self.store.create_conversation(&conversation).await?;
            self.routes.bind_conversation(&conversation.id, path);
            self.tabs[idx].conversation = Some(conversation);
            self.tabs[idx].loaded_transcript.clear();
        }
        let conversation = self.tabs[idx]
            .conversation
            .clone()
            .expect("conversation selected above");
        self.routes.bind_conversation(&conversation.id, path);

        // A resumed conversation that never got a title takes one from this
        // message; fire-and-forget, the transcript never waits on it
        if conversation.title.is_none() {
            let title = derive_title(text);
            if let Some(conv) = self.tabs[idx].conversation.as_mut() {
                conv.title = Some(title.clone());
            }
            let store = self.store.clone();
            let conversation_id = conversation.id.clone();
            tokio::spawn(async move {
                if let Err(e) = store.update_title(&conversation_id, &title).await {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "failed to store conversation title"
                    );
                }
            });
        }

        if let Some(entry) = self.sessions.get(&conversation.id) {
            let ready = matches!(
                entry.controller.lock().state(),
                SessionState::Live(TurnState::Idle)
            );
            if ready {
                let (command, events) = entry.controller.lock().send_message(text, images)?;
                self.dispatch(entry, &conversation.id, events);
                let session_id = entry.session_id.clone();
                self.link.send(command).await?;
                return Ok(session_id);
            }

            // Replace the session: a mid-turn session gets exactly one abort
            let entry = self
                .sessions
                .remove(&conversation.id)
                .expect("entry present above");
            if !entry.controller.lock().state().is_terminal() {
                let (command, events) = entry.controller.lock().abort();
                self.dispatch(&entry, &conversation.id, events);
                self.link.send(command).await?;
            }
            entry.handle.shutdown();
            self.routes.unbind_session(&entry.session_id);
        }

        let history = self.store.get_messages(&conversation.id).await?;
        let resume = !history.is_empty();
        let tab = &self.tabs[idx];
        let launch = SessionLaunch {
            model: tab.config.model.clone(),
            permission_mode: tab.config.permission_mode,
            working_directory: path.to_string(),
            system_prompt: tab.config.system_prompt.clone(),
            tool_server_config_path: tab
                .config
                .tool_servers
                .first()
                .and_then(|s| s.config_path.clone()),
            resume,
        };
        let roster = SpeakerRoster::new(tab.config.personas.clone());

        let mut controller =
            SessionController::new(conversation.clone(), roster).with_history(history);
        let (command, events) = controller.start(text, images, &launch);
        let session_id = controller.session_id().to_string();

        let controller = Arc::new(Mutex::new(controller));
        let sink = shared_sink(self.sink_for(idx, &conversation.id));
        let handle = spawn_session(controller.clone(), self.store.clone(), sink.clone());

        let entry = SessionEntry {
            session_id: session_id.clone(),
            controller,
            handle,
            sink,
        };
        self.dispatch(&entry, &conversation.id, events);
        self.routes.bind_session(&session_id, &conversation.id);
        self.sessions.insert(conversation.id.clone(), entry);

        self.link.send(command).await?;
        Ok(session_id)
    }

    /// Answer the outstanding side-channel request on a session
    pub async fn respond(&mut self, session_id: &str, decision: Decision) -> Result<()> {
        let conversation_id = self
            .routes
            .conversation_for(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?
            .to_string();
        let entry = self
            .sessions
            .get(&conversation_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        let (command, events) = entry.controller.lock().respond(decision)?;
        self.dispatch(entry, &conversation_id, events);
        self.link.send(command).await?;
        Ok(())
    }

    /// Tear down a session without closing its project
    pub async fn abort(&mut self, session_id: &str) -> Result<()> {
        let conversation_id = self
            .routes
            .conversation_for(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?
            .to_string();
        let entry = self
            .sessions
            .remove(&conversation_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        if !entry.controller.lock().state().is_terminal() {
            let (command, events) = entry.controller.lock().abort();
            self.dispatch(&entry, &conversation_id, events);
            self.link.send(command).await?;
        }
        entry.handle.shutdown();
        self.routes.unbind_session(session_id);
        Ok(())
    }

    /// Route one inbound envelope to its session's worker. Envelopes for
    /// unknown or already-ended sessions are dropped, not queued.
    pub fn route_envelope(&self, envelope: Envelope) {
        let Some(conversation_id) = self.routes.conversation_for(&envelope.session_id) else {
            tracing::debug!(
                session_id = %envelope.session_id,
                "dropping envelope for unknown session"
            );
            return;
        };
        let Some(entry) = self.sessions.get(conversation_id) else {
            tracing::debug!(
                session_id = %envelope.session_id,
                "dropping envelope for closed session"
            );
            return;
        };
        if !entry.handle.deliver(envelope.event) {
            tracing::debug!(
                session_id = %envelope.session_id,
                "session worker already exited"
            );
        }
    }

    /// The current working state of a project's selected conversation
    pub fn working_state(&self, path: &str) -> Option<WorkingState> {
        let tab = self.tabs.iter().find(|t| t.path == path)?;
        let conversation = tab.conversation.clone()?;
        if let Some(entry) = self.sessions.get(&conversation.id) {
            let ctrl = entry.controller.lock();
            return Some(WorkingState {
                conversation,
                transcript: ctrl.transcript().to_vec(),
                streaming: ctrl.streaming().clone(),
                awaiting_decision: ctrl.outstanding_request().is_some(),
            });
        }
        Some(WorkingState {
            conversation,
            transcript: tab.loaded_transcript.clone(),
            streaming: Default::default(),
            awaiting_decision: false,
        })
    }

    /// Drain a project's background activity, clearing its attention flag
    pub fn take_activity(&mut self, path: &str) -> Result<Vec<ActivityEntry>> {
        let idx = self.tab_index(path)?;
        Ok(self.tabs[idx].activity.lock().drain())
    }

    // ---- internals ----

    fn tab_index(&self, path: &str) -> Result<usize> {
        self.tabs
            .iter()
            .position(|t| t.path == path)
            .ok_or_else(|| Error::UnknownProject(path.to_string()))
    }

    fn sink_for(&self, tab_idx: usize, conversation_id: &str) -> Arc<dyn SessionSink> {
        if self.active == Some(tab_idx) {
            Arc::new(LiveSink::new(
                self.tabs[tab_idx].path.clone(),
                self.ui_tx.clone(),
            ))
        } else {
            Arc::new(HeadlessSink::new(
                conversation_id,
                self.tabs[tab_idx].activity.clone(),
            ))
        }
    }

    /// Re-point every session's sink after a focus change
    fn refocus_sinks(&self) {
        for (conversation_id, entry) in &self.sessions {
            let Some(owner) = self.routes.project_for_conversation(conversation_id) else {
                continue;
            };
            let Some(idx) = self.tabs.iter().position(|t| t.path == owner) else {
                continue;
            };
            *entry.sink.write() = self.sink_for(idx, conversation_id);
        }
    }

    /// Deliver controller outputs produced outside the worker loop, feeding
    /// appended messages through the same persistence path the worker uses
    fn dispatch(&self, entry: &SessionEntry, conversation_id: &str, events: Vec<SessionEvent>) {
        for event in events {
            if let SessionEvent::MessageAppended { index, message } = &event {
                persist_message(
                    entry.controller.clone(),
                    self.store.clone(),
                    entry.sink.clone(),
                    conversation_id.to_string(),
                    *index,
                    message.clone(),
                );
            }
            entry.sink.read().deliver(&entry.session_id, &event);
        }
    }
}

/// Derive a conversation title from its first user message
fn derive_title(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= TITLE_MAX_CHARS {
        return first_line.to_string();
    }
    let truncated: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}…", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::{BlockStart, Command, Delta, Event};
    use parley_session::{MemoryStore, RecordingLink};
    use std::time::Duration;

    fn setup() -> (
        Multiplexer,
        Arc<MemoryStore>,
        Arc<RecordingLink>,
        mpsc::UnboundedReceiver<UiEvent>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let link = Arc::new(RecordingLink::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mux = Multiplexer::new(store.clone(), link.clone(), tx);
        (mux, store, link, rx)
    }

    fn envelope(session_id: &str, event: Event) -> Envelope {
        Envelope::new(session_id, event)
    }

    async fn drive_turn(mux: &Multiplexer, session_id: &str, reply: &str) {
        mux.route_envelope(envelope(session_id, Event::SessionStarted));
        mux.route_envelope(envelope(
            session_id,
            Event::ContentBlockStart {
                index: 0,
                content_block: BlockStart::Text,
            },
        ));
        mux.route_envelope(envelope(
            session_id,
            Event::ContentBlockDelta {
                index: 0,
                delta: Delta::TextDelta {
                    text: reply.to_string(),
                },
            },
        ));
        mux.route_envelope(envelope(
            session_id,
            Event::Result {
                is_error: false,
                subtype: None,
            },
        ));
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never met");
    }

    #[tokio::test]
    async fn test_switch_and_back_restores_working_state() {
        let (mut mux, _store, _link, _rx) = setup();
        mux.open_project("/proj/a", ProjectConfig::default()).unwrap();

        let sid = mux.start_turn("/proj/a", "hello", vec![]).await.unwrap();
        drive_turn(&mux, &sid, "hi there").await;

        // Let the turn finish and persistence settle
        wait_until(|| {
            mux.working_state("/proj/a")
                .map(|s| {
                    s.transcript.len() == 2
                        && s.transcript.iter().all(|m| m.persisted_id.is_some())
                })
                .unwrap_or(false)
        })
        .await;
        let before = mux.working_state("/proj/a").unwrap();
        assert_eq!(before.transcript[1].text(), "hi there");

        mux.open_project("/proj/b", ProjectConfig::default()).unwrap();
        assert_eq!(mux.active_project().unwrap().path, "/proj/b");
        mux.switch_active("/proj/a").unwrap();

        let after = mux.working_state("/proj/a").unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_stale_live_session_gets_exactly_one_abort() {
        let (mut mux, store, link, _rx) = setup();
        mux.open_project("/proj/a", ProjectConfig::default()).unwrap();

        let sid1 = mux.start_turn("/proj/a", "first", vec![]).await.unwrap();
        mux.route_envelope(envelope(&sid1, Event::SessionStarted));
        mux.route_envelope(envelope(
            &sid1,
            Event::ContentBlockDelta {
                index: 0,
                delta: Delta::TextDelta {
                    text: "streaming".to_string(),
                },
            },
        ));
        let conv_id = mux.active_project().unwrap().conversation.clone().unwrap().id;
        for _ in 0..200 {
            if store.get_messages(&conv_id).await.unwrap().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.get_messages(&conv_id).await.unwrap().len(), 1);
        // The first session must be visibly mid-turn before the restart
        wait_until(|| {
            mux.working_state("/proj/a")
                .map(|s| s.streaming.text == "streaming")
                .unwrap_or(false)
        })
        .await;

        let sid2 = mux.start_turn("/proj/a", "second", vec![]).await.unwrap();
        assert_ne!(sid1, sid2);

        let sent = link.sent();
        let aborts: Vec<_> = sent
            .iter()
            .filter(|c| matches!(c, Command::Abort { .. }))
            .collect();
        assert_eq!(aborts.len(), 1);
        assert!(matches!(&sent[0], Command::StartSession { session_id, .. } if session_id == &sid1));
        match sent.last().unwrap() {
            Command::StartSession {
                session_id, resume, ..
            } => {
                assert_eq!(session_id, &sid2);
                assert_eq!(resume.as_deref(), Some(conv_id.as_str()));
            }
            other => panic!("expected startSession, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_session_envelope_is_dropped() {
        let (mut mux, _store, link, _rx) = setup();
        mux.open_project("/proj/a", ProjectConfig::default()).unwrap();
        mux.route_envelope(envelope("nope", Event::SessionStarted));
        assert!(link.sent().is_empty());
    }

    #[tokio::test]
    async fn test_background_project_records_activity() {
        let (mut mux, _store, _link, mut rx) = setup();
        mux.open_project("/proj/a", ProjectConfig::default()).unwrap();
        let sid = mux.start_turn("/proj/a", "hello", vec![]).await.unwrap();
        mux.route_envelope(envelope(&sid, Event::SessionStarted));

        // Let the session go live and its persistence settle before the
        // focus change, so nothing is still in flight toward the live sink
        wait_until(|| {
            mux.working_state("/proj/a")
                .map(|s| s.transcript.iter().all(|m| m.persisted_id.is_some()))
                .unwrap_or(false)
        })
        .await;
        loop {
            match rx.recv().await.unwrap() {
                UiEvent::Session {
                    event: parley_session::SessionEvent::Started,
                    ..
                } => break,
                _ => continue,
            }
        }

        mux.open_project("/proj/b", ProjectConfig::default()).unwrap();
        while rx.try_recv().is_ok() {}

        // Project a is unfocused: its turn completion lands in activity,
        // not on the UI channel
        mux.route_envelope(envelope(
            &sid,
            Event::Result {
                is_error: false,
                subtype: None,
            },
        ));
        wait_until(|| {
            mux.tabs()
                .iter()
                .find(|t| t.path == "/proj/a")
                .map(|t| t.activity.lock().entries().count() > 0)
                .unwrap_or(false)
        })
        .await;

        let activity = mux.take_activity("/proj/a").unwrap();
        assert!(activity.iter().any(|e| e.summary == "turn completed"));
        while let Ok(event) = rx.try_recv() {
            if let UiEvent::Session { project, event, .. } = event {
                // A straggling persistence update is the only thing the
                // unfocused project may still deliver live
                if !matches!(event, parley_session::SessionEvent::MessageUpdated { .. }) {
                    assert_ne!(project, "/proj/a");
                }
            }
        }
    }

    #[tokio::test]
    async fn test_close_project_aborts_owned_sessions_and_promotes_focus() {
        let (mut mux, _store, link, _rx) = setup();
        mux.open_project("/proj/a", ProjectConfig::default()).unwrap();
        let sid = mux.start_turn("/proj/a", "hello", vec![]).await.unwrap();
        mux.route_envelope(envelope(&sid, Event::SessionStarted));
        mux.open_project("/proj/b", ProjectConfig::default()).unwrap();

        mux.close_project("/proj/a").await.unwrap();
        assert!(
            link.sent()
                .iter()
                .any(|c| matches!(c, Command::Abort { session_id } if session_id == &sid))
        );
        assert_eq!(mux.active_project().unwrap().path, "/proj/b");
        assert_eq!(mux.tabs().len(), 1);

        // Envelopes for the closed project's session now fall on the floor
        mux.route_envelope(envelope(&sid, Event::SessionEnded));
    }

    #[tokio::test]
    async fn test_duplicate_display_names_disambiguated() {
        let (mut mux, _store, _link, _rx) = setup();
        mux.open_project("/home/x/app", ProjectConfig::default()).unwrap();
        mux.open_project("/home/y/app", ProjectConfig::default()).unwrap();
        let names: Vec<&str> = mux.tabs().iter().map(|t| t.display_name.as_str()).collect();
        assert_eq!(names, vec!["app", "app (2)"]);
    }

    #[tokio::test]
    async fn test_select_conversation_loads_history() {
        let (mut mux, store, _link, _rx) = setup();
        mux.open_project("/proj/a", ProjectConfig::default()).unwrap();

        let conv = Conversation::new("/proj/a", "/proj/a");
        store.create_conversation(&conv).await.unwrap();
        store
            .save_message(&conv.id, &parley_protocol::TranscriptMessage::user_text("old"))
            .await
            .unwrap();

        mux.select_conversation("/proj/a", &conv.id).await.unwrap();
        let state = mux.working_state("/proj/a").unwrap();
        assert_eq!(state.transcript.len(), 1);
        assert_eq!(state.transcript[0].text(), "old");
        assert!(!state.awaiting_decision);
    }

    #[tokio::test]
    async fn test_derive_title() {
        assert_eq!(derive_title("fix the login bug\ndetails..."), "fix the login bug");
        let long = "x".repeat(120);
        let title = derive_title(&long);
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }
}
