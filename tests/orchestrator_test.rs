//! Orchestrator tests over scripted backend and remote-store fakes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tempfile::TempDir;

use gemchat::api::{
    ActivateResponse, ConversationSummary, GemsResponse, GetConversationResponse, HistoryResponse,
    ResetResponse, Role, Turn,
};
use gemchat::client::{
    ChatBackend, ChatFrameStream, ClientError, RemoteConversations, Result as ClientResult,
};
use gemchat::frame::Frame;
use gemchat::gems::GemDescriptor;
use gemchat::orchestrator::{
    HistoryChoice, Orchestrator, OrchestratorError, RestoredHistory, SendOptions, SendOutcome,
};
use gemchat::render::MessageView;
use gemchat::session::{DriveOptions, Outcome, TRANSPORT_FAILURE_MESSAGE};
use gemchat::store::{ConversationBridge, ConversationRecord, FileConversationCache, SyncStatus};

// ============================================================================
// Fakes
// ============================================================================

/// Scripted chat backend. Cloning shares the counters.
#[derive(Clone)]
struct FakeBackend {
    frames: Vec<Frame>,
    /// Serve a stream that never yields, for cancellation tests.
    hang: bool,
    /// Refuse to open the stream at all.
    fail_stream: Arc<AtomicBool>,
    /// Fail history fetches while set.
    fail_history: Arc<AtomicBool>,
    stream_calls: Arc<AtomicUsize>,
    activate_calls: Arc<AtomicUsize>,
    reset_calls: Arc<AtomicUsize>,
    history: HistoryResponse,
    gems: Vec<GemDescriptor>,
}

impl FakeBackend {
    fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            hang: false,
            fail_stream: Arc::new(AtomicBool::new(false)),
            fail_history: Arc::new(AtomicBool::new(false)),
            stream_calls: Arc::new(AtomicUsize::new(0)),
            activate_calls: Arc::new(AtomicUsize::new(0)),
            reset_calls: Arc::new(AtomicUsize::new(0)),
            history: HistoryResponse::default(),
            gems: vec![
                gem("mapper", "The Mapper"),
                gem("tutor", "The Tutor"),
                gem("quizzer", "The Quizzer"),
            ],
        }
    }

    fn hanging() -> Self {
        let mut backend = Self::new(Vec::new());
        backend.hang = true;
        backend
    }
}

fn gem(id: &str, name: &str) -> GemDescriptor {
    GemDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        emoji: None,
        role: None,
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn stream_chat(&self, _message: &str) -> ClientResult<ChatFrameStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stream.load(Ordering::SeqCst) {
            return Err(ClientError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        if self.hang {
            Ok(Box::pin(stream::pending()))
        } else {
            let frames: Vec<ClientResult<Frame>> =
                self.frames.iter().cloned().map(Ok).collect();
            Ok(Box::pin(stream::iter(frames)))
        }
    }

    async fn history(&self) -> ClientResult<HistoryResponse> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(ClientError::Api {
                status: 500,
                message: "history unavailable".to_string(),
            });
        }
        Ok(self.history.clone())
    }

    async fn list_gems(&self) -> ClientResult<GemsResponse> {
        Ok(GemsResponse {
            gems: self.gems.clone(),
            current_gem: self.history.current_gem.clone(),
        })
    }

    async fn activate_gem(&self, gem_id: &str) -> ClientResult<ActivateResponse> {
        self.activate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ActivateResponse {
            message: format!("Activated {gem_id}"),
        })
    }

    async fn reset(&self) -> ClientResult<ResetResponse> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResetResponse {
            message: "Journey reset".to_string(),
        })
    }
}

/// Remote conversation store that always succeeds and records appends.
#[derive(Clone, Default)]
struct RecordingRemote {
    appended: Arc<Mutex<Vec<Turn>>>,
}

#[async_trait]
impl RemoteConversations for RecordingRemote {
    async fn list_conversations(&self) -> ClientResult<Vec<ConversationSummary>> {
        Ok(Vec::new())
    }

    async fn fetch_conversation(&self, id: &str) -> ClientResult<GetConversationResponse> {
        Ok(GetConversationResponse {
            id: id.to_string(),
            title: String::new(),
            messages: Vec::new(),
        })
    }

    async fn append_turns(&self, _id: &str, turns: &[Turn]) -> ClientResult<()> {
        self.appended.lock().unwrap().extend_from_slice(turns);
        Ok(())
    }

    async fn rename_conversation(&self, _id: &str, _title: &str) -> ClientResult<()> {
        Ok(())
    }

    async fn delete_conversation(&self, _id: &str) -> ClientResult<()> {
        Ok(())
    }
}

fn options() -> DriveOptions {
    DriveOptions {
        stall_timeout: Duration::from_millis(300),
        busy_tick: Duration::from_millis(20),
    }
}

fn build(
    backend: FakeBackend,
    remote: RecordingRemote,
    dir: &TempDir,
) -> Orchestrator<FakeBackend, RecordingRemote> {
    let cache = FileConversationCache::new(dir.path().join("conversations"));
    Orchestrator::new(backend, ConversationBridge::new(remote, cache), options())
}

fn hello_frames() -> Vec<Frame> {
    vec![
        Frame::Start,
        Frame::Chunk {
            accumulated: "Hel".to_string(),
            gem_name: Some("The Mapper".to_string()),
            is_orchestrator: false,
        },
        Frame::Done {
            answer: "Hello!".to_string(),
            gem_name: Some("The Mapper".to_string()),
            is_orchestrator: false,
            error: None,
        },
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn send_streams_persists_and_reports_success() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::new(hello_frames());
    let remote = RecordingRemote::default();
    let app = build(backend, remote.clone(), &dir);

    let mut views = Vec::new();
    let outcome = app
        .send("hi there", SendOptions::default(), |view| {
            views.push(view.clone());
        })
        .await
        .unwrap();

    match outcome {
        SendOutcome::Completed { outcome, sync } => {
            assert_eq!(sync, SyncStatus::Synced);
            match outcome {
                Outcome::Success { answer, .. } => assert_eq!(answer, "Hello!"),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        other => panic!("unexpected send outcome: {other:?}"),
    }

    // The final projected view is the finalized block.
    assert!(matches!(views.last(), Some(MessageView::Final { .. })));

    // Both sides of the exchange reached the server store.
    let appended = remote.appended.lock().unwrap();
    assert_eq!(appended.len(), 2);
    assert_eq!(appended[0].role, Role::User);
    assert_eq!(appended[0].content, "hi there");
    assert_eq!(appended[1].content, "Hello!");
}

#[tokio::test]
async fn concurrent_send_rejected_without_network_call() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::hanging();
    let stream_calls = backend.stream_calls.clone();
    let app = Arc::new(build(backend, RecordingRemote::default(), &dir));

    let first = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.send("first", SendOptions::default(), |_| {}).await })
    };

    // Let the first send claim the busy gate and open its stream.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(app.is_busy());

    let second = app.send("second", SendOptions::default(), |_| {}).await;
    assert!(matches!(second, Err(OrchestratorError::Busy)));
    assert_eq!(stream_calls.load(Ordering::SeqCst), 1);

    // Cancel the hung exchange; it settles via the stall timeout.
    app.cancel();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first, SendOutcome::Cancelled);
    assert!(!app.is_busy());
}

#[tokio::test]
async fn cancelled_send_persists_nothing() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::hanging();
    let remote = RecordingRemote::default();
    let app = Arc::new(build(backend, remote.clone(), &dir));

    let send = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.send("doomed", SendOptions::default(), |_| {}).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    app.cancel();

    assert_eq!(send.await.unwrap().unwrap(), SendOutcome::Cancelled);
    assert!(remote.appended.lock().unwrap().is_empty());
    assert!(app.conversations().list_local().await.unwrap().is_empty());
}

#[tokio::test]
async fn silent_send_projects_no_message_block_but_persists() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::new(hello_frames());
    let remote = RecordingRemote::default();
    let app = build(backend, remote.clone(), &dir);

    let mut views = Vec::new();
    let outcome = app
        .send("internal command", SendOptions { silent: true }, |view| {
            views.push(view.clone());
        })
        .await
        .unwrap();

    assert!(matches!(outcome, SendOutcome::Completed { .. }));
    assert!(
        views
            .iter()
            .all(|v| !matches!(v, MessageView::Final { .. } | MessageView::Streaming { .. })),
        "silent sends must only ever show the transient indicator"
    );

    // Persist still ran: the answer is stored, the hidden prompt is not.
    let appended = remote.appended.lock().unwrap();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].role, Role::Assistant);
}

#[tokio::test]
async fn activate_unknown_gem_fails_before_activation_call() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::new(Vec::new());
    let activate_calls = backend.activate_calls.clone();
    let app = build(backend, RecordingRemote::default(), &dir);

    let err = app.activate("nonexistent").await.unwrap_err();
    match err {
        OrchestratorError::UnknownGem(id) => assert_eq!(id, "nonexistent"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(activate_calls.load(Ordering::SeqCst), 0);

    let (message, _) = app.activate("tutor").await.unwrap();
    assert_eq!(message, "Activated tutor");
    assert_eq!(activate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restore_history_offers_the_choice_once() {
    let dir = TempDir::new().unwrap();
    let mut backend = FakeBackend::new(Vec::new());
    backend.history = HistoryResponse {
        active_history: vec![
            Turn::new(Role::User, "saved question"),
            Turn::new(Role::Assistant, "saved answer"),
        ],
        current_gem: Some("mapper".to_string()),
        ..HistoryResponse::default()
    };
    let app = build(backend, RecordingRemote::default(), &dir);

    let restored = app
        .restore_history(|turns| {
            assert_eq!(turns.len(), 2);
            HistoryChoice::Continue
        })
        .await
        .unwrap();
    match restored {
        RestoredHistory::Continued {
            current_gem,
            messages,
        } => {
            assert_eq!(current_gem.as_deref(), Some("mapper"));
            assert_eq!(messages.len(), 1);
        }
        other => panic!("unexpected restore result: {other:?}"),
    }

    // Second call must not offer the choice again.
    let again = app
        .restore_history(|_| panic!("choice offered twice"))
        .await
        .unwrap();
    assert_eq!(again, RestoredHistory::AlreadyRestored);
}

#[tokio::test]
async fn restore_history_reset_clears_server_state() {
    let dir = TempDir::new().unwrap();
    let mut backend = FakeBackend::new(Vec::new());
    backend.history = HistoryResponse {
        active_history: vec![Turn::new(Role::User, "old question")],
        ..HistoryResponse::default()
    };
    let reset_calls = backend.reset_calls.clone();
    let app = build(backend, RecordingRemote::default(), &dir);

    let restored = app.restore_history(|_| HistoryChoice::Reset).await.unwrap();
    assert_eq!(restored, RestoredHistory::Fresh);
    assert_eq!(reset_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn progress_reflects_completed_prefix() {
    let dir = TempDir::new().unwrap();
    let mut backend = FakeBackend::new(Vec::new());
    backend.history = HistoryResponse {
        current_gem: Some("quizzer".to_string()),
        completed_gems: vec!["mapper".to_string(), "tutor".to_string()],
        ..HistoryResponse::default()
    };
    let app = build(backend, RecordingRemote::default(), &dir);

    let progress = app.progress().await.unwrap();
    assert_eq!(progress.fraction(), (2, 3));
    assert!(progress.is_completed("mapper"));
    assert_eq!(progress.current(), Some("quizzer"));
}

#[tokio::test]
async fn failed_exchange_leaves_the_orchestrator_usable() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::new(vec![Frame::Error {
        error: "gem unavailable".to_string(),
    }]);
    let app = build(backend, RecordingRemote::default(), &dir);

    let outcome = app.send("hi", SendOptions::default(), |_| {}).await.unwrap();
    match outcome {
        SendOutcome::Completed { outcome, .. } => {
            assert!(matches!(outcome, Outcome::Failure { .. }));
        }
        other => panic!("unexpected send outcome: {other:?}"),
    }

    // The busy gate was released; the next send goes through.
    assert!(!app.is_busy());
    let backend2 = app.send("hi again", SendOptions::default(), |_| {}).await;
    assert!(backend2.is_ok());
}

#[tokio::test]
async fn failed_stream_open_settles_projects_and_persists() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::new(Vec::new());
    backend.fail_stream.store(true, Ordering::SeqCst);
    let remote = RecordingRemote::default();
    let app = build(backend, remote.clone(), &dir);

    let mut views = Vec::new();
    let outcome = app
        .send("hi", SendOptions::default(), |view| views.push(view.clone()))
        .await
        .unwrap();

    match outcome {
        SendOutcome::Completed { outcome, sync } => {
            assert_eq!(sync, SyncStatus::Synced);
            match outcome {
                Outcome::Failure { message, detail } => {
                    assert_eq!(message, TRANSPORT_FAILURE_MESSAGE);
                    assert!(detail.unwrap().contains("503"));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        other => panic!("unexpected send outcome: {other:?}"),
    }

    // The failure is shown as a finalized block carrying the generic
    // user-facing message.
    match views.last() {
        Some(MessageView::Final { error, .. }) => {
            assert_eq!(error.as_deref(), Some(TRANSPORT_FAILURE_MESSAGE));
        }
        other => panic!("unexpected view: {other:?}"),
    }

    // And recorded, so it is still visible after a reload.
    let appended = remote.appended.lock().unwrap();
    assert_eq!(appended.len(), 2);
    assert_eq!(appended[0].content, "hi");
    assert_eq!(appended[1].role, Role::Assistant);
    assert_eq!(appended[1].content, TRANSPORT_FAILURE_MESSAGE);
    assert!(!app.is_busy());
}

#[tokio::test]
async fn reset_journey_keeps_archived_conversations() {
    let dir = TempDir::new().unwrap();
    let backend = FakeBackend::new(hello_frames());
    let app = build(backend, RecordingRemote::default(), &dir);

    // An archived conversation from an earlier journey, with a turn
    // still waiting to reach the server.
    let cache = FileConversationCache::new(dir.path().join("conversations"));
    let mut archived = ConversationRecord::new("conv_archived");
    archived.push_turn(Turn::new(Role::User, "old journey question"));
    cache.save(&archived).await.unwrap();

    // Establish an active conversation, then reset the journey.
    app.send("hi", SendOptions::default(), |_| {}).await.unwrap();
    assert_eq!(app.conversations().list_local().await.unwrap().len(), 2);

    app.reset_journey().await.unwrap();

    let remaining = app.conversations().list_local().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "conv_archived");
    assert!(remaining[0].pending());
}

#[tokio::test]
async fn restore_history_retries_after_a_failed_fetch() {
    let dir = TempDir::new().unwrap();
    let mut backend = FakeBackend::new(Vec::new());
    backend.history = HistoryResponse {
        active_history: vec![Turn::new(Role::User, "saved question")],
        ..HistoryResponse::default()
    };
    let fail_history = backend.fail_history.clone();
    let app = build(backend, RecordingRemote::default(), &dir);

    fail_history.store(true, Ordering::SeqCst);
    let err = app
        .restore_history(|_| panic!("no transcript to choose over"))
        .await;
    assert!(err.is_err());

    // A transient startup failure must not consume the one-time choice.
    fail_history.store(false, Ordering::SeqCst);
    let restored = app
        .restore_history(|_| HistoryChoice::Continue)
        .await
        .unwrap();
    assert!(matches!(restored, RestoredHistory::Continued { .. }));

    let again = app
        .restore_history(|_| panic!("choice offered twice"))
        .await
        .unwrap();
    assert_eq!(again, RestoredHistory::AlreadyRestored);
}
