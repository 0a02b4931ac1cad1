use std::sync::Arc;
use std::thread;

use app_lib::db::models::{
    ApplicationStatus, ApplyInput, CreateWorkItemInput, MemberStatus, ReviewInput, SendMessageInput,
    SubmissionStatus, SubmitInput, WorkItemStatus,
};
use app_lib::db::repos::{teams as team_repo, work_items as work_repo};
use app_lib::db::{open_pool, DbPool};
use app_lib::engine::blob::LocalBlobStore;
use app_lib::engine::chat::{self, ChatLimits};
use app_lib::engine::hub::HubHandle;
use app_lib::engine::identity::{HmacIdentityProvider, Identity, Role};
use app_lib::engine::workflow;
use app_lib::error::AppError;
use app_lib::notifications::{self, Notifier};
use app_lib::AppState;
use tokio_util::sync::CancellationToken;

const SECRET: &str = "integration-test-secret";

fn temp_pool(dir: &tempfile::TempDir) -> DbPool {
    open_pool(&dir.path().join("teamwork.db"), 8).unwrap()
}

fn requester() -> Identity {
    Identity::new("owner", Role::Requester)
}

fn responder(id: &str) -> Identity {
    Identity::new(id, Role::Responder)
}

fn new_item(pool: &DbPool) -> String {
    workflow::create_work_item(
        pool,
        &requester(),
        CreateWorkItemInput {
            title: "Mobile onboarding flow".into(),
            description: Some("Three screens".into()),
            deadline: Some("2026-12-31T23:59:59Z".into()),
        },
    )
    .unwrap()
    .id
}

fn apply(pool: &DbPool, notifier: &Notifier, who: &str, item_id: &str) -> String {
    workflow::apply(
        pool,
        notifier,
        &responder(who),
        item_id,
        ApplyInput {
            cover_letter: format!("{who} has shipped this before"),
            resume: None,
        },
    )
    .unwrap()
    .id
}

fn team_count(pool: &DbPool, work_item_id: &str) -> i64 {
    let conn = pool.get().unwrap();
    conn.query_row(
        "SELECT COUNT(*) FROM teams WHERE work_item_id = ?1",
        [work_item_id],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn test_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let pool = temp_pool(&dir);
    let (notifier, mut outbox) = Notifier::channel();
    let item_id = new_item(&pool);

    let app_id = apply(&pool, &notifier, "dana", &item_id);
    workflow::shortlist(&pool, &notifier, &requester(), &item_id, &app_id).unwrap();
    let outcome = workflow::accept(&pool, &notifier, &requester(), &item_id, &app_id).unwrap();
    assert_eq!(outcome.application.status, ApplicationStatus::Accepted);

    let submission = workflow::submit(
        &pool,
        &notifier,
        &responder("dana"),
        &item_id,
        SubmitInput {
            demo_link: Some("https://demo.example.com/onboarding".into()),
            notes: Some("First cut".into()),
            ..Default::default()
        },
    )
    .unwrap();

    workflow::review_submission(
        &pool,
        &notifier,
        &requester(),
        &item_id,
        &submission.id,
        ReviewInput {
            status: SubmissionStatus::UnderReview,
            feedback: None,
        },
    )
    .unwrap();
    assert_eq!(
        work_repo::get_by_id(&pool, &item_id).unwrap().status,
        WorkItemStatus::InProgress
    );

    let approved = workflow::approve(&pool, &notifier, &requester(), &item_id).unwrap();
    assert_eq!(approved.id, submission.id);
    assert_eq!(approved.status, SubmissionStatus::Approved);

    let item = work_repo::get_by_id(&pool, &item_id).unwrap();
    assert_eq!(item.status, WorkItemStatus::Completed);
    assert_eq!(item.selected, vec!["dana".to_string()]);

    let mut keys = Vec::new();
    while let Ok(n) = outbox.try_recv() {
        keys.push(n.template_key);
    }
    assert_eq!(
        keys,
        vec![
            notifications::APPLICATION_RECEIVED,
            notifications::APPLICATION_SHORTLISTED,
            notifications::APPLICATION_ACCEPTED,
            notifications::SUBMISSION_RECEIVED,
            notifications::SUBMISSION_REVIEWED,
            notifications::SUBMISSION_REVIEWED,
            notifications::WORK_ITEM_COMPLETED,
        ]
    );
}

#[test]
fn test_concurrent_accepts_form_one_team() {
    let dir = tempfile::tempdir().unwrap();
    let pool = temp_pool(&dir);
    let (notifier, _outbox) = Notifier::channel();
    let item_id = new_item(&pool);

    let applicants = ["ana", "ben", "cy", "dee"];
    let app_ids: Vec<String> = applicants
        .iter()
        .map(|who| apply(&pool, &notifier, who, &item_id))
        .collect();

    let handles: Vec<_> = app_ids
        .into_iter()
        .map(|app_id| {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let item_id = item_id.clone();
            thread::spawn(move || workflow::accept(&pool, &notifier, &requester(), &item_id, &app_id))
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.join().unwrap() {
            panic!("accept failed: {e}");
        }
    }

    assert_eq!(team_count(&pool, &item_id), 1);
    let item = work_repo::get_by_id(&pool, &item_id).unwrap();
    let team = team_repo::get_by_id(&pool, item.team_id.as_deref().unwrap()).unwrap();
    assert_eq!(team.members.len(), applicants.len() + 1);
    assert_eq!(item.selected.len(), applicants.len());
    for who in applicants {
        assert!(team.is_active_member(who));
    }
}

#[test]
fn test_repeated_accept_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let pool = temp_pool(&dir);
    let (notifier, mut outbox) = Notifier::channel();
    let item_id = new_item(&pool);
    let app_id = apply(&pool, &notifier, "eli", &item_id);
    let _ = outbox.try_recv();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let notifier = notifier.clone();
            let item_id = item_id.clone();
            let app_id = app_id.clone();
            thread::spawn(move || workflow::accept(&pool, &notifier, &requester(), &item_id, &app_id))
        })
        .collect();
    let ok = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap().ok())
        .count();
    assert_eq!(ok, 4);

    assert_eq!(team_count(&pool, &item_id), 1);
    let item = work_repo::get_by_id(&pool, &item_id).unwrap();
    let team = team_repo::get_by_id(&pool, item.team_id.as_deref().unwrap()).unwrap();
    assert_eq!(team.members.len(), 2);
    assert_eq!(item.selected, vec!["eli".to_string()]);

    let mut accepted = 0;
    while let Ok(n) = outbox.try_recv() {
        if n.template_key == notifications::APPLICATION_ACCEPTED {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn test_removed_member_loses_room_access() {
    let dir = tempfile::tempdir().unwrap();
    let pool = temp_pool(&dir);
    let (notifier, _outbox) = Notifier::channel();
    let (hub, _task) = HubHandle::spawn();
    let limits = ChatLimits::default();
    let item_id = new_item(&pool);
    let app_id = apply(&pool, &notifier, "fay", &item_id);
    let team_id = workflow::accept(&pool, &notifier, &requester(), &item_id, &app_id)
        .unwrap()
        .team
        .id;

    let fay = responder("fay");
    chat::send_message(
        &pool,
        &hub,
        &limits,
        &fay,
        &team_id,
        SendMessageInput {
            content: Some("hello team".into()),
            ..Default::default()
        },
    )
    .unwrap();

    let view = workflow::remove_member(&pool, &requester(), &team_id, "fay").unwrap();
    let fay_entry = view.members.iter().find(|m| m.principal_id == "fay").unwrap();
    assert_eq!(fay_entry.status, MemberStatus::Removed);

    let err = chat::list_messages(&pool, &limits, &fay, &team_id, None, None).unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
    let page = chat::list_messages(&pool, &limits, &requester(), &team_id, None, None).unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_concurrent_reaction_toggles_settle_by_parity() {
    let dir = tempfile::tempdir().unwrap();
    let pool = temp_pool(&dir);
    let (notifier, _outbox) = Notifier::channel();
    let (hub, _task) = HubHandle::spawn();
    let item_id = new_item(&pool);
    let app_id = apply(&pool, &notifier, "gus", &item_id);
    let team_id = workflow::accept(&pool, &notifier, &requester(), &item_id, &app_id)
        .unwrap()
        .team
        .id;

    for toggles in [4usize, 5] {
        let message_id = chat::send_message(
            &pool,
            &hub,
            &ChatLimits::default(),
            &responder("gus"),
            &team_id,
            SendMessageInput {
                content: Some(format!("{toggles} toggles")),
                ..Default::default()
            },
        )
        .unwrap()
        .id;

        let handles: Vec<_> = (0..toggles)
            .map(|_| {
                let pool = pool.clone();
                let hub = hub.clone();
                let team_id = team_id.clone();
                let message_id = message_id.clone();
                thread::spawn(move || {
                    chat::toggle_reaction(&pool, &hub, &requester(), &team_id, &message_id, "👍")
                })
            })
            .collect();
        for handle in handles {
            if let Err(e) = handle.join().unwrap() {
                panic!("toggle failed: {e}");
            }
        }

        let team = team_repo::get_by_id(&pool, &team_id).unwrap();
        let message = team.messages.iter().find(|m| m.id == message_id).unwrap();
        let matching = message
            .reactions
            .iter()
            .filter(|r| r.principal_id == "owner" && r.emoji == "👍")
            .count();
        assert_eq!(matching, toggles % 2);
        assert_eq!(message.reactions.len(), toggles % 2);
    }
}

// ============================================================================
// HTTP surface
// ============================================================================

struct Server {
    base: String,
    tokens: HmacIdentityProvider,
    shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Server {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = temp_pool(&dir);
        let (notifier, _worker) = Notifier::spawn(Arc::new(notifications::LogSink));
        let (hub, _hub_task) = HubHandle::spawn();
        let shutdown = CancellationToken::new();

        let state = Arc::new(AppState {
            db: pool,
            hub,
            identity: Arc::new(HmacIdentityProvider::new(SECRET)),
            blobs: Arc::new(LocalBlobStore::new(dir.path().join("blobs"))),
            notifier,
            limits: ChatLimits::default(),
            max_upload_bytes: 1024,
            shutdown: shutdown.clone(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(app_lib::serve(listener, state));

        Server {
            base,
            tokens: HmacIdentityProvider::new(SECRET),
            shutdown,
            _dir: dir,
        }
    }

    fn token(&self, identity: &Identity) -> String {
        self.tokens.issue(identity, None).unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_apply_accept_and_chat() {
    let server = Server::start().await;
    let http = reqwest::Client::new();
    let owner = server.token(&requester());
    let gus = server.token(&responder("gus"));

    let health: serde_json::Value = http
        .get(format!("{}/health", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let anonymous = http
        .post(format!("{}/api/work-items", server.base))
        .json(&serde_json::json!({ "title": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), reqwest::StatusCode::UNAUTHORIZED);

    let item: serde_json::Value = http
        .post(format!("{}/api/work-items", server.base))
        .bearer_auth(&owner)
        .json(&serde_json::json!({ "title": "API docs" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let item_id = item["id"].as_str().unwrap().to_string();
    assert_eq!(item["status"], "open");

    let application: serde_json::Value = http
        .post(format!("{}/api/work-items/{item_id}/applications", server.base))
        .bearer_auth(&gus)
        .json(&serde_json::json!({ "cover_letter": "I write docs" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let app_id = application["id"].as_str().unwrap().to_string();

    let duplicate = http
        .post(format!("{}/api/work-items/{item_id}/applications", server.base))
        .bearer_auth(&gus)
        .json(&serde_json::json!({ "cover_letter": "Again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), reqwest::StatusCode::CONFLICT);
    let body: serde_json::Value = duplicate.json().await.unwrap();
    assert_eq!(body["kind"], "duplicate_application");

    let forbidden = http
        .post(format!(
            "{}/api/work-items/{item_id}/applications/{app_id}/accept",
            server.base
        ))
        .bearer_auth(&gus)
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), reqwest::StatusCode::FORBIDDEN);

    let outcome: serde_json::Value = http
        .post(format!(
            "{}/api/work-items/{item_id}/applications/{app_id}/accept",
            server.base
        ))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["membership"], "added");
    let team_id = outcome["team"]["id"].as_str().unwrap().to_string();

    let sent = http
        .post(format!("{}/api/teams/{team_id}/messages", server.base))
        .bearer_auth(&gus)
        .json(&serde_json::json!({ "content": "<b>hi</b> all" }))
        .send()
        .await
        .unwrap();
    assert_eq!(sent.status(), reqwest::StatusCode::CREATED);

    let page: serde_json::Value = http
        .get(format!("{}/api/teams/{team_id}/messages?page=1&limit=10", server.base))
        .bearer_auth(&owner)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["has_next"], false);
    assert_eq!(page["messages"][0]["sender_id"], "gus");
    assert!(!page["messages"][0]["content"].as_str().unwrap().contains("<b>"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_http_blob_roundtrip_and_limit() {
    let server = Server::start().await;
    let http = reqwest::Client::new();
    let token = server.token(&responder("hal"));

    let stored: serde_json::Value = http
        .put(format!("{}/api/blobs", server.base))
        .bearer_auth(&token)
        .header("content-type", "image/png")
        .header("x-filename", "logo.png")
        .body(vec![7u8; 64])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stored["size_bytes"], 64);
    let locator = stored["locator"].as_str().unwrap();

    let fetched = http
        .get(format!("{}/api/blobs/{locator}", server.base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(fetched.headers()["content-type"], "image/png");
    assert_eq!(fetched.bytes().await.unwrap().len(), 64);

    let too_big = http
        .put(format!("{}/api/blobs", server.base))
        .bearer_auth(&token)
        .header("content-type", "application/zip")
        .header("x-filename", "big.zip")
        .body(vec![0u8; 4096])
        .send()
        .await
        .unwrap();
    assert_eq!(too_big.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
}
