//! Admin panel and broadcast journeys through the public API.

use crux_core::testing::AppTester;
use crux_core::Request;
use studio_core::admin::AudienceFilter;
use studio_core::api::ApiConfig;
use studio_core::capabilities::{HttpRequest, HttpResponse, KvOutput};
use studio_core::{App, Effect, Event, Model, SessionContext};

fn config() -> ApiConfig {
    ApiConfig {
        api_base: "https://flows.test/webhook".into(),
        upload_base: None,
        bot_name: "avatar_studio_bot".into(),
    }
}

fn session() -> SessionContext {
    SessionContext {
        user_id: 99,
        username: Some("admin".into()),
        init_data: "query_id=adm".into(),
        start_param: None,
    }
}

fn http_requests(effects: Vec<Effect>) -> Vec<Request<HttpRequest>> {
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Backend(request) => Some(request),
            _ => None,
        })
        .collect()
}

fn ok_json(body: &str) -> studio_core::capabilities::HttpResult {
    Ok(HttpResponse {
        status: 200,
        body: body.as_bytes().to_vec(),
    })
}

fn boot(app: &AppTester<App, Effect>, model: &mut Model) {
    let update = app.update(
        Event::Started {
            session: session(),
            config: config(),
        },
        model,
    );
    for effect in update.effects {
        match effect {
            Effect::Backend(mut request) => {
                let update = app
                    .resolve(&mut request, ok_json(r#"{"star_balance": 0}"#))
                    .expect("resolve status");
                for event in update.events {
                    app.update(event, model);
                }
            }
            Effect::Storage(mut request) => {
                let update = app
                    .resolve(&mut request, Ok(KvOutput::Value(None)))
                    .expect("resolve history load");
                for event in update.events {
                    app.update(event, model);
                }
            }
            Effect::Render(_) | Effect::Host(_) => {}
        }
    }
}

fn open_admin(app: &AppTester<App, Effect>, model: &mut Model) {
    let update = app.update(
        Event::AdminOpened {
            password: "hunter2".into(),
        },
        model,
    );
    let mut request = http_requests(update.effects).remove(0);
    assert!(request.operation.url.ends_with("/admin-stats"));
    let stats = r#"{
        "total_users": 3,
        "paying_users": 1,
        "total_star_balance": 250,
        "users": [
            {"user_id": 1, "username": "ada", "star_balance": 250},
            {"user_id": 2, "username": "grace", "star_balance": 0},
            {"user_id": 3, "star_balance": 0, "blocked": true}
        ]
    }"#;
    let update = app.resolve(&mut request, ok_json(stats)).expect("resolve stats");
    for event in update.events {
        app.update(event, model);
    }
}

#[test]
fn wrong_password_surfaces_the_backend_refusal() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model);

    let update = app.update(
        Event::AdminOpened {
            password: "wrong".into(),
        },
        &mut model,
    );
    let mut request = http_requests(update.effects).remove(0);
    let update = app
        .resolve(
            &mut request,
            Ok(HttpResponse {
                status: 403,
                body: br#"{"error": "invalid_password", "message": "Wrong password"}"#.to_vec(),
            }),
        )
        .expect("resolve stats");
    for event in update.events {
        app.update(event, &mut model);
    }
    let view = app.view(&model);
    let admin = view.admin.expect("admin view while panel is open");
    assert_eq!(admin.error, Some("You don't have permission to do that.".into()));
    assert!(admin.stats.is_none());
}

#[test]
fn search_filters_users_and_selection_follows() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model);
    open_admin(&app, &mut model);

    let view = app.view(&model);
    let admin = view.admin.expect("admin view");
    assert_eq!(admin.visible_users.len(), 3);

    app.update(Event::AdminSearchChanged("@gra".into()), &mut model);
    let admin = app.view(&model).admin.expect("admin view");
    assert_eq!(admin.visible_users.len(), 1);
    assert_eq!(admin.visible_users[0].user_id, 2);

    app.update(Event::AdminUserSelected(Some(2)), &mut model);
    let admin = app.view(&model).admin.expect("admin view");
    assert_eq!(admin.selected_user.map(|u| u.user_id), Some(2));
}

#[test]
fn balance_adjustment_sends_once_and_refreshes_stats() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model);
    open_admin(&app, &mut model);
    app.update(Event::AdminUserSelected(Some(2)), &mut model);

    let update = app.update(Event::AdminAdjustBalance { delta: 50 }, &mut model);
    let mut requests = http_requests(update.effects);
    assert_eq!(requests.len(), 1);
    assert!(requests[0].operation.url.ends_with("/admin-add-stars"));
    let body: serde_json::Value = serde_json::from_slice(&requests[0].operation.body).unwrap();
    assert_eq!(body["password"], "hunter2");
    assert_eq!(body["user_id"], 2);
    assert_eq!(body["amount"], 50);

    let update = app
        .resolve(
            &mut requests[0],
            ok_json(r#"{"user_id": 2, "star_balance": 50, "username": "grace"}"#),
        )
        .expect("resolve adjustment");
    let mut saw_refresh = false;
    for event in update.events {
        let follow_up = app.update(event, &mut model);
        for request in http_requests(follow_up.effects) {
            assert!(request.operation.url.ends_with("/admin-stats"));
            saw_refresh = true;
        }
    }
    assert!(saw_refresh, "stats should refresh after the adjustment");
    let admin = app.view(&model).admin.expect("admin view");
    assert_eq!(admin.note, Some("Balance of grace is now 50 stars".into()));
}

#[test]
fn zero_delta_adjustment_is_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model);
    open_admin(&app, &mut model);
    app.update(Event::AdminUserSelected(Some(2)), &mut model);

    let update = app.update(Event::AdminAdjustBalance { delta: 0 }, &mut model);
    assert!(http_requests(update.effects).is_empty());
}

#[test]
fn block_flow_requires_confirmation_and_sends_the_target_state() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model);
    open_admin(&app, &mut model);
    app.update(Event::AdminUserSelected(Some(1)), &mut model);

    let update = app.update(Event::AdminBlockRequested { blocked: true }, &mut model);
    assert!(http_requests(update.effects).is_empty());
    let admin = app.view(&model).admin.expect("admin view");
    assert_eq!(admin.confirmation_prompt, Some("Block user 1?".into()));

    let update = app.update(Event::AdminBlockConfirmed, &mut model);
    let mut requests = http_requests(update.effects);
    assert_eq!(requests.len(), 1);
    assert!(requests[0].operation.url.ends_with("/admin-block-user"));
    let body: serde_json::Value = serde_json::from_slice(&requests[0].operation.body).unwrap();
    assert_eq!(body["user_id"], 1);
    assert_eq!(body["blocked"], true);

    let update = app
        .resolve(&mut requests[0], ok_json(r#"{"ok": true}"#))
        .expect("resolve block");
    for event in update.events {
        app.update(event, &mut model);
    }
    assert!(app
        .view(&model)
        .admin
        .expect("admin view")
        .confirmation_prompt
        .is_none());
}

#[test]
fn broadcast_test_send_targets_the_admin_and_ignores_the_schedule() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model);
    open_admin(&app, &mut model);

    let update = app.update(Event::BroadcastOpened, &mut model);
    let mut preview = http_requests(update.effects).remove(0);
    let update = app
        .resolve(&mut preview, ok_json(r#"{"count": 3}"#))
        .expect("resolve preview");
    for event in update.events {
        app.update(event, &mut model);
    }

    app.update(Event::BroadcastTextChanged("Big update!".into()), &mut model);
    app.update(
        Event::BroadcastScheduleChanged(Some("2026-09-01T12:00".into())),
        &mut model,
    );
    app.update(Event::BroadcastButtonAdded, &mut model);
    app.update(
        Event::BroadcastButtonChanged {
            index: 0,
            text: "Open app".into(),
            url: "https://t.me/avatar_studio_bot".into(),
        },
        &mut model,
    );

    let update = app.update(Event::BroadcastSendRequested { test: true }, &mut model);
    let mut requests = http_requests(update.effects);
    assert_eq!(requests.len(), 1);
    assert!(requests[0].operation.url.ends_with("/admin-broadcast-send"));
    let body: serde_json::Value = serde_json::from_slice(&requests[0].operation.body).unwrap();
    assert_eq!(body["message_text"], "Big update!");
    assert_eq!(body["test_user_id"], 99);
    // A test send goes out now even when a schedule is set.
    assert!(body.get("schedule_at").is_none());
    assert_eq!(body["buttons"][0]["text"], "Open app");

    let update = app
        .resolve(&mut requests[0], ok_json(r#"{"status": "test_sent"}"#))
        .expect("resolve send");
    for event in update.events {
        app.update(event, &mut model);
    }
    let broadcast = app
        .view(&model)
        .admin
        .expect("admin view")
        .broadcast
        .expect("broadcast view");
    assert!(!broadcast.sending);
    assert!(broadcast.last_outcome.is_some());
}

#[test]
fn broadcast_filter_change_recounts_the_audience() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model);
    open_admin(&app, &mut model);

    let update = app.update(Event::BroadcastOpened, &mut model);
    let mut preview = http_requests(update.effects).remove(0);
    let update = app
        .resolve(&mut preview, ok_json(r#"{"count": 3}"#))
        .expect("resolve preview");
    for event in update.events {
        app.update(event, &mut model);
    }

    let update = app.update(
        Event::BroadcastFilterChanged(AudienceFilter::HasBalance),
        &mut model,
    );
    let mut preview = http_requests(update.effects).remove(0);
    let body: serde_json::Value = serde_json::from_slice(&preview.operation.body).unwrap();
    assert_eq!(body["filter_type"], "has_balance");
    let update = app
        .resolve(&mut preview, ok_json(r#"{"count": 1}"#))
        .expect("resolve preview");
    for event in update.events {
        app.update(event, &mut model);
    }
    let broadcast = app
        .view(&model)
        .admin
        .expect("admin view")
        .broadcast
        .expect("broadcast view");
    assert_eq!(broadcast.recipient_count, Some(1));
}

#[test]
fn button_count_is_capped_at_three() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model);
    open_admin(&app, &mut model);
    app.update(Event::BroadcastOpened, &mut model);

    for _ in 0..5 {
        app.update(Event::BroadcastButtonAdded, &mut model);
    }
    assert_eq!(model.admin.broadcast.buttons.len(), 3);
}
