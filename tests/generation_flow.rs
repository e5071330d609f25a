//! End-to-end generation journeys through the public API.

use crux_core::testing::AppTester;
use crux_core::Request;
use studio_core::api::ApiConfig;
use studio_core::capabilities::{HttpRequest, HttpResponse, KvOutput};
use studio_core::modes::{Mode, Resolution};
use studio_core::{App, Effect, Event, Model, Screen, SessionContext};

fn config() -> ApiConfig {
    ApiConfig {
        api_base: "https://flows.test/webhook".into(),
        upload_base: None,
        bot_name: "avatar_studio_bot".into(),
    }
}

fn config_with_uploads() -> ApiConfig {
    ApiConfig {
        upload_base: Some("https://uploads.test".into()),
        ..config()
    }
}

fn session() -> SessionContext {
    SessionContext {
        user_id: 7,
        username: Some("grace".into()),
        init_data: "query_id=it".into(),
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

/// Starts the app, resolving the status fetch and the empty history load.
fn boot(
    app: &AppTester<App, Effect>,
    model: &mut Model,
    config: ApiConfig,
    status_json: &str,
) {
    let update = app.update(
        Event::Started {
            session: session(),
            config,
        },
        model,
    );
    for effect in update.effects {
        match effect {
            Effect::Backend(mut request) => {
                let update = app
                    .resolve(&mut request, ok_json(status_json))
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

fn pick_photo(app: &AppTester<App, Effect>, model: &mut Model, slot: usize, tag: u8) {
    app.update(
        Event::PhotoSelected {
            slot,
            data: vec![tag; 16],
            mime_type: "image/jpeg".into(),
        },
        model,
    );
}

#[test]
fn free_stylize_journey_ends_back_on_main_with_a_fresh_draft() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model, config(), r#"{"star_balance": 0, "free_stylize": 1}"#);

    pick_photo(&app, &mut model, 0, b'S');
    app.update(Event::PromptChanged("oil painting".into()), &mut model);

    let update = app.update(Event::GenerateRequested, &mut model);
    assert_eq!(model.screen, Screen::Loading);
    let mut request = http_requests(update.effects).remove(0);
    assert!(request.operation.url.ends_with("/generate"));
    let body: serde_json::Value = serde_json::from_slice(&request.operation.body).unwrap();
    assert_eq!(body["user_id"], 7);
    assert_eq!(body["mode"], "stylize");
    assert_eq!(body["prompt"], "oil painting");
    assert!(body["photo"]["photo_base64"].is_string());

    let update = app
        .resolve(
            &mut request,
            ok_json(r#"[{"image_url": "https://cdn.test/styled.jpg"}]"#),
        )
        .expect("resolve generation");
    let mut saw_persist = false;
    let mut saw_status_refresh = false;
    for event in update.events {
        let follow_up = app.update(event, &mut model);
        for effect in follow_up.effects {
            match effect {
                Effect::Storage(mut request) => {
                    saw_persist = true;
                    let update = app
                        .resolve(&mut request, Ok(KvOutput::Done))
                        .expect("resolve persist");
                    for event in update.events {
                        app.update(event, &mut model);
                    }
                }
                Effect::Backend(mut request) => {
                    assert!(request.operation.url.ends_with("/user-status"));
                    saw_status_refresh = true;
                    let update = app
                        .resolve(
                            &mut request,
                            ok_json(r#"{"star_balance": 0, "free_stylize": 0}"#),
                        )
                        .expect("resolve status");
                    for event in update.events {
                        app.update(event, &mut model);
                    }
                }
                Effect::Render(_) | Effect::Host(_) => {}
            }
        }
    }
    assert!(saw_persist, "successful media result should be persisted");
    assert!(saw_status_refresh, "status must refresh after the generation");

    assert_eq!(model.screen, Screen::Result);
    let view = app.view(&model);
    assert_eq!(view.free_left, Some(0));
    assert_eq!(view.history.len(), 0); // history list renders on its own screen

    app.update(Event::NewGenerationRequested, &mut model);
    assert_eq!(model.screen, Screen::Main);
    let view = app.view(&model);
    assert_eq!(view.filled_slots, 0);
    assert!(view.prompt.is_empty());
}

#[test]
fn style_transfer_uploads_then_generates_with_split_payload() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model, config_with_uploads(), r#"{"star_balance": 100}"#);

    app.update(Event::ModeSelected(Mode::StyleTransfer), &mut model);
    app.update(Event::ResolutionSelected(Resolution::R4k), &mut model);
    pick_photo(&app, &mut model, 0, b'S');
    pick_photo(&app, &mut model, 1, b'1');
    pick_photo(&app, &mut model, 2, b'2');

    // Two references at 4K cost 14 stars.
    let view = app.view(&model);
    assert_eq!(view.cost, 14);
    assert!(view.can_generate);

    let update = app.update(Event::GenerateRequested, &mut model);
    let mut uploads = http_requests(update.effects);
    assert_eq!(uploads.len(), 3);

    let urls = [
        r#"{"file_url": "https://cdn.test/subject.jpg"}"#,
        r#"{"file_url": "https://cdn.test/ref1.jpg"}"#,
        r#"{"file_url": "https://cdn.test/ref2.jpg"}"#,
    ];
    let mut generation = None;
    for (upload, url) in uploads.iter_mut().zip(urls) {
        let update = app.resolve(upload, ok_json(url)).expect("resolve upload");
        for event in update.events {
            let follow_up = app.update(event, &mut model);
            for request in http_requests(follow_up.effects) {
                generation = Some(request);
            }
        }
    }

    let mut generation = generation.expect("generation fires after the last upload");
    assert!(generation
        .operation
        .url
        .ends_with("/generate-style-transfer"));
    let body: serde_json::Value = serde_json::from_slice(&generation.operation.body).unwrap();
    assert_eq!(body["photo"], "https://cdn.test/subject.jpg");
    assert_eq!(
        body["reference_photos"],
        serde_json::json!(["https://cdn.test/ref1.jpg", "https://cdn.test/ref2.jpg"])
    );
    assert_eq!(body["resolution"], "4K");

    let update = app
        .resolve(
            &mut generation,
            ok_json(r#"{"image_url": "https://cdn.test/out.jpg"}"#),
        )
        .expect("resolve generation");
    for event in update.events {
        app.update(event, &mut model);
    }
    assert_eq!(model.screen, Screen::Result);
}

#[test]
fn text_to_image_needs_only_a_prompt() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model, config(), r#"{"star_balance": 10}"#);

    app.update(Event::ModeSelected(Mode::TextToImage), &mut model);
    let view = app.view(&model);
    assert_eq!(view.total_slots, 0);
    assert!(!view.can_generate);

    app.update(Event::PromptChanged("a lighthouse at dawn".into()), &mut model);
    assert!(app.view(&model).can_generate);

    let update = app.update(Event::GenerateRequested, &mut model);
    let request = http_requests(update.effects).remove(0);
    assert!(request.operation.url.ends_with("/generate-text-to-image"));
    let body: serde_json::Value = serde_json::from_slice(&request.operation.body).unwrap();
    assert!(body.get("photo").is_none());
    assert!(body.get("photos").is_none());
    assert_eq!(body["prompt"], "a lighthouse at dawn");
}

#[test]
fn dismissing_an_error_returns_to_main() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model, config(), r#"{"star_balance": 10}"#);

    pick_photo(&app, &mut model, 0, b'X');
    let update = app.update(Event::GenerateRequested, &mut model);
    let mut request = http_requests(update.effects).remove(0);
    let update = app
        .resolve(
            &mut request,
            ok_json(r#"{"error": true, "message": "try later"}"#),
        )
        .expect("resolve generation");
    for event in update.events {
        app.update(event, &mut model);
    }
    assert_eq!(model.screen, Screen::Error);
    assert_eq!(
        app.view(&model).error.map(|e| e.message),
        Some("try later".into())
    );

    app.update(Event::ErrorDismissed, &mut model);
    assert_eq!(model.screen, Screen::Main);
    assert!(app.view(&model).error.is_none());
}

#[test]
fn oversized_photo_is_refused_with_a_toast() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model, config(), r#"{"star_balance": 10}"#);

    let too_big = vec![0u8; model.compression.max_input_bytes + 1];
    app.update(
        Event::PhotoSelected {
            slot: 0,
            data: too_big,
            mime_type: "image/png".into(),
        },
        &mut model,
    );
    let view = app.view(&model);
    assert_eq!(view.filled_slots, 0);
    assert!(view.toast.is_some());

    app.update(Event::ToastDismissed, &mut model);
    assert!(app.view(&model).toast.is_none());
}

#[test]
fn history_screen_lists_past_generations_and_supports_deletion() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model, config(), r#"{"star_balance": 10}"#);

    pick_photo(&app, &mut model, 0, b'S');
    let update = app.update(Event::GenerateRequested, &mut model);
    let mut request = http_requests(update.effects).remove(0);
    let update = app
        .resolve(
            &mut request,
            ok_json(r#"{"image_url": "https://cdn.test/one.jpg"}"#),
        )
        .expect("resolve generation");
    for event in update.events {
        app.update(event, &mut model);
    }
    app.update(Event::NewGenerationRequested, &mut model);

    app.update(Event::HistoryOpened, &mut model);
    assert_eq!(model.screen, Screen::History);
    let view = app.view(&model);
    assert_eq!(view.history.len(), 1);
    assert_eq!(view.history[0].result_url, "https://cdn.test/one.jpg");

    let update = app.update(
        Event::HistoryItemDeleted {
            result_url: "https://cdn.test/one.jpg".into(),
        },
        &mut model,
    );
    // Deletion persists the shrunken cache.
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Storage(_))));
    assert!(app.view(&model).history.is_empty());

    app.update(Event::HistoryClosed, &mut model);
    assert_eq!(model.screen, Screen::Main);
}

#[test]
fn referral_screen_fetches_stats_and_builds_the_deep_link() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model, config(), r#"{"star_balance": 10}"#);

    let update = app.update(Event::ReferralOpened, &mut model);
    assert_eq!(model.screen, Screen::Referral);
    let mut request = http_requests(update.effects).remove(0);
    assert!(request.operation.url.ends_with("/referral-stats"));

    let update = app
        .resolve(
            &mut request,
            ok_json(r#"{"total_partners": 2, "total_earnings": 30, "l1_count": 2}"#),
        )
        .expect("resolve referral stats");
    for event in update.events {
        app.update(event, &mut model);
    }

    let view = app.view(&model);
    let referral = view.referral.expect("referral view on referral screen");
    assert_eq!(referral.link, "https://t.me/avatar_studio_bot?start=ref_7");
    assert_eq!(referral.stats.map(|s| s.total_partners), Some(2));
}

#[test]
fn top_up_opens_an_invoice_and_refreshes_after_payment() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    boot(&app, &mut model, config(), r#"{"star_balance": 10}"#);

    let update = app.update(Event::TopUpRequested { stars: 100 }, &mut model);
    let mut request = http_requests(update.effects).remove(0);
    assert!(request.operation.url.ends_with("/create-invoice"));
    let body: serde_json::Value = serde_json::from_slice(&request.operation.body).unwrap();
    assert_eq!(body["stars"], 100);

    let update = app
        .resolve(
            &mut request,
            ok_json(r#"{"invoice_url": "https://t.me/invoice/abc"}"#),
        )
        .expect("resolve invoice link");
    let mut saw_invoice = false;
    for event in update.events {
        let follow_up = app.update(event, &mut model);
        saw_invoice |= follow_up
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Host(_)));
    }
    assert!(saw_invoice, "the invoice sheet should open on the host");

    let update = app.update(
        Event::InvoiceClosed {
            status: studio_core::capabilities::InvoiceStatus::Paid,
        },
        &mut model,
    );
    let requests = http_requests(update.effects);
    assert_eq!(requests.len(), 1);
    assert!(requests[0].operation.url.ends_with("/user-status"));
}
