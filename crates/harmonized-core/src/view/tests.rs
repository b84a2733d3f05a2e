#![allow(clippy::unwrap_used)]

use super::*;
use crate::context::SyncContext;
use crate::remote::Transports;
use crate::testing::{ScriptedHttp, FIRST_SERVER_ID};
use harmonized_types::{HttpResponse, ModelSchema, RecordKey, TransportError};
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn model(http: Arc<ScriptedHttp>, ctx: SyncContext) -> Arc<Model> {
    let schema = ModelSchema::from_json_str(r#"{"todos": {"base_url": "http://api.test", "route": "todos"}}"#)
        .unwrap();
    let model = Model::builder("todos", &schema)
        .context(ctx)
        .transports(Transports::default().with_http(http))
        .without_storage()
        .build()
        .unwrap();
    Arc::new(model)
}

fn data(value: serde_json::Value) -> Data {
    value.as_object().cloned().unwrap()
}

/// Sync until `check` holds.
async fn sync_until(view: &mut ViewCollection, mut check: impl FnMut(&ViewCollection) -> bool) {
    tokio::time::timeout(WAIT, async {
        loop {
            view.sync();
            if check(view) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_fetch_then_sync_shows_items() {
    let http = Arc::new(ScriptedHttp::new());
    http.respond(Ok(HttpResponse::ok(json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]))));
    let model = model(http, SyncContext::default());
    let mut view = model.view();
    assert!(view.is_empty());

    assert_eq!(view.fetch().await.unwrap(), 2);
    sync_until(&mut view, |view| view.len() == 2).await;

    let titles: Vec<_> = view.iter().map(|item| item.data["title"].clone()).collect();
    assert_eq!(titles, vec![json!("a"), json!("b")]);
    assert!(view.iter().all(|item| item.rt_id.is_some() && item.version == 0));
    let uids: Vec<_> = (&view).into_iter().map(|item| item.uid).collect();
    assert_ne!(uids[0], uids[1]);
}

#[tokio::test]
async fn test_new_item_save_and_confirmation() {
    let http = Arc::new(ScriptedHttp::new());
    let model = model(http, SyncContext::default());
    let mut view = model.view();

    let draft = view.new_item(data(json!({"title": "write tests"})), true);
    assert_eq!(view.len(), 1);
    assert_eq!(draft.rt_id, None);

    let saved = view.save(&draft).unwrap();
    assert_eq!(saved.uid, draft.uid);
    assert_eq!(saved.version, 1);
    let rt_id = saved.rt_id.unwrap();
    assert_eq!(view.len(), 1);

    // The server confirmation bumps the version of the same item
    sync_until(&mut view, |view| view.get(draft.uid).unwrap().version == 2).await;
    assert_eq!(view.get_by_rt_id(rt_id).unwrap().uid, draft.uid);
    let handle = model.get_item(rt_id).unwrap();
    assert_eq!(handle.meta.server_id, Some(RecordKey::Int(FIRST_SERVER_ID)));
}

#[tokio::test]
async fn test_mappers_shape_both_directions() {
    let http = Arc::new(ScriptedHttp::new());
    let model = model(http.clone(), SyncContext::default());
    let map_down: MapDown = Arc::new(|record: &Record| {
        let mut data = record.data.clone();
        if let Some(title) = data.remove("title") {
            data.insert("label".into(), title);
        }
        data
    });
    let map_up: MapUp = Arc::new(|data: &Data| {
        let mut data = data.clone();
        if let Some(label) = data.remove("label") {
            data.insert("title".into(), label);
        }
        data
    });
    let mut view = ViewCollection::with_mappers(model.clone(), map_down, map_up);

    let item = view.new_item(data(json!({"label": "x"})), false);
    assert!(view.is_empty());
    let saved = view.save(&item).unwrap();
    assert_eq!(saved.get("label"), Some(&json!("x")));
    assert_eq!(model.get_item(saved.rt_id.unwrap()).unwrap().data["title"], "x");

    sync_until(&mut view, |_| http.request_count() == 1).await;
    assert_eq!(http.requests()[0].body, Some(json!({"title": "x"})));
}

#[tokio::test]
async fn test_add_item_and_delete() {
    let http = Arc::new(ScriptedHttp::new());
    let model = model(http.clone(), SyncContext::default());
    let saved = model.save(Record::from_value(json!({"title": "t"}))).unwrap();
    let rt_id = saved.meta.rt_id.unwrap();

    let mut view = model.view();
    let uid = view.get_by_rt_id(rt_id).unwrap().uid;
    // Already present, so the same item comes back
    assert_eq!(view.add_item(rt_id).unwrap().uid, uid);
    assert!(view.add_item(999).is_none());

    tokio::time::timeout(WAIT, async {
        while model.get_item(rt_id).unwrap().meta.server_id.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let item = view.get(uid).cloned().unwrap();
    view.delete(&item).unwrap();
    assert!(view.get(uid).is_none());
    sync_until(&mut view, |_| model.get_item(rt_id).is_none()).await;
    assert!(view.is_empty());
}

#[tokio::test]
async fn test_function_results_stay_out_of_the_view() {
    let http = Arc::new(ScriptedHttp::new());
    http.respond(Ok(HttpResponse::ok(json!({"done": true}))));
    let model = model(http, SyncContext::default());
    let mut view = model.view();

    let mut call = view.call_fn("cleanup", json!({})).unwrap();
    let event = tokio::time::timeout(WAIT, call.next_event()).await.unwrap().unwrap();
    match event {
        CallEvent::Resolved(record) => assert_eq!(record.fn_return(), Some(&json!({"done": true}))),
        other => panic!("unexpected {other:?}"),
    }
    assert!(call.next_event().await.is_none());

    view.sync();
    assert!(view.is_empty());
}

#[tokio::test]
async fn test_call_pending_while_offline_then_resolves() {
    let http = Arc::new(ScriptedHttp::new());
    let ctx = SyncContext::new(false);
    let model = model(http.clone(), ctx.clone());
    let view = model.view();

    let mut call = view.call_fn("sync", json!({"full": true})).unwrap();
    let first = tokio::time::timeout(WAIT, call.next_event()).await.unwrap().unwrap();
    assert_eq!(first, CallEvent::Pending(SyncError::Disconnected));

    http.respond(Ok(HttpResponse::ok(json!("ok"))));
    ctx.set_online(true);
    let result = tokio::time::timeout(WAIT, call.result()).await.unwrap().unwrap();
    assert_eq!(result, json!("ok"));
    assert_eq!(http.requests()[0].url, "http://api.test/todos/sync/");
}

#[tokio::test]
async fn test_call_rejected_on_client_error() {
    let http = Arc::new(ScriptedHttp::new());
    http.respond(Err(TransportError::Status { status: 422, message: "invalid".into() }));
    let model = model(http, SyncContext::default());
    let view = model.view();

    let call = view.call_fn("validate", json!({})).unwrap();
    let err = tokio::time::timeout(WAIT, call.result()).await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(422));
}

#[tokio::test]
async fn test_call_on_item_targets_its_server_id() {
    let http = Arc::new(ScriptedHttp::new());
    let model = model(http.clone(), SyncContext::default());
    let mut view = model.view();
    let draft = view.new_item(data(json!({"title": "t"})), true);
    let saved = view.save(&draft).unwrap();
    sync_until(&mut view, |view| view.get(saved.uid).unwrap().version == 2).await;

    let item = view.get(saved.uid).cloned().unwrap();
    let call = view.call_fn_on(&item, "archive", json!(null)).unwrap();
    tokio::time::timeout(WAIT, call.result()).await.unwrap().unwrap();
    assert_eq!(http.requests()[1].url, format!("http://api.test/todos/{FIRST_SERVER_ID}/archive/"));
}
