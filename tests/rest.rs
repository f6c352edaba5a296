#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use httpmock::prelude::*;
use keymirror_client_sdk::error::{self, Kind};
use keymirror_client_sdk::rest::Client;
use keymirror_client_sdk::types::Mode;
use serde_json::json;

use crate::common::{b64, wire_entry};

#[tokio::test]
async fn stats_lists_stored_keys() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200).json_body(json!({"keys": ["box", "box/a1"]}));
        })
        .await;

    let client = Client::new(&server.base_url()).unwrap();
    let stats = client.stats().await.unwrap();

    mock.assert_async().await;
    assert_eq!(stats.keys, vec!["box".to_owned(), "box/a1".to_owned()]);
}

#[tokio::test]
async fn get_single_decodes_wrapped_data() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/r/sa/box");
            then.status(200)
                .json_body(wire_entry("box", 100, 0, &json!({"name": "a box"})));
        })
        .await;

    let client = Client::new(&server.base_url()).unwrap();
    let entry = client.get_single("box").await.unwrap();

    mock.assert_async().await;
    assert_eq!(entry.index, "box");
    assert_eq!(entry.created, 100);
    assert_eq!(entry.data, json!({"name": "a box"}));
}

#[tokio::test]
async fn get_multi_decodes_every_entry() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/r/mo/box/*/things/*");
            then.status(200).json_body(json!([
                wire_entry("box/1/things/1", 1, 0, &json!({"name": "a thing in box 1"})),
                wire_entry("box/2/things/0", 2, 0, &json!({"name": "a thing in box 2"})),
            ]));
        })
        .await;

    let client = Client::new(&server.base_url()).unwrap();
    let entries = client.get_multi("box/*/things/*").await.unwrap();

    mock.assert_async().await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].data, json!({"name": "a thing in box 1"}));
    assert_eq!(entries[1].index, "box/2/things/0");
}

#[tokio::test]
async fn publish_to_wildcard_omits_index_and_returns_assignment() {
    let server = MockServer::start_async().await;
    let payload = json!({"name": "something"});
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/r/mo/box/*")
                .json_body(json!({"data": b64(&payload)}));
            then.status(200).json_body(json!({"index": "box/a1"}));
        })
        .await;

    let client = Client::new(&server.base_url()).unwrap();
    let index = client
        .publish(Mode::Multi, "box/*", &payload, None)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(index, "box/a1");
}

#[tokio::test]
async fn publish_with_index_addresses_an_existing_entry() {
    let server = MockServer::start_async().await;
    let payload = json!({"name": "still something"});
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/r/sa/box")
                .json_body(json!({"index": "box", "data": b64(&payload)}));
            then.status(200).json_body(json!({"index": "box"}));
        })
        .await;

    let client = Client::new(&server.base_url()).unwrap();
    let index = client
        .publish(Mode::Single, "box", &payload, Some("box"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(index, "box");
}

#[tokio::test]
async fn unpublish_issues_delete() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/r/box/a1");
            then.status(204);
        })
        .await;

    let client = Client::new(&server.base_url()).unwrap();
    client.unpublish("box/a1").await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn non_success_status_maps_to_status_error() {
    let server = MockServer::start_async().await;
    let _mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/r/sa/missing");
            then.status(404).body("no such key");
        })
        .await;

    let client = Client::new(&server.base_url()).unwrap();
    let error = client.get_single("missing").await.unwrap_err();

    assert_eq!(error.kind(), Kind::Status);
    let status = error.downcast_ref::<error::Status>().unwrap();
    assert_eq!(status.status_code, error::StatusCode::NOT_FOUND);
    assert_eq!(status.message, "no such key");
}

#[tokio::test]
async fn unpublish_error_maps_to_status_error() {
    let server = MockServer::start_async().await;
    let _mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/r/locked");
            then.status(500).body("storage failure");
        })
        .await;

    let client = Client::new(&server.base_url()).unwrap();
    let error = client.unpublish("locked").await.unwrap_err();

    assert_eq!(error.kind(), Kind::Status);
}
