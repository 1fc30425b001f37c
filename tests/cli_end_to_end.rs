use assert_cmd::Command;
use httpmock::MockServer;
use predicates::str::contains;
use serde_json::json;

const DID: &str = "did:plc:owner";

fn arabica() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("arabica"));
    cmd.env_remove("ARABICA_CONFIG_FILE")
        .env_remove("ARABICA__REPOSITORY__PDS_URL")
        .env_remove("ARABICA__REPOSITORY__DID")
        .env_remove("ARABICA__REPOSITORY__ACCESS_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn resolve_prints_locator_parts() {
    let assert = arabica()
        .arg("resolve")
        .arg("at://did:plc:owner/social.arabica.alpha.bean/3kabc")
        .assert()
        .success();

    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.contains("\"collection\": \"social.arabica.alpha.bean\""));
    assert!(output.contains("\"rkey\": \"3kabc\""));
}

#[test]
fn malformed_locator_exits_with_invalid_input() {
    arabica()
        .arg("resolve")
        .arg("https://example.com/not-a-locator")
        .assert()
        .code(2)
        .stderr(contains("at://"));
}

#[test]
fn list_roasters_works_end_to_end() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/xrpc/com.atproto.repo.listRecords")
            .query_param("repo", DID)
            .query_param("collection", "social.arabica.alpha.roaster")
            .header("authorization", "Bearer cli-token");
        then.status(200).json_body(json!({
            "records": [{
                "uri": "at://did:plc:owner/social.arabica.alpha.roaster/r1",
                "cid": "bafyrei",
                "value": {
                    "$type": "social.arabica.alpha.roaster",
                    "name": "Onyx",
                    "createdAt": "2024-03-01T08:30:00Z"
                }
            }]
        }));
    });

    let assert = arabica()
        .args(["--pds-url", &server.base_url()])
        .args(["--did", DID])
        .args(["--access-token", "cli-token"])
        .args(["list", "roasters"])
        .assert()
        .success();

    let output = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(output.contains("\"name\": \"Onyx\""));
    assert!(output.contains("\"rkey\": \"r1\""));
    mock.assert();
}

#[test]
fn unauthorized_session_exits_with_auth_code() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/xrpc/com.atproto.repo.getRecord");
        then.status(401)
            .json_body(json!({"error": "ExpiredToken", "message": "token expired"}));
    });

    arabica()
        .args(["--pds-url", &server.base_url()])
        .args(["--did", DID])
        .args(["--access-token", "stale"])
        .args(["get", "beans", "b1"])
        .assert()
        .code(3)
        .stderr(contains("token expired"));
}

#[test]
fn missing_token_fails_fast() {
    arabica()
        .args(["--pds-url", "https://pds.example.com"])
        .args(["--did", DID])
        .args(["list", "brews"])
        .assert()
        .code(2)
        .stderr(contains("repository.access_token"));
}

#[test]
fn update_keeps_created_at_end_to_end() {
    let server = MockServer::start();
    let existing = server.mock(|when, then| {
        when.method("GET")
            .path("/xrpc/com.atproto.repo.getRecord")
            .query_param("collection", "social.arabica.alpha.roaster")
            .query_param("rkey", "r1");
        then.status(200).json_body(json!({
            "uri": "at://did:plc:owner/social.arabica.alpha.roaster/r1",
            "cid": "bafyrei",
            "value": {
                "$type": "social.arabica.alpha.roaster",
                "name": "Onyx",
                "createdAt": "2024-03-01T08:30:00Z"
            }
        }));
    });
    let put = server.mock(|when, then| {
        when.method("POST")
            .path("/xrpc/com.atproto.repo.putRecord")
            .json_body_includes(
                r#"{"rkey":"r1","record":{"name":"Heart","createdAt":"2024-03-01T08:30:00Z"}}"#,
            );
        then.status(200).json_body(json!({
            "uri": "at://did:plc:owner/social.arabica.alpha.roaster/r1",
            "cid": "bafyrei2"
        }));
    });

    arabica()
        .args(["--pds-url", &server.base_url()])
        .args(["--did", DID])
        .args(["--access-token", "cli-token"])
        .args(["update", "roasters", "r1", "--data", r#"{"name":"Heart"}"#])
        .assert()
        .success();

    existing.assert();
    put.assert();
}
