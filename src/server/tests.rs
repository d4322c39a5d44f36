use std::collections::BTreeMap;
use std::future::{Ready, ready};
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{TimeDelta, Utc};
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tower::ServiceExt;

use super::*;
use crate::backend::StackRecord;
use crate::cloudformation::CloudFormationError;
use crate::test_support::{ScriptedProbe, ScriptedStackBackend};

const TEMPLATE: &str = "https://templates.example.com/orion.json";
const DESCRIPTION: &str = "Orion PTT System";

#[derive(Debug, Default)]
struct ScriptedFactory {
    backends: BTreeMap<String, ScriptedStackBackend>,
}

impl BackendFactory for ScriptedFactory {
    type Backend = ScriptedStackBackend;

    fn backend_for(&self, account: &Account) -> Self::Backend {
        self.backends
            .get(&account.number)
            .cloned()
            .unwrap_or_default()
    }
}

struct Harness {
    primary: ScriptedStackBackend,
    secondary: ScriptedStackBackend,
    probe: ScriptedProbe,
    app: Router,
}

#[fixture]
fn harness() -> Harness {
    let primary = ScriptedStackBackend::new();
    let secondary = ScriptedStackBackend::new();
    let probe = ScriptedProbe::new();
    let factory = ScriptedFactory {
        backends: BTreeMap::from([
            (String::from("111111111111"), primary.clone()),
            (String::from("222222222222"), secondary.clone()),
        ]),
    };
    let state = Arc::new(AppState {
        accounts: vec![
            Account::ambient("111111111111"),
            Account::ambient("222222222222"),
        ],
        factory,
        probe: probe.clone(),
        template_url: String::from(TEMPLATE),
        template_description: String::from(DESCRIPTION),
    });
    Harness {
        primary,
        secondary,
        probe,
        app: router(state, None),
    }
}

fn listed(name: &str, description: &str) -> StackRecord {
    StackRecord {
        name: name.to_owned(),
        status: String::from("CREATE_COMPLETE"),
        description: Some(description.to_owned()),
        ..StackRecord::default()
    }
}

fn deployed(name: &str) -> StackRecord {
    StackRecord {
        id: format!("arn:aws:cloudformation:stack/{name}"),
        name: name.to_owned(),
        status: String::from("CREATE_COMPLETE"),
        outputs: BTreeMap::from([
            (String::from("Address"), String::from("203.0.113.10")),
            (String::from("Api"), String::from("api.dev-alice.example.com")),
            (String::from("Login"), String::from("login.dev-alice.example.com")),
            (String::from("CA"), String::from("ca.dev-alice.example.com")),
            (String::from("Media"), String::from("media.dev-alice.example.com")),
        ]),
        creation_time: Some(Utc::now() - TimeDelta::hours(2)),
        ..StackRecord::default()
    }
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>, Option<String>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request builds");
    let response = app.clone().oneshot(request).await.expect("router answers");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    (status, body.to_vec(), content_type)
}

fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

#[rstest]
#[tokio::test]
async fn ping_answers_pong(harness: Harness) {
    let (status, body, _) = send(&harness.app, "GET", "/api/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({ "message": "pong" }));
}

#[rstest]
#[tokio::test]
async fn list_merges_accounts_and_skips_foreign_stacks(harness: Harness) {
    harness.primary.set_listed(vec![
        listed("dev-alice", DESCRIPTION),
        listed("unrelated", "Some other template"),
    ]);
    harness
        .secondary
        .set_listed(vec![listed("dev-bob", DESCRIPTION)]);

    let (status, body, _) = send(&harness.app, "GET", "/api/stacks").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!([
            { "name": "dev-alice", "account": "111111111111" },
            { "name": "dev-bob", "account": "222222222222" },
        ])
    );
}

#[rstest]
#[tokio::test]
async fn details_report_reachable_and_pending_endpoints(harness: Harness) {
    harness.primary.insert_stack(deployed("dev-alice"));
    harness
        .probe
        .fail_times("https://login.dev-alice.example.com", 1);

    let (status, body, _) = send(&harness.app, "GET", "/api/stacks/111111111111/dev-alice").await;

    assert_eq!(status, StatusCode::OK);
    let details = json_body(&body);
    assert_eq!(details["account"], "111111111111");
    assert_eq!(details["name"], "dev-alice");
    assert_eq!(details["cfstatus"], "CREATE_COMPLETE");
    assert_eq!(details["address"], "203.0.113.10");
    assert_eq!(details["kotsadm"], "http://203.0.113.10:8800");
    assert_eq!(details["api"], "https://api.dev-alice.example.com");
    assert_eq!(details["login"], NOT_READY);
    assert_eq!(
        details["ca"],
        "https://ca.dev-alice.example.com/v1/pki/ca/pem"
    );
    assert_eq!(details["media"], "media.dev-alice.example.com");
    assert_eq!(details["cdn"], "");
    assert!(
        details["uptime"]
            .as_str()
            .is_some_and(|uptime| uptime.starts_with("2h 0m")),
        "unexpected uptime: {}",
        details["uptime"]
    );
    assert!(
        harness
            .probe
            .checks()
            .contains(&String::from("https://203.0.113.10:8800"))
    );
}

#[rstest]
#[tokio::test]
async fn details_for_missing_stack_fail(harness: Harness) {
    let (status, body, _) = send(&harness.app, "GET", "/api/stacks/111111111111/nope").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(&body)["error"]
        .as_str()
        .is_some_and(|message| message.contains("nope")));
}

#[rstest]
#[case("GET", "/api/stacks/999999999999/dev-alice")]
#[case("GET", "/api/stacks/999999999999/dev-alice/ca")]
#[case("DELETE", "/api/stacks/999999999999/dev-alice")]
#[tokio::test]
async fn unknown_account_is_not_found(
    harness: Harness,
    #[case] method: &str,
    #[case] uri: &str,
) {
    let (status, body, _) = send(&harness.app, method, uri).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(&body),
        json!({ "error": "unknown account 999999999999" })
    );
}

#[rstest]
#[tokio::test]
async fn ca_is_served_as_certificate(harness: Harness) {
    harness.primary.insert_stack(deployed("dev-alice"));
    harness.probe.set_body(
        "https://ca.dev-alice.example.com/v1/pki/ca/pem",
        b"-----BEGIN CERTIFICATE-----\n",
    );

    let (status, body, content_type) =
        send(&harness.app, "GET", "/api/stacks/111111111111/dev-alice/ca").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/pkix-cert"));
    assert_eq!(body, b"-----BEGIN CERTIFICATE-----\n");
}

#[rstest]
#[tokio::test]
async fn unreachable_ca_is_not_found(harness: Harness) {
    harness.primary.insert_stack(deployed("dev-alice"));

    let (status, _, _) = send(&harness.app, "GET", "/api/stacks/111111111111/dev-alice/ca").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[rstest]
#[tokio::test]
async fn delete_requests_stack_removal(harness: Harness) {
    harness.primary.insert_stack(deployed("dev-alice"));

    let (status, _, _) = send(&harness.app, "DELETE", "/api/stacks/111111111111/dev-alice").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.primary.delete_calls(), vec![String::from("dev-alice")]);
    assert!(harness.secondary.delete_calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn rejected_delete_is_bad_request(harness: Harness) {
    harness.primary.fail_delete();

    let (status, body, _) = send(&harness.app, "DELETE", "/api/stacks/111111111111/dev-alice").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_body(&body)["error"]
        .as_str()
        .is_some_and(|message| message.contains("delete rejected")));
}

#[rstest]
#[tokio::test]
async fn ui_directory_is_served_at_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("index.html"), "<h1>orion</h1>").expect("write index");
    let ui_dir = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 path");
    let state = Arc::new(AppState {
        accounts: Vec::new(),
        factory: ScriptedFactory::default(),
        probe: ScriptedProbe::new(),
        template_url: String::from(TEMPLATE),
        template_description: String::from(DESCRIPTION),
    });
    let app = router(state, Some(ui_dir));

    let (status, body, _) = send(&app, "GET", "/index.html").await;
    let (api_status, _, _) = send(&app, "GET", "/api/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<h1>orion</h1>");
    assert_eq!(api_status, StatusCode::OK);
}

#[rstest]
#[tokio::test]
async fn accounts_decode_from_base64_json() {
    let raw = json!([
        {
            "account_number": "111111111111",
            "aws_access_key_id": "AKIAEXAMPLE",
            "aws_secret_access_key": "secret",
            "aws_region": "us-west-2"
        },
        { "account_number": "222222222222" }
    ]);
    let encoded = STANDARD.encode(raw.to_string());

    let accounts = resolve_accounts(
        Some(&encoded),
        || -> Ready<Result<String, CloudFormationError>> {
            panic!("caller identity must not be consulted")
        },
    )
    .await
    .expect("accounts decode");

    assert_eq!(
        accounts,
        vec![
            Account {
                number: String::from("111111111111"),
                access_key_id: String::from("AKIAEXAMPLE"),
                secret_access_key: String::from("secret"),
                region: String::from("us-west-2"),
            },
            Account::ambient("222222222222"),
        ]
    );
}

#[rstest]
#[case("not base64!")]
#[case("eyJub3QiOiAibGlzdCJ9")]
fn malformed_accounts_are_rejected(#[case] encoded: &str) {
    let err = decode_accounts(encoded).expect_err("value is rejected");

    assert!(matches!(err, ServerError::Accounts { var, .. } if var == ACCOUNT_ENV_VAR));
}

#[rstest]
#[case(None)]
#[case(Some("  "))]
#[tokio::test]
async fn missing_accounts_fall_back_to_caller_identity(#[case] encoded: Option<&str>) {
    let accounts = resolve_accounts(encoded, || ready(Ok(String::from("333333333333"))))
        .await
        .expect("fallback account");

    assert_eq!(accounts, vec![Account::ambient("333333333333")]);
}

#[rstest]
#[tokio::test]
async fn caller_identity_failure_is_reported() {
    let err = resolve_accounts(None, || {
        ready(Err(CloudFormationError::NotFound {
            resource: String::from("caller identity"),
            query: String::from("sts"),
        }))
    })
    .await
    .expect_err("lookup fails");

    assert!(matches!(err, ServerError::Lookup(_)));
}

#[rstest]
fn static_credentials_replace_profile() {
    let factory = CliBackendFactory::new(AwsSettings {
        profile: Some(String::from("ops")),
        region: Some(String::from("us-east-1")),
        ..AwsSettings::default()
    });
    let account = Account {
        number: String::from("111111111111"),
        access_key_id: String::from("AKIAEXAMPLE"),
        secret_access_key: String::from("secret"),
        region: String::from("eu-west-1"),
    };

    let settings = factory.settings_for(&account);

    assert_eq!(settings.profile, None);
    assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
    assert_eq!(
        settings.credentials.map(|creds| creds.access_key_id),
        Some(String::from("AKIAEXAMPLE"))
    );
}

#[rstest]
fn ambient_account_keeps_base_settings() {
    let base = AwsSettings {
        profile: Some(String::from("ops")),
        ..AwsSettings::default()
    };
    let factory = CliBackendFactory::new(base.clone());

    assert_eq!(factory.settings_for(&Account::ambient("111111111111")), base);
}

#[rstest]
#[case(TimeDelta::seconds(0), "0h 0m 0s")]
#[case(TimeDelta::seconds(59), "0h 0m 59s")]
#[case(TimeDelta::seconds(3_725), "1h 2m 5s")]
#[case(TimeDelta::hours(50), "50h 0m 0s")]
#[case(TimeDelta::seconds(-30), "0h 0m 0s")]
fn uptime_is_hours_minutes_seconds(#[case] elapsed: TimeDelta, #[case] expected: &str) {
    assert_eq!(format_uptime(elapsed), expected);
}
