//! Tests for the stack record store, source resolution and rendering.

use std::io::Cursor;
use std::sync::Mutex;

use super::*;
use crate::backend::BackendFuture;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct StoreFixture {
    _tmp: TempDir,
    store: StackConfigStore,
}

#[fixture]
fn store_fixture() -> StoreFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("nested").join(DEFAULT_CONFIG_FILE))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    StoreFixture {
        _tmp: tmp,
        store: StackConfigStore::new(path),
    }
}

#[derive(Default)]
struct StubStore {
    requests: Mutex<Vec<(String, String)>>,
}

impl StubStore {
    fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ObjectStore for StubStore {
    fn fetch_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BackendFuture<'a, String, SourceError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push((bucket.to_owned(), key.to_owned()));
        Box::pin(std::future::ready(Ok(String::from(
            r#"{"subnet_ids":["subnet-s3"]}"#,
        ))))
    }
}

fn prompter(answers: &str) -> LinePrompter<Cursor<Vec<u8>>, Vec<u8>> {
    LinePrompter::new(Cursor::new(answers.as_bytes().to_vec()), Vec::new())
}

#[rstest]
fn missing_file_loads_empty_record(store_fixture: StoreFixture) {
    let config = store_fixture
        .store
        .load()
        .unwrap_or_else(|err| panic!("load: {err}"));

    assert_eq!(config, StackConfig::default());
}

#[rstest]
fn saved_record_round_trips_with_capitalised_beta(store_fixture: StoreFixture) {
    let config = StackConfig {
        stack_name: String::from("dev-alice"),
        beta: true,
        ..StackConfig::default()
    };

    store_fixture
        .store
        .save(&config)
        .unwrap_or_else(|err| panic!("save: {err}"));

    let loaded = store_fixture
        .store
        .load()
        .unwrap_or_else(|err| panic!("load: {err}"));
    assert_eq!(loaded, config);
    let text = std::fs::read_to_string(store_fixture.store.path())
        .unwrap_or_else(|err| panic!("read back: {err}"));
    assert!(text.contains("\"Beta\": true"), "file: {text}");
    assert!(!text.contains("keystore"), "file: {text}");
}

#[rstest]
fn malformed_record_is_a_parse_error(store_fixture: StoreFixture) {
    store_fixture
        .store
        .write("{ not json")
        .unwrap_or_else(|err| panic!("seed: {err}"));

    let err = store_fixture.store.load().expect_err("parse fails");

    assert!(matches!(err, ConfigStoreError::Parse { .. }));
}

#[rstest]
fn ensure_exists_seeds_template_once(store_fixture: StoreFixture) {
    let created = store_fixture
        .store
        .ensure_exists()
        .unwrap_or_else(|err| panic!("seed: {err}"));
    let again = store_fixture
        .store
        .ensure_exists()
        .unwrap_or_else(|err| panic!("reseed: {err}"));

    assert!(created);
    assert!(!again);
    let config = store_fixture
        .store
        .load()
        .unwrap_or_else(|err| panic!("load: {err}"));
    assert_eq!(config.instance_type, DEFAULT_INSTANCE_TYPE);
    assert_eq!(config.ami_name, "orion-base*");
}

#[test]
fn fill_missing_prompts_only_for_blank_fields() {
    let mut config = StackConfig {
        dns_domain: String::from("example.com"),
        ..StackConfig::default()
    };
    let mut input = prompter("dev-alice\nalice-key\norion-base-2*\n");

    config
        .fill_missing(&mut input, true)
        .unwrap_or_else(|err| panic!("fill: {err}"));

    assert_eq!(config.stack_name, "dev-alice");
    assert_eq!(config.key_name, "alice-key");
    assert_eq!(config.dns_domain, "example.com");
    assert_eq!(config.ami_name, "orion-base-2*");
    assert_eq!(config.instance_type, DEFAULT_INSTANCE_TYPE);
    let shown = String::from_utf8(input.output).unwrap_or_default();
    assert!(shown.contains("Stack Name: "));
    assert!(!shown.contains("DNS Domain"));
}

#[test]
fn fill_missing_skips_key_when_not_needed() {
    let mut config = StackConfig::default();
    let mut input = prompter("dev-alice\nexample.com\norion-base*\n");

    config
        .fill_missing(&mut input, false)
        .unwrap_or_else(|err| panic!("fill: {err}"));

    assert!(config.key_name.is_empty());
    assert_eq!(config.dns_domain, "example.com");
}

#[test]
fn fill_name_asks_for_nothing_else() {
    let mut config = StackConfig::default();
    let mut input = prompter("dev-alice\n");

    config
        .fill_name(&mut input)
        .unwrap_or_else(|err| panic!("fill: {err}"));

    assert_eq!(config.stack_name, "dev-alice");
    assert!(config.dns_domain.is_empty());
    assert!(config.instance_type.is_empty());
}

#[test]
fn blank_answer_is_rejected() {
    let mut config = StackConfig::default();
    let mut input = prompter("\n");

    let err = config
        .fill_missing(&mut input, false)
        .expect_err("blank stack name");

    assert_eq!(err.to_string(), "Stack Name is required");
}

#[rstest]
#[case("", DEFAULT_KOTSADM_PASSWORD)]
#[case("hunter2", "hunter2")]
fn shared_password_defaults(#[case] configured: &str, #[case] expected: &str) {
    let config = StackConfig {
        kotsadm_password: configured.to_owned(),
        ..StackConfig::default()
    };

    assert_eq!(config.shared_password(), expected);
}

#[test]
fn overrides_replace_name_and_key() {
    let mut config = StackConfig {
        stack_name: String::from("from-file"),
        key_name: String::from("file-key"),
        ..StackConfig::default()
    };

    config.apply_overrides(Some("from-flag"), Some(" "));

    assert_eq!(config.stack_name, "from-flag");
    assert_eq!(config.key_name, "file-key");
}

#[rstest]
#[case(r#"{"subnet_ids":[]}"#, ConfigSource::Inline(String::from(r#"{"subnet_ids":[]}"#)))]
#[case("eyJzdWJuZXRfaWRzIjpbXX0=", ConfigSource::Inline(String::from(r#"{"subnet_ids":[]}"#)))]
#[case(
    "https://templates.s3.us-east-1.amazonaws.com/orion/shared.json",
    ConfigSource::S3 {
        bucket: String::from("templates"),
        region: Some(String::from("us-east-1")),
        key: String::from("orion/shared.json"),
    }
)]
#[case(
    "https://templates.s3.amazonaws.com/shared.json",
    ConfigSource::S3 {
        bucket: String::from("templates"),
        region: None,
        key: String::from("shared.json"),
    }
)]
#[case(
    "github.com/acme/orion-config/shared/network.json",
    ConfigSource::Git {
        repo: String::from("github.com/acme"),
        path: String::from("orion-config/shared/network.json"),
    }
)]
#[case("/etc/orion/shared.json", ConfigSource::File(Utf8PathBuf::from("/etc/orion/shared.json")))]
fn references_are_classified(#[case] reference: &str, #[case] expected: ConfigSource) {
    assert_eq!(ConfigSource::parse(reference), expected);
}

#[tokio::test]
async fn s3_references_are_fetched_from_the_store() {
    let store = StubStore::default();

    let text = resolve_source(
        "https://templates.s3.us-east-1.amazonaws.com/shared.json",
        "shared config",
        &store,
    )
    .await
    .unwrap_or_else(|err| panic!("resolve: {err}"));

    let shared = SharedConfig::parse(&text).unwrap_or_else(|err| panic!("parse: {err}"));
    assert_eq!(shared.subnet_ids, vec![String::from("subnet-s3")]);
    assert_eq!(
        store.requests(),
        vec![(String::from("templates"), String::from("shared.json"))]
    );
}

#[rstest]
#[tokio::test]
async fn file_references_are_read(store_fixture: StoreFixture) {
    store_fixture
        .store
        .write("stack: {{.StackName}}\n")
        .unwrap_or_else(|err| panic!("seed: {err}"));

    let text = resolve_source(
        store_fixture.store.path().as_str(),
        "config template",
        &StubStore::default(),
    )
    .await
    .unwrap_or_else(|err| panic!("resolve: {err}"));

    assert_eq!(text, "stack: {{.StackName}}\n");
}

#[tokio::test]
async fn existing_file_wins_over_git_lookalike() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let repo_dir = tmp.path().join("git").join("orion-config");
    std::fs::create_dir_all(&repo_dir).unwrap_or_else(|err| panic!("mkdir: {err}"));
    let path = repo_dir.join("network.json");
    std::fs::write(&path, r#"{"subnet_ids":["subnet-local"]}"#)
        .unwrap_or_else(|err| panic!("write: {err}"));
    let reference = path.to_string_lossy().into_owned();

    assert_eq!(
        ConfigSource::parse(&reference),
        ConfigSource::File(Utf8PathBuf::from(reference.as_str()))
    );
    let store = StubStore::default();
    let text = resolve_source(&reference, "shared config", &store)
        .await
        .unwrap_or_else(|err| panic!("resolve: {err}"));
    assert_eq!(text, r#"{"subnet_ids":["subnet-local"]}"#);
    assert!(store.requests().is_empty());
}

#[rstest]
#[case("", "no config template configured")]
#[case(
    "gitlab.com/acme/templates/orion.tmpl",
    "git sources are not supported: gitlab.com/acme templates/orion.tmpl"
)]
#[tokio::test]
async fn unusable_references_are_reported(#[case] reference: &str, #[case] message: &str) {
    let err = resolve_source(reference, "config template", &StubStore::default())
        .await
        .expect_err("reference rejected");

    assert_eq!(err.to_string(), message);
}

#[test]
fn invalid_shared_config_is_reported() {
    let err = SharedConfig::parse("[1, 2]").expect_err("wrong shape");

    assert!(matches!(err, SourceError::Invalid { .. }));
}

fn data() -> TemplateData {
    TemplateData {
        keystore: String::from(r#"{"keys":[]}"#),
        stack_name: String::from("dev-alice"),
        domain: String::from("example.com"),
    }
}

#[test]
fn template_fields_are_substituted() {
    let rendered = render_template(
        "name: {{.StackName}}\nhost: login.{{ .Domain }}\nkeys: '{{.Keystore}}'\n",
        &data(),
    )
    .unwrap_or_else(|err| panic!("render: {err}"));

    assert_eq!(
        rendered,
        "name: dev-alice\nhost: login.example.com\nkeys: '{\"keys\":[]}'\n"
    );
}

#[test]
fn trim_markers_strip_surrounding_whitespace() {
    let rendered = render_template(
        "keystore: |\n  {{- .Keystore -}}  \nstack: {{ .StackName }}\n",
        &data(),
    )
    .unwrap_or_else(|err| panic!("render: {err}"));

    assert_eq!(rendered, "keystore: |{\"keys\":[]}stack: dev-alice\n");
}

#[rstest]
#[case("{{.Region}}", "undefined value")]
#[case("name: {{.StackName", "syntax error")]
fn malformed_templates_are_rejected(#[case] template: &str, #[case] reason: &str) {
    let err = render_template(template, &data()).expect_err("render fails");

    let message = err.to_string();
    assert!(message.starts_with("template error: "), "message: {message}");
    assert!(message.contains(reason), "message: {message}");
}

#[test]
fn generated_keystore_holds_distinct_ed25519_keys() {
    let text = generate_keystore(KEYSTORE_SIZE).unwrap_or_else(|err| panic!("generate: {err}"));

    let value: serde_json::Value =
        serde_json::from_str(&text).unwrap_or_else(|err| panic!("json: {err}"));
    let keys = value
        .get("keys")
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();
    assert_eq!(keys.len(), KEYSTORE_SIZE);
    let mut ids: Vec<&str> = keys
        .iter()
        .filter_map(|key| key.get("kid").and_then(serde_json::Value::as_str))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), KEYSTORE_SIZE);
    for key in &keys {
        assert_eq!(key.get("crv").and_then(serde_json::Value::as_str), Some("Ed25519"));
        let public = key
            .get("x")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        assert_eq!(decode_url_safe(public).len(), 32);
    }
}

fn decode_url_safe(text: &str) -> Vec<u8> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(text)
        .unwrap_or_else(|err| panic!("base64: {err}"))
}

#[test]
fn configured_keystore_is_reused() {
    let config = StackConfig {
        stack_name: String::from("dev-alice"),
        dns_domain: String::from("example.com"),
        keystore: String::from(r#"{"keys":["fixed"]}"#),
        ..StackConfig::default()
    };

    let template_data =
        TemplateData::for_config(&config).unwrap_or_else(|err| panic!("data: {err}"));

    assert_eq!(template_data.keystore, r#"{"keys":["fixed"]}"#);
    assert_eq!(template_data.domain, "example.com");
}
