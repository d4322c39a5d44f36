//! Tests for the operator command building blocks.

use std::collections::BTreeMap;
use std::future::ready;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::backend::{BackendFuture, StackRecord};
use crate::cloudformation::{CloudFormationError, NetworkSelection};
use crate::command::CommandError;
use crate::config_store::{
    CONFIG_FILE_TEMPLATE, ObjectStore, SourceError, StackConfig, StackConfigStore,
};
use crate::stack::StackHandle;
use crate::test_support::{ScriptedBackendError, ScriptedProbe, ScriptedStackBackend};

type Error = OpsError<ScriptedBackendError>;

const TEMPLATE: &str = "https://orion-ptt-system.s3.amazonaws.com/orion-ptt-system.yaml";

#[derive(Debug, Default)]
struct StubLookups {
    objects: BTreeMap<(String, String), String>,
    calls: Mutex<Vec<String>>,
}

impl StubLookups {
    fn with_object(bucket: &str, key: &str, body: &str) -> Self {
        let mut objects = BTreeMap::new();
        objects.insert((bucket.to_owned(), key.to_owned()), body.to_owned());
        Self {
            objects,
            calls: Mutex::default(),
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl ObjectStore for StubLookups {
    fn fetch_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BackendFuture<'a, String, SourceError> {
        self.record(format!("s3://{bucket}/{key}"));
        let found = self
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or_else(|| SourceError::Fetch {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                message: String::from("NoSuchKey"),
            });
        Box::pin(ready(found))
    }
}

impl AccountLookups for StubLookups {
    fn image_id<'a>(
        &'a self,
        owner: &'a str,
        pattern: &'a str,
    ) -> BackendFuture<'a, String, CloudFormationError> {
        self.record(format!("image {owner} {pattern}"));
        Box::pin(ready(Ok(String::from("ami-0abc"))))
    }

    fn network<'a>(
        &'a self,
        subnet_ids: &'a [String],
    ) -> BackendFuture<'a, NetworkSelection, CloudFormationError> {
        self.record(format!("network {}", subnet_ids.join(",")));
        let selection = subnet_ids
            .first()
            .map(|subnet| NetworkSelection {
                vpc_id: String::from("vpc-1"),
                subnet_id: subnet.clone(),
            })
            .ok_or_else(|| CloudFormationError::NotFound {
                resource: String::from("subnet"),
                query: String::new(),
            });
        Box::pin(ready(selection))
    }

    fn zone_id<'a>(&'a self, domain: &'a str) -> BackendFuture<'a, String, CloudFormationError> {
        self.record(format!("zone {domain}"));
        Box::pin(ready(Ok(String::from("Z0123"))))
    }
}

#[fixture]
fn record() -> StackConfig {
    StackConfig {
        stack_name: String::from("dev-alice"),
        key_name: String::from("alice"),
        dns_domain: String::from("example.com"),
        instance_type: String::from("m5.2xlarge"),
        user_name: String::from("ubuntu"),
        ami_name: String::from("orion-base*"),
        shared_config: String::from(r#"{"subnet_ids":["subnet-a","subnet-b"]}"#),
        ..StackConfig::default()
    }
}

fn utf8_dir(tmp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 temp dir")
}

fn stack_with_outputs(outputs: &[(&str, &str)]) -> StackHandle<ScriptedStackBackend> {
    let backend = ScriptedStackBackend::new();
    backend.set_outputs(outputs);
    backend.push_status("dev-alice", "CREATE_COMPLETE");
    StackHandle::new(backend, "dev-alice", TEMPLATE)
}

#[rstest]
#[tokio::test]
async fn creation_parameters_follow_template_order(record: StackConfig) {
    let lookups = StubLookups::default();

    let params = creation_parameters::<ScriptedBackendError>(&lookups, "123456789012", &record)
        .await
        .expect("parameters");

    let pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|param| (param.key, param.value))
        .collect();
    let expected = [
        ("ExistingVpcID", "vpc-1"),
        ("ExistingPublicSubnet", "subnet-a"),
        ("KeyName", "alice"),
        ("AmiId", "ami-0abc"),
        ("InstanceType", "m5.2xlarge"),
        ("VolumeSize", "50"),
        ("InstanceName", "orion-ptt-system"),
        ("CreateDNS", "true"),
        ("CreateDNSZoneID", "Z0123"),
        ("CreateDNSDomain", "example.com"),
    ]
    .map(|(key, value)| (key.to_owned(), value.to_owned()));
    assert_eq!(pairs, expected.to_vec());
    assert_eq!(
        lookups.calls(),
        vec![
            String::from("network subnet-a,subnet-b"),
            String::from("zone example.com"),
            String::from("image 123456789012 orion-base*"),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn creation_parameters_fetch_shared_config_from_s3(mut record: StackConfig) {
    record.shared_config = String::from(
        "https://orion-ptt-system-templates.s3.us-east-1.amazonaws.com/shared-config.json",
    );
    let lookups = StubLookups::with_object(
        "orion-ptt-system-templates",
        "shared-config.json",
        r#"{"subnet_ids":["subnet-z"]}"#,
    );

    let params = creation_parameters::<ScriptedBackendError>(&lookups, "123456789012", &record)
        .await
        .expect("parameters");

    assert_eq!(
        lookups.calls().first().map(String::as_str),
        Some("s3://orion-ptt-system-templates/shared-config.json")
    );
    assert!(
        params
            .iter()
            .any(|param| param.key == "ExistingPublicSubnet" && param.value == "subnet-z")
    );
}

#[rstest]
#[tokio::test]
async fn creation_parameters_require_shared_config(mut record: StackConfig) {
    record.shared_config = String::new();

    let err = creation_parameters::<ScriptedBackendError>(
        &StubLookups::default(),
        "123456789012",
        &record,
    )
    .await
    .expect_err("no shared config");

    assert!(matches!(err, Error::Source(SourceError::Empty { .. })), "{err}");
}

#[rstest]
#[tokio::test]
async fn install_settings_render_template_file(mut record: StackConfig) {
    let tmp = TempDir::new().expect("tempdir");
    let dir = utf8_dir(&tmp);
    std::fs::write(dir.join("license.yaml"), "licence-body").expect("write licence");
    std::fs::write(
        dir.join("install.tmpl"),
        "name: {{ .StackName }}\ndomain: {{.Domain}}\nkeys: {{.Keystore}}\n",
    )
    .expect("write template");
    record.license_file = dir.join("license.yaml").into_string();
    record.config_template = dir.join("install.tmpl").into_string();
    record.keystore = String::from(r#"{"keys":[]}"#);

    let install = install_settings::<ScriptedBackendError>(&record, &StubLookups::default())
        .await
        .expect("install");

    assert_eq!(install.license, b"licence-body");
    assert_eq!(
        String::from_utf8(install.config).expect("utf8"),
        "name: dev-alice\ndomain: example.com\nkeys: {\"keys\":[]}\n"
    );
    assert_eq!(install.shared_password, "letmein");
    assert_eq!(install.user_name, "ubuntu");
}

#[rstest]
#[tokio::test]
async fn install_settings_report_missing_licence(mut record: StackConfig) {
    let tmp = TempDir::new().expect("tempdir");
    record.license_file = utf8_dir(&tmp).join("absent.yaml").into_string();

    let err = install_settings::<ScriptedBackendError>(&record, &StubLookups::default())
        .await
        .expect_err("missing licence");

    assert!(
        matches!(err, Error::Io { ref path, .. } if path.as_str().ends_with("absent.yaml")),
        "{err}"
    );
}

#[rstest]
#[tokio::test]
async fn rebuild_keeps_the_old_stack_when_the_licence_is_missing(mut record: StackConfig) {
    let tmp = TempDir::new().expect("tempdir");
    record.license_file = utf8_dir(&tmp).join("absent.yaml").into_string();
    let lookups = StubLookups::default();
    let mut torn_down = false;

    let err = plan_then_teardown::<ScriptedBackendError, Error, _, _>(
        &lookups,
        "123456789012",
        &record,
        || {
            torn_down = true;
            ready(Ok(()))
        },
    )
    .await
    .expect_err("missing licence");

    assert!(matches!(err, Error::Io { .. }), "{err}");
    assert!(!torn_down);
    assert!(lookups.calls().is_empty(), "{:?}", lookups.calls());
}

#[rstest]
#[tokio::test]
async fn rebuild_tears_down_after_planning(mut record: StackConfig) {
    let tmp = TempDir::new().expect("tempdir");
    let dir = utf8_dir(&tmp);
    std::fs::write(dir.join("license.yaml"), "licence-body").expect("write licence");
    std::fs::write(dir.join("install.tmpl"), "name: {{ .StackName }}\n").expect("write template");
    record.license_file = dir.join("license.yaml").into_string();
    record.config_template = dir.join("install.tmpl").into_string();
    let lookups = StubLookups::default();
    let calls_at_teardown = Mutex::new(None);

    let plan = plan_then_teardown::<ScriptedBackendError, Error, _, _>(
        &lookups,
        "123456789012",
        &record,
        || {
            *calls_at_teardown.lock().expect("teardown lock") = Some(lookups.calls().len());
            ready(Ok(()))
        },
    )
    .await
    .expect("plan");

    assert_eq!(*calls_at_teardown.lock().expect("teardown lock"), Some(3));
    assert_eq!(plan.install.license, b"licence-body");
    assert_eq!(plan.parameters.len(), 10);
}

#[tokio::test]
async fn status_prints_status_and_outputs() {
    let stack = stack_with_outputs(&[("Address", "203.0.113.10")]);
    stack.backend().push_status("dev-alice", "CREATE_COMPLETE");
    let mut out = Vec::new();

    show_status(&stack, &mut out).await.expect("status");

    assert_eq!(
        String::from_utf8(out).expect("utf8"),
        "Status for stack \"dev-alice\": CREATE_COMPLETE\nStack Outputs:\n  Address:  203.0.113.10\n"
    );
}

#[rstest]
#[case::lowercase("address", true, "203.0.113.10\n")]
#[case::mixed_case("ADDRESS", true, "203.0.113.10\n")]
#[case::no_newline("Address", false, "203.0.113.10")]
#[tokio::test]
async fn get_output_matches_ignoring_case(
    #[case] field: &str,
    #[case] newline: bool,
    #[case] expected: &str,
) {
    let stack = stack_with_outputs(&[("Address", "203.0.113.10"), ("CA", "ca.example.com")]);
    let mut out = Vec::new();

    get_output(&stack, field, newline, &mut out)
        .await
        .expect("output");

    assert_eq!(String::from_utf8(out).expect("utf8"), expected);
}

#[tokio::test]
async fn get_output_rejects_unknown_field() {
    let stack = stack_with_outputs(&[("Address", "203.0.113.10")]);

    let err = get_output(&stack, "ip", true, &mut Vec::new())
        .await
        .expect_err("unknown field");

    assert_eq!(err.to_string(), "stack dev-alice has no output named ip");
}

#[tokio::test]
async fn list_keeps_stacks_from_the_template() {
    let backend = ScriptedStackBackend::new();
    let listed = |name: &str, description: Option<&str>| StackRecord {
        name: name.to_owned(),
        status: String::from("CREATE_COMPLETE"),
        description: description.map(str::to_owned),
        ..StackRecord::default()
    };
    backend.set_listed(vec![
        listed("dev-alice", Some("Orion PTT System")),
        listed("billing", Some("Billing pipeline")),
        listed("dev-bob", Some("Orion PTT System")),
        listed("orphan", None),
    ]);
    let stack = StackHandle::new(backend, "", TEMPLATE);
    let mut out = Vec::new();

    let stacks = list_stacks(&stack, "Orion PTT System", &mut out)
        .await
        .expect("list");

    assert_eq!(stacks.len(), 2);
    assert_eq!(
        String::from_utf8(out).expect("utf8"),
        "Stacks currently registered in CloudFormation:\n  dev-alice\n  dev-bob\n"
    );
}

#[tokio::test]
async fn cacert_writes_pem_next_to_operator() {
    let tmp = TempDir::new().expect("tempdir");
    let dir = utf8_dir(&tmp);
    let stack = stack_with_outputs(&[("CA", "ca.example.com")]);
    let probe = ScriptedProbe::new();
    probe.set_body("https://ca.example.com/v1/pki/ca/pem", b"-----BEGIN CERTIFICATE-----\n");
    let mut out = Vec::new();

    let path = fetch_ca(&stack, &probe, &dir, &mut out).await.expect("cacert");

    assert_eq!(path, dir.join("ca.example.com-ca.pem"));
    assert_eq!(
        std::fs::read_to_string(&path).expect("pem"),
        "-----BEGIN CERTIFICATE-----\n"
    );
    let printed = String::from_utf8(out).expect("utf8");
    assert!(
        printed.starts_with("CA Certificate URL: https://ca.example.com/v1/pki/ca/pem\n"),
        "{printed}"
    );
}

#[tokio::test]
async fn cacert_without_ca_output_fails() {
    let tmp = TempDir::new().expect("tempdir");
    let stack = stack_with_outputs(&[("Address", "203.0.113.10")]);

    let err = fetch_ca(&stack, &ScriptedProbe::new(), &utf8_dir(&tmp), &mut Vec::new())
        .await
        .expect_err("no CA output");

    assert_eq!(err.to_string(), "stack output CA is missing");
}

#[tokio::test]
async fn rebuild_reads_key_name_from_parameters() {
    let backend = ScriptedStackBackend::new();
    let mut parameters = BTreeMap::new();
    parameters.insert(String::from("KeyName"), String::from("alice-laptop"));
    backend.insert_stack(StackRecord {
        name: String::from("dev-alice"),
        status: String::from("CREATE_COMPLETE"),
        parameters,
        ..StackRecord::default()
    });
    let stack = StackHandle::new(backend, "dev-alice", TEMPLATE);

    assert_eq!(
        existing_key_name(&stack).await.expect("key name"),
        "alice-laptop"
    );
}

#[tokio::test]
async fn rebuild_requires_existing_stack() {
    let stack = StackHandle::new(ScriptedStackBackend::new(), "dev-alice", TEMPLATE);

    let err = existing_key_name(&stack).await.expect_err("missing");

    assert!(matches!(err, Error::Missing { ref name } if name == "dev-alice"));
}

#[rstest]
fn dry_run_prints_record(record: StackConfig) {
    let mut out = Vec::new();

    write_dry_run::<ScriptedBackendError>(&record, &mut out).expect("dry run");

    let printed = String::from_utf8(out).expect("utf8");
    assert!(printed.starts_with("Config:\n{"), "{printed}");
    assert!(printed.contains("\"stack_name\": \"dev-alice\""), "{printed}");
}

#[test]
fn template_is_the_blank_record() {
    let mut out = Vec::new();
    write_template(&mut out).expect("template");
    assert_eq!(String::from_utf8(out).expect("utf8"), CONFIG_FILE_TEMPLATE);
}

struct WritingEditor {
    contents: Option<&'static str>,
    seen: Mutex<Option<String>>,
}

impl Editor for WritingEditor {
    fn edit(&self, path: &Utf8Path) -> Result<(), CommandError> {
        let existing = std::fs::read_to_string(path).unwrap_or_default();
        *self.seen.lock().expect("seen lock") = Some(existing);
        let Some(contents) = self.contents else {
            return Err(CommandError::Failed {
                program: String::from("nano"),
                status: Some(1),
                status_text: String::from("1"),
                stderr: String::new(),
            });
        };
        std::fs::write(path, contents).map_err(|err| CommandError::Spawn {
            program: String::from("nano"),
            message: err.to_string(),
        })
    }
}

#[test]
fn edit_config_seeds_template_and_reads_result() {
    let tmp = TempDir::new().expect("tempdir");
    let store = StackConfigStore::new(utf8_dir(&tmp).join(".orion-ptt-system.json"));
    let editor = WritingEditor {
        contents: Some(r#"{"stack_name":"dev-carol","Beta":true}"#),
        seen: Mutex::new(None),
    };

    let edited = edit_config::<ScriptedBackendError>(&store, &editor).expect("edit");

    assert_eq!(edited.stack_name, "dev-carol");
    assert!(edited.beta);
    assert_eq!(
        editor.seen.lock().expect("seen lock").as_deref(),
        Some(CONFIG_FILE_TEMPLATE)
    );
}

#[test]
fn edit_config_surfaces_editor_failure() {
    let tmp = TempDir::new().expect("tempdir");
    let store = StackConfigStore::new(utf8_dir(&tmp).join(".orion-ptt-system.json"));
    let editor = WritingEditor {
        contents: None,
        seen: Mutex::new(None),
    };

    let err = edit_config::<ScriptedBackendError>(&store, &editor).expect_err("editor fails");

    assert!(matches!(err, Error::Editor(_)), "{err}");
}

#[test]
fn process_editor_defaults_to_nano() {
    assert_eq!(ProcessEditor::new(DEFAULT_EDITOR).program(), "nano");
}
