//! Rendering of the install config template staged as `config.yaml`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::SigningKey;
use minijinja::{Environment, UndefinedBehavior, context};
use rand::RngCore;
use serde::Serialize;
use uuid::Uuid;

use super::StackConfig;
use super::source::SourceError;

/// Number of signing keys in a generated keystore.
pub const KEYSTORE_SIZE: usize = 3;

/// Values available to the template as `.Keystore`, `.StackName` and
/// `.Domain`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TemplateData {
    /// JWK set as JSON text.
    pub keystore: String,
    /// Stack name.
    pub stack_name: String,
    /// DNS domain.
    pub domain: String,
}

impl TemplateData {
    /// Data for `config`, generating a keystore when the record has none.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Template`] when key generation fails.
    pub fn for_config(config: &StackConfig) -> Result<Self, SourceError> {
        let keystore = if config.keystore.trim().is_empty() {
            generate_keystore(KEYSTORE_SIZE)?
        } else {
            config.keystore.clone()
        };
        Ok(Self {
            keystore,
            stack_name: config.stack_name.clone(),
            domain: config.dns_domain.clone(),
        })
    }
}

/// Renders a Go-style template such as `{{.StackName}}` or
/// `{{- .Keystore -}}` with `data`.
///
/// Actions are handed to minijinja after dropping the leading `.` of the
/// field name, so whitespace trim markers keep their meaning. Unknown fields
/// are errors rather than empty strings.
///
/// # Errors
///
/// Returns [`SourceError::Template`] for a syntax error or an unknown field.
pub fn render_template(template: &str, data: &TemplateData) -> Result<String, SourceError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    let ctx = context! {
        Keystore => data.keystore.as_str(),
        StackName => data.stack_name.as_str(),
        Domain => data.domain.as_str(),
    };
    env.render_str(&jinja_source(template), ctx)
        .map_err(|err| SourceError::Template(err.to_string()))
}

fn jinja_source(template: &str) -> String {
    let mut source = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((before, after)) = rest.split_once("{{") {
        source.push_str(before);
        source.push_str("{{");
        let Some((action, tail)) = after.split_once("}}") else {
            // Unclosed; minijinja reports it.
            source.push_str(after);
            return source;
        };
        let (trim, body) = action
            .strip_prefix('-')
            .map_or(("", action), |body| ("-", body));
        let body = body.trim_start();
        source.push_str(trim);
        source.push(' ');
        source.push_str(body.strip_prefix('.').unwrap_or(body));
        source.push_str("}}");
        rest = tail;
    }
    source.push_str(rest);
    source
}

#[derive(Serialize)]
struct JsonWebKey {
    kty: &'static str,
    crv: &'static str,
    alg: &'static str,
    #[serde(rename = "use")]
    key_use: &'static str,
    kid: String,
    x: String,
    d: String,
}

#[derive(Serialize)]
struct JsonWebKeySet {
    keys: Vec<JsonWebKey>,
}

/// Generates a JWK set of `count` Ed25519 signing keys.
///
/// # Errors
///
/// Returns [`SourceError::Template`] if the set cannot be serialised.
pub fn generate_keystore(count: usize) -> Result<String, SourceError> {
    let mut rng = rand::thread_rng();
    let keys = (0..count)
        .map(|_| {
            let mut seed = [0u8; 32];
            rng.fill_bytes(&mut seed);
            let signing = SigningKey::from_bytes(&seed);
            JsonWebKey {
                kty: "OKP",
                crv: "Ed25519",
                alg: "EdDSA",
                key_use: "sig",
                kid: Uuid::new_v4().to_string(),
                x: URL_SAFE_NO_PAD.encode(signing.verifying_key().as_bytes()),
                d: URL_SAFE_NO_PAD.encode(signing.to_bytes()),
            }
        })
        .collect();
    serde_json::to_string(&JsonWebKeySet { keys })
        .map_err(|err| SourceError::Template(err.to_string()))
}
