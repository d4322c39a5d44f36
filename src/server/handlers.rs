//! Request handlers for the JSON API.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{TimeDelta, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::pipeline::{KOTSADM_PORT, StackEndpoints, ca_url};
use crate::probe::EndpointProbe;
use crate::stack::StackHandle;

use super::{ApiError, ApiResult, AppState, BackendFactory, NOT_READY};

/// One row of the stack list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StackEntry {
    /// Stack name.
    pub name: String,
    /// Account the stack lives in.
    pub account: String,
}

/// Detail view of one stack.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StackDetails {
    /// Account number.
    pub account: String,
    /// Admin console URL, or "Not Ready".
    pub kotsadm: String,
    /// Raw provider status.
    pub cfstatus: String,
    /// Stack name.
    pub name: String,
    /// Public address of the host.
    pub address: String,
    /// Datastore host.
    pub datastore: String,
    /// Event stream host.
    pub eventstream: String,
    /// Media host.
    pub media: String,
    /// Login URL, or "Not Ready".
    pub login: String,
    /// API URL, or "Not Ready".
    pub api: String,
    /// CDN host.
    pub cdn: String,
    /// CA certificate URL, or "Not Ready".
    pub ca: String,
    /// Creation time in RFC 3339, empty when unknown.
    pub created: String,
    /// Time since creation, empty when unknown.
    pub uptime: String,
}

/// Formats `elapsed` as `"<h>h <m>m <s>s"`; negative spans read as zero.
#[must_use]
pub fn format_uptime(elapsed: TimeDelta) -> String {
    let span = elapsed.max(TimeDelta::zero());
    let hours = span.num_hours();
    let after_hours = span - TimeDelta::hours(hours);
    let minutes = after_hours.num_minutes();
    let seconds = (after_hours - TimeDelta::minutes(minutes)).num_seconds();
    format!("{hours}h {minutes}m {seconds}s")
}

pub(super) async fn pong() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

pub(super) async fn list_stacks<F, P>(
    State(state): State<Arc<AppState<F, P>>>,
) -> ApiResult<Json<Vec<StackEntry>>>
where
    F: BackendFactory,
    P: EndpointProbe + Send + Sync + 'static,
{
    let mut entries = Vec::new();
    for account in &state.accounts {
        let lister = StackHandle::new(
            state.factory.backend_for(account),
            "",
            state.template_url.as_str(),
        );
        let stacks = lister
            .list_stacks(&state.template_description)
            .await
            .map_err(|err| {
                ApiError::Internal(format!("listing stacks in {}: {err}", account.number))
            })?;
        debug!(account = %account.number, count = stacks.len(), "listed stacks");
        entries.extend(stacks.into_iter().map(|stack| StackEntry {
            name: stack.name,
            account: account.number.clone(),
        }));
    }
    Ok(Json(entries))
}

pub(super) async fn stack_details<F, P>(
    State(state): State<Arc<AppState<F, P>>>,
    Path((account, name)): Path<(String, String)>,
) -> ApiResult<Json<StackDetails>>
where
    F: BackendFactory,
    P: EndpointProbe + Send + Sync + 'static,
{
    let stack = handle_for(&state, &account, &name)?;
    let internal = |err: &dyn std::fmt::Display| ApiError::Internal(format!("stack {name}: {err}"));

    let status = stack.status().await.map_err(|err| internal(&err))?;
    let outputs = stack.outputs().await.map_err(|err| internal(&err))?;
    let created = match stack.created_at().await {
        Ok(time) => Some(time),
        Err(err) => {
            warn!(stack = %name, error = %err, "creation time unavailable");
            None
        }
    };

    let endpoints = StackEndpoints::from_outputs(&outputs);
    let probe = &state.probe;
    let kotsadm = if ping(probe, &format!("{}:{KOTSADM_PORT}", endpoints.address)).await {
        endpoints.console_url()
    } else {
        String::from(NOT_READY)
    };
    let login = ready_url(probe, &endpoints.login, format!("https://{}", endpoints.login)).await;
    let api = ready_url(probe, &endpoints.api, format!("https://{}", endpoints.api)).await;
    let ca = ready_url(probe, &endpoints.ca, ca_url(&endpoints.ca)).await;

    Ok(Json(StackDetails {
        account,
        kotsadm,
        cfstatus: status.as_str().to_owned(),
        name,
        address: endpoints.address,
        datastore: endpoints.datastore,
        eventstream: endpoints.event_stream,
        media: endpoints.media,
        login,
        api,
        cdn: endpoints.cdn,
        ca,
        created: created.map(|time| time.to_rfc3339()).unwrap_or_default(),
        uptime: created
            .map(|time| format_uptime(Utc::now() - time))
            .unwrap_or_default(),
    }))
}

pub(super) async fn stack_ca<F, P>(
    State(state): State<Arc<AppState<F, P>>>,
    Path((account, name)): Path<(String, String)>,
) -> ApiResult<Response>
where
    F: BackendFactory,
    P: EndpointProbe + Send + Sync + 'static,
{
    let stack = handle_for(&state, &account, &name)?;
    let outputs = stack
        .outputs()
        .await
        .map_err(|err| ApiError::NotFound(format!("stack {name}: {err}")))?;
    let endpoints = StackEndpoints::from_outputs(&outputs);
    if endpoints.ca.is_empty() {
        return Err(ApiError::NotFound(format!("stack {name} has no CA output")));
    }
    let pem = state
        .probe
        .fetch(&ca_url(&endpoints.ca))
        .await
        .map_err(|err| ApiError::NotFound(err.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/pkix-cert")],
        pem,
    )
        .into_response())
}

pub(super) async fn delete_stack<F, P>(
    State(state): State<Arc<AppState<F, P>>>,
    Path((account, name)): Path<(String, String)>,
) -> ApiResult<StatusCode>
where
    F: BackendFactory,
    P: EndpointProbe + Send + Sync + 'static,
{
    let stack = handle_for(&state, &account, &name)?;
    stack
        .delete()
        .await
        .map_err(|err| ApiError::BadRequest(format!("deleting stack {name}: {err}")))?;
    info!(account = %account, stack = %name, "stack deletion requested");
    Ok(StatusCode::OK)
}

fn handle_for<F, P>(
    state: &AppState<F, P>,
    account: &str,
    name: &str,
) -> ApiResult<StackHandle<F::Backend>>
where
    F: BackendFactory,
{
    let found = state.account(account)?;
    Ok(StackHandle::new(
        state.factory.backend_for(found),
        name,
        state.template_url.as_str(),
    ))
}

async fn ping<P: EndpointProbe + Sync>(probe: &P, host: &str) -> bool {
    probe.check(&format!("https://{host}")).await.is_ok()
}

async fn ready_url<P: EndpointProbe + Sync>(probe: &P, host: &str, url: String) -> String {
    if !host.is_empty() && ping(probe, host).await {
        url
    } else {
        String::from(NOT_READY)
    }
}
