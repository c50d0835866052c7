use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::admission::AdmissionRequest;
use crate::model::{AccountKind, Bucket, CounterScope, Platform};
use crate::usage::ObservedUsage;

use super::state::AppContext;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

fn json_response(status: u16, body: serde_json::Value) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body.to_string()))
        .unwrap()
}

/// What happens after a request is admitted and scheduled to an account.
/// The proxy itself is out of scope (SPEC_FULL.md §6); this trait is the
/// seam the HTTP layer calls through, with a non-networked stub suitable
/// for tests shipped as [`NullUpstreamRelay`].
#[async_trait]
pub trait UpstreamRelay: Send + Sync {
    async fn relay(
        &self,
        platform: Platform,
        account_kind: AccountKind,
        account_id: &str,
        model: &str,
        body: &[u8],
    ) -> anyhow::Result<ObservedUsage>;
}

pub struct NullUpstreamRelay;

#[async_trait]
impl UpstreamRelay for NullUpstreamRelay {
    async fn relay(
        &self,
        _platform: Platform,
        _account_kind: AccountKind,
        _account_id: &str,
        _model: &str,
        _body: &[u8],
    ) -> anyhow::Result<ObservedUsage> {
        Ok(ObservedUsage::default())
    }
}

#[derive(Deserialize)]
struct GetKeyIdBody {
    #[serde(rename = "apiKey")]
    api_key: String,
}

#[derive(Deserialize)]
struct UserStatsBody {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    #[serde(rename = "apiId")]
    api_id: Option<String>,
}

#[derive(Deserialize)]
struct UserModelStatsBody {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
    #[serde(rename = "apiId")]
    api_id: Option<String>,
    #[serde(default = "default_period")]
    period: String,
}

fn default_period() -> String {
    "daily".to_string()
}

#[derive(Serialize)]
struct ModelStatRow {
    model: String,
    requests: u64,
    #[serde(rename = "inputTokens")]
    input_tokens: u64,
    #[serde(rename = "outputTokens")]
    output_tokens: u64,
    #[serde(rename = "allTokens")]
    all_tokens: u64,
    cost: String,
}

async fn read_body(req: Request<Incoming>) -> Result<Vec<u8>, hyper::Error> {
    Ok(req.collect().await?.to_bytes().to_vec())
}

pub async fn handle_gateway(
    req: Request<Incoming>,
    ctx: AppContext,
    relay: std::sync::Arc<dyn UpstreamRelay>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let path = req.uri().path().to_string();

    match path.as_str() {
        "/apiStats/api/get-key-id" => handle_get_key_id(req, ctx).await,
        "/apiStats/api/user-stats" => handle_user_stats(req, ctx).await,
        "/apiStats/api/user-model-stats" => handle_user_model_stats(req, ctx).await,
        other if is_relay_path(other) => handle_relay(req, ctx, relay).await,
        _ => Ok(json_response(404, json!({"error": "not found"}))),
    }
}

fn is_relay_path(path: &str) -> bool {
    path.starts_with("/api") || path.starts_with("/claude") || path.starts_with("/gemini") || path.starts_with("/openai")
}

fn platform_for_path(path: &str) -> Platform {
    if path.starts_with("/openai") {
        Platform::OpenAi
    } else if path.starts_with("/gemini") {
        Platform::Gemini
    } else {
        Platform::Claude
    }
}

fn bearer_secret(req: &Request<Incoming>) -> Option<String> {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| req.headers().get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string))
}

async fn handle_get_key_id(req: Request<Incoming>, ctx: AppContext) -> Result<Response<BoxBody>, hyper::Error> {
    let bytes = read_body(req).await?;
    let Ok(body) = serde_json::from_slice::<GetKeyIdBody>(&bytes) else {
        return Ok(json_response(400, json!({"success": false, "error": "malformed request"})));
    };

    match ctx.admission.resolve_key(&body.api_key).await {
        Ok(key) => Ok(json_response(200, json!({"success": true, "data": {"id": key.id.to_string()}}))),
        Err(err) => Ok(json_response(err.http_status(), json!({"success": false, "error": err.client_message()}))),
    }
}

async fn handle_user_stats(req: Request<Incoming>, ctx: AppContext) -> Result<Response<BoxBody>, hyper::Error> {
    let bytes = read_body(req).await?;
    let Ok(body) = serde_json::from_slice::<UserStatsBody>(&bytes) else {
        return Ok(json_response(400, json!({"success": false, "error": "malformed request"})));
    };

    let key = match resolve_identity(&ctx, body.api_key.as_deref(), body.api_id.as_deref()).await {
        Ok(key) => key,
        Err(resp) => return Ok(resp),
    };

    let lifetime = ctx
        .store
        .get_counter(&CounterScope::Key { key_id: key.id.to_string(), bucket: Bucket::Lifetime })
        .await
        .unwrap_or_default();

    Ok(json_response(
        200,
        json!({
            "success": true,
            "data": {
                "id": key.id.to_string(),
                "name": key.name,
                "isActive": key.is_active,
                "tokenLimit": key.token_limit,
                "concurrencyLimit": key.concurrency_limit,
                "dailyCostLimit": key.daily_cost_limit.to_string(),
                "usage": {
                    "requests": lifetime.requests,
                    "inputTokens": lifetime.input_tokens,
                    "outputTokens": lifetime.output_tokens,
                    "allTokens": lifetime.all_tokens,
                    "cost": lifetime.cost.to_string(),
                },
            },
        }),
    ))
}

async fn handle_user_model_stats(req: Request<Incoming>, ctx: AppContext) -> Result<Response<BoxBody>, hyper::Error> {
    let bytes = read_body(req).await?;
    let Ok(body) = serde_json::from_slice::<UserModelStatsBody>(&bytes) else {
        return Ok(json_response(400, json!({"success": false, "error": "malformed request"})));
    };

    let key = match resolve_identity(&ctx, body.api_key.as_deref(), body.api_id.as_deref()).await {
        Ok(key) => key,
        Err(resp) => return Ok(resp),
    };

    let prefix = format!("usage:{}:model:{}:", key.id, body.period);
    let rows = ctx.store.list_counters_with_prefix(&prefix).await.unwrap_or_default();

    let mut stats: Vec<ModelStatRow> = rows
        .into_iter()
        .map(|(suffix, counter)| {
            let model = suffix.rsplit_once(':').map(|(m, _bucket)| m.to_string()).unwrap_or(suffix);
            ModelStatRow {
                model,
                requests: counter.requests,
                input_tokens: counter.input_tokens,
                output_tokens: counter.output_tokens,
                all_tokens: counter.all_tokens,
                cost: counter.cost.to_string(),
            }
        })
        .collect();

    stats.sort_by(|a, b| b.all_tokens.cmp(&a.all_tokens));

    Ok(json_response(200, json!({"success": true, "data": stats})))
}

async fn resolve_identity(
    ctx: &AppContext,
    api_key: Option<&str>,
    api_id: Option<&str>,
) -> Result<crate::model::ApiKey, Response<BoxBody>> {
    if let Some(secret) = api_key {
        return ctx
            .admission
            .resolve_key(secret)
            .await
            .map_err(|e| json_response(e.http_status(), json!({"success": false, "error": e.client_message()})));
    }
    if let Some(id) = api_id {
        let Ok(uuid) = uuid::Uuid::parse_str(id) else {
            return Err(json_response(400, json!({"success": false, "error": "malformed apiId"})));
        };
        return ctx
            .store
            .get_api_key(&uuid)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| json_response(404, json!({"success": false, "error": "not found"})));
    }
    Err(json_response(400, json!({"success": false, "error": "apiKey or apiId required"})))
}

async fn handle_relay(
    req: Request<Incoming>,
    ctx: AppContext,
    relay: std::sync::Arc<dyn UpstreamRelay>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let path = req.uri().path().to_string();
    let platform = platform_for_path(&path);
    let Some(secret) = bearer_secret(&req) else {
        return Ok(json_response(401, json!({"error": "missing api key"})));
    };

    let session_hash = req
        .headers()
        .get("x-session-hash")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = read_body(req).await?;
    let requested_model = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|v| v.get("model").and_then(|m| m.as_str()).map(str::to_string));

    let admission_request = AdmissionRequest {
        platform,
        requested_model: requested_model.clone(),
        client_id: None,
    };

    let admitted = match ctx.admission.admit(&secret, &admission_request).await {
        Ok(a) => a,
        Err(err) => return Ok(json_response(err.http_status(), json!({"error": err.client_message()}))),
    };

    let outcome = match ctx
        .scheduler
        .select(&admitted.key, platform, session_hash.as_deref(), requested_model.as_deref())
        .await
    {
        Ok(o) => o,
        Err(err) => {
            admitted.token.release().await;
            return Ok(json_response(err.http_status(), json!({"error": err.client_message()})));
        }
    };

    let model = requested_model.unwrap_or_default();
    let usage = relay
        .relay(platform, outcome.account_kind, &outcome.account_id, &model, &bytes)
        .await
        .unwrap_or_default();

    let price_table_guard = ctx.price_table.load();
    let price_table: &crate::pricing::PriceTable = &price_table_guard;
    let key_id = admitted.key.id.to_string();
    let record_result = ctx
        .usage
        .record(
            admitted.token,
            &key_id,
            Some((outcome.account_kind, &outcome.account_id)),
            &model,
            usage,
            price_table,
        )
        .await;

    // The relay call already succeeded, so a counter-store failure here must
    // not turn an otherwise-successful request into a 500; log and swallow.
    if let Err(err) = record_result {
        tracing::warn!(error = %err, key_id = %key_id, "failed to record usage");
    }

    Ok(json_response(200, json!({"success": true})))
}
