//! HTTP routes.
//!
//! Every JSON endpoint returns `{"message": ...}` on failure, plus a `debug`
//! hint when debug responses are enabled.

use crate::error::ApiError;
use crate::state::{AppState, PROXY_TIMEOUT};
use ager_content::analysis::{describe_photo, extract_features};
use ager_content::chat::{self, ChatRequest, ChatTurn};
use ager_content::diet::{self, DietProfile, Medication};
use ager_content::images::banner_image;
use ager_content::InlineImage;
use ager_core::{
    age_json, decode_payload, normalize, payload_body, payload_mime_type, validate_age, verify_payload, AgeBand,
    AgeBucket, FeatureDescriptor, InferenceOutput, InputStats, Prediction, ValidationError,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

type JsonBody = Result<Json<Value>, JsonRejection>;

const DEFAULT_BANNER_AGE: f64 = 30.0;
const DIET_FIELDS_MESSAGE: &str = "Please fill in Age, Height, and Weight before generating a diet plan.";
/// Upper bound on a proxied image body.
const MAX_PROXY_BYTES: usize = 10 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/predict-age", post(predict_age))
        .route("/api/age-ai", post(age_ai))
        .route("/api/age-wellness", post(age_wellness))
        .route("/api/health-chat", post(health_chat))
        .route("/api/conversations/{id}", get(conversation))
        .route("/api/diet-plan", post(diet_plan))
        .route("/api/age-images", get(age_images))
        .route("/api/proxy-image", get(proxy_image))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn respond(state: &AppState, result: Result<Value, ApiError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response_with(state.config.debug_responses),
    }
}

/// A missing or malformed body reads as `{}`, so the field checks below
/// produce the client-facing message.
fn read_body(body: JsonBody) -> Value {
    match body {
        Ok(Json(value)) if value.is_object() => value,
        Ok(_) => Value::Object(Map::new()),
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "unreadable request body");
            Value::Object(Map::new())
        }
    }
}

fn image_field(body: &Value) -> Result<&str, ApiError> {
    ["image", "dataUrl"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing image".to_string()))
}

fn text_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

/// JSON number or numeric string. Empty strings count as absent.
fn number_field(body: &Value, key: &str) -> Option<f64> {
    let value = match body.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

async fn stored_features(state: &AppState, age: f64) -> Option<FeatureDescriptor> {
    match state.features.features(age).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(age, error = %e, "feature lookup failed; continuing without features");
            None
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn predict_age(State(state): State<AppState>, body: JsonBody) -> Response {
    let result = predict(&state, read_body(body)).await;
    respond(&state, result)
}

async fn predict(state: &AppState, body: Value) -> Result<Value, ApiError> {
    let payload = image_field(&body)?.to_string();
    let opts = state.config.decoder_options();
    // Decode first so a bad payload is a 400 even when no model is installed.
    let image = tokio::task::spawn_blocking(move || decode_payload(&payload, &opts)).await??;
    let stats = image.stats();

    if !state.model.is_loaded() {
        tracing::info!(path = %state.config.model_path.display(), "loading age classifier");
    }
    let raw = state.model.infer(image).await?;
    let output = InferenceOutput::from_tensor(&raw.shape, &raw.data)?;
    let prediction = normalize(&output, &state.config.class_labels, state.config.scalar_range())?;
    tracing::info!(label = %prediction.label, confidence = ?prediction.confidence, "age predicted");

    Ok(prediction_body(
        &prediction,
        &stats,
        &state.config.class_labels,
        state.config.debug_responses,
    ))
}

/// Debug bodies add the distribution in percent, the labels and the input stats.
fn prediction_body(prediction: &Prediction, stats: &InputStats, labels: &[String], debug: bool) -> Value {
    let mut response = json!({ "label": prediction.label });
    if let Some(confidence) = prediction.confidence {
        response["confidence"] = json!(round_to(confidence as f64, 1));
    }
    if debug {
        if let Some(probs) = &prediction.probabilities {
            let percent: Vec<f64> = probs.iter().map(|p| round_to(*p as f64 * 100.0, 2)).collect();
            response["probs"] = json!(percent);
        }
        response["labels"] = json!(labels);
        if let Some(index) = prediction.argmax_index {
            response["argmax_index"] = json!(index);
        }
        response["input_stats"] = json!(stats);
    }
    response
}

async fn age_ai(State(state): State<AppState>, body: JsonBody) -> Response {
    let result = analyze_photo(&state, read_body(body)).await;
    respond(&state, result)
}

async fn analyze_photo(state: &AppState, body: Value) -> Result<Value, ApiError> {
    let payload = image_field(&body)?;
    let owned = payload.to_string();
    tokio::task::spawn_blocking(move || verify_payload(&owned)).await??;

    let data = payload_body(payload);
    let inline = InlineImage {
        mime_type: payload_mime_type(payload).to_string(),
        data: data.clone(),
    };
    let service = state.service.as_ref();
    let (age, features, description) = tokio::join!(
        state.face.estimate_age(&data),
        extract_features(service, inline.clone()),
        describe_photo(service, inline),
    );
    let age = age?;
    let band = AgeBand::from_age(age);

    let stored = match &features {
        Some(descriptor) => match state.features.put_features(age, descriptor).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(age, error = %e, "failed to store facial features");
                false
            }
        },
        None => false,
    };
    tracing::info!(age, band = %band, features = features.is_some(), "photo analysed");

    let mut response = json!({
        "label": band.to_string(),
        "age": age_json(age),
        "facial_features_stored": stored,
    });
    if let Some(descriptor) = features {
        response["facial_features"] = json!(descriptor);
    }
    if let Some(description) = description {
        response["photo_description"] = json!(description);
    }
    Ok(response)
}

async fn age_wellness(State(state): State<AppState>, body: JsonBody) -> Response {
    let result = wellness(&state, read_body(body)).await;
    respond(&state, result)
}

async fn wellness(state: &AppState, body: Value) -> Result<Value, ApiError> {
    let age = validate_age(body.get("age"))?;
    let bucket = AgeBucket::from_age(age);
    let features = stored_features(state, age).await;

    let content = state
        .wellness
        .generate(age, features.as_ref())
        .await
        .map_err(ApiError::Wellness)?;

    let mut response = json!({
        "age": age_json(age),
        "bucket": bucket,
        "wellness": content,
    });
    if let Some(descriptor) = features {
        response["facial_features"] = json!(descriptor);
    }
    Ok(response)
}

async fn health_chat(State(state): State<AppState>, body: JsonBody) -> Response {
    let result = chat_exchange(&state, read_body(body)).await;
    respond(&state, result)
}

async fn chat_exchange(state: &AppState, body: Value) -> Result<Value, ApiError> {
    let message = text_field(&body, "message")
        .ok_or_else(|| ApiError::Validation(ValidationError::Invalid("message is required".to_string())))?;
    let age = validate_age(body.get("age"))?;
    let default_group = if AgeBucket::from_age(age).is_minor() { "Minor" } else { "Adult" };
    let age_group = text_field(&body, "ageGroup").unwrap_or(default_group).to_string();
    // Non-object entries are skipped rather than rejected.
    let history: Vec<ChatTurn> = body
        .get("conversationHistory")
        .and_then(Value::as_array)
        .map(|turns| {
            turns
                .iter()
                .filter_map(|turn| serde_json::from_value(turn.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    let parenting_mode = body.get("parentingMode").and_then(Value::as_bool).unwrap_or(false);
    let conversation_id = text_field(&body, "conversationId");
    let features = stored_features(state, age).await;

    let request = ChatRequest {
        message,
        age,
        age_group: &age_group,
        history: &history,
        parenting_mode,
        features: features.as_ref(),
    };
    let reply = chat::reply(state.service.as_ref(), &request)
        .await
        .map_err(ApiError::Chat)?;

    let mut response = json!({
        "response": reply,
        "age": age_json(age),
        "ageGroup": age_group,
    });
    match state.transcripts.record_exchange(conversation_id, message, &reply).await {
        Ok(id) => response["conversationId"] = json!(id),
        Err(e) => tracing::warn!(error = %e, "failed to persist chat exchange"),
    }
    Ok(response)
}

async fn conversation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = load_conversation(&state, &id).await;
    respond(&state, result)
}

async fn load_conversation(state: &AppState, id: &str) -> Result<Value, ApiError> {
    let conversation = state
        .transcripts
        .conversation(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;
    Ok(json!({ "conversation": conversation }))
}

async fn diet_plan(State(state): State<AppState>, body: JsonBody) -> Response {
    let result = plan_diet(&state, read_body(body)).await;
    respond(&state, result)
}

async fn plan_diet(state: &AppState, body: Value) -> Result<Value, ApiError> {
    let (Some(age), Some(height_cm), Some(weight_kg)) = (
        number_field(&body, "age"),
        number_field(&body, "height"),
        number_field(&body, "weight"),
    ) else {
        return Err(ApiError::BadRequest(DIET_FIELDS_MESSAGE.to_string()));
    };
    let age = validate_age(Some(&json!(age)))?;
    if height_cm <= 0.0 || weight_kg <= 0.0 {
        return Err(ApiError::BadRequest("Height and weight must be positive numbers.".to_string()));
    }

    let medications: Vec<Medication> = body
        .get("medications")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|m| serde_json::from_value(m.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    let profile = DietProfile {
        age,
        height_cm,
        weight_kg,
        bmi: number_field(&body, "bmi"),
        gender: text_field(&body, "gender").map(str::to_string),
        notes: text_field(&body, "notes").map(str::to_string),
        medications,
    };

    let plan = diet::generate_plan(state.service.as_ref(), &profile)
        .await
        .map_err(ApiError::DietPlan)?;
    Ok(json!(plan))
}

#[derive(Debug, Deserialize)]
struct AgeQuery {
    age: Option<String>,
}

async fn age_images(Query(query): Query<AgeQuery>) -> Json<Value> {
    let age = query
        .age
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|a| a.is_finite())
        .unwrap_or(DEFAULT_BANNER_AGE)
        .clamp(0.0, 120.0);
    let band = AgeBand::from_age(age);
    Json(json!({
        "age": age_json(age),
        "band": band.to_string(),
        "image": banner_image(band.lower),
    }))
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

async fn proxy_image(State(state): State<AppState>, Query(query): Query<ProxyQuery>) -> Response {
    let url = query.url.as_deref().map(str::trim).unwrap_or_default();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return ApiError::BadRequest("Invalid url".to_string()).into_response_with(state.config.debug_responses);
    }

    match fetch_image(&state, url).await {
        Ok((content_type, bytes)) => (StatusCode::OK, [(CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(e) => e.into_response_with(state.config.debug_responses),
    }
}

async fn fetch_image(state: &AppState, url: &str) -> Result<(HeaderValue, Vec<u8>), ApiError> {
    let upstream = |e: reqwest::Error| ApiError::Upstream(e.to_string());
    let mut response = state
        .http
        .get(url)
        .timeout(PROXY_TIMEOUT)
        .send()
        .await
        .map_err(upstream)?;
    if !response.status().is_success() {
        return Err(ApiError::Upstream(format!("{url} returned {}", response.status())));
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("image/jpeg"));
    let too_large = || ApiError::Upstream(format!("{url} body exceeds {MAX_PROXY_BYTES} bytes"));
    if response.content_length().is_some_and(|len| len > MAX_PROXY_BYTES as u64) {
        return Err(too_large());
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(upstream)? {
        if !append_capped(&mut body, &chunk, MAX_PROXY_BYTES) {
            return Err(too_large());
        }
    }
    Ok((content_type, body))
}

/// Appends `chunk` unless that would take `body` past `limit`.
fn append_capped(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    if body.len() + chunk.len() > limit {
        return false;
    }
    body.extend_from_slice(chunk);
    true
}
