use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder, Result as WebResult};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::api::models::{ErrorBody, StreamAccepted, STREAM_ID_HEADER};
use crate::broadcast::Broadcaster;
use crate::llm::{models::CompletionRequest, CompletionUpstream};

// --- Push channel ---

#[get("/events")]
pub async fn sse_client(broadcaster: web::Data<Arc<Broadcaster>>) -> impl Responder {
    let mut rx = broadcaster.new_client();

    let stream = async_stream::stream! {
        while let Some(frame) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(frame);
        }
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}

#[get("/events/{msg}")]
pub async fn broadcast_msg(
    broadcaster: web::Data<Arc<Broadcaster>>,
    msg: web::Path<String>,
) -> impl Responder {
    let msg = msg.into_inner();
    broadcaster.broadcast_notice(&msg);
    info!("Broadcast notice sent: {}", msg);
    HttpResponse::Ok().body("msg sent")
}

// --- Completions ---

#[post("/chatcompletion")]
pub async fn chat_completion(
    req: HttpRequest,
    broadcaster: web::Data<Arc<Broadcaster>>,
    upstream: web::Data<Arc<dyn CompletionUpstream>>,
    body: web::Json<CompletionRequest>,
) -> WebResult<HttpResponse> {
    let mut request = body.into_inner();
    if request.messages.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorBody {
            error: "messages must not be empty".to_string(),
        }));
    }

    let stream_id = req
        .headers()
        .get(STREAM_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .unwrap_or_else(Uuid::new_v4);

    if request.model.is_empty() {
        request.model = upstream.default_model().to_string();
    }

    info!(
        "Starting stream {} ({} messages, model {}) via {}",
        stream_id,
        request.messages.len(),
        request.model,
        upstream.name()
    );

    let broadcaster = broadcaster.get_ref().clone();
    let upstream = upstream.get_ref().clone();
    tokio::spawn(relay_completion(stream_id, request, upstream, broadcaster));

    Ok(HttpResponse::Accepted().json(StreamAccepted { id: stream_id }))
}

/// Runs one upstream completion and rebroadcasts every chunk, tagged with
/// `stream_id`. Failures reach clients as an `error` frame, a clean finish
/// as an `end` frame.
pub async fn relay_completion(
    stream_id: Uuid,
    request: CompletionRequest,
    upstream: Arc<dyn CompletionUpstream>,
    broadcaster: Arc<Broadcaster>,
) {
    let (tx, mut rx) = mpsc::channel::<String>(100);

    // Spawn the upstream request so chunks can be forwarded while it runs
    let producer = tokio::spawn(async move { upstream.stream_completion(&request, tx).await });

    let mut chunks = 0usize;
    while let Some(text) = rx.recv().await {
        chunks += 1;
        broadcaster.broadcast_chunk(stream_id, &text);
    }

    let failure = match producer.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(format!("upstream task failed: {}", e)),
    };

    match failure {
        None => {
            info!("Stream {} relayed ({} chunks)", stream_id, chunks);
            broadcaster.broadcast_end(stream_id);
        }
        Some(detail) => {
            error!("Stream {} failed: {}", stream_id, detail);
            broadcaster.broadcast_error(stream_id, &detail);
        }
    }
}

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "healthy"}))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .service(sse_client)
        .service(broadcast_msg)
        .service(web::scope("/api").service(chat_completion));
}
