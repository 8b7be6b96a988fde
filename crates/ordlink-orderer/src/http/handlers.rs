use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use axum::Json;
use futures_util::{stream, Stream, StreamExt};
use ordlink_core::{
    serialize, tls_cert_hash, verify, Block, DeliverResponse, DeliverStatus, Hash, PublicKey,
    SeekBehavior, SeekContent, SeekEnvelope, SeekPayload, SeekPosition, Sig, CLIENT_CERT_HEADER,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::OrdererError;
use crate::ledger::BlockLedger;

/// Application state shared with handlers
pub struct AppState {
    pub channel_id: String,
    pub ledger: Arc<BlockLedger>,
    /// While set, full-block streams stall; header streams keep flowing
    pub withholding: watch::Sender<bool>,
    /// Seeks must carry the hash of the client certificate presented with them
    pub require_tls_binding: bool,
    /// Ends every open deliver stream
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub channel_id: String,
    pub height: u64,
    pub head_block_hash: Option<String>,
    pub withholding: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WithholdRequest {
    pub withholding: bool,
}

/// GET /status - Ledger height and service mode
pub async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, OrdererError> {
    let head_block_hash = state.ledger.head_hash().await?.map(|h| h.to_hex());

    Ok(Json(StatusResponse {
        channel_id: state.channel_id.clone(),
        height: state.ledger.height().await,
        head_block_hash,
        withholding: *state.withholding.borrow(),
    }))
}

/// POST /admin/withhold - Toggle full-block withholding
pub async fn set_withholding(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WithholdRequest>,
) -> Json<StatusResponse> {
    state.withholding.send_replace(request.withholding);
    warn!(
        "Full-block delivery on {} is now {}",
        state.channel_id,
        if request.withholding { "withheld" } else { "served" }
    );

    Json(StatusResponse {
        channel_id: state.channel_id.clone(),
        height: state.ledger.height().await,
        head_block_hash: None,
        withholding: request.withholding,
    })
}

/// POST /deliver - Stream blocks or headers as newline-delimited JSON
pub async fn deliver(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(envelope): Json<SeekEnvelope>,
) -> Response {
    let payload = match authenticate(&envelope) {
        Ok(payload) => payload,
        Err(status) => return ndjson(status_only(status)),
    };

    if state.require_tls_binding {
        if let Err(status) = check_binding(&payload, presented_cert_hash(&headers)) {
            return ndjson(status_only(status));
        }
    }

    if payload.channel_id != state.channel_id {
        debug!("Seek for unknown channel {}", payload.channel_id);
        return ndjson(status_only(DeliverStatus::NotFound));
    }

    let height = state.ledger.height().await;
    let start = resolve(payload.seek.start, height);
    let stop = resolve(payload.seek.stop, height);
    if stop < start {
        return ndjson(status_only(DeliverStatus::BadRequest));
    }
    if payload.seek.behavior == SeekBehavior::FailIfNotReady && start >= height {
        return ndjson(status_only(DeliverStatus::NotFound));
    }

    info!(
        "Delivering {:?} on {} from block {} to {}",
        payload.seek.content,
        payload.channel_id,
        start,
        if stop == u64::MAX { "newest".to_string() } else { stop.to_string() }
    );

    ndjson(block_stream(state, start, stop, payload.seek.content))
}

/// Open the envelope and check the creator's signature over the payload
fn authenticate(envelope: &SeekEnvelope) -> Result<SeekPayload, DeliverStatus> {
    let payload = envelope.open().map_err(|_| DeliverStatus::BadRequest)?;
    let creator = PublicKey::from_slice(&payload.creator).ok_or(DeliverStatus::Forbidden)?;
    let signature = Sig::from_slice(&envelope.signature).ok_or(DeliverStatus::Forbidden)?;

    if verify(&creator, &envelope.payload, &signature).is_err() {
        warn!("Rejected seek with a bad signature from {}", creator);
        return Err(DeliverStatus::Forbidden);
    }
    Ok(payload)
}

/// Hash of the client certificate presented with the request, if any
fn presented_cert_hash(headers: &HeaderMap) -> Option<Hash> {
    let value = headers.get(CLIENT_CERT_HEADER)?.to_str().ok()?;
    let pem = hex::decode(value).ok()?;
    Some(tls_cert_hash(&pem))
}

/// The seek must be bound to the certificate it arrived with, so a captured
/// request can not be replayed from another connection
fn check_binding(payload: &SeekPayload, presented: Option<Hash>) -> Result<(), DeliverStatus> {
    let Some(presented) = presented else {
        warn!("Rejected seek on {}: no client certificate presented", payload.channel_id);
        return Err(DeliverStatus::Forbidden);
    };
    if payload.tls_cert_hash != Some(presented) {
        warn!(
            "Rejected seek on {}: bound to {:?}, presented {}",
            payload.channel_id, payload.tls_cert_hash, presented
        );
        return Err(DeliverStatus::Forbidden);
    }
    Ok(())
}

fn resolve(position: SeekPosition, height: u64) -> u64 {
    match position {
        SeekPosition::Oldest => 0,
        SeekPosition::Newest => height.saturating_sub(1),
        SeekPosition::Specified(number) => number,
    }
}

fn status_only(status: DeliverStatus) -> impl Stream<Item = DeliverResponse> + Send + 'static {
    stream::once(async move { DeliverResponse::Status(status) })
}

fn ndjson<S>(messages: S) -> Response
where
    S: Stream<Item = DeliverResponse> + Send + 'static,
{
    let lines = messages.map(|message| match serialize::to_json_line(&message) {
        Ok(line) => Ok::<_, Infallible>(line),
        Err(e) => {
            warn!("Dropping unencodable deliver message: {}", e);
            Ok(Vec::new())
        }
    });

    let mut response = Response::new(Body::from_stream(lines));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    response
}

struct Cursor {
    state: Arc<AppState>,
    heights: broadcast::Receiver<u64>,
    withholding: watch::Receiver<bool>,
    next: u64,
    stop: u64,
    content: SeekContent,
    finished: bool,
}

/// Replay from `start`, then follow the ledger until `stop`
fn block_stream(
    state: Arc<AppState>,
    start: u64,
    stop: u64,
    content: SeekContent,
) -> impl Stream<Item = DeliverResponse> + Send + 'static {
    let cursor = Cursor {
        heights: state.ledger.subscribe(),
        withholding: state.withholding.subscribe(),
        state,
        next: start,
        stop,
        content,
        finished: false,
    };

    stream::unfold(cursor, |mut cursor| async move {
        if cursor.finished {
            return None;
        }
        if cursor.next > cursor.stop {
            cursor.finished = true;
            return Some((DeliverResponse::Status(DeliverStatus::Success), cursor));
        }

        loop {
            let withheld =
                cursor.content == SeekContent::Block && *cursor.withholding.borrow_and_update();

            if !withheld {
                if let Some(block) = cursor.state.ledger.get(cursor.next).await {
                    let message = shape(block, cursor.content);
                    cursor.next += 1;
                    return Some((DeliverResponse::Block(message), cursor));
                }
            }

            tokio::select! {
                _ = cursor.state.shutdown.cancelled() => return None,
                changed = cursor.withholding.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                height = cursor.heights.recv() => match height {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    })
}

fn shape(block: Block, content: SeekContent) -> Block {
    match content {
        SeekContent::Block => block,
        SeekContent::HeaderWithSig => block.header_only(),
    }
}
