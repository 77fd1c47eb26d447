use crate::node::VeilbondNode;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use veilbond_relay::{EngagementKind, Receipt};
use veilbond_types::{
    AttestationId, BondAmount, BondError, BondId, ContextId, EvidenceHash, SenderCommitment,
    SenderNullifier,
};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: BondError) -> ApiError {
    let status = match &e {
        BondError::PolicyViolation { .. } | BondError::InvalidParameter(_) => {
            StatusCode::BAD_REQUEST
        }
        BondError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        BondError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        BondError::NotFound(_) => StatusCode::NOT_FOUND,
        BondError::InvalidTransition { .. } | BondError::AlreadyResolved(_) => {
            StatusCode::CONFLICT
        }
        BondError::BackingStoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BondError::SlashingFailed { .. } | BondError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

fn bad_request(msg: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
}

fn parse_hex32(value: &str, what: &str) -> Result<[u8; 32], ApiError> {
    let bytes = hex::decode(value).map_err(|_| bad_request(&format!("{} must be hex", what)))?;
    bytes
        .try_into()
        .map_err(|_| bad_request(&format!("{} must be 32 bytes", what)))
}

pub fn start_api_server(node: VeilbondNode, host: &str, port: u16) -> JoinHandle<()> {
    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/metrics", get(get_metrics))
        .route("/v1/bond", post(post_bond))
        .route("/v1/bond/:id", get(get_bond))
        .route("/v1/bond/:id/refund", post(refund_bond))
        .route("/v1/relay/forward", post(forward_message))
        .route("/v1/relay/engagement", post(handle_engagement))
        .route("/v1/attestation", post(file_attestation))
        .route("/v1/attestation/:id", get(get_attestation))
        .route("/v1/attestation/:id/dispute", post(dispute_attestation))
        .route("/v1/reputation/:commitment", get(get_reputation))
        .route("/v1/safety-pool/:context", get(get_safety_pool))
        .with_state(Arc::new(node));

    let addr = format!("{}:{}", host, port);
    info!("📡 Starting API server on {}", addr);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("failed to bind API server");
        axum::serve(listener, app).await.expect("API server failed");
    })
}

async fn health() -> &'static str {
    "OK"
}

async fn get_status(
    State(node): State<Arc<VeilbondNode>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = node.get_stats().await.map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "bonds": stats.bond_count,
        "unresolved_bonds": stats.unresolved_bond_count,
        "reputation_entries": stats.reputation_entries,
        "attestations": stats.attestation_count,
        "evidence_records": stats.evidence_count,
        "pending_slash_jobs": stats.pending_jobs,
        "replay_fingerprints": stats.fingerprint_entries,
    })))
}

async fn get_metrics(State(node): State<Arc<VeilbondNode>>) -> String {
    node.metrics.encode()
}

#[derive(Deserialize)]
struct PostBondRequest {
    context_id: String,
    sender_commitment: String,
    nullifier: String,
    amount_units: u64,
    ttl_secs: i64,
}

#[derive(Serialize)]
struct PostBondResponse {
    bond_id: String,
}

async fn post_bond(
    State(node): State<Arc<VeilbondNode>>,
    Json(req): Json<PostBondRequest>,
) -> Result<Json<PostBondResponse>, ApiError> {
    let context_id = ContextId::from_bytes(parse_hex32(&req.context_id, "context_id")?);
    let commitment =
        SenderCommitment::from_bytes(parse_hex32(&req.sender_commitment, "sender_commitment")?);
    let nullifier = SenderNullifier::from_bytes(parse_hex32(&req.nullifier, "nullifier")?);

    let bond_id = node
        .post_bond(
            &context_id,
            &commitment,
            nullifier,
            BondAmount::from_units(req.amount_units),
            req.ttl_secs,
        )
        .await
        .map_err(error_response)?;

    Ok(Json(PostBondResponse {
        bond_id: bond_id.to_hex(),
    }))
}

async fn get_bond(
    State(node): State<Arc<VeilbondNode>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let bond_id = BondId::from_hex(&id).map_err(|_| bad_request("bond id must be 32-byte hex"))?;
    let bond = node.get_bond(&bond_id).await.map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "bond_id": bond.id.to_hex(),
        "context_id": bond.context_id.to_hex(),
        "sender_commitment": bond.sender_commitment.to_hex(),
        "amount_units": bond.amount.to_units(),
        "state": bond.state.to_string(),
        "posted_at": bond.posted_at,
        "expires_at": bond.expires_at,
        "frozen_at": bond.frozen_at,
        "resolved_at": bond.resolved_at,
    })))
}

async fn refund_bond(
    State(node): State<Arc<VeilbondNode>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let bond_id = BondId::from_hex(&id).map_err(|_| bad_request("bond id must be 32-byte hex"))?;
    node.refund_bond(&bond_id).await.map_err(error_response)?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct ForwardRequest {
    context_id: String,
    sender_commitment: String,
    content: String,
    sent_at: i64,
    transport_signature_hex: String,
}

#[derive(Serialize)]
struct ForwardResponse {
    evidence_hash: String,
    sender_receipt: Receipt,
    recipient_receipt: Receipt,
}

async fn forward_message(
    State(node): State<Arc<VeilbondNode>>,
    Json(req): Json<ForwardRequest>,
) -> Result<Json<ForwardResponse>, ApiError> {
    let context_id = ContextId::from_bytes(parse_hex32(&req.context_id, "context_id")?);
    let commitment =
        SenderCommitment::from_bytes(parse_hex32(&req.sender_commitment, "sender_commitment")?);
    let transport_signature = hex::decode(&req.transport_signature_hex)
        .map_err(|_| bad_request("transport_signature_hex must be hex"))?;

    let result = node
        .verify_and_forward(
            &context_id,
            &commitment,
            veilbond_relay::InboundMessage {
                content: req.content.into_bytes(),
                sent_at: req.sent_at,
                transport_signature,
            },
        )
        .await
        .map_err(error_response)?;

    Ok(Json(ForwardResponse {
        evidence_hash: result.evidence_hash.to_hex(),
        sender_receipt: result.sender_receipt,
        recipient_receipt: result.recipient_receipt,
    }))
}

#[derive(Deserialize)]
struct EngagementRequest {
    context_id: String,
    sender_commitment: String,
    kind: EngagementKind,
}

#[derive(Serialize)]
struct EngagementResponse {
    refunded: bool,
}

async fn handle_engagement(
    State(node): State<Arc<VeilbondNode>>,
    Json(req): Json<EngagementRequest>,
) -> Result<Json<EngagementResponse>, ApiError> {
    let context_id = ContextId::from_bytes(parse_hex32(&req.context_id, "context_id")?);
    let commitment =
        SenderCommitment::from_bytes(parse_hex32(&req.sender_commitment, "sender_commitment")?);

    let refunded = node
        .handle_engagement(&context_id, &commitment, req.kind)
        .await
        .map_err(error_response)?;
    Ok(Json(EngagementResponse { refunded }))
}

#[derive(Deserialize)]
struct AttestationRequest {
    context_id: String,
    sender_commitment: String,
    evidence_hash: String,
    attestor: String,
}

#[derive(Serialize)]
struct AttestationResponse {
    attestation_id: String,
}

async fn file_attestation(
    State(node): State<Arc<VeilbondNode>>,
    Json(req): Json<AttestationRequest>,
) -> Result<Json<AttestationResponse>, ApiError> {
    let context_id = ContextId::from_bytes(parse_hex32(&req.context_id, "context_id")?);
    let commitment =
        SenderCommitment::from_bytes(parse_hex32(&req.sender_commitment, "sender_commitment")?);
    let evidence_hash =
        EvidenceHash::from_bytes(parse_hex32(&req.evidence_hash, "evidence_hash")?);

    let attestation_id = node
        .file_attestation(&context_id, &commitment, evidence_hash, &req.attestor)
        .await
        .map_err(error_response)?;

    Ok(Json(AttestationResponse {
        attestation_id: attestation_id.to_hex(),
    }))
}

async fn get_attestation(
    State(node): State<Arc<VeilbondNode>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let attestation_id = AttestationId::from_hex(&id)
        .map_err(|_| bad_request("attestation id must be 32-byte hex"))?;
    let record = node
        .get_attestation(&attestation_id)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "attestation_id": record.id.to_hex(),
        "bond_id": record.bond_id.to_hex(),
        "evidence_hash": record.evidence_hash.to_hex(),
        "attestor": record.attestor,
        "status": format!("{:?}", record.status),
        "created_at": record.created_at,
        "challenge_end": record.challenge_end,
    })))
}

#[derive(Deserialize)]
struct DisputeRequest {
    counter_evidence: String,
}

async fn dispute_attestation(
    State(node): State<Arc<VeilbondNode>>,
    Path(id): Path<String>,
    Json(req): Json<DisputeRequest>,
) -> Result<StatusCode, ApiError> {
    let attestation_id = AttestationId::from_hex(&id)
        .map_err(|_| bad_request("attestation id must be 32-byte hex"))?;
    let counter_evidence =
        EvidenceHash::from_bytes(parse_hex32(&req.counter_evidence, "counter_evidence")?);

    node.dispute_attestation(&attestation_id, counter_evidence)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::OK)
}

async fn get_reputation(
    State(node): State<Arc<VeilbondNode>>,
    Path(commitment): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let commitment =
        SenderCommitment::from_bytes(parse_hex32(&commitment, "sender_commitment")?);
    let rep = node.get_reputation(&commitment).await.map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "sender_commitment": rep.sender_commitment.to_hex(),
        "posted_count": rep.posted_count,
        "slashed_count": rep.slashed_count,
        "engaged_count": rep.engaged_count,
        "last_slash_at": rep.last_slash_at,
        "total_slashed_units": rep.total_slashed.to_units(),
    })))
}

async fn get_safety_pool(
    State(node): State<Arc<VeilbondNode>>,
    Path(context): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let context_id = ContextId::from_bytes(parse_hex32(&context, "context_id")?);
    let balance = node
        .safety_pool_balance(&context_id)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "context_id": context_id.to_hex(),
        "balance_units": balance.to_units(),
    })))
}
