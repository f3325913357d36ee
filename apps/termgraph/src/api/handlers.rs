//! # API Endpoint Handlers
//!
//! Read-only handlers over the shared session.

use super::{
    AppState,
    types::{
        ConceptResponse, ConceptSetResponse, EclRequest, EclResponse, ErrorResponse,
        HealthResponse, HierarchyQuery, IntegrityResponse, StatusResponse,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use termgraph_core::{CharacteristicType, ConceptId, ConceptSet, GraphError};

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// A `GraphError` rendered as a JSON error body.
#[derive(Debug)]
pub struct ApiError(pub GraphError);

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        Self(e)
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            GraphError::NotFound(_) => StatusCode::NOT_FOUND,
            GraphError::InactiveConcept(_) => StatusCode::CONFLICT,
            GraphError::Config(_) | GraphError::Structural { .. } => StatusCode::BAD_REQUEST,
            GraphError::Remote(_) | GraphError::DuplicateResult { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<T>), ApiError>;

fn ids(set: &ConceptSet) -> Vec<u64> {
    set.iter().map(|c| c.0).collect()
}

// =============================================================================
// HEALTH AND STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Graph counters and readiness.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let store = session.store();
    let response = StatusResponse {
        ready: session.is_ready(),
        concepts: store.concept_count(),
        active_concepts: store.active_concept_count(),
        descriptions: store.description_count(),
        relationships: store.relationship_count(),
        cached_expressions: session.ecl_cache().len(),
        warnings: store.warnings().len(),
    };
    (StatusCode::OK, Json(response))
}

// =============================================================================
// CONCEPT HANDLERS
// =============================================================================

/// One concept with its parents in both views.
pub async fn concept_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<ConceptResponse> {
    let session = state.session.read().await;
    let store = session.store();
    let concept = store
        .concept(ConceptId(id))
        .ok_or(GraphError::NotFound(ConceptId(id)))?;
    Ok((StatusCode::OK, Json(ConceptResponse::from_concept(store, concept))))
}

/// Proper ancestors of a concept.
pub async fn ancestors_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<HierarchyQuery>,
) -> ApiResult<ConceptSetResponse> {
    let session = state.session.read().await;
    let set = session.ancestors(ConceptId(id), CharacteristicType::from(query.form))?;
    Ok((
        StatusCode::OK,
        Json(ConceptSetResponse {
            concept: id,
            form: query.form,
            count: set.len(),
            ids: ids(&set),
        }),
    ))
}

/// Descendants of a concept, optionally including itself.
pub async fn descendants_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<HierarchyQuery>,
) -> ApiResult<ConceptSetResponse> {
    let session = state.session.read().await;
    let view = CharacteristicType::from(query.form);
    let set = if query.include_self {
        session.descendants_or_self(ConceptId(id), view)?
    } else {
        session.descendants(ConceptId(id), view)?
    };
    Ok((
        StatusCode::OK,
        Json(ConceptSetResponse {
            concept: id,
            form: query.form,
            count: set.len(),
            ids: ids(&set),
        }),
    ))
}

// =============================================================================
// EXPRESSION HANDLER
// =============================================================================

/// Resolve an expression.
///
/// Complex expressions go to the authoring service through a blocking
/// client, so resolution runs on the blocking pool.
pub async fn ecl_handler(
    State(state): State<AppState>,
    Json(request): Json<EclRequest>,
) -> ApiResult<EclResponse> {
    request.validate()?;
    let session = state.session.clone();
    let (branch, expression) = (request.branch.clone(), request.expression.clone());
    let set = tokio::task::spawn_blocking(move || {
        let session = session.blocking_read();
        session.resolve_ecl(&branch, &expression)
    })
    .await
    .map_err(|e| GraphError::Io(format!("resolver task failed: {}", e)))??;

    Ok((
        StatusCode::OK,
        Json(EclResponse {
            count: set.len(),
            ids: ids(&set),
            expression: request.expression,
            branch: request.branch,
        }),
    ))
}

// =============================================================================
// INTEGRITY HANDLER
// =============================================================================

/// Re-run the integrity checks over the loaded graph.
pub async fn integrity_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let report = session.check_integrity(&state.integrity);
    let status = if report.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(IntegrityResponse::from(&report)))
}

// =============================================================================
// TESTS
// =============================================================================
