//! HTTP endpoints over a [`Storage`].
//!
//! | Method   | Path     | Response                                      |
//! |----------|----------|-----------------------------------------------|
//! | `GET`    | `/{*id}` | the object, `206` when a `Range` is honoured  |
//! | `POST`   | `/`      | `201` with `{id}` per stored file             |
//! | `DELETE` | `/{*id}` | `200` with `{id}`                             |
//!
//! Every endpoint takes an optional `?bucket=` query parameter.
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::{incoming::IncomingStreams, response::send_stream, upload};
use crate::{
    config::UploadConfig,
    errors::translate,
    storage::{OneOrMany, Params, Storage},
    Error, Result,
};

#[derive(Clone)]
struct RouteState {
    storage: Arc<Storage>,
    upload: Arc<UploadConfig>,
    incoming: IncomingStreams,
}

#[derive(Debug, Default, Deserialize)]
struct BucketQuery {
    bucket: Option<String>,
}

impl BucketQuery {
    fn params(self) -> Params {
        Params {
            bucket: self.bucket,
            ..Params::default()
        }
    }
}

/// The storage router. Request body size is bounded by the upload limits,
/// not by axum's default body limit.
pub fn routes(storage: Arc<Storage>, upload: UploadConfig) -> Router {
    let state = RouteState {
        storage,
        incoming: IncomingStreams::from_config(&upload),
        upload: Arc::new(upload),
    };
    Router::new()
        .route("/", post(create))
        .route("/{*id}", get(download).delete(remove))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn download(
    State(state): State<RouteState>,
    Path(id): Path<String>,
    Query(query): Query<BucketQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let mut params = query.params();
    params.range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    let file = state.storage.get(&id, &params).await?;
    Ok(send_stream(file))
}

async fn create(
    State(state): State<RouteState>,
    method: Method,
    Query(query): Query<BucketQuery>,
    multipart: Multipart,
) -> Result<Response> {
    let uploads = upload::materialize(multipart, &state.upload)
        .await
        .map_err(translate)?;

    let items = match state.incoming.adapt(&method, &uploads).await {
        Ok(Some(items)) => items,
        Ok(None) => {
            uploads.discard().await;
            return Err(Error::Validation(format!(
                "expected files in field `{}`",
                state.upload.field
            )));
        }
        Err(err) => {
            uploads.discard().await;
            return Err(err);
        }
    };

    // storage only unlinks temp files when its unpipe options name `path`
    let created = state.storage.create(items, &query.params()).await;
    uploads.discard().await;
    Ok((StatusCode::CREATED, Json(created?)).into_response())
}

async fn remove(
    State(state): State<RouteState>,
    Path(id): Path<String>,
    Query(query): Query<BucketQuery>,
) -> Result<Response> {
    let removed = state
        .storage
        .remove(OneOrMany::One(id), &query.params())
        .await?;
    Ok(Json(removed).into_response())
}
