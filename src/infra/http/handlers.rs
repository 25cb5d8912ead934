use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use page_manager_api_types::{ArchivePageQuery, PublishedPageResponse};
use uuid::Uuid;

use crate::application::error::ErrorReport;
use crate::application::pages::ArchivePageCommand;
use crate::domain::entities::PublishedPageView;

use super::HttpState;
use super::error::ApiError;

pub async fn archive_page(
    State(state): State<HttpState>,
    Path((site_id, slug)): Path<(String, String)>,
    query: Result<Query<ArchivePageQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let site_id = parse_site_id(&site_id)?;
    let Query(query) = query.map_err(|rejection| {
        ApiError::bad_request("Invalid query string", Some(rejection.body_text()))
    })?;

    let command = ArchivePageCommand {
        site_id,
        slug,
        publish_draft: query.publish_draft,
    };

    state.archive.execute(command).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_published_page(
    State(state): State<HttpState>,
    Path((site_id, slug)): Path<(String, String)>,
) -> Result<Json<PublishedPageResponse>, ApiError> {
    let site_id = parse_site_id(&site_id)?;

    match state.published.get_published(site_id, &slug).await {
        Some(view) => Ok(Json(to_response(view))),
        None => Err(ApiError::not_found("Published page not found")),
    }
}

pub async fn health(State(state): State<HttpState>) -> Response {
    match state.health.ping().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

fn parse_site_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|err| {
        ApiError::bad_request("siteId must be a UUID", Some(err.to_string()))
    })
}

fn to_response(view: PublishedPageView) -> PublishedPageResponse {
    PublishedPageResponse {
        page_id: view.page_id,
        draft_id: view.draft_id,
        published_utc: view.published_at,
    }
}
