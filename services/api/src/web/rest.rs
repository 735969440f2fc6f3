//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the gallery's REST endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::{ApiError, ErrorBody};
use crate::web::auth::{
    self, AuthStatusResponse, SendCodeRequest, SendCodeResponse, StatusResponse, VerifyRequest,
    VerifyResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use gallery_core::{ChatRef, PhotoSize, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{IntoParams, Modify, OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::send_code_handler,
        auth::verify_handler,
        auth::auth_status_handler,
        auth::logout_handler,
        list_photos_handler,
        full_photo_handler,
        thumb_photo_handler,
        delete_photo_handler,
        upload_handler,
        create_group_handler,
        my_groups_handler,
        delete_group_handler,
    ),
    components(
        schemas(
            ErrorBody,
            SendCodeRequest,
            SendCodeResponse,
            VerifyRequest,
            VerifyResponse,
            AuthStatusResponse,
            StatusResponse,
            PhotoItem,
            PhotosResponse,
            CreateGroupRequest,
            CreateGroupResponse,
            GroupItem,
            GroupsResponse,
        )
    ),
    modifiers(&BearerSecurity),
    tags(
        (name = "Telegram Web Gallery API", description = "Browse, upload, and organize Telegram photos.")
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` security scheme referenced by protected paths.
struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

//=========================================================================================
// API Query, Payload, and Response Structs
//=========================================================================================

fn default_photo_limit() -> usize {
    50
}

fn default_group_limit() -> usize {
    15
}

/// Identifies the chat a photo request targets: a numeric id or a username.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChatQuery {
    pub chat: String,
}

impl ChatQuery {
    fn chat_ref(&self) -> Result<ChatRef, ApiError> {
        parse_chat(&self.chat)
    }
}

fn parse_chat(raw: &str) -> Result<ChatRef, ApiError> {
    ChatRef::parse(raw)
        .ok_or_else(|| ApiError::BadRequest("The chat parameter is required.".to_string()))
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PhotosQuery {
    pub chat: String,
    #[serde(default = "default_photo_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl PhotosQuery {
    fn chat_ref(&self) -> Result<ChatRef, ApiError> {
        parse_chat(&self.chat)
    }
}

#[derive(Serialize, ToSchema)]
pub struct PhotoItem {
    pub id: i32,
    pub thumb_url: String,
}

#[derive(Serialize, ToSchema)]
pub struct PhotosResponse {
    pub photos: Vec<PhotoItem>,
    pub has_more: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub title: String,
}

#[derive(Serialize, ToSchema)]
pub struct CreateGroupResponse {
    pub status: String,
    pub group_id: i64,
    pub group_title: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MyGroupsQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_group_limit")]
    pub limit: usize,
    /// Only build the cache; respond with 204 and no page.
    #[serde(default)]
    pub populate_cache_only: bool,
}

#[derive(Serialize, ToSchema)]
pub struct GroupItem {
    pub id: i64,
    pub title: String,
}

#[derive(Serialize, ToSchema)]
pub struct GroupsResponse {
    pub groups: Vec<GroupItem>,
    pub has_more: bool,
}

//=========================================================================================
// Photo Handlers
//=========================================================================================

/// List photo messages in a chat, newest first.
#[utoipa::path(
    get,
    path = "/api/photos",
    params(PhotosQuery),
    responses(
        (status = 200, description = "One page of photos", body = PhotosResponse),
        (status = 400, description = "Missing chat or bad limit", body = ErrorBody),
        (status = 401, description = "Not logged in", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn list_photos_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    Query(query): Query<PhotosQuery>,
) -> Result<Json<PhotosResponse>, ApiError> {
    let chat = query.chat_ref()?;
    let page = state
        .gallery
        .list_photos(user_id, &chat, query.offset, query.limit)
        .await?;

    let photos = page
        .photos
        .into_iter()
        .map(|p| PhotoItem {
            id: p.id,
            thumb_url: format!("/api/photos/{}/thumb?chat={}", p.id, chat),
        })
        .collect();
    Ok(Json(PhotosResponse {
        photos,
        has_more: page.has_more,
    }))
}

async fn photo_response(
    state: &AppState,
    user_id: UserId,
    message_id: i32,
    query: &ChatQuery,
    size: PhotoSize,
) -> Result<Response, ApiError> {
    let chat = query.chat_ref()?;
    let bytes = state.gallery.photo(user_id, &chat, message_id, size).await?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response())
}

/// Stream the full-resolution image of a photo message.
#[utoipa::path(
    get,
    path = "/api/photos/{id}/full",
    params(("id" = i32, Path, description = "Message id"), ChatQuery),
    responses(
        (status = 200, description = "JPEG bytes"),
        (status = 404, description = "Message is not a photo", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn full_photo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    Path(message_id): Path<i32>,
    Query(query): Query<ChatQuery>,
) -> Result<Response, ApiError> {
    photo_response(&state, user_id, message_id, &query, PhotoSize::Full).await
}

/// Stream the thumbnail of a photo message.
#[utoipa::path(
    get,
    path = "/api/photos/{id}/thumb",
    params(("id" = i32, Path, description = "Message id"), ChatQuery),
    responses(
        (status = 200, description = "JPEG bytes"),
        (status = 404, description = "Message is not a photo", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn thumb_photo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    Path(message_id): Path<i32>,
    Query(query): Query<ChatQuery>,
) -> Result<Response, ApiError> {
    photo_response(&state, user_id, message_id, &query, PhotoSize::Thumbnail).await
}

/// Delete a photo message.
#[utoipa::path(
    delete,
    path = "/api/photos/{id}",
    params(("id" = i32, Path, description = "Message id"), ChatQuery),
    responses(
        (status = 200, description = "Photo deleted", body = StatusResponse),
        (status = 404, description = "Message is not a photo", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn delete_photo_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    Path(message_id): Path<i32>,
    Query(query): Query<ChatQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let chat = query.chat_ref()?;
    state.gallery.delete_photo(user_id, &chat, message_id).await?;
    Ok(Json(StatusResponse {
        status: "success".to_string(),
        message: format!("Photo {} deleted.", message_id),
    }))
}

/// Upload a photo to a chat.
///
/// Accepts a multipart/form-data request with a single file part. The file is
/// written to a scratch file in the uploads directory, which is removed once
/// the request finishes, whatever the outcome.
#[utoipa::path(
    post,
    path = "/api/upload",
    params(ChatQuery),
    request_body(content_type = "multipart/form-data", description = "The image to upload."),
    responses(
        (status = 200, description = "Photo forwarded to the chat", body = StatusResponse),
        (status = 400, description = "Missing chat or file", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    Query(query): Query<ChatQuery>,
    mut multipart: Multipart,
) -> Result<Json<StatusResponse>, ApiError> {
    let chat = query.chat_ref()?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart data: {}", e)))?
        .ok_or_else(|| ApiError::BadRequest("Multipart form must include a file".to_string()))?;
    let file_name = field.file_name().unwrap_or("upload.jpg").to_string();
    let data = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read file bytes: {}", e)))?;

    tokio::fs::create_dir_all(&state.config.uploads_dir).await?;
    let suffix = std::path::Path::new(&file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| ".jpg".to_string());
    // Removed from disk when `scratch` drops.
    let scratch = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(&state.config.uploads_dir)?;
    tokio::fs::write(scratch.path(), &data).await?;

    state
        .gallery
        .upload_photo(user_id, &chat, scratch.path())
        .await?;

    info!(%user_id, file = %file_name, bytes = data.len(), "Photo uploaded");
    Ok(Json(StatusResponse {
        status: "success".to_string(),
        message: format!("Successfully uploaded {}.", file_name),
    }))
}

//=========================================================================================
// Group Handlers
//=========================================================================================

/// Create a new album supergroup marked as made by this app.
#[utoipa::path(
    post,
    path = "/api/groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created", body = CreateGroupResponse),
        (status = 400, description = "Missing title", body = ErrorBody),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn create_group_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = state.gallery.create_group(user_id, &req.title).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateGroupResponse {
            status: "success".to_string(),
            group_id: group.id,
            group_title: group.title,
        }),
    ))
}

/// List the albums this app created, from the per-user cache.
#[utoipa::path(
    get,
    path = "/api/my-groups",
    params(MyGroupsQuery),
    responses(
        (status = 200, description = "One page of albums", body = GroupsResponse),
        (status = 204, description = "Cache populated, no page requested"),
        (status = 401, description = "Not logged in", body = ErrorBody),
        (status = 500, description = "Scan failed", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn my_groups_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    Query(query): Query<MyGroupsQuery>,
) -> Result<Response, ApiError> {
    if query.populate_cache_only {
        state.gallery.warm_groups(user_id).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let page = state
        .gallery
        .my_groups(user_id, query.offset, query.limit)
        .await?;
    let groups = page
        .groups
        .into_iter()
        .map(|g| GroupItem {
            id: g.id,
            title: g.title,
        })
        .collect();
    Ok(Json(GroupsResponse {
        groups,
        has_more: page.has_more,
    })
    .into_response())
}

/// Delete an album and drop it from the cache.
#[utoipa::path(
    delete,
    path = "/api/groups/{id}",
    params(("id" = i64, Path, description = "Group id")),
    responses(
        (status = 200, description = "Group deleted", body = StatusResponse),
        (status = 500, description = "Internal server error", body = ErrorBody)
    ),
    security(("bearer" = []))
)]
pub async fn delete_group_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<UserId>,
    Path(group_id): Path<i64>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.gallery.delete_group(user_id, group_id).await?;
    Ok(Json(StatusResponse {
        status: "success".to_string(),
        message: format!("Group {} has been deleted.", group_id),
    }))
}
