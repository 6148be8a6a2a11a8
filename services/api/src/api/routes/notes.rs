//! Trip notes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;
use withme_id::{NoteId, TripId, UserId};
use withme_model::ResourceId;

use super::{data, Deleted};
use crate::api::authz;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::api::validation;
use crate::db::{NewNote, NotePatch};
use crate::policy::Action;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notes).post(create_note))
        .route("/{note_id}", put(update_note).delete(delete_note))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateNoteRequest {
    #[validate(length(min = 1, max = 200, message = "must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 20000, message = "must be at most 20000 characters"))]
    pub content: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateNoteRequest {
    #[validate(length(min = 1, max = 200, message = "must be 1-200 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 20000, message = "must be at most 20000 characters"))]
    pub content: Option<String>,
}

fn note_not_found(request_id: &str) -> ApiError {
    ApiError::not_found("note_not_found", "Note not found").with_request_id(request_id)
}

/// Editors and admins may edit any note. Anyone else may only touch a note
/// they last updated, and only while they are still an active member.
async fn require_note_editor(
    state: &AppState,
    ctx: &RequestContext,
    trip: TripId,
    note: NoteId,
    user: UserId,
) -> Result<(), ApiError> {
    let resource = ResourceId::Trip(trip);
    if authz::allows(state, ctx, resource, user, Action::EditNote).await? {
        return Ok(());
    }
    if !authz::is_member(state, ctx, resource, user).await? {
        return Err(authz::forbidden(Action::EditNote, &ctx.request_id));
    }

    let current = state
        .store()
        .note(trip, note)
        .await
        .map_err(|e| ApiError::from_db(e, &ctx.request_id, "Failed to load note"))?
        .ok_or_else(|| note_not_found(&ctx.request_id))?;

    if current.updated_by != Some(user) {
        return Err(authz::forbidden(Action::EditNote, &ctx.request_id));
    }
    Ok(())
}

async fn list_notes(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((trip_id,)): Path<(String,)>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = &ctx.request_id;
    let trip_id: TripId = validation::parse_id(&trip_id, "trip", request_id)?;
    authz::require(&state, &ctx, trip_id.into(), Action::ListNotes).await?;

    let notes = state
        .store()
        .list_notes(trip_id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id, "Failed to list notes"))?;

    Ok(data(notes))
}

async fn create_note(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((trip_id,)): Path<(String,)>,
    body: Result<Json<CreateNoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let trip_id: TripId = validation::parse_id(&trip_id, "trip", &request_id)?;
    let author = authz::require(&state, &ctx, trip_id.into(), Action::CreateNote).await?;

    let req = validation::body(body, &request_id)?;
    validation::validate(&req, &request_id)?;

    let note = state
        .store()
        .create_note(
            trip_id,
            NewNote {
                title: req.title,
                content: req.content,
            },
            author,
        )
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to create note"))?;

    info!(
        request_id = %request_id,
        trip_id = %trip_id,
        note_id = %note.id,
        position = note.position,
        "Note created"
    );
    Ok((StatusCode::CREATED, data(note)))
}

async fn update_note(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((trip_id, note_id)): Path<(String, String)>,
    body: Result<Json<UpdateNoteRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = ctx.require_user()?;
    let request_id = ctx.request_id.clone();
    let trip_id: TripId = validation::parse_id(&trip_id, "trip", &request_id)?;
    let note_id: NoteId = validation::parse_id(&note_id, "note", &request_id)?;
    require_note_editor(&state, &ctx, trip_id, note_id, user).await?;

    let req = validation::body(body, &request_id)?;
    validation::validate(&req, &request_id)?;

    let note = state
        .store()
        .update_note(
            trip_id,
            note_id,
            NotePatch {
                title: req.title,
                content: req.content,
            },
            user,
        )
        .await
        .map_err(|e| ApiError::from_db(e, &request_id, "Failed to update note"))?;

    Ok(data(note))
}

async fn delete_note(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((trip_id, note_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    ctx.require_user()?;
    let request_id = &ctx.request_id;
    let trip_id: TripId = validation::parse_id(&trip_id, "trip", request_id)?;
    let note_id: NoteId = validation::parse_id(&note_id, "note", request_id)?;
    let user = authz::require(&state, &ctx, trip_id.into(), Action::DeleteNote).await?;

    state
        .store()
        .delete_note(trip_id, note_id)
        .await
        .map_err(|e| ApiError::from_db(e, request_id, "Failed to delete note"))?;

    info!(
        request_id = %request_id,
        trip_id = %trip_id,
        note_id = %note_id,
        user_id = %user,
        "Note deleted"
    );
    Ok(data(Deleted { deleted: true }))
}
