//! `/api` routes.

mod access_requests;
mod groups;
mod guest;
mod members;
mod notes;
mod trips;

use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/trips", trips::routes())
        .nest("/groups", groups::routes())
        .nest("/guest", guest::routes())
}

/// Success envelope: `{"data": ...}`.
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

pub fn data<T: Serialize>(data: T) -> Json<Data<T>> {
    Json(Data { data })
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub deleted: bool,
}
