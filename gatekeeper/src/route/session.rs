use api::{
    request::PageQuery,
    response::{ActiveSession, Page},
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::error::AppError;
use crate::result::Result;
use crate::AppState;

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::ACTIVE_SESSIONS, get(active_sessions))
}

async fn active_sessions(
    State(state): State<AppState>,
    Query(qry): Query<PageQuery>,
) -> Result<Json<Page<ActiveSession>>> {
    let page_no = qry.page_no.unwrap_or(1).max(1);
    let page_size = qry
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let sessions = state
        .query
        .list_active_sessions()
        .await
        .map_err(AppError::store)?;

    let mut page = Page::new(page_no, page_size, sessions.len() as u64);
    if page.has_next_data() {
        page.data = sessions
            .into_iter()
            .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
            .take(page_size as usize)
            .collect();
    }
    Ok(Json(page))
}
