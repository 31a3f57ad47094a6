use crate::state::RegistrarState;
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::time::Duration};

pub mod index;
pub mod students;

pub fn build_router(state: RegistrarState) -> Router {
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(Duration::days(1)));

    Router::new()
        .route("/", get(index::get_index_route))
        .route("/students", get(students::get_students))
        .route(
            "/students/details/{id}",
            get(students::get_student_details),
        )
        .route(
            "/students/create",
            get(students::get_create_student).post(students::post_create_student),
        )
        .route(
            "/students/edit/{id}",
            get(students::get_edit_student).post(students::post_edit_student),
        )
        .route(
            "/students/delete/{id}",
            get(students::get_delete_student).post(students::post_delete_student),
        )
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
