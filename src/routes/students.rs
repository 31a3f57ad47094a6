use crate::{
    csrf,
    data::{
        DataType,
        student::{FieldError, NewStudent, Student, StudentDetails, StudentForm, field_message},
    },
    error::{MissingStudentSnafu, RegistrarResult},
    maud_conveniences::{
        error_banner, form_submit_button, render_table, simple_form_element, subtitle, title,
    },
    state::RegistrarState,
};
use axum::{
    Form,
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
};
use maud::{Markup, Render, html};
use serde::Deserialize;
use snafu::OptionExt;
use tower_sessions::Session;

/// Shown whenever a store write fails. The real error only goes to the logs.
const GENERIC_SAVE_ERROR: &str =
    "Unable to save changes. Try again, and if the problem persists contact your system administrator.";

pub async fn get_students(State(state): State<RegistrarState>) -> RegistrarResult<Markup> {
    let students = Student::get_all(&state).await?;

    let rows = students
        .iter()
        .map(|student| {
            [
                html! {
                    a href={"/students/details/" (student.id)} class="text-blue-400 underline" {(student.render())}
                },
                html! {(student.email)},
                html! {(student.year_rank)},
                html! {(student.average_grade)},
                html! {(student.enrollment_date_iso())},
                html! {
                    span class="space-x-2" {
                        a href={"/students/edit/" (student.id)} class="text-blue-400 underline" {"Edit"}
                        a href={"/students/delete/" (student.id)} class="text-red-400 underline" {"Delete"}
                    }
                },
            ]
        })
        .collect();

    Ok(state.render(html! {
        div class="container mx-auto flex flex-col space-y-4 max-w-4xl" {
            (render_table("Students", ["Name", "Email", "Year", "Average Grade", "Enrolled", "Actions"], rows))
            a href="/students/create" class="text-blue-400 underline" {"Add a new student"}
        }
    }))
}

pub async fn get_student_details(
    State(state): State<RegistrarState>,
    Path(id): Path<i64>,
) -> RegistrarResult<Markup> {
    let mut conn = state.get_connection().await?;
    let details = Student::get_details(id, &mut conn)
        .await?
        .context(MissingStudentSnafu { id })?;

    Ok(state.render(student_card(
        &details,
        html! {
            div class="space-x-4" {
                a href={"/students/edit/" (id)} class="text-blue-400 underline" {"Edit"}
                a href="/students" class="text-blue-400 underline" {"Back to list"}
            }
        },
    )))
}

pub async fn get_create_student(
    State(state): State<RegistrarState>,
    session: Session,
) -> RegistrarResult<Markup> {
    let csrf_token = csrf::issue(&session).await?;

    Ok(state.render(student_form(
        "/students/create",
        "Create Student",
        &StudentForm::default(),
        &[],
        false,
        &csrf_token,
    )))
}

pub async fn post_create_student(
    State(state): State<RegistrarState>,
    session: Session,
    Form(form): Form<StudentForm>,
) -> RegistrarResult<Response> {
    csrf::verify(&session, &form.csrf_token).await?;

    let new_student = match form.validate() {
        Ok(new_student) => new_student,
        Err(errors) => {
            return Ok(state
                .render(student_form(
                    "/students/create",
                    "Create Student",
                    &form,
                    &errors,
                    false,
                    &form.csrf_token,
                ))
                .into_response());
        }
    };

    match try_insert(&state, new_student).await {
        Ok(id) => {
            info!(id, "Created student");
            Ok(Redirect::to("/students").into_response())
        }
        Err(e) if e.is_storage_failure() => {
            error!(?e, "Failed to save new student");
            Ok(state
                .render(student_form(
                    "/students/create",
                    "Create Student",
                    &form,
                    &[],
                    true,
                    &form.csrf_token,
                ))
                .into_response())
        }
        Err(e) => Err(e),
    }
}

pub async fn get_edit_student(
    State(state): State<RegistrarState>,
    session: Session,
    Path(id): Path<i64>,
) -> RegistrarResult<Markup> {
    let csrf_token = csrf::issue(&session).await?;
    let mut conn = state.get_connection().await?;
    let student = Student::get_from_db_by_id(id, &mut conn)
        .await?
        .context(MissingStudentSnafu { id })?;

    Ok(state.render(student_form(
        &format!("/students/edit/{id}"),
        "Edit Student",
        &StudentForm::from_student(&student),
        &[],
        false,
        &csrf_token,
    )))
}

pub async fn post_edit_student(
    State(state): State<RegistrarState>,
    session: Session,
    Path(id): Path<i64>,
    Form(form): Form<StudentForm>,
) -> RegistrarResult<Response> {
    csrf::verify(&session, &form.csrf_token).await?;

    //always start from a fresh copy of the row, never a client-submitted entity
    let mut student = Student::get_from_db_by_id(id, &mut *state.get_connection().await?)
        .await?
        .context(MissingStudentSnafu { id })?;

    let action = format!("/students/edit/{id}");
    let new_student = match form.validate() {
        Ok(new_student) => new_student,
        Err(errors) => {
            return Ok(state
                .render(student_form(
                    &action,
                    "Edit Student",
                    &form,
                    &errors,
                    false,
                    &form.csrf_token,
                ))
                .into_response());
        }
    };

    student.apply(new_student);
    match try_save(&state, &student).await {
        Ok(()) => Ok(Redirect::to("/students").into_response()),
        Err(e) if e.is_storage_failure() => {
            error!(?e, id, "Failed to save edited student");
            Ok(state
                .render(student_form(
                    &action,
                    "Edit Student",
                    &form,
                    &[],
                    true,
                    &form.csrf_token,
                ))
                .into_response())
        }
        Err(e) => Err(e),
    }
}

#[derive(Deserialize)]
pub struct DeleteOptions {
    //kept as a raw string: an empty flag value (`?save_changes_error=`) must
    //read as absent, not as a malformed bool
    pub save_changes_error: Option<String>,
}

pub async fn get_delete_student(
    State(state): State<RegistrarState>,
    session: Session,
    Path(id): Path<i64>,
    Query(DeleteOptions { save_changes_error }): Query<DeleteOptions>,
) -> RegistrarResult<Markup> {
    let csrf_token = csrf::issue(&session).await?;
    let mut conn = state.get_connection().await?;
    let details = Student::get_details(id, &mut conn)
        .await?
        .context(MissingStudentSnafu { id })?;

    Ok(state.render(html! {
        div class="container mx-auto flex flex-col space-y-4 max-w-2xl" {
            @if save_changes_error.as_deref() == Some("true") {
                (error_banner("Delete failed", GENERIC_SAVE_ERROR))
            }
            (subtitle("Are you sure you want to delete this student?"))
            (student_card(&details, html! {
                form method="post" action={"/students/delete/" (id)} class="space-x-4" {
                    input type="hidden" name="csrf_token" value=(csrf_token);
                    button type="submit" class="bg-red-600 hover:bg-red-800 font-bold py-2 px-4 rounded" {"Delete"}
                    a href="/students" class="text-blue-400 underline" {"Cancel"}
                }
            }))
        }
    }))
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct DeleteConfirmForm {
    pub csrf_token: String,
}

pub async fn post_delete_student(
    State(state): State<RegistrarState>,
    session: Session,
    Path(id): Path<i64>,
    Form(DeleteConfirmForm { csrf_token }): Form<DeleteConfirmForm>,
) -> RegistrarResult<Redirect> {
    csrf::verify(&session, &csrf_token).await?;

    match try_delete(&state, id).await {
        Ok(()) => Ok(Redirect::to("/students")),
        Err(e) => {
            //keep the user in the confirm loop instead of surfacing a status page
            error!(?e, id, "Failed to delete student");
            Ok(Redirect::to(&format!(
                "/students/delete/{id}?save_changes_error=true"
            )))
        }
    }
}

async fn try_insert(state: &RegistrarState, new_student: NewStudent) -> RegistrarResult<i64> {
    let mut conn = state.get_connection().await?;
    Student::insert_into_database(new_student, &mut conn).await
}

async fn try_save(state: &RegistrarState, student: &Student) -> RegistrarResult<()> {
    let mut conn = state.get_connection().await?;
    student.save(&mut conn).await
}

async fn try_delete(state: &RegistrarState, id: i64) -> RegistrarResult<()> {
    let mut conn = state.get_connection().await?;
    //an already-absent row means the delete has nothing left to do
    if Student::get_from_db_by_id(id, &mut conn).await?.is_none() {
        return Ok(());
    }
    Student::remove_from_database(id, &mut conn).await
}

fn student_form(
    action: &str,
    heading: &'static str,
    form: &StudentForm,
    errors: &[FieldError],
    save_failed: bool,
    csrf_token: &str,
) -> Markup {
    html! {
        div class="bg-gray-800 shadow-md rounded px-8 pt-6 pb-8 mb-4 w-full max-w-md" {
            (title(heading))
            @if save_failed {
                (error_banner("Save failed", GENERIC_SAVE_ERROR))
            }
            form method="post" action=(action) {
                input type="hidden" name="csrf_token" value=(csrf_token);
                (simple_form_element("last_name", "Last Name", None, Some(&form.last_name), field_message(errors, "last_name")))
                (simple_form_element("first_name", "First Name", None, Some(&form.first_name), field_message(errors, "first_name")))
                (simple_form_element("email", "Email Address", Some("email"), Some(&form.email), field_message(errors, "email")))
                (simple_form_element("year_rank", "Year Rank", Some("number"), Some(&form.year_rank), field_message(errors, "year_rank")))
                (simple_form_element("average_grade", "Average Grade", None, Some(&form.average_grade), field_message(errors, "average_grade")))
                (simple_form_element("enrollment_date", "Enrollment Date", Some("date"), Some(&form.enrollment_date), field_message(errors, "enrollment_date")))
                (form_submit_button(Some(heading)))
            }
            a href="/students" class="text-blue-400 underline" {"Back to list"}
        }
    }
}

fn student_card(details: &StudentDetails, footer: Markup) -> Markup {
    let StudentDetails {
        student,
        enrollments,
    } = details;

    let rows = enrollments
        .iter()
        .map(|enrollment| {
            [
                html! {(enrollment.course_title)},
                html! {(enrollment.course_credits)},
                html! {(enrollment.grade.as_deref().unwrap_or("not graded"))},
            ]
        })
        .collect();

    html! {
        div class="container mx-auto flex flex-col space-y-4 max-w-2xl" {
            div class="rounded-lg shadow-md overflow-hidden bg-gray-800 p-4" {
                (title(student.render()))
                p class="text-gray-200" {
                    "Email: "
                    a href={"mailto:" (student.email)} class="text-blue-400" {(student.email)}
                }
                p class="text-gray-200" {"Year rank: " (student.year_rank)}
                p class="text-gray-200" {"Average grade: " (student.average_grade)}
                p class="text-gray-200" {"Enrolled: " (student.enrollment_date_iso())}
            }
            @if enrollments.is_empty() {
                p class="text-gray-400 italic" {"No enrollments yet."}
            } @else {
                (render_table("Enrollments", ["Course", "Credits", "Grade"], rows))
            }
            (footer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RuntimeConfiguration, routes::build_router};
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;

    async fn test_state() -> RegistrarState {
        let options = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
        RegistrarState::new(options, RuntimeConfiguration::for_tests())
            .await
            .expect("unable to create state")
    }

    async fn send(
        app: &Router,
        request: Request<Body>,
    ) -> (StatusCode, axum::http::HeaderMap, String) {
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("request should not error");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("unable to read body")
            .to_bytes();
        (
            status,
            headers,
            String::from_utf8(body.to_vec()).expect("body should be utf8"),
        )
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("unable to build request")
    }

    fn post_form(uri: &str, cookie: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, cookie)
            .body(Body::from(body))
            .expect("unable to build request")
    }

    fn extract_csrf_token(body: &str) -> String {
        let marker = "name=\"csrf_token\" value=\"";
        let start = body.find(marker).expect("form should embed a csrf token") + marker.len();
        let end = body[start..].find('"').expect("token should be quoted") + start;
        body[start..end].to_string()
    }

    /// GET a page that carries a mutating form, returning the session cookie
    /// and the csrf token embedded in it.
    async fn fetch_form_token(app: &Router, uri: &str) -> (String, String) {
        let (status, headers, body) = send(app, get_request(uri)).await;
        assert_eq!(status, StatusCode::OK);
        let cookie = headers
            .get(header::SET_COOKIE)
            .expect("session cookie should be set")
            .to_str()
            .expect("cookie should be ascii")
            .split(';')
            .next()
            .expect("cookie should have a value")
            .to_string();
        (cookie, extract_csrf_token(&body))
    }

    fn ada_body(token: &str) -> String {
        format!(
            "last_name=Lovelace&first_name=Ada&email=ada%40x.edu&year_rank=1&average_grade=4.0&enrollment_date=2020-01-01&csrf_token={token}"
        )
    }

    async fn seed_ada(state: &RegistrarState) -> i64 {
        let new = StudentForm {
            last_name: "Lovelace".to_string(),
            first_name: "Ada".to_string(),
            email: "ada@x.edu".to_string(),
            year_rank: "1".to_string(),
            average_grade: "4.0".to_string(),
            enrollment_date: "2020-01-01".to_string(),
            csrf_token: String::new(),
        }
        .validate()
        .expect("seed data should validate");

        let mut conn = state.get_connection().await.expect("unable to get conn");
        Student::insert_into_database(new, &mut conn)
            .await
            .expect("unable to seed student")
    }

    #[tokio::test]
    async fn list_renders_on_empty_store() {
        let app = build_router(test_state().await);
        let (status, _, body) = send(&app, get_request("/students")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Students"));
    }

    #[tokio::test]
    async fn index_redirects_to_list() {
        let app = build_router(test_state().await);
        let (status, headers, _) = send(&app, get_request("/")).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/students");
    }

    #[tokio::test]
    async fn unmatched_ids_are_not_found() {
        let app = build_router(test_state().await);
        for uri in [
            "/students/details/4242",
            "/students/edit/4242",
            "/students/delete/4242",
        ] {
            let (status, _, _) = send(&app, get_request(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri} should be a 404");
        }
    }

    #[tokio::test]
    async fn create_round_trip_lists_the_new_student() {
        let state = test_state().await;
        let app = build_router(state.clone());

        let (cookie, token) = fetch_form_token(&app, "/students/create").await;
        let (status, headers, _) = send(
            &app,
            post_form("/students/create", &cookie, ada_body(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/students");

        let (status, _, body) = send(&app, get_request("/students")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Lovelace"));
        assert!(body.contains("ada@x.edu"));
        assert!(body.contains("2020-01-01"));

        let all = Student::get_all(&state).await.expect("unable to list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn create_ignores_client_supplied_id() {
        let state = test_state().await;
        let app = build_router(state.clone());

        let (cookie, token) = fetch_form_token(&app, "/students/create").await;
        let body = format!("id=999&{}", ada_body(&token));
        let (status, _, _) = send(&app, post_form("/students/create", &cookie, body)).await;
        assert_eq!(status, StatusCode::SEE_OTHER);

        let all = Student::get_all(&state).await.expect("unable to list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, 1, "id should be store-assigned");
    }

    #[tokio::test]
    async fn invalid_create_redisplays_and_persists_nothing() {
        let state = test_state().await;
        let app = build_router(state.clone());

        let (cookie, token) = fetch_form_token(&app, "/students/create").await;
        let body = format!(
            "last_name=&first_name=Ada&email=nope&year_rank=1&average_grade=4.0&enrollment_date=2020-01-01&csrf_token={token}"
        );
        let (status, _, body) = send(&app, post_form("/students/create", &cookie, body)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Last name is required"));
        assert!(body.contains("Enter a valid email address"));
        assert!(body.contains("value=\"Ada\""), "input should be redisplayed");

        let all = Student::get_all(&state).await.expect("unable to list");
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn edit_applies_only_the_allowed_field_set() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let id = seed_ada(&state).await;

        let (cookie, token) = fetch_form_token(&app, &format!("/students/edit/{id}")).await;
        let body = format!(
            "id=999&unknown=zzz&last_name=Byron&first_name=Ada&email=ada%40x.edu&year_rank=2&average_grade=4.5&enrollment_date=2020-01-01&csrf_token={token}"
        );
        let (status, headers, _) =
            send(&app, post_form(&format!("/students/edit/{id}"), &cookie, body)).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/students");

        let all = Student::get_all(&state).await.expect("unable to list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id, "id must survive an edit untouched");
        assert_eq!(all[0].last_name, "Byron");
        assert_eq!(all[0].year_rank, 2);
    }

    #[tokio::test]
    async fn edit_post_on_missing_id_is_not_found() {
        let app = build_router(test_state().await);

        let (cookie, token) = fetch_form_token(&app, "/students/create").await;
        let (status, _, _) = send(
            &app,
            post_form("/students/edit/4242", &cookie, ada_body(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_confirm_removes_the_row_and_is_idempotent() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let id = seed_ada(&state).await;

        let uri = format!("/students/delete/{id}");
        let (cookie, token) = fetch_form_token(&app, &uri).await;

        let (status, headers, _) = send(
            &app,
            post_form(&uri, &cookie, format!("csrf_token={token}")),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/students");
        assert!(
            Student::get_all(&state)
                .await
                .expect("unable to list")
                .is_empty()
        );

        //a second confirm for the same id still lands on the list
        let (status, headers, _) = send(
            &app,
            post_form(&uri, &cookie, format!("csrf_token={token}")),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/students");
    }

    #[tokio::test]
    async fn delete_storage_failure_redirects_back_with_the_flag() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let id = seed_ada(&state).await;

        let uri = format!("/students/delete/{id}");
        let (cookie, token) = fetch_form_token(&app, &uri).await;

        //kill the store out from under the handler
        state.sensible_shutdown().await;

        let (status, headers, _) = send(
            &app,
            post_form(&uri, &cookie, format!("csrf_token={token}")),
        )
        .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(
            headers[header::LOCATION],
            format!("/students/delete/{id}?save_changes_error=true")
        );
    }

    #[tokio::test]
    async fn delete_page_renders_the_failure_banner_when_flagged() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let id = seed_ada(&state).await;

        let (status, _, body) = send(
            &app,
            get_request(&format!("/students/delete/{id}?save_changes_error=true")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Unable to save changes"));

        //and not when it is absent
        let (status, _, body) =
            send(&app, get_request(&format!("/students/delete/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("Unable to save changes"));
        assert!(body.contains("Are you sure"));

        //an empty flag value reads as absent, not as a malformed bool
        let (status, _, body) = send(
            &app,
            get_request(&format!("/students/delete/{id}?save_changes_error=")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("Unable to save changes"));
        assert!(body.contains("Are you sure"));
    }

    #[tokio::test]
    async fn create_storage_failure_shows_the_generic_message() {
        let state = test_state().await;
        let app = build_router(state.clone());

        let (cookie, token) = fetch_form_token(&app, "/students/create").await;
        state.sensible_shutdown().await;

        let (status, _, body) = send(
            &app,
            post_form("/students/create", &cookie, ada_body(&token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Unable to save changes"));
    }

    #[tokio::test]
    async fn mutating_posts_without_a_token_are_rejected() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let id = seed_ada(&state).await;

        //no session at all
        let (status, _, _) = send(
            &app,
            post_form("/students/create", "", ada_body("forged-token")),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        //a session whose token does not match
        let (cookie, _) = fetch_form_token(&app, "/students/create").await;
        let (status, _, _) = send(
            &app,
            post_form(
                &format!("/students/delete/{id}"),
                &cookie,
                "csrf_token=forged-token".to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let all = Student::get_all(&state).await.expect("unable to list");
        assert_eq!(all.len(), 1, "nothing should have been created or deleted");
    }

    #[tokio::test]
    async fn details_view_joins_enrollments_and_courses() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let id = seed_ada(&state).await;

        let mut conn = state.get_connection().await.expect("unable to get conn");
        sqlx::query("INSERT INTO enrollments (student_id, course_id, grade) VALUES (?, 4, 'A')")
            .bind(id)
            .execute(&mut *conn)
            .await
            .expect("unable to enrol");
        drop(conn);

        let (status, _, body) =
            send(&app, get_request(&format!("/students/details/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Ada"));
        assert!(body.contains("Calculus"));
        assert!(body.contains("Enrollments"));
    }
}
