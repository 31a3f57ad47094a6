use crate::error::{MakeQuerySnafu, RegistrarResult};
use snafu::ResultExt;
use sqlx::SqliteConnection;

/// One enrollment row joined with its course. Enrollments are never created
/// or edited here, only displayed from a student's detail view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EnrolledCourse {
    pub enrollment_id: i64,
    pub course_title: String,
    pub course_credits: i64,
    pub grade: Option<String>,
}

impl EnrolledCourse {
    pub async fn get_for_student(
        student_id: i64,
        conn: &mut SqliteConnection,
    ) -> RegistrarResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT e.id AS enrollment_id, c.title AS course_title, c.credits AS course_credits, e.grade \
             FROM enrollments e \
             JOIN courses c ON c.id = e.course_id \
             WHERE e.student_id = ? \
             ORDER BY c.title",
        )
        .bind(student_id)
        .fetch_all(&mut *conn)
        .await
        .context(MakeQuerySnafu)
    }
}
