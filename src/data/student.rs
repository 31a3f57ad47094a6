use crate::{
    data::{DataType, enrollment::EnrolledCourse},
    error::{MakeQuerySnafu, RegistrarResult},
};
use email_address::EmailAddress;
use maud::{Markup, Render, html};
use serde::Deserialize;
use snafu::ResultExt;
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::str::FromStr;
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub email: String,
    pub year_rank: i64,
    pub average_grade: f64,
    pub enrollment_date: Date,
}

/// A student plus its enrollments (each joined with its course), fetched
/// eagerly in one go for the read-only detail and delete views.
#[derive(Debug, Clone)]
pub struct StudentDetails {
    pub student: Student,
    pub enrollments: Vec<EnrolledCourse>,
}

/// The raw form as submitted. Everything arrives as a string and goes through
/// [`StudentForm::validate`] before it can touch the store. There is
/// deliberately no `id` field: identifiers are store-assigned, and any
/// client-supplied `id` is dropped on deserialisation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StudentForm {
    pub last_name: String,
    pub first_name: String,
    pub email: String,
    pub year_rank: String,
    pub average_grade: String,
    pub enrollment_date: String,
    pub csrf_token: String,
}

/// The allow-listed field set after a successful validation pass. This is the
/// only thing the insert/update queries accept.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub last_name: String,
    pub first_name: String,
    pub email: EmailAddress,
    pub year_rank: i64,
    pub average_grade: f64,
    pub enrollment_date: Date,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

pub fn field_message<'a>(errors: &'a [FieldError], field: &str) -> Option<&'a str> {
    errors
        .iter()
        .find(|error| error.field == field)
        .map(|error| error.message)
}

impl StudentForm {
    pub fn from_student(student: &Student) -> Self {
        Self {
            last_name: student.last_name.clone(),
            first_name: student.first_name.clone(),
            email: student.email.clone(),
            year_rank: student.year_rank.to_string(),
            average_grade: student.average_grade.to_string(),
            enrollment_date: student.enrollment_date_iso(),
            csrf_token: String::new(),
        }
    }

    /// The explicit validation pass: either every field parses and we get a
    /// [`NewStudent`], or a list of per-field errors to render inline.
    pub fn validate(&self) -> Result<NewStudent, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut fail = |field, message| errors.push(FieldError { field, message });

        let last_name = self.last_name.trim();
        if last_name.is_empty() {
            fail("last_name", "Last name is required");
        }

        let first_name = self.first_name.trim();
        if first_name.is_empty() {
            fail("first_name", "First name is required");
        }

        let email = match EmailAddress::from_str(self.email.trim()) {
            Ok(email) => Some(email),
            Err(_) => {
                fail("email", "Enter a valid email address");
                None
            }
        };

        let year_rank = match self.year_rank.trim().parse::<i64>() {
            Ok(rank) if (1..=6).contains(&rank) => Some(rank),
            _ => {
                fail("year_rank", "Year rank must be a whole number from 1 to 6");
                None
            }
        };

        let average_grade = match self.average_grade.trim().parse::<f64>() {
            Ok(grade) if (0.0..=5.0).contains(&grade) => Some(grade),
            _ => {
                fail(
                    "average_grade",
                    "Average grade must be a number from 0 to 5",
                );
                None
            }
        };

        let enrollment_date = match Date::parse(self.enrollment_date.trim(), DATE_FORMAT) {
            Ok(date) => Some(date),
            Err(_) => {
                fail(
                    "enrollment_date",
                    "Enrollment date must be a valid date in YYYY-MM-DD format",
                );
                None
            }
        };

        if let (true, Some(email), Some(year_rank), Some(average_grade), Some(enrollment_date)) = (
            errors.is_empty(),
            email,
            year_rank,
            average_grade,
            enrollment_date,
        ) {
            Ok(NewStudent {
                last_name: last_name.to_string(),
                first_name: first_name.to_string(),
                email,
                year_rank,
                average_grade,
                enrollment_date,
            })
        } else {
            Err(errors)
        }
    }
}

impl DataType for Student {
    type Id = i64;
    type FormForAdding = NewStudent;

    async fn get_from_db_by_id(
        id: Self::Id,
        conn: &mut SqliteConnection,
    ) -> RegistrarResult<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT id, last_name, first_name, email, year_rank, average_grade, enrollment_date \
             FROM students WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context(MakeQuerySnafu)
    }

    async fn get_all(pool: &Pool<Sqlite>) -> RegistrarResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT id, last_name, first_name, email, year_rank, average_grade, enrollment_date \
             FROM students ORDER BY id",
        )
        .fetch_all(pool)
        .await
        .context(MakeQuerySnafu)
    }

    async fn insert_into_database(
        to_be_added: Self::FormForAdding,
        conn: &mut SqliteConnection,
    ) -> RegistrarResult<Self::Id> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO students (last_name, first_name, email, year_rank, average_grade, enrollment_date) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&to_be_added.last_name)
        .bind(&to_be_added.first_name)
        .bind(to_be_added.email.as_str())
        .bind(to_be_added.year_rank)
        .bind(to_be_added.average_grade)
        .bind(to_be_added.enrollment_date)
        .fetch_one(&mut *conn)
        .await
        .context(MakeQuerySnafu)
    }

    async fn remove_from_database(
        id: Self::Id,
        conn: &mut SqliteConnection,
    ) -> RegistrarResult<()> {
        sqlx::query("DELETE FROM students WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context(MakeQuerySnafu)?;
        Ok(())
    }
}

impl Student {
    pub async fn get_details(
        id: i64,
        conn: &mut SqliteConnection,
    ) -> RegistrarResult<Option<StudentDetails>> {
        let Some(student) = Self::get_from_db_by_id(id, conn).await? else {
            return Ok(None);
        };
        let enrollments = EnrolledCourse::get_for_student(id, conn).await?;

        Ok(Some(StudentDetails {
            student,
            enrollments,
        }))
    }

    /// Overwrite the allow-listed field set from a validated form. The id is
    /// untouchable: it was assigned by the store and stays that way.
    pub fn apply(&mut self, new: NewStudent) {
        self.last_name = new.last_name;
        self.first_name = new.first_name;
        self.email = new.email.to_string();
        self.year_rank = new.year_rank;
        self.average_grade = new.average_grade;
        self.enrollment_date = new.enrollment_date;
    }

    pub async fn save(&self, conn: &mut SqliteConnection) -> RegistrarResult<()> {
        sqlx::query(
            "UPDATE students \
             SET last_name = ?, first_name = ?, email = ?, year_rank = ?, average_grade = ?, enrollment_date = ? \
             WHERE id = ?",
        )
        .bind(&self.last_name)
        .bind(&self.first_name)
        .bind(&self.email)
        .bind(self.year_rank)
        .bind(self.average_grade)
        .bind(self.enrollment_date)
        .bind(self.id)
        .execute(&mut *conn)
        .await
        .context(MakeQuerySnafu)?;
        Ok(())
    }

    pub fn enrollment_date_iso(&self) -> String {
        self.enrollment_date
            .format(DATE_FORMAT)
            .unwrap_or_default()
    }
}

impl Render for Student {
    fn render(&self) -> Markup {
        html! {
            (self.first_name)
            " "
            (self.last_name)
        }
    }
}
