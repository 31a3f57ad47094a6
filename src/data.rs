use crate::error::RegistrarResult;
use sqlx::{Pool, Sqlite, SqliteConnection};

pub mod enrollment;
pub mod student;

pub trait DataType: Sized {
    type Id;
    type FormForAdding;

    async fn get_from_db_by_id(
        id: Self::Id,
        conn: &mut SqliteConnection,
    ) -> RegistrarResult<Option<Self>>;
    async fn get_all(pool: &Pool<Sqlite>) -> RegistrarResult<Vec<Self>>;
    async fn insert_into_database(
        to_be_added: Self::FormForAdding,
        conn: &mut SqliteConnection,
    ) -> RegistrarResult<Self::Id>;
    async fn remove_from_database(id: Self::Id, conn: &mut SqliteConnection)
    -> RegistrarResult<()>;
}
