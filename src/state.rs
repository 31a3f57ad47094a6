use crate::{
    config::RuntimeConfiguration,
    error::{GetDatabaseConnectionSnafu, MigrateSnafu, OpenDatabaseSnafu, RegistrarResult},
};
use maud::{DOCTYPE, Markup, html};
use snafu::ResultExt;
use sqlx::{Pool, Sqlite, pool::PoolConnection, sqlite::SqlitePoolOptions};
use std::ops::Deref;

#[derive(Clone, Debug)]
pub struct RegistrarState {
    pool: Pool<Sqlite>,
    config: RuntimeConfiguration,
}

impl RegistrarState {
    pub async fn new(
        options: SqlitePoolOptions,
        config: RuntimeConfiguration,
    ) -> RegistrarResult<Self> {
        let pool = options
            .connect(config.db_url())
            .await
            .context(OpenDatabaseSnafu)?;

        sqlx::migrate!().run(&pool).await.context(MigrateSnafu)?;

        Ok(Self { pool, config })
    }

    #[allow(clippy::needless_pass_by_value)] //to allow direct html! usage
    pub fn render(&self, markup: Markup) -> Markup {
        html! {
            (DOCTYPE)
            html {
                head {
                    meta charset="UTF-8" {}
                    meta name="viewport" content="width=device-width, initial-scale=1.0" {}
                    script src="https://cdn.jsdelivr.net/npm/@tailwindcss/browser@4" {}
                    title { (self.config.site_name()) }
                }
                body class="bg-gray-900 min-h-screen flex flex-col items-center text-white" {
                    nav class="w-full bg-gray-800 p-4 mb-8" {
                        div class="container mx-auto flex flex-row space-x-6" {
                            a href="/students" class="font-semibold hover:text-blue-400" {(self.config.site_name())}
                            a href="/students" class="hover:text-blue-400" {"Students"}
                            a href="/students/create" class="hover:text-blue-400" {"New Student"}
                        }
                    }
                    (markup)
                }
            }
        }
    }

    pub async fn get_connection(&self) -> RegistrarResult<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .context(GetDatabaseConnectionSnafu)
    }

    pub async fn sensible_shutdown(&self) {
        self.pool.close().await;
    }
}

impl Deref for RegistrarState {
    type Target = Pool<Sqlite>;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}
