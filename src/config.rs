use crate::error::{BadEnvVarSnafu, RegistrarResult};
use dotenvy::var;
use snafu::ResultExt;

#[derive(Clone, Debug)]
pub struct RuntimeConfiguration {
    db_url: String,
    server_ip: String,
    site_name: String,
}

impl RuntimeConfiguration {
    pub fn new() -> RegistrarResult<Self> {
        let db_url = var("DATABASE_URL").context(BadEnvVarSnafu {
            name: "DATABASE_URL",
        })?;
        let server_ip =
            var("REGISTRAR_SERVER_IP").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let site_name = var("REGISTRAR_SITE_NAME").unwrap_or_else(|_| "Registrar".to_string());

        Ok(Self {
            db_url,
            server_ip,
            site_name,
        })
    }

    pub fn db_url(&self) -> &str {
        &self.db_url
    }

    pub fn server_ip(&self) -> &str {
        &self.server_ip
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            db_url: "sqlite::memory:".to_string(),
            server_ip: "127.0.0.1:0".to_string(),
            site_name: "Registrar".to_string(),
        }
    }
}
