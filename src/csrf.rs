use crate::error::{CsrfMismatchSnafu, RegistrarResult, TowerSessionSnafu};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use snafu::{ResultExt, ensure};
use tower_sessions::Session;

const CSRF_SESSION_KEY: &str = "csrf_token";

/// Get the session's anti-forgery token, minting one on first use. Every
/// mutating form embeds this as a hidden field.
pub async fn issue(session: &Session) -> RegistrarResult<String> {
    if let Some(existing) = session
        .get::<String>(CSRF_SESSION_KEY)
        .await
        .context(TowerSessionSnafu)?
    {
        return Ok(existing);
    }

    let token = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>());
    session
        .insert(CSRF_SESSION_KEY, token.clone())
        .await
        .context(TowerSessionSnafu)?;
    Ok(token)
}

/// Check a submitted token against the session before any mutation runs.
pub async fn verify(session: &Session, submitted: &str) -> RegistrarResult<()> {
    let expected = session
        .get::<String>(CSRF_SESSION_KEY)
        .await
        .context(TowerSessionSnafu)?;

    ensure!(
        !submitted.is_empty() && expected.as_deref() == Some(submitted),
        CsrfMismatchSnafu
    );
    Ok(())
}
