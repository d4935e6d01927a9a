use tower_sessions::Session;

use crate::chat::{Identity, Role};
use crate::AppResult;

pub const USERNAME: &str = "username";
pub const ROLE: &str = "role";
pub const GENDER: &str = "gender";

/// The identity the login handler stored in the session, or `None` for an
/// anonymous visitor. This is the only seam between the login surface and
/// the chat core: the core never reads the session itself.
pub async fn session_identity(session: &Session) -> AppResult<Option<Identity>> {
    let Some(username) = session.get::<String>(USERNAME).await? else {
        return Ok(None);
    };
    let role = session.get::<Role>(ROLE).await?.unwrap_or(Role::User);
    let gender = session.get::<String>(GENDER).await?;

    Ok(Some(Identity { username, role, gender }))
}
