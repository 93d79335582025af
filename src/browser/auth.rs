//! Best-effort login before scraping.
//!
//! A logged-in session sees more of a timeline, but nothing depends on it:
//! every failure here is reported and the caller carries on anonymously.

use std::time::Duration;

use tracing::{info, warn};

use super::{BrowserError, DocumentAccessor};
use crate::config::Credentials;

const USERNAME_INPUT: &str = "input[name='text']";
const PASSWORD_INPUT: &str = "input[name='password']";
const HOME_LINK: &str = "a[aria-label='Home']";

const FIELD_TIMEOUT: Duration = Duration::from_secs(20);
const PASSWORD_TIMEOUT: Duration = Duration::from_secs(10);
const LANDING_TIMEOUT: Duration = Duration::from_secs(20);

/// What happened during the login step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    /// No credentials configured.
    Declined,
    Failed(String),
}

/// Log in with `credentials`, if any.
pub async fn authenticate<A>(
    accessor: &mut A,
    base_url: &str,
    credentials: Option<&Credentials>,
) -> AuthOutcome
where
    A: DocumentAccessor + ?Sized,
{
    let Some(credentials) = credentials else {
        info!("No login credentials configured, proceeding without login");
        return AuthOutcome::Declined;
    };

    if credentials.username.is_empty() || credentials.password.is_empty() {
        info!("Login credentials incomplete, proceeding without login");
        return AuthOutcome::Declined;
    }

    match login_flow(accessor, base_url, credentials).await {
        Ok(()) => {
            info!(username = %credentials.username, "Logged in");
            AuthOutcome::Authenticated
        }
        Err(e) => {
            warn!(error = %e, "Login failed, proceeding without login");
            AuthOutcome::Failed(e.to_string())
        }
    }
}

async fn login_flow<A>(
    accessor: &mut A,
    base_url: &str,
    credentials: &Credentials,
) -> Result<(), BrowserError>
where
    A: DocumentAccessor + ?Sized,
{
    let login_url = format!("{}/i/flow/login", base_url.trim_end_matches('/'));
    accessor.navigate(&login_url).await?;

    accessor.wait_for(USERNAME_INPUT, FIELD_TIMEOUT).await?;
    accessor.fill(USERNAME_INPUT, &credentials.username).await?;
    if !accessor.activate_text("Next").await? {
        return Err(BrowserError::Script("'Next' button not found".to_string()));
    }

    accessor.wait_for(PASSWORD_INPUT, PASSWORD_TIMEOUT).await?;
    accessor.fill(PASSWORD_INPUT, &credentials.password).await?;
    if !accessor.activate_text("Log in").await? {
        return Err(BrowserError::Script("'Log in' button not found".to_string()));
    }

    accessor.wait_for(HOME_LINK, LANDING_TIMEOUT).await
}
