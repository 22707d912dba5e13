//! Sign-in and sign-out.

use regusto_client::ClientContext;
use secrecy::SecretString;
use tracing::info;

use super::{CliError, emit};

/// Sign in with `email` and the password from `REGUSTO_PASSWORD`.
pub async fn login(ctx: &ClientContext, email: &str) -> Result<(), CliError> {
    let password = std::env::var("REGUSTO_PASSWORD")
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar("REGUSTO_PASSWORD"))?;

    let user_id = ctx.sign_in(email, &password).await?;
    info!(user_id = %user_id, "Signed in");
    emit(format_args!("signed in as user {user_id}"));
    Ok(())
}

pub async fn logout(ctx: &ClientContext) -> Result<(), CliError> {
    ctx.sign_out().await?;
    emit("signed out");
    Ok(())
}
