//! API key issuance command handlers

use crate::config::Config;
use crate::state::SharedState;

pub async fn cmd_issue_keys(config: Config) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;
    let issued = state.auth_service.issue_missing_api_keys().await?;

    if issued.is_empty() {
        println!("Every user already has an API key.");
        return Ok(());
    }

    for key in issued {
        println!("{}: {}", key.email, key.api_key);
    }

    Ok(())
}

pub async fn cmd_issue_key(config: Config, email: &str) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;
    let issued = state.auth_service.issue_api_key_for_email(email).await?;

    println!("{}: {}", issued.email, issued.api_key);
    println!("Expires: {}", issued.expires_at.format("%Y-%m-%d %H:%M UTC"));

    Ok(())
}
