use crate::cli::actions::{Action, server, setup};
use anyhow::Result;

/// Execute the provided action.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(settings) => server::execute(settings).await,
        Action::Setup(settings) => setup::execute(settings).await,
        Action::RecreateDb(settings) => setup::recreate(settings).await,
    }
}
