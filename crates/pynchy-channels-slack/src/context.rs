use slack_morphism::prelude::*;
use std::sync::Arc;

/// Shared Slack API handle: one hyper-backed client plus the bot token used
/// for every request this adapter makes.
#[derive(Clone)]
pub struct SlackAppContext {
    pub client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    pub token: SlackApiToken,
}

impl SlackAppContext {
    pub fn new(bot_token: impl Into<String>) -> Self {
        let client = Arc::new(SlackClient::new(SlackClientHyperConnector::new()));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.into()));
        Self { client, token }
    }

    pub fn session(&self) -> SlackApiTokenSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }
}
