//! Terminal consent prompt

use analytics_auth::ConsentPrompt;
use reqwest::Url;
use tracing::info;

/// Prints the authorization URL on stderr, keeping stdout for report output.
pub struct TerminalPrompt;

fn instructions(url: &Url) -> String {
    format!(
        "Open this URL in a browser to authorize read access to Analytics:\n\n  {url}\n\n\
         Waiting for the redirect (Ctrl-C to cancel)..."
    )
}

impl ConsentPrompt for TerminalPrompt {
    fn present(&self, authorization_url: &Url) -> analytics_auth::Result<()> {
        info!("user consent required, authorization URL printed to stderr");
        eprintln!("{}", instructions(authorization_url));
        Ok(())
    }
}
