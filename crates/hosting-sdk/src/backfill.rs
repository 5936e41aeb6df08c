//! Matchmaker backfill keep-alive
//!
//! While the server is allocated, its backfill ticket must be re-approved
//! on a fixed cadence or the matchmaker considers it abandoned. The loop
//! runs once per second: it fetches a short-lived token from the local
//! proxy and posts an approval to the matchmaker for the current
//! allocation. Approval is the side effect; the returned ticket is
//! discarded.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::SdkError;
use crate::events::EventChannels;
use crate::model::{BackfillTicket, TokenResponse};

/// Per-request timeout for token fetches and approvals.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the ticket is re-approved.
const APPROVAL_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the keep-alive loop until the termination token fires. Failures are
/// reported on the error channel and never stop the loop; ticks while the
/// server is unallocated are skipped silently.
pub(crate) async fn run(
    config: Arc<RwLock<Config>>,
    events: Arc<EventChannels>,
    shutdown: CancellationToken,
) {
    let http = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(http) => http,
        Err(e) => {
            events.push_error(SdkError::Http(e));
            return;
        }
    };

    debug!("backfill keep-alive started");

    let mut ticker = tokio::time::interval(APPROVAL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = config.read().clone();
                match approve_ticket(&http, &snapshot).await {
                    Ok(ticket) => trace!(ticket = %ticket.id, "backfill ticket approved"),
                    Err(SdkError::NotAllocated) => {}
                    Err(e) => events.push_error(e),
                }
            }
        }
    }

    debug!("backfill keep-alive stopped");
}

/// One approval round: token fetch, then the approval call.
async fn approve_ticket(http: &reqwest::Client, config: &Config) -> Result<BackfillTicket, SdkError> {
    if config.allocated_uuid.is_empty() {
        return Err(SdkError::NotAllocated);
    }

    let token = fetch_token(http, config).await?;

    let url = format!(
        "{}/v2/backfill/{}/approvals",
        config.matchmaker_url(),
        config.allocated_uuid
    );
    let resp = http
        .post(url)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .send()
        .await?;

    match resp.status() {
        StatusCode::OK => Ok(resp.json().await?),
        StatusCode::TOO_MANY_REQUESTS => Err(SdkError::BackfillRetry),
        _ => Err(SdkError::BackfillApprove),
    }
}

/// Fetches the JWT used to authorize matchmaker calls from the local proxy.
async fn fetch_token(http: &reqwest::Client, config: &Config) -> Result<String, SdkError> {
    let resp = http
        .get(format!("{}/token", config.local_proxy_url()))
        .send()
        .await?;

    if resp.status() != StatusCode::OK {
        return Err(SdkError::TokenFetch);
    }

    let token: TokenResponse = resp.json().await?;
    if token.token.is_empty() || !token.error.is_empty() {
        return Err(SdkError::TokenFetch);
    }

    Ok(token.token)
}
