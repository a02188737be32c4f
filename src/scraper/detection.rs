use super::error::{FetchError, FetchResult};
use super::FetchedPage;

/// Lowercased fragments that only appear on anti-bot interstitials. Widget
/// classes such as `g-recaptcha` are left out: listing pages embed them in
/// ordinary contact forms.
const BOT_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "cf-challenge",
    "challenge-platform",
    "<title>just a moment...</title>",
    "attention required! | cloudflare",
    "are you a robot",
    "px-captcha",
    "captcha-delivery.com",
    "distil_r_captcha",
    "_incapsula_resource",
    "incapsula incident id",
];

/// Rejects pages that are blocked or errored even though the transport succeeded.
pub fn check_page(page: FetchedPage) -> FetchResult<FetchedPage> {
    if let Some(status) = page.status {
        if !(200..300).contains(&status) {
            return Err(FetchError::from_status(status));
        }
    }

    if let Some(marker) = find_bot_marker(&page.body) {
        return Err(FetchError::BotDetected {
            marker: marker.to_string(),
        });
    }

    Ok(page)
}

pub fn find_bot_marker(body: &str) -> Option<&'static str> {
    let lowered = body.to_lowercase();
    BOT_MARKERS
        .iter()
        .copied()
        .find(|marker| lowered.contains(marker))
}
