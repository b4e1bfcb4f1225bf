//! Slack incoming-webhook channel.

use serde_json::json;

use crate::error::NotifyError;

pub(super) async fn send(
    client: &reqwest::Client,
    target: &str,
    title: &str,
    body: &str,
    alert: bool,
    down: bool,
) -> Result<(), NotifyError> {
    let prefix = if alert { "@Channel " } else { "" };
    let fallback = format!("{prefix}{title}\n\n{body}");
    let payload = json!({
        "attachments": [{
            "fallback": fallback,
            "color": if down { "danger" } else { "good" },
            "title": title,
            "text": format!("{prefix}{body}"),
        }]
    });

    let response = client.post(target).json(&payload).send().await?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(NotifyError::BadStatus {
            status: response.status().as_u16(),
        })
    }
}
