//! Hipchat webhook channel.

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
    let prefix = if alert { "@all " } else { "" };
    let payload = json!({
        "message": format!("{prefix}{title}\n\n{body}"),
        "message_format": "text",
        "notify": true,
        "color": if down { "red" } else { "green" },
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
