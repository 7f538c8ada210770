//! Push-notification dispatch, reusing this codebase's Web Push plumbing.
//!
//! A `DeviceToken`'s `token` column holds the JSON-serialized Web Push
//! subscription object (`{endpoint, keys: {p256dh, auth}}`); this module is the
//! only place that parses it back out.

use log::{error, warn};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, Urgency, VapidSignatureBuilder,
    WebPushClient, WebPushError, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::domain::{device_tokens, posts::Post};

#[derive(Debug, Clone, Deserialize, Serialize)]
struct SubscriptionKeys {
    p256dh: String,
    auth: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct Subscription {
    endpoint: String,
    keys: SubscriptionKeys,
}

#[derive(Debug, Serialize)]
struct PushPayload {
    title: String,
    body: String,
    data: PushPayloadData,
}

#[derive(Debug, Serialize)]
struct PushPayloadData {
    post_id: uuid::Uuid,
    kind: &'static str,
}

fn build_vapid_signature(
    private_key: &str,
    subscription_info: &SubscriptionInfo,
) -> Result<web_push::VapidSignature, WebPushError> {
    if private_key.contains("BEGIN PRIVATE KEY") || private_key.contains("BEGIN EC PRIVATE KEY") {
        VapidSignatureBuilder::from_pem(private_key.as_bytes(), subscription_info)?.build()
    } else {
        VapidSignatureBuilder::from_base64(private_key, URL_SAFE_NO_PAD, subscription_info)?
            .build()
    }
}

async fn send_to_subscription(
    client: &IsahcWebPushClient,
    payload: &[u8],
    subscription: &Subscription,
    private_key: &str,
) -> Result<(), WebPushError> {
    let subscription_info = SubscriptionInfo::new(
        &subscription.endpoint,
        &subscription.keys.p256dh,
        &subscription.keys.auth,
    );

    let signature = build_vapid_signature(private_key, &subscription_info)?;

    let mut message = WebPushMessageBuilder::new(&subscription_info);
    message.set_payload(ContentEncoding::Aes128Gcm, payload);
    message.set_ttl(4 * 60 * 60);
    message.set_urgency(Urgency::Normal);
    message.set_vapid_signature(signature);

    client.send(message.build()?).await
}

/// Fans a "post published" notification out to every device registered for `user_id`.
/// Individual send failures are logged and swallowed; a subscription the push service
/// reports as gone is pruned so it stops being tried.
pub async fn notify_published(db: &PgPool, vapid_private_key: Option<&str>, user_id: &str, post: &Post) {
    let Some(private_key) = vapid_private_key else {
        return;
    };

    let tokens = match device_tokens::list_for_user(db, user_id).await {
        Ok(tokens) => tokens,
        Err(e) => {
            error!("[notifier] failed to list device tokens for {}: {}", user_id, e);
            return;
        }
    };
    if tokens.is_empty() {
        return;
    }

    let client = match IsahcWebPushClient::new() {
        Ok(client) => client,
        Err(e) => {
            error!("[notifier] failed to build push client: {}", e);
            return;
        }
    };

    let payload = PushPayload {
        title: "Post published".to_string(),
        body: "Your scheduled post just went live.".to_string(),
        data: PushPayloadData {
            post_id: post.post_id_local,
            kind: "post-published",
        },
    };
    let payload_bytes = match serde_json::to_vec(&payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("[notifier] failed to serialize push payload: {}", e);
            return;
        }
    };

    for token in tokens {
        let subscription: Subscription = match serde_json::from_str(&token.token) {
            Ok(s) => s,
            Err(e) => {
                warn!("[notifier] malformed device token {}: {}", token.id, e);
                continue;
            }
        };

        match send_to_subscription(&client, &payload_bytes, &subscription, private_key).await {
            Ok(()) => {}
            Err(WebPushError::EndpointNotFound(_)) => {
                warn!(
                    "[notifier] endpoint gone for device token {}; pruning",
                    token.id
                );
                if let Err(e) = device_tokens::prune(db, &token.token).await {
                    error!("[notifier] failed to prune device token {}: {}", token.id, e);
                }
            }
            Err(e) => {
                warn!(
                    "[notifier] failed to deliver to device token {}: {}",
                    token.id, e
                );
            }
        }
    }
}
