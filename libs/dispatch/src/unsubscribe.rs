//! One-click unsubscribe headers for subscription-gated email sends. The
//! subscription-management URL carries an HMAC over the recipient identity so
//! the public endpoint can verify the link without a session.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use peregrine_core::SubscriptionGroupDetails;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub struct UnsubscribeContext<'a> {
    pub workspace_id: Uuid,
    pub user_id: &'a str,
    pub identifier: &'a str,
    pub identifier_key: &'a str,
    pub subscription_group: &'a SubscriptionGroupDetails,
    pub secret: &'a str,
    pub dashboard_base_url: &'a str,
}

/// Hex HMAC-SHA256 binding the workspace, user, and identifier to the link.
fn subscription_hash(ctx: &UnsubscribeContext<'_>) -> String {
    let mut mac = HmacSha256::new_from_slice(ctx.secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(ctx.workspace_id.to_string().as_bytes());
    mac.update(b":");
    mac.update(ctx.user_id.as_bytes());
    mac.update(b":");
    mac.update(ctx.identifier.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn subscription_management_url(ctx: &UnsubscribeContext<'_>) -> String {
    let hash = subscription_hash(ctx);
    format!(
        "{}/dashboard/public/subscription-management?w={}&i={}&ik={}&h={}&s={}&sub=0",
        ctx.dashboard_base_url.trim_end_matches('/'),
        ctx.workspace_id,
        urlencode(ctx.identifier),
        ctx.identifier_key,
        hash,
        ctx.subscription_group.id,
    )
}

/// RFC 8058 one-click unsubscribe headers plus a stable List-ID for the
/// subscription group.
pub fn construct_unsubscribe_headers(ctx: &UnsubscribeContext<'_>) -> BTreeMap<String, String> {
    let url = subscription_management_url(ctx);
    let mut headers = BTreeMap::new();
    headers.insert("List-Unsubscribe".to_string(), format!("<{url}>"));
    headers.insert(
        "List-Unsubscribe-Post".to_string(),
        "List-Unsubscribe=One-Click".to_string(),
    );
    headers.insert(
        "List-ID".to_string(),
        format!(
            "{} <{}.{}>",
            ctx.subscription_group.name, ctx.subscription_group.id, ctx.workspace_id
        ),
    );
    headers
}

/// Minimal percent-encoding for query values; everything outside the
/// unreserved set is escaped.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
