//! Route templates
//!
//! Buckets are keyed by the route template rather than the expanded URL so
//! that every message id on a channel does not spawn its own bucket. Major
//! parameters (channel, guild, webhook ids) stay in the key because the server
//! limits them independently.

use crate::transport::RequestMethod;

const MAJOR_PARAMETERS: &[&str] = &["channels", "guilds", "webhooks"];

/// Build the bucket key for a request
///
/// ```
/// use derun_rest::{route_key, RequestMethod};
///
/// assert_eq!(
///     route_key(RequestMethod::Delete, "/channels/100/messages/200?reason=x"),
///     "DELETE /channels/100/messages/:id"
/// );
/// ```
pub fn route_key(method: RequestMethod, path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or(path);

    let mut template = String::with_capacity(path.len() + 8);
    template.push_str(method.as_str());
    template.push(' ');

    let mut previous: Option<&str> = None;
    // Set while inside /webhooks/{id}/{token}
    let mut after_webhook_id = false;

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        template.push('/');

        let is_id = segment.bytes().all(|b| b.is_ascii_digit());
        match previous {
            Some(prev) if is_id && MAJOR_PARAMETERS.contains(&prev) => {
                template.push_str(segment);
                after_webhook_id = prev == "webhooks";
            }
            Some("reactions") => {
                template.push_str(":reaction");
                after_webhook_id = false;
            }
            _ if after_webhook_id => {
                // Webhook tokens are part of the major parameter
                template.push_str(segment);
                after_webhook_id = false;
            }
            _ if is_id => template.push_str(":id"),
            _ => template.push_str(segment),
        }
        previous = Some(segment);
    }

    if template.ends_with(' ') {
        template.push('/');
    }
    template
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_ids_are_collapsed() {
        assert_eq!(
            route_key(RequestMethod::Get, "/channels/1/messages/2"),
            route_key(RequestMethod::Get, "/channels/1/messages/3")
        );
        assert_eq!(
            route_key(RequestMethod::Get, "/channels/1/messages/2"),
            "GET /channels/1/messages/:id"
        );
    }

    #[test]
    fn test_major_ids_are_kept() {
        assert_ne!(
            route_key(RequestMethod::Get, "/channels/1/messages"),
            route_key(RequestMethod::Get, "/channels/2/messages")
        );
        assert_eq!(
            route_key(RequestMethod::Patch, "/guilds/42/members/7"),
            "PATCH /guilds/42/members/:id"
        );
    }

    #[test]
    fn test_webhook_token_is_major() {
        assert_eq!(
            route_key(RequestMethod::Post, "/webhooks/9/abcDEF/messages/5"),
            "POST /webhooks/9/abcDEF/messages/:id"
        );
    }

    #[test]
    fn test_reactions_are_collapsed() {
        assert_eq!(
            route_key(RequestMethod::Put, "/channels/1/messages/2/reactions/%F0%9F%91%8D/@me"),
            "PUT /channels/1/messages/:id/reactions/:reaction/@me"
        );
    }

    #[test]
    fn test_query_and_method() {
        assert_eq!(route_key(RequestMethod::Get, "/gateway/bot?x=1"), "GET /gateway/bot");
        assert_ne!(
            route_key(RequestMethod::Get, "/channels/1/messages/2"),
            route_key(RequestMethod::Delete, "/channels/1/messages/2")
        );
        assert_eq!(route_key(RequestMethod::Get, ""), "GET /");
    }
}
