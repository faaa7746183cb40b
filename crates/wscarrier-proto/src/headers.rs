//! Upgrade request headers
//!
//! The access front end expects service tokens and the jump destination under
//! fixed header names. Custom headers come from the command line as
//! `"key: value"` strings and are accepted permissively: an entry that cannot be
//! turned into a header is dropped rather than reported.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Header carrying the service token client identity
pub const ACCESS_CLIENT_ID_HEADER: HeaderName = HeaderName::from_static("cf-access-client-id");

/// Header carrying the service token client secret
pub const ACCESS_CLIENT_SECRET_HEADER: HeaderName =
    HeaderName::from_static("cf-access-client-secret");

/// Header naming the ultimate target behind the access front end
pub const JUMP_DESTINATION_HEADER: HeaderName =
    HeaderName::from_static("cf-access-jump-destination");

/// Incrementally assembles the header set sent with the WebSocket upgrade.
///
/// Identity and secret use replace semantics; the jump destination is
/// appended so that values populated from different call sites coexist.
#[derive(Debug, Clone, Default)]
pub struct HeaderBuilder {
    headers: HeaderMap,
}

impl HeaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing header set
    pub fn from_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Add a raw `"key:value"` pair.
    ///
    /// The entry is split on its first colon and both halves are trimmed.
    /// Entries without a colon, or whose key/value are not valid HTTP tokens,
    /// are silently dropped.
    pub fn pair(mut self, raw: &str) -> Self {
        let Some((key, value)) = raw.split_once(':') else {
            debug!(entry = %raw, "Dropping header entry without ':' separator");
            return self;
        };

        match (
            HeaderName::from_bytes(key.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => {
                debug!(entry = %raw, "Dropping header entry that is not a valid HTTP header");
            }
        }
        self
    }

    /// Add every raw `"key:value"` pair in order
    pub fn pairs<I, S>(self, raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter().fold(self, |builder, entry| builder.pair(entry.as_ref()))
    }

    /// Set the client identity token, replacing any previous value
    pub fn client_id(self, token: &str) -> Self {
        self.set_token(ACCESS_CLIENT_ID_HEADER, token)
    }

    /// Set the client secret token, replacing any previous value
    pub fn client_secret(self, token: &str) -> Self {
        self.set_token(ACCESS_CLIENT_SECRET_HEADER, token)
    }

    /// Append a jump destination, keeping values already present
    pub fn jump_destination(mut self, destination: &str) -> Self {
        if destination.is_empty() {
            return self;
        }
        match HeaderValue::from_str(destination) {
            Ok(value) => {
                self.headers.append(JUMP_DESTINATION_HEADER, value);
            }
            Err(_) => debug!("Ignoring jump destination that is not a valid header value"),
        }
        self
    }

    fn set_token(mut self, name: HeaderName, token: &str) -> Self {
        if token.is_empty() {
            return self;
        }
        match HeaderValue::from_str(token) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(name, value);
            }
            Err(_) => debug!(header = %name, "Ignoring token that is not a valid header value"),
        }
        self
    }

    pub fn build(self) -> HeaderMap {
        self.headers
    }
}

/// Build the complete upgrade header set in one call.
///
/// Empty or absent tokens and destination add nothing. This never fails:
/// malformed entries are ignored one by one.
pub fn build_request_headers<I, S>(
    pairs: I,
    client_id: Option<&str>,
    client_secret: Option<&str>,
    jump_destination: Option<&str>,
) -> HeaderMap
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut builder = HeaderBuilder::new().pairs(pairs);
    if let Some(id) = client_id {
        builder = builder.client_id(id);
    }
    if let Some(secret) = client_secret {
        builder = builder.client_secret(secret);
    }
    if let Some(destination) = jump_destination {
        builder = builder.jump_destination(destination);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_are_trimmed_and_bad_entries_dropped() {
        let headers = build_request_headers(["X-Foo: bar", "bad-entry"], Some("id1"), None, None);

        assert_eq!(headers.get("x-foo").unwrap(), "bar");
        assert_eq!(headers.get(ACCESS_CLIENT_ID_HEADER).unwrap(), "id1");
        assert!(headers.get("bad-entry").is_none());
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_pair_splits_on_first_colon_only() {
        let headers = HeaderBuilder::new()
            .pair("  X-Forwarded-Url :  https://example.com:8443/path  ")
            .build();

        assert_eq!(
            headers.get("x-forwarded-url").unwrap(),
            "https://example.com:8443/path"
        );
    }

    #[test]
    fn test_repeated_custom_header_keeps_all_values() {
        let headers = HeaderBuilder::new().pairs(["X-Tag: a", "x-tag: b"]).build();

        let values: Vec<_> = headers.get_all("x-tag").iter().collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_header_name_is_dropped() {
        let headers = HeaderBuilder::new()
            .pairs([": no-key", "bad key: value", "Good: yes"])
            .build();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("good").unwrap(), "yes");
    }

    #[test]
    fn test_tokens_use_replace_semantics() {
        let headers = HeaderBuilder::new()
            .client_id("first-id")
            .client_id("second-id")
            .client_secret("first-secret")
            .client_secret("second-secret")
            .build();

        let ids: Vec<_> = headers.get_all(ACCESS_CLIENT_ID_HEADER).iter().collect();
        assert_eq!(ids, vec!["second-id"]);
        let secrets: Vec<_> = headers.get_all(ACCESS_CLIENT_SECRET_HEADER).iter().collect();
        assert_eq!(secrets, vec!["second-secret"]);
    }

    #[test]
    fn test_token_replaces_value_from_custom_pair() {
        let headers = HeaderBuilder::new()
            .pair("Cf-Access-Client-Id: from-header-flag")
            .client_id("from-token-flag")
            .build();

        let ids: Vec<_> = headers.get_all(ACCESS_CLIENT_ID_HEADER).iter().collect();
        assert_eq!(ids, vec!["from-token-flag"]);
    }

    #[test]
    fn test_jump_destination_uses_append_semantics() {
        let headers = HeaderBuilder::new()
            .jump_destination("ssh.internal:22")
            .jump_destination("db.internal:5432")
            .build();

        let destinations: Vec<_> = headers.get_all(JUMP_DESTINATION_HEADER).iter().collect();
        assert_eq!(destinations, vec!["ssh.internal:22", "db.internal:5432"]);
    }

    #[test]
    fn test_empty_tokens_add_nothing() {
        let headers =
            build_request_headers(Vec::<String>::new(), Some(""), Some(""), Some(""));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_tokens_are_marked_sensitive() {
        let headers = HeaderBuilder::new().client_secret("s3cret").build();
        assert!(headers
            .get(ACCESS_CLIENT_SECRET_HEADER)
            .unwrap()
            .is_sensitive());
    }
}
