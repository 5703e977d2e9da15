//! Registry credential helpers.
//!
//! A credential helper inspects a project secret and, when the secret
//! carries the fields the helper understands, exchanges them for registry
//! credentials. Helpers are chained: a helper that finds none of its fields
//! returns `Ok(None)` so the caller can try the next one.
//!
//! The only helper implemented here is the ECR access-key helper, which
//! trades long-lived AWS access keys for short-lived ECR tokens through a
//! TTL-bounded [`TokenCache`].

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use conveyor_cache::{TokenCache, cache_key};

/// Secret data key holding the AWS region.
pub const REGION_KEY: &str = "awsRegion";

/// Secret data key holding the AWS access key ID.
pub const ID_KEY: &str = "awsAccessKeyID";

/// Secret data key holding the AWS secret access key.
pub const SECRET_KEY: &str = "awsSecretAccessKey";

/// How long a fetched ECR token is cached before it is refetched.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// The subset of a cluster `Secret` a credential helper reads.
#[derive(Clone, Debug, Default)]
pub struct Secret {
    /// Raw secret data, keyed by field name.
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    /// Read a data field as a string, empty when absent.
    pub fn field(&self, key: &str) -> String {
        self.data
            .get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default()
    }
}

/// Username/password pair a helper resolved for a registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Registry username.
    pub username: String,
    /// Registry password.
    pub password: String,
}

/// Authoritative token fetch, pluggable so tests never call AWS.
///
/// Receives `(region, access key ID, secret access key)` and returns the
/// base64 token ECR's `GetAuthorizationToken` would.
pub type TokenFetcher = Box<dyn Fn(&str, &str, &str) -> Result<String> + Send + Sync>;

/// Credential helper that exchanges AWS access keys for ECR tokens.
pub struct AccessKeyCredentialHelper {
    token_cache: TokenCache,
    fetch_token: TokenFetcher,
}

impl AccessKeyCredentialHelper {
    /// Build a helper with the default token TTL.
    pub fn new(fetch_token: TokenFetcher) -> Self {
        Self::with_ttl(DEFAULT_TOKEN_TTL, fetch_token)
    }

    /// Build a helper whose cached tokens expire after `ttl`.
    pub fn with_ttl(ttl: Duration, fetch_token: TokenFetcher) -> Self {
        Self {
            token_cache: TokenCache::new(ttl),
            fetch_token,
        }
    }

    /// Build a helper around an existing cache. Used by tests to pre-warm
    /// entries or to share one cache between helpers.
    pub fn with_cache(token_cache: TokenCache, fetch_token: TokenFetcher) -> Self {
        Self {
            token_cache,
            fetch_token,
        }
    }

    /// Resolve registry credentials from `secret`.
    ///
    /// Returns `Ok(None)` when the secret carries none of the AWS fields so
    /// the caller can fall through to the next helper. A secret carrying
    /// only some of the fields is an error.
    pub fn get_username_and_password(&self, secret: &Secret) -> Result<Option<Credentials>> {
        let region = secret.field(REGION_KEY);
        let id = secret.field(ID_KEY);
        let key = secret.field(SECRET_KEY);

        let set = [&region, &id, &key].iter().filter(|v| !v.is_empty()).count();
        if set == 0 {
            return Ok(None);
        }
        if set < 3 {
            bail!(
                "{REGION_KEY}, {ID_KEY}, and {SECRET_KEY} must all be set or all be unset"
            );
        }

        let cache_key = self.token_cache_key(&region, &id, &key);
        let token = match self.token_cache.get(&cache_key) {
            Some(token) => token,
            None => {
                let token = (self.fetch_token)(&region, &id, &key)
                    .map_err(|e| e.context("error getting ECR auth token"))?;
                // Population is best-effort; a racing miss simply wrote the
                // same token first.
                self.token_cache.insert(cache_key, token.clone());
                token
            }
        };

        decode_token(&token).map(Some)
    }

    fn token_cache_key(&self, region: &str, id: &str, key: &str) -> String {
        cache_key(&[region, id, key])
    }
}

/// Split a base64 ECR token into its username and password halves.
fn decode_token(token: &str) -> Result<Credentials> {
    let decoded = BASE64_STANDARD
        .decode(token)
        .context("error decoding ECR auth token")?;
    let decoded = String::from_utf8(decoded).context("error decoding ECR auth token")?;
    let Some((username, password)) = decoded.split_once(':') else {
        bail!("decoded ECR auth token is malformed");
    };
    Ok(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;

    const TEST_REGION: &str = "fake-region";
    const TEST_ID: &str = "fake-id";
    const TEST_SECRET: &str = "fake-secret";
    const TEST_USERNAME: &str = "fake-username";
    const TEST_PASSWORD: &str = "fake-password";

    fn encoded_token() -> String {
        BASE64_STANDARD.encode(format!("{TEST_USERNAME}:{TEST_PASSWORD}"))
    }

    fn secret_with(fields: &[(&str, &str)]) -> Secret {
        Secret {
            data: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        }
    }

    fn full_secret() -> Secret {
        secret_with(&[
            (REGION_KEY, TEST_REGION),
            (ID_KEY, TEST_ID),
            (SECRET_KEY, TEST_SECRET),
        ])
    }

    fn unreachable_fetcher() -> TokenFetcher {
        Box::new(|_, _, _| panic!("fetch must not be called"))
    }

    #[test]
    fn no_aws_details_falls_through() {
        let helper = AccessKeyCredentialHelper::new(unreachable_fetcher());
        let creds = helper
            .get_username_and_password(&Secret::default())
            .expect("no error");
        assert!(creds.is_none());
    }

    #[test]
    fn partially_set_fields_are_rejected() {
        let partials = [
            secret_with(&[(ID_KEY, TEST_ID), (SECRET_KEY, TEST_SECRET)]),
            secret_with(&[(REGION_KEY, TEST_REGION), (SECRET_KEY, TEST_SECRET)]),
            secret_with(&[(REGION_KEY, TEST_REGION), (ID_KEY, TEST_ID)]),
            secret_with(&[(REGION_KEY, TEST_REGION)]),
        ];
        for secret in partials {
            let helper = AccessKeyCredentialHelper::new(unreachable_fetcher());
            let err = helper
                .get_username_and_password(&secret)
                .expect_err("partial fields must fail");
            assert!(
                err.to_string().contains("must all be set or all be unset"),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn cache_hit_skips_the_fetch() {
        let cache = TokenCache::new(Duration::from_secs(60));
        cache.insert(cache_key(&[TEST_REGION, TEST_ID, TEST_SECRET]), encoded_token());

        let helper = AccessKeyCredentialHelper::with_cache(cache, unreachable_fetcher());
        let creds = helper
            .get_username_and_password(&full_secret())
            .expect("credentials")
            .expect("some");
        assert_eq!(creds.username, TEST_USERNAME);
        assert_eq!(creds.password, TEST_PASSWORD);
    }

    #[test]
    fn fetch_error_is_wrapped() {
        let helper = AccessKeyCredentialHelper::new(Box::new(|_, _, _| {
            Err(anyhow!("something went wrong"))
        }));
        let err = helper
            .get_username_and_password(&full_secret())
            .expect_err("fetch error");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("error getting ECR auth token"), "{rendered}");
        assert!(rendered.contains("something went wrong"), "{rendered}");
    }

    #[test]
    fn cache_miss_fetches_and_populates() {
        let token = encoded_token();
        let helper = AccessKeyCredentialHelper::new(Box::new(move |region, id, key| {
            assert_eq!(region, TEST_REGION);
            assert_eq!(id, TEST_ID);
            assert_eq!(key, TEST_SECRET);
            Ok(token.clone())
        }));

        let creds = helper
            .get_username_and_password(&full_secret())
            .expect("credentials")
            .expect("some");
        assert_eq!(creds.username, TEST_USERNAME);
        assert_eq!(creds.password, TEST_PASSWORD);
        assert!(
            helper
                .token_cache
                .get(&cache_key(&[TEST_REGION, TEST_ID, TEST_SECRET]))
                .is_some()
        );
    }

    #[test]
    fn only_the_first_miss_triggers_a_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let token = encoded_token();
        let helper = AccessKeyCredentialHelper::new(Box::new(move |_, _, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(token.clone())
        }));

        for _ in 0..5 {
            helper
                .get_username_and_password(&full_secret())
                .expect("credentials");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_entries_are_refetched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let token = encoded_token();
        let helper = AccessKeyCredentialHelper::with_ttl(
            Duration::from_millis(20),
            Box::new(move |_, _, _| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(token.clone())
            }),
        );

        helper
            .get_username_and_password(&full_secret())
            .expect("credentials");
        std::thread::sleep(Duration::from_millis(40));
        helper
            .get_username_and_password(&full_secret())
            .expect("credentials");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        let helper =
            AccessKeyCredentialHelper::new(Box::new(|_, _, _| Ok("not-base64!".to_string())));
        let err = helper
            .get_username_and_password(&full_secret())
            .expect_err("bad token");
        assert!(format!("{err:#}").contains("error decoding ECR auth token"));

        let no_colon = BASE64_STANDARD.encode("no-colon-here");
        let helper = AccessKeyCredentialHelper::new(Box::new(move |_, _, _| Ok(no_colon.clone())));
        let err = helper
            .get_username_and_password(&full_secret())
            .expect_err("bad token");
        assert!(err.to_string().contains("malformed"));
    }
}
