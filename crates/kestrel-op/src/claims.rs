//! Claims Resolver.
//!
//! Maps a session's grant to the user claims a client may see. The claim
//! set is computed on every call from the stored grant and is never cached
//! on the session.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{Session, SubjectType};

/// Claims that carry a single value. The first non-empty value wins when
/// the backend supplies several.
const SINGLE_VALUED: &[&str] = &[
    "sub",
    "email",
    "email_verified",
    "phone_number",
    "phone_number_verified",
    "preferred_username",
    "profile",
    "picture",
    "website",
    "gender",
    "birthdate",
    "zoneinfo",
    "locale",
    "updated_at",
    "address",
];

/// Name parts. Several values are joined with a space.
const NAME_PARTS: &[&str] = &["name", "given_name", "family_name", "middle_name", "nickname"];

/// Resolves the claims released for a session.
#[derive(Debug, Clone)]
pub struct ClaimsResolver {
    scope_claims: BTreeMap<String, Vec<String>>,
    claims_supported: BTreeSet<String>,
    pairwise_salt: String,
}

impl ClaimsResolver {
    /// Creates a resolver.
    ///
    /// An empty `claims_supported` list places no extra restriction on the
    /// scope mapping.
    #[must_use]
    pub fn new(
        scope_claims: BTreeMap<String, Vec<String>>,
        claims_supported: impl IntoIterator<Item = String>,
        pairwise_salt: impl Into<String>,
    ) -> Self {
        Self {
            scope_claims,
            claims_supported: claims_supported.into_iter().collect(),
            pairwise_salt: pairwise_salt.into(),
        }
    }

    /// Claim names released for `scope`.
    #[must_use]
    pub fn claims_for_scope(&self, scope: &str) -> &[String] {
        self.scope_claims
            .get(scope)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns `true` if the scope is known to the mapping.
    #[must_use]
    pub fn is_known_scope(&self, scope: &str) -> bool {
        self.scope_claims.contains_key(scope)
    }

    fn is_supported(&self, claim: &str) -> bool {
        self.claims_supported.is_empty() || self.claims_supported.contains(claim)
    }

    /// Resolves the claims for `requested_scopes`.
    ///
    /// Only scopes that were also granted when the session was created are
    /// honoured. Claims with no value are left out.
    #[must_use]
    pub fn resolve(&self, session: &Session, requested_scopes: &[String]) -> Map<String, Value> {
        let mut claims = Map::new();

        let effective = requested_scopes
            .iter()
            .filter(|scope| session.grant.has_scope(scope));

        for scope in effective {
            for name in self.claims_for_scope(scope) {
                if !self.is_supported(name) || claims.contains_key(name) {
                    continue;
                }
                let value = if name == "sub" {
                    Some(Value::String(self.subject(session)))
                } else {
                    session
                        .grant
                        .attributes
                        .get(name)
                        .and_then(|raw| combine_claim_value(name, raw))
                };
                if let Some(value) = value {
                    claims.insert(name.clone(), value);
                }
            }
        }

        claims
    }

    /// The `sub` value released to the session's client.
    #[must_use]
    pub fn subject(&self, session: &Session) -> String {
        match session.grant.subject_type {
            SubjectType::Public => session.subject.clone(),
            SubjectType::Pairwise => {
                let sector = session
                    .grant
                    .sector_identifier
                    .as_deref()
                    .unwrap_or(&session.client_id);
                pairwise_subject(sector, &session.subject, &self.pairwise_salt)
            }
        }
    }
}

/// Pairwise subject identifier: hex SHA-256 over sector, subject and salt.
///
/// Each part is prefixed with its length so that different splits of the
/// same bytes never hash alike.
#[must_use]
pub fn pairwise_subject(sector: &str, subject: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [sector, subject, salt] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(is_empty_value),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Normalises one attribute into a claim value, or `None` when empty.
#[must_use]
pub fn combine_claim_value(name: &str, raw: &Value) -> Option<Value> {
    let Value::Array(items) = raw else {
        return (!is_empty_value(raw)).then(|| raw.clone());
    };

    let values: Vec<&Value> = items.iter().filter(|v| !is_empty_value(v)).collect();
    if values.is_empty() {
        return None;
    }

    if SINGLE_VALUED.contains(&name) {
        return values.first().map(|v| (*v).clone());
    }

    if NAME_PARTS.contains(&name) {
        let joined = values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        return Some(Value::String(joined));
    }

    Some(Value::Array(values.into_iter().cloned().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::types::{AuthnEvent, Client, Grant};
    use serde_json::json;
    use time::{Duration, OffsetDateTime};

    fn resolver() -> ClaimsResolver {
        let config = ProviderConfig::default();
        ClaimsResolver::new(
            config.scope_claims,
            config.capabilities.claims_supported,
            "salt",
        )
    }

    fn session(subject_type: SubjectType, granted: &[&str]) -> Session {
        let client = Client::public("c1", vec!["https://rp.example.com/cb".to_string()])
            .with_subject_type(subject_type);
        let attributes = json!({
            "name": ["Ada", "Lovelace"],
            "given_name": "Ada",
            "family_name": "",
            "email": ["ada@example.com", "ada@work.example.com"],
            "email_verified": true,
            "phone_number": null,
            "groups": ["admins", "staff"],
        });
        let Value::Object(attributes) = attributes else {
            unreachable!()
        };
        let grant = Grant::new(&client, granted.iter().map(|s| s.to_string()).collect())
            .with_attributes(attributes);
        let event = AuthnEvent::new("u1", "pwd", OffsetDateTime::now_utc(), 8);
        Session::new("u1", event, grant, Duration::hours(1))
    }

    fn scopes(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_public_subject() {
        let session = session(SubjectType::Public, &["openid"]);
        let claims = resolver().resolve(&session, &scopes(&["openid"]));
        assert_eq!(claims["sub"], "u1");
    }

    #[test]
    fn test_pairwise_subject_differs_between_sectors() {
        let a = pairwise_subject("rp-a.example.com", "u1", "salt");
        let b = pairwise_subject("rp-b.example.com", "u1", "salt");
        assert_ne!(a, b);
        assert_eq!(a, pairwise_subject("rp-a.example.com", "u1", "salt"));
        assert_eq!(a.len(), 64);

        let session = session(SubjectType::Pairwise, &["openid"]);
        assert_eq!(
            resolver().subject(&session),
            pairwise_subject("rp.example.com", "u1", "salt")
        );
    }

    #[test]
    fn test_pairwise_subject_parts_are_delimited() {
        assert_ne!(
            pairwise_subject("rp.a", "bc", "salt"),
            pairwise_subject("rp.ab", "c", "salt")
        );
        assert_ne!(
            pairwise_subject("rp", "u1", "salt"),
            pairwise_subject("rp", "u1s", "alt")
        );
    }

    #[test]
    fn test_claims_limited_to_granted_scopes() {
        let session = session(SubjectType::Public, &["openid", "profile"]);
        let claims = resolver().resolve(&session, &scopes(&["openid", "profile", "email"]));
        assert!(claims.contains_key("name"));
        assert!(!claims.contains_key("email"));
    }

    #[test]
    fn test_never_returns_claims_outside_granted_scopes() {
        let resolver = resolver();
        let all = ["openid", "profile", "email", "address", "phone"];
        let grants: [&[&str]; 5] = [
            &["openid"],
            &["openid", "profile"],
            &["openid", "email"],
            &["openid", "phone", "address"],
            &all,
        ];

        for granted in grants {
            let session = session(SubjectType::Public, granted);
            let allowed: BTreeSet<&String> = granted
                .iter()
                .flat_map(|scope| resolver.claims_for_scope(scope))
                .collect();
            let claims = resolver.resolve(&session, &scopes(&all));
            for name in claims.keys() {
                assert!(allowed.contains(name), "{name} leaked for {granted:?}");
            }
        }
    }

    #[test]
    fn test_empty_values_omitted() {
        let session = session(SubjectType::Public, &["openid", "profile", "phone"]);
        let claims = resolver().resolve(&session, &scopes(&["openid", "profile", "phone"]));
        assert!(!claims.contains_key("family_name"));
        assert!(!claims.contains_key("phone_number"));
        assert!(!claims.values().any(Value::is_null));
    }

    #[test]
    fn test_multi_valued_claims_combined() {
        let session = session(SubjectType::Public, &["openid", "profile", "email"]);
        let claims = resolver().resolve(&session, &scopes(&["openid", "profile", "email"]));
        assert_eq!(claims["name"], "Ada Lovelace");
        assert_eq!(claims["email"], "ada@example.com");
        assert_eq!(claims["email_verified"], true);
    }

    #[test]
    fn test_combine_keeps_lists() {
        assert_eq!(
            combine_claim_value("groups", &json!(["a", "", "b"])),
            Some(json!(["a", "b"]))
        );
        assert_eq!(combine_claim_value("groups", &json!([null, ""])), None);
        assert_eq!(combine_claim_value("locale", &json!("  ")), None);
    }

    #[test]
    fn test_unsupported_claims_dropped() {
        let mut mapping = BTreeMap::new();
        mapping.insert("openid".to_string(), vec!["sub".to_string()]);
        mapping.insert(
            "profile".to_string(),
            vec!["name".to_string(), "given_name".to_string()],
        );
        let resolver = ClaimsResolver::new(mapping, ["sub".to_string(), "name".to_string()], "s");
        let session = session(SubjectType::Public, &["openid", "profile"]);
        let claims = resolver.resolve(&session, &scopes(&["openid", "profile"]));
        assert!(claims.contains_key("name"));
        assert!(!claims.contains_key("given_name"));
    }
}
