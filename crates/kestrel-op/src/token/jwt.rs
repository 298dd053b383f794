//! JWT signing keys, claim sets and JWKS export.
//!
//! Tokens are compact JWS values signed with RS256, RS384 or ES384 (P-384).
//! Every token carries a `kid` header naming the key that signed it so the
//! [`KeySet`](super::keys::KeySet) can pick the verification key after a
//! rotation.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey as EcDecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while signing or verifying a JWT.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Signing failed.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// The value is not a well-formed JWT.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The `exp` claim is in the past.
    #[error("Token expired")]
    Expired,

    /// The signature does not match the key named by `kid`.
    #[error("Invalid signature")]
    InvalidSignature,

    /// A registered claim (issuer, audience) has the wrong value.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// A required header or claim is absent.
    #[error("Missing required claim: {claim}")]
    MissingClaim {
        /// Name of the missing claim.
        claim: String,
    },

    /// No key in the ring has this id.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// The key id from the token header.
        kid: String,
    },

    /// Generating a key pair failed.
    #[error("Key generation error: {message}")]
    KeyGenerationError {
        /// Description of the key generation error.
        message: String,
    },

    /// Key material could not be parsed or does not fit the algorithm.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `MissingClaim` error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim {
            claim: claim.into(),
        }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `KeyGenerationError`.
    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the token itself was rejected.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::MissingClaim { .. }
        )
    }

    /// Returns `true` if this is a key-related error.
    #[must_use]
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound { .. } | Self::KeyGenerationError { .. } | Self::InvalidKey { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience | ErrorKind::InvalidIssuer | ErrorKind::InvalidSubject => {
                Self::invalid_claims(err.to_string())
            }
            ErrorKind::MissingRequiredClaim(claim) => Self::missing_claim(claim.clone()),
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                Self::invalid_key(err.to_string())
            }
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Signing algorithms the provider can issue tokens with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-256. Mandatory for OpenID Connect.
    RS256,
    /// RSA PKCS#1 v1.5 with SHA-384.
    RS384,
    /// ECDSA with P-384 and SHA-384.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// JOSE `alg` name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    /// Returns `true` if this is an EC-based algorithm.
    #[must_use]
    pub fn is_ec(&self) -> bool {
        matches!(self, Self::ES384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(JwtError::invalid_key(format!(
                "unsupported signing algorithm '{other}'"
            ))),
        }
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Claims of access and refresh tokens.
///
/// Both kinds share one layout and are told apart by `token_use`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject as released to the client (public or pairwise).
    pub sub: String,

    /// Audience: the client id.
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Token id, the key of the server-side record.
    pub jti: String,

    /// Owning session id.
    pub sid: String,

    /// OAuth client id.
    pub client_id: String,

    /// Space-separated scopes.
    pub scope: String,

    /// `access` or `refresh`.
    pub token_use: String,
}

/// ID token claims for OpenID Connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject as released to the client.
    pub sub: String,

    /// Audience (client id).
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Token id.
    pub jti: String,

    /// Session id.
    pub sid: String,

    /// When the end user authenticated (Unix timestamp).
    pub auth_time: i64,

    /// Nonce from the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// User claims released for the granted scopes.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

/// Names that belong to the ID token envelope and never come from user claims.
pub(crate) const RESERVED_ID_TOKEN_CLAIMS: &[&str] = &[
    "iss", "sub", "aud", "exp", "iat", "jti", "sid", "auth_time", "nonce",
];

/// The registered claims every token carries, read before the full claim
/// set so the record can be located whatever the token kind.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisteredClaims {
    /// Token id.
    pub jti: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// JSON Web Key (public part only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use ("sig").
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key with its verification half.
pub struct SigningKeyPair {
    /// Key ID, written to the `kid` header.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,

    /// When the key was created or loaded.
    pub created_at: OffsetDateTime,
}

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// Generates a key pair for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if algorithm.is_rsa() {
            Self::generate_rsa(algorithm)
        } else {
            Self::generate_ec()
        }
    }

    /// Generates a 2048-bit RSA key pair.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails or `algorithm` is not RSA-based.
    pub fn generate_rsa(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        if !algorithm.is_rsa() {
            return Err(JwtError::invalid_key(format!(
                "Algorithm {algorithm} is not RSA-based"
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;

        Ok(Self {
            kid: uuid::Uuid::new_v4().to_string(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            },
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Generates a P-384 key pair for ES384.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate_ec() -> Result<Self, JwtError> {
        let secret_key = EcSecretKey::random(&mut OsRng);
        Self::from_ec_secret(
            uuid::Uuid::new_v4().to_string(),
            &secret_key,
            |m| JwtError::key_generation_error(m),
        )
    }

    /// Loads a key pair from PEM.
    ///
    /// RSA private keys may be PKCS#1 or PKCS#8, the public key must be SPKI.
    /// EC private keys may be SEC1 or PKCS#8; the public half is derived from
    /// the private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data is invalid.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<Self, JwtError> {
        if algorithm.is_ec() {
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .or_else(|_| EcSecretKey::from_sec1_pem(private_pem))
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            return Self::from_ec_secret(kid.into(), &secret_key, |m| JwtError::invalid_key(m));
        }

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let public_key = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: kid.into(),
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            },
            created_at: OffsetDateTime::now_utc(),
        })
    }

    fn from_ec_secret(
        kid: String,
        secret_key: &EcSecretKey,
        fail: fn(String) -> JwtError,
    ) -> Result<Self, JwtError> {
        let signing_key = EcSigningKey::from(secret_key);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let x = point
            .x()
            .ok_or_else(|| fail("Missing x coordinate".to_string()))?;
        let y = point
            .y()
            .ok_or_else(|| fail("Missing y coordinate".to_string()))?;

        // jsonwebtoken only reads PKCS#8 EC keys
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| fail(e.to_string()))?;
        let encoding_key =
            EncodingKey::from_ec_pem(private_pem.as_bytes()).map_err(|e| fail(e.to_string()))?;

        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(x.as_slice()),
            &URL_SAFE_NO_PAD.encode(y.as_slice()),
        )
        .map_err(|e| fail(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES384,
            encoding_key,
            decoding_key,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Signs `claims`, stamping this key's id into the header.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.algorithm.to_jwt_algorithm());
        header.kid = Some(self.kid.clone());

        encode(&header, claims, &self.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Verifies the signature and issuer of `token` and returns its claims.
    ///
    /// Expiry is not checked here. The token issuer checks it after the
    /// revocation state so that a revoked token reports as revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, the signature does not
    /// verify, or the issuer differs.
    pub fn verify<T: DeserializeOwned>(&self, token: &str, issuer: &str) -> Result<T, JwtError> {
        let mut validation = Validation::new(self.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[issuer]);
        validation.validate_exp = false;
        validation.validate_aud = false;

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(JwtError::from)
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        let (kty, n, e, crv, x, y) = match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => (
                "RSA",
                Some(URL_SAFE_NO_PAD.encode(n)),
                Some(URL_SAFE_NO_PAD.encode(e)),
                None,
                None,
                None,
            ),
            PublicKeyData::Ec { x, y } => (
                "EC",
                None,
                None,
                Some("P-384".to_string()),
                Some(URL_SAFE_NO_PAD.encode(x)),
                Some(URL_SAFE_NO_PAD.encode(y)),
            ),
        };
        Jwk {
            kty: kty.to_string(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n,
            e,
            crv,
            x,
            y,
        }
    }
}

/// Reads the `kid` header without verifying anything.
///
/// # Errors
///
/// Returns `DecodingError` for malformed tokens and `MissingClaim` when the
/// header has no `kid`.
pub fn peek_kid(token: &str) -> Result<String, JwtError> {
    let header = jsonwebtoken::decode_header(token)?;
    header.kid.ok_or_else(|| JwtError::missing_claim("kid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER: &str = "https://op.example.com";

    fn access_claims(exp_offset: i64) -> AccessTokenClaims {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        AccessTokenClaims {
            iss: ISSUER.to_string(),
            sub: "u1".to_string(),
            aud: "c1".to_string(),
            exp: now + exp_offset,
            iat: now,
            jti: "t1".to_string(),
            sid: "s1".to_string(),
            client_id: "c1".to_string(),
            scope: "openid profile".to_string(),
            token_use: "access".to_string(),
        }
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("RS256".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::RS256);
        assert_eq!("ES384".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::ES384);
        assert!("HS256".parse::<SigningAlgorithm>().is_err());
        assert!(SigningAlgorithm::RS384.is_rsa());
        assert!(SigningAlgorithm::ES384.is_ec());
    }

    #[test]
    fn test_rs256_sign_verify() {
        let key = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let token = key.sign(&access_claims(3600)).unwrap();

        assert_eq!(peek_kid(&token).unwrap(), key.kid);
        let claims: AccessTokenClaims = key.verify(&token, ISSUER).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.token_use, "access");
    }

    #[test]
    fn test_es384_sign_verify() {
        let key = SigningKeyPair::generate_ec().unwrap();
        let token = key.sign(&access_claims(3600)).unwrap();
        let claims: AccessTokenClaims = key.verify(&token, ISSUER).unwrap();
        assert_eq!(claims.scope, "openid profile");
    }

    #[test]
    fn test_verify_does_not_check_expiry() {
        let key = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let token = key.sign(&access_claims(-3600)).unwrap();
        assert!(key.verify::<AccessTokenClaims>(&token, ISSUER).is_ok());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let signer = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let other = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let token = signer.sign(&access_claims(3600)).unwrap();
        assert!(matches!(
            other.verify::<AccessTokenClaims>(&token, ISSUER),
            Err(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let key = SigningKeyPair::generate_rsa(SigningAlgorithm::RS256).unwrap();
        let token = key.sign(&access_claims(3600)).unwrap();
        assert!(matches!(
            key.verify::<AccessTokenClaims>(&token, "https://other.example.com"),
            Err(JwtError::InvalidClaims { .. })
        ));
    }

    #[test]
    fn test_from_pem_round_trip() {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let key =
            SigningKeyPair::from_pem("file-key", SigningAlgorithm::RS256, &private_pem, &public_pem)
                .unwrap();
        assert_eq!(key.kid, "file-key");
        let token = key.sign(&access_claims(60)).unwrap();
        assert!(key.verify::<AccessTokenClaims>(&token, ISSUER).is_ok());
    }

    #[test]
    fn test_from_pem_ec_sec1() {
        let secret = EcSecretKey::random(&mut OsRng);
        let sec1 = secret.to_sec1_pem(LineEnding::LF).unwrap();
        let key = SigningKeyPair::from_pem("ec", SigningAlgorithm::ES384, &sec1, "").unwrap();
        assert_eq!(key.to_jwk().crv.as_deref(), Some("P-384"));
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        let result = SigningKeyPair::from_pem("k", SigningAlgorithm::RS256, "nope", "nope");
        assert!(matches!(result, Err(JwtError::InvalidKey { .. })));
    }

    #[test]
    fn test_jwk_rsa() {
        let key = SigningKeyPair::generate_rsa(SigningAlgorithm::RS384).unwrap();
        let jwk = key.to_jwk();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS384");
        assert!(jwk.n.is_some() && jwk.e.is_some());
        assert!(jwk.crv.is_none());

        let json = serde_json::to_value(&jwk).unwrap();
        assert_eq!(json["use"], "sig");
        assert!(json.get("x").is_none());
    }

    #[test]
    fn test_id_token_claims_flatten() {
        let mut extra = Map::new();
        extra.insert("name".to_string(), Value::String("Ada".to_string()));
        let claims = IdTokenClaims {
            iss: ISSUER.to_string(),
            sub: "u1".to_string(),
            aud: "c1".to_string(),
            exp: 2,
            iat: 1,
            jti: "j".to_string(),
            sid: "s".to_string(),
            auth_time: 1,
            nonce: None,
            claims: extra,
        };
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["name"], "Ada");
        assert!(json.get("nonce").is_none());
    }

    #[test]
    fn test_peek_kid_malformed() {
        assert!(matches!(
            peek_kid("not-a-jwt"),
            Err(JwtError::DecodingError { .. })
        ));
    }
}
