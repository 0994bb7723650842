//! JSON Web Key encoding of P-256 public keys.
//!
//! Wire encoding interoperates with WebCrypto `exportKey("jwk", ...)`:
//! coordinates are base64url without padding, each exactly 32 bytes before
//! encoding. Only public EC keys on P-256 are representable; anything else
//! is rejected during conversion, never silently coerced.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, FieldBytes, PublicKey};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Length of one P-256 affine coordinate in bytes.
const COORDINATE_LEN: usize = 32;

/// An elliptic-curve public key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    /// Key type; always `"EC"`.
    pub kty: String,

    /// Curve name; always `"P-256"`.
    pub crv: String,

    /// Base64url (no padding) X coordinate, 32 bytes.
    pub x: String,

    /// Base64url (no padding) Y coordinate, 32 bytes.
    pub y: String,

    /// WebCrypto extractability marker; emitted as `true` so browsers can
    /// import the key.
    #[serde(default)]
    pub ext: bool,
}

impl EcJwk {
    /// Encode a P-256 public key as a JWK.
    #[must_use]
    pub fn from_public_key(key: &PublicKey) -> Self {
        let point = key.to_encoded_point(false);

        // Uncompressed SEC1 encoding always carries both coordinates.
        let x = point.x().map(|c| URL_SAFE_NO_PAD.encode(c)).unwrap_or_default();
        let y = point.y().map(|c| URL_SAFE_NO_PAD.encode(c)).unwrap_or_default();

        Self { kty: "EC".to_string(), crv: "P-256".to_string(), x, y, ext: true }
    }

    /// Convert the JWK back into a P-256 public key.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidJwk`] if the key type or curve is wrong,
    ///   a coordinate is malformed or not 32 bytes, or the point is not on
    ///   the curve.
    pub fn to_public_key(&self) -> Result<PublicKey, ProtocolError> {
        if self.kty != "EC" {
            return Err(invalid(format!("unsupported key type `{}`", self.kty)));
        }
        if self.crv != "P-256" {
            return Err(invalid(format!("unsupported curve `{}`", self.crv)));
        }

        let x = decode_coordinate(&self.x, "x")?;
        let y = decode_coordinate(&self.y, "y")?;

        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );

        let key: Option<PublicKey> = PublicKey::from_encoded_point(&point).into();
        key.ok_or_else(|| invalid("point is not on the curve".to_string()))
    }

    /// Parse a JWK from raw JSON bytes (the OAEP-unwrapped handshake blob).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Json`] if the bytes are not a JWK object.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

fn decode_coordinate(encoded: &str, name: &str) -> Result<[u8; COORDINATE_LEN], ProtocolError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| invalid(format!("coordinate `{name}` is not base64url: {e}")))?;

    <[u8; COORDINATE_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        invalid(format!("coordinate `{name}` must be {COORDINATE_LEN} bytes, got {}", bytes.len()))
    })
}

fn invalid(reason: String) -> ProtocolError {
    ProtocolError::InvalidJwk { reason }
}
