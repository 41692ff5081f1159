use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use std::borrow::Cow;
use std::convert::TryInto;

pub use hex_buffer_serde::Hex;

/// Decode a compressed ristretto point, rejecting anything that is not a valid encoding.
pub fn point_from_bytes(bytes: &[u8]) -> Option<RistrettoPoint> {
    if bytes.len() != 32 {
        return None;
    }
    CompressedRistretto::from_slice(bytes).decompress()
}

/// Decode a canonical scalar.
pub fn scalar_from_bytes(bytes: &[u8]) -> Option<Scalar> {
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    Scalar::from_canonical_bytes(bytes)
}

// a single-purpose type for use in `#[serde(with)]`
pub enum RistrettoPointHex {}

impl Hex<RistrettoPoint> for RistrettoPointHex {
    type Error = String;

    fn create_bytes(point: &RistrettoPoint) -> Cow<[u8]> {
        point.compress().to_bytes().to_vec().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<RistrettoPoint, String> {
        point_from_bytes(bytes).ok_or_else(|| "invalid ristretto point".to_owned())
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum ScalarHex {}

impl Hex<Scalar> for ScalarHex {
    type Error = String;

    fn create_bytes(scalar: &Scalar) -> Cow<[u8]> {
        scalar.as_bytes().as_ref().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Scalar, String> {
        scalar_from_bytes(bytes).ok_or_else(|| "non-canonical scalar".to_owned())
    }
}

/// Point vectors are encoded as one hex string of concatenated 32 byte encodings.
pub enum RistrettoPointsHex {}

impl Hex<Vec<RistrettoPoint>> for RistrettoPointsHex {
    type Error = String;

    fn create_bytes(points: &Vec<RistrettoPoint>) -> Cow<[u8]> {
        let mut bytes = Vec::with_capacity(points.len() * 32);
        for point in points {
            bytes.extend_from_slice(point.compress().as_bytes());
        }
        bytes.into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Vec<RistrettoPoint>, String> {
        if bytes.len() % 32 != 0 {
            return Err(format!("point list of {} bytes is not a multiple of 32", bytes.len()));
        }
        bytes
            .chunks(32)
            .map(|chunk| point_from_bytes(chunk).ok_or_else(|| "invalid ristretto point".to_owned()))
            .collect()
    }
}
