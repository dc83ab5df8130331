//! Pedersen commitments on secp256k1.
//!
//! `C = v·G + r·H` where `G` is the curve base point and `H` is a nothing-up-
//! my-sleeve generator found by try-and-increment over Keccak outputs.
//! Points travel as two big-endian coordinate words; the identity is `(0, 0)`.

use std::fmt;
use std::sync::OnceLock;

use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{decimal, keccak256_concat, UtxoError, MAX_UTXO_VALUE};

/// Domain tag for the `H` generator search.
pub const GENERATOR_H_DOMAIN: &[u8] = b"zkutxo/pedersen/H/v1";

static GENERATOR_H: OnceLock<ProjectivePoint> = OnceLock::new();

/// The second Pedersen generator.
pub fn generator_h() -> ProjectivePoint {
    *GENERATOR_H.get_or_init(derive_generator_h)
}

fn derive_generator_h() -> ProjectivePoint {
    let mut counter: u32 = 0;
    loop {
        let x = keccak256_concat(&[GENERATOR_H_DOMAIN, &counter.to_be_bytes()]);
        let mut compressed = [0u8; 33];
        compressed[0] = 0x02;
        compressed[1..].copy_from_slice(&x);
        if let Ok(encoded) = EncodedPoint::from_bytes(compressed) {
            let point: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
            if let Some(point) = point {
                return ProjectivePoint::from(point);
            }
        }
        counter = counter.wrapping_add(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMITMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Affine commitment point. Coordinates persist as decimal strings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment {
    #[serde(with = "decimal::word")]
    pub x: [u8; 32],
    #[serde(with = "decimal::word")]
    pub y: [u8; 32],
}

impl Commitment {
    pub const IDENTITY: Commitment = Commitment {
        x: [0u8; 32],
        y: [0u8; 32],
    };

    pub fn from_point(point: &ProjectivePoint) -> Self {
        let encoded = point.to_affine().to_encoded_point(false);
        match (encoded.x(), encoded.y()) {
            (Some(x), Some(y)) => {
                let mut cx = [0u8; 32];
                let mut cy = [0u8; 32];
                cx.copy_from_slice(x);
                cy.copy_from_slice(y);
                Commitment { x: cx, y: cy }
            }
            _ => Commitment::IDENTITY,
        }
    }

    /// Decodes back to a curve point, rejecting coordinates off the curve.
    pub fn to_point(&self) -> Result<ProjectivePoint, UtxoError> {
        if *self == Commitment::IDENTITY {
            return Ok(ProjectivePoint::IDENTITY);
        }
        let encoded = EncodedPoint::from_affine_coordinates(
            &FieldBytes::from(self.x),
            &FieldBytes::from(self.y),
            false,
        );
        let point: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
        point
            .map(ProjectivePoint::from)
            .ok_or_else(|| UtxoError::Encoding("commitment is not a point on secp256k1".into()))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commitment")
            .field("x", &format_args!("0x{}", hex::encode(self.x)))
            .field("y", &format_args!("0x{}", hex::encode(self.y)))
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLINDING FACTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Secret commitment randomness. `Debug` is redacted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlindingFactor(Scalar);

impl BlindingFactor {
    pub fn random() -> Self {
        BlindingFactor(Scalar::random(&mut OsRng))
    }

    pub fn zero() -> Self {
        BlindingFactor(Scalar::ZERO)
    }

    pub fn from_u64(value: u64) -> Self {
        BlindingFactor(Scalar::from(value))
    }

    /// Canonical big-endian scalar; values at or above the group order are rejected.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, UtxoError> {
        let scalar: Option<Scalar> = Scalar::from_repr(FieldBytes::from(bytes)).into();
        scalar
            .map(BlindingFactor)
            .ok_or_else(|| UtxoError::Range("blinding factor exceeds the group order".into()))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.to_repr());
        out
    }

    pub fn scalar(&self) -> &Scalar {
        &self.0
    }

    pub fn add(&self, other: &BlindingFactor) -> BlindingFactor {
        BlindingFactor(self.0 + other.0)
    }

    pub fn sub(&self, other: &BlindingFactor) -> BlindingFactor {
        BlindingFactor(self.0 - other.0)
    }
}

impl fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingFactor(<redacted>)")
    }
}

impl Serialize for BlindingFactor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&decimal::word::to_decimal(&self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for BlindingFactor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = decimal::word::from_decimal(&raw)
            .ok_or_else(|| de::Error::custom("invalid blinding factor"))?;
        BlindingFactor::from_bytes(bytes).map_err(de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds and checks Pedersen commitments.
#[derive(Clone)]
pub struct CommitmentEngine {
    h: ProjectivePoint,
}

impl Default for CommitmentEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitmentEngine {
    pub fn new() -> Self {
        Self { h: generator_h() }
    }

    /// Commits to `value`. A fresh blinding factor is drawn from the OS RNG when
    /// none is supplied.
    pub fn commit(
        &self,
        value: u128,
        blinding: Option<BlindingFactor>,
    ) -> Result<(Commitment, BlindingFactor), UtxoError> {
        let value = check_value(value)?;
        let blinding = blinding.unwrap_or_else(BlindingFactor::random);
        let point = self.commit_point(value, &blinding);
        Ok((Commitment::from_point(&point), blinding))
    }

    pub fn commit_point(&self, value: u64, blinding: &BlindingFactor) -> ProjectivePoint {
        ProjectivePoint::GENERATOR * Scalar::from(value) + self.h * blinding.0
    }

    /// Whether `commitment` opens to `(value, blinding)`.
    pub fn verify_opening(
        &self,
        commitment: &Commitment,
        value: u64,
        blinding: &BlindingFactor,
    ) -> bool {
        Commitment::from_point(&self.commit_point(value, blinding)) == *commitment
    }

    /// Point addition of two commitments.
    pub fn add(&self, a: &Commitment, b: &Commitment) -> Result<Commitment, UtxoError> {
        Ok(Commitment::from_point(&(a.to_point()? + b.to_point()?)))
    }

    pub fn sum(&self, items: &[Commitment]) -> Result<Commitment, UtxoError> {
        let mut acc = ProjectivePoint::IDENTITY;
        for item in items {
            acc += item.to_point()?;
        }
        Ok(Commitment::from_point(&acc))
    }

    /// `Σ inputs == Σ outputs` on the curve.
    pub fn verify_balance(
        &self,
        inputs: &[Commitment],
        outputs: &[Commitment],
    ) -> Result<bool, UtxoError> {
        Ok(self.sum(inputs)? == self.sum(outputs)?)
    }

    /// Blinding factors for `count` split outputs that sum to `input`.
    ///
    /// All but the last are random; the last absorbs the difference.
    pub fn split_blindings(&self, input: &BlindingFactor, count: usize) -> Vec<BlindingFactor> {
        if count == 0 {
            return Vec::new();
        }
        let mut factors: Vec<BlindingFactor> =
            (0..count - 1).map(|_| BlindingFactor::random()).collect();
        let used = factors
            .iter()
            .fold(BlindingFactor::zero(), |acc, r| acc.add(r));
        factors.push(input.sub(&used));
        factors
    }
}

fn check_value(value: u128) -> Result<u64, UtxoError> {
    if value > MAX_UTXO_VALUE {
        return Err(UtxoError::Range(format!(
            "value {value} exceeds ceiling {MAX_UTXO_VALUE}"
        )));
    }
    Ok(value as u64)
}
