//! Fixed-width big-integer log sequence numbers.
//!
//! An LSN's numeric value equals `first_lsn` plus the byte offset of its
//! record from the first record in the log, so a 64-bit LSN would wrap
//! around on a sufficiently long-running log. [`Lsn`] uses
//! [`LSN_LIMBS`] 64-bit limbs (256 bits by default) so that never happens in
//! practice.

use crate::error::{WaleError, WaleResult};

/// Number of `u64` limbs making up an [`Lsn`]. Limb 0 is least significant.
pub const LSN_LIMBS: usize = 4;

/// A fixed-width unsigned integer identifying a position in the log.
///
/// `Lsn::INVALID` (all-zero limbs) means "no such LSN"; addressable LSNs lie
/// in `[1, max_limit]` for some per-instance `max_limit`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Lsn([u64; LSN_LIMBS]);

impl Lsn {
    /// The distinguished "no such LSN" value.
    pub const INVALID: Lsn = Lsn([0; LSN_LIMBS]);

    /// The largest representable LSN (all limbs set).
    pub const MAX: Lsn = Lsn([u64::MAX; LSN_LIMBS]);

    /// Construct an `Lsn` from a plain `u64`, zero-extended into the higher
    /// limbs.
    pub const fn from_u64(value: u64) -> Self {
        let mut limbs = [0u64; LSN_LIMBS];
        limbs[0] = value;
        Lsn(limbs)
    }

    /// `true` unless this is [`Lsn::INVALID`].
    pub fn is_valid(&self) -> bool {
        *self != Lsn::INVALID
    }

    /// Read-only access to the limbs, least-significant first.
    pub fn limbs(&self) -> &[u64; LSN_LIMBS] {
        &self.0
    }

    /// Construct from limbs, least-significant first.
    pub const fn from_limbs(limbs: [u64; LSN_LIMBS]) -> Self {
        Lsn(limbs)
    }

    /// Add `other` to `self`, ignoring overflow. Returns `(result, carry)`
    /// where `carry` is `true` if the true sum did not fit in
    /// `LSN_LIMBS` limbs.
    pub fn add_unsafe(&self, other: &Lsn) -> (Lsn, bool) {
        let mut out = [0u64; LSN_LIMBS];
        let mut carry = false;
        for i in 0..LSN_LIMBS {
            let (sum1, c1) = self.0[i].overflowing_add(other.0[i]);
            let (sum2, c2) = sum1.overflowing_add(carry as u64);
            out[i] = sum2;
            carry = c1 || c2;
        }
        (Lsn(out), carry)
    }

    /// Subtract `other` from `self`, ignoring underflow. Returns
    /// `(result, borrow)` where `borrow` is `true` if `other > self`.
    pub fn sub_unsafe(&self, other: &Lsn) -> (Lsn, bool) {
        let mut out = [0u64; LSN_LIMBS];
        let mut borrow = false;
        for i in 0..LSN_LIMBS {
            let (diff1, b1) = self.0[i].overflowing_sub(other.0[i]);
            let (diff2, b2) = diff1.overflowing_sub(borrow as u64);
            out[i] = diff2;
            borrow = b1 || b2;
        }
        (Lsn(out), borrow)
    }

    /// Add `other` to `self`, failing if the result overflows or exceeds
    /// `max_limit`.
    pub fn add_with_limit(&self, other: &Lsn, max_limit: &Lsn) -> WaleResult<Lsn> {
        let (sum, carry) = self.add_unsafe(other);
        if carry || sum > *max_limit {
            return Err(WaleError::ParamInvalid(format!(
                "lsn arithmetic would exceed max_limit {max_limit:?}"
            )));
        }
        Ok(sum)
    }

    /// Subtract `other` from `self`, failing on borrow.
    pub fn sub(&self, other: &Lsn) -> WaleResult<Lsn> {
        let (diff, borrow) = self.sub_unsafe(other);
        if borrow {
            return Err(WaleError::ParamInvalid(format!(
                "lsn subtraction underflow: {self:?} - {other:?}"
            )));
        }
        Ok(diff)
    }

    /// Emit the `width` least-significant bytes, little-endian. Fails if any
    /// truncated (higher) bits are non-zero.
    pub fn serialize(&self, width: usize) -> WaleResult<Vec<u8>> {
        let full = self.to_le_bytes();
        if width >= full.len() {
            let mut out = vec![0u8; width];
            out[..full.len()].copy_from_slice(&full);
            return Ok(out);
        }

        if full[width..].iter().any(|&b| b != 0) {
            return Err(WaleError::ParamInvalid(format!(
                "lsn does not fit in {width} bytes"
            )));
        }
        Ok(full[..width].to_vec())
    }

    /// Inverse of [`Lsn::serialize`]: build an `Lsn` from little-endian
    /// bytes, zero-extending if `bytes` is shorter than the full width.
    pub fn deserialize(bytes: &[u8]) -> Lsn {
        let mut limbs = [0u64; LSN_LIMBS];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let start = i * 8;
            if start >= bytes.len() {
                break;
            }
            let end = (start + 8).min(bytes.len());
            let mut buf = [0u8; 8];
            buf[..end - start].copy_from_slice(&bytes[start..end]);
            *limb = u64::from_le_bytes(buf);
        }
        Lsn(limbs)
    }

    fn to_le_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LSN_LIMBS * 8);
        for limb in self.0 {
            out.extend_from_slice(&limb.to_le_bytes());
        }
        out
    }

    /// Narrow to a plain `u64`, failing if any limb above limb 0 is
    /// non-zero.
    pub fn cast_to_u64(&self) -> WaleResult<u64> {
        if self.0[1..].iter().any(|&limb| limb != 0) {
            return Err(WaleError::ParamInvalid(
                "lsn does not fit in a u64".to_string(),
            ));
        }
        Ok(self.0[0])
    }
}

impl Ord for Lsn {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for i in (0..LSN_LIMBS).rev() {
            match self.0[i].cmp(&other.0[i]) {
                std::cmp::Ordering::Equal => continue,
                ord => return ord,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl PartialOrd for Lsn {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_valid() {
            return write!(f, "INVALID");
        }
        match self.cast_to_u64() {
            Ok(v) => write!(f, "{v}"),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}
