use sha2::{Digest as _, Sha256};

/// Content-addressed 32-byte hash.
pub type Digest = [u8; 32];

/// The aggregate of an empty set.
pub const ZERO_DIGEST: Digest = [0u8; 32];

/// Deterministic hash function
pub fn hash_data(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Order-independent aggregation of per-item hashes: the digests are read
/// as big-endian 256-bit integers and summed modulo 2^256.
///
/// The sum is stable under reordering and under moving items between
/// shards, so merging children into their parent leaves every ancestor's
/// recorded digest intact. Unlike XOR, an item added twice counts twice.
pub fn add_into(acc: &mut Digest, item: &Digest) {
    let mut carry = 0u16;
    for (a, b) in acc.iter_mut().zip(item.iter()).rev() {
        let sum = u16::from(*a) + u16::from(*b) + carry;
        *a = sum as u8;
        carry = sum >> 8;
    }
}

/// Inverse of [`add_into`].
pub fn sub_from(acc: &mut Digest, item: &Digest) {
    let mut borrow = 0i16;
    for (a, b) in acc.iter_mut().zip(item.iter()).rev() {
        let mut diff = i16::from(*a) - i16::from(*b) - borrow;
        borrow = 0;
        if diff < 0 {
            diff += 256;
            borrow = 1;
        }
        *a = diff as u8;
    }
}

pub fn aggregate<'a, I>(items: I) -> Digest
where
    I: IntoIterator<Item = &'a Digest>,
{
    let mut acc = ZERO_DIGEST;
    for item in items {
        add_into(&mut acc, item);
    }
    acc
}

/// Leading 8 bytes read as a big-endian integer. This is the fixed-width
/// domain mining targets are compared in.
pub fn leading_u64(digest: &Digest) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_is_order_independent() {
        let a = hash_data(b"a");
        let b = hash_data(b"b");
        let c = hash_data(b"c");
        assert_eq!(aggregate([&a, &b, &c]), aggregate([&c, &a, &b]));
        assert_eq!(aggregate(std::iter::empty()), ZERO_DIGEST);
    }

    #[test]
    fn test_repeated_item_changes_aggregate() {
        let a = hash_data(b"a");
        let b = hash_data(b"b");
        assert_ne!(aggregate([&a, &b, &b]), aggregate([&a]));
        assert_ne!(aggregate([&b, &b]), ZERO_DIGEST);
    }

    #[test]
    fn test_add_carries_and_sub_undoes() {
        let mut acc = [0xffu8; 32];
        let mut one = ZERO_DIGEST;
        one[31] = 1;
        add_into(&mut acc, &one);
        assert_eq!(acc, ZERO_DIGEST);

        let a = hash_data(b"a");
        let b = hash_data(b"b");
        let mut acc = a;
        add_into(&mut acc, &b);
        sub_from(&mut acc, &b);
        assert_eq!(acc, a);
        sub_from(&mut acc, &a);
        assert_eq!(acc, ZERO_DIGEST);
    }

    #[test]
    fn test_leading_u64() {
        let mut d = ZERO_DIGEST;
        d[7] = 1;
        assert_eq!(leading_u64(&d), 1);
        d[0] = 0x80;
        assert_eq!(leading_u64(&d), 0x8000_0000_0000_0001);
    }
}
