//! Key manipulation helpers shared by binding consumers.

//---------------------------------------------------------------------------------------------------- Free functions
/// The smallest key strictly greater than every key starting with `prefix`.
///
/// Increments the rightmost byte that can be incremented and truncates the
/// rest. A prefix of all `0xff` bytes (or an empty prefix) has no successor
/// inside the user keyspace, so the end-of-keyspace marker is returned.
pub fn strinc(prefix: &[u8]) -> Vec<u8> {
    for (i, byte) in prefix.iter().enumerate().rev() {
        if *byte != 0xff {
            let mut out = prefix[..=i].to_vec();
            out[i] = byte + 1;
            return out;
        }
    }
    vec![0xff]
}

/// The exclusive upper bound `prefix ‖ 0xff` used by starts-with ranges.
///
/// Note this is not the same as [`strinc`]: it stops short of keys that
/// continue the prefix with `0xff` bytes, which is exactly the range the
/// starts-with operations are specified over.
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + 1);
    out.extend_from_slice(prefix);
    out.push(0xff);
    out
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strinc_simple() {
        assert_eq!(strinc(b"a"), b"b");
        assert_eq!(strinc(b"key1"), b"key2");
        assert_eq!(strinc(&[0x00]), vec![0x01]);
    }

    #[test]
    fn strinc_trailing_ff_truncates() {
        assert_eq!(strinc(&[0x61, 0xff, 0xff]), vec![0x62]);
        assert_eq!(strinc(&[0xff, 0xff]), vec![0xff]);
        assert_eq!(strinc(&[]), vec![0xff]);
    }

    #[test]
    fn strinc_bounds_every_prefixed_key() {
        let prefix = [0x61, 0x62];
        let inc = strinc(&prefix);
        for suffix in [&[][..], &[0x00][..], &[0xff, 0xff][..]] {
            let mut key = prefix.to_vec();
            key.extend_from_slice(suffix);
            assert!(key < inc, "{key:?} < {inc:?}");
        }
    }

    #[test]
    fn prefix_range_end_appends() {
        assert_eq!(prefix_range_end(b"p"), vec![0x70, 0xff]);
        assert_eq!(prefix_range_end(&[]), vec![0xff]);
    }
}
