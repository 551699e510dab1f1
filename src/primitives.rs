use super::*;

pub(crate) use {
    address::address_to_script,
    merkle::{aux_merkle_position, merkle_root_from_steps, merkle_steps},
    target::{DIFFICULTY_1, difficulty_from_target, round_to, target_from_bits, u256_to_f64},
};

mod address;
mod merkle;
mod target;

/// Compact-size encoding used for counts and lengths in transactions.
pub(crate) fn var_int(n: u64) -> Vec<u8> {
    match n {
        0..0xfd => vec![n as u8],
        0xfd..=0xffff => {
            let mut buf = vec![0xfd];
            buf.extend_from_slice(&(n as u16).to_le_bytes());
            buf
        }
        0x1_0000..=0xffff_ffff => {
            let mut buf = vec![0xfe];
            buf.extend_from_slice(&(n as u32).to_le_bytes());
            buf
        }
        _ => {
            let mut buf = vec![0xff];
            buf.extend_from_slice(&n.to_le_bytes());
            buf
        }
    }
}

/// Script number push as used for the coinbase height and timestamp. Values
/// 1 through 16 use the single byte `OP_1`..`OP_16` form.
pub(crate) fn serialize_number(mut n: u64) -> Vec<u8> {
    if (1..=16).contains(&n) {
        return vec![0x50 + n as u8];
    }

    let mut buf = vec![0];

    while n > 0x7f {
        buf.push((n & 0xff) as u8);
        n >>= 8;
    }

    buf.push(n as u8);
    buf[0] = (buf.len() - 1) as u8;
    buf
}

pub(crate) fn sha256d(data: &[u8]) -> [u8; 32] {
    bitcoin::hashes::sha256d::Hash::hash(data).to_byte_array()
}

/// Swaps the order of the eight 32-bit words while keeping the bytes inside
/// each word, turning a daemon hash into the `mining.notify` prevhash layout.
pub(crate) fn reverse_byte_order(hash: [u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, word) in hash.chunks_exact(4).rev().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(word);
    }
    out
}

/// Decodes a display-order hash into internal byte order, zero padding short
/// input to 32 bytes before reversing.
pub(crate) fn uint256_from_hash(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str).with_context(|| format!("invalid hash hex `{hex_str}`"))?;

    ensure!(bytes.len() <= 32, "hash `{hex_str}` longer than 32 bytes");

    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(&bytes);
    out.reverse();
    Ok(out)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn case_var_int(n: u64, expected: &str) {
        pretty_assert_eq!(hex::encode(var_int(n)), expected);
    }

    #[test]
    fn var_int_boundaries() {
        case_var_int(0, "00");
        case_var_int(0xfc, "fc");
        case_var_int(0xfd, "fdfd00");
        case_var_int(0xffff, "fdffff");
        case_var_int(0x1_0000, "fe00000100");
        case_var_int(0xffff_ffff, "feffffffff");
        case_var_int(0x1_0000_0000, "ff0000000001000000");
    }

    #[track_caller]
    fn case_number(n: u64, expected: &str) {
        pretty_assert_eq!(hex::encode(serialize_number(n)), expected);
    }

    #[test]
    fn serialize_numbers() {
        case_number(0, "0100");
        case_number(1, "51");
        case_number(16, "60");
        case_number(17, "0111");
        case_number(0x7f, "017f");
        case_number(0x80, "028000");
        case_number(500_000, "0320a107");
        case_number(1_614_202_191, "044fc53660");
    }

    #[test]
    fn double_sha256() {
        let coinbase = hex::decode(
            "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff020101ffffffff0100f2052a010000001976a914614ca2f0f4baccdd63f45a0e0e0ff7ffb88041fb88ac00000000",
        )
        .unwrap();

        pretty_assert_eq!(
            hex::encode(sha256d(&coinbase)),
            "afd031100bff85a9ac01f1718be0b3d6c20228592f0242ea1e4d91a519b53031"
        );

        let header = hex::decode(
            "00000020e22777bc309503ee6be3c65f370ba629b6497dbe8b804cbd8365ef83fbae1997afd031100bff85a9ac01f1718be0b3d6c20228592f0242ea1e4d91a519b530314fc53660f0ff0f1e00001afe",
        )
        .unwrap();

        pretty_assert_eq!(
            hex::encode(sha256d(&header)),
            "6927c80704a1616664c5c91157d895587ac0381976010411cbec9aade2f75a1d"
        );
    }

    #[test]
    fn notify_prevhash_layout() {
        let hash: [u8; 32] =
            hex::decode("9719aefb83ef6583bd4c808bbe7d49b629a60b375fc6e36bee039530bc7727e2")
                .unwrap()
                .try_into()
                .unwrap();

        pretty_assert_eq!(
            hex::encode(reverse_byte_order(hash)),
            "bc7727e2ee0395305fc6e36b29a60b37be7d49b6bd4c808b83ef65839719aefb"
        );
    }

    #[test]
    fn hash_to_internal_order() {
        pretty_assert_eq!(
            hex::encode(
                uint256_from_hash(
                    "7c90a5087ac4d5b9361d47655812c89b4ad0dee6ecd5e08814d00ce7385aa317"
                )
                .unwrap()
            ),
            "17a35a38e70cd01488e0d5ece6ded04a9bc8125865471d36b9d5c47a08a5907c"
        );

        let short = uint256_from_hash("01ff").unwrap();
        assert_eq!(short[31], 0x01);
        assert_eq!(short[30], 0xff);
        assert!(short[..30].iter().all(|b| *b == 0));

        assert!(uint256_from_hash("zz").is_err());
        assert!(uint256_from_hash(&"00".repeat(33)).is_err());
    }
}
