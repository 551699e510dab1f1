use super::*;

/// Difficulty 1 target, `0xffff << 208`.
pub(crate) const DIFFICULTY_1: f64 =
    26959535291011309493156476344723991336010898738574164086137773096960.0;

/// Expands compact `bits` into the full target: mantissa × 256^(exponent − 3).
pub(crate) fn target_from_bits(bits: &str) -> Result<U256> {
    let bytes = hex::decode(bits).with_context(|| format!("invalid bits hex `{bits}`"))?;

    ensure!(bytes.len() == 4, "bits `{bits}` must be 4 bytes");

    let exponent = usize::from(bytes[0]);

    ensure!(
        exponent <= 32,
        "bits `{bits}` exponent {exponent} exceeds 32 bytes"
    );

    let mantissa = U256::from_big_endian(&bytes[1..]);

    Ok(if exponent >= 3 {
        mantissa << (8 * (exponent - 3))
    } else {
        mantissa >> (8 * (3 - exponent))
    })
}

pub(crate) fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}

pub(crate) fn difficulty_from_target(target: U256) -> f64 {
    round_to(DIFFICULTY_1 / u256_to_f64(target), 9)
}

pub(crate) fn round_to(n: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (n * factor).round() / factor
}
