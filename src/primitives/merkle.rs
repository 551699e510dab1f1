use super::*;

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

/// Sibling hashes on the path from the coinbase leaf to the root. `hashes`
/// are the non-coinbase txids in internal byte order. Odd levels pair their
/// last element with itself.
pub(crate) fn merkle_steps(hashes: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut level = iter::once([0u8; 32])
        .chain(hashes.iter().copied())
        .collect::<Vec<[u8; 32]>>();

    let mut steps = Vec::new();

    while level.len() > 1 {
        steps.push(level[1]);

        level = level
            .chunks(2)
            .map(|pair| hash_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }

    steps
}

pub(crate) fn merkle_root_from_steps(coinbase_hash: [u8; 32], steps: &[[u8; 32]]) -> [u8; 32] {
    steps
        .iter()
        .fold(coinbase_hash, |root, step| hash_pair(&root, step))
}

/// Slot of a merge-mined chain inside an aux merkle tree of `size` leaves.
pub(crate) fn aux_merkle_position(chain_id: u64, size: u64) -> u64 {
    1_103_515_245u64
        .wrapping_mul(chain_id)
        .wrapping_add(1_103_515_245 * 12_345)
        .wrapping_add(12_345)
        % size.max(1)
}
