use {
    super::*,
    bitcoin::{Address, PubkeyHash, ScriptHash, address::NetworkUnchecked},
};

/// Base58check payloads with a one or two byte (big-endian) version, mapped
/// to P2PKH or P2SH by the chain's version numbers.
fn base58_script(address: &str, chain: Chain) -> Option<ScriptBuf> {
    let payload = base58::decode_check(address).ok()?;

    let (version, hash) = match payload.len() {
        21 => (u16::from(payload[0]), &payload[1..]),
        22 => (u16::from_be_bytes([payload[0], payload[1]]), &payload[2..]),
        _ => return None,
    };

    if version == chain.pubkey_hash() {
        Some(ScriptBuf::new_p2pkh(&PubkeyHash::from_slice(hash).ok()?))
    } else if version == chain.script_hash() {
        Some(ScriptBuf::new_p2sh(&ScriptHash::from_slice(hash).ok()?))
    } else {
        None
    }
}

/// Output script paying to `address` on `chain`.
pub(crate) fn address_to_script(address: &str, chain: Chain) -> Result<Vec<u8>> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .ok()
        .and_then(|parsed| parsed.require_network(chain.network()).ok())
        .map(|parsed| parsed.script_pubkey())
        .or_else(|| base58_script(address, chain))
        .map(ScriptBuf::into_bytes)
        .ok_or_else(|| anyhow!("address `{address}` has no matching output script on {chain}"))
}
