//! Minimal ABI call encoding for the handful of methods the pipeline
//! touches. Selectors are derived from the signature at runtime, head
//! words are 32 bytes, addresses left-padded.

use alloy_core::primitives::{Address, keccak256};

/// First four bytes of the keccak-256 hash of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// A single 32-byte head word holding a left-padded address.
fn address_word(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_slice());
    word
}

/// Calldata for a method taking one `address` argument, e.g.
/// `setRewards(address)`.
pub fn encode_call_address(signature: &str, address: Address) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend_from_slice(&address_word(address));
    out
}

/// Calldata for a no-argument getter, e.g. `rewards()`.
pub fn encode_getter(signature: &str) -> Vec<u8> {
    selector(signature).to_vec()
}

/// Initializer calldata for the rewards contract:
/// `initialize(address ledger, address admin, address operator)`.
pub fn encode_initializer(ledger: Address, admin: Address, operator: Address) -> Vec<u8> {
    let mut out = selector("initialize(address,address,address)").to_vec();
    for address in [ledger, admin, operator] {
        out.extend_from_slice(&address_word(address));
    }
    out
}

/// Constructor arguments for an ERC-1967 proxy: `(address implementation,
/// bytes initializerCalldata)`. The `bytes` head word points past the two
/// head slots; the tail is length-prefixed and zero-padded to a word.
pub fn encode_proxy_ctor(implementation: Address, init_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(96 + init_data.len().div_ceil(32) * 32);
    out.extend_from_slice(&address_word(implementation));

    let mut offset_word = [0u8; 32];
    offset_word[24..].copy_from_slice(&(64u64).to_be_bytes());
    out.extend_from_slice(&offset_word);

    let mut length_word = [0u8; 32];
    length_word[24..].copy_from_slice(&(init_data.len() as u64).to_be_bytes());
    out.extend_from_slice(&length_word);

    out.extend_from_slice(init_data);
    let padding = init_data.len().next_multiple_of(32) - init_data.len();
    out.extend(std::iter::repeat_n(0u8, padding));
    out
}

/// Decode an address from the first 32-byte return word of an `eth_call`.
///
/// Returns `None` when the payload is shorter than a word or the padding
/// bytes are non-zero (the value is not an address at all).
pub fn decode_address_word(data: &[u8]) -> Option<Address> {
    if data.len() < 32 || data[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_slice(&data[12..32]))
}
