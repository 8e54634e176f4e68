//! Cryptographic adapter: Keccak-256 hashing and domain-separated
//! post-quantum signing.
//!
//! All protocol hashes are Keccak-256 (the EVM-compatible variant, not
//! NIST SHA-3). Signatures are CRYSTALS-Dilithium2 and are always computed
//! over a domain-tagged message so that a signature produced in one context
//! (say, a transaction) can never be replayed in another (consensus, EVM).

pub mod keys;

use sha3::{Digest, Keccak256};

/// Compute the Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Keccak-256 digest of `data`, hex-encoded.
pub fn keccak256_hex(data: &[u8]) -> String {
    hex::encode(keccak256(data))
}

/// Signing domains. Each domain maps to a literal prefix string which is
/// Keccak-256-hashed and prepended to the message before signing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    /// Transaction signatures.
    Tx,
    /// Consensus messages: block signatures, votes.
    Consensus,
    /// EVM-compatible payloads.
    Evm,
}

impl Domain {
    /// The literal domain-separation string for this domain on `chain_id`.
    pub fn prefix(self, chain_id: &str) -> String {
        let suffix = match self {
            Domain::Tx => "TX",
            Domain::Consensus => "CONSENSUS",
            Domain::Evm => "EVM",
        };
        format!("LATTICE|L1|CHAINID:{chain_id}|{suffix}")
    }

    /// The 32-byte domain tag: Keccak-256 of the prefix string.
    pub fn tag(self, chain_id: &str) -> [u8; 32] {
        keccak256(self.prefix(chain_id).as_bytes())
    }
}

/// Build the domain-separated signing input: `tag || message`.
pub fn domain_message(domain: Domain, chain_id: &str, message: &[u8]) -> Vec<u8> {
    let tag = domain.tag(chain_id);
    let mut out = Vec::with_capacity(tag.len() + message.len());
    out.extend_from_slice(&tag);
    out.extend_from_slice(message);
    out
}
