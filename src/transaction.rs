//! Transactions: the transfer payload carried by DAG blocks.
//!
//! A transaction is identified by the Keccak-256 of its canonical preimage
//! (see [`Transaction::compute_hash`]). The pair `(from, nonce)` is unique in
//! the pending set; the mempool enforces this through nonce-window validation
//! and the producer through its per-account inclusion rule.

use serde::{Deserialize, Serialize};

/// A value transfer between two accounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content digest, `0x`-prefixed hex of the Keccak-256 preimage.
    pub hash: String,
    /// Sender address (`0x` + 20-byte hex).
    pub from: String,
    /// Recipient address, distinct from `from`.
    pub to: String,
    /// Transferred value; strictly positive.
    pub value: u128,
    /// Offered gas price; at least the mempool minimum.
    pub gas_price: u128,
    /// Gas budget for this transaction, in `[1, max_gas_limit]`.
    pub gas_limit: u64,
    /// Per-account sequence number.
    pub nonce: u64,
    /// Opaque call data; may be empty.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Unix seconds at submission.
    pub timestamp: i64,
}

impl Transaction {
    /// Build a transaction and stamp its canonical hash.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        value: u128,
        gas_price: u128,
        gas_limit: u64,
        nonce: u64,
        data: Vec<u8>,
        timestamp: i64,
    ) -> Self {
        let mut tx = Transaction {
            hash: String::new(),
            from: from.into(),
            to: to.into(),
            value,
            gas_price,
            gas_limit,
            nonce,
            data,
            timestamp,
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// Canonical hash preimage.
    ///
    /// Protocol-defined layout: every variable-length field is prefixed with
    /// its byte length as a big-endian `u32`; integers are fixed-width
    /// big-endian (`u128` for value and gas price, `u64` for gas limit and
    /// nonce, `i64` for the timestamp). Fields appear in declaration order:
    /// `from, to, value, gas_price, gas_limit, nonce, data, timestamp`.
    pub fn preimage(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.data.len());
        put_bytes(&mut out, self.from.as_bytes());
        put_bytes(&mut out, self.to.as_bytes());
        out.extend_from_slice(&self.value.to_be_bytes());
        out.extend_from_slice(&self.gas_price.to_be_bytes());
        out.extend_from_slice(&self.gas_limit.to_be_bytes());
        out.extend_from_slice(&self.nonce.to_be_bytes());
        put_bytes(&mut out, &self.data);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out
    }

    /// The canonical content hash: `0x` + hex(Keccak-256(preimage)).
    pub fn compute_hash(&self) -> String {
        format!("0x{}", crate::crypto::keccak256_hex(&self.preimage()))
    }

    /// Worst-case cost the sender must be able to cover:
    /// `value + gas_price * gas_limit`. `None` on overflow.
    pub fn max_cost(&self) -> Option<u128> {
        self.gas_price
            .checked_mul(self.gas_limit as u128)
            .and_then(|gas| self.value.checked_add(gas))
    }
}

/// Append a length-prefixed byte field.
pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction::new(
            "0x1111111111111111111111111111111111111111",
            "0x2222222222222222222222222222222222222222",
            100,
            1_000_000_000,
            21_000,
            0,
            vec![],
            1_700_000_000,
        )
    }

    #[test]
    fn hash_is_deterministic() {
        let a = sample_tx();
        let b = sample_tx();
        assert_eq!(a.hash, b.hash);
        assert!(a.hash.starts_with("0x"));
        assert_eq!(a.hash.len(), 66);
    }

    #[test]
    fn hash_binds_every_field() {
        let base = sample_tx();
        let mut other = base.clone();
        other.nonce = 1;
        assert_ne!(base.hash, other.compute_hash());

        let mut other = base.clone();
        other.data = vec![1];
        assert_ne!(base.hash, other.compute_hash());

        let mut other = base.clone();
        other.value = 101;
        assert_ne!(base.hash, other.compute_hash());
    }

    #[test]
    fn length_prefix_prevents_field_bleed() {
        // "ab" + "c" must hash differently from "a" + "bc".
        let a = Transaction::new("ab", "c", 1, 1, 1, 0, vec![], 0);
        let b = Transaction::new("a", "bc", 1, 1, 1, 0, vec![], 0);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn max_cost() {
        let tx = sample_tx();
        assert_eq!(tx.max_cost(), Some(100 + 1_000_000_000 * 21_000));

        let mut overflowing = sample_tx();
        overflowing.value = u128::MAX;
        overflowing.gas_price = 2;
        assert_eq!(overflowing.max_cost(), None);
    }

    #[test]
    fn serde_roundtrip() {
        let tx = sample_tx();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }
}
