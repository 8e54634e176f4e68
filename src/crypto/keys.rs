//! Post-quantum key management using CRYSTALS-Dilithium2.
//!
//! Dilithium2 provides NIST security level 2 with a 1312-byte public key and
//! 2420-byte signatures — the sizes the Lattice genesis `pq_config` declares.
//! Secret keys are zeroized on drop.

use std::collections::HashMap;
use std::path::Path;

use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{
    DetachedSignature as SigTrait, PublicKey as SignPkTrait, SecretKey as SignSkTrait,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{domain_message, Domain};

/// Dilithium2 public key size in bytes.
pub const DILITHIUM2_PK_BYTES: usize = 1312;
/// Dilithium2 detached signature size in bytes.
pub const DILITHIUM2_SIG_BYTES: usize = 2420;
/// Dilithium2 secret key size in bytes.
pub const DILITHIUM2_SK_BYTES: usize = 2528;

/// Errors from key loading and the sign/verify sanity check.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse key file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("key file missing required field: {0}")]
    MissingField(&'static str),
    #[error("key material is not valid hex: {0}")]
    MalformedHex(#[from] hex::FromHexError),
    #[error("invalid Dilithium2 key material")]
    InvalidKey,
    #[error("loaded keys failed the sign/verify sanity check")]
    SanityCheckFailed,
}

/// A Dilithium2 signing public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PqPublicKey(pub(crate) Vec<u8>);

/// A Dilithium2 signing secret key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PqSecretKey(pub(crate) Vec<u8>);

/// A Dilithium2 keypair bound to a validator identity.
#[derive(Clone)]
pub struct PqKeypair {
    pub public: PqPublicKey,
    secret: PqSecretKey,
}

impl PqPublicKey {
    /// Access the raw public key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Keccak-256 hash of the public key, hex-encoded. This is the
    /// `pq_pubkey_hash` recorded in genesis for each validator.
    pub fn key_hash(&self) -> String {
        super::keccak256_hex(&self.0)
    }

    /// 20-byte EVM-compatible address: the trailing 20 bytes of the
    /// Keccak-256 of the public key, `0x`-hex encoded.
    pub fn address(&self) -> String {
        let digest = super::keccak256(&self.0);
        format!("0x{}", hex::encode(&digest[12..]))
    }

    /// Verify a detached signature over a domain-separated message.
    pub fn verify_with_domain(
        &self,
        domain: Domain,
        chain_id: &str,
        message: &[u8],
        signature: &[u8],
    ) -> bool {
        let pk = match dilithium2::PublicKey::from_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig = match dilithium2::DetachedSignature::from_bytes(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let tagged = domain_message(domain, chain_id, message);
        dilithium2::verify_detached_signature(&sig, &tagged, &pk).is_ok()
    }

    /// Construct from raw bytes, validating the key size.
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        dilithium2::PublicKey::from_bytes(&bytes).ok()?;
        Some(PqPublicKey(bytes))
    }
}

impl Serialize for PqPublicKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for PqPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let text: String = serde::Deserialize::deserialize(d)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        if bytes.len() != DILITHIUM2_PK_BYTES {
            return Err(serde::de::Error::custom(format!(
                "invalid Dilithium2 public key: expected {} bytes, got {}",
                DILITHIUM2_PK_BYTES,
                bytes.len()
            )));
        }
        Ok(PqPublicKey(bytes))
    }
}

impl PqKeypair {
    /// Generate a new random Dilithium2 keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        PqKeypair {
            public: PqPublicKey(pk.as_bytes().to_vec()),
            secret: PqSecretKey(sk.as_bytes().to_vec()),
        }
    }

    /// Sign a message under the given domain, producing a detached signature.
    ///
    /// A corrupted secret key yields an empty signature rather than a panic;
    /// empty signatures always fail verification downstream.
    pub fn sign_with_domain(&self, domain: Domain, chain_id: &str, message: &[u8]) -> Vec<u8> {
        let sk = match dilithium2::SecretKey::from_bytes(&self.secret.0) {
            Ok(sk) => sk,
            Err(_) => {
                tracing::error!("sign_with_domain called with corrupted secret key");
                return Vec::new();
            }
        };
        let tagged = domain_message(domain, chain_id, message);
        dilithium2::detached_sign(&tagged, &sk).as_bytes().to_vec()
    }

    /// Construct from raw bytes, validating both key sizes.
    pub fn from_bytes(public: Vec<u8>, secret: Vec<u8>) -> Option<Self> {
        dilithium2::PublicKey::from_bytes(&public).ok()?;
        dilithium2::SecretKey::from_bytes(&secret).ok()?;
        Some(PqKeypair {
            public: PqPublicKey(public),
            secret: PqSecretKey(secret),
        })
    }
}

/// On-disk validator key file: `{name, pq_public_key, pq_private_key}` with
/// hex-encoded key material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorKeyFile {
    pub name: String,
    pub pq_public_key: String,
    pub pq_private_key: String,
}

/// A loaded validator signing identity.
pub struct ValidatorKey {
    pub name: String,
    pub keypair: PqKeypair,
}

impl ValidatorKey {
    /// Load a validator key file, pad short key material to the scheme sizes,
    /// and run a round-trip sign/verify sanity check before accepting it.
    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let raw = std::fs::read_to_string(path)?;
        let file: ValidatorKeyFile = serde_json::from_str(&raw)?;

        if file.name.is_empty() {
            return Err(KeyError::MissingField("name"));
        }
        if file.pq_public_key.is_empty() {
            return Err(KeyError::MissingField("pq_public_key"));
        }
        if file.pq_private_key.is_empty() {
            return Err(KeyError::MissingField("pq_private_key"));
        }

        let mut public = hex::decode(&file.pq_public_key)?;
        let mut secret = hex::decode(&file.pq_private_key)?;

        // Short key material is padded up to the scheme sizes; the sanity
        // check below rejects anything that does not actually sign.
        if public.len() < DILITHIUM2_PK_BYTES {
            public.resize(DILITHIUM2_PK_BYTES, 0);
        }
        if secret.len() < DILITHIUM2_SK_BYTES {
            secret.resize(DILITHIUM2_SK_BYTES, 0);
        }

        let keypair = PqKeypair::from_bytes(public, secret).ok_or(KeyError::InvalidKey)?;

        let probe = b"key_validation_test";
        let sig = keypair.sign_with_domain(Domain::Consensus, "sanity", probe);
        if !keypair
            .public
            .verify_with_domain(Domain::Consensus, "sanity", probe, &sig)
        {
            return Err(KeyError::SanityCheckFailed);
        }

        tracing::info!(
            name = %file.name,
            key_hash = %keypair.public.key_hash(),
            address = %keypair.public.address(),
            "Loaded validator key"
        );
        Ok(ValidatorKey {
            name: file.name,
            keypair,
        })
    }

    /// Serialize this key back to the file format.
    pub fn to_file(&self) -> ValidatorKeyFile {
        ValidatorKeyFile {
            name: self.name.clone(),
            pq_public_key: hex::encode(&self.keypair.public.0),
            pq_private_key: hex::encode(&self.keypair.secret.0),
        }
    }
}

/// A set of validator signing keys held by this node, indexed by validator id.
///
/// A devnet node typically holds every genesis validator key and signs as
/// whichever leader the PoS engine samples; a production validator holds one.
#[derive(Default)]
pub struct Keyring {
    keys: HashMap<String, PqKeypair>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a keypair under a validator id.
    pub fn insert(&mut self, id: String, keypair: PqKeypair) {
        self.keys.insert(id, keypair);
    }

    /// Look up the signing key for a validator id.
    pub fn get(&self, id: &str) -> Option<&PqKeypair> {
        self.keys.get(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Load every key file in a directory. Non-JSON entries are skipped;
    /// a file that parses but fails the sanity check aborts the load.
    pub fn load_dir(dir: &Path) -> Result<Self, KeyError> {
        let mut ring = Keyring::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let key = ValidatorKey::load(&path)?;
            ring.insert(key.name.clone(), key.keypair);
        }
        Ok(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = PqKeypair::generate();
        let msg = b"lattice test message";
        let sig = kp.sign_with_domain(Domain::Consensus, "88401", msg);
        assert_eq!(sig.len(), DILITHIUM2_SIG_BYTES);
        assert!(kp
            .public
            .verify_with_domain(Domain::Consensus, "88401", msg, &sig));
        assert!(!kp
            .public
            .verify_with_domain(Domain::Consensus, "88401", b"wrong message", &sig));
    }

    #[test]
    fn domains_do_not_cross_verify() {
        let kp = PqKeypair::generate();
        let msg = b"payload";
        let sig = kp.sign_with_domain(Domain::Tx, "88401", msg);
        assert!(!kp
            .public
            .verify_with_domain(Domain::Consensus, "88401", msg, &sig));
        assert!(!kp.public.verify_with_domain(Domain::Tx, "1", msg, &sig));
    }

    #[test]
    fn key_sizes() {
        let kp = PqKeypair::generate();
        assert_eq!(kp.public.0.len(), DILITHIUM2_PK_BYTES);
        assert_eq!(kp.secret.0.len(), DILITHIUM2_SK_BYTES);
    }

    #[test]
    fn key_hash_deterministic_and_unique() {
        let kp1 = PqKeypair::generate();
        let kp2 = PqKeypair::generate();
        assert_eq!(kp1.public.key_hash(), kp1.public.key_hash());
        assert_ne!(kp1.public.key_hash(), kp2.public.key_hash());
    }

    #[test]
    fn address_format() {
        let kp = PqKeypair::generate();
        let addr = kp.public.address();
        assert!(addr.starts_with("0x"));
        assert_eq!(addr.len(), 42);
    }

    #[test]
    fn from_bytes_rejects_wrong_sizes() {
        assert!(PqKeypair::from_bytes(vec![0; 10], vec![0; 10]).is_none());
        assert!(PqPublicKey::from_bytes(vec![0; 10]).is_none());
    }

    #[test]
    fn key_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validator_1_keys.json");
        let kp = PqKeypair::generate();
        let key = ValidatorKey {
            name: "validator_1".into(),
            keypair: kp.clone(),
        };
        std::fs::write(&path, serde_json::to_vec(&key.to_file()).unwrap()).unwrap();

        let loaded = ValidatorKey::load(&path).unwrap();
        assert_eq!(loaded.name, "validator_1");
        assert_eq!(loaded.keypair.public, kp.public);
    }

    #[test]
    fn key_file_rejects_padded_garbage() {
        // Short key material gets padded, but cannot pass the round-trip
        // sign/verify sanity check.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_keys.json");
        let file = ValidatorKeyFile {
            name: "bad".into(),
            pq_public_key: hex::encode([7u8; 64]),
            pq_private_key: hex::encode([9u8; 64]),
        };
        std::fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();
        assert!(ValidatorKey::load(&path).is_err());
    }

    #[test]
    fn key_file_rejects_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty_name.json");
        let file = ValidatorKeyFile {
            name: String::new(),
            pq_public_key: "aa".into(),
            pq_private_key: "bb".into(),
        };
        std::fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();
        assert!(matches!(
            ValidatorKey::load(&path),
            Err(KeyError::MissingField("name"))
        ));
    }

    #[test]
    fn keyring_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["validator_1", "validator_2"] {
            let key = ValidatorKey {
                name: name.into(),
                keypair: PqKeypair::generate(),
            };
            std::fs::write(
                dir.path().join(format!("{name}_keys.json")),
                serde_json::to_vec(&key.to_file()).unwrap(),
            )
            .unwrap();
        }
        // A non-JSON file must be skipped.
        std::fs::write(dir.path().join("README"), b"not a key").unwrap();

        let ring = Keyring::load_dir(dir.path()).unwrap();
        assert_eq!(ring.len(), 2);
        assert!(ring.get("validator_1").is_some());
        assert!(ring.get("validator_3").is_none());
    }
}
