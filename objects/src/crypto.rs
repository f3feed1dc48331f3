// Copyright (C) 2020-2023 The Strata Team
// This file is part of the strata library.

// The strata library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The strata library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the strata library. If not, see <https://www.gnu.org/licenses/>.

//! Signing, hashing and address derivation over secp256k1.
//!
//! Every signature on the wire is a base64-encoded DER signature over the
//! sha256 digest of a UTF-8 message; hashes are lowercase hex.

use crate::errors::CryptoError;

use base64::Engine;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// The version byte prepended to hashed public keys when deriving addresses.
const ADDRESS_VERSION: u8 = 0x00;

/// Returns the hex-encoded sha256 digest of a message.
pub fn hash(message: &str) -> String {
    hex::encode(Sha256::digest(message.as_bytes()))
}

fn digest32(message: &str) -> Message {
    let digest: [u8; 32] = Sha256::digest(message.as_bytes()).into();
    Message::from_digest(digest)
}

/// Signs a message with a hex-encoded secret key, returning a base64 DER signature.
pub fn sign(message: &str, secret_key_hex: &str) -> Result<String, CryptoError> {
    let secret_key = SecretKey::from_slice(&hex::decode(secret_key_hex)?)?;
    let signature = SECP.sign_ecdsa(&digest32(message), &secret_key);
    Ok(base64::engine::general_purpose::STANDARD.encode(signature.serialize_der()))
}

/// Verifies a base64 DER signature over a message against a hex-encoded public key.
pub fn verify(message: &str, signature_b64: &str, public_key_hex: &str) -> Result<(), CryptoError> {
    let signature_der = base64::engine::general_purpose::STANDARD.decode(signature_b64)?;
    let signature = Signature::from_der(&signature_der)?;
    let public_key = PublicKey::from_slice(&hex::decode(public_key_hex)?)?;
    SECP.verify_ecdsa(&digest32(message), &signature, &public_key)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Derives the base58check address for a hex-encoded compressed public key.
pub fn address_from_public_key(public_key_hex: &str) -> Result<String, CryptoError> {
    let public_key = hex::decode(public_key_hex)?;
    let sha = Sha256::digest(&public_key);
    let rip = Ripemd160::digest(sha);

    let mut payload = Vec::with_capacity(25);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(&rip);

    let checksum = Sha256::digest(Sha256::digest(&payload));
    payload.extend_from_slice(&checksum[..4]);

    Ok(bs58::encode(payload).into_string())
}

/// A secp256k1 keypair in the hex form used throughout the node.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub secret_key: String,
    pub public_key: String,
}

impl KeyPair {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        let (secret_key, public_key) = SECP.generate_keypair(&mut OsRng);
        Self {
            secret_key: hex::encode(secret_key.secret_bytes()),
            public_key: hex::encode(public_key.serialize()),
        }
    }

    pub fn address(&self) -> Result<String, CryptoError> {
        address_from_public_key(&self.public_key)
    }
}
