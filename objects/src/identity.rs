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

use crate::{crypto, errors::CryptoError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A self-certifying peer identity: a username signed by its own key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub public_key: String,
    pub username: String,
    pub username_signature: String,
}

impl Identity {
    pub fn new(public_key: String, username: String, username_signature: String) -> Self {
        Self {
            public_key,
            username,
            username_signature,
        }
    }

    /// Creates an identity by signing the username with the given secret key.
    pub fn generate(username: &str, keys: &crypto::KeyPair) -> Result<Self, CryptoError> {
        let username_signature = crypto::sign(username, &keys.secret_key)?;
        Ok(Self {
            public_key: keys.public_key.clone(),
            username: username.to_string(),
            username_signature,
        })
    }

    /// Whether `username_signature` is a valid signature of `username` under `public_key`.
    pub fn is_valid(&self) -> bool {
        crypto::verify(&self.username, &self.username_signature, &self.public_key).is_ok()
    }

    /// Derives the relationship id shared between this identity and another
    /// username signature. The two signatures are joined in case-insensitive
    /// sorted order so both ends derive the same id.
    pub fn generate_rid(&self, other_username_signature: &str) -> String {
        let mut signatures = [self.username_signature.as_str(), other_username_signature];
        signatures.sort_by_key(|s| s.to_lowercase());
        hex::encode(Sha256::digest(
            format!("{}{}", signatures[0], signatures[1]).as_bytes(),
        ))
    }

    pub fn address(&self) -> Result<String, CryptoError> {
        crypto::address_from_public_key(&self.public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn generated_identity_is_valid() {
        let keys = KeyPair::generate();
        let identity = Identity::generate("alice", &keys).unwrap();
        assert!(identity.is_valid());
    }

    #[test]
    fn tampered_username_is_invalid() {
        let keys = KeyPair::generate();
        let mut identity = Identity::generate("alice", &keys).unwrap();
        identity.username = "mallory".to_string();
        assert!(!identity.is_valid());
    }

    #[test]
    fn rid_is_symmetric() {
        let alice = Identity::generate("alice", &KeyPair::generate()).unwrap();
        let bob = Identity::generate("bob", &KeyPair::generate()).unwrap();
        assert_eq!(
            alice.generate_rid(&bob.username_signature),
            bob.generate_rid(&alice.username_signature)
        );
    }
}
