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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hex encoding: {}", _0)]
    Hex(#[from] hex::FromHexError),

    #[error("invalid base64 encoding: {}", _0)]
    Base64(#[from] base64::DecodeError),

    #[error("{}", _0)]
    Secp256k1(#[from] secp256k1::Error),

    #[error("signature does not verify")]
    InvalidSignature,
}

/// Possible transaction verification errors.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("invalid transaction: {}", _0)]
    InvalidTransaction(String),

    #[error("invalid transaction signature")]
    InvalidTransactionSignature,

    #[error("missing input transaction {}", _0)]
    MissingInputTransaction(String),

    #[error("not enough money: inputs {} outputs {} fee {}", _0, _1, _2)]
    NotEnoughMoney(u64, u64, u64),

    #[error("transaction input {} used more than once", _0)]
    TransactionInputOutputMismatch(String),

    #[error("total value mismatch: inputs {} outputs {} fee {}", _0, _1, _2)]
    TotalValueMismatch(u64, u64, u64),

    #[error("{}", _0)]
    CryptoError(#[from] CryptoError),
}

/// Possible block verification errors.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("invalid block {}: {}", _0, _1)]
    InvalidBlock(String, String),

    #[error("block hash {} does not match header", _0)]
    HashMismatch(String),

    #[error("block signature does not verify under {}", _0)]
    InvalidBlockSignature(String),

    #[error("transaction input {} reused within the block", _0)]
    DuplicateInput(String),

    #[error("{}", _0)]
    TransactionError(#[from] TransactionError),

    #[error("{}", _0)]
    CryptoError(#[from] CryptoError),
}
