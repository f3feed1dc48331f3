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

use strata_objects::{BlockError, CryptoError, TransactionError};
use strata_storage::StorageError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("{}", _0)]
    BlockError(#[from] BlockError),

    #[error("{}", _0)]
    TransactionError(#[from] TransactionError),

    #[error("{}", _0)]
    StorageError(#[from] StorageError),

    #[error("{}", _0)]
    CryptoError(#[from] CryptoError),

    #[error("invalid block {}: {}", _0, _1)]
    InvalidBlock(String, String),

    #[error("no chain tip available")]
    NoTip,

    #[error("{}", _0)]
    Message(String),
}
