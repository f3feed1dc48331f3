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

use strata_consensus::ConsensusError;
use strata_objects::CryptoError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("{}", _0)]
    Io(#[from] std::io::Error),

    #[error("{}", _0)]
    Json(#[from] serde_json::Error),

    #[error("codec failure: {}", _0)]
    Codec(String),

    #[error("the stream has been closed")]
    StreamClosed,

    #[error("the operation timed out")]
    Timeout,

    #[error("the peer is at capacity")]
    Capacity,

    #[error("{}", _0)]
    ConsensusError(#[from] ConsensusError),

    #[error("{}", _0)]
    CryptoError(#[from] CryptoError),

    #[error("{}", _0)]
    Message(String),
}

impl From<tokio_util::codec::LinesCodecError> for NetworkError {
    fn from(error: tokio_util::codec::LinesCodecError) -> Self {
        NetworkError::Codec(error.to_string())
    }
}
