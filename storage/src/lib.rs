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

//! The key-value/query boundary in front of the document database.
//!
//! The node only ever touches the five collections below; everything is an
//! upsert with last-writer-wins semantics for blocks at a given index and
//! upsert-by-id for transactions and shares. Methods are synchronous so a
//! verify-then-insert sequence can never suspend with the store half-written.

pub mod storage;
pub use storage::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage initialization failed: {}", _0)]
    Init(String),

    #[error("missing block at index {}", _0)]
    MissingBlock(u32),
}
