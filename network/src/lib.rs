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

#[macro_use]
extern crate tracing;

pub mod config;
pub use config::*;

pub mod errors;
pub use errors::*;

pub mod handlers;

pub mod health;
pub use health::*;

pub mod message;
pub use message::*;

pub mod node;
pub use node::*;

pub mod overlay;
pub use overlay::*;

pub mod peer;
pub use peer::*;

pub mod server;
pub use server::*;

pub mod stratum;

pub mod stream;
pub use stream::*;

pub mod tasks;
