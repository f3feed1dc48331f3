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

use strata::{
    config::{Cli, NodeConfig},
    init::{initialize_logger, start},
};

use clap::Parser;
use tokio::runtime;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = NodeConfig::load(&cli.config)?;
    if let Some(network) = &cli.network {
        config.network = network.parse().map_err(anyhow::Error::msg)?;
    }
    config.check()?;

    initialize_logger(cli.verbose);

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_stack_size(8 * 1024 * 1024)
        .build()?;

    runtime.block_on(async move {
        let _node = start(config).await?;
        std::future::pending::<()>().await;
        Ok(())
    })
}
