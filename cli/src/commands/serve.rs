// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::server::{start_server, ListenOverrides};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (default: network.bind_address)
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on (default: network.port)
    #[arg(short, long, env = "CONCORD_PORT", value_name = "PORT")]
    pub port: Option<u16>,
}

pub async fn execute(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    start_server(
        config_path,
        ListenOverrides {
            host: args.host,
            port: args.port,
        },
    )
    .await
}
