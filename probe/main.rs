/*
* Copyright 2019 Comcast Cable Communications Management, LLC
*
* Licensed under the Apache License, Version 2.0 (the "License");
* you may not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
* http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing, software
* distributed under the License is distributed on an "AS IS" BASIS,
* WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
* See the License for the specific language governing permissions and
* limitations under the License.
*
* SPDX-License-Identifier: Apache-2.0
*/

use anyhow::{Context, Result};
use flowprobe::{load_config, Eal, Runtime};
use std::io;
use std::process;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn run() -> Result<()> {
    let config = load_config()?;
    info!(?config);

    let eal = Eal::init(&config).context("failed to initialize the environment.")?;
    let mut runtime = Runtime::build(config, eal).context("bring-up failed.")?;

    for port in runtime.ports().iter() {
        info!(
            port = ?port.id(),
            name = port.name(),
            mac = %port.mac_addr(),
            rxqs = port.nb_rxq(),
            txqs = port.nb_txq(),
            "ready."
        );
    }

    runtime.shutdown();
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run() {
        error!("{:#}", err);
        process::exit(1);
    }
}
