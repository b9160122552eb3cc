/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::Context;
use log::{debug, error, info};

fn main() -> anyhow::Result<()> {
    let Some(proc_args) =
        g3gateway::opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    let config = g3gateway::config::load(&proc_args.config_file)?;

    let verbose_level = config
        .log_verbosity()
        .map(|v| v.max(proc_args.verbose_level))
        .unwrap_or(proc_args.verbose_level);
    let _log_guard = g3gateway::log::setup(verbose_level).context("failed to setup logger")?;
    debug!("loaded config from {}", proc_args.config_file.display());

    if proc_args.test_config {
        info!("the format of the config file is ok");
        return Ok(());
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    match rt.block_on(g3gateway::serve::run(config)) {
        Ok(_) => Ok(()),
        Err(e) => {
            error!("{e:?}");
            Err(e)
        }
    }
}
