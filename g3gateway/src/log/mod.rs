/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use anyhow::Context;
use slog::{Drain, Logger, slog_o};
use slog_scope::GlobalLoggerGuard;

mod stdio;
use stdio::AsyncStdioDrain;

pub(crate) mod task;

const PROCESS_LOG_THREAD_NAME: &str = "log-process";
const LOG_TYPE_TASK: &str = "Task";

/// Install the process logger, the returned guard should be kept until exit.
pub fn setup(verbose_level: u8) -> anyhow::Result<GlobalLoggerGuard> {
    let drain = AsyncStdioDrain::new(PROCESS_LOG_THREAD_NAME, true)
        .context("failed to spawn log thread")?;
    let logger = Logger::root(drain.fuse(), slog_o!());

    let scope_guard = slog_scope::set_global_logger(logger);

    let log_level = match verbose_level {
        0 => log::Level::Warn,
        1 => log::Level::Info,
        2 => log::Level::Debug,
        _ => log::Level::Trace,
    };

    slog_stdlog::init_with_level(log_level).context("failed to set std logger")?;
    Ok(scope_guard)
}

pub(crate) fn get_task_logger() -> Logger {
    slog_scope::logger().new(slog_o!(
        "log_type" => LOG_TYPE_TASK,
        "pid" => std::process::id(),
    ))
}
