/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use slog::{Logger, slog_info};

use crate::serve::{ServerTaskError, ServerTaskNotes};

pub(crate) struct TaskLogForHttpForward<'a> {
    pub(crate) logger: &'a Logger,
    pub(crate) task_notes: &'a ServerTaskNotes,
    pub(crate) method: &'a str,
    pub(crate) url: &'a str,
    pub(crate) proxy: Option<&'a str>,
    pub(crate) mitm: bool,
    pub(crate) status: Option<u16>,
    pub(crate) bytes_sent: u64,
    pub(crate) bytes_received: u64,
}

impl TaskLogForHttpForward<'_> {
    pub(crate) fn log(&self, e: &ServerTaskError) {
        slog_info!(self.logger, "{}", e;
            "task_type" => "HttpForward",
            "task_id" => %self.task_notes.id,
            "start_at" => %self.task_notes.start_at.to_rfc3339(),
            "client_addr" => %self.task_notes.client_addr,
            "mitm" => self.mitm,
            "method" => self.method,
            "url" => self.url,
            "proxy" => self.proxy,
            "status" => self.status,
            "bytes_sent" => self.bytes_sent,
            "bytes_received" => self.bytes_received,
            "total_time" => ?self.task_notes.time_elapsed(),
            "reason" => e.brief(),
        )
    }
}

pub(crate) struct TaskLogForTunnel<'a> {
    pub(crate) logger: &'a Logger,
    pub(crate) task_notes: &'a ServerTaskNotes,
    pub(crate) upstream: &'a str,
    pub(crate) proxy: Option<&'a str>,
    pub(crate) client_rd_bytes: u64,
    pub(crate) client_wr_bytes: u64,
}

impl TaskLogForTunnel<'_> {
    pub(crate) fn log(&self, e: &ServerTaskError) {
        slog_info!(self.logger, "{}", e;
            "task_type" => "HttpConnect",
            "task_id" => %self.task_notes.id,
            "start_at" => %self.task_notes.start_at.to_rfc3339(),
            "client_addr" => %self.task_notes.client_addr,
            "upstream" => self.upstream,
            "proxy" => self.proxy,
            "c_rd_bytes" => self.client_rd_bytes,
            "c_wr_bytes" => self.client_wr_bytes,
            "total_time" => ?self.task_notes.time_elapsed(),
            "reason" => e.brief(),
        )
    }
}
