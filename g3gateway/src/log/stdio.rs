/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt::{self, Write as _};
use std::io::{self, Write};

use chrono::Local;
use flume::{Receiver, Sender, TrySendError};
use slog::{Drain, KV, Level, OwnedKVList, Record, Serializer};

const CHANNEL_CAPACITY: usize = 1024;

pub(super) struct StdLogValue {
    level: Level,
    message: String,
    kv_pairs: Vec<(String, String)>,
    location: Option<String>,
}

impl StdLogValue {
    fn message_str(&self) -> &str {
        if self.message.is_empty() {
            "()"
        } else {
            &self.message
        }
    }

    fn write_plain<IO: Write>(&self, io: &mut IO) -> io::Result<()> {
        let datetime = Local::now();
        write!(io, "{}", datetime.format("%Y-%m-%d %H:%M:%S%.6f"))?;
        write!(io, " {}", self.level.as_short_str())?;
        for (k, v) in &self.kv_pairs {
            write!(io, " {k}: {v},")?;
        }
        write!(io, " {}", self.message_str())?;
        if let Some(location) = &self.location {
            write!(io, " <{location}>")?;
        }
        writeln!(io)
    }
}

struct KvCollector<'a>(&'a mut Vec<(String, String)>);

impl Serializer for KvCollector<'_> {
    fn emit_arguments(&mut self, key: slog::Key, val: &fmt::Arguments) -> slog::Result {
        let mut value = String::with_capacity(32);
        let _ = value.write_fmt(*val);
        self.0.push((key.to_string(), value));
        Ok(())
    }
}

/// A slog drain which hands the records over to a dedicated writer thread.
///
/// Records are dropped when the channel is full.
pub(super) struct AsyncStdioDrain {
    sender: Sender<StdLogValue>,
    append_code_position: bool,
}

impl AsyncStdioDrain {
    pub(super) fn new(thread_name: &str, append_code_position: bool) -> io::Result<Self> {
        let (sender, receiver) = flume::bounded::<StdLogValue>(CHANNEL_CAPACITY);
        let _detached_thread = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run_stderr(receiver))?;
        Ok(AsyncStdioDrain {
            sender,
            append_code_position,
        })
    }

    fn format(&self, record: &Record, logger_values: &OwnedKVList) -> slog::Result<StdLogValue> {
        let mut kv_pairs = Vec::new();
        let mut collector = KvCollector(&mut kv_pairs);
        logger_values.serialize(record, &mut collector)?;
        record.kv().serialize(record, &mut collector)?;

        let location = if self.append_code_position {
            let location = match record.file().rsplit_once('/').map(|x| x.1) {
                Some(filename) => format!("{}({filename}:{})", record.module(), record.line()),
                None => record.module().to_string(),
            };
            Some(location)
        } else {
            None
        };

        Ok(StdLogValue {
            level: record.level(),
            message: record.msg().to_string(),
            kv_pairs,
            location,
        })
    }
}

impl Drain for AsyncStdioDrain {
    type Ok = ();
    type Err = slog::Error;

    fn log(&self, record: &Record, logger_values: &OwnedKVList) -> Result<(), slog::Error> {
        let v = self.format(record, logger_values)?;
        match self.sender.try_send(v) {
            Ok(_) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(slog::Error::Other),
        }
    }
}

fn run_stderr(receiver: Receiver<StdLogValue>) {
    let mut io = io::stderr();
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    while let Ok(v) = receiver.recv() {
        buf.clear();
        let _ = v.write_plain(&mut buf);
        let _ = io.write_all(&buf);

        while let Ok(v) = receiver.try_recv() {
            buf.clear();
            let _ = v.write_plain(&mut buf);
            let _ = io.write_all(&buf);
        }

        let _ = io.flush();
    }
}
