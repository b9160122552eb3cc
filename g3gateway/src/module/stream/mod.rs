/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

mod copy;
pub(crate) use copy::{DEFAULT_COPY_BUFFER_SIZE, StreamCopy, StreamCopyError};

mod count;
pub(crate) use count::{
    ArcStreamReadStats, ArcStreamWriteStats, CountingReader, CountingWriter, StreamReadStats,
    StreamWriteStats,
};

mod relay;
pub(crate) use relay::{RelayError, RelayStats, relay};
