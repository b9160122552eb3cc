/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

pub(crate) mod addr;
pub(crate) mod affinity;
pub(crate) mod http;
pub(crate) mod io;
pub(crate) mod net;
pub(crate) mod socks;
pub(crate) mod stream;
pub(crate) mod tls;
