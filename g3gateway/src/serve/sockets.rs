/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use foldhash::fast::FixedState;
use log::debug;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SocketKind {
    Client,
    Mitm,
    Upstream,
}

impl SocketKind {
    fn as_str(&self) -> &'static str {
        match self {
            SocketKind::Client => "client",
            SocketKind::Mitm => "mitm",
            SocketKind::Upstream => "upstream",
        }
    }
}

struct SocketEntry {
    kind: SocketKind,
    peer: String,
    token: CancellationToken,
}

/// All live sockets, so they can be closed at once when the server stops.
pub(crate) struct SocketSet {
    enabled: bool,
    next_id: AtomicU64,
    inner: Mutex<HashMap<u64, SocketEntry, FixedState>>,
}

pub(crate) type ArcSocketSet = Arc<SocketSet>;

impl SocketSet {
    pub(crate) fn new(enabled: bool) -> Self {
        SocketSet {
            enabled,
            next_id: AtomicU64::new(0),
            inner: Mutex::new(HashMap::with_hasher(FixedState::default())),
        }
    }

    fn register(
        self: &Arc<Self>,
        kind: SocketKind,
        peer: String,
        token: CancellationToken,
    ) -> TrackedSocket {
        if !self.enabled {
            return TrackedSocket {
                set: None,
                id: 0,
                token,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut ht = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ht.insert(
            id,
            SocketEntry {
                kind,
                peer,
                token: token.clone(),
            },
        );
        TrackedSocket {
            set: Some(Arc::clone(self)),
            id,
            token,
        }
    }

    pub(crate) fn track(self: &Arc<Self>, kind: SocketKind, peer: String) -> TrackedSocket {
        self.register(kind, peer, CancellationToken::new())
    }

    /// Track a socket which should also be closed when `parent` is closed.
    pub(crate) fn track_child(
        self: &Arc<Self>,
        kind: SocketKind,
        peer: String,
        parent: &TrackedSocket,
    ) -> TrackedSocket {
        self.register(kind, peer, parent.token.child_token())
    }

    /// Signal every live socket to close.
    pub(crate) fn close_all(&self) {
        let ht = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in ht.values() {
            debug!("closing {} socket with {}", entry.kind.as_str(), entry.peer);
            entry.token.cancel();
        }
    }

    pub(crate) fn len(&self) -> usize {
        let ht = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ht.len()
    }

    fn remove(&self, id: u64) {
        let mut ht = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ht.remove(&id);
    }
}

/// The registration of a live socket, removed when dropped.
pub(crate) struct TrackedSocket {
    set: Option<ArcSocketSet>,
    id: u64,
    token: CancellationToken,
}

impl TrackedSocket {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Drop for TrackedSocket {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            set.remove(self.id);
        }
    }
}
