use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use serde::Deserialize;

use crate::{
    client::{id, Client},
    error::{Error, Result},
};

static INIT_REFS: AtomicUsize = AtomicUsize::new(0);

/// Returns whether at least one [`Library`] is currently initialized in this process.
pub fn is_initialized() -> bool {
    INIT_REFS.load(Ordering::Acquire) > 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl Version {
    /// Packed as `major * 1_000_000 + minor * 1_000 + revision`.
    pub fn number(&self) -> u64 {
        u64::from(self.major) * 1_000_000 + u64::from(self.minor) * 1_000 + u64::from(self.revision)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

pub fn version() -> Version {
    Version {
        major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
        minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
        revision: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibraryOptions {
    /// Maximum number of client handles alive at once. `None` means unbounded.
    pub max_clients: Option<usize>,
    /// Prefix of generated client identifiers.
    pub id_prefix: String,
}

impl Default for LibraryOptions {
    fn default() -> Self {
        Self {
            max_clients: None,
            id_prefix: id::DEFAULT_PREFIX.to_owned(),
        }
    }
}

/// Bookkeeping for live client handles, shared between a [`Library`] and its clients.
#[derive(Debug)]
pub(crate) struct HandleTable {
    live: AtomicUsize,
    limit: Option<usize>,
}

impl HandleTable {
    fn new(limit: Option<usize>) -> Self {
        Self {
            live: AtomicUsize::new(0),
            limit,
        }
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> Result<Slot> {
        let limit = self.limit;
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| match limit {
                Some(limit) if live >= limit => None,
                _ => Some(live + 1),
            })
            .map_err(|live| {
                tracing::error!(live, "Client handle table is full.");
                Error::NoMemory {
                    limit: limit.unwrap_or(live),
                }
            })?;

        Ok(Slot {
            table: Arc::clone(self),
        })
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// One occupied entry of a [`HandleTable`], released on drop.
#[derive(Debug)]
pub(crate) struct Slot {
    table: Arc<HandleTable>,
}

impl Slot {
    pub(crate) fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.table.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    /// Handles that were still alive when the library was cleaned up.
    pub outstanding_clients: usize,
}

/// An initialized library context.
///
/// Initialization is reference counted across the process: every `Library` holds one
/// reference which is released by [`Library::cleanup`] or on drop.
#[derive(Debug)]
pub struct Library {
    options: LibraryOptions,
    handles: Arc<HandleTable>,
}

impl Library {
    pub fn init() -> Self {
        Self::with_options(LibraryOptions::default())
    }

    pub fn with_options(options: LibraryOptions) -> Self {
        let refs = INIT_REFS.fetch_add(1, Ordering::AcqRel) + 1;
        if refs == 1 {
            tracing::info!(version = %version(), "Library initialized.");
        } else {
            tracing::debug!(refs, "Library already initialized.");
        }

        let handles = Arc::new(HandleTable::new(options.max_clients));
        Self { options, handles }
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.options
    }

    pub fn live_clients(&self) -> usize {
        self.handles.live()
    }

    /// Allocates a client handle.
    ///
    /// Without an `id` a random one is generated, which is only allowed for clean sessions
    /// since the broker could never resume a session for an identifier nobody knows.
    pub fn new_client<U>(
        &self,
        id: Option<&str>,
        clean_session: bool,
        userdata: U,
    ) -> Result<Client<U>> {
        Client::allocate(self, id, clean_session, userdata)
    }

    pub(crate) fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub(crate) fn owns(&self, handles: &Arc<HandleTable>) -> bool {
        Arc::ptr_eq(&self.handles, handles)
    }

    /// Releases this initialization reference.
    ///
    /// Live client handles stay valid and are freed when they are dropped.
    pub fn cleanup(self) -> CleanupReport {
        let report = CleanupReport {
            outstanding_clients: self.live_clients(),
        };
        if report.outstanding_clients > 0 {
            tracing::warn!(
                outstanding = report.outstanding_clients,
                "Library cleaned up with live client handles."
            );
        }
        report
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        let refs = INIT_REFS.fetch_sub(1, Ordering::AcqRel) - 1;
        if refs == 0 {
            tracing::info!("Library cleaned up.");
        } else {
            tracing::debug!(refs, "Library reference released.");
        }
    }
}
