/*!
 * Substrate Traits
 * Interface consumed by the socket layer from the I/O substrate
 */

use super::errors::PalResult;
use super::types::*;
use std::fmt;
use std::io::{IoSlice, IoSliceMut};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// I/O substrate
///
/// Creates live transport objects. Implementations must be shareable across
/// threads; the socket layer holds one `Arc<dyn Substrate>` per filesystem.
pub trait Substrate: Send + Sync + fmt::Debug {
    /// Substrate name for logging
    fn name(&self) -> &str;

    /// Create a fresh, unbound socket object
    fn socket_create(
        &self,
        domain: PalSocketDomain,
        kind: PalSocketKind,
        options: StreamOptions,
    ) -> PalResult<PalHandle>;
}

/// Live connection or listening object owned by the substrate
///
/// Every method is callable concurrently; the substrate serializes whatever
/// internal state it needs. Blocking happens only inside `accept`, `connect`,
/// `send` and `recv`, and only when the object is in blocking mode and
/// `force_nonblocking` is not set.
pub trait Transport: Send + Sync + fmt::Debug {
    fn domain(&self) -> PalSocketDomain;

    fn kind(&self) -> PalSocketKind;

    /// Bind to `addr`; a zero port is replaced with the allocated one
    fn bind(&self, addr: &mut PalSocketAddr) -> PalResult<()>;

    fn listen(&self, backlog: u32) -> PalResult<()>;

    /// Dequeue one pending connection
    fn accept(&self, options: StreamOptions) -> PalResult<Accepted>;

    /// Connect to `addr` (or dissolve a datagram association with `Unspec`),
    /// returning the local address in use afterwards
    fn connect(&self, addr: &PalSocketAddr) -> PalResult<PalSocketAddr>;

    /// Gather `iov` into one payload and transmit it
    fn send(
        &self,
        iov: &[IoSlice<'_>],
        addr: Option<&PalSocketAddr>,
        force_nonblocking: bool,
    ) -> PalResult<usize>;

    /// Receive one payload scattered across `iov`, with the sender address
    fn recv(
        &self,
        iov: &mut [IoSliceMut<'_>],
        force_nonblocking: bool,
    ) -> PalResult<(usize, Option<PalSocketAddr>)>;

    fn attributes_query(&self) -> PalResult<StreamAttr>;

    fn attributes_set(&self, attr: &StreamAttr) -> PalResult<()>;

    /// Shut down one or both directions
    fn delete(&self, mode: DeleteMode) -> PalResult<()>;

    /// Tear the object down; called exactly once by the owning handle
    fn close(&self) -> PalResult<()>;

    /// One-byte tag identifying the object kind in a checkpoint image
    fn checkpoint_tag(&self) -> u8;
}

/// Result of a successful accept
#[derive(Debug)]
pub struct Accepted {
    pub handle: PalHandle,
    pub local: PalSocketAddr,
    pub peer: PalSocketAddr,
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Owned reference to a substrate object
///
/// Each handle carries a process-unique id so that distinct substrate objects
/// can be told apart without comparing pointers.
pub struct PalHandle {
    id: u64,
    object: Box<dyn Transport>,
}

impl PalHandle {
    pub fn new<T: Transport + 'static>(object: T) -> Self {
        Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            object: Box::new(object),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Close the object, logging a failed teardown
    ///
    /// Used on paths that already carry an error or have no caller to report to.
    pub fn release(&self) {
        if let Err(err) = self.close() {
            warn!(id = self.id, error = %err, "failed to release transport object");
        }
    }
}

impl Deref for PalHandle {
    type Target = dyn Transport;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.object.as_ref()
    }
}

impl fmt::Debug for PalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PalHandle")
            .field("id", &self.id)
            .field("object", &self.object)
            .finish()
    }
}
