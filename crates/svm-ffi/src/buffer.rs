//! Byte buffers that cross the host/VM boundary
//!
//! The host and the VM each own an allocator, and a buffer must be released
//! by the allocator that produced it, exactly once. [`ForeignBuffer`] binds a
//! [`RawBuffer`] to its allocator and releases it on drop. Each allocator
//! keeps a [`Ledger`] of the buffers it is responsible for, so a double free
//! or a free through the wrong allocator is caught where it happens.
//!
//! Ownership violations are contract bugs, not recoverable errors: they log
//! and panic.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use svm_codec::EncodeError;
use thiserror::Error;

/// C representation of a byte array (`svm_byte_array`)
///
/// Carries no ownership by itself; see [`ForeignBuffer`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBuffer {
    /// Pointer to the first byte, null for an empty buffer
    pub bytes: *const u8,
    /// Number of valid bytes
    pub length: u32,
    /// Number of allocated bytes
    pub capacity: u32,
}

impl RawBuffer {
    /// The empty buffer
    pub const fn empty() -> Self {
        Self {
            bytes: ptr::null(),
            length: 0,
            capacity: 0,
        }
    }

    /// A non-owning view of `bytes`
    ///
    /// The result must not outlive `bytes` and must never be released.
    /// Fails if `bytes` does not fit a 32-bit length.
    pub fn borrowed(bytes: &[u8]) -> Result<Self, EncodeError> {
        if bytes.is_empty() {
            return Ok(Self::empty());
        }
        let len = checked_len(bytes.len())?;
        Ok(Self {
            bytes: bytes.as_ptr(),
            length: len,
            capacity: len,
        })
    }

    /// Whether this buffer has no backing allocation
    pub fn is_null(&self) -> bool {
        self.bytes.is_null()
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.length as usize
    }

    /// Whether there are no valid bytes
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// View the valid bytes
    ///
    /// # Safety
    /// `bytes` must be null or point to `length` readable bytes that stay
    /// valid and unmodified for `'a`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        if self.is_null() || self.length == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.bytes, self.length as usize)
    }

    /// Store this buffer into a C out-parameter
    ///
    /// # Safety
    /// `out` must be null or valid for writes.
    pub unsafe fn write_to(self, out: *mut RawBuffer) {
        if !out.is_null() {
            out.write(self);
        }
    }
}

impl Default for RawBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

/// Which side of the boundary allocated a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Allocated by the host process
    Host,
    /// Allocated by the VM runtime
    Vm,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::Host => write!(f, "host"),
            Provenance::Vm => write!(f, "vm"),
        }
    }
}

/// Length of a buffer as carried by [`RawBuffer`]
pub fn checked_len(len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::BytesTooLong {
        len,
        max: u32::MAX as usize,
    })
}

/// A broken buffer ownership contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipViolation {
    /// The buffer was already released by this allocator
    #[error("double free of buffer {ptr:#x} by the {allocator} allocator")]
    DoubleFree {
        /// Address of the buffer
        ptr: usize,
        /// Allocator asked to release it
        allocator: Provenance,
    },

    /// The buffer was never handed out by this allocator
    #[error("buffer {ptr:#x} was not allocated by the {allocator} allocator")]
    ForeignBuffer {
        /// Address of the buffer
        ptr: usize,
        /// Allocator asked to release it
        allocator: Provenance,
    },
}

fn violation(err: OwnershipViolation) -> ! {
    tracing::error!(target: "svm::buffer", violation = %err, "buffer ownership violation");
    panic!("{}", err);
}

/// Number of recent releases a ledger remembers for double-free reports
///
/// An older double free is still caught, but reported as a foreign buffer.
pub const RELEASE_HISTORY: usize = 1024;

#[derive(Debug, Default)]
struct LedgerState {
    live: HashMap<usize, u32>,
    // pointer -> sequence number of its latest release
    released: HashMap<usize, u64>,
    history: VecDeque<(usize, u64)>,
    sequence: u64,
}

impl LedgerState {
    fn remember_release(&mut self, ptr: usize) {
        self.sequence += 1;
        self.released.insert(ptr, self.sequence);
        self.history.push_back((ptr, self.sequence));
        while self.history.len() > RELEASE_HISTORY {
            if let Some((old, seq)) = self.history.pop_front() {
                if self.released.get(&old) == Some(&seq) {
                    self.released.remove(&old);
                }
            }
        }
    }
}

/// Bookkeeping of the buffers one allocator must release
#[derive(Debug)]
pub struct Ledger {
    provenance: Provenance,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Create an empty ledger
    pub fn new(provenance: Provenance) -> Self {
        Self {
            provenance,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Record a buffer this allocator now owns
    pub fn track(&self, raw: &RawBuffer) {
        if raw.is_null() {
            return;
        }
        let ptr = raw.bytes as usize;
        let mut state = self.state.lock();
        state.released.remove(&ptr);
        state.live.insert(ptr, raw.capacity);
    }

    /// Forget a buffer whose ownership moved to the other side
    pub fn forget(&self, raw: &RawBuffer) {
        if raw.is_null() {
            return;
        }
        let ptr = raw.bytes as usize;
        if self.state.lock().live.remove(&ptr).is_none() {
            violation(OwnershipViolation::ForeignBuffer {
                ptr,
                allocator: self.provenance,
            });
        }
    }

    /// Check and record a release, returning the allocated capacity
    ///
    /// Panics on a double free or a buffer this allocator does not own.
    pub fn release(&self, raw: &RawBuffer) -> u32 {
        let ptr = raw.bytes as usize;
        let mut state = self.state.lock();
        match state.live.remove(&ptr) {
            Some(capacity) => {
                state.remember_release(ptr);
                capacity
            }
            None => {
                let double = state.released.contains_key(&ptr);
                drop(state);
                violation(if double {
                    OwnershipViolation::DoubleFree {
                        ptr,
                        allocator: self.provenance,
                    }
                } else {
                    OwnershipViolation::ForeignBuffer {
                        ptr,
                        allocator: self.provenance,
                    }
                })
            }
        }
    }

    /// Number of buffers currently owned
    pub fn live(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of released buffers still remembered, at most [`RELEASE_HISTORY`]
    pub fn remembered_releases(&self) -> usize {
        self.state.lock().released.len()
    }
}

/// One side's allocator, as seen from the host
pub trait ForeignAllocator: Send + Sync {
    /// Side of the boundary this allocator belongs to
    fn provenance(&self) -> Provenance;

    /// Allocate `len` bytes; zero length yields the empty buffer
    ///
    /// Fails without allocating if `len` does not fit a 32-bit length.
    fn allocate(&self, len: usize) -> Result<RawBuffer, EncodeError>;

    /// Release a buffer previously returned by [`allocate`](Self::allocate)
    ///
    /// # Safety
    /// `raw` must not be used after this call.
    unsafe fn release(&self, raw: RawBuffer);

    /// Note that a buffer was handed across the boundary
    ///
    /// The VM allocator stops tracking it, since the VM frees it internally.
    /// The host allocator keeps tracking it until the VM hands it back.
    fn relinquish(&self, raw: &RawBuffer);

    /// Number of buffers allocated and not yet released
    fn live(&self) -> usize;
}

/// The host process allocator
#[derive(Debug)]
pub struct HostAllocator {
    ledger: Ledger,
}

static HOST_ALLOCATOR: LazyLock<Arc<HostAllocator>> = LazyLock::new(|| {
    Arc::new(HostAllocator {
        ledger: Ledger::new(Provenance::Host),
    })
});

impl HostAllocator {
    /// The process-wide host allocator
    pub fn global() -> Arc<HostAllocator> {
        Arc::clone(&HOST_ALLOCATOR)
    }
}

impl ForeignAllocator for HostAllocator {
    fn provenance(&self) -> Provenance {
        Provenance::Host
    }

    fn allocate(&self, len: usize) -> Result<RawBuffer, EncodeError> {
        if len == 0 {
            return Ok(RawBuffer::empty());
        }
        let length = checked_len(len)?;
        let boxed: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let raw = RawBuffer {
            bytes: Box::into_raw(boxed) as *const u8,
            length,
            capacity: length,
        };
        self.ledger.track(&raw);
        Ok(raw)
    }

    unsafe fn release(&self, raw: RawBuffer) {
        if raw.is_null() {
            return;
        }
        let capacity = self.ledger.release(&raw) as usize;
        let slice = ptr::slice_from_raw_parts_mut(raw.bytes as *mut u8, capacity);
        drop(Box::from_raw(slice));
    }

    fn relinquish(&self, _raw: &RawBuffer) {
        // Still ours: the VM hands it back through `svm_host_byte_array_destroy`
    }

    fn live(&self) -> usize {
        self.ledger.live()
    }
}

/// VM entry point allocating a byte array
pub type AllocFn = unsafe extern "C" fn(length: u32) -> RawBuffer;

/// VM entry point releasing a byte array
pub type DestroyFn = unsafe extern "C" fn(bytes: RawBuffer);

/// The VM allocator, reached through its exported functions
pub struct ExternAllocator {
    alloc: AllocFn,
    destroy: DestroyFn,
    ledger: Ledger,
}

impl fmt::Debug for ExternAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternAllocator")
            .field("live", &self.ledger.live())
            .finish()
    }
}

impl ExternAllocator {
    /// Wrap the VM's allocation functions
    pub fn new(alloc: AllocFn, destroy: DestroyFn) -> Self {
        Self {
            alloc,
            destroy,
            ledger: Ledger::new(Provenance::Vm),
        }
    }

    /// Take ownership of a buffer the VM handed to the host
    ///
    /// # Safety
    /// `raw` must be null or a live buffer allocated by this VM that nobody
    /// else will release.
    pub unsafe fn adopt(self: &Arc<Self>, raw: RawBuffer) -> ForeignBuffer {
        self.ledger.track(&raw);
        ForeignBuffer {
            raw,
            allocator: Arc::clone(self) as Arc<dyn ForeignAllocator>,
        }
    }
}

impl ForeignAllocator for ExternAllocator {
    fn provenance(&self) -> Provenance {
        Provenance::Vm
    }

    fn allocate(&self, len: usize) -> Result<RawBuffer, EncodeError> {
        if len == 0 {
            return Ok(RawBuffer::empty());
        }
        let length = checked_len(len)?;
        // SAFETY: `alloc` is the VM's allocation entry point
        let raw = unsafe { (self.alloc)(length) };
        self.ledger.track(&raw);
        Ok(raw)
    }

    unsafe fn release(&self, raw: RawBuffer) {
        if raw.is_null() {
            return;
        }
        self.ledger.release(&raw);
        (self.destroy)(raw);
    }

    fn relinquish(&self, raw: &RawBuffer) {
        self.ledger.forget(raw);
    }

    fn live(&self) -> usize {
        self.ledger.live()
    }
}

/// An owned buffer bound to the allocator that must release it
pub struct ForeignBuffer {
    raw: RawBuffer,
    allocator: Arc<dyn ForeignAllocator>,
}

impl fmt::Debug for ForeignBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignBuffer")
            .field("provenance", &self.provenance())
            .field("length", &self.raw.length)
            .finish()
    }
}

impl ForeignBuffer {
    /// Allocate `len` bytes from `allocator`
    pub fn allocate_in(
        allocator: Arc<dyn ForeignAllocator>,
        len: usize,
    ) -> Result<Self, EncodeError> {
        let raw = allocator.allocate(len)?;
        Ok(Self { raw, allocator })
    }

    /// Allocate from `allocator` and copy `bytes` in
    pub fn clone_from_slice(
        allocator: Arc<dyn ForeignAllocator>,
        bytes: &[u8],
    ) -> Result<Self, EncodeError> {
        let mut buffer = Self::allocate_in(allocator, bytes.len())?;
        buffer.as_mut_slice().copy_from_slice(bytes);
        Ok(buffer)
    }

    /// Side of the boundary that owns this buffer
    pub fn provenance(&self) -> Provenance {
        self.allocator.provenance()
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether there are no valid bytes
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// View the bytes
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the buffer is live until drop and only mutated through &mut self
        unsafe { self.raw.as_slice() }
    }

    /// View the bytes mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.raw.is_null() || self.raw.length == 0 {
            return &mut [];
        }
        // SAFETY: we own the allocation and hold the only handle to it
        unsafe { std::slice::from_raw_parts_mut(self.raw.bytes as *mut u8, self.raw.len()) }
    }

    /// Overwrite bytes starting at `offset`
    ///
    /// # Panics
    /// Panics if the write runs past the end of the buffer.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy the bytes into host memory
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Deep copy into another allocator
    pub fn clone_into(
        &self,
        allocator: Arc<dyn ForeignAllocator>,
    ) -> Result<ForeignBuffer, EncodeError> {
        Self::clone_from_slice(allocator, self.as_slice())
    }

    /// Zero-copy view of the current contents
    pub fn alias(&self) -> Alias<'_> {
        Alias {
            raw: self.raw,
            _source: PhantomData,
        }
    }

    /// The raw buffer, still owned by `self`
    ///
    /// Use it to lend the bytes to the VM for the duration of a call.
    pub fn raw(&self) -> RawBuffer {
        self.raw
    }

    /// Hand the buffer across the boundary without releasing it
    ///
    /// The receiver becomes responsible for having it released by the
    /// allocator of origin.
    pub fn into_raw(self) -> RawBuffer {
        let raw = self.raw;
        self.allocator.relinquish(&raw);
        mem::forget(self);
        raw
    }
}

impl Drop for ForeignBuffer {
    fn drop(&mut self) {
        let raw = mem::take(&mut self.raw);
        // SAFETY: the buffer came from this allocator and is dropped once
        unsafe { self.allocator.release(raw) }
    }
}

/// A view that reads through to another buffer's memory
///
/// Unlike [`ForeignBuffer::to_vec`], reads observe later writes to the
/// source until the source is released.
#[derive(Debug, Clone, Copy)]
pub struct Alias<'a> {
    raw: RawBuffer,
    _source: PhantomData<&'a [u8]>,
}

impl<'a> Alias<'a> {
    /// Alias a raw buffer with an unbounded lifetime
    ///
    /// # Safety
    /// The caller must not read through the alias after the source is
    /// released.
    pub unsafe fn from_raw(raw: RawBuffer) -> Self {
        Self {
            raw,
            _source: PhantomData,
        }
    }

    /// Number of bytes
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the alias is empty
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Read the byte at `index`
    pub fn get(&self, index: usize) -> Option<u8> {
        if index >= self.raw.len() {
            return None;
        }
        // SAFETY: in bounds, and the source outlives the alias
        Some(unsafe { self.raw.bytes.add(index).read() })
    }

    /// Copy the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        (0..self.len()).filter_map(|i| self.get(i)).collect()
    }

    /// Borrow the current contents
    ///
    /// # Safety
    /// The source must not be written while the slice is alive.
    pub unsafe fn as_slice(&self) -> &'a [u8] {
        self.raw.as_slice()
    }

    /// The aliased raw buffer; never release it
    pub fn raw(&self) -> RawBuffer {
        self.raw
    }
}
