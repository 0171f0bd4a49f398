//! Region lifecycle.
//!
//! - [`SrbWriter`]: created by the one writer process. Creates the named
//!   shared memory object, writes the tables, flips the state to `RUNNING`,
//!   and on close sets `STOPPED` and removes the object.
//! - [`SrbReader`]: used by any number of reader processes. Maps an existing
//!   region that is `RUNNING` and derives every offset locally.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::ptr::NonNull;

use tracing::{debug, info, warn};

use crate::error::SrbError;
use crate::layout::{
    DESCRIPTOR_SIZE, HEADER_SIZE, RegionHeader, RegionLayout, RingDescriptor, RingShape,
    RingSpec, min_region_len,
};
use crate::ring::{ReadRing, WriteRing};
use crate::state::RunState;

/// Permissions of a newly created shared memory object.
const SHM_MODE: libc::c_uint = 0o600;

/// One mapping of the region into this process.
struct Mapping {
    /// Base address of the mapping.
    base: NonNull<u8>,
    /// Mapped length.
    len: usize,
    /// The shared memory object (kept open).
    _file: File,
}

// SAFETY: shared state in the mapping is accessed through atomics.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    fn new(file: File, len: usize) -> io::Result<Self> {
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let base = NonNull::new(base as *mut u8)
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        Ok(Self {
            base,
            len,
            _file: file,
        })
    }

    #[inline]
    fn header(&self) -> &RegionHeader {
        // SAFETY: every mapping is at least `min_region_len()` bytes and page aligned.
        unsafe { &*(self.base.as_ptr() as *const RegionHeader) }
    }

    #[inline]
    fn ptr_at<T>(&self, offset: usize) -> NonNull<T> {
        debug_assert!(offset < self.len);
        // SAFETY: offset is within the mapping, so the result is non-null.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset) as *mut T) }
    }

    /// Length of the NUL-terminated string at `offset`, if it ends inside the mapping.
    fn c_str_len(&self, offset: usize) -> Option<usize> {
        (offset..self.len)
            .position(|i| unsafe { self.base.as_ptr().add(i).read() } == 0)
    }

    /// Bytes that are immutable after creation (header and name tables).
    #[inline]
    fn metadata_bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: base and len describe the mapping created in `new`.
        let rc = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) };
        if rc != 0 {
            warn!(error = %io::Error::last_os_error(), "munmap failed");
        }
    }
}

fn shm_name(path: &str) -> Result<CString, SrbError> {
    CString::new(path)
        .map_err(|_| SrbError::InvalidSpec(format!("path {:?} contains a NUL byte", path)))
}

fn open_shm(path: &str, c_path: &CString, flags: libc::c_int) -> Result<File, SrbError> {
    let fd = unsafe { libc::shm_open(c_path.as_ptr(), flags, SHM_MODE) };
    if fd < 0 {
        return Err(SrbError::from_open(path, io::Error::last_os_error()));
    }
    // SAFETY: fd was just returned by shm_open and is owned by nobody else.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn unlink_shm(c_path: &CString) -> io::Result<()> {
    if unsafe { libc::shm_unlink(c_path.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Remove the shared memory object at `path`, e.g. one left behind by a
/// writer that crashed before closing.
pub fn remove(path: &str) -> Result<(), SrbError> {
    let c_path = shm_name(path)?;
    unlink_shm(&c_path).map_err(|e| SrbError::from_open(path, e))
}

/// Writer-side handle. Exclusively owns the mapping and the ring views.
pub struct SrbWriter {
    mapping: Mapping,
    path: String,
    c_path: CString,
    layout: RegionLayout,
    rings: Vec<WriteRing>,
    closed: bool,
}

impl SrbWriter {
    /// Create a new region at `path` with one ring per spec.
    ///
    /// Fails if an object already exists at `path`. The region only becomes
    /// `RUNNING` after every table has been written.
    pub fn create(path: &str, specs: &[RingSpec]) -> Result<Self, SrbError> {
        let layout = RegionLayout::for_specs(specs)?;
        debug!(
            path,
            total_len = layout.total_len,
            slot_area = layout.slot_area_offset,
            rings = layout.ring_count(),
            "computed region layout"
        );

        let c_path = shm_name(path)?;
        let file = open_shm(path, &c_path, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR)?;

        let mapping = match size_and_map(file, layout.total_len) {
            Ok(mapping) => mapping,
            Err(source) => {
                if let Err(e) = unlink_shm(&c_path) {
                    warn!(path, error = %e, "failed to remove partially created region");
                }
                return Err(SrbError::ResourceExhausted {
                    size: layout.total_len,
                    source,
                });
            }
        };

        // SAFETY: the mapping is fresh and nobody can attach before RUNNING.
        unsafe { write_tables(&mapping, &layout, specs) };

        let rings = layout
            .rings
            .iter()
            .zip(specs)
            .enumerate()
            .map(|(i, (offsets, spec))| {
                debug!(
                    ring = i,
                    name = spec.name.as_deref().unwrap_or_default(),
                    slots = offsets.slots,
                    len = offsets.slots_len,
                    "ring placed"
                );
                // SAFETY: offsets come from the layout the mapping was sized for.
                unsafe {
                    WriteRing::from_raw(
                        i,
                        spec.name.clone().unwrap_or_default(),
                        mapping.ptr_at(offsets.descriptor),
                        mapping.ptr_at(offsets.slots),
                    )
                }
            })
            .collect();

        mapping.header().set_run_state(RunState::Running);
        info!(path, len = layout.total_len, rings = layout.ring_count(), "region created");

        Ok(Self {
            mapping,
            path: path.to_owned(),
            c_path,
            layout,
            rings,
            closed: false,
        })
    }

    /// Begin graceful shutdown: `RUNNING → STOPPING`. No-op in any other state.
    pub fn signal_stopping(&self) {
        if self.mapping.header().begin_stopping() {
            info!(path = %self.path, "region stopping");
        }
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        self.mapping.header().run_state()
    }

    /// Set `STOPPED`, remove the shared memory object and unmap.
    ///
    /// Existing reader mappings stay valid; no new reader can attach.
    pub fn close(mut self) -> Result<(), SrbError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), SrbError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.mapping.header().set_run_state(RunState::Stopped);
        unlink_shm(&self.c_path).map_err(|e| SrbError::from_open(&self.path, e))?;
        info!(path = %self.path, "region closed");
        Ok(())
    }

    pub fn rings(&self) -> &[WriteRing] {
        &self.rings
    }

    pub fn rings_mut(&mut self) -> &mut [WriteRing] {
        &mut self.rings
    }

    pub fn ring_by_name(&self, name: &str) -> Option<&WriteRing> {
        self.rings.iter().find(|r| r.name() == name)
    }

    pub fn ring_by_name_mut(&mut self, name: &str) -> Option<&mut WriteRing> {
        self.rings.iter_mut().find(|r| r.name() == name)
    }

    /// Like [`ring_by_name_mut`](Self::ring_by_name_mut), but a miss is an error.
    pub fn ring_named_mut(&mut self, name: &str) -> Result<&mut WriteRing, SrbError> {
        self.ring_by_name_mut(name)
            .ok_or_else(|| SrbError::NotFoundRing(name.to_owned()))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mapped length in bytes.
    pub fn mapped_len(&self) -> usize {
        self.mapping.len
    }

    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }
}

impl Drop for SrbWriter {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = %self.path, error = %e, "failed to close region");
        }
    }
}

impl std::fmt::Debug for SrbWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrbWriter")
            .field("path", &self.path)
            .field("len", &self.mapping.len)
            .field("state", &self.state())
            .field("rings", &self.rings)
            .finish()
    }
}

fn size_and_map(file: File, len: usize) -> io::Result<Mapping> {
    file.set_len(len as u64)?;
    Mapping::new(file, len)
}

/// Write header, descriptor table and name table.
///
/// # Safety
///
/// `mapping` must be at least `layout.total_len` bytes and not yet visible to
/// readers.
unsafe fn write_tables(mapping: &Mapping, layout: &RegionLayout, specs: &[RingSpec]) {
    unsafe {
        mapping
            .ptr_at::<RegionHeader>(0)
            .write(RegionHeader::new(specs.len() as u32));

        for (offsets, spec) in layout.rings.iter().zip(specs) {
            mapping
                .ptr_at::<RingDescriptor>(offsets.descriptor)
                .write(RingDescriptor::new(spec.slot_size, spec.slot_count));

            let name = spec.name_bytes();
            let dst = mapping.ptr_at::<u8>(offsets.name).as_ptr();
            std::ptr::copy_nonoverlapping(name.as_ptr(), dst, name.len());
            dst.add(name.len()).write(0);
        }
    }
}

/// Reader-side handle. Owns its own mapping and ring views; never writes.
pub struct SrbReader {
    mapping: Mapping,
    path: String,
    layout: RegionLayout,
    rings: Vec<ReadRing>,
}

impl SrbReader {
    /// Attach to the region at `path`.
    ///
    /// Rejections are distinguishable: `NotFound`/`NotRunning` mean the
    /// writer is not up (retry), `Corrupt` means the region is malformed.
    pub fn attach(path: &str) -> Result<Self, SrbError> {
        let c_path = shm_name(path)?;
        let file = open_shm(path, &c_path, libc::O_RDWR)?;
        let len = file.metadata().map_err(SrbError::Io)?.len() as usize;

        // The writer has opened the object but not sized it yet.
        if len == 0 {
            return Err(SrbError::NotRunning(RunState::Stopped));
        }
        if len < min_region_len() {
            return Err(SrbError::Corrupt(format!(
                "region is {} bytes, need at least {}",
                len,
                min_region_len()
            )));
        }

        let mapping = Mapping::new(file, len).map_err(SrbError::Io)?;

        let header = mapping.header();
        match RunState::from_u32(header.raw_state()) {
            Some(RunState::Running) => {}
            Some(state) => return Err(SrbError::NotRunning(state)),
            None => {
                return Err(SrbError::Corrupt(format!(
                    "unknown state value {}",
                    header.raw_state()
                )));
            }
        }

        let ring_count = header.ring_count as usize;
        if ring_count == 0 {
            return Err(SrbError::Corrupt("region declares no rings".into()));
        }
        let names_offset = ring_count
            .checked_mul(DESCRIPTOR_SIZE)
            .and_then(|v| v.checked_add(HEADER_SIZE))
            .filter(|&end| end <= len)
            .ok_or_else(|| {
                SrbError::Corrupt(format!(
                    "descriptor table for {} rings does not fit in {} bytes",
                    ring_count, len
                ))
            })?;

        let mut shapes = Vec::with_capacity(ring_count);
        let mut names = Vec::with_capacity(ring_count);
        let mut cursor = names_offset;
        for i in 0..ring_count {
            // SAFETY: the descriptor table was bounds-checked above.
            let desc = unsafe {
                mapping
                    .ptr_at::<RingDescriptor>(HEADER_SIZE + i * DESCRIPTOR_SIZE)
                    .as_ref()
            };
            let name_len = mapping.c_str_len(cursor).ok_or_else(|| {
                SrbError::Corrupt(format!("name of ring {} is not terminated", i))
            })?;
            let name = mapping.metadata_bytes(cursor, name_len);
            names.push(String::from_utf8_lossy(name).into_owned());
            shapes.push(RingShape {
                slot_size: desc.slot_size,
                slot_count: desc.slot_count,
                name_len,
            });
            cursor += name_len + 1;
        }

        let layout =
            RegionLayout::compute(&shapes).map_err(|e| SrbError::Corrupt(e.to_string()))?;
        if layout.total_len > len {
            return Err(SrbError::Corrupt(format!(
                "rings need {} bytes, region has {}",
                layout.total_len, len
            )));
        }
        debug!(
            path,
            total_len = layout.total_len,
            slot_area = layout.slot_area_offset,
            "recomputed region layout"
        );

        let rings = layout
            .rings
            .iter()
            .zip(names)
            .enumerate()
            .map(|(i, (offsets, name))| unsafe {
                // SAFETY: offsets were checked against the mapped length.
                ReadRing::from_raw(
                    i,
                    name,
                    mapping.ptr_at(offsets.descriptor),
                    mapping.ptr_at(offsets.slots),
                )
            })
            .collect();

        info!(path, len, rings = ring_count, "attached to region");

        Ok(Self {
            mapping,
            path: path.to_owned(),
            layout,
            rings,
        })
    }

    /// Current run state of the writer. Stop polling when it is not `RUNNING`.
    pub fn state(&self) -> RunState {
        self.mapping.header().run_state()
    }

    /// Unmap this reader's view. The region itself is untouched.
    pub fn close(self) {
        debug!(path = %self.path, "detached from region");
    }

    pub fn rings(&self) -> &[ReadRing] {
        &self.rings
    }

    pub fn rings_mut(&mut self) -> &mut [ReadRing] {
        &mut self.rings
    }

    pub fn ring_by_name(&self, name: &str) -> Option<&ReadRing> {
        self.rings.iter().find(|r| r.name() == name)
    }

    pub fn ring_by_name_mut(&mut self, name: &str) -> Option<&mut ReadRing> {
        self.rings.iter_mut().find(|r| r.name() == name)
    }

    /// Like [`ring_by_name_mut`](Self::ring_by_name_mut), but a miss is an error.
    pub fn ring_named_mut(&mut self, name: &str) -> Result<&mut ReadRing, SrbError> {
        self.ring_by_name_mut(name)
            .ok_or_else(|| SrbError::NotFoundRing(name.to_owned()))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mapped length in bytes.
    pub fn mapped_len(&self) -> usize {
        self.mapping.len
    }

    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }
}

impl std::fmt::Debug for SrbReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrbReader")
            .field("path", &self.path)
            .field("len", &self.mapping.len)
            .field("state", &self.state())
            .field("rings", &self.rings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unique_path(tag: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!(
            "/srb_unit_{}_{}_{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_create_writes_tables() {
        let path = unique_path("tables");
        let writer = SrbWriter::create(&path, &[RingSpec::new("ch", 64, 3)]).unwrap();

        let header = writer.mapping.header();
        assert_eq!(header.ring_count, 1);
        assert_eq!(writer.state(), RunState::Running);

        let names = writer.mapping.metadata_bytes(writer.layout.names_offset, 3);
        assert_eq!(names, b"ch\0");
        assert_eq!(writer.mapped_len(), 4096 + 192);
        assert_eq!(writer.rings()[0].write_position(), 3);

        writer.close().unwrap();
    }

    #[test]
    fn test_path_with_nul_is_rejected() {
        assert!(matches!(
            SrbWriter::create("/bad\0path", &[RingSpec::new("a", 1, 3)]),
            Err(SrbError::InvalidSpec(_))
        ));
        assert!(matches!(
            SrbReader::attach("/bad\0path"),
            Err(SrbError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_invalid_spec_creates_nothing() {
        let path = unique_path("invalid");
        assert!(matches!(
            SrbWriter::create(&path, &[RingSpec::new("a", 64, 2)]),
            Err(SrbError::InvalidSpec(_))
        ));
        assert!(matches!(
            SrbReader::attach(&path),
            Err(SrbError::NotFound { .. })
        ));
    }

    #[test]
    fn test_c_str_len_finds_terminator() {
        let path = unique_path("cstr");
        let writer = SrbWriter::create(&path, &[RingSpec::new("abc", 1, 3)]).unwrap();
        let names_offset = writer.layout.names_offset;
        assert_eq!(writer.mapping.c_str_len(names_offset), Some(3));
        // The slot area is zero-filled, so a scan from it finds a terminator at once.
        assert_eq!(writer.mapping.c_str_len(writer.layout.slot_area_offset), Some(0));
        writer.close().unwrap();
    }

    #[test]
    fn test_c_str_len_stops_at_mapping_end() {
        let path = unique_path("cstr_end");
        let writer = SrbWriter::create(&path, &[RingSpec::new("abc", 1, 3)]).unwrap();
        let last = writer.mapping.len - 1;
        let tail = last - 2;
        for offset in tail..=last {
            unsafe { writer.mapping.ptr_at::<u8>(offset).write(b'x') };
        }

        assert_eq!(writer.mapping.c_str_len(last), None);
        assert_eq!(writer.mapping.c_str_len(tail), None);
        assert_eq!(writer.mapping.c_str_len(writer.mapping.len), None);
        writer.close().unwrap();
    }
}
