//! Heartbeat Channel Module
//!
//! A fixed-size named shared memory segment used as a single-slot mailbox
//! for the heartbeat timestamp written by the monitored application and read
//! by the watchdog.
//!
//! - Windows: named file mapping via CreateFileMappingW (create-or-open)
//! - Unix: POSIX shared memory via shm_open + mmap
//!
//! Only offset 0 is defined: an `i64` holding 100-nanosecond ticks since
//! 0001-01-01T00:00:00Z. The remaining bytes are reserved.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Well-known name of the heartbeat segment
pub const CHANNEL_NAME: &str = "DocuSyncHeartBeat";

/// Size of the heartbeat segment in bytes
pub const CHANNEL_SIZE: usize = 1024;

/// Offset of the heartbeat timestamp within the segment
pub const HEARTBEAT_OFFSET: usize = 0;

/// 100ns ticks per second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between 0001-01-01 and the Unix epoch
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Errors that can occur during channel operations
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Invalid channel name: {0:?}")]
    InvalidName(String),

    #[error("Heartbeat channel {name:?} unavailable: {source}")]
    Unavailable {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Offset {offset} out of bounds for a {size}-byte channel")]
    OutOfBounds { offset: usize, size: usize },

    #[error("Offset {offset} is not 8-byte aligned")]
    Misaligned { offset: usize },

    #[error("Heartbeat channel is closed")]
    Closed,
}

/// The sole datum exchanged through the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct HeartbeatRecord {
    ticks: i64,
}

impl HeartbeatRecord {
    pub fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let subsec = i64::from(at.timestamp_subsec_nanos()) / 100;
        Self {
            ticks: UNIX_EPOCH_TICKS + at.timestamp() * TICKS_PER_SECOND + subsec,
        }
    }

    pub fn ticks(&self) -> i64 {
        self.ticks
    }

    /// `None` for tick values chrono cannot represent. The slot is writable
    /// by any process that knows its name, so every `i64` must be handled.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let since_epoch = self.ticks.checked_sub(UNIX_EPOCH_TICKS)?;
        let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
        let nanos = (since_epoch.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    /// Time elapsed between this beat and `now`.
    ///
    /// Beats stamped in the future (clock stepped backwards) count as age
    /// zero. An unrepresentable or never-written record is `Duration::MAX`.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        if self.ticks == 0 {
            return Duration::MAX;
        }
        let Some(at) = self.to_datetime() else {
            return Duration::MAX;
        };
        (now - at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Liveness rule shared by the monitor and its tests: the boundary is alive
pub fn is_fresh(age: Duration, timeout: Duration) -> bool {
    age <= timeout
}

/// Named shared memory segment, mapped read-write for its whole lifetime.
///
/// The mapping is released on drop; the OS reclaims the segment itself.
pub struct HeartbeatChannel {
    name: String,
    region: Option<platform::Region>,
}

impl HeartbeatChannel {
    /// Open the named segment, creating it when no other process has yet
    pub fn open_or_create(name: &str, size: usize) -> Result<Self, ChannelError> {
        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return Err(ChannelError::InvalidName(name.to_string()));
        }
        if size < std::mem::size_of::<i64>() {
            return Err(ChannelError::OutOfBounds { offset: 0, size });
        }

        let region = platform::Region::open_or_create(name, size).map_err(|source| {
            ChannelError::Unavailable {
                name: name.to_string(),
                source,
            }
        })?;

        Ok(Self {
            name: name.to_string(),
            region: Some(region),
        })
    }

    /// Open the well-known DocuSync segment
    pub fn open_default() -> Result<Self, ChannelError> {
        Self::open_or_create(CHANNEL_NAME, CHANNEL_SIZE)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.region.as_ref().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_open(&self) -> bool {
        self.region.is_some()
    }

    pub fn write(&self, offset: usize, value: i64) -> Result<(), ChannelError> {
        self.slot(offset)?.store(value, Ordering::Release);
        Ok(())
    }

    pub fn read(&self, offset: usize) -> Result<i64, ChannelError> {
        Ok(self.slot(offset)?.load(Ordering::Acquire))
    }

    pub fn write_record(&self, record: HeartbeatRecord) -> Result<(), ChannelError> {
        self.write(HEARTBEAT_OFFSET, record.ticks())
    }

    pub fn read_record(&self) -> Result<HeartbeatRecord, ChannelError> {
        self.read(HEARTBEAT_OFFSET).map(HeartbeatRecord::from_ticks)
    }

    /// Unmap and release the OS handle. Idempotent.
    pub fn close(&mut self) {
        if let Some(region) = self.region.take() {
            drop(region);
            tracing::debug!("Heartbeat channel {} released", self.name);
        }
    }

    fn slot(&self, offset: usize) -> Result<&AtomicI64, ChannelError> {
        let region = self.region.as_ref().ok_or(ChannelError::Closed)?;
        let width = std::mem::size_of::<i64>();
        if offset % width != 0 {
            return Err(ChannelError::Misaligned { offset });
        }
        if offset + width > region.len() {
            return Err(ChannelError::OutOfBounds {
                offset,
                size: region.len(),
            });
        }
        // SAFETY: the mapping is page aligned, the offset is 8-byte aligned and
        // in bounds, and the view outlives the returned borrow of `self`.
        Ok(unsafe { &*(region.as_ptr().add(offset) as *const AtomicI64) })
    }
}

impl std::fmt::Debug for HeartbeatChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatChannel")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Remove a named segment from the system namespace.
///
/// POSIX segments outlive their last mapping until unlinked; Windows
/// reclaims file mappings on its own, so this is a no-op there.
pub fn remove_channel(name: &str) -> Result<(), ChannelError> {
    platform::unlink(name).map_err(|source| ChannelError::Unavailable {
        name: name.to_string(),
        source,
    })
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod platform {
    use std::ffi::CString;
    use std::io;
    use std::ptr::{self, NonNull};

    pub struct Region {
        ptr: NonNull<u8>,
        len: usize,
    }

    // SAFETY: all access to the mapping goes through atomics
    unsafe impl Send for Region {}
    unsafe impl Sync for Region {}

    fn shm_name(name: &str) -> io::Result<CString> {
        CString::new(format!("/{name}")).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    impl Region {
        pub fn open_or_create(name: &str, size: usize) -> io::Result<Self> {
            let path = shm_name(name)?;

            let fd = unsafe {
                libc::shm_open(
                    path.as_ptr(),
                    libc::O_CREAT | libc::O_RDWR,
                    0o600 as libc::c_uint,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            let result = Self::map(fd, size);
            unsafe { libc::close(fd) };
            result
        }

        fn map(fd: libc::c_int, size: usize) -> io::Result<Self> {
            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut stat) } != 0 {
                return Err(io::Error::last_os_error());
            }

            // The segment is grown by whoever gets there first, never shrunk
            if (stat.st_size as usize) < size
                && unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0
            {
                return Err(io::Error::last_os_error());
            }

            let view = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            if view == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }

            let ptr = NonNull::new(view as *mut u8)
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
            Ok(Self { ptr, len: size })
        }

        pub fn as_ptr(&self) -> *mut u8 {
            self.ptr.as_ptr()
        }

        pub fn len(&self) -> usize {
            self.len
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
            }
        }
    }

    pub fn unlink(name: &str) -> io::Result<()> {
        let path = shm_name(name)?;
        if unsafe { libc::shm_unlink(path.as_ptr()) } != 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(err);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod platform {
    use std::io;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
    use windows::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
        MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
    };

    pub struct Region {
        handle: HANDLE,
        view: MEMORY_MAPPED_VIEW_ADDRESS,
        len: usize,
    }

    // SAFETY: all access to the mapping goes through atomics
    unsafe impl Send for Region {}
    unsafe impl Sync for Region {}

    impl Region {
        pub fn open_or_create(name: &str, size: usize) -> io::Result<Self> {
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

            // CreateFileMappingW opens the existing mapping when the name is taken
            let handle = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    None,
                    PAGE_READWRITE,
                    0,
                    size as u32,
                    PCWSTR(wide.as_ptr()),
                )
            }
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

            let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, size) };
            if view.Value.is_null() {
                let err = io::Error::last_os_error();
                unsafe { CloseHandle(handle).ok() };
                return Err(err);
            }

            Ok(Self {
                handle,
                view,
                len: size,
            })
        }

        pub fn as_ptr(&self) -> *mut u8 {
            self.view.Value as *mut u8
        }

        pub fn len(&self) -> usize {
            self.len
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            unsafe {
                let _ = UnmapViewOfFile(self.view);
                let _ = CloseHandle(self.handle);
            }
        }
    }

    pub fn unlink(_name: &str) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::test_support::unique_channel_name;
    use chrono::TimeZone;

    #[test]
    fn test_record_unix_epoch_ticks() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let record = HeartbeatRecord::from_datetime(epoch);
        assert_eq!(record.ticks(), UNIX_EPOCH_TICKS);
        assert_eq!(record.to_datetime(), Some(epoch));
    }

    #[test]
    fn test_record_keeps_sub_second_precision() {
        let at = Utc.timestamp_opt(1_700_000_000, 123_456_700).unwrap();
        let record = HeartbeatRecord::from_datetime(at);
        assert_eq!(record.to_datetime(), Some(at));
    }

    #[test]
    fn test_age_of_empty_slot_is_unbounded() {
        let record = HeartbeatRecord::from_ticks(0);
        assert_eq!(record.age_at(Utc::now()), Duration::MAX);
    }

    #[test]
    fn test_future_beat_counts_as_fresh() {
        let now = Utc::now();
        let record = HeartbeatRecord::from_datetime(now + chrono::Duration::seconds(30));
        assert_eq!(record.age_at(now), Duration::ZERO);
    }

    #[test]
    fn test_garbage_ticks_are_unbounded_age() {
        let now = Utc::now();
        for ticks in [i64::MIN, i64::MIN + 1, i64::MIN + UNIX_EPOCH_TICKS - 1] {
            let record = HeartbeatRecord::from_ticks(ticks);
            assert_eq!(record.age_at(now), Duration::MAX, "ticks {}", ticks);
        }
    }

    #[test]
    fn test_slot_holding_min_value_reads_as_stale() {
        let name = unique_channel_name();
        let channel = HeartbeatChannel::open_or_create(&name, CHANNEL_SIZE).unwrap();
        channel.write(HEARTBEAT_OFFSET, i64::MIN).unwrap();

        let record = channel.read_record().unwrap();
        assert_eq!(record.to_datetime(), None);
        assert_eq!(record.age_at(Utc::now()), Duration::MAX);
        assert!(!is_fresh(record.age_at(Utc::now()), Duration::from_secs(5)));

        remove_channel(&name).unwrap();
    }

    #[test]
    fn test_is_fresh_boundary_is_alive() {
        let timeout = Duration::from_secs(5);
        assert!(is_fresh(timeout, timeout));
        assert!(!is_fresh(timeout + Duration::from_nanos(100), timeout));
    }

    #[test]
    fn test_open_or_create_shares_segment() {
        let name = unique_channel_name();
        let writer = HeartbeatChannel::open_or_create(&name, CHANNEL_SIZE).unwrap();
        let reader = HeartbeatChannel::open_or_create(&name, CHANNEL_SIZE).unwrap();

        writer.write(HEARTBEAT_OFFSET, 42).unwrap();
        assert_eq!(reader.read(HEARTBEAT_OFFSET).unwrap(), 42);

        let record = HeartbeatRecord::now();
        writer.write_record(record).unwrap();
        assert_eq!(reader.read_record().unwrap(), record);

        remove_channel(&name).unwrap();
    }

    #[test]
    fn test_rejects_bad_offsets() {
        let name = unique_channel_name();
        let channel = HeartbeatChannel::open_or_create(&name, CHANNEL_SIZE).unwrap();

        assert!(matches!(
            channel.write(3, 1),
            Err(ChannelError::Misaligned { offset: 3 })
        ));
        assert!(matches!(
            channel.read(CHANNEL_SIZE),
            Err(ChannelError::OutOfBounds { .. })
        ));
        assert!(channel.read(CHANNEL_SIZE - 8).is_ok());

        remove_channel(&name).unwrap();
    }

    #[test]
    fn test_rejects_invalid_names() {
        for name in ["", "a/b", "a\\b"] {
            assert!(matches!(
                HeartbeatChannel::open_or_create(name, CHANNEL_SIZE),
                Err(ChannelError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_closed_channel_refuses_access() {
        let name = unique_channel_name();
        let mut channel = HeartbeatChannel::open_or_create(&name, CHANNEL_SIZE).unwrap();
        channel.close();
        channel.close();

        assert!(!channel.is_open());
        assert!(matches!(channel.read_record(), Err(ChannelError::Closed)));

        remove_channel(&name).unwrap();
    }
}
