//! Hardening primitives the crypto-bearing components are built on.
//!
//! Every comparison or selection that touches key-derived material goes
//! through [`ct_equal`] / [`ct_select_u8`]; buffers that hold plaintext or
//! keystream are wrapped in [`ZeroizingBuffer`]; long-lived secrets live in
//! an mlock'd [`SecretBuffer`].

use crate::error::{Result, VaultError};
use std::ptr;
use subtle::{ConditionallySelectable, ConstantTimeEq};
use tokio::io::{AsyncRead, AsyncReadExt};
use zeroize::Zeroize;

/// Constant-time equality. Length-leaking but value-independent: unequal
/// lengths return early, equal-length inputs are compared without branching
/// on their contents.
pub fn ct_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Constant-time byte select: returns `a` when `cond` is true, `b` otherwise,
/// without a data-dependent branch.
pub fn ct_select_u8(cond: bool, a: u8, b: u8) -> u8 {
    u8::conditional_select(&b, &a, (cond as u8).into())
}

/// Constant-time u64 select.
pub fn ct_select_u64(cond: bool, a: u64, b: u64) -> u64 {
    u64::conditional_select(&b, &a, (cond as u8).into())
}

/// Guarded addition; wrapping is a caller error surfaced as `Overflow`.
pub fn safe_add(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b).ok_or(VaultError::Overflow)
}

/// Guarded multiplication.
pub fn safe_mul(a: u64, b: u64) -> Result<u64> {
    a.checked_mul(b).ok_or(VaultError::Overflow)
}

/// Read at most `max` bytes from `src` to EOF. One byte past the bound fails
/// with `InputTooLarge` and the partial buffer is zeroized.
pub async fn bounded_read<R: AsyncRead + Unpin>(src: &mut R, max: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if out.len() as u64 + n as u64 > max {
            out.zeroize();
            buf.zeroize();
            return Err(VaultError::InputTooLarge { max });
        }
        out.extend_from_slice(&buf[..n]);
    }
    buf.zeroize();
    Ok(out)
}

/// Heap buffer that is overwritten on every exit path.
///
/// A single allocation larger than the engine's configured memory cap is a
/// programmer error and panics (BoundedBufferExceeded class), it is not a
/// runtime condition the caller can handle.
pub struct ZeroizingBuffer {
    data: Vec<u8>,
}

impl ZeroizingBuffer {
    pub fn new(len: usize, cap: usize) -> Self {
        assert!(len <= cap, "bounded buffer exceeded: {} > {} byte cap", len, cap);
        ZeroizingBuffer { data: vec![0u8; len] }
    }

    pub fn from_vec(data: Vec<u8>, cap: usize) -> Self {
        assert!(data.len() <= cap, "bounded buffer exceeded: {} > {} byte cap", data.len(), cap);
        ZeroizingBuffer { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shrink the logical length, zeroizing the tail.
    pub fn truncate(&mut self, len: usize) {
        if len < self.data.len() {
            self.data[len..].zeroize();
            self.data.truncate(len);
        }
    }
}

impl Drop for ZeroizingBuffer {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

/// Secret storage locked in RAM and zeroized on drop.
pub struct SecretBuffer {
    ptr: *mut u8,
    len: usize,
    locked: bool,
}

impl SecretBuffer {
    pub fn new(size: usize) -> Result<Self> {
        let layout = std::alloc::Layout::from_size_align(size.max(1), 1)
            .map_err(|_| VaultError::MediumUnavailable("invalid memory layout".into()))?;

        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(VaultError::MediumUnavailable("secure allocation failed".into()));
        }

        let mut mem = SecretBuffer { ptr, len: size, locked: false };

        // Lock may fail under RLIMIT_MEMLOCK; the buffer still zeroizes on drop.
        mem.lock().ok();

        Ok(mem)
    }

    fn lock(&mut self) -> Result<()> {
        if self.locked || self.len == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let rc = unsafe { libc::mlock(self.ptr as *const libc::c_void, self.len) };
            if rc == 0 {
                self.locked = true;
                Ok(())
            } else {
                Err(VaultError::MediumUnavailable("mlock failed".into()))
            }
        }
        #[cfg(not(unix))]
        {
            Ok(())
        }
    }

    fn unlock(&mut self) {
        if self.locked {
            #[cfg(unix)]
            unsafe {
                libc::munlock(self.ptr as *const libc::c_void, self.len);
            }
            self.locked = false;
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        unsafe {
            ptr::write_bytes(self.ptr, 0, self.len);
        }
        self.unlock();
        let layout = std::alloc::Layout::from_size_align(self.len.max(1), 1).unwrap();
        unsafe {
            std::alloc::dealloc(self.ptr, layout);
        }
    }
}

unsafe impl Send for SecretBuffer {}
unsafe impl Sync for SecretBuffer {}

/// OS-backed randomness into a caller buffer.
pub fn secure_random(buf: &mut [u8]) {
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(buf);
}

/// Disable core dumps for the current process.
pub fn disable_core_dumps() -> Result<()> {
    #[cfg(unix)]
    {
        use libc::{rlimit, setrlimit, RLIMIT_CORE};
        let rlim = rlimit { rlim_cur: 0, rlim_max: 0 };
        let rc = unsafe { setrlimit(RLIMIT_CORE, &rlim) };
        if rc == 0 {
            Ok(())
        } else {
            Err(VaultError::MediumUnavailable("failed to disable core dumps".into()))
        }
    }
    #[cfg(not(unix))]
    {
        Ok(())
    }
}
