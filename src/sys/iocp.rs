use std::io;
use std::ptr;

use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE, WAIT_TIMEOUT};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, OVERLAPPED,
};

const INFINITE: u32 = u32::MAX;

pub struct CompletionPort {
    port: HANDLE,
}

pub struct Completion {
    pub key: usize,
    pub bytes: u32,
    pub overlapped: *mut OVERLAPPED,
}

impl CompletionPort {
    pub fn new() -> io::Result<CompletionPort> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 0) };

        if port == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(CompletionPort { port })
    }

    /// Associates `handle` with the port; completions for it carry `key`.
    pub fn associate(&self, handle: HANDLE, key: usize) -> io::Result<()> {
        let res = unsafe { CreateIoCompletionPort(handle, self.port, key, 0) };

        if res == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Dequeues one completion. `timeout` is in milliseconds, `None` blocks.
    /// Returns `Ok(None)` when the wait timed out. A completion whose I/O
    /// failed is still returned so its listener can observe the failure.
    pub fn wait(&self, timeout: Option<u32>) -> io::Result<Option<Completion>> {
        let mut bytes: u32 = 0;
        let mut key: usize = 0;
        let mut overlapped: *mut OVERLAPPED = ptr::null_mut();

        let ok = unsafe {
            GetQueuedCompletionStatus(
                self.port,
                &mut bytes,
                &mut key,
                &mut overlapped,
                timeout.unwrap_or(INFINITE),
            )
        };

        if ok == 0 {
            if overlapped.is_null() {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(WAIT_TIMEOUT as i32) {
                    return Ok(None);
                }
                return Err(err);
            }
        }

        Ok(Some(Completion {
            key,
            bytes,
            overlapped,
        }))
    }
}

impl Drop for CompletionPort {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.port);
        }
    }
}
