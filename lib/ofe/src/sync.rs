// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Safe abstractions for synchronization primitives.
//!
//! We name the mutex `KMutex` on purpose. The engine runs inside a
//! poll-mode driver whose locking discipline is not the same as a
//! general userland `Mutex` (no poisoning surfaced to callers, no
//! try-lock in the data path), and using a distinct name makes it
//! obvious which discipline applies at each call site.

use core::ops::Deref;
use core::ops::DerefMut;
use std::sync::Mutex;

pub struct KMutex<T> {
    inner: Mutex<T>,
}

pub struct KMutexGuard<'a, T: 'a> {
    guard: std::sync::MutexGuard<'a, T>,
}

impl<T> Deref for KMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.deref()
    }
}

impl<T> DerefMut for KMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.deref_mut()
    }
}

impl<T> KMutex<T> {
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.inner.into_inner().unwrap()
    }

    pub fn new(val: T) -> Self {
        KMutex { inner: Mutex::new(val) }
    }

    /// Acquire the mutex guard to gain access to the underlying
    /// value. If the guard is currently held, this call blocks. The
    /// mutex is released when the guard is dropped.
    pub fn lock(&self) -> KMutexGuard<'_, T> {
        let guard = self.inner.lock().unwrap();
        KMutexGuard { guard }
    }
}
