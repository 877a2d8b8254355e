//! Secure Memory Handling Utilities
//!
//! This module provides the containers the key-store uses for passwords and
//! key material. Both wipe their contents when dropped, neither is copied
//! implicitly, and neither prints its contents through `Debug`.
//!
//! Passwords are held only as long as an operation needs them: callers
//! construct a [`Password`], lend it to the store, and the buffer is zeroed
//! when it goes out of scope on every exit path.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::utils;

/// A password held in a buffer that is zeroed on drop.
///
/// `Password` deliberately does not implement `Clone`; duplicating a
/// password must go through [`Password::duplicate`] so every copy is visible
/// in the code.
///
/// # Example
///
/// ```
/// use qasa_keystore::secure_memory::Password;
///
/// let password = Password::new("correct horse battery staple");
/// assert_eq!(password.len(), 28);
/// // zeroed here
/// ```
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Password {
    bytes: Vec<u8>,
}

impl Password {
    /// Create a password from a UTF-8 string
    pub fn new(password: &str) -> Self {
        Self {
            bytes: password.as_bytes().to_vec(),
        }
    }

    /// Create a password from raw bytes, taking ownership of the buffer
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Read-only access to the password bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Explicitly copy the password into a second zeroizing buffer
    pub fn duplicate(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for Password {
    fn eq(&self, other: &Self) -> bool {
        utils::constant_time_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for Password {}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

impl From<&str> for Password {
    fn from(password: &str) -> Self {
        Self::new(password)
    }
}

/// A container for sensitive binary data such as private and symmetric keys.
///
/// SecureBytes automatically zeroes its memory when dropped and hides its
/// contents from `Debug` output.
///
/// # Example
///
/// ```
/// use qasa_keystore::secure_memory::SecureBytes;
///
/// let key = SecureBytes::new(&[0x01, 0x02, 0x03, 0x04]);
/// assert_eq!(key.as_bytes(), &[0x01, 0x02, 0x03, 0x04]);
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureBytes {
    bytes: Vec<u8>,
}

impl SecureBytes {
    /// Create a new SecureBytes holding a copy of the given data
    pub fn new(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
        }
    }

    /// Create a new empty SecureBytes with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    /// Get a reference to the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get a mutable reference to the underlying bytes
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Append data to the end of the buffer
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Clear the buffer, securely zeroing all data
    pub fn clear(&mut self) {
        self.bytes.zeroize();
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for SecureBytes {
    fn eq(&self, other: &Self) -> bool {
        utils::constant_time_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for SecureBytes {}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBytes([REDACTED; {}])", self.bytes.len())
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<&[u8]> for SecureBytes {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl AsRef<[u8]> for SecureBytes {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Securely zero memory after a function has completed
///
/// Runs `f` with access to `data` and zeroizes `data` afterwards, including
/// when `f` returns early or panics.
///
/// # Example
///
/// ```
/// use qasa_keystore::secure_memory::with_secure_scope;
///
/// let mut key = vec![0x42u8; 32];
/// let sum: u32 = with_secure_scope(&mut key, |k| k.iter().map(|b| *b as u32).sum());
/// assert_eq!(sum, 0x42 * 32);
/// assert!(key.is_empty());
/// ```
pub fn with_secure_scope<T, F, R>(data: &mut T, f: F) -> R
where
    T: Zeroize,
    F: FnOnce(&mut T) -> R,
{
    struct ScopeGuard<'a, T: Zeroize> {
        data: &'a mut T,
    }

    impl<'a, T: Zeroize> Drop for ScopeGuard<'a, T> {
        fn drop(&mut self) {
            self.data.zeroize();
        }
    }

    let mut guard = ScopeGuard { data };
    f(&mut *guard.data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("hunter2");
        let shown = format!("{:?}", password);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("REDACTED"));
    }

    #[test]
    fn test_password_equality() {
        assert_eq!(Password::new("a"), Password::new("a"));
        assert_ne!(Password::new("a"), Password::new("b"));
        assert_eq!(Password::new("abc").duplicate(), Password::new("abc"));
    }

    #[test]
    fn test_password_zeroize() {
        let mut password = Password::new("secret");
        password.zeroize();
        assert!(password.is_empty());
    }

    #[test]
    fn test_secure_bytes() {
        let mut bytes = SecureBytes::new(&[1, 2, 3]);
        bytes.extend_from_slice(&[4]);
        assert_eq!(bytes.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(format!("{:?}", bytes), "SecureBytes([REDACTED; 4])");
        bytes.clear();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_secure_scope_zeroizes_on_panic() {
        let mut data = vec![7u8; 16];
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            with_secure_scope(&mut data, |_: &mut Vec<u8>| -> () { panic!("boom") });
        }));
        assert!(result.is_err());
        assert!(data.is_empty());
    }
}
