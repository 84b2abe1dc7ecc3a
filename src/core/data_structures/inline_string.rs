/*!
 * Inline String Optimization
 * Zero-allocation context strings for socket errors
 */

use smartstring::alias::String as SmartString;
use std::fmt;

/// Inline-optimized string that stores short strings (≤23 bytes) without heap allocation
///
/// Error context on the I/O path ("iovec too long", "not bound") is short and
/// built on every failed call, so it should not touch the allocator.
///
/// # Examples
///
/// ```ignore
/// InlineString::from("socket not bound");   // inline
/// InlineString::from(format!("unsupported option {}", optname));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct InlineString {
    inner: SmartString,
}

impl InlineString {
    /// Create new empty inline string
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: SmartString::new(),
        }
    }

    /// Get string slice
    #[inline(always)]
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    /// Check if string is stored inline (no heap allocation)
    #[inline]
    pub fn is_inline(&self) -> bool {
        self.inner.is_inline()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for InlineString {
    #[inline]
    fn from(s: &str) -> Self {
        Self {
            inner: SmartString::from(s),
        }
    }
}

impl From<String> for InlineString {
    #[inline]
    fn from(s: String) -> Self {
        Self {
            inner: SmartString::from(s),
        }
    }
}

impl From<InlineString> for String {
    #[inline]
    fn from(s: InlineString) -> Self {
        s.inner.into()
    }
}

impl AsRef<str> for InlineString {
    #[inline(always)]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::ops::Deref for InlineString {
    type Target = str;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for InlineString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_context_inline() {
        let messages = [
            "socket not bound",
            "iovec too long",
            "address too short",
            "already connected",
            "unsupported flags",
        ];

        for message in messages {
            let inline = InlineString::from(message);
            assert!(inline.is_inline(), "'{}' should be inline", message);
            assert_eq!(inline.as_str(), message);
        }
    }

    #[test]
    fn test_long_context_heap_allocated() {
        let long = InlineString::from(
            "setting blocking mode before the socket is bound or connected is not supported",
        );
        assert!(!long.is_inline());
        assert!(long.contains("blocking mode"));
    }

    #[test]
    fn test_conversions() {
        let inline = InlineString::from(String::from("EINVAL context"));
        let back: String = inline.clone().into();
        assert_eq!(back, "EINVAL context");
        assert_eq!(inline.to_string(), "EINVAL context");
    }
}
