//! Small identifier newtypes shared between the resource and application
//! subsystems, kept in one place so neither module needs to depend on the
//! other just to name an id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of an execution context: `(pid, exc_id)` packed into a single u64,
/// matching `§3`'s "Identity: (pid, exc_id) packed into a UID."
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppUid(u64);

impl AppUid {
    pub fn pack(pid: u32, exc_id: u16) -> Self {
        AppUid(((pid as u64) << 16) | exc_id as u64)
    }

    pub fn pid(self) -> u32 {
        (self.0 >> 16) as u32
    }

    pub fn exc_id(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AppUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid(), self.exc_id())
    }
}

/// A view token. Token `0` is reserved for the system view (`§3`, `§4.4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewToken(u64);

impl ViewToken {
    pub const SYSTEM: ViewToken = ViewToken(0);

    pub fn new(raw: u64) -> Self {
        ViewToken(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_system(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ViewToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_uid_packs_and_unpacks() {
        let u = AppUid::pack(4242, 3);
        assert_eq!(u.pid(), 4242);
        assert_eq!(u.exc_id(), 3);
    }

    #[test]
    fn view_token_zero_is_system() {
        assert!(ViewToken::SYSTEM.is_system());
        assert!(!ViewToken::new(7).is_system());
    }
}
