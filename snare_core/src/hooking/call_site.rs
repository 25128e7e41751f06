use super::HookHandle;
use std::fmt;

/// Approximately unique identifier of one hooked call location.
///
/// Stable across iterations of the same run, but only probabilistically
/// unique: unrelated call sites may collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteId(pub i32);

impl CallSiteId {
    /// Hashes `snapshot` followed by the handle and target used as salt.
    pub fn from_snapshot(snapshot: &str, handle: HookHandle, target: &str) -> Self {
        let hash = roll(0, snapshot.encode_utf16());
        CallSiteId(roll(hash, salt(handle, target).into_iter()))
    }

    /// Hashes the return addresses of the current call stack.
    ///
    /// Frames are walked without resolving symbols, so this is cheap enough
    /// to run on every hooked call. Addresses are only stable within one
    /// process.
    pub fn capture(handle: HookHandle, target: &str) -> Self {
        let mut hash = 0;
        backtrace::trace(|frame| {
            let ip = frame.ip() as usize as u64;
            hash = roll(hash, (0..4).map(|i| (ip >> (16 * i)) as u16));
            true
        });
        CallSiteId(roll(hash, salt(handle, target).into_iter()))
    }
}

fn salt(handle: HookHandle, target: &str) -> Vec<u16> {
    format!("#{}:{}", handle.index(), target).encode_utf16().collect()
}

/// 32-bit rolling hash, `h = h * 31 + unit`, wrapping on overflow.
fn roll(hash: i32, units: impl Iterator<Item = u16>) -> i32 {
    units.fold(hash, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    })
}

impl From<HookHandle> for CallSiteId {
    fn from(handle: HookHandle) -> Self {
        CallSiteId(handle.index() as i32)
    }
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
