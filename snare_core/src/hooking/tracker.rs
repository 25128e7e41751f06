use super::Hook;
use std::collections::BTreeSet;

/// Keeps track of which hook targets were applied, which functions were seen
/// as available for hooking and which requested hooks never matched anything.
#[derive(Debug, Default, Clone)]
pub struct HookTracker {
    applied: BTreeSet<String>,
    available: BTreeSet<String>,
    not_applied: BTreeSet<String>,
}

impl HookTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_applied(&mut self, package: &str, target: &str) {
        self.applied.insert(qualified(package, target));
    }

    pub fn add_available(&mut self, package: &str, target: &str) {
        self.available.insert(qualified(package, target));
    }

    /// Records every requested hook that is neither applied nor available.
    pub fn categorize_unknown<'h>(&mut self, requested: impl IntoIterator<Item = &'h Hook>) {
        for hook in requested {
            let name = qualified(hook.package(), hook.target());
            if !self.applied.contains(&name) && !self.available.contains(&name) {
                self.not_applied.insert(name);
            }
        }
    }

    pub fn applied(&self) -> impl Iterator<Item = &str> {
        self.applied.iter().map(String::as_str)
    }

    pub fn available(&self) -> impl Iterator<Item = &str> {
        self.available.iter().map(String::as_str)
    }

    pub fn not_applied(&self) -> impl Iterator<Item = &str> {
        self.not_applied.iter().map(String::as_str)
    }

    pub fn summary(&self) -> String {
        let mut out = String::from("[Hook] Summary:\n");
        for (title, names) in [
            ("Not applied", &self.not_applied),
            ("Applied", &self.applied),
            ("Available", &self.available),
        ] {
            out.push_str(&format!("[Hook]    {title}:\n"));
            for name in names {
                out.push_str(&format!("[Hook]      {name}\n"));
            }
        }
        out
    }

    pub fn log_summary(&self) {
        for line in self.summary().lines() {
            log::debug!("{line}");
        }
    }

    pub fn clear(&mut self) {
        self.applied.clear();
        self.available.clear();
        self.not_applied.clear();
    }
}

fn qualified(package: &str, target: &str) -> String {
    format!("{package}:{target}")
}
