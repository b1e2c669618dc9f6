//! Role presets offered by the navigation shell.
//!
//! Each preset owns one stable thread id, so opening a preset twice lands in the same thread.

/// A preset role and the thread it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePreset {
    /// Display name.
    pub name: &'static str,
    /// Stable thread id of the preset's thread.
    pub thread_id: &'static str,
    /// Role key into the prompt table.
    pub role: &'static str,
}

/// The presets, in display order.
pub const PRESETS: &[RolePreset] = &[
    RolePreset {
        name: "Translator English",
        thread_id: "translate-english",
        role: "translator",
    },
    RolePreset {
        name: "Check Grammar",
        thread_id: "check-grammar",
        role: "grammar",
    },
    RolePreset {
        name: "Dev Code",
        thread_id: "dev-code",
        role: "developer",
    },
    RolePreset {
        name: "Auto Correct",
        thread_id: "auto-correct",
        role: "correct",
    },
    RolePreset {
        name: "Auto Detect",
        thread_id: "auto-detect",
        role: "autocheck",
    },
];

/// Find a preset by thread id, role key, or case-insensitive display name.
pub fn find(query: &str) -> Option<&'static RolePreset> {
    let query = query.trim();
    PRESETS.iter().find(|p| {
        p.thread_id == query || p.role == query || p.name.eq_ignore_ascii_case(query)
    })
}

/// The preset owning `thread_id`, if that id belongs to one.
pub fn for_thread(thread_id: &str) -> Option<&'static RolePreset> {
    PRESETS.iter().find(|p| p.thread_id == thread_id)
}
