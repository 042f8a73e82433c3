//! Application/UI seam.
//!
//! The engine never touches UI state directly; it is handed a set of pure
//! getter/setter callbacks at startup so the core stays testable with fakes.

use evalsync_types::{LogHandle, LogPreview};

pub trait ApplicationContext: Send + Sync {
    /// Replace the displayed handle list after a reconciliation pass.
    fn set_log_handles(&self, handles: Vec<LogHandle>);

    /// Name (or name suffix) of the currently selected log, if any.
    fn get_selected_log(&self) -> Option<String>;

    /// Re-point the selection after the handle list changed; selection must
    /// never silently jump when unrelated files are added.
    fn set_selected_log_index(&self, index: usize);

    /// Deliver freshly fetched previews to the UI.
    fn update_log_previews(&self, previews: Vec<LogPreview>);
}
