//! Built-in tool modules, registered at init time.

pub mod notepad;
pub mod time_date;
pub mod web_fetch;

use std::path::Path;
use std::sync::Arc;

use crate::privacy::PrivacyGate;
use crate::Tool;

/// Construct the built-in catalog plus the module-provided toolsets
/// (module name → its function names).
pub fn build_tools(
    data_dir: &Path,
    gate: Arc<PrivacyGate>,
) -> (Vec<Arc<dyn Tool>>, Vec<(String, Vec<String>)>) {
    let catalog: Vec<Arc<dyn Tool>> = vec![
        Arc::new(time_date::TimeDate),
        Arc::new(notepad::Notepad::new(data_dir.join("notes"))),
        Arc::new(web_fetch::WebFetch::new(gate)),
    ];

    let modules = vec![
        ("time_date".to_string(), vec!["time_date".to_string()]),
        ("notepad".to_string(), vec!["notepad".to_string()]),
        ("web".to_string(), vec!["web_fetch".to_string()]),
    ];

    (catalog, modules)
}
