use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sapphire_core::types::PromptMode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, ToolError};
use crate::{Tool, ToolArgs, ToolDefinition, ToolResult};

/// `all` resolves to the whole catalog, `none` to the empty set. Neither can
/// be saved over or deleted.
pub const RESERVED_TOOLSETS: &[&str] = &["all", "none"];

#[derive(Debug, Default, Serialize, Deserialize)]
struct CustomToolsets {
    #[serde(default)]
    toolsets: HashMap<String, Vec<String>>,
}

struct Enabled {
    ability: String,
    functions: Vec<String>,
}

/// Catalog of all known tools plus named toolsets.
///
/// Module toolsets come from the built-in tool modules at init; custom
/// toolsets are user-defined and persisted separately.
pub struct ToolRegistry {
    catalog: Vec<Arc<dyn Tool>>,
    module_toolsets: HashMap<String, Vec<String>>,
    custom_path: PathBuf,
    custom: Mutex<HashMap<String, Vec<String>>>,
    enabled: Mutex<Enabled>,
}

impl ToolRegistry {
    pub fn new(
        catalog: Vec<Arc<dyn Tool>>,
        module_toolsets: Vec<(String, Vec<String>)>,
        custom_path: PathBuf,
    ) -> Self {
        let custom = if custom_path.exists() {
            std::fs::read_to_string(&custom_path)
                .ok()
                .and_then(|raw| serde_json::from_str::<CustomToolsets>(&raw).ok())
                .map(|c| c.toolsets)
                .unwrap_or_default()
        } else {
            HashMap::new()
        };
        info!(
            tools = catalog.len(),
            custom_toolsets = custom.len(),
            "tool registry initialized"
        );
        Self {
            catalog,
            module_toolsets: module_toolsets.into_iter().collect(),
            custom_path,
            custom: Mutex::new(custom),
            enabled: Mutex::new(Enabled {
                ability: "none".to_string(),
                functions: Vec::new(),
            }),
        }
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.catalog.iter().find(|t| t.name() == name).cloned()
    }

    pub fn all_function_names(&self) -> Vec<String> {
        self.catalog.iter().map(|t| t.name().to_string()).collect()
    }

    // --- toolsets ----------------------------------------------------------

    pub fn get_available_abilities(&self) -> Vec<String> {
        let mut names: Vec<String> = RESERVED_TOOLSETS.iter().map(|s| s.to_string()).collect();
        names.extend(self.module_toolsets.keys().cloned());
        names.extend(self.custom.lock().unwrap().keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    pub fn toolset_exists(&self, name: &str) -> bool {
        RESERVED_TOOLSETS.contains(&name)
            || self.module_toolsets.contains_key(name)
            || self.custom.lock().unwrap().contains_key(name)
    }

    pub fn get_toolset_functions(&self, name: &str) -> Option<Vec<String>> {
        match name {
            "all" => Some(self.all_function_names()),
            "none" => Some(Vec::new()),
            _ => self
                .module_toolsets
                .get(name)
                .cloned()
                .or_else(|| self.custom.lock().unwrap().get(name).cloned()),
        }
    }

    /// Whether the toolset is module-provided (as opposed to user-defined).
    pub fn is_module_toolset(&self, name: &str) -> bool {
        self.module_toolsets.contains_key(name)
    }

    pub fn save_toolset(&self, name: &str, functions: &[String]) -> Result<()> {
        if RESERVED_TOOLSETS.contains(&name) || self.module_toolsets.contains_key(name) {
            return Err(ToolError::ProtectedToolset {
                name: name.to_string(),
            });
        }
        let known = self.all_function_names();
        for f in functions {
            if !known.contains(f) {
                return Err(ToolError::UnknownFunction { name: f.clone() });
            }
        }
        let mut custom = self.custom.lock().unwrap();
        custom.insert(name.to_string(), functions.to_vec());
        self.persist_custom(&custom)?;
        info!(toolset = name, count = functions.len(), "custom toolset saved");
        Ok(())
    }

    pub fn delete_toolset(&self, name: &str) -> Result<()> {
        if RESERVED_TOOLSETS.contains(&name) || self.module_toolsets.contains_key(name) {
            return Err(ToolError::ProtectedToolset {
                name: name.to_string(),
            });
        }
        let mut custom = self.custom.lock().unwrap();
        if custom.remove(name).is_none() {
            return Err(ToolError::ToolsetNotFound {
                name: name.to_string(),
            });
        }
        self.persist_custom(&custom)?;
        info!(toolset = name, "custom toolset deleted");
        Ok(())
    }

    fn persist_custom(&self, custom: &HashMap<String, Vec<String>>) -> Result<()> {
        if let Some(parent) = self.custom_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&CustomToolsets {
            toolsets: custom.clone(),
        })?;
        let tmp = self.custom_path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.custom_path)?;
        Ok(())
    }

    // --- enabled set -------------------------------------------------------

    /// Activate a toolset (single name) or a custom function list for the
    /// active chat. Tools whose mode filter excludes `mode` are dropped.
    pub fn update_enabled_functions(
        &self,
        selection: &[String],
        mode: PromptMode,
    ) -> Result<Vec<String>> {
        let (ability, requested) = if selection.len() == 1 && self.toolset_exists(&selection[0]) {
            let name = selection[0].clone();
            let fns = self
                .get_toolset_functions(&name)
                .ok_or_else(|| ToolError::ToolsetNotFound { name: name.clone() })?;
            (name, fns)
        } else {
            ("custom".to_string(), selection.to_vec())
        };

        let mut functions = Vec::new();
        for name in requested {
            match self.tool(&name) {
                Some(tool) => {
                    if tool.modes().contains(&mode) {
                        functions.push(name);
                    }
                }
                None => warn!(function = %name, "skipping unknown function in selection"),
            }
        }

        let mut enabled = self.enabled.lock().unwrap();
        enabled.ability = ability;
        enabled.functions = functions.clone();
        info!(ability = %enabled.ability, count = functions.len(), "enabled functions updated");
        Ok(functions)
    }

    pub fn enabled_function_names(&self) -> Vec<String> {
        self.enabled.lock().unwrap().functions.clone()
    }

    pub fn current_ability_info(&self) -> (String, usize) {
        let enabled = self.enabled.lock().unwrap();
        (enabled.ability.clone(), enabled.functions.len())
    }

    /// Resolved descriptors of the currently enabled tools, for the LLM call.
    pub fn enabled_definitions(&self) -> Vec<ToolDefinition> {
        let enabled = self.enabled.lock().unwrap();
        let tools: Vec<Arc<dyn Tool>> = enabled
            .functions
            .iter()
            .filter_map(|n| self.tool(n))
            .collect();
        crate::to_definitions(&tools)
    }

    // --- network aggregation ----------------------------------------------

    pub fn get_network_functions(&self) -> Vec<String> {
        self.catalog
            .iter()
            .filter(|t| t.network())
            .map(|t| t.name().to_string())
            .collect()
    }

    pub fn has_network_tools_enabled(&self) -> bool {
        let network: Vec<String> = self.get_network_functions();
        self.enabled
            .lock()
            .unwrap()
            .functions
            .iter()
            .any(|f| network.contains(f))
    }

    // --- execution ---------------------------------------------------------

    pub async fn execute(&self, name: &str, args: ToolArgs) -> ToolResult {
        match self.tool(name) {
            Some(tool) => tool.execute(args).await,
            None => ToolResult::error(format!("unknown tool: {name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeTool {
        name: &'static str,
        network: bool,
        modes: &'static [PromptMode],
    }

    #[async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        fn network(&self) -> bool {
            self.network
        }
        fn modes(&self) -> &[PromptMode] {
            self.modes
        }
        async fn execute(&self, _args: ToolArgs) -> ToolResult {
            ToolResult::success("ok")
        }
    }

    fn registry(dir: &tempfile::TempDir) -> ToolRegistry {
        let catalog: Vec<Arc<dyn Tool>> = vec![
            Arc::new(FakeTool {
                name: "time_date",
                network: false,
                modes: crate::ALL_MODES,
            }),
            Arc::new(FakeTool {
                name: "web_fetch",
                network: true,
                modes: crate::ALL_MODES,
            }),
            Arc::new(FakeTool {
                name: "assembled_only",
                network: false,
                modes: &[PromptMode::Assembled],
            }),
        ];
        let modules = vec![
            ("clock".to_string(), vec!["time_date".to_string()]),
            ("web".to_string(), vec!["web_fetch".to_string()]),
        ];
        ToolRegistry::new(catalog, modules, dir.path().join("custom_toolsets.json"))
    }

    #[test]
    fn reserved_toolsets_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        assert_eq!(reg.get_toolset_functions("all").unwrap().len(), 3);
        assert!(reg.get_toolset_functions("none").unwrap().is_empty());
    }

    #[test]
    fn save_toolset_rejects_collisions_and_unknowns() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        assert!(matches!(
            reg.save_toolset("all", &[]),
            Err(ToolError::ProtectedToolset { .. })
        ));
        assert!(matches!(
            reg.save_toolset("clock", &[]),
            Err(ToolError::ProtectedToolset { .. })
        ));
        assert!(matches!(
            reg.save_toolset("mine", &["nope".to_string()]),
            Err(ToolError::UnknownFunction { .. })
        ));
        reg.save_toolset("mine", &["time_date".to_string()]).unwrap();
        assert!(reg.toolset_exists("mine"));
    }

    #[test]
    fn custom_toolsets_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let reg = registry(&dir);
            reg.save_toolset("mine", &["web_fetch".to_string()]).unwrap();
        }
        let reg = registry(&dir);
        assert_eq!(
            reg.get_toolset_functions("mine").unwrap(),
            vec!["web_fetch".to_string()]
        );
    }

    #[test]
    fn mode_filter_drops_excluded_tools() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        let enabled = reg
            .update_enabled_functions(&["all".to_string()], PromptMode::Monolith)
            .unwrap();
        assert!(!enabled.contains(&"assembled_only".to_string()));
        let enabled = reg
            .update_enabled_functions(&["all".to_string()], PromptMode::Assembled)
            .unwrap();
        assert!(enabled.contains(&"assembled_only".to_string()));
    }

    #[test]
    fn network_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        assert_eq!(reg.get_network_functions(), vec!["web_fetch".to_string()]);
        reg.update_enabled_functions(&["clock".to_string()], PromptMode::Monolith)
            .unwrap();
        assert!(!reg.has_network_tools_enabled());
        reg.update_enabled_functions(&["web".to_string()], PromptMode::Monolith)
            .unwrap();
        assert!(reg.has_network_tools_enabled());
    }

    #[tokio::test]
    async fn unknown_tool_executes_to_error() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(&dir);
        let result = reg.execute("missing", ToolArgs::default()).await;
        assert!(result.is_error);
        assert!(result.content.contains("unknown tool"));
    }
}
