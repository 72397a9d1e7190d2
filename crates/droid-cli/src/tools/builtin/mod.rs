//! Built-in tools for the agent

mod adb;
mod install_build;

pub use adb::AdbTool;
pub use install_build::InstallBuildTool;

use super::registry::ToolRegistry;

/// Create a registry with the default tool set
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(AdbTool);
    registry.register(InstallBuildTool::new());

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_contents() {
        let registry = create_default_registry();
        assert_eq!(
            registry.list_names(),
            vec!["adb", "get_and_install_latest_build"]
        );
    }
}
