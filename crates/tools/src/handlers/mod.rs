pub mod add_numbers;
pub mod make_note;

use toolrelay_common::ToolRelayError;

use super::registry::{ToolHandlerContext, ToolRegistry};

/// Register the built-in tools. Registration order is the advertisement order.
pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<(), ToolRelayError> {
    registry.register(add_numbers::descriptor(), add_numbers::handler())?;
    registry.register(make_note::descriptor(), make_note::handler())?;
    Ok(())
}

/// A registry holding every built-in tool.
pub fn builtin_registry(context: ToolHandlerContext) -> Result<ToolRegistry, ToolRelayError> {
    let mut registry = ToolRegistry::new(context);
    register_builtin_tools(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolKind;

    #[test]
    fn test_builtin_registry_matches_catalog() {
        let registry = builtin_registry(ToolHandlerContext::new(std::env::temp_dir())).unwrap();
        let expected: Vec<&str> = ToolKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(registry.names(), expected);
    }

    #[test]
    fn test_builtins_cannot_be_registered_twice() {
        let mut registry =
            builtin_registry(ToolHandlerContext::new(std::env::temp_dir())).unwrap();
        assert!(register_builtin_tools(&mut registry).is_err());
    }
}
