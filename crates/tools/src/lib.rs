pub mod catalog;
pub mod handlers;
pub mod registry;

pub use catalog::{ToolKind, ToolOutcome};
pub use handlers::{builtin_registry, register_builtin_tools};
pub use registry::{RegisteredTool, ToolDescriptor, ToolHandler, ToolHandlerContext, ToolRegistry};
