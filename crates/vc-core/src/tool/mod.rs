//! Tool system exposing call control to an agent
//!
//! Tools are registered in a [`ToolManager`] and invoked by name with JSON
//! input.

pub mod definition;
pub mod manager;
pub mod traits;

pub use definition::ToolDefinition;
pub use manager::ToolManager;
pub use traits::{Tool, ToolResult};
