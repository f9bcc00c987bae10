//! vc-tools: Agent-facing call tools
//!
//! Each tool translates an agent invocation into call manager operations and
//! answers with a small JSON [`CallToolResult`]. Failures are encoded in the
//! result; `execute` never returns an error for a call problem.

use std::sync::Arc;

use vc_core::{CallManager, ToolManager};

pub mod continue_call;
pub mod end_call;
pub mod initiate;
pub mod result;
pub mod speak;
pub mod status;

pub use continue_call::ContinueCallTool;
pub use end_call::EndCallTool;
pub use initiate::InitiateCallTool;
pub use result::CallToolResult;
pub use speak::SpeakToUserTool;
pub use status::GetStatusTool;

/// Register every call tool with the tool manager
pub fn register_call_tools(tools: &mut ToolManager, calls: CallManager, default_to: Option<String>) {
    tools.register(Arc::new(
        InitiateCallTool::new(calls.clone()).with_default_to(default_to),
    ));
    tools.register(Arc::new(ContinueCallTool::new(calls.clone())));
    tools.register(Arc::new(SpeakToUserTool::new(calls.clone())));
    tools.register(Arc::new(EndCallTool::new(calls.clone())));
    tools.register(Arc::new(GetStatusTool::new(calls)));
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use vc_core::{
        AdmissionPolicy, CallManager, CallRegistry, MemoryCallStore, MockProvider,
        ManagerSettings,
    };

    pub fn manager() -> (CallManager, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new());
        let settings = ManagerSettings {
            from_number: "+15550000000".to_string(),
            admission: AdmissionPolicy::open(),
            ..Default::default()
        };
        let manager = CallManager::new(
            settings,
            CallRegistry::new(),
            provider.clone(),
            Arc::new(MemoryCallStore::new()),
        );
        (manager, provider)
    }
}
