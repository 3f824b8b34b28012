//! Shared helpers for the subprocess-backed integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mcprun::server::{ServerSpec, ToolServer, ToolServerHandle};

pub fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("fake_tool_server.sh")
}

/// Spec for the scripted server exposing `tools`
pub fn fake_spec(name: &str, tools: &[&str]) -> ServerSpec {
    fake_spec_with(name, tools, 0, false)
}

/// `exit_after` > 0 makes the server die on call number `exit_after + 1`
pub fn fake_spec_with(name: &str, tools: &[&str], exit_after: u32, paged: bool) -> ServerSpec {
    let mut args = vec![
        fixture().to_string_lossy().into_owned(),
        tools.join(","),
        exit_after.to_string(),
    ];
    if paged {
        args.push("paged".to_string());
    }
    ServerSpec::new(name, "bash")
        .with_args(args)
        .with_timeouts(Duration::from_secs(10), Duration::from_secs(10))
}

pub fn handle(spec: ServerSpec) -> Arc<ToolServerHandle> {
    Arc::new(ToolServerHandle::new(spec))
}

pub fn as_dyn(handles: &[Arc<ToolServerHandle>]) -> Vec<Arc<dyn ToolServer>> {
    handles.iter().map(|h| h.clone() as Arc<dyn ToolServer>).collect()
}
