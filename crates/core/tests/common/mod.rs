//! Shared helpers for the integration suites

#![allow(dead_code)]

use mirai_api::{
    CommandContext, CommandOutcome, CoreConfig, PluginId, SchedulerConfig, ServerCore,
};
use std::sync::Arc;
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn owner(name: &str) -> PluginId {
    PluginId::new(name).expect("valid plugin id")
}

pub fn ok_handler(ctx: &mut CommandContext) -> anyhow::Result<CommandOutcome> {
    ctx.reply(format!("ran /{}", ctx.label()));
    Ok(CommandOutcome::Success)
}

/// Core rooted in a fresh temporary directory
pub fn test_core(workers: usize) -> (tempfile::TempDir, Arc<ServerCore>) {
    let root = tempfile::tempdir().expect("Failed to create temp dir");
    let config = CoreConfig {
        scheduler: SchedulerConfig {
            worker_threads: workers,
            ..SchedulerConfig::default()
        },
        ..CoreConfig::default()
    };

    let core = ServerCore::builder()
        .config(config)
        .root_dir(root.path())
        .build()
        .expect("Failed to build server core");
    (root, core)
}
