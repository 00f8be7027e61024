//! Structured logging init (spec AMBIENT STACK A.1): installs the same
//! `tracing_subscriber` registry `env-tracing-logger` builds for the rest
//! of this workspace. Per-agent log lines are distinguished via a
//! `tracing` span carrying `self_id`, entered once per spawned thread in
//! [`crate::app::spawn`], rather than a string prefix.

pub fn init() -> impl Drop {
    env_tracing_logger::init()
}
