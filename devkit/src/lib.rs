/*!
# Fleetwatch DevKit - stubs and helpers for testing without a fleet

- `MockShell`: scripted `RemoteShell` with per-host behaviour and call recording
- `fixtures`: hosts, samples, rules and probe output
- `TestHarness`: temporary audit directory, in-memory audit sink, test logging
*/

pub mod fixtures;
pub mod shell_stub;
pub mod test_utils;

pub use shell_stub::{ExecutedCommand, HostBehavior, MockShell};
pub use test_utils::{MemoryAuditSink, TestHarness};
