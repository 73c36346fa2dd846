/// Pluggable detection of the "server finished booting" marker in child
/// process output, so alternate server binaries can swap in their own
/// readiness strings without touching the state machine.
pub trait ReadyDetector: Send + Sync {
    fn is_ready_marker(&self, chunk: &str) -> bool;
}

/// Matches the boot banner of a vanilla server.
#[derive(Debug, Default, Clone, Copy)]
pub struct VanillaReadyDetector;

impl ReadyDetector for VanillaReadyDetector {
    fn is_ready_marker(&self, chunk: &str) -> bool {
        chunk.contains("Done") && chunk.contains(r#"For help, type "help""#)
    }
}
