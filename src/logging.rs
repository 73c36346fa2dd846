/// Component tags attached to tracing events as the `log_type` field so
/// log output can be filtered per subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Supervisor,
    Registry,
    Store,
    Download,
    Files,
    Backup,
    Query,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Supervisor => "supervisor",
            LogType::Registry => "registry",
            LogType::Store => "store",
            LogType::Download => "download",
            LogType::Files => "files",
            LogType::Backup => "backup",
            LogType::Query => "query",
        }
    }
}
