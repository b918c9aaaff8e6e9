mod audit;
mod fs_ops;
mod git_ops;
mod process;
mod recorder;

pub use audit::{format_audit_line, log_file_name, AuditLevel, AuditLog, DEFAULT_LOGGER_NAME};
pub use fs_ops::{create_run_root, prepare_existing_root, remove_file, write_ignore_file};
pub use git_ops::{validate_short_commit_id, CommitterIdentity, GitCli, VersionControl};
pub use process::{describe_failure, OperationRunner, ProcessRunner};
pub use recorder::ChangeRecorder;
