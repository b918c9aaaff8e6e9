mod invocation;
mod lockfile;
mod manifest;
mod project;
mod record;
mod scenario;

pub use invocation::{ToolInvocation, ToolOutput};
pub use lockfile::{normalize_package_name, LockFile, LockedPackage, LOCK_FILE_NAME};
pub use manifest::{manifest_version_from_toml_str, MANIFEST_FILE_NAME};
pub use project::{validate_name, Project, RegistrySource};
pub use record::{OperationRecord, Outcome, NO_CHANGE};
pub use scenario::{
    Action, BumpKind, ExternalDependency, Scenario, ScenarioTemplate, Step, CHAIN_PROJECT_NAMES,
    DEFAULT_BUILD_FORMAT, INITIAL_PROJECT_VERSION,
};
