//! Build metadata captured by `build.rs`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT: &str = env!("DOCBRIDGE_BUILD_GIT_HASH");
pub const BUILD_TIMESTAMP: &str = env!("DOCBRIDGE_BUILD_TIMESTAMP");

/// Text printed by `docbridge --version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("DOCBRIDGE_BUILD_GIT_HASH"),
    "\nbuilt: ",
    env!("DOCBRIDGE_BUILD_TIMESTAMP")
);

/// One-line summary logged at startup.
pub fn startup_line() -> String {
    format!("docbridge v{VERSION} ({GIT_COMMIT}, built {BUILD_TIMESTAMP})")
}
