// build.rs

use std::env;

/// Stamps the binary with a release version and build profile.
///
/// `GATEBRIDGE_VERSION` lets release pipelines override the crate version, e.g.
/// with a tag plus commit suffix.
fn main() {
    let version = env::var("GATEBRIDGE_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| env::var("CARGO_PKG_VERSION").ok())
        .unwrap_or_else(|| "dev".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=GATEBRIDGE_BUILD_VERSION={version}");
    println!("cargo:rustc-env=GATEBRIDGE_BUILD_PROFILE={profile}");
    println!("cargo:rerun-if-env-changed=GATEBRIDGE_VERSION");
}
