fn main() {
    // The build target becomes part of the segment fingerprint.
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=UNDODB_BUILD_TARGET={target}");
    println!("cargo:rerun-if-changed=build.rs");
}
