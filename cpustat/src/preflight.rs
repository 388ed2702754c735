//! Pre-flight checks for cpustat
//!
//! Validates system requirements before attempting to load the eBPF probe.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Minimum kernel version: BPF ring buffer (5.8) and fexit (5.5)
const MIN_KERNEL_VERSION: (u32, u32) = (5, 8);

/// Kernel BTF, required to attach fexit programs
const KERNEL_BTF_PATH: &str = "/sys/kernel/btf/vmlinux";

/// Run all pre-flight checks before eBPF loading
pub fn run_preflight_checks(bpf_path: &Path) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_kernel_btf(Path::new(KERNEL_BTF_PATH))?;
    check_object_exists(bpf_path)?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: cpustat requires root privileges to load eBPF programs.\n\n\
         Run with: sudo cpustat ...\n\
         Or sample without eBPF: cpustat --source procfs"
    );
}

/// Parse "major.minor" out of a kernel release string such as "6.1.0-arch1-1"
fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some((major, minor))
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    // "Linux version 6.1.0-arch1-1 ..."
    let release = version_str.split_whitespace().nth(2).unwrap_or("unknown");

    let Some((major, minor)) = parse_kernel_release(release) else {
        // Can't parse, assume it's fine
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {}.{} is too old.\n\n\
             cpustat requires Linux {}.{} or newer for eBPF ring buffer support.\n\
             Current kernel: {}",
            major,
            minor,
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
            release
        );
    }

    Ok(())
}

/// Check that the kernel exposes BTF type information
fn check_kernel_btf(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "Kernel BTF not found at {}\n\n\
             fexit probes need a kernel built with CONFIG_DEBUG_INFO_BTF=y.",
            path.display()
        );
    }
    Ok(())
}

/// Check if the compiled eBPF object exists
fn check_object_exists(bpf_path: &Path) -> Result<()> {
    if !bpf_path.is_file() {
        bail!(
            "eBPF object not found: {}\n\n\
             Build it with: cargo xtask build-ebpf\n\
             Or point to it with: --bpf-path <PATH>",
            bpf_path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_version_check() {
        // Don't assert success since test might run on old kernel
        let _ = check_kernel_version();
    }

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("6.1.0-arch1-1"), Some((6, 1)));
        assert_eq!(parse_kernel_release("5.15.0-generic"), Some((5, 15)));
        assert_eq!(parse_kernel_release("4.19rc1"), Some((4, 19)));
        assert_eq!(parse_kernel_release("4"), None);
        assert_eq!(parse_kernel_release("unknown"), None);
    }

    #[test]
    fn test_object_not_found() {
        let result = check_object_exists(Path::new("/nonexistent/path/to/cpustat"));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("eBPF object not found"));
    }

    #[test]
    fn test_missing_btf() {
        let err = check_kernel_btf(Path::new("/nonexistent/btf/vmlinux")).unwrap_err();
        assert!(err.to_string().contains("CONFIG_DEBUG_INFO_BTF"));
    }
}
