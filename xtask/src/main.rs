use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Directory of the eBPF crate, relative to the workspace root
const EBPF_CRATE: &str = "cpustat-ebpf";

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Build the eBPF probe object
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        #[arg(long)]
        release: bool,
    },
    /// Build the probe and the userspace binary, then run it under sudo
    Run {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        /// Arguments passed through to cpustat
        #[arg(last = true)]
        run_args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target, release } => build_ebpf(&target, release)?,
        Cmd::Run { target, run_args } => run(&target, &run_args)?,
    }

    Ok(())
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn build_ebpf(target: &str, _release: bool) -> Result<()> {
    // Always build in release mode because debug builds with recent Rust nightlies (1.94+)
    // pull in formatting code (LowerHex) that's incompatible with BPF linker.
    // Release mode uses LTO to eliminate dead code.
    let root = workspace_root();
    let mut cmd = Command::new("cargo");
    cmd.current_dir(root.join(EBPF_CRATE))
        .arg("+nightly")
        .arg("build")
        .arg("--target")
        .arg(target)
        .arg("-Z")
        .arg("build-std=core")
        .arg("--target-dir")
        .arg(root.join("target"))
        .arg("--release"); // Always release

    let status = cmd.status().context("Failed to build eBPF program")?;

    if !status.success() {
        anyhow::bail!("Failed to build eBPF program");
    }

    println!("✓ eBPF program built successfully");
    println!("  Object: target/{target}/release/cpustat");
    println!("  Profile: release (always)");

    Ok(())
}

fn run(target: &str, run_args: &[String]) -> Result<()> {
    build_ebpf(target, true)?;

    let root = workspace_root();
    let status = Command::new("cargo")
        .current_dir(&root)
        .args(["build", "--release", "--package", "cpustat"])
        .status()
        .context("Failed to build cpustat")?;
    if !status.success() {
        anyhow::bail!("Failed to build cpustat");
    }

    let bpf_path = root.join("target").join(target).join("release").join("cpustat");
    let status = Command::new("sudo")
        .arg(root.join("target/release/cpustat"))
        .arg("--bpf-path")
        .arg(bpf_path)
        .args(run_args)
        .status()
        .context("Failed to run cpustat")?;
    if !status.success() {
        anyhow::bail!("cpustat exited with {status}");
    }

    Ok(())
}
