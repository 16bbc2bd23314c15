//! Inspect command implementation for genexec CLI.
//!
//! Shows what a launcher script would start, without running anything.

use genexec_core::LaunchInfo;

use crate::colors;
use crate::run::resolve_executable;

/// Inspect `executable` and print the result.
pub fn execute(executable: &str, json: bool) -> anyhow::Result<()> {
    let path = resolve_executable(executable)?;
    let info = genexec_core::inspect(&path);

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    match info {
        Some(info) => print_info(&info),
        None => println!("{} is not a launcher script", path.display()),
    }
    Ok(())
}

fn print_info(info: &LaunchInfo) {
    println!("{}Launcher:{}    {}", colors::BOLD, colors::RESET, info.script.display());
    println!("{}App home:{}    {}", colors::BOLD, colors::RESET, info.app_home.display());
    println!("{}Entry point:{} {}", colors::BOLD, colors::RESET, info.entry_point);

    println!("{}Classpath:{}", colors::BOLD, colors::RESET);
    for entry in &info.classpath {
        println!("  {}", entry.display());
    }

    if !info.fixed_args.is_empty() {
        println!("{}Fixed args:{}  {}", colors::BOLD, colors::RESET, info.fixed_args.join(" "));
    }
    if !info.runtime_options.is_empty() {
        println!(
            "{}Runtime options (not applied):{} {}",
            colors::DIM,
            colors::RESET,
            info.runtime_options.join(" ")
        );
    }
}
