use colored::*;
use terminal_size::{terminal_size, Height, Width};

use crate::stats::ModelStats;

pub fn print_header(model: &str, provider: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let line = "─".repeat(width.0 as usize);
    println!("{}", line.black().bold());

    let name = "model-relay".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    let info = format!("  {}  •  {}", model, provider).cyan();
    println!("{}", info);

    println!("{}", line.black().bold());
}

pub fn print_answer(content: &str) {
    println!("\n{}\n", content);
}

/// Cost of this call and of the whole process so far.
pub fn print_cost(call_cost: f64, backend: &ModelStats, process: &ModelStats) {
    println!(
        "  {} call: ${:.6}  •  model {}  •  process {}",
        "$".green().bold(),
        call_cost,
        backend.summary(),
        process.summary()
    );
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "❌".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}
