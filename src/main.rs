//! Tool Executor CLI

use anyhow::Context;
use std::env;
use std::fs;
use tool_executor::{
    InvocationConfig, Params, Platform, ResolvedTool, RunOutcome, Token, ToolRunner, Toolchain,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "info" => {
            show_platform_info();
        }
        "exec" => {
            if args.len() < 4 {
                eprintln!("Usage: tool-executor exec <tool> <arg> [args...]");
                std::process::exit(1);
            }

            let outcome = exec_command(&args[2], &args[3..])?;
            report(&outcome);
        }
        "run" => {
            if args.len() < 4 {
                eprintln!("Usage: tool-executor run <tool> <config.json|config.yaml>");
                std::process::exit(1);
            }

            let outcome = run_config(&args[2], &args[3]).await?;
            report(&outcome);
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Tool Executor v{}", tool_executor::VERSION);
    println!();
    println!("Usage:");
    println!("  tool-executor info                    Show platform information");
    println!("  tool-executor exec <tool> <arg> [args...]  Run a tool from PATH, blocking");
    println!("  tool-executor run <tool> <config>     Run from a JSON/YAML invocation config");
    println!();
    println!("Examples:");
    println!("  tool-executor exec echo hello");
    println!("  tool-executor run openssl invocation.yaml");
}

fn show_platform_info() {
    let platform = Platform::current();

    println!("Platform Information:");
    println!("  OS: {} ({})", env::consts::OS, platform.name());
    println!("  Architecture: {}", env::consts::ARCH);
    println!("  Shell: {} {}", platform.default_shell(), platform.shell_arg());
}

fn exec_command(tool: &str, args: &[String]) -> anyhow::Result<RunOutcome> {
    let resolved = ResolvedTool::locate(tool)?;
    let toolchain = Toolchain::local(tool, &resolved.path);
    let runner = ToolRunner::new(toolchain);

    let tokens: Vec<Token> = args.iter().map(|a| Token::from(a.clone())).collect();
    let mut config = InvocationConfig::new(Params::Argv(tokens));
    config.use_shell = false;

    Ok(runner.run_blocking(&config)?)
}

async fn run_config(tool: &str, config_path: &str) -> anyhow::Result<RunOutcome> {
    let text = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {config_path}"))?;

    let config = if config_path.ends_with(".json") {
        InvocationConfig::from_json(&text)?
    } else {
        InvocationConfig::from_yaml(&text)?
    };

    let resolved = ResolvedTool::locate(tool)?;
    let runner = ToolRunner::new(Toolchain::local(tool, &resolved.path));

    if config.prefer_sync {
        Ok(runner.run_blocking(&config)?)
    } else {
        Ok(runner.execute(&config).await?)
    }
}

fn report(outcome: &RunOutcome) {
    if !outcome.process_output.is_empty() {
        println!("{}", outcome.process_output.trim_end());
    }

    if !outcome.process_error.is_empty() {
        eprintln!("{}", outcome.process_error.trim_end());
    }

    println!();
    println!("End: {:?}", outcome.process_end);

    match outcome.process_exit_code {
        Some(code) => println!("Exit code: {code}"),
        None => println!("Exit code: none"),
    }

    if outcome.has_error {
        std::process::exit(outcome.process_exit_code.unwrap_or(1));
    }
}
