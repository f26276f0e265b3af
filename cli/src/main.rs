//! schemahub CLI — inspect registry build configuration.
//!
//! Usage:
//! ```bash
//! schemahub info
//! schemahub version
//! ```

use std::env;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "version" | "--version" | "-V" => {
            println!("schemahub {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("schemahub {}", env!("CARGO_PKG_VERSION"));
    println!("Confluent-compatible schema registry core\n");
    println!("USAGE:");
    println!("    schemahub <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info     Show registry configuration info");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    println!("Schemahub v{}", env!("CARGO_PKG_VERSION"));
    println!("  Schema formats: AVRO, PROTOBUF, JSON");
    println!("  Default compatibility: BACKWARD");
    println!("  Default context: .");
    println!("  Storage backends: memory, SQLite (feature: sqlite), Postgres (feature: postgres)");
    println!("  Pool defaults: 25 max / 5 idle connections, 5 minute lifetime");
}
