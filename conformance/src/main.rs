//! Rowstream conformance runner.
//!
//! List all cases:
//! ```bash
//! rowstream-conformance --list
//! ```
//!
//! List one category as JSON:
//! ```bash
//! rowstream-conformance --list --category read_row --format json
//! ```
//!
//! Run a case:
//! ```bash
//! rowstream-conformance --case read_row.multi_streams
//! ```
//!
//! # Exit Codes
//!
//! - 0: Case passed
//! - 1: Case failed
//! - 2: Internal error

use clap::Parser;
use facet::Facet;
use rowstream_conformance::{ConformanceTest, find, list_all, list_category, run_blocking};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rowstream-conformance")]
#[command(about = "Conformance cases for rowstream clients")]
struct Args {
    /// Run a specific case (e.g., "read_row.point_read_deadline")
    #[arg(long)]
    case: Option<String>,

    /// List available cases
    #[arg(long)]
    list: bool,

    /// Filter the listing by category (read_row, read_rows, execute_query)
    #[arg(long)]
    category: Option<String>,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: String,
}

/// JSON output for a case listing.
#[derive(Facet)]
struct TestCaseJson {
    name: String,
    summary: String,
}

/// JSON output for a case result.
#[derive(Facet)]
struct TestResultJson {
    test: String,
    passed: bool,
    error: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    if args.list {
        list_tests(&args);
        return;
    }

    if let Some(case) = &args.case {
        run_test(case, &args);
    } else {
        eprintln!("Usage: rowstream-conformance --case <test_name>");
        eprintln!("       rowstream-conformance --list");
        std::process::exit(2);
    }
}

fn list_tests(args: &Args) {
    let tests = match &args.category {
        Some(category) => list_category(category),
        None => list_all(),
    };

    if args.format == "json" {
        let output: Vec<TestCaseJson> = tests
            .iter()
            .map(|test| TestCaseJson {
                name: test.name.to_string(),
                summary: test.summary.to_string(),
            })
            .collect();
        println!("{}", facet_json::to_string(&output));
        return;
    }

    println!("Available cases:\n");
    let mut current_category = "";
    for test in &tests {
        let category = test.category();
        if category != current_category {
            if !current_category.is_empty() {
                println!();
            }
            println!("## {category}");
            current_category = category;
        }
        println!("  {:<40} {}", test.name, test.summary);
    }
    println!("\nTotal: {} cases", tests.len());
}

fn run_test(case: &str, args: &Args) {
    let Some(test) = find(case) else {
        eprintln!("unknown case: {case}");
        std::process::exit(2);
    };

    let result = match run_case(test) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("could not start runtime: {e}");
            std::process::exit(2);
        }
    };

    if args.format == "json" {
        let output = TestResultJson {
            test: case.to_string(),
            passed: result.passed,
            error: result.error.clone(),
        };
        println!("{}", facet_json::to_string(&output));
    } else if result.passed {
        println!("PASS: {case}");
    } else if let Some(error) = &result.error {
        eprintln!("FAIL: {case}");
        eprintln!("  {error}");
    }

    std::process::exit(if result.passed { 0 } else { 1 });
}

fn run_case(test: &ConformanceTest) -> std::io::Result<rowstream_conformance::testcase::TestResult> {
    tracing::debug!(case = test.name, "running case");
    run_blocking(test)
}
