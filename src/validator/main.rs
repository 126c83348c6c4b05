//! Standalone validator for offer configuration files.
//!
//! This tool checks an offer JSON file for proper structure, a positive
//! price, a sane subscription period and complete payment details.

use std::process::ExitCode;

use clap::Parser;

// Import from the main crate
use channel_access_bot::config::{MAX_DURATION_DAYS, OfferConfig};

/// Offer configuration validator.
#[derive(Parser, Debug)]
#[command(name = "validate_offer")]
#[command(about = "Validates offer configuration files for the channel access bot")]
#[command(version)]
struct Args {
    /// Path to the JSON offer file to validate.
    #[arg(short, long, default_value = "offer.json")]
    file: String,

    /// Generate an example offer file at the specified path.
    #[arg(long)]
    generate_example: Option<String>,

    /// Show the parsed offer.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Handle example generation
    if let Some(output_path) = args.generate_example {
        return generate_example(&output_path);
    }

    validate_offer(&args.file, args.verbose)
}

fn generate_example(output_path: &str) -> ExitCode {
    let example = OfferConfig::example();

    match example.save_to_file(output_path) {
        Ok(()) => {
            println!("✓ Example offer written to: {output_path}");
            println!("\nEdit the payment details before using it.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to write example file: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_offer(path: &str, verbose: bool) -> ExitCode {
    println!("Validating: {path}\n");

    let offer = match OfferConfig::load_from_file(path) {
        Ok(offer) => offer,
        Err(e) => {
            eprintln!("✗ Failed to load offer: {e}");
            return ExitCode::FAILURE;
        }
    };

    if verbose {
        println!("Price:    {}", offer.price_label());
        println!("Duration: {} days", offer.duration_days);
        println!("Phone:    {}", offer.payment.phone);
        println!("Bank:     {}", offer.payment.bank);
        println!();
    }

    let errors = offer.validate_all();

    if errors.is_empty() {
        println!(
            "✓ Offer is valid: {} for {} days",
            offer.price_label(),
            offer.duration_days
        );
        if offer.duration_days > 365 {
            println!("  ⚠ Warning: periods longer than a year are unusual (max {MAX_DURATION_DAYS})");
        }
        ExitCode::SUCCESS
    } else {
        for e in &errors {
            println!("  ✗ Error: {e}");
        }
        println!("\n✗ Validation failed: {} error(s)", errors.len());
        ExitCode::FAILURE
    }
}
