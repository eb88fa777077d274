use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result, WrapErr};

use ember::{lexer, AsmOptions, Assembler, Emulator};

/// Ember is an assembler & emulator toolchain for the Ember-16 soft CPU.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a source file into a raw binary image
    Assemble {
        /// Source file to assemble
        src: PathBuf,
        /// Destination for the binary image
        #[arg(short, long, default_value = "a.bin")]
        output: PathBuf,
        /// Address the image will be loaded at
        #[arg(long, value_parser = parse_word, default_value = "0")]
        origin: u16,
    },
    /// Load a binary image and execute it
    Run {
        /// Binary image to run
        bin: PathBuf,
        /// Address to load the image at
        #[arg(long, value_parser = parse_word, default_value = "0")]
        origin: u16,
        /// Address execution starts from; defaults to the origin
        #[arg(long, value_parser = parse_word)]
        entry: Option<u16>,
        /// Stop after this many cycles; 0 runs until HALT
        #[arg(long, value_parser = parse_count, default_value = "0")]
        cycles: u64,
        /// Print each instruction address and mnemonic while running
        #[arg(long)]
        trace: bool,
    },
    /// Print a hex dump of a loaded binary image
    Dump {
        /// Binary image to inspect
        bin: PathBuf,
        /// First address to show
        #[arg(long, value_parser = parse_word)]
        start: u16,
        /// Number of bytes to show
        #[arg(long, value_parser = parse_count)]
        length: u64,
        /// Address to load the image at
        #[arg(long, value_parser = parse_word, default_value = "0")]
        origin: u16,
    },
}

/// Parse a 16-bit CLI value in any of the radix forms the assembler takes.
fn parse_word(text: &str) -> Result<u16, String> {
    lexer::parse_number(text)
        .map(|value| (value & 0xFFFF) as u16)
        .ok_or_else(|| format!("invalid numeric value: {text}"))
}

fn parse_count(text: &str) -> Result<u64, String> {
    let (body, radix) = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        (bin, 2)
    } else if let Some(hex) = text.strip_prefix('$') {
        (hex, 16)
    } else {
        (text, 10)
    };
    u64::from_str_radix(body, radix).map_err(|_| format!("invalid count: {text}"))
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            // Unknown options and missing arguments are plain errors.
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    match dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(args: Args) -> Result<()> {
    match args.command {
        Command::Assemble {
            src,
            output,
            origin,
        } => {
            let src_name = src.to_string_lossy();
            println!("{:>12} target {}", "Assembling".green().bold(), src_name);
            let mut assembler = Assembler::new();
            let result = assembler.assemble_file(&src_name, AsmOptions::with_origin(origin));
            for message in result.messages() {
                eprintln!("{message}");
            }
            if !result.ok {
                miette::bail!("assembly failed");
            }
            fs::write(&output, &result.bytes)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to write {}", output.to_string_lossy()))?;
            println!(
                "{:>12} {} bytes to {}",
                "Wrote".green().bold(),
                result.bytes.len(),
                output.to_string_lossy()
            );
            Ok(())
        }
        Command::Run {
            bin,
            origin,
            entry,
            cycles,
            trace,
        } => {
            let image = fs::read(&bin)
                .into_diagnostic()
                .wrap_err_with(|| format!("unable to load {}", bin.to_string_lossy()))?;
            let mut emulator = Emulator::new();
            emulator.load_image(&image, origin)?;
            emulator.registers_mut().pc = entry.unwrap_or(origin);
            println!("{:>12} binary", "Running".green().bold());
            emulator.run(cycles, trace);
            Ok(())
        }
        Command::Dump {
            bin,
            start,
            length,
            origin,
        } => {
            let image = fs::read(&bin)
                .into_diagnostic()
                .wrap_err_with(|| format!("unable to load {}", bin.to_string_lossy()))?;
            let mut emulator = Emulator::new();
            emulator.load_image(&image, origin)?;
            print!("{}", emulator.dump(start, length as usize)?);
            Ok(())
        }
    }
}
