//! the main compiler binary. takes a source file, an optional output format
//! (bytecode by default), and an output path.
//!
//! run with `--help` for more info.

use smol::back::asm::disassemble;
use smol::back::codegen::translate;
use smol::front::lex::Lexer;
use smol::front::parse::parse;
use smol::middle::analyze;

use clap::{Parser, ValueEnum};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the input file
    file: String,
    /// the output format
    #[arg(value_enum, short, long, default_value_t = Output::Bytecode)]
    out: Output,
    /// where to write the output (bytecode mode only)
    #[arg(short = 'o', long, default_value = "program.smolc")]
    output: String,
    /// turn on optimizations (accepted for interface parity; this backend
    /// has no optimizer, per spec)
    #[arg(short = 'O', default_value_t = false)]
    optimize: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum)]
enum Output {
    /// the list of tokens
    Tokens,
    /// the ast data structure
    Ast,
    /// the disassembled bytecode
    Asm,
    /// the raw bytecode file
    Bytecode,
}

fn main() {
    use Output::*;
    let args = Args::parse();

    if args.optimize {
        eprintln!("note: -O/--optimize has no effect; this backend has no optimizer");
    }

    let input = String::from_utf8(std::fs::read(&args.file).expect("file should be readable"))
        .expect("input characters should be utf8");

    match args.out {
        Tokens => {
            let mut lexer = Lexer::new(&input);
            loop {
                match lexer.next() {
                    Ok(Some(token)) => println!("{token}"),
                    Ok(None) => break,
                    Err(err) => {
                        eprintln!("lex error: {err}");
                        std::process::exit(1);
                    }
                }
            }
        }
        Ast => match parse(&input) {
            Ok(program) => println!("{program:?}"),
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        },
        Asm => {
            let code = match compile(&input) {
                Ok(code) => code,
                Err(msg) => {
                    eprintln!("{msg}");
                    std::process::exit(1);
                }
            };
            println!("{}", disassemble(&code));
        }
        Bytecode => {
            let code = match compile(&input) {
                Ok(code) => code,
                Err(msg) => {
                    eprintln!("{msg}");
                    std::process::exit(1);
                }
            };
            if let Err(err) = std::fs::write(&args.output, &code) {
                eprintln!("failed to write {}: {err}", args.output);
                std::process::exit(1);
            }
        }
    }
}

/// Parses, semantically analyzes, and translates `input`, collapsing the
/// three stages' distinct error types into one diagnostic string (the CLI's
/// only job is to print it to stderr and exit non-zero; a translation error
/// leaves no output file, since `compile` returns before any is opened).
fn compile(input: &str) -> Result<Vec<u8>, String> {
    let program = parse(input).map_err(|e| e.to_string())?;
    analyze(&program).map_err(|e| e.to_string())?;
    translate(&program).map_err(|e| e.to_string())
}
