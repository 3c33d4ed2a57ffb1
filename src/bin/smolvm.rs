//! the VM runner binary. takes a bytecode file, runs it to completion, and
//! optionally dumps the final register file, flags, and halted state.
//!
//! run with `--help` for more info.

use smol::back::vm::Vm;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// the bytecode file to run
    file: String,
    /// print final R[0..8], flags, and halted state to stdout
    #[arg(long, default_value_t = false)]
    dump_registers: bool,
}

fn main() {
    let args = Args::parse();

    let code = std::fs::read(&args.file).expect("bytecode file should be readable");

    let mut vm = Vm::new();
    match vm.run(&code) {
        Ok(()) => {
            if args.dump_registers {
                println!("registers: {:?}", vm.regs);
                println!("flags: {:?}", vm.flags);
                println!("halted: {}", vm.halted);
            }
        }
        Err(err) => {
            eprintln!("runtime error: {err} at pc={}", vm.pc);
            std::process::exit(1);
        }
    }
}
