//! # Clam
//!
//! This binary drives the middle-end standalone: it reads a checked MCore
//! program serialized as JSON, lowers it to Clam, and prints the result as
//! an s-expression.
extern crate clam_ir;
extern crate clam_lower;
extern crate clam_mcore;

mod cli;

use cli::*;

use std::{error::Error, fs};

use clam_lower::BasicConfig;
use clam_mcore::Program;
use log::info;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::init();

    simple_logger::init_with_level((&args.verbosity).into()).unwrap();

    let raw = fs::read_to_string(&args.file)?;
    let program: Program = serde_json::from_str(&raw)?;

    if args.js_builtin_string {
        info!("lowering with the JS builtin string backend");
    }

    let config = BasicConfig {
        show_loc: args.show_loc,
        debug: false,
        use_js_builtin_string: args.js_builtin_string,
    };

    let lowerer = clam_lower::Lowerer::new(config);
    let prog = lowerer.lower_program(&program);

    let print_cfg = clam_ir::PrintConfig {
        show_loc: args.show_loc,
    };

    for func in &prog.fns {
        println!("; fn {:?}", func.binder);
        println!("{}", clam_ir::print_lambda(&func.body, print_cfg));
    }

    println!("; init");
    println!("{}", clam_ir::print_lambda(&prog.init, print_cfg));

    if let Some(main) = &prog.main {
        println!("; main");
        println!("{}", clam_ir::print_lambda(main, print_cfg));
    }

    Ok(())
}
