use std::{
    env, fs,
    io::{self, BufRead, Write},
    process,
};

use stilted::{FatalTilt, Interpreter};

#[derive(Debug, Default, PartialEq)]
struct Options {
    code: Option<String>,
    file: Option<String>,
    interactive: bool,
    outfile: Option<String>,
    argv: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" => {
                let code = args.get(i + 1).ok_or("-c needs an argument")?;
                opts.code = Some(code.clone());
                opts.argv = args[i + 2..].to_vec();
                break;
            }
            "-i" => {
                opts.interactive = true;
                i += 1;
            }
            "-o" => {
                let outfile = args.get(i + 1).ok_or("-o needs an argument")?;
                opts.outfile = Some(outfile.clone());
                i += 2;
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("unknown option: {}", flag));
            }
            path => {
                opts.file = Some(path.to_owned());
                opts.argv = args[i + 1..].to_vec();
                break;
            }
        }
    }
    Ok(opts)
}

enum Outcome {
    Done,
    Fatal(i32),
    HostError,
}

fn run_interp(interp: &mut Interpreter) -> Outcome {
    match interp.run() {
        Ok(()) => Outcome::Done,
        Err(err) => match err.downcast_ref::<FatalTilt>() {
            Some(fatal) => Outcome::Fatal(fatal.status),
            None => {
                eprintln!("stilted: internal error: {:#}", err);
                Outcome::HostError
            }
        },
    }
}

fn repl(interp: &mut Interpreter) -> i32 {
    let stdin = io::stdin();
    loop {
        print!("|-{}> ", interp.ostack_depth());
        io::stdout().flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return 0;
            }
            Ok(_) => {}
            Err(err) => {
                eprintln!("stilted: {}", err);
                return 1;
            }
        }

        interp.add_text(line.as_bytes());
        match run_interp(interp) {
            Outcome::Done => {}
            // quit leaves the session; an error was already reported by
            // handleerror and the REPL carries on.
            Outcome::Fatal(0) => return 0,
            Outcome::Fatal(_) => {}
            Outcome::HostError => interp.clear_execution(),
        }
    }
}

fn run_cli(args: &[String]) -> i32 {
    let opts = match parse_args(args) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("stilted: {}", msg);
            eprintln!("usage: stilted [-c CODE] [-i] [-o OUTFILE] [args...]");
            return 2;
        }
    };

    let mut interp = Interpreter::new();
    interp.set_argv(&opts.argv);
    if let Some(outfile) = opts.outfile {
        interp.set_outfile(outfile);
    }

    let source = if let Some(code) = opts.code {
        Some(code.into_bytes())
    } else if let Some(path) = &opts.file {
        match fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                eprintln!("stilted: {}: {}", path, err);
                return 1;
            }
        }
    } else {
        None
    };

    // With nothing to run, drop straight into the REPL.
    let interactive = opts.interactive || source.is_none();

    if let Some(text) = source {
        interp.add_text(&text);
        match run_interp(&mut interp) {
            Outcome::Done => {}
            Outcome::Fatal(status) => return status,
            Outcome::HostError => return 1,
        }
    }

    if interactive {
        repl(&mut interp)
    } else {
        0
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().skip(1).collect();
    process::exit(run_cli(&args));
}
