use clap::{Parser, ValueEnum};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use xilc::{
    config::Config,
    demos::Demo,
    frontend::ast::pretty_print::pretty_print_program,
    middle::xil::{compile::compile_program, pretty_print::pretty_print_module},
    session::Session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    /// The analyzed tree
    Tree,
    /// The tree after control flow lowering and peephole optimization
    Lowered,
    /// The compiled XIL module
    Xil,
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Which built-in program to compile
    #[arg(value_enum)]
    demo: Demo,

    /// Print the program as it stands after this stage
    #[arg(short, long, value_enum, default_value = "xil")]
    emit: Stage,

    /// Execute the demo's entry point in the interpreter
    #[arg(short, long)]
    run: bool,

    /// Interpreter step budget
    #[arg(long)]
    max_steps: Option<u64>,
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().without_time())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::default();

    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }

    let mut session = Session::new(config);
    let mut program = args.demo.build(&mut session);

    let outcome = session.analyze(&mut program);

    if let Err(error) = outcome {
        eprint!("{}", session.diagnostics.render(&program.sources));
        eprintln!("{error}");
        std::process::exit(1);
    }

    if args.emit == Stage::Tree {
        println!("{}", pretty_print_program(&program, &session.types));
    }

    session.lower(&mut program);

    if args.emit == Stage::Lowered {
        println!("{}", pretty_print_program(&program, &session.types));
    }

    let module = match compile_program(&args.demo.to_string(), &program, &session.types) {
        Ok(module) => module,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    if args.emit == Stage::Xil {
        println!("{}", pretty_print_module(&module));
    }

    if args.run {
        let arguments = args.demo.arguments();

        match session.execute(&module, args.demo.entry(), &arguments) {
            Ok(value) => println!("{}({arguments:?}) = {}", args.demo.entry(), value as i64),
            Err(_) => {
                eprint!("{}", session.diagnostics.render(&program.sources));
                std::process::exit(1);
            }
        }
    }

    // Warnings only; errors exited above
    if !session.diagnostics.diagnostics().is_empty() {
        eprint!("{}", session.diagnostics.render(&program.sources));
    }
}
