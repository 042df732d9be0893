//! The tern compiler driver.
//!
//! Schedules one compile task per source file on its own worker thread
//! against a shared type context, joins them all, renders diagnostics
//! grouped by file, and then either dumps IR, evaluates `main` in the
//! bundled interpreter, or drops into the REPL.
//!
//! Native code emission is an external collaborator: the driver validates
//! the IR contract the back end consumes but does not link a back end.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{debug, info};

use tern_check::check::{check_module, Checked};
use tern_check::scope::{assign_scopes, ScopeGraph};
use tern_core::diag::{ErrorLog, Stage};
use tern_core::id::ModuleId;
use tern_core::intern::TypeContext;
use tern_core::layout::Arch;
use tern_core::source::{SourceBuffer, Span};
use tern_ir::interp::Interp;
use tern_ir::lower::Lowerer;
use tern_ir::model::ModuleIr;
use tern_ir::validate::validate_func;
use tern_syntax::ast::{Ast, NodeKind};
use tern_syntax::lexer::lex;
use tern_syntax::parser::parse_module;

/// Back-end output selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FileType {
    /// Serialize the lowered IR as JSON.
    Ir,
    /// Native assembly (not linked into this build).
    Nat,
    /// Native object/binary (not linked into this build).
    Bin,
    /// No back-end output.
    None,
}

/// The tern compiler.
#[derive(Parser)]
#[command(name = "tern", about = "The tern compiler")]
struct Cli {
    /// Output file name.
    #[arg(short = 'o', default_value = "a.out")]
    output: PathBuf,

    /// Start an interactive session.
    #[arg(short = 'r', long = "repl")]
    repl: bool,

    /// Stop after parsing and dump the AST.
    #[arg(short = 'p', long = "parser")]
    parser: bool,

    /// Evaluate `main` with the bundled interpreter.
    #[arg(short = 'e', long = "eval")]
    eval: bool,

    /// Skip IR validation.
    #[arg(short = 'n', long = "no-validation")]
    no_validation: bool,

    /// Back-end output selector.
    #[arg(long = "file-type", value_enum, default_value_t = FileType::None)]
    file_type: FileType,

    /// Source files.
    files: Vec<PathBuf>,
}

struct FileOutcome {
    src: SourceBuffer,
    log: ErrorLog,
    ir: Option<ModuleIr>,
    ast_dump: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Arc::new(TypeContext::new());

    if cli.repl {
        process::exit(run_repl(&ctx));
    }
    if cli.files.is_empty() {
        eprintln!("error: no source files given");
        process::exit(-1);
    }

    // One compile task per file; join them all before reporting.
    let outcomes: Vec<FileOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = cli
            .files
            .iter()
            .map(|path| {
                let ctx = Arc::clone(&ctx);
                let parser_only = cli.parser;
                let validate = !cli.no_validation;
                scope.spawn(move || compile_file(path.clone(), &ctx, parser_only, validate))
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("compile worker panicked")).collect()
    });

    let mut failed = false;
    for outcome in &outcomes {
        if !outcome.log.is_empty() {
            eprint!("{}", outcome.log.render(&outcome.src));
        }
        if outcome.log.has_errors() {
            failed = true;
        }
    }
    if failed {
        process::exit(-1);
    }

    if cli.parser {
        for outcome in &outcomes {
            if let Some(dump) = &outcome.ast_dump {
                println!("{}", dump);
            }
        }
        process::exit(0);
    }

    match cli.file_type {
        FileType::Ir => {
            for outcome in &outcomes {
                if let Some(ir) = &outcome.ir {
                    match serde_json::to_string_pretty(ir) {
                        Ok(json) => {
                            if let Err(e) = std::fs::write(&cli.output, json) {
                                eprintln!("error: cannot write {}: {}", cli.output.display(), e);
                                process::exit(-1);
                            }
                            info!(output = %cli.output.display(), "wrote IR dump");
                        }
                        Err(e) => {
                            eprintln!("error: IR serialization failed: {}", e);
                            process::exit(-1);
                        }
                    }
                }
            }
        }
        FileType::Nat | FileType::Bin => {
            eprintln!("error: native code generation is not linked into this build");
            process::exit(-1);
        }
        FileType::None => {}
    }

    if cli.eval {
        for outcome in &outcomes {
            let Some(ir) = &outcome.ir else { continue };
            let Some(main) = ir.main else {
                eprintln!("error: {} has no `main`", outcome.src.name());
                process::exit(-1);
            };
            let mut interp = Interp::new(ir, &ctx, Arch::default());
            match interp.call(main, vec![]) {
                Ok(values) => {
                    print!("{}", interp.output);
                    for v in values {
                        println!("{}", v);
                    }
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    if e.is_internal() {
                        eprint!("{}", interp.frame_dump());
                    }
                    process::exit(-1);
                }
            }
        }
    }

    process::exit(0);
}

/// Front end for one file: lex, parse, resolve, check, lower, validate.
fn compile_file(
    path: PathBuf,
    ctx: &TypeContext,
    parser_only: bool,
    validate: bool,
) -> FileOutcome {
    let name = path.display().to_string();
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            let src = SourceBuffer::new(name, "");
            let mut log = ErrorLog::new();
            log.error(Stage::Lex, Span::point(0), format!("cannot read file: {}", e));
            return FileOutcome {
                src,
                log,
                ir: None,
                ast_dump: None,
            };
        }
    };
    let src = SourceBuffer::new(name.clone(), text);
    let mut log = ErrorLog::new();

    debug!(file = %name, "compiling");
    let tokens = lex(&src, &mut log);
    let (ast, root) = parse_module(&tokens, &mut log);
    if parser_only {
        let dump = serde_json::to_string_pretty(&ast).unwrap_or_default();
        return FileOutcome {
            src,
            log,
            ir: None,
            ast_dump: Some(dump),
        };
    }

    let scopes = assign_scopes(&ast, root, &mut log);
    let checked = check_module(&ast, root, &scopes, ctx, Arch::default(), ModuleId(0), &mut log);

    // Modules with errors do not proceed to back-end lowering.
    if log.has_errors() {
        return FileOutcome {
            src,
            log,
            ir: None,
            ast_dump: None,
        };
    }

    let ir = tern_ir::lower::lower_module(&ast, &scopes, &checked, ctx, Arch::default(), &mut log);
    if validate {
        for func in &ir.funcs {
            if let Err(e) = validate_func(func) {
                log.error(Stage::Interp, Span::point(0), format!("invalid IR: {}", e));
            }
        }
    }
    let ir = if log.has_errors() { None } else { Some(ir) };
    FileOutcome {
        src,
        log,
        ir,
        ast_dump: None,
    }
}

// ---- REPL ------------------------------------------------------------------

struct ReplLine {
    src: SourceBuffer,
    ast: Ast,
    scopes: ScopeGraph,
    checked: Checked,
    last: Option<tern_core::id::NodeId>,
    log: ErrorLog,
}

fn analyze_repl(text: &str, ctx: &TypeContext) -> ReplLine {
    let src = SourceBuffer::new("<repl>", text);
    let mut log = ErrorLog::new();
    let tokens = lex(&src, &mut log);
    let (ast, root) = parse_module(&tokens, &mut log);
    let scopes = assign_scopes(&ast, root, &mut log);
    let checked = check_module(&ast, root, &scopes, ctx, Arch::default(), ModuleId(0), &mut log);
    let last = match ast.kind(root) {
        NodeKind::Stmts { list } => list.last().copied(),
        _ => None,
    };
    ReplLine {
        src,
        ast,
        scopes,
        checked,
        last,
        log,
    }
}

/// Line-at-a-time interactive session. Declarations accumulate; a bare
/// expression is wrapped into a thunk, lowered, interpreted, and printed.
fn run_repl(ctx: &TypeContext) -> i32 {
    let stdin = io::stdin();
    let mut session = String::new();
    println!("tern repl; end with ctrl-d");
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }

        let candidate = format!("{}{}\n", session, line);
        let analyzed = analyze_repl(&candidate, ctx);
        if analyzed.log.has_errors() {
            eprint!("{}", analyzed.log.render(&analyzed.src));
            continue;
        }
        let last = match analyzed.last {
            Some(l) => l,
            None => continue,
        };

        if matches!(analyzed.ast.kind(last), NodeKind::Decl { .. }) {
            session = candidate;
            continue;
        }

        // Evaluate the trailing expression.
        let mut log = ErrorLog::new();
        let mut lowerer = Lowerer::new(
            &analyzed.ast,
            &analyzed.scopes,
            &analyzed.checked,
            ctx,
            Arch::default(),
            &mut log,
        );
        lowerer.lower_all();
        let thunk = lowerer.lower_thunk(last, "<repl>");
        let ir = lowerer.finish();
        if log.has_errors() {
            eprint!("{}", log.render(&analyzed.src));
            continue;
        }
        let Some(thunk) = thunk else { continue };
        let mut interp = Interp::new(&ir, ctx, Arch::default());
        match interp.call(thunk, vec![]) {
            Ok(values) => {
                print!("{}", interp.output);
                for v in values {
                    println!("{}", v);
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
    0
}
