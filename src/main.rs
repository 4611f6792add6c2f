use std::fs::File;
use std::io::BufReader;
use std::io::Read;
use std::path::PathBuf;

use treelox as lox;

use clap::Parser as ClapParser;
use clap::Subcommand;

use lox::ast_printer::AstPrinter;
use lox::error::LoxError;
use lox::interpreter::Interpreter;
use lox::parser::Parser;
use lox::resolver::Resolver;
use lox::scanner::Scanner;
use lox::token::Token;

#[derive(ClapParser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prints the token stream for a source file
    Tokenize { filename: Option<PathBuf> },

    /// Parses a single expression and prints its parenthesized form
    Parse { filename: Option<PathBuf> },

    /// Evaluates a single expression and prints its value
    Evaluate { filename: Option<PathBuf> },

    /// Runs a whole program
    Run { filename: Option<PathBuf> },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Cli = Cli::parse();

    match args.commands {
        Commands::Tokenize { filename } => {
            let buf = read_source(filename)?;

            let scanner: Scanner = Scanner::new(&buf);
            let mut tokenized = true;

            for token in scanner {
                match token {
                    Ok(token) => println!("{}", token),

                    Err(e) => {
                        tokenized = false;
                        eprintln!("{}", e);
                    }
                }
            }

            if !tokenized {
                std::process::exit(65);
            }
        }

        Commands::Parse { filename } => {
            let buf = read_source(filename)?;
            let tokens = scan_all(&buf);

            let mut parser: Parser = Parser::new(tokens);

            match parser.parse() {
                Ok(expr) => {
                    let printer = AstPrinter;
                    println!("{}", printer.print(&expr));
                }
                Err(e) => bail(e),
            }
        }

        Commands::Evaluate { filename } => {
            let buf = read_source(filename)?;
            let tokens = scan_all(&buf);

            let mut parser: Parser = Parser::new(tokens);

            match parser.parse() {
                Ok(expr) => {
                    let mut interpreter = Interpreter::new();

                    match interpreter.evaluate(&expr) {
                        Ok(value) => println!("{}", value),
                        Err(e) => bail(e),
                    }
                }
                Err(e) => bail(e),
            }
        }

        Commands::Run { filename } => {
            let buf = read_source(filename)?;
            let tokens = scan_all(&buf);

            let mut parser: Parser = Parser::new(tokens);
            let program = match parser.parse_program() {
                Ok(program) => program,
                Err(e) => bail(e),
            };

            let mut interpreter = Interpreter::new();

            let mut resolver = Resolver::new(&mut interpreter);
            if let Err(e) = resolver.resolve(&program) {
                bail(e);
            }

            if let Err(e) = interpreter.interpret(&program) {
                bail(e);
            }
        }
    }

    Ok(())
}

/// Reads the whole source file, or exits with a usage error.
fn read_source(filename: Option<PathBuf>) -> anyhow::Result<Vec<u8>> {
    let Some(filename) = filename else {
        eprintln!("No input filepath was provided. Exiting...");
        std::process::exit(1);
    };

    let mut buf: Vec<u8> = Vec::new();
    let mut reader: BufReader<File> = BufReader::new(File::open(filename)?);
    reader.read_to_end(&mut buf)?;

    Ok(buf)
}

/// Scans the whole buffer. Lexical errors go to stderr and end the process
/// with code 65 once scanning completes; commands past `tokenize` never see
/// a broken token stream.
fn scan_all(buf: &[u8]) -> Vec<Token> {
    let scanner: Scanner = Scanner::new(buf);

    let mut tokens: Vec<Token> = Vec::new();
    let mut had_error = false;

    for token in scanner {
        match token {
            Ok(token) => tokens.push(token),

            Err(e) => {
                had_error = true;
                eprintln!("{}", e);
            }
        }
    }

    if had_error {
        std::process::exit(65);
    }

    tokens
}

/// Prints the error and exits with its mandated code.
fn bail(e: LoxError) -> ! {
    eprintln!("{}", e);
    std::process::exit(e.exit_code());
}
