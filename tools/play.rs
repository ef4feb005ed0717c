/// Play — interactive terminal adventure over the n-gram reference model.
///
/// Usage: play (--model <model.ron> | --corpus <file.txt>) [--config <config.ron>]
///             [--name <adventure>] [--memory <text>] [--ngram <2|3|4>]
///
/// Commands:
///   <text>             — take an action
///   /retry             — regenerate the last result
///   /revert            — undo the last turn
///   /memory <text>     — replace the memory preamble
///   /edit <i> <text>   — rewrite story entry i
///   /alter <i> <text>  — rewrite entry i and let the model continue it
///   /select <i>        — print story entry i
///   /save <path>       — save the adventure as JSON
///   /load <path>       — load an adventure from JSON
///   /quit              — exit

use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use adventure_engine::core::config::EngineConfig;
use adventure_engine::core::markov::{load_model, MarkovModel, MarkovTrainer};
use adventure_engine::core::pipeline::{Session, SessionError, Turn};
use adventure_engine::core::reveal::{strip_tags, DisplaySurface, StreamingRevealer};
use adventure_engine::schema::adventure::Adventure;

/// Prints frames to stdout, appending only what is new when possible.
#[derive(Default)]
struct Terminal {
    printed: Mutex<String>,
}

impl DisplaySurface for Terminal {
    fn render(&self, text: &str) {
        let visible = strip_tags(text);
        let mut printed = self.printed.lock();
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = write_frame(&mut stdout, &printed, &visible) {
            warn!(error = %e, "could not write frame to terminal");
        }
        *printed = visible;
    }
}

/// Write the part of `visible` not yet on screen; a frame that rewrites
/// earlier text is printed whole on a fresh paragraph.
fn write_frame<W: Write>(out: &mut W, printed: &str, visible: &str) -> std::io::Result<()> {
    match visible.strip_prefix(printed) {
        Some(delta) => write!(out, "{}", delta)?,
        None => write!(out, "\n\n{}", visible)?,
    }
    out.flush()
}

struct Options {
    model: Option<String>,
    corpus: Option<String>,
    config: Option<String>,
    name: String,
    memory: String,
    ngram: usize,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let options = parse_args();

    let config = match &options.config {
        Some(path) => EngineConfig::load_from_ron(Path::new(path)).unwrap_or_else(|e| {
            eprintln!("Error loading config '{}': {}", path, e);
            process::exit(1);
        }),
        None => EngineConfig::default(),
    };

    let model = load_or_train(&options);
    let adventure = Adventure::new(options.name.clone()).with_memory(options.memory.clone());

    let mut session = Session::builder()
        .model(model)
        .adventure(adventure)
        .config(config.clone())
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            process::exit(1);
        });

    let mut revealer = StreamingRevealer::new(Arc::new(Terminal::default()), config.reveal);

    println!("Adventure '{}'. Type an action, or /quit.", options.name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        if let Err(e) = std::io::stdout().flush() {
            warn!(error = %e, "could not flush prompt");
        }

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        let changed = match command {
            "/quit" | "/exit" => break,
            "/retry" => report(tokio::task::block_in_place(|| session.retry())),
            "/revert" => report(session.revert()),
            "/memory" => {
                session.set_memory(rest);
                println!("Memory set.");
                false
            }
            "/edit" => match parse_index(rest) {
                Some((index, text)) => report(session.edit_entry(index, text)),
                None => usage("/edit <index> <text>"),
            },
            "/alter" => match parse_index(rest) {
                Some((index, text)) => {
                    report(tokio::task::block_in_place(|| session.alter_generate(index, text)))
                }
                None => usage("/alter <index> <text>"),
            },
            "/select" => {
                match session.select_entry(rest) {
                    Ok((entry, text)) => println!("[{}] {}", entry.index(), text),
                    Err(e) => println!("{}", e),
                }
                false
            }
            "/save" if !rest.is_empty() => {
                match session.snapshot_json() {
                    Ok(json) => match std::fs::write(rest, json) {
                        Ok(()) => println!("Saved to '{}'.", rest),
                        Err(e) => println!("Could not write '{}': {}", rest, e),
                    },
                    Err(e) => println!("{}", e),
                }
                false
            }
            "/load" if !rest.is_empty() => match std::fs::read_to_string(rest) {
                Ok(json) => report(session.load_snapshot(&json)),
                Err(e) => {
                    println!("Could not read '{}': {}", rest, e);
                    false
                }
            },
            _ if command.starts_with('/') => usage(
                "/retry | /revert | /memory <text> | /edit <i> <text> | /alter <i> <text> | /select <i> | /save <path> | /load <path> | /quit",
            ),
            _ => {
                let outcome = if session.adventure().is_empty() {
                    tokio::task::block_in_place(|| session.start(line))
                } else {
                    tokio::task::block_in_place(|| session.send(line))
                };
                report(outcome.map(|turn: Turn| turn.index))
            }
        };

        if changed {
            revealer.reveal(session.display()).await;
            revealer.finish().await;
        }
    }

    revealer.finish().await;
    println!();
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Print a failed operation in the user's terms. Returns whether the story
/// changed.
fn report<T>(outcome: Result<T, SessionError>) -> bool {
    match outcome {
        Ok(_) => true,
        Err(SessionError::GenerationTimedOut { .. }) => {
            println!("The AI took too long to respond. Please try something else.");
            false
        }
        Err(e) if e.is_recoverable() => {
            println!("The AI could not answer ({}). Please try something else.", e);
            false
        }
        Err(e) => {
            println!("Error: {}", e);
            false
        }
    }
}

fn usage(text: &str) -> bool {
    println!("Usage: {}", text);
    false
}

fn parse_index(rest: &str) -> Option<(usize, &str)> {
    let (index, text) = rest.split_once(' ')?;
    Some((index.parse().ok()?, text.trim()))
}

fn load_or_train(options: &Options) -> MarkovModel {
    if let Some(path) = &options.model {
        return load_model(Path::new(path)).unwrap_or_else(|e| {
            eprintln!("Error loading model '{}': {}", path, e);
            process::exit(1);
        });
    }

    let path = options.corpus.as_deref().unwrap_or_else(|| {
        eprintln!("Error: --model or --corpus is required");
        print_usage();
        process::exit(1);
    });
    let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading corpus '{}': {}", path, e);
        process::exit(1);
    });
    MarkovTrainer::train(&text, options.ngram).unwrap_or_else(|e| {
        eprintln!("Error training model: {}", e);
        process::exit(1);
    })
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        model: None,
        corpus: None,
        config: None,
        name: "adventure".to_string(),
        memory: String::new(),
        ngram: 3,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--model" if i + 1 < args.len() => {
                i += 1;
                options.model = Some(args[i].clone());
            }
            "--corpus" if i + 1 < args.len() => {
                i += 1;
                options.corpus = Some(args[i].clone());
            }
            "--config" if i + 1 < args.len() => {
                i += 1;
                options.config = Some(args[i].clone());
            }
            "--name" if i + 1 < args.len() => {
                i += 1;
                options.name = args[i].clone();
            }
            "--memory" if i + 1 < args.len() => {
                i += 1;
                options.memory = args[i].clone();
            }
            "--ngram" if i + 1 < args.len() => {
                i += 1;
                options.ngram = args[i].parse().unwrap_or(3);
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                process::exit(1);
            }
        }
        i += 1;
    }
    options
}

fn print_usage() {
    println!("Usage: play (--model <model.ron> | --corpus <file.txt>) [--config <config.ron>]");
    println!("            [--name <adventure>] [--memory <text>] [--ngram <2|3|4>]");
}
