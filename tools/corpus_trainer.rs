/// Corpus Trainer — trains the n-gram reference model used by `play`.
///
/// Usage: corpus_trainer --input <file.txt> --output <model.ron> --ngram <2|3|4> [--max-context <n>]
use std::env;
use std::path::Path;
use std::process;

use adventure_engine::core::markov::{save_model, MarkovTrainer};

const USAGE: &str =
    "Usage: corpus_trainer --input <file.txt> --output <model.ron> --ngram <2|3|4> [--max-context <n>]";

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut input = None;
    let mut output = None;
    let mut ngram = 3usize;
    let mut max_context = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--input" if i + 1 < args.len() => {
                i += 1;
                input = Some(args[i].clone());
            }
            "--output" if i + 1 < args.len() => {
                i += 1;
                output = Some(args[i].clone());
            }
            "--ngram" if i + 1 < args.len() => {
                i += 1;
                ngram = args[i].parse().unwrap_or_else(|_| {
                    eprintln!("Error: --ngram must be 2, 3, or 4");
                    process::exit(1);
                });
            }
            "--max-context" if i + 1 < args.len() => {
                i += 1;
                max_context = Some(args[i].parse::<usize>().unwrap_or_else(|_| {
                    eprintln!("Error: --max-context must be a positive integer");
                    process::exit(1);
                }));
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("{}", USAGE);
                process::exit(1);
            }
        }
        i += 1;
    }

    let input_path = input.unwrap_or_else(|| {
        eprintln!("Error: --input is required");
        eprintln!("{}", USAGE);
        process::exit(1);
    });

    let output_path = output.unwrap_or_else(|| {
        eprintln!("Error: --output is required");
        eprintln!("{}", USAGE);
        process::exit(1);
    });

    let text = std::fs::read_to_string(&input_path).unwrap_or_else(|e| {
        eprintln!("Error reading input file '{}': {}", input_path, e);
        process::exit(1);
    });

    println!("Training {}-gram model from '{}'...", ngram, input_path);
    let mut model = MarkovTrainer::train(&text, ngram).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        process::exit(1);
    });
    if let Some(max) = max_context {
        model = model.with_max_context_tokens(max);
    }

    println!(
        "Model trained: {} words, {} unique prefixes, {} transitions",
        model.vocab().len(),
        model.prefix_count(),
        model.transition_count()
    );

    save_model(&model, Path::new(&output_path)).unwrap_or_else(|e| {
        eprintln!("Error saving model to '{}': {}", output_path, e);
        process::exit(1);
    });

    println!("Model saved to '{}'", output_path);
}
