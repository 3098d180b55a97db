use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json_path::JsonPath;

use rdisco_core::{
    ConditionRecord, Filter, ItemInfo, MacroPathRecord, MacroPathSet, MemoryCatalog,
    MemoryConfigCache, extract_rows, open_payload,
};

const RULE_ID: u64 = 1;
const HOST_ID: u64 = 1;

#[derive(Parser)]
#[command(name = "rdisco")]
#[command(about = "Run discovery payloads through rule filters")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a discovery payload against a rule definition
    ///
    /// Loads the rule's filter and macro paths from a YAML definition,
    /// extracts the payload rows that pass the filter, and prints them as
    /// JSON, one row per line. Warnings about macros with no received value
    /// go to stderr.
    Eval {
        /// Path to a YAML rule definition
        #[arg(short, long)]
        rule: PathBuf,

        /// Path to the JSON payload (reads stdin if omitted)
        #[arg(short, long)]
        payload: Option<PathBuf>,

        /// Pretty-print surviving rows
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a macro-path expression
    Path {
        /// The path expression to validate, e.g. "$.metadata.name"
        expression: String,
    },
}

/// YAML shape of a rule definition.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSpec {
    #[serde(default = "default_key")]
    key: String,
    #[serde(default)]
    evaltype: rdisco_core::EvalType,
    #[serde(default)]
    formula: String,
    #[serde(default)]
    conditions: Vec<ConditionRecord>,
    #[serde(default)]
    macro_paths: Vec<MacroPathRecord>,
    /// `{$NAME}` -> value, interpolated into literal patterns.
    #[serde(default)]
    user_macros: BTreeMap<String, String>,
    /// Named expression sets referenced by `@name` patterns.
    #[serde(default)]
    named_expressions: BTreeMap<String, Vec<String>>,
}

fn default_key() -> String {
    "discovery.rule".to_string()
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Eval {
            rule,
            payload,
            pretty,
        } => cmd_eval(rule, payload, pretty),
        Commands::Path { expression } => cmd_path(&expression),
    }
}

fn cmd_eval(rule: PathBuf, payload: Option<PathBuf>, pretty: bool) {
    let spec = load_rule_spec(&rule);
    let (catalog, cache) = build_world(&spec);

    let mut filter = Filter::new(spec.evaltype, spec.formula.as_str());
    if let Err(e) = filter.load_conditions(&catalog, &cache, RULE_ID) {
        eprintln!("Cannot load filter: {e}");
        process::exit(1);
    }

    let paths = match MacroPathSet::load(&catalog, RULE_ID) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Cannot load macro paths: {e}");
            process::exit(1);
        }
    };

    let raw = read_payload(payload);
    let document = match open_payload(&raw) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("Cannot open payload: {e}");
            process::exit(1);
        }
    };

    let mut info = String::new();
    let rows = match extract_rows(&document, &filter, &paths, &mut info) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Cannot extract rows: {e}");
            process::exit(1);
        }
    };

    if !info.is_empty() {
        eprint!("{info}");
    }

    for row in &rows {
        let rendered = if pretty {
            serde_json::to_string_pretty(row.data)
        } else {
            serde_json::to_string(row.data)
        };
        match rendered {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Cannot render row: {e}");
                process::exit(1);
            }
        }
    }

    eprintln!("{}: {} row(s) passed the filter", spec.key, rows.len());
}

fn cmd_path(expression: &str) {
    match JsonPath::parse(expression) {
        Ok(_) => println!("OK"),
        Err(e) => {
            eprintln!("Invalid path: {e}");
            process::exit(1);
        }
    }
}

fn load_rule_spec(path: &PathBuf) -> RuleSpec {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Cannot read {}: {e}", path.display());
            process::exit(1);
        }
    };

    match serde_yaml::from_str(&text) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("Cannot parse {}: {e}", path.display());
            process::exit(1);
        }
    }
}

/// Materialize the in-memory catalog and cache from a rule definition.
fn build_world(spec: &RuleSpec) -> (MemoryCatalog, MemoryConfigCache) {
    let catalog = MemoryCatalog::new();
    catalog.insert_conditions(RULE_ID, spec.conditions.clone());
    catalog.insert_macro_paths(RULE_ID, spec.macro_paths.clone());

    let cache = MemoryConfigCache::new();
    cache.insert_item(
        RULE_ID,
        ItemInfo {
            host_id: HOST_ID,
            key: spec.key.clone(),
        },
    );

    for (name, value) in &spec.user_macros {
        cache.set_user_macro(HOST_ID, name, value);
    }

    for (name, patterns) in &spec.named_expressions {
        let sources: Vec<&str> = patterns.iter().map(String::as_str).collect();
        if let Err(e) = cache.insert_expression(name, &sources) {
            eprintln!("Invalid pattern in expression set \"{name}\": {e}");
            process::exit(1);
        }
    }

    (catalog, cache)
}

fn read_payload(path: Option<PathBuf>) -> String {
    match path {
        Some(path) => match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Cannot read {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => {
            let mut buffer = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buffer) {
                eprintln!("Cannot read stdin: {e}");
                process::exit(1);
            }
            buffer
        }
    }
}
