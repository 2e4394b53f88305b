//! Demo CLI: JSON samples → type graph → (debug listing | JSON dump)
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use type_graph::ingest::Ingest;
use type_graph::{GraphOptions, StringTypeMapping, TypeGraph, TypeRef};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// build a type graph from JSON/NDJSON samples, settle it and print it
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// ingest samples, run the fixed point and garbage collection, print the graph
    Graph(GraphOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// treat input as newline-delimited JSON (NDJSON)
    #[arg(long, default_value_t = false)]
    ndjson: bool,

    /// JSON Pointer to select a subnode in each document (e.g. /data/items/0/payload)
    #[arg(long)]
    json_pointer: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct GraphOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// name of the top-level type
    #[arg(long, default_value = "Root")]
    top_level: String,

    /// stamp ingested types with provenance markers and check every rewrite keeps them
    #[arg(long)]
    provenance: bool,

    /// sort class properties by name
    #[arg(long)]
    alphabetize: bool,

    /// map dates, uuids, uris, ... back to plain strings
    #[arg(long)]
    plain_strings: bool,

    /// print the graph before and after every rewrite
    #[arg(long)]
    print_on_rewrite: bool,

    /// print a JSON dump instead of the debug listing
    #[arg(long)]
    json: bool,

    /// output file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// debugging
    #[arg(long)]
    no_op: bool,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn load_process(&self, mut apply: impl FnMut(Value)) -> Result<()> {
        let source_paths = resolve_file_path_patterns(&self.input)
            .context("failed to resolve input file paths")?;
        for source_path in source_paths {
            let source = std::fs::read_to_string(&source_path)
                .with_context(|| format!("failed to read source file {}", source_path.display()))?;
            if self.ndjson {
                for (line_no, line) in source.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let value = serde_json::from_str::<Value>(line).with_context(|| {
                        format!("failed to parse NDJSON line {} of {}", line_no + 1, source_path.display())
                    })?;
                    apply(self.select(value, &source_path)?);
                }
            } else {
                let value = serde_json::from_str::<Value>(&source)
                    .with_context(|| format!("failed to parse JSON source file {}", source_path.display()))?;
                apply(self.select(value, &source_path)?);
            }
        }
        Ok(())
    }

    fn select(&self, value: Value, source_path: &Path) -> Result<Value> {
        let Some(pointer) = self.json_pointer.as_deref() else {
            return Ok(value);
        };
        value
            .pointer(pointer)
            .cloned()
            .ok_or_else(|| anyhow!("JSON pointer {pointer} matched nothing in {}", source_path.display()))
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> Result<()> {
        match &self.cmd {
            Command::Graph(target) => {
                // debug path
                if target.no_op {
                    eprintln!("{self:#?}");
                    return Ok(());
                }
                let graph = target.build_graph()?;
                let output = if target.json {
                    serde_json::to_string_pretty(&graph.dump()).context("failed to serialize graph")?
                } else {
                    render_listing(&graph)
                };
                write_output(target.out.as_deref(), &output)
            }
        }
    }
}

impl GraphOut {
    fn build_graph(&self) -> Result<TypeGraph> {
        // 1) observe samples
        let mut ingest = Ingest::new();
        self.input_settings.load_process(|value| {
            ingest.observe_value(&self.top_level, &value);
        })?;
        if ingest.samples() == 0 {
            bail!("no JSON documents found in the given inputs");
        }
        let graph = ingest.build(GraphOptions { track_provenance: self.provenance });
        if self.print_on_rewrite {
            graph.set_print_on_rewrite();
        }
        info!(samples = ingest.samples(), types = graph.type_count(), "ingested");

        // 2) optional string mapping
        let graph = if self.plain_strings {
            graph.rewrite(
                "plain strings",
                &StringTypeMapping::all_strings(),
                self.alphabetize,
                &[],
                false,
                &|_, _, _| unreachable!("no replacement groups"),
                true,
            )?
        } else {
            graph
        };

        // 3) settle & collect
        let graph = graph
            .rewrite_fixed_point(self.alphabetize, false)
            .context("fixed-point rewrite failed")?;
        let graph = graph
            .garbage_collect(self.alphabetize, false)
            .context("garbage collection failed")?;
        info!(generation = graph.serial(), types = graph.type_count(), "graph settled");
        Ok(graph)
    }
}

/// Debug listing followed by the order named types would be declared in.
fn render_listing(graph: &TypeGraph) -> String {
    let mut out = graph.render_graph();
    out.push_str("\ndeclaration order:\n");
    let name = |tref: TypeRef| {
        graph
            .combined_name(tref)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", tref.index()))
    };
    for group in graph.declaration_order() {
        let names: Vec<String> = group.into_iter().map(&name).collect();
        if names.len() > 1 {
            out.push_str(&format!("  cycle: {}\n", names.join(", ")));
        } else {
            out.push_str(&format!("  {}\n", names.join(", ")));
        }
    }
    out
}

fn write_output(out: Option<&Path>, output: &str) -> Result<()> {
    let Some(out) = out else {
        println!("{output}");
        return Ok(());
    };
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(out, output).with_context(|| format!("failed to write {}", out.display()))
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                // explicit glob that matched nothing
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
