//! AdGate CLI
//!
//! CLI tool for compiling filter lists, inspecting snapshots and querying
//! the engine.

mod snapshot;

use std::path::Path;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use ag_core::snapshot::Snapshot;
use ag_engine::{filter_list_catalog, HostnameResources, MatchDecision};

#[derive(Parser)]
#[command(name = "ag-cli")]
#[command(about = "AdGate filter list compiler and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Category {
    Default,
    Regions,
}

impl Category {
    fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Regions => "regions",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists into an AGX snapshot
    Compile {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Resource manifests (uBlock resources format)
        #[arg(short, long)]
        resources: Vec<String>,

        /// Output snapshot file
        #[arg(short, long, default_value = "snapshot.agx")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate an AGX snapshot
    Validate {
        /// Snapshot file to validate
        #[arg(short, long)]
        input: String,
    },

    /// Dump snapshot info
    Info {
        /// Snapshot file to inspect
        #[arg(short, long)]
        input: String,
    },

    /// Match one network request against a snapshot
    Check {
        #[arg(short, long)]
        snapshot: String,

        #[arg(long)]
        url: String,

        /// Request hostname (derived from the URL when omitted)
        #[arg(long, default_value = "")]
        host: String,

        /// Page hostname
        #[arg(long, default_value = "")]
        tab_host: String,

        #[arg(long)]
        third_party: bool,

        /// Resource type (script, image, sub_frame, xmlhttprequest, ...)
        #[arg(long = "type", default_value = "other")]
        resource_type: String,

        #[arg(long)]
        json: bool,
    },

    /// Resolve cosmetic resources for a hostname
    Cosmetic {
        #[arg(short, long)]
        snapshot: String,

        #[arg(long)]
        hostname: String,

        /// Classes seen on the page, for the generic class/id stylesheet
        #[arg(long, value_delimiter = ',')]
        classes: Vec<String>,

        /// Ids seen on the page
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Print the built-in filter list catalog
    Lists {
        #[arg(long, value_enum, default_value_t = Category::Default)]
        category: Category,

        #[arg(long)]
        json: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            resources,
            output,
            verbose,
        } => cmd_compile(&input, &resources, &output, verbose),
        Commands::Validate { input } => cmd_validate(&input),
        Commands::Info { input } => cmd_info(&input),
        Commands::Check {
            snapshot,
            url,
            host,
            tab_host,
            third_party,
            resource_type,
            json,
        } => cmd_check(&snapshot, &url, &host, &tab_host, third_party, &resource_type, json),
        Commands::Cosmetic {
            snapshot,
            hostname,
            classes,
            ids,
            json,
        } => cmd_cosmetic(&snapshot, &hostname, &classes, &ids, json),
        Commands::Lists { category, json } => cmd_lists(category, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(inputs: &[String], resources: &[String], output: &str, verbose: bool) -> Result<(), String> {
    let (snapshot_bytes, stats) = snapshot::compile_snapshot_bytes(inputs, resources, verbose)?;
    snapshot::write_snapshot(Path::new(output), &snapshot_bytes)?;

    println!("Compiled {} filter lists to '{}'", inputs.len(), output);
    println!("  Lines:     {}", stats.lines);
    println!(
        "  Rules:     {} network, {} cosmetic ({} skipped, dedupe removed {})",
        stats.load.network, stats.load.cosmetic, stats.load.skipped, stats.load.deduped
    );
    println!("  Resources: {}", stats.resources);
    println!(
        "  Size:      {} bytes ({:.1} KB)",
        snapshot_bytes.len(),
        snapshot_bytes.len() as f64 / 1024.0
    );
    println!("  Time:      {:.1}ms", stats.total_ms);

    Ok(())
}

fn cmd_validate(input: &str) -> Result<(), String> {
    let bytes = snapshot::read_snapshot(Path::new(input))?;

    let snapshot = Snapshot::load(&bytes).map_err(|e| format!("Invalid snapshot: {}", e))?;
    let contents = snapshot.contents().map_err(|e| format!("Invalid snapshot: {}", e))?;

    println!("Snapshot '{}' is valid", input);
    println!("  Version:     {}", snapshot.version);
    println!("  Sections:    {}", snapshot.section_count());
    println!("  Rules:       {}", contents.network.len() + contents.cosmetic.len());
    println!("  Size:        {} bytes", bytes.len());

    Ok(())
}

fn cmd_info(input: &str) -> Result<(), String> {
    let path = Path::new(input);
    let bytes = snapshot::read_snapshot(path)?;

    let snapshot = Snapshot::load(&bytes).map_err(|e| format!("Invalid snapshot: {}", e))?;

    println!("Snapshot: {}", input);
    println!("  Magic:       AGX1");
    println!("  Version:     {}", snapshot.version);
    println!("  Sections:    {}", snapshot.section_count());
    println!(
        "  Total size:  {} bytes ({:.1} KB)",
        bytes.len(),
        bytes.len() as f64 / 1024.0
    );
    println!();

    println!("Sections:");
    for section in snapshot.sections() {
        println!(
            "  {:<20} offset {:>8}  length {:>8}  count {:>6}",
            section.id.name(),
            section.offset,
            section.length,
            section.count
        );
    }
    println!();

    let engine = snapshot::load_engine(path)?;
    let stats = engine.stats();
    println!("Network index:");
    println!("  Rules:         {}", stats.network.rules);
    println!("  Host buckets:  {}", stats.network.host_buckets);
    println!("  Token buckets: {}", stats.network.token_buckets);
    println!("  Fallback:      {}", stats.network.fallback_rules);
    println!("  Badfilters:    {}", stats.network.badfilters);
    println!();
    println!("Cosmetic index:");
    println!("  Rules:           {}", stats.cosmetic.rules);
    println!("  Hostname keys:   {}", stats.cosmetic.hostname_buckets);
    println!("  Simple classes:  {}", stats.cosmetic.simple_classes);
    println!("  Simple ids:      {}", stats.cosmetic.simple_ids);
    println!("  Complex classes: {}", stats.cosmetic.complex_classes);
    println!("  Complex ids:     {}", stats.cosmetic.complex_ids);
    println!("  Misc generic:    {}", stats.cosmetic.misc_generic);
    println!();
    println!("Resources: {}", stats.resources);
    println!("Tags:      {}", stats.tags);

    Ok(())
}

fn cmd_check(
    snapshot_path: &str,
    url: &str,
    host: &str,
    tab_host: &str,
    third_party: bool,
    resource_type: &str,
    json: bool,
) -> Result<(), String> {
    let engine = snapshot::load_engine(Path::new(snapshot_path))?;
    let result = engine.check_network_request(url, host, tab_host, third_party, resource_type);

    if json {
        return print_json(&result);
    }

    let decision = match &result.decision {
        MatchDecision::Allow => "ALLOW",
        MatchDecision::Block => "BLOCK",
        MatchDecision::Redirect(_) => "REDIRECT",
    };
    println!("{decision} {url}");
    if let Some(filter) = &result.filter {
        println!("  Filter:    {filter}");
    }
    if let Some(exception) = &result.exception {
        println!("  Exception: {exception}");
    }
    if let Some(redirect) = result.redirect() {
        println!("  Redirect:  {redirect}");
    }
    if result.explicit_cancel {
        println!("  Explicit cancel");
    }

    Ok(())
}

#[derive(Serialize)]
struct CosmeticOutput<'a> {
    hostname: &'a str,
    #[serde(flatten)]
    resources: HostnameResources,
    class_id_stylesheet: String,
}

fn cmd_cosmetic(
    snapshot_path: &str,
    hostname: &str,
    classes: &[String],
    ids: &[String],
    json: bool,
) -> Result<(), String> {
    let engine = snapshot::load_engine(Path::new(snapshot_path))?;
    let resources = engine.hostname_cosmetic_resources(hostname);
    let class_id_stylesheet = engine.class_id_stylesheet(classes, ids, &resources.exceptions);

    if json {
        return print_json(&CosmeticOutput {
            hostname,
            resources,
            class_id_stylesheet,
        });
    }

    println!("Cosmetics for {hostname}");
    println!("Stylesheet:");
    print_block(&resources.stylesheet);
    println!("Exceptions:");
    for exception in &resources.exceptions {
        println!("  {exception}");
    }
    println!("Script injections: {}", resources.script_injections.len());
    for script in &resources.script_injections {
        println!("  {script}");
    }
    if !classes.is_empty() || !ids.is_empty() {
        println!("Class/id stylesheet:");
        print_block(&class_id_stylesheet);
    }

    Ok(())
}

fn cmd_lists(category: Category, json: bool) -> Result<(), String> {
    let entries = filter_list_catalog(category.as_str());

    if json {
        return print_json(&entries);
    }

    println!("{} lists ({})", entries.len(), category.as_str());
    for entry in entries {
        if entry.langs.is_empty() {
            println!("  {}  {}", entry.uuid, entry.title);
        } else {
            println!("  {}  {} [{}]", entry.uuid, entry.title, entry.langs.join(", "));
        }
        println!("      {}", entry.url);
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("Failed to encode JSON: {}", e))?;
    println!("{text}");
    Ok(())
}

fn print_block(text: &str) {
    if text.is_empty() {
        println!("  (none)");
    }
    for line in text.lines() {
        println!("  {line}");
    }
}
