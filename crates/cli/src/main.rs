use anyhow::{bail, Context};
use clap::Parser;
use doctree_core::fs::FsProvider;
use doctree_core::human::{human_bytes, human_time};
use doctree_core::resolver::{ResolveMsg, TreeResolver};
use doctree_core::search::find_matches;
use doctree_core::{DocumentNode, ResolveError, ResolveOptions, ResolveProgress};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "doctree", about = "Resolve a directory as a document tree")]
struct Args {
    /// Directory served as the document tree
    root: PathBuf,
    /// Provider authority used in document URIs
    #[arg(long, default_value = "local.documents")]
    authority: String,
    /// Volume name prefixing document ids
    #[arg(long, default_value = "local")]
    volume: String,
    /// Levels of children to materialize
    #[arg(short, long)]
    depth: Option<usize>,
    /// JSON file with resolve options
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output JSON report path
    #[arg(short, long)]
    json: Option<PathBuf>,
    /// Output CSV report path
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Fuzzy-find documents by name
    #[arg(short, long)]
    find: Option<String>,
    /// Cancel the resolution after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Increase log verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn options(args: &Args) -> anyhow::Result<ResolveOptions> {
    let mut options = match &args.config {
        Some(path) => ResolveOptions::from_json_file(path)?,
        None => ResolveOptions::default(),
    };
    if let Some(depth) = args.depth {
        options.depth = depth;
    }
    options.validate()?;
    Ok(options)
}

fn print_tree(node: &DocumentNode, indent: usize) {
    let name = node.display_name().unwrap_or(node.id());
    let pad = "  ".repeat(indent);
    if node.is_directory() {
        let more = if node.expanded() { "" } else { " …" };
        println!("{pad}{name}/{more}");
    } else {
        println!(
            "{pad}{name}  ({}, {})",
            human_bytes(node.size()),
            human_time(node.last_modified())
        );
    }
    for child in node.children() {
        print_tree(child, indent + 1);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if !args.root.is_dir() {
        bail!("{} is not a directory", args.root.display());
    }
    let options = options(&args)?;
    let provider = FsProvider::new(args.authority.clone(), args.volume.clone(), args.root.clone());
    let reference = provider.tree_uri();

    let (tx, rx) = crossbeam_channel::unbounded::<ResolveMsg>();
    let resolver = TreeResolver::new(Arc::new(provider))
        .with_options(options)
        .with_events(tx);

    let handle = resolver.resolve(&reference);
    let result = match args.timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), handle).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Cancelled),
        },
        None => handle.await,
    };

    let root = match result {
        Ok(Some(root)) => root,
        Ok(None) => bail!("{reference} is not a tree"),
        Err(ResolveError::Cancelled) => bail!("resolution of {reference} timed out"),
        Err(e) => return Err(e).with_context(|| format!("resolving {reference}")),
    };

    print_tree(&root, 0);

    if let Some(path) = &args.json {
        let json = doctree_core::export::to_json(&root);
        std::fs::write(path, serde_json::to_string_pretty(&json)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = &args.csv {
        let file = std::fs::File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        doctree_core::export::to_csv(&root, file)?;
    }
    if let Some(needle) = &args.find {
        for (score, node) in find_matches(&root, needle) {
            println!("{score:>5}  {}", node.uri());
        }
    }

    let mut progress = ResolveProgress::default();
    let mut loading = 0usize;
    for msg in rx.try_iter() {
        match msg {
            ResolveMsg::Done(p) | ResolveMsg::Progress(p) => progress = p,
            ResolveMsg::Children { loading: Some(_), .. } => loading += 1,
            _ => {}
        }
    }
    println!(
        "Resolved {} documents ({} directories), {}",
        progress.documents,
        progress.directories,
        human_bytes(progress.bytes.min(u64::MAX as u128) as u64)
    );
    if loading > 0 {
        println!("{loading} listings were still loading");
    }
    Ok(())
}
