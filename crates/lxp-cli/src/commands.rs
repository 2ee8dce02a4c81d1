use anyhow::Context;
use colored::Colorize;
use lxp_store::{Bucket, Store, StoreConfig};
use lxp_types::{Oid, Tuple};
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli)?;
    match cli.command {
        Command::Repos => cmd_repos(&store),
        Command::Buckets(args) => cmd_buckets(&store, args),
        Command::Ls(args) => cmd_ls(&store, args),
        Command::Get(args) => cmd_get(&store, args),
        Command::Find(args) => cmd_find(&store, args),
        Command::Tidy(args) => cmd_tidy(&store, args),
        Command::Types => cmd_types(&store),
    }
}

fn open_store(cli: &Cli) -> anyhow::Result<Store> {
    let config = match (&cli.config, &cli.root) {
        (Some(path), _) => StoreConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(root)) => StoreConfig::new(root),
        (None, None) => StoreConfig::new("."),
    };
    // One-shot commands never outlive a change worth watching for.
    let config = config.without_watcher();
    let root = config.root.clone();
    debug!(root = %root.display(), "opening store");
    Store::open(config).with_context(|| format!("opening store at {}", root.display()))
}

fn bucket(store: &Store, repository: &str, name: &str) -> anyhow::Result<Bucket> {
    Ok(store.get_repository(repository)?.get_bucket(name)?)
}

fn cmd_repos(store: &Store) -> anyhow::Result<()> {
    let names = store.repository_names()?;
    if names.is_empty() {
        println!("No repositories.");
    }
    for name in names {
        println!("{}", name.bold());
    }
    Ok(())
}

fn cmd_buckets(store: &Store, args: BucketsArgs) -> anyhow::Result<()> {
    let repo = store.get_repository(&args.repository)?;
    for name in repo.bucket_names()? {
        let bucket = repo.get_bucket(&name)?;
        let type_name = bucket
            .type_label()
            .and_then(|id| store.type_by_id(id))
            .map(|t| t.name().to_string());
        println!(
            "{:<24} {:<16} {:>8} {}",
            name.bold(),
            bucket.kind().to_string().cyan(),
            bucket.size()?,
            type_name.unwrap_or_default().yellow()
        );
    }
    Ok(())
}

fn cmd_ls(store: &Store, args: LsArgs) -> anyhow::Result<()> {
    let bucket = bucket(store, &args.repository, &args.bucket)?;
    let oids = bucket.oids()?;
    let shown = args.limit.unwrap_or(oids.len()).min(oids.len());
    for oid in &oids[..shown] {
        println!("{oid}");
    }
    if shown < oids.len() {
        println!("{}", format!("... {} more", oids.len() - shown).dimmed());
    }
    Ok(())
}

fn cmd_get(store: &Store, args: GetArgs) -> anyhow::Result<()> {
    let oid: Oid = args
        .oid
        .parse()
        .with_context(|| format!("invalid oid {:?}", args.oid))?;
    let tuple = bucket(store, &args.repository, &args.bucket)?.get_object_by_id(oid)?;
    print!("{}", render(&tuple)?);
    Ok(())
}

fn cmd_find(store: &Store, args: FindArgs) -> anyhow::Result<()> {
    let bucket = bucket(store, &args.repository, &args.bucket)?;
    let index = bucket.index(&args.label)?;
    let mut found = 0usize;
    for tuple in index.records(&args.value)? {
        print!("{}", render(&*tuple?)?);
        found += 1;
    }
    println!(
        "{} {} with {} = {}",
        found.to_string().bold(),
        if found == 1 { "tuple" } else { "tuples" },
        args.label.yellow(),
        args.value.yellow()
    );
    Ok(())
}

fn cmd_tidy(store: &Store, args: BucketArgs) -> anyhow::Result<()> {
    // Opening the bucket already tidies; this reports anything left since.
    let removed = bucket(store, &args.repository, &args.bucket)?.tidy_up_transaction_data()?;
    println!(
        "{} {}/{}: {} leftover transaction files removed",
        "✓".green().bold(),
        args.repository,
        args.bucket,
        removed
    );
    Ok(())
}

fn cmd_types(store: &Store) -> anyhow::Result<()> {
    for name in store.type_names() {
        let Some(descriptor) = store.type_by_name(&name) else {
            continue;
        };
        println!("{} ({})", name.bold(), descriptor.type_id().to_string().dimmed());
        for (label, kind) in descriptor.fields() {
            println!("  {label}: {}", kind.to_string().cyan());
        }
    }
    Ok(())
}

fn render(tuple: &Tuple) -> anyhow::Result<String> {
    let mut out = format!("{}\n", tuple.oid().to_string().yellow().bold());
    for (label, value) in tuple.iter() {
        out.push_str(&format!("  {label}: {}\n", value.to_json()?));
    }
    Ok(out)
}
