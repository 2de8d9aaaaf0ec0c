use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use cas_store::config::DEFAULT_MAPPED_CAPACITY;
use cas_store::{
    write_stream, DiskStoreFactory, Hash, MappedConfig, MappedStore, NullStore, ReadOnlyStore,
    Store, StoreConfig, WriteOnlyStore, WrittenBlob,
};
use colored::Colorize;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli.store)?;
    let json = cli.format == OutputFormat::Json;
    match cli.command {
        Command::Put(args) => {
            let store = open_store(&config, cli.store.account)?;
            let written = put_files(store.as_ref(), &args.paths).await?;
            print_written(&written, json)
        }
        Command::Get(args) => {
            let store = open_store(&config, cli.store.account)?;
            cmd_get(store.as_ref(), args).await
        }
        Command::Stat(args) => {
            let store = open_store(&config, cli.store.account)?;
            let stats = stat_blobs(store.as_ref(), &args.hashes).await?;
            print_stats(&stats, json)
        }
        Command::Rm(args) => cmd_rm(&config, cli.store.account, args).await,
        Command::Truncate(args) => cmd_truncate(&config, cli.store.account, args),
        Command::Hash(args) => {
            let hashed = put_files(&NullStore, &args.paths).await?;
            if args.base64 && !json {
                for (name, blob) in &hashed {
                    println!("{}  {}  {}", blob.hash.to_string().yellow(), blob.hash.to_base64(), name);
                }
                Ok(())
            } else {
                print_written(&hashed, json)
            }
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// `--config` first, then `--mapped`, then `--root`, then the default.
pub fn resolve_config(args: &StoreArgs) -> anyhow::Result<StoreConfig> {
    if let Some(path) = &args.config {
        return StoreConfig::load(path)
            .with_context(|| format!("loading store configuration from {}", path.display()));
    }
    if let Some(path) = &args.mapped {
        return Ok(StoreConfig::MemoryMapped(MappedConfig {
            path: path.clone(),
            capacity: args.capacity.unwrap_or(DEFAULT_MAPPED_CAPACITY),
        }));
    }
    let mut config = StoreConfig::default();
    if let (Some(root), StoreConfig::Disk(disk)) = (&args.root, &mut config) {
        disk.root = root.clone();
    }
    Ok(config)
}

fn open_store(config: &StoreConfig, account: i64) -> anyhow::Result<Arc<dyn Store>> {
    let factory = config.build_factory()?;
    debug!(store = %factory.describe(), account, "opening store");
    Ok(factory.store(account)?)
}

fn parse_hash(s: &str) -> anyhow::Result<Hash> {
    Hash::parse(s).with_context(|| format!("invalid hash {s:?}"))
}

/// Store each file, or standard input when `paths` is empty.
pub async fn put_files<S>(store: &S, paths: &[PathBuf]) -> anyhow::Result<Vec<(String, WrittenBlob)>>
where
    S: WriteOnlyStore + ?Sized,
{
    if paths.is_empty() {
        let blob = write_stream(store, tokio::io::stdin()).await?;
        return Ok(vec![("-".to_string(), blob)]);
    }
    let mut written = Vec::with_capacity(paths.len());
    for path in paths {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let blob = write_stream(store, file).await?;
        written.push((path.display().to_string(), blob));
    }
    Ok(written)
}

fn print_written(written: &[(String, WrittenBlob)], json: bool) -> anyhow::Result<()> {
    if json {
        let blobs: Vec<&WrittenBlob> = written.iter().map(|(_, b)| b).collect();
        println!("{}", serde_json::to_string_pretty(&blobs)?);
        return Ok(());
    }
    for (name, blob) in written {
        println!("{}  {:>12}  {}", blob.hash.to_string().yellow(), blob.size, name);
    }
    Ok(())
}

async fn cmd_get(store: &dyn Store, args: GetArgs) -> anyhow::Result<()> {
    let hash = parse_hash(&args.hash)?;
    let mut stream = store.lookup(hash).open().await?;
    let copied = match &args.output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("creating {}", path.display()))?;
            let n = tokio::io::copy(&mut stream, &mut file).await?;
            file.flush().await?;
            n
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let n = tokio::io::copy(&mut stream, &mut stdout).await?;
            stdout.flush().await?;
            n
        }
    };
    debug!(%hash, bytes = copied, "blob written out");
    Ok(())
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct BlobStat {
    pub hash: Hash,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

pub async fn stat_blobs(store: &dyn Store, hashes: &[String]) -> anyhow::Result<Vec<BlobStat>> {
    let mut stats = Vec::with_capacity(hashes.len());
    for text in hashes {
        let hash = parse_hash(text)?;
        let blob = store.lookup(hash);
        let size = match blob.size().await {
            Ok(size) => Some(size),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };
        stats.push(BlobStat {
            hash,
            exists: size.is_some(),
            size,
        });
    }
    Ok(stats)
}

fn print_stats(stats: &[BlobStat], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }
    for stat in stats {
        match stat.size {
            Some(size) => println!("{}  {:>12}", stat.hash.to_string().yellow(), size),
            None => println!("{}  {:>12}", stat.hash.to_string().yellow(), "missing".red()),
        }
    }
    Ok(())
}

async fn cmd_rm(config: &StoreConfig, account: i64, args: RmArgs) -> anyhow::Result<()> {
    let StoreConfig::Disk(disk) = config else {
        bail!("rm only works on disk stores");
    };
    let store = DiskStoreFactory::new(disk.clone()).disk_store(account)?;
    for text in &args.hashes {
        let hash = parse_hash(text)?;
        store.delete(&hash).await?;
        println!("{} {}", "deleted".green(), hash);
    }
    Ok(())
}

fn cmd_truncate(config: &StoreConfig, account: i64, args: TruncateArgs) -> anyhow::Result<()> {
    let StoreConfig::MemoryMapped(mapped) = config else {
        bail!("truncate only works on memory-mapped stores");
    };
    let store = MappedStore::with_config(mapped)?;
    if account != store.realm_id() {
        bail!("memory-mapped stores only serve account {}", store.realm_id());
    }
    let before = store.size();
    store.truncate(args.size)?;
    println!(
        "{} {} -> {} bytes in {}",
        "truncated".green(),
        before,
        store.size(),
        display_path(store.path()),
    );
    Ok(())
}

fn display_path(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "anonymous memory".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_store::{DiskConfig, MemoryStore};

    #[test]
    fn flags_select_backend() {
        let args = StoreArgs {
            root: Some("/data".into()),
            ..StoreArgs::default()
        };
        assert_eq!(
            resolve_config(&args).unwrap(),
            StoreConfig::Disk(DiskConfig {
                root: "/data".into(),
                sync_on_commit: false,
            })
        );

        let args = StoreArgs {
            mapped: Some("blobs.map".into()),
            capacity: Some(4096),
            ..StoreArgs::default()
        };
        assert_eq!(
            resolve_config(&args).unwrap(),
            StoreConfig::MemoryMapped(MappedConfig {
                path: "blobs.map".into(),
                capacity: 4096,
            })
        );
    }

    #[test]
    fn config_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cas.toml");
        std::fs::write(&path, "backend = \"memory\"\n").unwrap();
        let args = StoreArgs {
            config: Some(path),
            root: Some("/ignored".into()),
            ..StoreArgs::default()
        };
        assert_eq!(resolve_config(&args).unwrap(), StoreConfig::Memory);
    }

    #[tokio::test]
    async fn put_then_stat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        let store = MemoryStore::new();
        let written = put_files(&store, &[path]).await.unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0].1.hash.to_string(),
            "900150983CD24FB0D6963F7D28E17F72"
        );

        let stats = stat_blobs(
            &store,
            &[
                "900150983cd24fb0d6963f7d28e17f72".to_string(),
                Hash::of(b"nope").to_string(),
            ],
        )
        .await
        .unwrap();
        assert_eq!(stats[0].size, Some(3));
        assert!(!stats[1].exists);
        assert!(stat_blobs(&store, &["zz".to_string()]).await.is_err());
    }

    #[test]
    fn stat_serializes_without_missing_size() {
        let stat = BlobStat {
            hash: Hash::EMPTY,
            exists: false,
            size: None,
        };
        assert_eq!(
            serde_json::to_string(&stat).unwrap(),
            r#"{"hash":"D41D8CD98F00B204E9800998ECF8427E","exists":false}"#
        );
    }

    #[tokio::test]
    async fn rm_requires_disk_backend() {
        let args = RmArgs {
            hashes: vec![Hash::EMPTY.to_string()],
        };
        assert!(cmd_rm(&StoreConfig::Memory, 0, args).await.is_err());
    }

    #[test]
    fn truncate_checks_backend_and_account() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::MemoryMapped(MappedConfig {
            path: dir.path().join("blobs.map"),
            capacity: 4096,
        });
        assert!(cmd_truncate(&config, 0, TruncateArgs { size: 0 }).is_ok());
        assert!(cmd_truncate(&config, 3, TruncateArgs { size: 0 }).is_err());
        assert!(cmd_truncate(&StoreConfig::Memory, 0, TruncateArgs { size: 0 }).is_err());
    }
}
