use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use humansize::{format_size, BINARY};
use sigmavault_core::{
    open_vault, FileMedium, Manifest, VaultConfig, HYBRID_KEY_LEN, MANIFEST_LEN,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;

#[derive(Parser, Debug)]
#[command(author, version, about = "SigmaVault: dimensionally scattered storage on a noise-indistinguishable medium")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a 64-byte hybrid key file (stand-in for the passphrase/device derivation step)
    Keygen {
        /// Output key file
        #[arg(long, default_value = "vault.key")]
        out: PathBuf,
    },
    /// Create a new vault medium, materialized with noise
    Init {
        /// Vault file to create
        #[arg(long)]
        vault: PathBuf,
        /// Capacity in bytes
        #[arg(long, default_value_t = 16 * 1024 * 1024)]
        size: u64,
    },
    /// Scatter a file into the vault; prints the manifest path
    Scatter {
        #[arg(long)]
        vault: PathBuf,
        #[arg(long)]
        key: PathBuf,
        /// Input file
        input: PathBuf,
        /// Where to write the manifest (default: <input>.svm)
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// Shards per byte (1..=4)
        #[arg(long)]
        redundancy: Option<u8>,
    },
    /// Gather a file back out of the vault
    Gather {
        #[arg(long)]
        vault: PathBuf,
        #[arg(long)]
        key: PathBuf,
        /// Manifest file produced by scatter
        manifest: PathBuf,
        /// Output file
        #[arg(long)]
        output: PathBuf,
    },
    /// Show vault geometry and engine statistics for a session
    Stat {
        #[arg(long)]
        vault: PathBuf,
        #[arg(long)]
        key: PathBuf,
    },
}

async fn read_key(path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading key file {}", path.display()))?;
    if bytes.len() != HYBRID_KEY_LEN {
        bail!("key file {} must hold exactly {HYBRID_KEY_LEN} bytes", path.display());
    }
    Ok(bytes)
}

fn set_owner_only(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

async fn open(vault: &Path, key: &Path, config: VaultConfig) -> Result<sigmavault_core::Engine> {
    let medium = Arc::new(FileMedium::open(vault)?);
    let key = read_key(key).await?;
    Ok(open_vault(medium, &key, config).await?)
}

fn one_shot_config() -> VaultConfig {
    // CLI sessions are one-shot; temporal variance belongs to long-lived mounts.
    VaultConfig { rescatter_interval: None, ..Default::default() }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Keygen { out } => {
            let mut bytes = vec![0u8; HYBRID_KEY_LEN];
            sigmavault_core::hardening::secure_random(&mut bytes);
            tokio::fs::write(&out, &bytes).await?;
            set_owner_only(&out)?;
            eprintln!("wrote hybrid key to {}", out.display());
        }
        Cmd::Init { vault, size } => {
            if size == 0 {
                bail!("vault size must be non-zero");
            }
            FileMedium::create(&vault, size)?;
            eprintln!("created {} ({})", vault.display(), format_size(size, BINARY));
        }
        Cmd::Scatter { vault, key, input, manifest, redundancy } => {
            let engine = open(&vault, &key, one_shot_config()).await?;

            let name = input.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
            let mut reader = File::open(&input)
                .await
                .with_context(|| format!("opening {}", input.display()))?;
            let overrides = sigmavault_core::ParameterOverrides {
                redundancy,
                ..Default::default()
            };
            let sealed = engine.scatter_with_overrides(&name, &mut reader, &overrides).await?;

            let manifest_path = manifest.unwrap_or_else(|| input.with_extension("svm"));
            tokio::fs::write(&manifest_path, sealed.encode()).await?;
            set_owner_only(&manifest_path)?;
            engine.close().await?;

            eprintln!(
                "scattered {} ({}) -> manifest {} [{}]",
                input.display(),
                format_size(sealed.logical_size, BINARY),
                manifest_path.display(),
                sealed.manifest_id,
            );
        }
        Cmd::Gather { vault, key, manifest, output } => {
            let bytes = tokio::fs::read(&manifest)
                .await
                .with_context(|| format!("reading manifest {}", manifest.display()))?;
            if bytes.len() != MANIFEST_LEN {
                bail!("{} is not a manifest ({} bytes)", manifest.display(), bytes.len());
            }
            let record = Manifest::decode(&bytes)?;

            let engine = open(&vault, &key, one_shot_config()).await?;
            let mut writer = File::create(&output)
                .await
                .with_context(|| format!("creating {}", output.display()))?;
            engine.gather(&record, &mut writer).await?;
            engine.close().await?;

            eprintln!(
                "gathered {} ({}) from manifest {}",
                output.display(),
                format_size(record.logical_size, BINARY),
                record.manifest_id,
            );
        }
        Cmd::Stat { vault, key } => {
            use sigmavault_core::BlockMedium;
            let medium = Arc::new(FileMedium::open(&vault)?);
            let key = read_key(&key).await?;
            let engine = open_vault(medium.clone(), &key, one_shot_config()).await?;
            let report = serde_json::json!({
                "capacity": medium.size(),
                "capacity_human": format_size(medium.size(), BINARY),
                "capabilities": format!("{:?}", medium.capabilities()),
                "statistics": engine.statistics(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            engine.close().await?;
        }
    }
    Ok(())
}
