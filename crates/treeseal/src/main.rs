//! `treeseal`: signed, quorum-approved releases of a source tree.
//!
//! Binary entrypoint that ties the hash chain, tree hashing and patch
//! synchronization together.
//!
//! # Usage
//!
//! ```text
//! treeseal keygen -o alice.key                 # new signing key
//! treeseal -k alice.key start                  # start a chain in .treeseal/
//! treeseal -k bob.key prove                    # bob proves key possession
//! treeseal -k alice.key addkey <pubkey> <sig>  # authorize bob
//! treeseal -k alice.key sigctl 2               # require two signatures
//! treeseal -k alice.key publish -m "v1.0"      # record the working tree
//! treeseal -k bob.key sign                     # approve the latest tree
//! treeseal createdist -o release.dist          # bundle chain + patches
//! treeseal -d ./checkout apply -f release.dist --head <hash>
//! ```

mod config;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use treeseal_chain::{
    HashChain, Signature, SigningKey, VerifyingKey, key_hex, sign_key_possession,
};
use treeseal_sync::{PatchDir, SyncOutcome, Synchronizer, dist, publish};
use treeseal_types::{LinkHash, TreeHash, decode_hex_array};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "treeseal",
    version,
    about = "Signed, quorum-approved source tree releases"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Working tree to operate on.
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Secret key file (hex) used to sign new links.
    #[arg(short, long, global = true, env = "TREESEAL_KEY")]
    key: Option<PathBuf>,

    /// Log at debug level regardless of the configured level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new signing key.
    Keygen {
        /// Where to write the secret key. Must not exist.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Print a proof that you hold the signing key, for `addkey`.
    Prove {
        /// Comment the proof is bound to; pass the same one to `addkey`.
        #[arg(short = 'm', long)]
        comment: Option<String>,
    },

    /// Start a new hash chain with your key as the only signer.
    Start {
        /// Comment stored in the genesis link.
        #[arg(short = 'm', long)]
        comment: Option<String>,
    },

    /// Authorize a new signing key.
    Addkey {
        /// Public key to add (hex).
        pubkey: String,
        /// Proof of possession printed by `prove` (hex).
        signature: String,
        /// Comment the proof was made for.
        #[arg(short = 'm', long)]
        comment: Option<String>,
    },

    /// Revoke a signing key.
    Remkey {
        /// Public key to remove (hex).
        pubkey: String,
    },

    /// Set the number of signatures required to approve a tree.
    Sigctl {
        /// Signature threshold.
        m: usize,
    },

    /// Record the working tree as a new release.
    Publish {
        /// Release comment.
        #[arg(short = 'm', long)]
        comment: Option<String>,
    },

    /// Sign a recorded tree hash.
    Sign {
        /// Tree hash to sign (hex). Defaults to the latest recorded tree.
        tree_hash: Option<String>,
    },

    /// Append a free-text comment.
    Comment {
        /// Comment text.
        text: String,
    },

    /// Show signers, threshold and release state.
    Status,

    /// Verify the hash chain from genesis.
    Verify,

    /// Bundle the chain and patches into a distribution file.
    Createdist {
        /// Output file.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Bring the working tree to the latest approved release.
    Apply {
        /// Distribution file to import first.
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Expected chain head (hex); refuse to proceed on mismatch.
        #[arg(long)]
        head: Option<String>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.log.level.as_str()
    };
    setup_tracing(level);

    let ws = Workspace::new(&config, &cli.dir, cli.key.as_deref());
    match cli.command {
        Commands::Keygen { out } => cmd_keygen(&out),
        Commands::Prove { comment } => cmd_prove(&ws, comment.as_deref()),
        Commands::Start { comment } => cmd_start(&ws, comment.as_deref()),
        Commands::Addkey {
            pubkey,
            signature,
            comment,
        } => cmd_addkey(&ws, &pubkey, &signature, comment.as_deref()),
        Commands::Remkey { pubkey } => cmd_remkey(&ws, &pubkey),
        Commands::Sigctl { m } => cmd_sigctl(&ws, m),
        Commands::Publish { comment } => cmd_publish(&ws, comment.as_deref()),
        Commands::Sign { tree_hash } => cmd_sign(&ws, tree_hash.as_deref()),
        Commands::Comment { text } => cmd_comment(&ws, &text),
        Commands::Status => cmd_status(&ws),
        Commands::Verify => cmd_verify(&ws),
        Commands::Createdist { out } => cmd_createdist(&ws, &out),
        Commands::Apply { file, head } => cmd_apply(&ws, file.as_deref(), head.as_deref()),
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the given level.
/// Logs go to stderr so command output stays clean.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolved paths and settings shared by every command.
struct Workspace<'a> {
    config: &'a CliConfig,
    dir: &'a Path,
    key: Option<&'a Path>,
}

impl<'a> Workspace<'a> {
    fn new(config: &'a CliConfig, dir: &'a Path, key: Option<&'a Path>) -> Self {
        Self { config, dir, key }
    }

    fn chain_path(&self) -> PathBuf {
        self.config.layout(self.dir).chain_path()
    }

    fn patches(&self) -> PatchDir {
        PatchDir::new(self.config.layout(self.dir).patch_dir())
    }

    fn open_chain(&self) -> Result<HashChain> {
        let path = self.chain_path();
        HashChain::read_file(&path)
            .with_context(|| format!("failed to load hash chain at {}", path.display()))
    }

    fn signing_key(&self) -> Result<SigningKey> {
        let path = self
            .key
            .context("a signing key is required (use --key or TREESEAL_KEY)")?;
        load_signing_key(path)
    }
}

// -----------------------------------------------------------------------
// Keys
// -----------------------------------------------------------------------

/// Read a hex-encoded 32-byte secret key.
fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    let bytes: [u8; 32] = decode_hex_array(text.trim())
        .with_context(|| format!("invalid key file {}", path.display()))?;
    let key = SigningKey::from_bytes(&bytes);
    debug!(pubkey = %key_hex(&key.verifying_key()), "loaded signing key");
    Ok(key)
}

/// Generate a key and write it to `path`, which must not exist.
fn write_new_signing_key(path: &Path) -> Result<SigningKey> {
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let key = SigningKey::from_bytes(&bytes);

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create key file {}", path.display()))?;
    writeln!(file, "{}", hex::encode(key.to_bytes()))?;
    file.sync_all()?;

    info!(path = %path.display(), pubkey = %key_hex(&key.verifying_key()), "generated signing key");
    Ok(key)
}

fn parse_pubkey(s: &str) -> Result<VerifyingKey> {
    let bytes: [u8; 32] = decode_hex_array(s).context("invalid public key")?;
    VerifyingKey::from_bytes(&bytes).context("invalid public key")
}

fn parse_signature(s: &str) -> Result<Signature> {
    let bytes: [u8; 64] = decode_hex_array(s).context("invalid signature")?;
    Ok(Signature::from_bytes(&bytes))
}

// -----------------------------------------------------------------------
// Commands
// -----------------------------------------------------------------------

fn cmd_keygen(out: &Path) -> Result<()> {
    let key = write_new_signing_key(out)?;
    println!("{}", key_hex(&key.verifying_key()));
    Ok(())
}

fn cmd_prove(ws: &Workspace<'_>, comment: Option<&str>) -> Result<()> {
    let key = ws.signing_key()?;
    let signature = sign_key_possession(&key, comment);
    println!("{} {}", key_hex(&key.verifying_key()), hex::encode(signature.to_bytes()));
    Ok(())
}

fn cmd_start(ws: &Workspace<'_>, comment: Option<&str>) -> Result<()> {
    let key = ws.signing_key()?;
    let path = ws.chain_path();
    let (_chain, entry) = HashChain::start(&path, &key, comment)
        .with_context(|| format!("failed to start hash chain at {}", path.display()))?;
    println!("{entry}");
    Ok(())
}

fn cmd_addkey(
    ws: &Workspace<'_>,
    pubkey: &str,
    signature: &str,
    comment: Option<&str>,
) -> Result<()> {
    let key = ws.signing_key()?;
    let pubkey = parse_pubkey(pubkey)?;
    let signature = parse_signature(signature)?;
    let mut chain = ws.open_chain()?;
    let link = chain
        .add_key(pubkey, signature, comment, &key)
        .context("failed to add key")?;
    println!("{link}");
    Ok(())
}

fn cmd_remkey(ws: &Workspace<'_>, pubkey: &str) -> Result<()> {
    let key = ws.signing_key()?;
    let pubkey = parse_pubkey(pubkey)?;
    let mut chain = ws.open_chain()?;
    let link = chain
        .remove_key(pubkey, &key)
        .context("failed to remove key")?;
    println!("{link}");
    Ok(())
}

fn cmd_sigctl(ws: &Workspace<'_>, m: usize) -> Result<()> {
    let key = ws.signing_key()?;
    let mut chain = ws.open_chain()?;
    let link = chain
        .set_threshold(m, &key)
        .context("failed to set threshold")?;
    println!("{link}");
    Ok(())
}

fn cmd_publish(ws: &Workspace<'_>, comment: Option<&str>) -> Result<()> {
    let key = ws.signing_key()?;
    let mut chain = ws.open_chain()?;
    let recorded = publish(
        &mut chain,
        ws.dir,
        &ws.patches(),
        &ws.config.sync_config(ws.dir),
        comment,
        &key,
    )
    .context("failed to publish working tree")?;

    match recorded {
        Some(tree_hash) => println!("{tree_hash}"),
        None => println!("no changes since the last recorded tree"),
    }
    Ok(())
}

fn cmd_sign(ws: &Workspace<'_>, tree_hash: Option<&str>) -> Result<()> {
    let key = ws.signing_key()?;
    let mut chain = ws.open_chain()?;
    let tree_hash = match tree_hash {
        Some(s) => s.parse::<TreeHash>().context("invalid tree hash")?,
        None => *chain
            .tree_hashes()
            .last()
            .context("no tree has been recorded yet")?,
    };
    chain
        .sign_tree(tree_hash, &key)
        .with_context(|| format!("failed to sign tree {tree_hash}"))?;

    if chain.last_approved_tree_hash() == Some(tree_hash) {
        println!("{tree_hash} approved");
    } else {
        let signers = chain
            .state()
            .tree(&tree_hash)
            .map_or(0, |record| record.signers.len());
        println!(
            "{tree_hash} signed ({signers}/{} signatures)",
            chain.state().threshold()
        );
    }
    Ok(())
}

fn cmd_comment(ws: &Workspace<'_>, text: &str) -> Result<()> {
    let key = ws.signing_key()?;
    let mut chain = ws.open_chain()?;
    let link = chain.comment(text, &key).context("failed to add comment")?;
    println!("{link}");
    Ok(())
}

fn cmd_status(ws: &Workspace<'_>) -> Result<()> {
    let chain = ws.open_chain()?;
    let state = chain.state();

    println!("Head: {}", chain.head());
    println!("Links: {}", chain.len());
    println!("Signers: {} (threshold {})", state.keys().len(), state.threshold());
    for key in state.keys() {
        println!("  {}", key_hex(key));
    }

    println!("Trees: {}", state.trees().len());
    for record in state.trees() {
        let mark = match record.approved_at {
            Some(_) => "approved".to_string(),
            None => format!("{}/{} signatures", record.signers.len(), state.threshold()),
        };
        println!("  {} {mark}", record.tree_hash);
    }

    match chain.last_approved_tree_hash() {
        Some(hash) => println!("Approved: {hash}"),
        None => println!("Approved: none"),
    }

    let current = Synchronizer::new(ws.config.sync_config(ws.dir))
        .current_hash(ws.dir)
        .context("failed to hash working tree")?;
    println!("Working tree: {current}");
    Ok(())
}

fn cmd_verify(ws: &Workspace<'_>) -> Result<()> {
    let chain = ws.open_chain()?;
    println!("chain ok: {} links, head {}", chain.len(), chain.head());
    Ok(())
}

fn cmd_createdist(ws: &Workspace<'_>, out: &Path) -> Result<()> {
    let file = std::fs::File::create(out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    let head = dist::create(&ws.chain_path(), &ws.patches(), std::io::BufWriter::new(file))
        .context("failed to create distribution")?;
    println!("{head}");
    Ok(())
}

fn cmd_apply(ws: &Workspace<'_>, file: Option<&Path>, head: Option<&str>) -> Result<()> {
    let expected = head
        .map(|s| s.parse::<LinkHash>())
        .transpose()
        .context("invalid head hash")?;
    let patches = ws.patches();

    let mut chain = match file {
        Some(path) => {
            let reader = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            dist::apply(
                &ws.chain_path(),
                &patches,
                std::io::BufReader::new(reader),
                expected.as_ref(),
            )
            .context("failed to apply distribution")?
        }
        None => {
            let chain = ws.open_chain()?;
            if let Some(expected) = &expected {
                chain.check_head(expected)?;
            }
            chain
        }
    };

    let outcome = Synchronizer::new(ws.config.sync_config(ws.dir))
        .sync_dir(
            ws.dir,
            chain.last_approved_tree_hash(),
            &patches,
            &chain.tree_hashes(),
        )
        .context("failed to sync working tree")?;
    chain.close()?;

    match outcome {
        SyncOutcome::NoTarget => println!("no approved tree yet"),
        SyncOutcome::UpToDate(hash) => println!("{hash} up to date"),
        SyncOutcome::Applied { to, patches, .. } => {
            println!("{to} applied ({patches} patches)")
        }
    }
    Ok(())
}
