//! veil: encrypt, decrypt, hash and share from the command line
//!
//! Transform commands:
//!   keygen -a <alg>                        - print a fresh key (AES-256 or RSA)
//!   public-key                             - print the public half of an RSA key
//!   encrypt -a <alg> [--text T | --file F] - encrypt text (token) or a file (.encrypted)
//!   decrypt -a <alg> [--text T | --file F] - reverse of encrypt
//!   hash [--text T | --file F]             - SHA-256 (hex, or <file>.sha256)
//!
//! Snippet commands (local JSON store, see [store] in veil.toml):
//!   snippet create -a <alg> [--text T]     - store encrypted text, print id and share link
//!   snippet fetch <id | share link>        - print a live snippet (optionally decrypt it)
//!   snippet sweep                          - remove expired snippets
//!
//! Keys come from --key, --key-file or $VEIL_KEY. Text comes from --text or stdin.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use veil_core::api::{extract_snippet_id, share_link, SnippetBody};
use veil_core::config::{StoreBackend, VeilConfig};
use veil_core::{Algorithm, VeilError};
use veil_crypto::{CancelFlag, Engine, FileArtifact, KeyMaterial, Progress};
use veil_snippets::SnippetStore;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "veil",
    version,
    about = "veil encryption toolkit",
    long_about = "veil: AES-256 / RSA encryption, SHA-256 digests, and seven-day snippet sharing"
)]
struct Cli {
    /// Path to veil.toml configuration file
    #[arg(long, short = 'c', env = "VEIL_CONFIG", default_value = "~/.config/veil/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VEIL_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate key material for a cipher
    Keygen {
        /// AES-256 or RSA
        #[arg(long, short = 'a')]
        algorithm: Algorithm,
    },

    /// Print the public half of an RSA key (safe to hand to senders)
    #[command(name = "public-key")]
    PublicKey {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Encrypt text or a file
    Encrypt {
        #[arg(long, short = 'a')]
        algorithm: Algorithm,
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        input: InputArgs,
    },

    /// Decrypt a token or an encrypted file
    Decrypt {
        #[arg(long, short = 'a')]
        algorithm: Algorithm,
        #[command(flatten)]
        key: KeyArgs,
        #[command(flatten)]
        input: InputArgs,
    },

    /// SHA-256 digest of text or a file
    Hash {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Ephemeral snippet sharing
    Snippet {
        /// Snippet table path (overrides [store].path)
        #[arg(long, env = "VEIL_STORE")]
        store: Option<PathBuf>,

        #[command(subcommand)]
        action: SnippetAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug, Default)]
struct KeyArgs {
    /// Key text (AES-256: base64 key or passphrase; RSA: key pair or public key)
    #[arg(long, short = 'k', env = "VEIL_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Read the key from a file (trailing newline ignored)
    #[arg(long, conflicts_with = "key")]
    key_file: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
struct InputArgs {
    /// Input text (default: read stdin)
    #[arg(long, short = 't', conflicts_with = "file")]
    text: Option<String>,

    /// Input file, streamed in chunks
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,

    /// Output directory for file results (default: next to the input)
    #[arg(long, short = 'o', requires = "file")]
    out_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum SnippetAction {
    /// Store encrypted text and print its id and share link
    Create {
        /// Algorithm tag the text was encrypted with
        #[arg(long, short = 'a')]
        algorithm: String,
        /// Encrypted text (default: read stdin)
        #[arg(long, short = 't')]
        text: Option<String>,
    },

    /// Fetch a live snippet by id or share link
    Fetch {
        /// Snippet id or full share link
        id: String,
        /// Decrypt the snippet with this key instead of printing the record
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Remove expired snippets from the table
    Sweep,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config_path = veil_core::config::expand_tilde(&cli.config);
    let config = load_config(&config_path)?;
    let engine = Engine::from_config(&config.crypto).context("invalid [crypto] settings")?;

    match cli.command {
        Commands::Keygen { algorithm } => cmd_keygen(&engine, algorithm),
        Commands::PublicKey { key } => cmd_public_key(&key),
        Commands::Encrypt { algorithm, key, input } => {
            cmd_transform(engine, Operation::Encrypt, algorithm, &key, input).await
        }
        Commands::Decrypt { algorithm, key, input } => {
            cmd_transform(engine, Operation::Decrypt, algorithm, &key, input).await
        }
        Commands::Hash { input } => {
            let no_key = KeyArgs::default();
            cmd_transform(engine, Operation::Hash, Algorithm::Sha256, &no_key, input).await
        }
        Commands::Snippet { store, action } => {
            let store = open_store(&config, store.as_deref())?;
            match action {
                SnippetAction::Create { algorithm, text } => {
                    cmd_snippet_create(&store, &config, &algorithm, text)
                }
                SnippetAction::Fetch { id, key } => cmd_snippet_fetch(&store, &engine, &id, &key),
                SnippetAction::Sweep => cmd_snippet_sweep(&store),
            }
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Config loading ────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<VeilConfig> {
    if path.exists() {
        VeilConfig::load(path).with_context(|| format!("loading config: {}", path.display()))
    } else {
        Ok(VeilConfig::default())
    }
}

// ── Input helpers ─────────────────────────────────────────────────────────────

/// Resolve key text from the flag or key file. Cipher operations without a
/// key are rejected before any work starts.
fn resolve_key(args: &KeyArgs) -> Result<Option<String>> {
    let key = match (&args.key, &args.key_file) {
        (Some(key), _) => Some(key.clone()),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading key file: {}", path.display()))?;
            Some(text.trim_end_matches(['\r', '\n']).to_string())
        }
        (None, None) => None,
    };
    Ok(key.filter(|k| !k.is_empty()))
}

fn require_key(args: &KeyArgs) -> Result<String> {
    resolve_key(args)?.ok_or_else(|| {
        VeilError::EmptyInput("a key is required (--key, --key-file or $VEIL_KEY)".into()).into()
    })
}

/// Text from the flag, else stdin (one trailing newline stripped).
fn read_text(text: Option<String>) -> Result<String> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            strip_newline(buf)
        }
    };
    if text.is_empty() {
        return Err(VeilError::EmptyInput("text".into()).into());
    }
    Ok(text)
}

fn strip_newline(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
    s
}

fn output_dir(input: &Path, out_dir: Option<PathBuf>) -> PathBuf {
    out_dir.unwrap_or_else(|| match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    })
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `veil keygen` / `veil public-key` ─────────────────────────────────────────

fn cmd_keygen(engine: &Engine, algorithm: Algorithm) -> Result<()> {
    let key = engine.generate_key(algorithm)?;
    println!("{key}");
    Ok(())
}

fn cmd_public_key(args: &KeyArgs) -> Result<()> {
    let key = KeyMaterial::parse(Algorithm::Rsa, &require_key(args)?)?;
    println!("{}", key.asymmetric()?.public_only().to_text()?);
    Ok(())
}

// ── `veil encrypt` / `decrypt` / `hash` ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Encrypt,
    Decrypt,
    Hash,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
            Operation::Hash => "hash",
        }
    }
}

async fn cmd_transform(
    engine: Engine,
    op: Operation,
    algorithm: Algorithm,
    key_args: &KeyArgs,
    input: InputArgs,
) -> Result<()> {
    let key = match op {
        Operation::Hash => String::new(),
        _ => require_key(key_args)?,
    };

    if let Some(file) = input.file {
        let out_dir = output_dir(&file, input.out_dir);
        let artifact = run_file_op(engine, op, algorithm, key, file, out_dir).await?;
        println!("{}", artifact.path.display());
        eprintln!(
            "{}: {} ({}, {})",
            op.label(),
            artifact.name,
            artifact.content_type,
            fmt_bytes(artifact.size)
        );
        return Ok(());
    }

    let text = read_text(input.text)?;
    let output = match op {
        Operation::Encrypt => engine.encrypt_text(&text, &key, algorithm)?,
        Operation::Decrypt => engine.decrypt_text(&text, &key, algorithm)?,
        Operation::Hash => engine.hash_text(&text),
    };
    println!("{output}");
    Ok(())
}

/// Run a file operation on a blocking thread with a progress bar. Ctrl-C
/// cancels at the next chunk boundary and leaves no output behind.
async fn run_file_op(
    engine: Engine,
    op: Operation,
    algorithm: Algorithm,
    key: String,
    input: PathBuf,
    out_dir: PathBuf,
) -> Result<FileArtifact> {
    tracing::debug!(op = op.label(), algorithm = %algorithm, input = %input.display(), "starting file operation");
    let pb = make_progress_bar(op.label());
    pb.set_message(
        input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let bar = pb.clone();
    let task = tokio::task::spawn_blocking(move || {
        let mut report = |pct: u8| bar.set_position(u64::from(pct));
        let progress = Progress::new(&mut report).with_cancel(cancel);
        match op {
            Operation::Encrypt => engine.encrypt_file(&input, &out_dir, &key, algorithm, progress),
            Operation::Decrypt => engine.decrypt_file(&input, &out_dir, &key, algorithm, progress),
            Operation::Hash => engine.hash_file(&input, &out_dir, progress),
        }
    });

    let result = task.await.context("file operation panicked")?;
    interrupt.abort();

    match result {
        Ok(artifact) => {
            pb.finish_with_message("done");
            Ok(artifact)
        }
        Err(VeilError::Cancelled) => {
            pb.abandon_with_message("cancelled");
            bail!("{} cancelled", op.label())
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(e.into())
        }
    }
}

// ── `veil snippet` ────────────────────────────────────────────────────────────

/// The CLI always uses the JSON table; a memory table would die with the process.
fn open_store(config: &VeilConfig, path_override: Option<&Path>) -> Result<SnippetStore> {
    let mut store_config = config.store.clone();
    store_config.backend = StoreBackend::Json;
    if let Some(path) = path_override {
        store_config.path = path.to_path_buf();
    }
    SnippetStore::open(&store_config)
        .with_context(|| format!("opening snippet table: {}", store_config.path.display()))
}

fn cmd_snippet_create(
    store: &SnippetStore,
    config: &VeilConfig,
    algorithm: &str,
    text: Option<String>,
) -> Result<()> {
    let text = read_text(text)?;
    let id = store.create(&text, algorithm)?;
    println!("{id}");
    eprintln!("share: {}", share_link(&config.daemon.public_url, &id));
    Ok(())
}

fn cmd_snippet_fetch(
    store: &SnippetStore,
    engine: &Engine,
    id_or_link: &str,
    key_args: &KeyArgs,
) -> Result<()> {
    let id = extract_snippet_id(id_or_link)
        .ok_or_else(|| anyhow::anyhow!("not a snippet id or share link: {id_or_link}"))?;
    let snippet = store.fetch(&id)?;

    match resolve_key(key_args)? {
        Some(key) => {
            let algorithm: Algorithm = snippet.body.algorithm.parse()?;
            println!(
                "{}",
                engine.decrypt_text(&snippet.body.encrypted_text, &key, algorithm)?
            );
        }
        None => print_snippet(&snippet.body)?,
    }
    Ok(())
}

fn print_snippet(body: &SnippetBody) -> Result<()> {
    let rendered = serde_json::to_string_pretty(body).context("serializing snippet")?;
    println!("{rendered}");
    Ok(())
}

fn cmd_snippet_sweep(store: &SnippetStore) -> Result<()> {
    let removed = store.sweep()?;
    println!("removed {removed} expired snippet(s)");
    Ok(())
}

// ── `veil config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &VeilConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
