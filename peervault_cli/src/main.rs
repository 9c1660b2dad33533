use anyhow::Context;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;
use peervault_node::Node;
use peervault_node::config::NodeConfig;
use rand::RngCore;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// which peervault node this command should run on
    #[arg(short, long, value_name = "NAME", default_value = "local")]
    node: String,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the node's config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Start the node: bind the listener, dial bootstrap peers, serve replication
    /// traffic until interrupted.
    Start,
    /// Store a local file under `key` and replicate it to healthy peers.
    Put { key: String, path: PathBuf },
    /// Fetch `key` from local storage or the mesh and write it to `path`.
    Get { key: String, path: PathBuf },
}

#[derive(Subcommand)]
enum CmdConfig {
    /// Creates the node config file if it doesn't exist and generates an encryption key
    Init {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:3000")]
        listen_addr: String,
        /// Bootstrap peer addresses, comma-separated
        #[arg(long, value_delimiter = ',')]
        bootstrap: Vec<String>,
        /// Shared secret verified during the handshake; every node in the mesh
        /// must use the same value
        #[arg(long)]
        shared_secret: String,
    },
}

impl CmdConfig {
    fn run(self, node_config_file: &Path) -> anyhow::Result<()> {
        match self {
            Self::Init { listen_addr, bootstrap, shared_secret } => {
                if node_config_file.exists() {
                    anyhow::bail!("config file {node_config_file:?} already exists");
                }
                let dir = node_config_file.parent().context("config file has no parent directory")?;
                std::fs::create_dir_all(dir)?;

                let key_file = node_config_file.with_extension("key");
                if !key_file.exists() {
                    info!("generating encryption key for node");
                    let mut bytes = [0u8; 32];
                    rand::rng().fill_bytes(&mut bytes);
                    std::fs::write(&key_file, bytes)?;
                }

                let config = NodeConfig {
                    listen_addr,
                    bootstrap_nodes: bootstrap,
                    storage_root_prefix: dir.to_str().map(str::to_string),
                    encryption_key: peervault_node::config::EncryptionKeySource::File {
                        path: key_file
                            .file_name()
                            .context("key file path has no file name")?
                            .to_string_lossy()
                            .into_owned(),
                    },
                    shared_secret,
                    resource_limits: Default::default(),
                    health: Default::default(),
                };

                let toml = toml::to_string_pretty(&config)?;
                write_atomic(node_config_file, toml.as_bytes())?;
                info!(path = %node_config_file.display(), "wrote node config");
                Ok(())
            }
        }
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn load_config(node_config_file: &Path) -> anyhow::Result<NodeConfig> {
    let toml_content = std::fs::read_to_string(node_config_file)
        .with_context(|| format!("reading node config {node_config_file:?}"))?;
    toml::from_str(&toml_content).with_context(|| format!("parsing node config {node_config_file:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_max_level(cli.verbosity).init();

    let dirs = ProjectDirs::from("dev", "peervault", "PeerVault")
        .context("failed to determine config directory path")?;
    let node_config_file = dirs.config_dir().join("nodes").join(&cli.node).with_extension("toml");
    let config_dir = node_config_file.parent().map(Path::to_path_buf);

    match cli.cmd {
        Commands::Config { cmd } => cmd.run(&node_config_file)?,
        Commands::Start => {
            let config = load_config(&node_config_file)?;
            let node = Node::start(config, config_dir.as_deref()).await?;
            info!(addr = %node.bound_addr(), node = %node.local_id(), "node running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            node.stop().await;
        }
        Commands::Put { key, path } => {
            let config = load_config(&node_config_file)?;
            let node = Node::start(config, config_dir.as_deref()).await?;
            let mut file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening {path:?}"))?;
            node.store(&key, &mut file, &CancellationToken::new()).await.context("store failed")?;
            info!(%key, path = %path.display(), "stored");
            node.stop().await;
        }
        Commands::Get { key, path } => {
            let config = load_config(&node_config_file)?;
            let node = Node::start(config, config_dir.as_deref()).await?;
            let mut reader = node.get(&key, &CancellationToken::new()).await.context("get failed")?;
            let mut out = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("creating {path:?}"))?;
            tokio::io::copy(&mut reader, &mut out).await?;
            out.flush().await?;
            info!(%key, path = %path.display(), "fetched");
            node.stop().await;
        }
    }

    Ok(())
}
